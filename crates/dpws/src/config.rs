// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Framework configuration - single source of truth for tunables.
//!
//! # Architecture
//!
//! - **Level 1 (Static)**: named default constants below. **Never hardcode
//!   these values elsewhere.**
//! - **Level 2 (Dynamic)**: [`FrameworkConfig`], built programmatically with
//!   `with_*` builders or loaded from YAML (feature `config-loaders`).
//!
//! # Example
//!
//! ```
//! use dpws::config::FrameworkConfig;
//! use std::time::Duration;
//!
//! let config = FrameworkConfig::default()
//!     .with_match_wait(Duration::from_secs(2))
//!     .with_max_wait_retries(3);
//! assert!(config.validate().is_ok());
//! assert_eq!(config.wait_ceiling(), Duration::from_secs(6));
//! ```

use crate::error::{Error, Result};
use crate::types::{ProtocolVersion, DPWS_COMM_MANAGER_ID};
use arc_swap::ArcSwap;
use std::sync::Arc;
use std::time::Duration;

// =======================================================================
// Request correlation
// =======================================================================

/// Wait slice for a blocked request (milliseconds).
///
/// A synchronizer that is still pending after this slice is re-checked and
/// waited on again, up to [`DEFAULT_MAX_WAIT_RETRIES`] times.
pub const DEFAULT_MATCH_WAIT_MS: u64 = 5_000;

/// Number of wait slices before a blocked request fails with `Timeout`.
///
/// 5 x 5 s = 25 s ceiling.
pub const DEFAULT_MAX_WAIT_RETRIES: u32 = 5;

// =======================================================================
// Caches
// =======================================================================

/// Recently seen message ids kept for duplicate suppression.
pub const DEFAULT_DUPLICATE_FILTER_CAPACITY: usize = 50;

/// Maximum service references kept alive without a parent device.
pub const DEFAULT_UNATTACHED_SERVICE_CACHE: usize = 50;

/// Caching TTL of an unused remote reference (milliseconds).
pub const DEFAULT_REFERENCE_TTL_MS: u64 = 300_000;

/// Registry watchdog sweep period (milliseconds).
pub const DEFAULT_WATCHDOG_INTERVAL_MS: u64 = 10_000;

// =======================================================================
// Threads
// =======================================================================

/// Worker threads executing sends, retries and listener notifications.
pub const DEFAULT_WORKER_THREADS: usize = 4;

/// Max time a multicast caller waits for a worker to pick its send up
/// (milliseconds).
pub const DEFAULT_MULTICAST_HANDOFF_MS: u64 = 200;

/// Max time shutdown waits for in-flight multicast sends (milliseconds).
pub const DEFAULT_SHUTDOWN_DRAIN_MS: u64 = 5_000;

/// Configuration snapshot shared by every component.
///
/// Readers call `load()`; [`Framework::reconfigure`] swaps in a new value.
///
/// [`Framework::reconfigure`]: crate::Framework::reconfigure
pub type SharedConfig = Arc<ArcSwap<FrameworkConfig>>;

/// Wrap a configuration for sharing.
pub fn share(config: FrameworkConfig) -> SharedConfig {
    Arc::new(ArcSwap::from_pointee(config))
}

/// Runtime configuration of the discovery/proxy framework.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameworkConfig {
    /// Wait slice of a blocked request.
    pub match_wait: Duration,
    /// Wait slices before failing with `Timeout`.
    pub max_wait_retries: u32,
    /// Reject stale AppSequences. When false, every announcement is accepted.
    pub police_sequences: bool,
    /// Capacity of the recent message id ring.
    pub duplicate_filter_capacity: usize,
    /// Capacity of the unattached service eviction list.
    pub unattached_service_cache: usize,
    /// Idle time after which an unobserved remote reference may be dropped.
    pub reference_ttl: Duration,
    /// Watchdog sweep period.
    pub watchdog_interval: Duration,
    /// Worker pool size.
    pub worker_threads: usize,
    /// Multicast hand-off wait.
    pub multicast_handoff: Duration,
    /// Shutdown drain wait.
    pub shutdown_drain: Duration,
    /// Versions used when fanning out a request of unknown version.
    pub supported_versions: Vec<ProtocolVersion>,
    /// Communication manager used for multicast and unqualified candidates.
    pub default_comm_manager: String,
}

impl Default for FrameworkConfig {
    fn default() -> Self {
        Self {
            match_wait: Duration::from_millis(DEFAULT_MATCH_WAIT_MS),
            max_wait_retries: DEFAULT_MAX_WAIT_RETRIES,
            police_sequences: true,
            duplicate_filter_capacity: DEFAULT_DUPLICATE_FILTER_CAPACITY,
            unattached_service_cache: DEFAULT_UNATTACHED_SERVICE_CACHE,
            reference_ttl: Duration::from_millis(DEFAULT_REFERENCE_TTL_MS),
            watchdog_interval: Duration::from_millis(DEFAULT_WATCHDOG_INTERVAL_MS),
            worker_threads: DEFAULT_WORKER_THREADS,
            multicast_handoff: Duration::from_millis(DEFAULT_MULTICAST_HANDOFF_MS),
            shutdown_drain: Duration::from_millis(DEFAULT_SHUTDOWN_DRAIN_MS),
            supported_versions: ProtocolVersion::ALL.to_vec(),
            default_comm_manager: DPWS_COMM_MANAGER_ID.to_string(),
        }
    }
}

impl FrameworkConfig {
    /// Builder: set the wait slice.
    pub fn with_match_wait(mut self, wait: Duration) -> Self {
        self.match_wait = wait;
        self
    }

    /// Builder: set the wait retry count.
    pub fn with_max_wait_retries(mut self, retries: u32) -> Self {
        self.max_wait_retries = retries;
        self
    }

    /// Builder: disable AppSequence policing.
    pub fn without_sequence_policing(mut self) -> Self {
        self.police_sequences = false;
        self
    }

    /// Builder: set duplicate filter capacity.
    pub fn with_duplicate_filter_capacity(mut self, capacity: usize) -> Self {
        self.duplicate_filter_capacity = capacity;
        self
    }

    /// Builder: set unattached service cache size.
    pub fn with_unattached_service_cache(mut self, capacity: usize) -> Self {
        self.unattached_service_cache = capacity;
        self
    }

    /// Builder: set reference TTL.
    pub fn with_reference_ttl(mut self, ttl: Duration) -> Self {
        self.reference_ttl = ttl;
        self
    }

    /// Builder: set watchdog interval.
    pub fn with_watchdog_interval(mut self, interval: Duration) -> Self {
        self.watchdog_interval = interval;
        self
    }

    /// Builder: set worker pool size.
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    /// Builder: set supported protocol versions (fan-out width).
    pub fn with_supported_versions(mut self, versions: Vec<ProtocolVersion>) -> Self {
        self.supported_versions = versions;
        self
    }

    /// Builder: set shutdown drain wait.
    pub fn with_shutdown_drain(mut self, wait: Duration) -> Self {
        self.shutdown_drain = wait;
        self
    }

    /// Longest time a blocked request can wait in total.
    pub fn wait_ceiling(&self) -> Duration {
        self.match_wait
            .saturating_mul(self.max_wait_retries.max(1))
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.match_wait.is_zero() {
            return Err(Error::Config("match_wait must be > 0".into()));
        }
        if self.duplicate_filter_capacity == 0 {
            return Err(Error::Config("duplicate_filter_capacity must be > 0".into()));
        }
        if self.unattached_service_cache == 0 {
            return Err(Error::Config("unattached_service_cache must be > 0".into()));
        }
        if self.worker_threads == 0 {
            return Err(Error::Config("worker_threads must be > 0".into()));
        }
        if self.watchdog_interval.is_zero() {
            return Err(Error::Config("watchdog_interval must be > 0".into()));
        }
        if self.supported_versions.is_empty() {
            return Err(Error::Config(
                "supported_versions must list at least one version".into(),
            ));
        }
        if self.default_comm_manager.is_empty() {
            return Err(Error::Config("default_comm_manager must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(feature = "config-loaders")]
mod loader {
    use super::FrameworkConfig;
    use crate::error::{Error, Result};
    use crate::types::ProtocolVersion;
    use serde::Deserialize;
    use std::path::Path;
    use std::time::Duration;

    /// YAML shape: every key optional, durations in milliseconds.
    #[derive(Debug, Default, Deserialize)]
    #[serde(default, deny_unknown_fields)]
    struct RawConfig {
        match_wait_ms: Option<u64>,
        max_wait_retries: Option<u32>,
        police_sequences: Option<bool>,
        duplicate_filter_capacity: Option<usize>,
        unattached_service_cache: Option<usize>,
        reference_ttl_ms: Option<u64>,
        watchdog_interval_ms: Option<u64>,
        worker_threads: Option<usize>,
        multicast_handoff_ms: Option<u64>,
        shutdown_drain_ms: Option<u64>,
        supported_versions: Option<Vec<ProtocolVersion>>,
        default_comm_manager: Option<String>,
    }

    impl RawConfig {
        fn apply(self, mut cfg: FrameworkConfig) -> FrameworkConfig {
            if let Some(v) = self.match_wait_ms {
                cfg.match_wait = Duration::from_millis(v);
            }
            if let Some(v) = self.max_wait_retries {
                cfg.max_wait_retries = v;
            }
            if let Some(v) = self.police_sequences {
                cfg.police_sequences = v;
            }
            if let Some(v) = self.duplicate_filter_capacity {
                cfg.duplicate_filter_capacity = v;
            }
            if let Some(v) = self.unattached_service_cache {
                cfg.unattached_service_cache = v;
            }
            if let Some(v) = self.reference_ttl_ms {
                cfg.reference_ttl = Duration::from_millis(v);
            }
            if let Some(v) = self.watchdog_interval_ms {
                cfg.watchdog_interval = Duration::from_millis(v);
            }
            if let Some(v) = self.worker_threads {
                cfg.worker_threads = v;
            }
            if let Some(v) = self.multicast_handoff_ms {
                cfg.multicast_handoff = Duration::from_millis(v);
            }
            if let Some(v) = self.shutdown_drain_ms {
                cfg.shutdown_drain = Duration::from_millis(v);
            }
            if let Some(v) = self.supported_versions {
                cfg.supported_versions = v;
            }
            if let Some(v) = self.default_comm_manager {
                cfg.default_comm_manager = v;
            }
            cfg
        }
    }

    impl FrameworkConfig {
        /// Parse a YAML document on top of the defaults, then validate.
        pub fn from_yaml_str(yaml: &str) -> Result<Self> {
            let raw: RawConfig =
                serde_yaml::from_str(yaml).map_err(|e| Error::Config(e.to_string()))?;
            let cfg = raw.apply(FrameworkConfig::default());
            cfg.validate()?;
            Ok(cfg)
        }

        /// Load a YAML file (see [`FrameworkConfig::from_yaml_str`]).
        pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
            let path = path.as_ref();
            let text = std::fs::read_to_string(path)
                .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
            Self::from_yaml_str(&text)
        }
    }
}
