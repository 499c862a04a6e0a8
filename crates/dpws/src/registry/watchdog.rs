// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Background registry sweeper.
//!
//! Wakes every `watchdog_interval` (re-read on each cycle) and calls
//! [`ReferenceRegistry::sweep`]. Holds only a weak registry handle, so it
//! never keeps the registry alive.

use super::ReferenceRegistry;
use crate::config::SharedConfig;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

/// Periodic sweep thread.
///
/// Call `stop()` (or drop it) to signal the thread and join it.
pub struct RegistryWatchdog {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl RegistryWatchdog {
    /// Start the sweep thread.
    pub fn start(registry: &Arc<ReferenceRegistry>, config: SharedConfig) -> std::io::Result<Self> {
        let (stop_tx, stop_rx) = channel::bounded(1);
        let registry = Arc::downgrade(registry);

        let handle = thread::Builder::new()
            .name("dpws-registry-watchdog".to_string())
            .spawn(move || Self::run_loop(registry, config, stop_rx))?;

        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    fn run_loop(registry: Weak<ReferenceRegistry>, config: SharedConfig, stop_rx: Receiver<()>) {
        log::debug!("[watchdog] started");
        loop {
            let interval = config.load().watchdog_interval;
            match stop_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
            let Some(registry) = registry.upgrade() else {
                break;
            };
            registry.sweep();
        }
        log::debug!("[watchdog] stopped");
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the thread to exit and wait for it.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.try_send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for RegistryWatchdog {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for RegistryWatchdog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryWatchdog")
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{share, FrameworkConfig};
    use crate::discovery::{DuplicateMessageFilter, SequenceTracker};
    use crate::reference::ReferenceContext;
    use crate::runtime::{FrameworkStats, WorkerPool};
    use crate::transport::Dispatcher;
    use crate::types::EndpointIdentity;
    use std::collections::HashMap;
    use std::time::{Duration, Instant};

    fn registry(config: &SharedConfig) -> Arc<ReferenceRegistry> {
        let pool = Arc::new(WorkerPool::new(1));
        let stats = Arc::new(FrameworkStats::new());
        let dispatcher = Arc::new(Dispatcher::new(
            HashMap::new(),
            Arc::clone(config),
            Arc::clone(&pool),
            Arc::new(DuplicateMessageFilter::new(8)),
            None,
            Arc::clone(&stats),
        ));
        ReferenceRegistry::new(Arc::new(ReferenceContext {
            config: Arc::clone(config),
            pool,
            dispatcher,
            sequences: Arc::new(SequenceTracker::new(true)),
            stats,
        }))
    }

    #[test]
    fn test_watchdog_start_stop() {
        let config = share(FrameworkConfig::default());
        let registry = registry(&config);
        let watchdog = RegistryWatchdog::start(&registry, config).unwrap();
        assert!(watchdog.is_running());

        let start = Instant::now();
        watchdog.stop();
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_watchdog_removes_idle_references() {
        let config = share(
            FrameworkConfig::default()
                .with_reference_ttl(Duration::ZERO)
                .with_watchdog_interval(Duration::from_millis(20)),
        );
        let registry = registry(&config);
        registry.get_or_create_device(&EndpointIdentity::new("urn:uuid:idle"));
        let _watchdog = RegistryWatchdog::start(&registry, config).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while registry.device_count() > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(registry.device_count(), 0);
    }
}
