// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Framework entry point.
//!
//! Owns the shared services (configuration, worker pool, duplicate filter,
//! sequence tracker, dispatcher), the reference registry and its watchdog.
//!
//! # Example
//!
//! ```ignore
//! let framework = Framework::builder()
//!     .config(FrameworkConfig::default())
//!     .transport(Arc::new(MyUdpTransport::new()?))
//!     .build()?;
//!
//! // Feed decoded inbound multicast traffic.
//! framework.receive(InboundMessage::new(message, Some(peer)))?;
//!
//! let device = framework.device(&endpoint);
//! let proxy = device.resolve_object(true)?;
//! ```

use crate::config::{share, FrameworkConfig, SharedConfig};
use crate::discovery::{DuplicateMessageFilter, SequenceTracker};
use crate::error::{Error, Result};
use crate::reference::{DeviceReference, ReferenceContext, ServiceReference};
use crate::registry::{ReferenceRegistry, RegistryWatchdog};
use crate::runtime::{FrameworkStats, StatsSnapshot, WorkerPool};
use crate::transport::{
    CommunicationManagerRegistry, Dispatcher, Message, MessageBody, SecurityProvider, Transport,
};
use crate::types::{AppSequence, DeviceDescription, DiscoveryMetadata, EndpointIdentity};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Decoded inbound message plus the address it came from.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub message: Message,
    pub source: Option<SocketAddr>,
}

impl InboundMessage {
    pub fn new(message: Message, source: Option<SocketAddr>) -> Self {
        Self { message, source }
    }
}

/// Builder for [`Framework`].
pub struct FrameworkBuilder {
    config: FrameworkConfig,
    comm_managers: CommunicationManagerRegistry,
    security: Option<Arc<dyn SecurityProvider>>,
}

impl FrameworkBuilder {
    fn new() -> Self {
        Self {
            config: FrameworkConfig::default(),
            comm_managers: CommunicationManagerRegistry::new(),
            security: None,
        }
    }

    pub fn config(mut self, config: FrameworkConfig) -> Self {
        self.config = config;
        self
    }

    /// Register an already built transport under its own id.
    pub fn transport(self, transport: Arc<dyn Transport>) -> Self {
        self.comm_managers.register_instance(transport);
        self
    }

    /// Register a transport factory under `id`.
    pub fn comm_manager<F>(self, id: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&FrameworkConfig) -> Arc<dyn Transport> + Send + Sync + 'static,
    {
        self.comm_managers.register(id, factory);
        self
    }

    pub fn security(mut self, provider: Arc<dyn SecurityProvider>) -> Self {
        self.security = Some(provider);
        self
    }

    /// Validate the configuration, instantiate transports and start the
    /// worker pool and registry watchdog.
    pub fn build(self) -> Result<Framework> {
        crate::trace_fn!("FrameworkBuilder::build");
        self.config.validate()?;
        if !self.comm_managers.contains(&self.config.default_comm_manager) {
            return Err(Error::Config(format!(
                "default communication manager '{}' is not registered",
                self.config.default_comm_manager
            )));
        }

        let transports = self.comm_managers.instantiate_all(&self.config);
        let pool = Arc::new(WorkerPool::new(self.config.worker_threads));
        let filter = Arc::new(DuplicateMessageFilter::new(self.config.duplicate_filter_capacity));
        let sequences = Arc::new(SequenceTracker::new(self.config.police_sequences));
        let stats = Arc::new(FrameworkStats::new());
        let config = share(self.config);

        let dispatcher = Arc::new(Dispatcher::new(
            transports,
            Arc::clone(&config),
            Arc::clone(&pool),
            Arc::clone(&filter),
            self.security,
            Arc::clone(&stats),
        ));
        let registry = ReferenceRegistry::new(Arc::new(ReferenceContext {
            config: Arc::clone(&config),
            pool: Arc::clone(&pool),
            dispatcher: Arc::clone(&dispatcher),
            sequences: Arc::clone(&sequences),
            stats: Arc::clone(&stats),
        }));
        let watchdog = RegistryWatchdog::start(&registry, Arc::clone(&config))
            .map_err(|e| Error::Config(format!("failed to start registry watchdog: {}", e)))?;

        // Seconds since the epoch: a restarted sender outranks its old self.
        let instance_id = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(1);

        log::info!(
            "[framework] started: comm managers {:?}, instance {}",
            self.comm_managers.ids(),
            instance_id
        );

        Ok(Framework {
            config,
            comm_managers: self.comm_managers,
            pool,
            filter,
            sequences,
            stats,
            dispatcher,
            registry,
            watchdog: Mutex::new(Some(watchdog)),
            instance_id,
            message_number: AtomicU64::new(0),
            shut_down: AtomicBool::new(false),
        })
    }
}

/// Running discovery/proxy framework.
pub struct Framework {
    config: SharedConfig,
    comm_managers: CommunicationManagerRegistry,
    pool: Arc<WorkerPool>,
    filter: Arc<DuplicateMessageFilter>,
    sequences: Arc<SequenceTracker>,
    stats: Arc<FrameworkStats>,
    dispatcher: Arc<Dispatcher>,
    registry: Arc<ReferenceRegistry>,
    watchdog: Mutex<Option<RegistryWatchdog>>,
    instance_id: u64,
    message_number: AtomicU64,
    shut_down: AtomicBool,
}

impl Framework {
    pub fn builder() -> FrameworkBuilder {
        FrameworkBuilder::new()
    }

    // ========================================================================
    // Inbound
    // ========================================================================

    /// Process one inbound announcement (Hello or Bye).
    ///
    /// Duplicates fail with [`Error::DuplicateMessage`], stale sequences with
    /// [`Error::StaleSequence`]; callers normally just log those. A Bye for
    /// an unknown endpoint is ignored.
    pub fn receive(&self, inbound: InboundMessage) -> Result<()> {
        crate::trace_fn!("Framework::receive");
        if self.is_shut_down() {
            return Err(Error::Shutdown);
        }
        let InboundMessage { message, source } = inbound;
        FrameworkStats::bump(&self.stats.messages_received);

        if self.filter.contains_or_add(&message.id) {
            FrameworkStats::bump(&self.stats.duplicates_dropped);
            log::debug!("[framework] duplicate {} dropped", message);
            return Err(Error::DuplicateMessage);
        }

        let name = message.body.name();
        let sequence = message.app_sequence;
        let source = source.map(|s| s.ip());
        match message.body {
            MessageBody::Hello(metadata) => {
                let sequence = sequence.ok_or_else(|| Self::unsequenced(name))?;
                if self.is_local(&metadata.endpoint) {
                    log::debug!("[framework] own Hello for {} ignored", metadata.endpoint);
                    return Ok(());
                }
                if metadata.is_device() {
                    self.registry
                        .get_or_create_device(&metadata.endpoint)
                        .apply_announcement(sequence, metadata, source)
                } else {
                    self.registry
                        .get_or_create_service(&metadata.endpoint)
                        .apply_announcement(sequence, metadata, source)
                }
            }
            MessageBody::Bye(endpoint) => {
                let sequence = sequence.ok_or_else(|| Self::unsequenced(name))?;
                if let Some(device) = self.registry.get_device(&endpoint) {
                    if device.is_local() {
                        return Ok(());
                    }
                    return device.apply_bye(sequence);
                }
                if let Some(service) = self.registry.get_service(&endpoint) {
                    return service.apply_bye(sequence);
                }
                log::debug!("[framework] Bye for unknown endpoint {} ignored", endpoint);
                Ok(())
            }
            other => Err(Error::IllegalState(format!(
                "{} is not an announcement",
                other.name()
            ))),
        }
    }

    fn unsequenced(name: &str) -> Error {
        Error::MalformedResponse(format!("{} without AppSequence", name))
    }

    fn is_local(&self, endpoint: &EndpointIdentity) -> bool {
        self.registry
            .get_device(endpoint)
            .is_some_and(|d| d.is_local())
    }

    // ========================================================================
    // References
    // ========================================================================

    /// Device reference for `endpoint` (created if unknown).
    pub fn device(&self, endpoint: &EndpointIdentity) -> Arc<DeviceReference> {
        self.registry.get_or_create_device(endpoint)
    }

    /// Service reference for `endpoint` (created if unknown).
    pub fn service(&self, endpoint: &EndpointIdentity) -> Arc<ServiceReference> {
        self.registry.get_or_create_service(endpoint)
    }

    pub fn registry(&self) -> &Arc<ReferenceRegistry> {
        &self.registry
    }

    // ========================================================================
    // Local devices
    // ========================================================================

    pub fn register_local_device(
        &self,
        metadata: DiscoveryMetadata,
        description: DeviceDescription,
    ) -> Result<Arc<DeviceReference>> {
        self.registry.register_local_device(metadata, description)
    }

    /// Mark a local device RUNNING and multicast its Hello.
    pub fn announce_hello(&self, device: &DeviceReference) -> Result<()> {
        crate::trace_fn!("Framework::announce_hello");
        device.set_local_running()?;
        let message = Message::new(MessageBody::Hello(device.metadata())).with_sequence(self.next_sequence());
        log::info!("[framework] Hello for local device {}", device.endpoint());
        self.dispatcher.send_multicast(message, None)
    }

    /// Mark a local device STOPPED and multicast its Bye.
    pub fn announce_bye(&self, device: &DeviceReference) -> Result<()> {
        crate::trace_fn!("Framework::announce_bye");
        device.set_local_stopped()?;
        let message = Message::new(MessageBody::Bye(device.endpoint().clone()))
            .with_sequence(self.next_sequence());
        log::info!("[framework] Bye for local device {}", device.endpoint());
        self.dispatcher.send_multicast(message, None)
    }

    fn next_sequence(&self) -> AppSequence {
        let number = self.message_number.fetch_add(1, Ordering::Relaxed) + 1;
        AppSequence::new(self.instance_id, number)
    }

    // ========================================================================
    // Configuration / introspection
    // ========================================================================

    /// Current configuration snapshot.
    pub fn config(&self) -> Arc<FrameworkConfig> {
        self.config.load_full()
    }

    /// Swap in a new configuration.
    ///
    /// Wait budgets, TTL, watchdog interval, sequence policing, fan-out
    /// versions and the LRU capacity apply immediately. Worker count and
    /// duplicate filter capacity are fixed at build time.
    pub fn reconfigure(&self, config: FrameworkConfig) -> Result<()> {
        config.validate()?;
        if !self.dispatcher.has_transport(&config.default_comm_manager) {
            return Err(Error::Config(format!(
                "default communication manager '{}' is not registered",
                config.default_comm_manager
            )));
        }
        let current = self.config.load();
        if config.worker_threads != current.worker_threads
            || config.duplicate_filter_capacity != current.duplicate_filter_capacity
        {
            log::warn!("[framework] worker_threads / duplicate_filter_capacity changes need a restart");
        }

        self.sequences.set_enabled(config.police_sequences);
        let cache = config.unattached_service_cache;
        self.config.store(Arc::new(config));
        self.registry.resize_unattached(cache);
        log::info!("[framework] configuration updated");
        Ok(())
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Registered communication manager ids.
    pub fn comm_manager_ids(&self) -> Vec<String> {
        self.comm_managers.ids()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Drain multicast sends, stop the watchdog and the worker pool.
    ///
    /// Idempotent. Also runs on drop.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let drain = self.config.load().shutdown_drain;
        self.dispatcher.drain(drain);
        if let Some(watchdog) = self.watchdog.lock().take() {
            watchdog.stop();
        }
        self.pool.shutdown();
        log::info!("[framework] shut down");
    }
}

impl Drop for Framework {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Framework {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Framework")
            .field("instance_id", &self.instance_id)
            .field("registry", &self.registry)
            .field("dispatcher", &self.dispatcher)
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}
