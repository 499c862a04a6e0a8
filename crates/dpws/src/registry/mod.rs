// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Registry of device and service references.
//!
//! # Architecture
//! ```text
//! devices:    endpoint -> DeviceReference   (RwLock<HashMap>)
//! services:   endpoint -> ServiceReference  (RwLock<HashMap>)
//! unattached: LRU of services without a parent device
//!
//! attach (device proxy built):    unattached -> device.hosted
//! detach (device proxy dropped):  device.hosted -> unattached
//! LRU overflow:                   least recently used service evicted
//! watchdog sweep:                 expire stuck exchanges, drop idle entries
//! ```
//!
//! Registry locks are never taken while a reference lock is held.

mod watchdog;

pub use watchdog::RegistryWatchdog;

use crate::error::{Error, Result};
use crate::reference::{
    DeviceReference, ProxyDevice, Reference, ReferenceContext, ReferenceKind, ServiceReference,
};
use crate::runtime::FrameworkStats;
use crate::types::{DeviceDescription, DiscoveryMetadata, EndpointIdentity, HostedServiceInfo};
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Weak};
use std::time::Duration;

fn lru_capacity(capacity: usize) -> NonZeroUsize {
    NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)
}

/// Owner of every reference known to the framework.
pub struct ReferenceRegistry {
    ctx: Arc<ReferenceContext>,
    me: Weak<ReferenceRegistry>,
    devices: RwLock<HashMap<EndpointIdentity, Arc<DeviceReference>>>,
    services: RwLock<HashMap<EndpointIdentity, Arc<ServiceReference>>>,
    unattached: Mutex<LruCache<EndpointIdentity, Arc<ServiceReference>>>,
}

impl ReferenceRegistry {
    pub fn new(ctx: Arc<ReferenceContext>) -> Arc<Self> {
        let capacity = lru_capacity(ctx.config.load().unattached_service_cache);
        Arc::new_cyclic(|me| Self {
            ctx,
            me: me.clone(),
            devices: RwLock::new(HashMap::new()),
            services: RwLock::new(HashMap::new()),
            unattached: Mutex::new(LruCache::new(capacity)),
        })
    }

    pub fn context(&self) -> &Arc<ReferenceContext> {
        &self.ctx
    }

    // ========================================================================
    // Lookup / creation
    // ========================================================================

    pub fn get_device(&self, endpoint: &EndpointIdentity) -> Option<Arc<DeviceReference>> {
        self.devices.read().get(endpoint).cloned()
    }

    pub fn get_service(&self, endpoint: &EndpointIdentity) -> Option<Arc<ServiceReference>> {
        self.services.read().get(endpoint).cloned()
    }

    /// Device reference for `endpoint`, created in UNKNOWN state if absent.
    pub fn get_or_create_device(&self, endpoint: &EndpointIdentity) -> Arc<DeviceReference> {
        crate::trace_fn!("ReferenceRegistry::get_or_create_device");
        if let Some(device) = self.get_device(endpoint) {
            return device;
        }
        let mut devices = self.devices.write();
        let device = devices.entry(endpoint.clone()).or_insert_with(|| {
            log::debug!("[registry] new device reference {}", endpoint);
            self.ctx.sequences.seed(endpoint);
            Reference::new_remote(Arc::clone(&self.ctx), self.me.clone(), endpoint.clone())
        });
        Arc::clone(device)
    }

    /// Service reference for `endpoint`, created unattached if absent.
    ///
    /// A new unattached service may push the least recently used one out.
    pub fn get_or_create_service(&self, endpoint: &EndpointIdentity) -> Arc<ServiceReference> {
        crate::trace_fn!("ReferenceRegistry::get_or_create_service");
        let (service, created) = self.service_entry(endpoint);
        if created {
            self.track_unattached(&service);
        } else {
            self.touch_unattached(endpoint);
        }
        service
    }

    fn service_entry(&self, endpoint: &EndpointIdentity) -> (Arc<ServiceReference>, bool) {
        if let Some(service) = self.get_service(endpoint) {
            return (service, false);
        }
        let mut services = self.services.write();
        if let Some(service) = services.get(endpoint) {
            return (Arc::clone(service), false);
        }
        log::debug!("[registry] new service reference {}", endpoint);
        self.ctx.sequences.seed(endpoint);
        let service: Arc<ServiceReference> =
            Reference::new_remote(Arc::clone(&self.ctx), self.me.clone(), endpoint.clone());
        services.insert(endpoint.clone(), Arc::clone(&service));
        (service, true)
    }

    /// Register a device owned by this process.
    pub fn register_local_device(
        &self,
        metadata: DiscoveryMetadata,
        description: DeviceDescription,
    ) -> Result<Arc<DeviceReference>> {
        let endpoint = metadata.endpoint.clone();
        let mut devices = self.devices.write();
        if devices.contains_key(&endpoint) {
            return Err(Error::IllegalState(format!(
                "device {} already registered",
                endpoint
            )));
        }
        let proxy = ProxyDevice::new(endpoint.clone(), metadata.metadata_version, description, None);
        let device = Reference::new_local(Arc::clone(&self.ctx), self.me.clone(), metadata, proxy);
        devices.insert(endpoint.clone(), Arc::clone(&device));
        log::info!("[registry] local device {} registered", endpoint);
        Ok(device)
    }

    pub fn devices(&self) -> Vec<Arc<DeviceReference>> {
        self.devices.read().values().cloned().collect()
    }

    pub fn services(&self) -> Vec<Arc<ServiceReference>> {
        self.services.read().values().cloned().collect()
    }

    pub fn local_devices(&self) -> Vec<Arc<DeviceReference>> {
        self.devices
            .read()
            .values()
            .filter(|d| d.is_local())
            .cloned()
            .collect()
    }

    pub fn device_count(&self) -> usize {
        self.devices.read().len()
    }

    pub fn service_count(&self) -> usize {
        self.services.read().len()
    }

    // ========================================================================
    // Unattached services
    // ========================================================================

    /// Mark an unattached service as recently used. No-op for attached ones.
    pub fn touch_unattached(&self, endpoint: &EndpointIdentity) {
        self.unattached.lock().get(endpoint);
    }

    pub fn unattached_len(&self) -> usize {
        self.unattached.lock().len()
    }

    /// Unattached endpoints, most recently used first.
    pub fn unattached_endpoints(&self) -> Vec<EndpointIdentity> {
        self.unattached.lock().iter().map(|(k, _)| k.clone()).collect()
    }

    /// Change the LRU capacity, evicting overflow.
    pub fn resize_unattached(&self, capacity: usize) {
        let capacity = lru_capacity(capacity);
        let victims = {
            let mut lru = self.unattached.lock();
            let mut victims = Vec::new();
            while lru.len() > capacity.get() {
                match lru.pop_lru() {
                    Some((_, victim)) => victims.push(victim),
                    None => break,
                }
            }
            lru.resize(capacity);
            victims
        };
        for victim in victims {
            self.evict_service(&victim);
        }
    }

    /// Take the service listed by a device's Get response out of the LRU.
    pub(crate) fn attach_hosted(
        &self,
        device: &EndpointIdentity,
        info: &HostedServiceInfo,
    ) -> Arc<ServiceReference> {
        // Attached under the map lock so a concurrent eviction sees the
        // parent link before deciding.
        let mut services = self.services.write();
        let service = match services.get(&info.endpoint) {
            Some(service) => Arc::clone(service),
            None => {
                log::debug!("[registry] new hosted service reference {}", info.endpoint);
                self.ctx.sequences.seed(&info.endpoint);
                let service: Arc<ServiceReference> = Reference::new_remote(
                    Arc::clone(&self.ctx),
                    self.me.clone(),
                    info.endpoint.clone(),
                );
                services.insert(info.endpoint.clone(), Arc::clone(&service));
                service
            }
        };
        self.unattached.lock().pop(&info.endpoint);
        service.attach_to(device, info);
        service
    }

    /// Park a service whose device dropped its proxy.
    pub(crate) fn detach_hosted(&self, service: &Arc<ServiceReference>) {
        service.detach_from_parent();
        if self.services.read().contains_key(service.endpoint()) {
            self.track_unattached(service);
        }
    }

    fn track_unattached(&self, service: &Arc<ServiceReference>) {
        let evicted = {
            let mut lru = self.unattached.lock();
            match lru.push(service.endpoint().clone(), Arc::clone(service)) {
                Some((key, victim)) if &key != service.endpoint() => Some(victim),
                _ => None,
            }
        };
        if let Some(victim) = evicted {
            self.evict_service(&victim);
        }
    }

    /// Drop a service popped from the LRU, unless it was attached or
    /// re-listed since.
    fn evict_service(&self, victim: &Arc<ServiceReference>) {
        let endpoint = victim.endpoint();
        {
            let mut services = self.services.write();
            let mapped = services
                .get(endpoint)
                .is_some_and(|current| Arc::ptr_eq(current, victim));
            if !mapped || victim.is_attached() || self.unattached.lock().contains(endpoint) {
                log::debug!("[registry] eviction of {} skipped, service in use", endpoint);
                return;
            }
            services.remove(endpoint);
        }
        self.ctx.sequences.forget(endpoint);
        victim.invalidate();
        FrameworkStats::bump(&self.ctx.stats.references_evicted);
        log::debug!("[registry] unattached service {} evicted", victim.endpoint());
    }

    // ========================================================================
    // Expiry
    // ========================================================================

    fn is_expired<K: ReferenceKind>(reference: &Reference<K>, ttl: Duration) -> bool {
        !reference.is_local()
            && reference.listener_count() == 0
            && reference.idle_time() >= ttl
            && !reference.has_pending_exchanges()
    }

    /// Drop a device whose TTL expired and nobody listens to.
    ///
    /// Returns false if the device is unknown, local, observed or in use.
    pub fn unregister_device(&self, endpoint: &EndpointIdentity) -> bool {
        let ttl = self.ctx.config.load().reference_ttl;
        let removed = {
            let mut devices = self.devices.write();
            match devices.get(endpoint) {
                Some(device) if Self::is_expired(device.as_ref(), ttl) => devices.remove(endpoint),
                _ => None,
            }
        };
        let Some(device) = removed else {
            return false;
        };
        self.ctx.sequences.forget(endpoint);
        device.invalidate();
        log::debug!("[registry] device {} unregistered", endpoint);
        true
    }

    /// Drop an unattached service whose TTL expired and nobody listens to.
    pub fn unregister_service(&self, endpoint: &EndpointIdentity) -> bool {
        let ttl = self.ctx.config.load().reference_ttl;
        let removed = {
            let mut services = self.services.write();
            match services.get(endpoint) {
                Some(service) if !service.is_attached() && Self::is_expired(service.as_ref(), ttl) => {
                    services.remove(endpoint)
                }
                _ => None,
            }
        };
        let Some(service) = removed else {
            return false;
        };
        self.unattached.lock().pop(endpoint);
        self.ctx.sequences.forget(endpoint);
        service.invalidate();
        log::debug!("[registry] service {} unregistered", endpoint);
        true
    }

    /// Expire stuck exchanges and unregister idle references.
    ///
    /// Returns the number of references removed.
    pub fn sweep(&self) -> usize {
        crate::trace_fn!("ReferenceRegistry::sweep");
        let ceiling = self.ctx.config.load().wait_ceiling();
        let devices = self.devices();
        let services = self.services();

        let expired: usize = devices
            .iter()
            .map(|d| d.expire_stale_exchanges(ceiling))
            .chain(services.iter().map(|s| s.expire_stale_exchanges(ceiling)))
            .sum();

        let removed = devices
            .iter()
            .filter(|d| self.unregister_device(d.endpoint()))
            .count()
            + services
                .iter()
                .filter(|s| self.unregister_service(s.endpoint()))
                .count();

        if expired > 0 || removed > 0 {
            log::debug!(
                "[registry] sweep: {} exchanges expired, {} references removed",
                expired,
                removed
            );
        }
        removed
    }
}

impl std::fmt::Debug for ReferenceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceRegistry")
            .field("devices", &self.device_count())
            .field("services", &self.service_count())
            .field("unattached", &self.unattached_len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{share, FrameworkConfig};
    use crate::discovery::{DuplicateMessageFilter, SequenceTracker};
    use crate::reference::{ReferenceState, ServiceListener};
    use crate::runtime::WorkerPool;
    use crate::transport::Dispatcher;
    use crate::types::AppSequence;

    fn registry(config: FrameworkConfig) -> Arc<ReferenceRegistry> {
        let config = share(config);
        let pool = Arc::new(WorkerPool::new(2));
        let stats = Arc::new(FrameworkStats::new());
        let dispatcher = Arc::new(Dispatcher::new(
            HashMap::new(),
            Arc::clone(&config),
            Arc::clone(&pool),
            Arc::new(DuplicateMessageFilter::new(16)),
            None,
            Arc::clone(&stats),
        ));
        ReferenceRegistry::new(Arc::new(ReferenceContext {
            config,
            pool,
            dispatcher,
            sequences: Arc::new(SequenceTracker::new(true)),
            stats,
        }))
    }

    fn ep(name: &str) -> EndpointIdentity {
        EndpointIdentity::new(format!("urn:uuid:{}", name))
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let registry = registry(FrameworkConfig::default());
        let a = registry.get_or_create_device(&ep("dev"));
        let b = registry.get_or_create_device(&ep("dev"));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.state(), ReferenceState::Unknown);
        assert_eq!(registry.device_count(), 1);
    }

    #[test]
    fn test_lru_evicts_least_recently_touched() {
        let registry = registry(FrameworkConfig::default().with_unattached_service_cache(2));
        let a = registry.get_or_create_service(&ep("a"));
        let _b = registry.get_or_create_service(&ep("b"));
        registry.touch_unattached(&ep("a"));
        let _c = registry.get_or_create_service(&ep("c"));

        assert!(registry.get_service(&ep("b")).is_none());
        assert!(registry.get_service(&ep("a")).is_some());
        assert!(registry.get_service(&ep("c")).is_some());
        assert_eq!(registry.unattached_len(), 2);
        assert_eq!(registry.context().stats.snapshot().references_evicted, 1);
        assert!(Arc::ptr_eq(&a, &registry.get_or_create_service(&ep("a"))));
    }

    #[test]
    fn test_eviction_skips_service_attached_meanwhile() {
        let registry = registry(FrameworkConfig::default().with_unattached_service_cache(1));
        let service = registry.get_or_create_service(&ep("svc"));

        // Popped for eviction, then claimed by its device before removal.
        let popped = registry.unattached.lock().pop_lru();
        assert!(popped.is_some());
        let attached = registry.attach_hosted(&ep("dev"), &HostedServiceInfo::new("svc", ep("svc")));
        assert!(Arc::ptr_eq(&service, &attached));
        registry.evict_service(&service);

        assert!(service.is_attached());
        let again = registry.get_or_create_service(&ep("svc"));
        assert!(Arc::ptr_eq(&service, &again));
        assert_eq!(registry.service_count(), 1);
        assert_eq!(registry.unattached_len(), 0);
        assert_eq!(registry.context().stats.snapshot().references_evicted, 0);
    }

    #[test]
    fn test_eviction_skips_replaced_entry() {
        let registry = registry(FrameworkConfig::default().with_reference_ttl(Duration::ZERO));
        let stale = registry.get_or_create_service(&ep("svc"));
        assert!(registry.unregister_service(&ep("svc")));
        let fresh = registry.get_or_create_service(&ep("svc"));

        registry.evict_service(&stale);
        assert!(Arc::ptr_eq(&fresh, &registry.get_service(&ep("svc")).unwrap()));
        assert_eq!(registry.unattached_endpoints(), vec![ep("svc")]);
    }

    #[test]
    fn test_resize_evicts_overflow() {
        let registry = registry(FrameworkConfig::default());
        for name in ["a", "b", "c"] {
            registry.get_or_create_service(&ep(name));
        }
        registry.resize_unattached(1);
        assert_eq!(registry.unattached_len(), 1);
        assert_eq!(registry.unattached_endpoints(), vec![ep("c")]);
        assert_eq!(registry.service_count(), 1);
    }

    #[test]
    fn test_unregister_waits_for_ttl() {
        let registry = registry(FrameworkConfig::default().with_reference_ttl(Duration::from_secs(60)));
        registry.get_or_create_device(&ep("dev"));
        assert!(!registry.unregister_device(&ep("dev")));
        assert_eq!(registry.device_count(), 1);
    }

    #[test]
    fn test_unregister_skips_observed_reference() {
        struct Quiet;
        impl ServiceListener for Quiet {}

        let registry = registry(FrameworkConfig::default().with_reference_ttl(Duration::ZERO));
        let service = registry.get_or_create_service(&ep("svc"));
        let listener: Arc<dyn ServiceListener> = Arc::new(Quiet);
        service.add_listener(Arc::clone(&listener));
        assert!(!registry.unregister_service(&ep("svc")));

        service.remove_listener(&listener);
        assert!(registry.unregister_service(&ep("svc")));
        assert_eq!(registry.unattached_len(), 0);
        assert!(registry.get_service(&ep("svc")).is_none());
    }

    #[test]
    fn test_unregister_forgets_sequence() {
        let registry = registry(FrameworkConfig::default().with_reference_ttl(Duration::ZERO));
        let device = registry.get_or_create_device(&ep("dev"));
        device
            .apply_announcement(AppSequence::new(1, 1), DiscoveryMetadata::new(ep("dev"), 1), None)
            .unwrap();
        assert!(registry.unregister_device(&ep("dev")));
        assert!(registry.context().sequences.last_seen(&ep("dev")).is_none());
    }

    #[test]
    fn test_local_device_registered_once() {
        let registry = registry(FrameworkConfig::default().with_reference_ttl(Duration::ZERO));
        let metadata = DiscoveryMetadata::new(ep("local"), 1);
        let device = registry
            .register_local_device(metadata.clone(), DeviceDescription::default())
            .unwrap();
        assert!(device.is_local());
        assert_eq!(device.state(), ReferenceState::Stopped);
        assert!(registry
            .register_local_device(metadata, DeviceDescription::default())
            .is_err());
        assert!(!registry.unregister_device(&ep("local")));
        assert_eq!(registry.local_devices().len(), 1);
    }

    #[test]
    fn test_sweep_keeps_fresh_references() {
        let registry = registry(FrameworkConfig::default());
        registry.get_or_create_device(&ep("dev"));
        registry.get_or_create_service(&ep("svc"));
        assert_eq!(registry.sweep(), 0);
        assert_eq!(registry.device_count(), 1);
        assert_eq!(registry.service_count(), 1);
    }
}
