// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service references.
//!
//! A service is either attached to the device that hosts it or parked in
//! the registry's LRU of unattached services. Its proxy is built from a
//! GetMetadata response.

use super::lifecycle::{Reference, ReferenceKind};
use super::listener::{deliver_service, ServiceListener};
use super::proxy::ProxyService;
use super::state::Notification;
use crate::error::{Error, Result};
use crate::transport::{Message, MessageBody};
use crate::types::{EndpointIdentity, HostedServiceInfo, TransportAddress, TransportCandidate};

/// Marker for service references.
#[derive(Debug)]
pub struct ServiceKind;

#[derive(Debug, Default)]
pub struct ServiceExtra {
    service_id: Option<String>,
    parent: Option<EndpointIdentity>,
    metadata_locations: Vec<TransportAddress>,
    /// Endpoint references still waiting for a Resolve.
    unresolved: Vec<EndpointIdentity>,
}

impl ReferenceKind for ServiceKind {
    type Proxy = ProxyService;
    type Listener = dyn ServiceListener;
    type Extra = ServiceExtra;
    type Detached = ();

    const LABEL: &'static str = "service";

    fn build_request() -> MessageBody {
        MessageBody::GetMetadata
    }

    fn build_proxy(
        endpoint: &EndpointIdentity,
        _metadata_version: u64,
        extra: &mut ServiceExtra,
        reply: Message,
        source: &TransportCandidate,
    ) -> Result<ProxyService> {
        let description = match reply.body {
            MessageBody::GetMetadataResponse(description) => description,
            other => {
                return Err(Error::MalformedResponse(format!(
                    "expected GetMetadataResponse, got {}",
                    other.name()
                )))
            }
        };
        extra.service_id = Some(description.service_id.clone());
        extra.metadata_locations = description.metadata_locations.clone();
        Ok(ProxyService::new(endpoint.clone(), description, source.clone()))
    }

    fn deliver(listener: &Self::Listener, n: Notification, reference: &ServiceReference) {
        deliver_service(listener, n, reference);
    }

    fn on_resolved(extra: &mut ServiceExtra) {
        extra.unresolved.clear();
    }

    fn detach(_extra: &mut ServiceExtra) {}

    fn touched(reference: &ServiceReference) {
        if let Some(registry) = reference.registry.upgrade() {
            registry.touch_unattached(reference.endpoint());
        }
    }
}

/// Reference to a (remote) DPWS hosted service.
pub type ServiceReference = Reference<ServiceKind>;

impl Reference<ServiceKind> {
    pub fn service_id(&self) -> Option<String> {
        self.inner.lock().extra.service_id.clone()
    }

    /// Hosting device, `None` while unattached.
    pub fn parent_device(&self) -> Option<EndpointIdentity> {
        self.inner.lock().extra.parent.clone()
    }

    pub fn is_attached(&self) -> bool {
        self.inner.lock().extra.parent.is_some()
    }

    /// Where metadata documents can be fetched from.
    pub fn metadata_locations(&self) -> Vec<TransportAddress> {
        self.inner.lock().extra.metadata_locations.clone()
    }

    /// Endpoint references known only by identity.
    pub fn unresolved_endpoints(&self) -> Vec<EndpointIdentity> {
        self.inner.lock().extra.unresolved.clone()
    }

    /// Bind to the hosting device using the entry from its Get response.
    pub(crate) fn attach_to(&self, device: &EndpointIdentity, info: &HostedServiceInfo) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        inner.extra.parent = Some(device.clone());
        inner.extra.service_id = Some(info.service_id.clone());
        inner.metadata.types.extend(info.types.iter().cloned());
        if info.candidates.is_empty() {
            if inner.failover.is_exhausted() && !inner.extra.unresolved.contains(self.endpoint()) {
                inner.extra.unresolved.push(self.endpoint().clone());
            }
        } else {
            inner.metadata.candidates = info.candidates.clone();
            let observed_from = inner.observed_from;
            inner.failover.reset(info.candidates.clone(), observed_from);
            inner.extra.unresolved.clear();
        }
        log::debug!("[service-ref] {}: attached to {}", self.endpoint(), device);
    }

    pub(crate) fn detach_from_parent(&self) {
        self.inner.lock().extra.parent = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{QName, ServiceDescription};
    use std::collections::BTreeSet;

    #[test]
    fn test_build_proxy_records_service_details() {
        let host = EndpointIdentity::new("urn:uuid:dev");
        let location: TransportAddress = "10.0.0.5:5357/meta".parse().unwrap();
        let description = ServiceDescription::new("print")
            .with_type(QName::new("urn:test", "Print"))
            .with_host(host.clone())
            .with_metadata_location(location.clone());
        let request = Message::new(MessageBody::GetMetadata);
        let reply = Message::reply_to(&request, MessageBody::GetMetadataResponse(description));
        let source = TransportCandidate::new("10.0.0.5:5357/svc".parse().unwrap());

        let mut extra = ServiceExtra::default();
        let proxy = ServiceKind::build_proxy(
            &EndpointIdentity::new("urn:uuid:svc"),
            0,
            &mut extra,
            reply,
            &source,
        )
        .unwrap();

        assert_eq!(proxy.service_id, "print");
        assert_eq!(proxy.host, Some(host));
        let wanted: BTreeSet<_> = [QName::new("urn:test", "Print")].into_iter().collect();
        assert!(proxy.implements(&wanted));
        assert_eq!(extra.parent, None);
        assert_eq!(extra.metadata_locations, vec![location]);
    }

    #[test]
    fn test_resolution_clears_unresolved() {
        let mut extra = ServiceExtra {
            unresolved: vec![EndpointIdentity::new("urn:uuid:svc")],
            ..ServiceExtra::default()
        };
        ServiceKind::on_resolved(&mut extra);
        assert!(extra.unresolved.is_empty());
    }
}
