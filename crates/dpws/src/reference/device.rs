// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Device references.
//!
//! A device proxy is built from a Get response. Building it attaches the
//! hosted services it lists; dropping it (CHANGED, eviction) detaches them
//! back into the registry's unattached-service cache.

use super::lifecycle::{Reference, ReferenceKind};
use super::listener::{deliver_device, DeviceListener};
use super::proxy::ProxyDevice;
use super::service::ServiceReference;
use super::state::Notification;
use crate::error::{Error, Result};
use crate::transport::{Message, MessageBody};
use crate::types::{EndpointIdentity, TransportCandidate};
use std::sync::Arc;

/// Marker for device references.
#[derive(Debug)]
pub struct DeviceKind;

#[derive(Debug, Default)]
pub struct DeviceExtra {
    hosted: Vec<Arc<ServiceReference>>,
}

impl ReferenceKind for DeviceKind {
    type Proxy = ProxyDevice;
    type Listener = dyn DeviceListener;
    type Extra = DeviceExtra;
    type Detached = Vec<Arc<ServiceReference>>;

    const LABEL: &'static str = "device";

    fn build_request() -> MessageBody {
        MessageBody::Get
    }

    fn build_proxy(
        endpoint: &EndpointIdentity,
        metadata_version: u64,
        _extra: &mut DeviceExtra,
        reply: Message,
        source: &TransportCandidate,
    ) -> Result<ProxyDevice> {
        match reply.body {
            MessageBody::GetResponse(description) => Ok(ProxyDevice::new(
                endpoint.clone(),
                metadata_version,
                description,
                Some(source.clone()),
            )),
            other => Err(Error::MalformedResponse(format!(
                "expected GetResponse, got {}",
                other.name()
            ))),
        }
    }

    fn deliver(listener: &Self::Listener, n: Notification, reference: &DeviceReference) {
        deliver_device(listener, n, reference);
    }

    fn detach(extra: &mut DeviceExtra) -> Vec<Arc<ServiceReference>> {
        std::mem::take(&mut extra.hosted)
    }

    fn after_build(reference: &DeviceReference, proxy: &Arc<ProxyDevice>) {
        reference.attach_hosted(proxy);
    }

    fn after_invalidate(reference: &DeviceReference, detached: Vec<Arc<ServiceReference>>) {
        if detached.is_empty() {
            return;
        }
        let Some(registry) = reference.registry.upgrade() else {
            return;
        };
        log::debug!(
            "[device-ref] {}: detaching {} hosted services",
            reference.endpoint(),
            detached.len()
        );
        for service in &detached {
            registry.detach_hosted(service);
        }
    }
}

/// Reference to a (remote or local) DPWS device.
pub type DeviceReference = Reference<DeviceKind>;

impl Reference<DeviceKind> {
    /// Services hosted by the current proxy. Empty until the proxy is built.
    pub fn hosted_services(&self) -> Vec<Arc<ServiceReference>> {
        self.inner.lock().extra.hosted.clone()
    }

    /// Hosted service with the given service id.
    pub fn hosted_service(&self, service_id: &str) -> Option<Arc<ServiceReference>> {
        self.hosted_services()
            .into_iter()
            .find(|s| s.service_id().as_deref() == Some(service_id))
    }

    fn attach_hosted(&self, proxy: &Arc<ProxyDevice>) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let services: Vec<_> = proxy
            .hosted()
            .iter()
            .map(|info| registry.attach_hosted(self.endpoint(), info))
            .collect();

        let stale = {
            let mut inner = self.inner.lock();
            let current = inner.proxy.as_ref().is_some_and(|p| Arc::ptr_eq(p, proxy));
            if current {
                let previous = std::mem::replace(&mut inner.extra.hosted, services);
                previous
                    .into_iter()
                    .filter(|old| !inner.extra.hosted.iter().any(|s| Arc::ptr_eq(s, old)))
                    .collect()
            } else {
                // Invalidated while attaching.
                services
            }
        };
        for service in &stale {
            registry.detach_hosted(service);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DeviceDescription, HostedServiceInfo, ProtocolVersion, TransportAddress};

    fn candidate() -> TransportCandidate {
        let address: TransportAddress = "10.0.0.5:5357/dev".parse().unwrap();
        TransportCandidate::new(address)
    }

    #[test]
    fn test_build_proxy_from_get_response() {
        let description = DeviceDescription::default()
            .with_friendly_name("Printer")
            .with_hosted(HostedServiceInfo::new("print", EndpointIdentity::new("urn:uuid:svc")));
        let request = Message::new(MessageBody::Get);
        let reply = Message::reply_to(&request, MessageBody::GetResponse(description))
            .with_version(ProtocolVersion::Dpws2009);
        let source = candidate().with_version(ProtocolVersion::Dpws2009);

        let proxy = DeviceKind::build_proxy(
            &EndpointIdentity::new("urn:uuid:dev"),
            4,
            &mut DeviceExtra::default(),
            reply,
            &source,
        )
        .unwrap();
        assert_eq!(proxy.friendly_name(), "Printer");
        assert_eq!(proxy.metadata_version, 4);
        assert_eq!(proxy.hosted().len(), 1);
        assert_eq!(proxy.version(), Some(ProtocolVersion::Dpws2009));
    }

    #[test]
    fn test_wrong_reply_is_malformed() {
        let request = Message::new(MessageBody::Get);
        let reply = Message::reply_to(&request, MessageBody::GetMetadata);
        let err = DeviceKind::build_proxy(
            &EndpointIdentity::new("urn:uuid:dev"),
            0,
            &mut DeviceExtra::default(),
            reply,
            &candidate(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::MalformedResponse(_)));
    }
}
