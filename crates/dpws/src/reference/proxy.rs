// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Proxy objects: local stand-ins for remote devices and services.
//!
//! A proxy is immutable. When the remote metadata changes the owning
//! reference drops its proxy and builds a new one.

use crate::types::{
    DeviceDescription, EndpointIdentity, HostedServiceInfo, ProtocolVersion, QName,
    ServiceDescription, TransportAddress, TransportCandidate,
};
use std::collections::BTreeSet;
use std::time::Instant;

/// Device built from a Get response (or registered locally).
#[derive(Debug, Clone)]
pub struct ProxyDevice {
    pub endpoint: EndpointIdentity,
    /// Metadata version the proxy was built against.
    pub metadata_version: u64,
    pub description: DeviceDescription,
    /// Address the Get response came from, `None` for local devices.
    pub source: Option<TransportCandidate>,
    pub built_at: Instant,
}

impl ProxyDevice {
    pub fn new(
        endpoint: EndpointIdentity,
        metadata_version: u64,
        description: DeviceDescription,
        source: Option<TransportCandidate>,
    ) -> Self {
        Self {
            endpoint,
            metadata_version,
            description,
            source,
            built_at: Instant::now(),
        }
    }

    pub fn friendly_name(&self) -> &str {
        &self.description.friendly_name
    }

    pub fn hosted(&self) -> &[HostedServiceInfo] {
        &self.description.hosted
    }

    /// Protocol version the device answered with.
    pub fn version(&self) -> Option<ProtocolVersion> {
        self.source.as_ref().and_then(|c| c.version)
    }
}

/// Service built from a GetMetadata response.
#[derive(Debug, Clone)]
pub struct ProxyService {
    pub endpoint: EndpointIdentity,
    pub service_id: String,
    pub types: BTreeSet<QName>,
    pub candidates: Vec<TransportCandidate>,
    pub metadata_locations: Vec<TransportAddress>,
    pub host: Option<EndpointIdentity>,
    pub source: TransportCandidate,
    pub built_at: Instant,
}

impl ProxyService {
    pub fn new(endpoint: EndpointIdentity, description: ServiceDescription, source: TransportCandidate) -> Self {
        Self {
            endpoint,
            service_id: description.service_id,
            types: description.types,
            candidates: description.candidates,
            metadata_locations: description.metadata_locations,
            host: description.host,
            source,
            built_at: Instant::now(),
        }
    }

    /// Implements every port type in `types`.
    pub fn implements(&self, types: &BTreeSet<QName>) -> bool {
        types.is_subset(&self.types)
    }
}
