// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Decoded Get / GetMetadata payloads.
//!
//! The serialization layer hands these over already parsed; the core only
//! reads the fields needed to build proxies and attach hosted services.

use super::candidate::{TransportAddress, TransportCandidate};
use super::identity::EndpointIdentity;
use super::metadata::QName;
use std::collections::BTreeSet;

/// One `dpws:Hosted` section of a device's relationship metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostedServiceInfo {
    /// `dpws:ServiceId`, unique within the device.
    pub service_id: String,
    pub endpoint: EndpointIdentity,
    pub types: BTreeSet<QName>,
    /// Endpoint reference addresses. Empty when the EPR is not a
    /// transport address and must be resolved first.
    pub candidates: Vec<TransportCandidate>,
}

impl HostedServiceInfo {
    pub fn new(service_id: impl Into<String>, endpoint: EndpointIdentity) -> Self {
        Self {
            service_id: service_id.into(),
            endpoint,
            types: BTreeSet::new(),
            candidates: Vec::new(),
        }
    }

    /// Builder: add a port type.
    pub fn with_type(mut self, qname: QName) -> Self {
        self.types.insert(qname);
        self
    }

    /// Builder: add an address.
    pub fn with_candidate(mut self, candidate: TransportCandidate) -> Self {
        self.candidates.push(candidate);
        self
    }
}

/// Get response payload (ThisModel, ThisDevice, Relationship).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceDescription {
    pub manufacturer: String,
    pub model_name: String,
    pub friendly_name: String,
    pub firmware_version: String,
    pub serial_number: String,
    pub hosted: Vec<HostedServiceInfo>,
}

impl DeviceDescription {
    /// Builder: set friendly name.
    pub fn with_friendly_name(mut self, name: impl Into<String>) -> Self {
        self.friendly_name = name.into();
        self
    }

    /// Builder: add a hosted service.
    pub fn with_hosted(mut self, hosted: HostedServiceInfo) -> Self {
        self.hosted.push(hosted);
        self
    }
}

/// GetMetadata response payload of a hosted service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescription {
    pub service_id: String,
    pub types: BTreeSet<QName>,
    /// Endpoint addresses the service answered with.
    pub candidates: Vec<TransportCandidate>,
    /// WSDL locations referenced by the metadata (not fetched by the core).
    pub metadata_locations: Vec<TransportAddress>,
    /// Host device, when the service announced one.
    pub host: Option<EndpointIdentity>,
}

impl ServiceDescription {
    pub fn new(service_id: impl Into<String>) -> Self {
        Self {
            service_id: service_id.into(),
            types: BTreeSet::new(),
            candidates: Vec::new(),
            metadata_locations: Vec::new(),
            host: None,
        }
    }

    /// Builder: add a port type.
    pub fn with_type(mut self, qname: QName) -> Self {
        self.types.insert(qname);
        self
    }

    /// Builder: set the host device.
    pub fn with_host(mut self, host: EndpointIdentity) -> Self {
        self.host = Some(host);
        self
    }

    /// Builder: add a metadata location.
    pub fn with_metadata_location(mut self, location: TransportAddress) -> Self {
        self.metadata_locations.push(location);
        self
    }
}
