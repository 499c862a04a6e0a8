// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Data model shared by every layer.

mod candidate;
mod description;
mod identity;
mod metadata;
mod sequence;

pub use candidate::{
    AddressParseError, ProtocolVersion, TransportAddress, TransportCandidate,
    DPWS_COMM_MANAGER_ID,
};
pub use description::{DeviceDescription, HostedServiceInfo, ServiceDescription};
pub use identity::{EndpointIdentity, MessageId};
pub use metadata::{DiscoveryMetadata, QName, DPWS_NAMESPACE};
pub use sequence::AppSequence;
