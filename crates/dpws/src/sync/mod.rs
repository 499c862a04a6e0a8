// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Request correlation handles.

mod synchronizer;

pub use synchronizer::{Synchronizer, WaitOutcome};

use crate::reference::{ProxyDevice, ProxyService};
use crate::types::{DiscoveryMetadata, TransportCandidate};
use std::sync::Arc;

/// Pending Get exchange of a device reference.
pub type DeviceSynchronizer = Synchronizer<Arc<ProxyDevice>>;
/// Pending GetMetadata exchange of a service reference.
pub type ServiceSynchronizer = Synchronizer<Arc<ProxyService>>;
/// Pending Resolve exchange.
pub type AddressSynchronizer = Synchronizer<TransportCandidate>;
/// Pending directed Probe.
pub type ProbeSynchronizer = Synchronizer<DiscoveryMetadata>;
