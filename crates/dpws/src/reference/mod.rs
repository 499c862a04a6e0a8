// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Device and service references.
//!
//! A reference is the long-lived local handle for one remote endpoint. It
//! tracks discovery state, caches the proxy built from the endpoint's
//! metadata and notifies listeners on state changes.
//!
//! # Lock Order
//!
//! Registry locks may be held while a reference lock is taken, never the
//! reverse. Synchronizers and listeners are driven with no reference lock
//! held.

mod device;
mod failover;
mod lifecycle;
mod listener;
mod proxy;
mod service;
mod state;

pub use device::{DeviceExtra, DeviceKind, DeviceReference};
pub use failover::{AddressFailoverPolicy, FailoverStep};
pub use lifecycle::{Reference, ReferenceKind};
pub use listener::{DeviceListener, ServiceListener};
pub use proxy::{ProxyDevice, ProxyService};
pub use service::{ServiceExtra, ServiceKind, ServiceReference};
pub use state::{transition, Notification, ReferenceEvent, ReferenceState, Transition};

use crate::config::SharedConfig;
use crate::discovery::SequenceTracker;
use crate::runtime::{FrameworkStats, WorkerPool};
use crate::transport::Dispatcher;
use std::sync::Arc;

/// Shared services every reference needs.
#[derive(Debug)]
pub struct ReferenceContext {
    pub config: SharedConfig,
    pub pool: Arc<WorkerPool>,
    pub dispatcher: Arc<Dispatcher>,
    pub sequences: Arc<SequenceTracker>,
    pub stats: Arc<FrameworkStats>,
}
