// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # dpws - WS-Discovery / DPWS reference lifecycle core
//!
//! Tracks remote devices and hosted services discovered over WS-Discovery,
//! builds proxies for them on demand and keeps those proxies consistent with
//! the announcements the endpoints keep sending.
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                          Application                                |
//! |   DeviceReference / ServiceReference -> resolve_object(), listeners |
//! +---------------------------------------------------------------------+
//! |                          Reference layer                            |
//! |   state machine | failover policy | synchronizers | registry + LRU  |
//! +---------------------------------------------------------------------+
//! |                          Discovery filters                          |
//! |   duplicate message filter | AppSequence tracker                    |
//! +---------------------------------------------------------------------+
//! |                          Transport boundary                         |
//! |   Dispatcher -> version fan-out -> Transport (wire codec + sockets) |
//! +---------------------------------------------------------------------+
//! ```
//!
//! SOAP encoding and socket I/O live behind the [`transport::Transport`]
//! trait; this crate never touches the wire.
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Framework`] | Entry point: inbound announcements, local devices, shutdown |
//! | [`DeviceReference`] | Handle for one device, builds [`ProxyDevice`] |
//! | [`ServiceReference`] | Handle for one hosted service, builds [`ProxyService`] |
//! | [`ReferenceRegistry`] | Owner of all references, LRU of unattached services |
//! | [`FrameworkConfig`] | Wait budgets, cache sizes, TTLs, versions |

// Clippy: No blanket suppressions. Fix issues properly or use inline #[allow] with justification.

/// Framework configuration (constants, builders, YAML loader).
pub mod config;
/// Inbound duplicate and AppSequence filtering.
pub mod discovery;
/// Error type shared by every module.
pub mod error;
/// Framework entry point.
pub mod framework;
/// Function-entry tracing macro.
pub mod logging;
/// Device and service references, proxies, listeners.
pub mod reference;
/// Reference registry and its watchdog.
pub mod registry;
/// Worker pool and counters.
pub mod runtime;
/// Blocking request synchronizers.
pub mod sync;
/// Transport boundary, dispatcher and version fan-out.
pub mod transport;
/// Identities, addresses, metadata and descriptions.
pub mod types;

pub use config::FrameworkConfig;
pub use error::{Error, Result};
pub use framework::{Framework, FrameworkBuilder, InboundMessage};
pub use reference::{
    DeviceListener, DeviceReference, ProxyDevice, ProxyService, ReferenceState, ServiceListener,
    ServiceReference,
};
pub use registry::ReferenceRegistry;
pub use runtime::StatsSnapshot;
pub use transport::{Message, MessageBody, Response, ResponseCallback, SecurityProvider, Transport};
pub use types::{
    AppSequence, DiscoveryMetadata, EndpointIdentity, ProtocolVersion, TransportAddress,
    TransportCandidate,
};
