// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Seams to the serialization/transport and security layers.

use super::message::{Message, Response};
use crate::error::Result;
use crate::types::{TransportAddress, TransportCandidate};

/// Receives the outcome of one outstanding request.
///
/// Unicast: exactly one call per request. Multicast: one call per reply
/// received, or a single [`Response::Timeout`] when the match window closes
/// without any reply.
pub trait ResponseCallback: Send + Sync {
    fn on_response(&self, request: &Message, response: Response);
}

impl<F> ResponseCallback for F
where
    F: Fn(&Message, Response) + Send + Sync,
{
    fn on_response(&self, request: &Message, response: Response) {
        self(request, response)
    }
}

/// A communication manager: encodes messages and moves them over the wire.
///
/// Both send methods may block on I/O; the core always calls them from the
/// worker pool. An `Err` return means nothing was sent and the callback
/// will not fire.
pub trait Transport: Send + Sync {
    /// Id this transport registers under (e.g. `"DPWS"`).
    fn comm_manager_id(&self) -> &str;

    /// Send `message` to one candidate address.
    fn send_unicast(
        &self,
        message: Message,
        target: &TransportCandidate,
        callback: std::sync::Arc<dyn ResponseCallback>,
    ) -> Result<()>;

    /// Send `message` to the multicast group of every domain in `domains`
    /// (all local domains when empty).
    fn send_multicast(
        &self,
        message: Message,
        domains: &[String],
        callback: Option<std::sync::Arc<dyn ResponseCallback>>,
    ) -> Result<()>;
}

/// Optional security layer.
///
/// Without a provider, messages are sent without credentials.
pub trait SecurityProvider: Send + Sync {
    /// Address requires a secured channel.
    fn is_secure(&self, address: &TransportAddress) -> bool;

    /// Credential alias to present to `address`.
    fn credential_alias(&self, address: &TransportAddress) -> Option<String>;
}
