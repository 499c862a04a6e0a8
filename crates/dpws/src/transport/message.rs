// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Discovery and metadata messages as seen by the core.
//!
//! Only the fields needed for correlation and reference bookkeeping are
//! carried. Encoding to SOAP envelopes happens below the [`Transport`]
//! boundary.
//!
//! [`Transport`]: super::Transport

use crate::error::Error;
use crate::types::{
    AppSequence, DeviceDescription, DiscoveryMetadata, EndpointIdentity, MessageId,
    ProtocolVersion, QName, ServiceDescription,
};
use std::collections::BTreeSet;
use std::fmt;

/// Message payload, one variant per message type the core exchanges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    /// Announcement of a joining or changed endpoint.
    Hello(DiscoveryMetadata),
    /// Announcement of a leaving endpoint.
    Bye(EndpointIdentity),
    /// Probe for endpoints announcing all `types`.
    Probe { types: BTreeSet<QName> },
    ProbeMatches(Vec<DiscoveryMetadata>),
    /// Resolve an endpoint identity to transport addresses.
    Resolve(EndpointIdentity),
    ResolveMatches(DiscoveryMetadata),
    /// WS-Transfer Get of a device.
    Get,
    GetResponse(DeviceDescription),
    /// WS-MetadataExchange GetMetadata of a service.
    GetMetadata,
    GetMetadataResponse(ServiceDescription),
}

impl MessageBody {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            MessageBody::Hello(_) => "Hello",
            MessageBody::Bye(_) => "Bye",
            MessageBody::Probe { .. } => "Probe",
            MessageBody::ProbeMatches(_) => "ProbeMatches",
            MessageBody::Resolve(_) => "Resolve",
            MessageBody::ResolveMatches(_) => "ResolveMatches",
            MessageBody::Get => "Get",
            MessageBody::GetResponse(_) => "GetResponse",
            MessageBody::GetMetadata => "GetMetadata",
            MessageBody::GetMetadataResponse(_) => "GetMetadataResponse",
        }
    }

    /// Request types that expect a correlated response.
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            MessageBody::Probe { .. }
                | MessageBody::Resolve(_)
                | MessageBody::Get
                | MessageBody::GetMetadata
        )
    }
}

/// One message with its addressing header fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// `wsa:MessageID`.
    pub id: MessageId,
    /// `wsa:RelatesTo` of a response.
    pub relates_to: Option<MessageId>,
    /// Target endpoint (`wsa:To` of directed messages).
    pub to: Option<EndpointIdentity>,
    /// `None` until the peer's version is known.
    pub version: Option<ProtocolVersion>,
    /// Present on Hello, Bye and match messages.
    pub app_sequence: Option<AppSequence>,
    /// Credential alias attached by the security layer.
    pub credential_alias: Option<String>,
    pub body: MessageBody,
}

impl Message {
    /// New message with a fresh id.
    pub fn new(body: MessageBody) -> Self {
        Self {
            id: MessageId::generate(),
            relates_to: None,
            to: None,
            version: None,
            app_sequence: None,
            credential_alias: None,
            body,
        }
    }

    /// Response correlated with `request`, in the request's version.
    pub fn reply_to(request: &Message, body: MessageBody) -> Self {
        let mut reply = Self::new(body);
        reply.relates_to = Some(request.id.clone());
        reply.version = request.version;
        reply
    }

    /// Builder: set the target endpoint.
    pub fn with_to(mut self, to: EndpointIdentity) -> Self {
        self.to = Some(to);
        self
    }

    /// Builder: set the protocol version.
    pub fn with_version(mut self, version: ProtocolVersion) -> Self {
        self.version = Some(version);
        self
    }

    /// Builder: set the AppSequence.
    pub fn with_sequence(mut self, seq: AppSequence) -> Self {
        self.app_sequence = Some(seq);
        self
    }

    /// Copy for one protocol version, with its own message id.
    pub fn copy_for_version(&self, version: ProtocolVersion) -> Self {
        let mut copy = self.clone();
        copy.id = MessageId::generate();
        copy.version = Some(version);
        copy
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.version {
            Some(v) => write!(f, "{}({}, {})", self.body.name(), self.id, v),
            None => write!(f, "{}({}, ?)", self.body.name(), self.id),
        }
    }
}

/// Outcome delivered by the transport for one outstanding request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Typed response message.
    Reply(Message),
    /// SOAP fault returned by the peer.
    Fault { code: String, reason: String },
    /// Request could not be sent or the connection broke.
    TransmissionError(String),
    /// Response could not be decoded.
    MalformedResponse(String),
    /// No response within the transport's timeout.
    Timeout,
}

impl Response {
    pub fn is_reply(&self) -> bool {
        matches!(self, Response::Reply(_))
    }

    /// Error equivalent of a failure outcome, `None` for a reply.
    pub fn to_error(&self) -> Option<Error> {
        match self {
            Response::Reply(_) => None,
            Response::Fault { code, reason } => Some(Error::fault(code.clone(), reason.clone())),
            Response::TransmissionError(msg) => Some(Error::Transmission(msg.clone())),
            Response::MalformedResponse(msg) => Some(Error::MalformedResponse(msg.clone())),
            Response::Timeout => Some(Error::Timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_correlates_and_keeps_version() {
        let request = Message::new(MessageBody::Get).with_version(ProtocolVersion::Dpws2009);
        let reply = Message::reply_to(&request, MessageBody::GetResponse(DeviceDescription::default()));
        assert_eq!(reply.relates_to.as_ref(), Some(&request.id));
        assert_eq!(reply.version, Some(ProtocolVersion::Dpws2009));
        assert_ne!(reply.id, request.id);
    }

    #[test]
    fn test_version_copies_get_fresh_ids() {
        let request = Message::new(MessageBody::GetMetadata);
        let a = request.copy_for_version(ProtocolVersion::Dpws2006);
        let b = request.copy_for_version(ProtocolVersion::Dpws2011);
        assert_ne!(a.id, b.id);
        assert_ne!(a.id, request.id);
        assert_eq!(a.body, request.body);
    }

    #[test]
    fn test_response_error_mapping() {
        assert_eq!(Response::Timeout.to_error(), Some(Error::Timeout));
        assert_eq!(
            Response::Fault {
                code: "s12:Receiver".into(),
                reason: "busy".into()
            }
            .to_error(),
            Some(Error::fault("s12:Receiver", "busy"))
        );
        let reply = Response::Reply(Message::new(MessageBody::Get));
        assert!(reply.is_reply());
        assert_eq!(reply.to_error(), None);
    }
}
