// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Endpoint identity and message identifiers.

use std::fmt;
use std::sync::Arc;

/// Stable logical address of a device or service (usually a `urn:uuid:` URN).
///
/// Independent of where the endpoint is currently reachable. Cloning only
/// bumps a reference count.
///
/// # Examples
/// ```
/// use dpws::types::EndpointIdentity;
///
/// let id = EndpointIdentity::new("urn:uuid:6f1b7f0e-0c3d-4a5e-9d2a-0f3e1b2c4d5e");
/// assert_eq!(id.as_str(), "urn:uuid:6f1b7f0e-0c3d-4a5e-9d2a-0f3e1b2c4d5e");
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointIdentity(Arc<str>);

impl EndpointIdentity {
    pub fn new(address: impl Into<Arc<str>>) -> Self {
        Self(address.into())
    }

    /// Fresh random `urn:uuid:` identity.
    pub fn random() -> Self {
        Self(urn_uuid().into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for EndpointIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EndpointIdentity({})", self.0)
    }
}

impl From<&str> for EndpointIdentity {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// WS-Addressing message id. Used for response correlation and
/// duplicate detection.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct MessageId(Arc<str>);

impl MessageId {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    /// Generate a unique `urn:uuid:` message id.
    pub fn generate() -> Self {
        Self(urn_uuid().into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({})", self.0)
    }
}

fn urn_uuid() -> String {
    format!("urn:uuid:{}", uuid::Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_identities_are_unique_urns() {
        let a = EndpointIdentity::random();
        let b = EndpointIdentity::random();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("urn:uuid:"));
    }

    #[test]
    fn test_message_ids_are_unique() {
        let ids: std::collections::HashSet<_> = (0..100).map(|_| MessageId::generate()).collect();
        assert_eq!(ids.len(), 100);
    }
}
