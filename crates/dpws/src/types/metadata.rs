// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Discovery metadata carried by Hello / ProbeMatch / ResolveMatch.

use super::candidate::TransportCandidate;
use super::identity::EndpointIdentity;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// DPWS 1.1 namespace.
pub const DPWS_NAMESPACE: &str = "http://docs.oasis-open.org/ws-dd/ns/dpws/2009/01";

/// Qualified name (`{namespace}local`).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QName {
    pub namespace: Arc<str>,
    pub local: Arc<str>,
}

impl QName {
    pub fn new(namespace: impl Into<Arc<str>>, local: impl Into<Arc<str>>) -> Self {
        Self {
            namespace: namespace.into(),
            local: local.into(),
        }
    }

    /// `dpws:Device`, the type every DPWS device announces.
    pub fn dpws_device() -> Self {
        Self::new(DPWS_NAMESPACE, "Device")
    }
}

impl fmt::Debug for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}{}", self.namespace, self.local)
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Discovery metadata of one endpoint.
///
/// `metadata_version` only ever increases for a given endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryMetadata {
    pub endpoint: EndpointIdentity,
    pub metadata_version: u64,
    pub types: BTreeSet<QName>,
    pub scopes: BTreeSet<String>,
    /// Transport addresses in announcement order.
    pub candidates: Vec<TransportCandidate>,
}

impl DiscoveryMetadata {
    pub fn new(endpoint: EndpointIdentity, metadata_version: u64) -> Self {
        Self {
            endpoint,
            metadata_version,
            types: BTreeSet::new(),
            scopes: BTreeSet::new(),
            candidates: Vec::new(),
        }
    }

    /// Builder: add a port type.
    pub fn with_type(mut self, qname: QName) -> Self {
        self.types.insert(qname);
        self
    }

    /// Builder: add a scope URI.
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scopes.insert(scope.into());
        self
    }

    /// Builder: append a transport candidate.
    pub fn with_candidate(mut self, candidate: TransportCandidate) -> Self {
        if !self.candidates.iter().any(|c| c.same_target(&candidate)) {
            self.candidates.push(candidate);
        }
        self
    }

    /// Announces `dpws:Device`.
    pub fn is_device(&self) -> bool {
        self.types.contains(&QName::dpws_device())
    }

    /// Merge a newer (or equal-version) copy into this one.
    ///
    /// Announcements may omit transport addresses (a Hello without XAddrs);
    /// in that case the previously known candidates are kept.
    pub fn merge_from(&mut self, newer: DiscoveryMetadata) {
        self.metadata_version = self.metadata_version.max(newer.metadata_version);
        if !newer.types.is_empty() {
            self.types = newer.types;
        }
        if !newer.scopes.is_empty() {
            self.scopes = newer.scopes;
        }
        if !newer.candidates.is_empty() {
            self.candidates = newer.candidates;
        }
    }

    /// Every type in `types` is announced by this endpoint.
    pub fn matches_types(&self, types: &BTreeSet<QName>) -> bool {
        types.is_subset(&self.types)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TransportAddress;

    fn candidate(s: &str) -> TransportCandidate {
        TransportCandidate::new(s.parse::<TransportAddress>().unwrap())
    }

    #[test]
    fn test_merge_keeps_candidates_when_missing() {
        let id = EndpointIdentity::new("urn:uuid:dev-1");
        let mut known = DiscoveryMetadata::new(id.clone(), 1)
            .with_type(QName::dpws_device())
            .with_candidate(candidate("10.0.0.1:80/a"));
        known.merge_from(DiscoveryMetadata::new(id, 2).with_scope("ldap:///ou=lab"));

        assert_eq!(known.metadata_version, 2);
        assert_eq!(known.candidates.len(), 1);
        assert!(known.is_device());
        assert!(known.scopes.contains("ldap:///ou=lab"));
    }

    #[test]
    fn test_with_candidate_deduplicates_targets() {
        let meta = DiscoveryMetadata::new(EndpointIdentity::new("urn:x"), 1)
            .with_candidate(candidate("10.0.0.1:80/a"))
            .with_candidate(candidate("10.0.0.1:80/a"));
        assert_eq!(meta.candidates.len(), 1);
    }

    #[test]
    fn test_matches_types() {
        let printer = QName::new("http://example.org/print", "Printer");
        let meta = DiscoveryMetadata::new(EndpointIdentity::new("urn:x"), 1)
            .with_type(QName::dpws_device())
            .with_type(printer.clone());
        let wanted: BTreeSet<_> = [printer].into_iter().collect();
        assert!(meta.matches_types(&wanted));
        assert!(meta.matches_types(&BTreeSet::new()));
    }
}
