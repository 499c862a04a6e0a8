// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport address failover.
//!
//! Candidates are ranked once, then consumed front to back as they fail.
//! A failed candidate is removed and never offered again by the same
//! policy.

use crate::types::{ProtocolVersion, TransportCandidate};
use std::net::IpAddr;

/// Result of [`AddressFailoverPolicy::mark_failed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailoverStep {
    /// The active candidate failed; retry with this one.
    RetryWith(TransportCandidate),
    /// No candidate left.
    Exhausted,
    /// A non-active candidate was removed; the active one is unchanged.
    Unchanged,
}

/// Ordered candidate list plus cursor.
#[derive(Debug, Clone, Default)]
pub struct AddressFailoverPolicy {
    candidates: Vec<TransportCandidate>,
    cursor: usize,
    failed: Vec<TransportCandidate>,
}

impl AddressFailoverPolicy {
    /// Rank `candidates` against the address the endpoint was observed from.
    pub fn new(candidates: Vec<TransportCandidate>, observed_from: Option<IpAddr>) -> Self {
        Self {
            candidates: rank(candidates, observed_from),
            cursor: 0,
            failed: Vec::new(),
        }
    }

    /// Active candidate, `None` once exhausted.
    pub fn current(&self) -> Option<&TransportCandidate> {
        self.candidates.get(self.cursor)
    }

    pub fn is_exhausted(&self) -> bool {
        self.current().is_none()
    }

    /// Remaining candidates in try order.
    pub fn candidates(&self) -> &[TransportCandidate] {
        &self.candidates
    }

    /// Candidates removed after failing.
    pub fn failed(&self) -> &[TransportCandidate] {
        &self.failed
    }

    /// Remove `candidate` and advance if it was the active one.
    pub fn mark_failed(&mut self, candidate: &TransportCandidate) -> FailoverStep {
        crate::trace_fn!("AddressFailoverPolicy::mark_failed");
        let Some(index) = self.candidates.iter().position(|c| c.same_target(candidate)) else {
            return if self.is_exhausted() {
                FailoverStep::Exhausted
            } else {
                FailoverStep::Unchanged
            };
        };

        let removed = self.candidates.remove(index);
        self.failed.push(removed);

        if index < self.cursor {
            self.cursor -= 1;
            return FailoverStep::Unchanged;
        }
        if index > self.cursor {
            return FailoverStep::Unchanged;
        }
        // The next candidate shifted into the cursor slot.
        match self.candidates.get(self.cursor) {
            Some(next) => FailoverStep::RetryWith(next.clone()),
            None => FailoverStep::Exhausted,
        }
    }

    /// Record the protocol version a candidate answered with.
    pub fn learn_version(&mut self, candidate: &TransportCandidate, version: ProtocolVersion) {
        for c in self.candidates.iter_mut().filter(|c| c.same_target(candidate)) {
            c.version = Some(version);
        }
    }

    /// Start over with a fresh candidate set (new metadata was announced).
    ///
    /// Versions already learned for a kept address are preserved.
    pub fn reset(&mut self, candidates: Vec<TransportCandidate>, observed_from: Option<IpAddr>) {
        let learned: Vec<TransportCandidate> = self
            .candidates
            .iter()
            .chain(self.failed.iter())
            .filter(|c| c.version.is_some())
            .cloned()
            .collect();
        let mut ranked = rank(candidates, observed_from);
        for c in ranked.iter_mut().filter(|c| c.version.is_none()) {
            if let Some(known) = learned.iter().find(|k| k.same_target(c)) {
                c.version = known.version;
            }
        }
        self.candidates = ranked;
        self.cursor = 0;
        self.failed.clear();
    }
}

/// Stable sort: same host first, then same subnet, then routable, then
/// loopback/unspecified.
fn rank(mut candidates: Vec<TransportCandidate>, observed_from: Option<IpAddr>) -> Vec<TransportCandidate> {
    let mut unique: Vec<TransportCandidate> = Vec::with_capacity(candidates.len());
    for c in candidates.drain(..) {
        if !unique.iter().any(|u| u.same_target(&c)) {
            unique.push(c);
        }
    }
    unique.sort_by_key(|c| proximity(c.address.ip(), observed_from));
    unique
}

fn proximity(ip: IpAddr, observed_from: Option<IpAddr>) -> u8 {
    if ip.is_loopback() || ip.is_unspecified() {
        return 3;
    }
    match observed_from {
        Some(origin) if origin == ip => 0,
        Some(origin) if same_subnet(origin, ip) => 1,
        _ => 2,
    }
}

fn same_subnet(a: IpAddr, b: IpAddr) -> bool {
    match (a, b) {
        (IpAddr::V4(a), IpAddr::V4(b)) => a.octets()[..3] == b.octets()[..3],
        (IpAddr::V6(a), IpAddr::V6(b)) => a.segments()[..4] == b.segments()[..4],
        _ => false,
    }
}
