// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-endpoint AppSequence ordering check.
//!
//! Announcements can arrive out of order over different network paths.
//! The tracker keeps the last accepted sequence per endpoint and rejects
//! anything that is not strictly newer, so cached metadata never regresses.

use crate::types::{AppSequence, EndpointIdentity};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Thread-safe AppSequence table.
///
/// # Invariant
/// For a given endpoint, `accept` never returns `true` for a sequence that
/// is not strictly newer than the last accepted one.
///
/// # Examples
/// ```
/// use dpws::discovery::SequenceTracker;
/// use dpws::types::{AppSequence, EndpointIdentity};
///
/// let tracker = SequenceTracker::new(true);
/// let id = EndpointIdentity::new("urn:uuid:dev");
/// assert!(tracker.accept(&id, AppSequence::new(1, 1)));
/// assert!(!tracker.accept(&id, AppSequence::new(1, 1)));
/// assert!(tracker.accept(&id, AppSequence::new(1, 2)));
/// ```
#[derive(Debug)]
pub struct SequenceTracker {
    table: DashMap<EndpointIdentity, AppSequence>,
    enabled: AtomicBool,
    rejected: AtomicU64,
}

impl SequenceTracker {
    /// Create a tracker. With `enabled == false` every sequence is accepted.
    pub fn new(enabled: bool) -> Self {
        Self {
            table: DashMap::new(),
            enabled: AtomicBool::new(enabled),
            rejected: AtomicU64::new(0),
        }
    }

    /// Accept `seq` for `endpoint` if it is strictly newer than the last one.
    pub fn accept(&self, endpoint: &EndpointIdentity, seq: AppSequence) -> bool {
        crate::trace_fn!("SequenceTracker::accept");
        if !self.enabled.load(Ordering::Relaxed) {
            return true;
        }

        let accepted = match self.table.entry(endpoint.clone()) {
            Entry::Occupied(mut last) => {
                if seq.is_newer_than(last.get()) {
                    last.insert(seq);
                    true
                } else {
                    log::debug!(
                        "[sequence] stale AppSequence {} for {} (last {})",
                        seq,
                        endpoint,
                        last.get()
                    );
                    false
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(seq);
                true
            }
        };

        if !accepted {
            self.rejected.fetch_add(1, Ordering::Relaxed);
        }
        accepted
    }

    /// Install the zero baseline for a freshly created proxy reference.
    ///
    /// Existing entries are left untouched.
    pub fn seed(&self, endpoint: &EndpointIdentity) {
        self.table
            .entry(endpoint.clone())
            .or_insert(AppSequence::ZERO);
    }

    /// Last accepted sequence for `endpoint`.
    pub fn last_seen(&self, endpoint: &EndpointIdentity) -> Option<AppSequence> {
        self.table.get(endpoint).map(|entry| *entry.value())
    }

    /// Drop the entry of an unregistered endpoint.
    pub fn forget(&self, endpoint: &EndpointIdentity) {
        self.table.remove(endpoint);
    }

    /// Toggle policing at runtime.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Number of stale sequences rejected so far.
    pub fn rejected_count(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl Default for SequenceTracker {
    fn default() -> Self {
        Self::new(true)
    }
}
