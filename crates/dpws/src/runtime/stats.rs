// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Framework counters.
//!
//! Atomic counters for filtered inbound traffic, outbound sends, fan-out
//! copies, address failovers and registry evictions.

use std::sync::atomic::{AtomicU64, Ordering};

/// Framework-wide counters, shared by every component.
#[derive(Debug, Default)]
pub struct FrameworkStats {
    /// Inbound messages handed to the framework.
    pub messages_received: AtomicU64,
    /// Inbound messages dropped by the duplicate filter.
    pub duplicates_dropped: AtomicU64,
    /// Announcements dropped for a stale AppSequence.
    pub stale_sequences: AtomicU64,
    /// Unicast messages handed to a transport (each fan-out copy counts).
    pub unicast_sends: AtomicU64,
    /// Multicast messages handed to a transport (each fan-out copy counts).
    pub multicast_sends: AtomicU64,
    /// Logical requests that were fanned out over several versions.
    pub fanouts: AtomicU64,
    /// Retries on the next transport candidate.
    pub failovers: AtomicU64,
    /// Exchanges that ran out of transport candidates.
    pub addresses_exhausted: AtomicU64,
    /// Responses discarded for an outdated metadata snapshot.
    pub concurrent_updates: AtomicU64,
    /// References unregistered by TTL or evicted from the LRU list.
    pub references_evicted: AtomicU64,
}

/// Point-in-time copy of [`FrameworkStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub messages_received: u64,
    pub duplicates_dropped: u64,
    pub stale_sequences: u64,
    pub unicast_sends: u64,
    pub multicast_sends: u64,
    pub fanouts: u64,
    pub failovers: u64,
    pub addresses_exhausted: u64,
    pub concurrent_updates: u64,
    pub references_evicted: u64,
}

impl FrameworkStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bump one counter.
    #[inline]
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of all counters.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        crate::trace_fn!("FrameworkStats::snapshot");
        StatsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            duplicates_dropped: self.duplicates_dropped.load(Ordering::Relaxed),
            stale_sequences: self.stale_sequences.load(Ordering::Relaxed),
            unicast_sends: self.unicast_sends.load(Ordering::Relaxed),
            multicast_sends: self.multicast_sends.load(Ordering::Relaxed),
            fanouts: self.fanouts.load(Ordering::Relaxed),
            failovers: self.failovers.load(Ordering::Relaxed),
            addresses_exhausted: self.addresses_exhausted.load(Ordering::Relaxed),
            concurrent_updates: self.concurrent_updates.load(Ordering::Relaxed),
            references_evicted: self.references_evicted.load(Ordering::Relaxed),
        }
    }
}
