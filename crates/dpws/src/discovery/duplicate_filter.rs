// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bounded recent-message-id filter.
//!
//! Shared by all inbound multicast processing. Outgoing multicast ids are
//! recorded too, so a node drops the copies of its own transmissions that
//! loop back through the multicast group.

use crate::types::MessageId;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

/// Fixed-capacity FIFO of message ids with O(1) membership.
///
/// The oldest id is evicted first once the ring is full. Best effort only:
/// an evicted id can be processed again (tolerated upstream), but a new id
/// is never reported as a duplicate.
///
/// # Examples
/// ```
/// use dpws::discovery::DuplicateMessageFilter;
/// use dpws::types::MessageId;
///
/// let filter = DuplicateMessageFilter::new(8);
/// let id = MessageId::new("urn:uuid:1");
/// assert!(!filter.contains_or_add(&id));
/// assert!(filter.contains_or_add(&id));
/// ```
#[derive(Debug)]
pub struct DuplicateMessageFilter {
    ring: Mutex<Ring>,
    duplicates: AtomicU64,
}

#[derive(Debug)]
struct Ring {
    order: VecDeque<MessageId>,
    members: HashSet<MessageId>,
    capacity: usize,
}

impl DuplicateMessageFilter {
    /// Create filter holding at most `capacity` ids (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ring: Mutex::new(Ring {
                order: VecDeque::with_capacity(capacity),
                members: HashSet::with_capacity(capacity),
                capacity,
            }),
            duplicates: AtomicU64::new(0),
        }
    }

    /// Atomically check membership and insert if absent.
    ///
    /// Returns `true` if `id` was already present.
    pub fn contains_or_add(&self, id: &MessageId) -> bool {
        crate::trace_fn!("DuplicateMessageFilter::contains_or_add");
        let mut ring = self.ring.lock();
        if ring.members.contains(id) {
            self.duplicates.fetch_add(1, Ordering::Relaxed);
            return true;
        }

        if ring.order.len() >= ring.capacity {
            if let Some(oldest) = ring.order.pop_front() {
                ring.members.remove(&oldest);
            }
        }
        ring.order.push_back(id.clone());
        ring.members.insert(id.clone());
        false
    }

    /// Membership test without insertion.
    pub fn contains(&self, id: &MessageId) -> bool {
        self.ring.lock().members.contains(id)
    }

    /// Duplicates reported so far.
    pub fn duplicate_count(&self) -> u64 {
        self.duplicates.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.ring.lock().capacity
    }

    pub fn len(&self) -> usize {
        self.ring.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn mid(n: u32) -> MessageId {
        MessageId::new(format!("urn:uuid:{}", n))
    }

    #[test]
    fn test_second_insert_reports_duplicate() {
        let filter = DuplicateMessageFilter::new(4);
        assert!(!filter.contains_or_add(&mid(1)));
        assert!(filter.contains_or_add(&mid(1)));
        assert_eq!(filter.duplicate_count(), 1);
    }

    #[test]
    fn test_oldest_evicted_first() {
        let filter = DuplicateMessageFilter::new(3);
        for n in 1..=3 {
            assert!(!filter.contains_or_add(&mid(n)));
        }
        assert!(!filter.contains_or_add(&mid(4)));

        assert_eq!(filter.len(), 3);
        assert!(!filter.contains(&mid(1)));
        assert!(filter.contains(&mid(2)));
        assert!(filter.contains(&mid(4)));
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let filter = DuplicateMessageFilter::new(0);
        assert_eq!(filter.capacity(), 1);
        assert!(!filter.contains_or_add(&mid(1)));
        assert!(filter.contains_or_add(&mid(1)));
        assert!(!filter.contains_or_add(&mid(2)));
        assert!(!filter.contains(&mid(1)));
    }

    #[test]
    fn test_no_false_positive_for_fresh_ids() {
        let filter = DuplicateMessageFilter::new(16);
        for _ in 0..1_000 {
            assert!(!filter.contains_or_add(&MessageId::generate()));
        }
        assert_eq!(filter.duplicate_count(), 0);
    }

    #[test]
    fn test_concurrent_single_winner_per_id() {
        let filter = Arc::new(DuplicateMessageFilter::new(1_024));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let filter = Arc::clone(&filter);
                thread::spawn(move || (0..256).filter(|n| !filter.contains_or_add(&mid(*n))).count())
            })
            .collect();
        let first_seen: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(first_seen, 256);
    }
}
