// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! WS-Discovery AppSequence.

use std::cmp::Ordering;
use std::fmt;

/// Monotonic `(instance id, message number)` pair attached to announcements.
///
/// Ordered lexicographically: a larger instance id (sender restarted) always
/// wins, otherwise the message number decides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AppSequence {
    pub instance_id: u64,
    pub message_number: u64,
}

impl AppSequence {
    /// Baseline for freshly created proxy references.
    pub const ZERO: AppSequence = AppSequence {
        instance_id: 0,
        message_number: 0,
    };

    pub const fn new(instance_id: u64, message_number: u64) -> Self {
        Self {
            instance_id,
            message_number,
        }
    }

    /// Strictly newer than `other`.
    pub fn is_newer_than(&self, other: &AppSequence) -> bool {
        self > other
    }
}

impl PartialOrd for AppSequence {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AppSequence {
    fn cmp(&self, other: &Self) -> Ordering {
        self.instance_id
            .cmp(&other.instance_id)
            .then(self.message_number.cmp(&other.message_number))
    }
}

impl fmt::Display for AppSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.instance_id, self.message_number)
    }
}
