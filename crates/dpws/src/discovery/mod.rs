// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Inbound announcement validation.
//!
//! Both filters run before a reference consumes a message: the duplicate
//! filter on message ids, the sequence tracker on AppSequences.

mod duplicate_filter;
mod sequence_tracker;

pub use duplicate_filter::DuplicateMessageFilter;
pub use sequence_tracker::SequenceTracker;
