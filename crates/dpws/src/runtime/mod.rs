// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared execution resources: worker pool and counters.

mod stats;
mod worker_pool;

pub use stats::{FrameworkStats, StatsSnapshot};
pub use worker_pool::{Job, WorkerPool};
