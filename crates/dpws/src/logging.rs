// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Function-entry instrumentation.
//!
//! Regular diagnostics go through the `log` facade directly
//! (`log::debug!("[registry] ...")`). This module only adds the
//! `trace_fn!` marker used at the top of hot functions. It compiles to an
//! empty statement unless the `trace` feature is enabled.
//!
//! ```ignore
//! fn accept(&self, endpoint: &EndpointIdentity, seq: AppSequence) -> bool {
//!     crate::trace_fn!("SequenceTracker::accept");
//!     // ...
//! }
//! ```

/// Function entry trace marker.
///
/// Logs `[ENTER:FNC] function_name` at trace level.
#[macro_export]
#[cfg(feature = "trace")]
macro_rules! trace_fn {
    ($fn_name:expr) => {
        log::trace!("[ENTER:FNC] {}", $fn_name);
    };
}

/// No-op trace macro (when trace feature disabled).
#[macro_export]
#[cfg(not(feature = "trace"))]
macro_rules! trace_fn {
    ($fn_name:expr) => {};
}
