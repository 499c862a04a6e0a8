// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for reference lifecycle and request correlation.

use std::fmt;

/// Convenient alias for results using the crate `Error`.
pub type Result<T> = core::result::Result<T, Error>;

/// Errors surfaced by the discovery/proxy core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // ========================================================================
    // Filtering (dropped silently by callers, logged at debug)
    // ========================================================================
    /// Announcement carried an AppSequence that is not strictly newer.
    StaleSequence,
    /// Message id already processed (or sent by this node).
    DuplicateMessage,
    /// Response belongs to an outdated metadata snapshot.
    ConcurrentUpdateDetected,

    // ========================================================================
    // Network failures (retried locally, then reported)
    // ========================================================================
    /// Every known transport candidate failed.
    AddressExhausted,
    /// Remote peer answered with a structured fault.
    ProtocolFault {
        /// Fault code (e.g. `s12:Sender`).
        code: String,
        /// Human readable reason.
        reason: String,
    },
    /// No response within the bounded wait budget.
    Timeout,
    /// Message could not be handed to the network.
    Transmission(String),
    /// Response arrived but could not be interpreted.
    MalformedResponse(String),

    // ========================================================================
    // Local errors
    // ========================================================================
    /// Operation not valid in the reference's current situation.
    IllegalState(String),
    /// Invalid configuration value.
    Config(String),
    /// Framework is shutting down.
    Shutdown,
}

impl Error {
    /// Build a protocol fault error.
    pub fn fault(code: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ProtocolFault {
            code: code.into(),
            reason: reason.into(),
        }
    }

    /// True for failures caused by the network or the remote peer.
    ///
    /// These trigger address failover; local errors never do.
    pub fn is_network_failure(&self) -> bool {
        matches!(
            self,
            Error::AddressExhausted
                | Error::ProtocolFault { .. }
                | Error::Timeout
                | Error::Transmission(_)
                | Error::MalformedResponse(_)
        )
    }

    /// Map the error to what a blocked caller observes.
    ///
    /// Address exhaustion is reported as a timeout.
    pub fn surfaced(self) -> Self {
        match self {
            Error::AddressExhausted => Error::Timeout,
            other => other,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::StaleSequence => write!(f, "Stale AppSequence"),
            Error::DuplicateMessage => write!(f, "Duplicate message"),
            Error::ConcurrentUpdateDetected => {
                write!(f, "Response discarded: metadata changed concurrently")
            }
            Error::AddressExhausted => write!(f, "All transport addresses failed"),
            Error::ProtocolFault { code, reason } => {
                write!(f, "Protocol fault {}: {}", code, reason)
            }
            Error::Timeout => write!(f, "Request timed out"),
            Error::Transmission(msg) => write!(f, "Transmission error: {}", msg),
            Error::MalformedResponse(msg) => write!(f, "Malformed response: {}", msg),
            Error::IllegalState(msg) => write!(f, "Illegal state: {}", msg),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Shutdown => write!(f, "Framework shut down"),
        }
    }
}

impl std::error::Error for Error {}
