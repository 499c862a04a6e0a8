// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Discovery state machine of proxy references.
//!
//! ```text
//! UNKNOWN --SEEN--> RUNNING --GET_RESPONSE--> BUILD_UP
//!    ^                 |  ^                      |
//!    +--FAULT_RESET----+  +-------CHANGED--------+   (BUILD_UP --FAULT_RESET--> UNKNOWN)
//! UNKNOWN | RUNNING | BUILD_UP --BYE--> STOPPED
//! STOPPED --SEEN--> BUILD_UP (proxy cached) or RUNNING (no proxy)
//! STOPPED --CHANGED--> RUNNING, STOPPED --GET_RESPONSE--> BUILD_UP
//! ```
//!
//! Local references never go through [`transition`].

use std::fmt;

/// Discovery status of a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReferenceState {
    #[default]
    Unknown,
    Running,
    BuildUp,
    Stopped,
}

impl fmt::Display for ReferenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReferenceState::Unknown => "UNKNOWN",
            ReferenceState::Running => "RUNNING",
            ReferenceState::BuildUp => "BUILD_UP",
            ReferenceState::Stopped => "STOPPED",
        };
        f.write_str(name)
    }
}

/// Inputs of the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceEvent {
    /// Hello or match received.
    Seen,
    /// Get / GetMetadata response built a proxy.
    GetResponse,
    /// Bye received.
    Bye,
    /// Hello with a higher metadata version.
    Changed,
    /// Every address failed for an outstanding exchange.
    FaultReset,
    /// Directed probe returned complete discovery metadata.
    CompletelyDiscovered,
}

/// Listener notification raised by a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Notification {
    Running,
    BuiltUp,
    Bye,
    Changed,
    CommunicationError,
    CompletelyDiscovered,
}

/// Outcome of one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: ReferenceState,
    pub notify: Option<Notification>,
}

impl Transition {
    fn to(next: ReferenceState, notify: Notification) -> Self {
        Self {
            next,
            notify: Some(notify),
        }
    }

    fn stay(state: ReferenceState) -> Self {
        Self {
            next: state,
            notify: None,
        }
    }
}

/// Apply `event` to `state`. Unlisted pairs leave the state unchanged
/// without notification.
///
/// `has_proxy` decides STOPPED + SEEN: a still cached proxy resumes in
/// BUILD_UP, otherwise the reference becomes RUNNING.
pub fn transition(state: ReferenceState, event: ReferenceEvent, has_proxy: bool) -> Transition {
    use ReferenceEvent as E;
    use ReferenceState as S;

    match (state, event) {
        (_, E::CompletelyDiscovered) => Transition::to(state, Notification::CompletelyDiscovered),

        (S::Unknown, E::Seen) => Transition::to(S::Running, Notification::Running),
        (S::Unknown, E::GetResponse) => Transition::to(S::BuildUp, Notification::BuiltUp),
        (S::Unknown, E::Bye) => Transition::to(S::Stopped, Notification::Bye),

        (S::Running, E::Changed) => Transition::to(S::Running, Notification::Changed),
        (S::Running, E::GetResponse) => Transition::to(S::BuildUp, Notification::BuiltUp),
        (S::Running, E::Bye) => Transition::to(S::Stopped, Notification::Bye),
        (S::Running, E::FaultReset) => Transition::to(S::Unknown, Notification::CommunicationError),

        (S::BuildUp, E::Changed) => Transition::to(S::Running, Notification::Changed),
        (S::BuildUp, E::Bye) => Transition::to(S::Stopped, Notification::Bye),
        (S::BuildUp, E::FaultReset) => Transition::to(S::Unknown, Notification::CommunicationError),

        (S::Stopped, E::Changed) => Transition::to(S::Running, Notification::Changed),
        (S::Stopped, E::GetResponse) => Transition::to(S::BuildUp, Notification::BuiltUp),
        (S::Stopped, E::Seen) if has_proxy => Transition::to(S::BuildUp, Notification::BuiltUp),
        (S::Stopped, E::Seen) => Transition::to(S::Running, Notification::Running),

        _ => Transition::stay(state),
    }
}
