// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Protocol version fan-out.
//!
//! A request whose target version is unknown is sent once per supported
//! version. The caller's callback is wrapped so that it sees one outcome:
//! the first reply, or a single failure once every copy has failed.

use super::interface::ResponseCallback;
use super::message::{Message, Response};
use crate::types::ProtocolVersion;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Splits a message into version-specific copies.
#[derive(Debug, Clone)]
pub struct ProtocolVersionFanout {
    versions: Vec<ProtocolVersion>,
}

impl ProtocolVersionFanout {
    pub fn new(versions: Vec<ProtocolVersion>) -> Self {
        Self { versions }
    }

    pub fn versions(&self) -> &[ProtocolVersion] {
        &self.versions
    }

    /// Copies to send and the callback to hand to each send.
    ///
    /// Known version (or a single supported version): the message and the
    /// callback are returned untouched.
    pub fn prepare(
        &self,
        message: Message,
        callback: Arc<dyn ResponseCallback>,
    ) -> (Vec<Message>, Arc<dyn ResponseCallback>) {
        crate::trace_fn!("ProtocolVersionFanout::prepare");
        if message.version.is_some() {
            return (vec![message], callback);
        }
        match self.versions.as_slice() {
            [] => (vec![message], callback),
            [only] => (vec![message.copy_for_version(*only)], callback),
            versions => {
                let copies: Vec<Message> = versions
                    .iter()
                    .map(|v| message.copy_for_version(*v))
                    .collect();
                log::debug!(
                    "[fanout] {} sent as {} version copies",
                    message,
                    copies.len()
                );
                let aggregated = Arc::new(FaultAggregatingCallback::new(callback, copies.len()));
                (copies, aggregated)
            }
        }
    }
}

/// Decorator forwarding the first reply, or the failure of the last copy.
///
/// When several copies failed, a structured fault is preferred over a
/// timeout or transmission error as the reported outcome.
pub struct FaultAggregatingCallback {
    inner: Arc<dyn ResponseCallback>,
    expected: usize,
    failures: AtomicUsize,
    done: AtomicBool,
    first_fault: Mutex<Option<Response>>,
}

impl FaultAggregatingCallback {
    pub fn new(inner: Arc<dyn ResponseCallback>, expected: usize) -> Self {
        Self {
            inner,
            expected: expected.max(1),
            failures: AtomicUsize::new(0),
            done: AtomicBool::new(false),
            first_fault: Mutex::new(None),
        }
    }

    /// Outcome already forwarded.
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Failed copies so far.
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::Acquire)
    }
}

impl ResponseCallback for FaultAggregatingCallback {
    fn on_response(&self, request: &Message, response: Response) {
        if self.is_done() {
            return;
        }

        if response.is_reply() {
            if !self.done.swap(true, Ordering::AcqRel) {
                self.inner.on_response(request, response);
            }
            return;
        }

        if matches!(response, Response::Fault { .. }) {
            let mut first = self.first_fault.lock();
            if first.is_none() {
                *first = Some(response.clone());
            }
        }

        let failed = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
        if failed < self.expected {
            log::debug!(
                "[fanout] {} failed ({} of {}), awaiting other versions",
                request,
                failed,
                self.expected
            );
            return;
        }

        if !self.done.swap(true, Ordering::AcqRel) {
            let reported = self.first_fault.lock().take().unwrap_or(response);
            self.inner.on_response(request, reported);
        }
    }
}
