//! Pending-request table.
//!
//! Every outbound request registers a oneshot slot before it is written. The
//! reader task resolves the slot when the matching response arrives; teardown
//! resolves every remaining slot with [`Resolution::Closed`]. Each slot is
//! removed from the table exactly once, by whichever happens first.
//!
//! A caller that stops waiting simply drops its receiver. The slot stays in
//! the table until the response or teardown arrives, and the late resolution
//! is discarded as [`RouteOutcome::Abandoned`].

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::LockResultExt;
use crate::lsp::protocol::{RequestId, ResponseError};

/// How a pending slot was resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Response(Result<Value, ResponseError>),
    Closed(String),
}

/// What happened to a response handed to [`ResponseRouter::route`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Delivered,
    /// The caller gave up before the response arrived.
    Abandoned,
    /// No request with this id is outstanding.
    Unknown,
}

pub(crate) struct ResponseRouter {
    state: std::sync::Mutex<RouterState>,
}

struct RouterState {
    pending: HashMap<RequestId, oneshot::Sender<Resolution>>,
    /// Set once by `fail_all`; later registrations resolve immediately.
    closed: Option<String>,
}

impl ResponseRouter {
    pub(crate) fn new() -> Self {
        Self {
            state: std::sync::Mutex::new(RouterState {
                pending: HashMap::new(),
                closed: None,
            }),
        }
    }

    /// Register a pending request and return the receiver for its resolution.
    ///
    /// Must be called before the request is written. Returns `None` if the id
    /// is already outstanding. After teardown the returned receiver is already
    /// resolved with [`Resolution::Closed`].
    pub(crate) fn register(&self, id: RequestId) -> Option<oneshot::Receiver<Resolution>> {
        let (tx, rx) = oneshot::channel();
        let mut state = self.state.lock().recover_poison("ResponseRouter::register");

        if let Some(reason) = &state.closed {
            let _ = tx.send(Resolution::Closed(reason.clone()));
            return Some(rx);
        }
        if state.pending.contains_key(&id) {
            return None;
        }

        state.pending.insert(id, tx);
        Some(rx)
    }

    /// Resolve the slot for `id` with the server's reply.
    pub(crate) fn route(&self, id: &RequestId, outcome: Result<Value, ResponseError>) -> RouteOutcome {
        let sender = {
            let mut state = self.state.lock().recover_poison("ResponseRouter::route");
            state.pending.remove(id)
        };

        match sender {
            Some(tx) => match tx.send(Resolution::Response(outcome)) {
                Ok(()) => RouteOutcome::Delivered,
                Err(_) => RouteOutcome::Abandoned,
            },
            None => RouteOutcome::Unknown,
        }
    }

    /// Remove a slot whose request was never written.
    pub(crate) fn remove(&self, id: &RequestId) -> bool {
        let mut state = self.state.lock().recover_poison("ResponseRouter::remove");
        state.pending.remove(id).is_some()
    }

    pub(crate) fn pending_count(&self) -> usize {
        let state = self.state.lock().recover_poison("ResponseRouter::pending_count");
        state.pending.len()
    }

    /// Resolve every outstanding slot with [`Resolution::Closed`].
    ///
    /// Idempotent: the first reason wins and later calls find nothing pending.
    /// Returns the number of slots resolved by this call.
    pub(crate) fn fail_all(&self, reason: &str) -> usize {
        let drained: Vec<_> = {
            let mut state = self.state.lock().recover_poison("ResponseRouter::fail_all");
            if state.closed.is_none() {
                state.closed = Some(reason.to_string());
            }
            state.pending.drain().collect()
        };

        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(Resolution::Closed(reason.to_string()));
        }
        count
    }

    pub(crate) fn is_closed(&self) -> bool {
        let state = self.state.lock().recover_poison("ResponseRouter::is_closed");
        state.closed.is_some()
    }
}
