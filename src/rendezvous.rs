//! Synchronous action rendezvous.
//!
//! An application thread builds a [`Transaction`], hands a clone of it to
//! the engine inside an [`Action`], and parks on the transaction's
//! completion. The engine thread later writes the outcome fields through
//! its callbacks and releases the completion exactly once.
//!
//! ```text
//!  app thread                         engine thread
//!  ──────────                         ─────────────
//!  Transaction::new ─┐
//!  initiate(action) ─┼──────────────▶ keeps Arc<Transaction>
//!  wait(timeout) ◀───┼─────────────── response / status callbacks
//!  outcome.resolve() ┘                complete()
//! ```

use std::sync::{Arc, Mutex, MutexGuard};

use log::{error, warn};

use crate::connector::Inner;
use crate::engine::{Action, CallbackStatus, EngineStatus};
use crate::sync::{self, Completion, Timeout};

/// Shared state of one in-flight action.
pub struct Transaction<S> {
    completion: Completion,
    state: Mutex<S>,
}

impl<S> Transaction<S> {
    pub fn new(state: S) -> Arc<Self> {
        Arc::new(Self {
            completion: Completion::new(),
            state: Mutex::new(state),
        })
    }

    pub fn state(&self) -> MutexGuard<'_, S> {
        sync::lock(&self.state)
    }

    /// Release the waiting application thread. Called by the final engine
    /// callback of the action; a second release is a defect and fails the
    /// callback.
    pub fn complete(&self) -> CallbackStatus {
        match self.completion.complete() {
            Ok(()) => CallbackStatus::Continue,
            Err(e) => {
                error!("rendezvous: {}", e);
                CallbackStatus::Error
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        self.completion.is_complete()
    }
}

/// Three independent outcome fields, filled by different engine callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome<E> {
    /// Local delivery: did the engine accept and transmit the request.
    pub request: Option<E>,
    /// Remote response, meaningful only when a reply was requested.
    pub response: Option<E>,
    /// Session status.
    pub status: Option<E>,
}

impl<E: Copy> Outcome<E> {
    pub const fn new() -> Self {
        Self {
            request: None,
            response: None,
            status: None,
        }
    }

    /// Most specific error first: delivery, then response, then status.
    pub fn resolve(&self, with_reply: bool) -> Result<(), E> {
        if let Some(e) = self.request {
            return Err(e);
        }
        if with_reply {
            if let Some(e) = self.response {
                return Err(e);
            }
        }
        match self.status {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl<E: Copy> Default for Outcome<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Error kinds a family reports for the two local rendezvous failures.
#[derive(Debug, Clone, Copy)]
pub struct LocalErrors<E> {
    pub initiate_failed: E,
    pub lock_failed: E,
}

/// Submit `action` and block until `tx` is completed or `timeout` expires.
///
/// A rejected submission returns immediately without waiting. The caller
/// reads the outcome from the transaction state afterwards.
pub(crate) fn perform<S, E>(
    inner: &Inner,
    action: Action,
    tx: &Transaction<S>,
    timeout: Timeout,
    errors: LocalErrors<E>,
) -> Result<(), E> {
    let kind = action.kind();
    match inner.initiate(&action) {
        EngineStatus::Success => {}
        status => {
            warn!("rendezvous: {} rejected by engine ({:?})", kind, status);
            return Err(errors.initiate_failed);
        }
    }
    drop(action);

    tx.completion.wait(timeout).map_err(|e| {
        warn!("rendezvous: {} wait failed: {}", kind, e);
        errors.lock_failed
    })
}
