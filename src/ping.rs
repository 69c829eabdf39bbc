//! Device-initiated ping over the short-message transports.

use std::sync::Arc;

use log::{debug, warn};

use crate::connector::Connector;
use crate::engine::{Action, CallbackStatus, PingRequest, SessionStatus, Transport};
use crate::error::PingError;
use crate::rendezvous::{self, LocalErrors, Outcome, Transaction};
use crate::sync::Timeout;

pub type PingTransaction = Transaction<Outcome<PingError>>;

impl Connector {
    /// Fire a ping and wait only until the engine has sent it.
    pub fn send_ping(&self, transport: Transport) -> Result<(), PingError> {
        self.ping(transport, None)
    }

    /// Ping and wait up to `timeout` for the cloud to acknowledge it.
    pub fn send_ping_with_reply(
        &self,
        transport: Transport,
        timeout: Timeout,
    ) -> Result<(), PingError> {
        self.ping(transport, Some(timeout))
    }

    fn ping(&self, transport: Transport, reply: Option<Timeout>) -> Result<(), PingError> {
        if !self.is_running() {
            return Err(PingError::NotRunning);
        }
        if transport == Transport::Tcp {
            return Err(PingError::TransportNotValid);
        }
        if !self.inner.transport_started(transport) {
            return Err(PingError::TransportNotStarted);
        }

        let timeout = reply.unwrap_or(Timeout::Infinite);
        let tx = Transaction::new(Outcome::new());
        let action = Action::Ping(PingRequest {
            transport,
            response_required: reply.is_some(),
            timeout_secs: timeout.as_secs(),
            context: Arc::clone(&tx),
        });

        rendezvous::perform(
            &self.inner,
            action,
            &tx,
            timeout,
            LocalErrors {
                initiate_failed: PingError::InitiateActionFailed,
                lock_failed: PingError::LockFailed,
            },
        )?;

        let result = tx.state().resolve(reply.is_some());
        if let Err(e) = result {
            warn!("ping over {:?} failed: {}", transport, e);
        }
        result
    }
}

pub(crate) fn on_response(tx: &PingTransaction, status: SessionStatus) -> CallbackStatus {
    debug!("ping: {:?}", status);
    tx.state().status = match status {
        SessionStatus::Complete => None,
        SessionStatus::Cancel => Some(PingError::ResponseCancel),
        SessionStatus::Timeout => Some(PingError::ResponseTimeout),
        SessionStatus::InvalidData | SessionStatus::SessionError => {
            Some(PingError::ResponseError)
        }
    };
    tx.complete()
}
