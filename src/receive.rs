//! Inbound message service ("device requests").
//!
//! The engine announces a target, streams request bytes, then polls until
//! the receive worker has run the application handler. The reply and the
//! final status travel back through the same session handle.
//!
//! ```text
//!  ReceiveTarget ─▶ ReceiveData* ─▶ (Busy while worker runs) ─▶ ReceiveReply* ─▶ ReceiveStatus
//! ```

use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, error, info, warn};

use crate::connector::Connector;
use crate::engine::{CallbackStatus, Engine, SessionStatus, Transport};
use crate::error::ReceiveError;
use crate::ports::{AcceptFilter, ReceiveHandler};
use crate::slot::{Mailbox, Progress, Slot};
use crate::sync;

/// Handle the engine keeps for one inbound message.
pub type ReceiveContext = Arc<ReceiveSession>;

pub struct ReceiveSession {
    target: String,
    transport: Transport,
    handler: Option<Arc<dyn ReceiveHandler>>,
    slot: Mutex<Slot<ReceiveError>>,
}

impl ReceiveSession {
    fn new(target: &str, transport: Transport, response_required: bool) -> Self {
        Self {
            target: target.to_owned(),
            transport,
            handler: None,
            slot: Mutex::new(Slot::new(response_required)),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub(crate) fn slot(&self) -> MutexGuard<'_, Slot<ReceiveError>> {
        sync::lock(&self.slot)
    }
}

/// Receive service set-up passed at start.
#[derive(Default, Clone)]
pub struct ReceiveOptions {
    /// Consulted for targets with no registered handler.
    pub accept: Option<Arc<dyn AcceptFilter>>,
    /// Handles targets that were never registered.
    pub default_handler: Option<Arc<dyn ReceiveHandler>>,
}

struct RegisteredTarget {
    name: String,
    handler: Arc<dyn ReceiveHandler>,
    max_request_size: Option<usize>,
}

pub struct ReceiveService {
    options: ReceiveOptions,
    targets: Mutex<Vec<RegisteredTarget>>,
    mailbox: Mailbox<ReceiveSession>,
    engine: Arc<dyn Engine>,
}

impl ReceiveService {
    pub(crate) fn new(options: ReceiveOptions, engine: Arc<dyn Engine>) -> Self {
        Self {
            options,
            targets: Mutex::new(Vec::new()),
            mailbox: Mailbox::new(),
            engine,
        }
    }

    pub(crate) fn wake_handle(&self) -> Arc<crate::sync::Semaphore> {
        self.mailbox.wake_handle()
    }

    pub(crate) fn clear(&self) {
        self.mailbox.clear();
        sync::lock(&self.targets).clear();
    }

    fn lookup(&self, name: &str) -> Option<(Arc<dyn ReceiveHandler>, Option<usize>)> {
        sync::lock(&self.targets)
            .iter()
            .find(|t| t.name == name)
            .map(|t| (Arc::clone(&t.handler), t.max_request_size))
    }

    /// One worker iteration: run the data handler for the queued session.
    pub(crate) fn run_worker(&self) {
        let Some(session) = self.mailbox.peek() else {
            error!("RX: worker woken with an empty mailbox");
            return;
        };

        let (request, wants_reply) = {
            let mut slot = session.slot();
            (slot.take_request(), slot.response_required)
        };

        match (request, session.handler.as_ref()) {
            (Some(request), Some(handler)) => {
                debug!("RX[{}]: dispatching {} bytes", session.target, request.len());
                let mut response = Vec::new();
                let result = handler.data(
                    &session.target,
                    session.transport,
                    &request,
                    wants_reply.then_some(&mut response),
                );
                session.slot().finish_work(response, result.err());
            }
            (Some(_), None) => error!("RX[{}]: queued without a handler", session.target),
            (None, _) => debug!("RX[{}]: session ended before dispatch", session.target),
        }

        self.mailbox.clear();
        self.engine.wake();
    }
}

// ── Application API ───────────────────────────────────────────

impl Connector {
    /// Register a handler for `target`. `max_request_size` caps the
    /// reassembled request (`None` = unlimited).
    pub fn add_receive_target(
        &self,
        target: &str,
        handler: Arc<dyn ReceiveHandler>,
        max_request_size: Option<usize>,
    ) -> Result<(), ReceiveError> {
        if target.is_empty() {
            return Err(ReceiveError::InvalidTarget);
        }
        if !self.is_running() {
            return Err(ReceiveError::NotRunning);
        }
        let service = self.inner.receive.as_ref().ok_or(ReceiveError::NoReceiveSupport)?;

        let mut targets = sync::lock(&service.targets);
        if targets.iter().any(|t| t.name == target) {
            return Err(ReceiveError::TargetAlreadyAdded);
        }
        targets.push(RegisteredTarget {
            name: target.to_owned(),
            handler,
            max_request_size,
        });
        info!("RX[{}]: target added", target);
        Ok(())
    }

    pub fn remove_receive_target(&self, target: &str) -> Result<(), ReceiveError> {
        if !self.is_running() {
            return Err(ReceiveError::NotRunning);
        }
        let service = self.inner.receive.as_ref().ok_or(ReceiveError::NoReceiveSupport)?;
        if target.is_empty() {
            return Err(ReceiveError::InvalidTarget);
        }

        let mut targets = sync::lock(&service.targets);
        let index = targets
            .iter()
            .position(|t| t.name == target)
            .ok_or(ReceiveError::TargetNotAdded)?;
        targets.remove(index);
        info!("RX[{}]: target removed", target);
        Ok(())
    }
}

// ── Engine callbacks ──────────────────────────────────────────

/// A new inbound message. Errors are recorded in the session and replayed
/// through the reply and status callbacks.
pub(crate) fn on_target(
    service: Option<&ReceiveService>,
    target: &str,
    transport: Transport,
    response_required: bool,
    context: &mut Option<ReceiveContext>,
) -> CallbackStatus {
    if context.is_some() {
        error!("RX[{}]: target announced twice for one message", target);
        return CallbackStatus::Error;
    }
    debug!("RX[{}]: new request over {:?}", target, transport);

    let mut session = ReceiveSession::new(target, transport, response_required);
    let outcome = resolve_target(service, &mut session);
    if let Err(e) = outcome {
        warn!("RX[{}]: {}", target, e);
        session.slot().error = Some(e);
    }
    *context = Some(Arc::new(session));

    match outcome {
        Ok(()) => CallbackStatus::Continue,
        Err(_) => CallbackStatus::Error,
    }
}

fn resolve_target(
    service: Option<&ReceiveService>,
    session: &mut ReceiveSession,
) -> Result<(), ReceiveError> {
    let service = service.ok_or(ReceiveError::NoReceiveSupport)?;

    if let Some((handler, max)) = service.lookup(&session.target) {
        session.handler = Some(handler);
        session.slot().max_request_size = max;
        return Ok(());
    }

    let handler = service
        .options
        .default_handler
        .clone()
        .ok_or(ReceiveError::InvalidDataCb)?;
    session.handler = Some(handler);

    let accepted = service
        .options
        .accept
        .as_ref()
        .is_none_or(|f| f.accept(&session.target, session.transport));
    if accepted {
        Ok(())
    } else {
        Err(ReceiveError::UserRefusedTarget)
    }
}

pub(crate) fn on_data(
    service: Option<&ReceiveService>,
    session: &ReceiveContext,
    data: &[u8],
    more_data: bool,
) -> CallbackStatus {
    let Some(service) = service else {
        session.slot().error = Some(ReceiveError::NoReceiveSupport);
        return CallbackStatus::Error;
    };
    if session.handler.is_none() {
        error!("RX[{}]: data for a rejected target", session.target);
        return CallbackStatus::Error;
    }

    let mut slot = session.slot();
    match slot.advance(data, more_data, ReceiveError::RequestTooBig, || {
        service.mailbox.try_install(session)
    }) {
        Progress::NeedMore => CallbackStatus::Continue,
        Progress::Waiting => CallbackStatus::Busy,
        Progress::Processed if slot.error.is_none() => CallbackStatus::Continue,
        Progress::Processed | Progress::Finished => CallbackStatus::Error,
        Progress::Overflow => {
            warn!("RX[{}]: request exceeds size limit", session.target);
            CallbackStatus::Error
        }
    }
}

pub(crate) fn on_reply(
    session: &ReceiveContext,
    buffer: &mut [u8],
    bytes_used: &mut usize,
    more_data: &mut bool,
) -> CallbackStatus {
    let mut slot = session.slot();
    if !slot.response_required {
        return CallbackStatus::Error;
    }

    if let Some(e) = slot.error {
        if !slot.handled_internally && slot.response.is_empty() {
            let message = format!(
                "Error {} ({}) while handling target '{}'",
                e.code(),
                reply_label(e),
                session.target
            );
            debug!("RX[{}]: replying with {}", session.target, message);
            slot.respond_internally(message);
        }
    }

    let (n, more) = slot.next_reply_chunk(buffer);
    *bytes_used = n;
    *more_data = more;
    CallbackStatus::Continue
}

pub(crate) fn on_reply_length(session: &ReceiveContext, total_bytes: &mut usize) -> CallbackStatus {
    *total_bytes = session.slot().cursor.remaining();
    CallbackStatus::Continue
}

/// Final callback for the message. Connector errors take priority over
/// the session status.
pub(crate) fn on_status(session: &ReceiveContext, status: SessionStatus) -> CallbackStatus {
    let (response, error) = {
        let mut slot = session.slot();
        if slot.error.is_none() {
            slot.error = match status {
                SessionStatus::Complete => None,
                SessionStatus::Cancel => Some(ReceiveError::StatusCancel),
                SessionStatus::Timeout => Some(ReceiveError::StatusTimeout),
                SessionStatus::InvalidData | SessionStatus::SessionError => {
                    Some(ReceiveError::StatusSessionError)
                }
            };
        }
        slot.phase = crate::slot::SlotPhase::Free;
        let response = slot.user_response();
        (response, slot.error)
    };

    debug!("RX[{}]: finished ({:?})", session.target, error);
    if let Some(handler) = session.handler.as_ref() {
        handler.status(&session.target, session.transport, response, error);
    }
    CallbackStatus::Continue
}

fn reply_label(e: ReceiveError) -> &'static str {
    match e {
        ReceiveError::NotRunning
        | ReceiveError::NoReceiveSupport
        | ReceiveError::InsufficientMemory
        | ReceiveError::InvalidDataCb
        | ReceiveError::UserRefusedTarget
        | ReceiveError::RequestTooBig => e.name(),
        _ => "Unexpected error",
    }
}
