//! Short-message command line service.
//!
//! Same slot shape as the receive service, with three differences: there
//! is no size cap, requests arrive only over UDP or SMS, and the command
//! output is sent back NUL terminated.

use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, error, warn};

use crate::engine::{CallbackStatus, Engine, SessionStatus, Transport};
use crate::error::CliError;
use crate::ports::CliHandler;
use crate::slot::{Mailbox, Progress, Slot, SlotPhase};
use crate::sync::{self, Semaphore};

pub type CliContext = Arc<CliSession>;

pub struct CliSession {
    transport: Transport,
    slot: Mutex<Slot<CliError>>,
}

impl CliSession {
    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub(crate) fn slot(&self) -> MutexGuard<'_, Slot<CliError>> {
        sync::lock(&self.slot)
    }
}

pub struct CliService {
    handler: Arc<dyn CliHandler>,
    mailbox: Mailbox<CliSession>,
    engine: Arc<dyn Engine>,
}

impl CliService {
    pub(crate) fn new(handler: Arc<dyn CliHandler>, engine: Arc<dyn Engine>) -> Self {
        Self {
            handler,
            mailbox: Mailbox::new(),
            engine,
        }
    }

    pub(crate) fn wake_handle(&self) -> Arc<Semaphore> {
        self.mailbox.wake_handle()
    }

    pub(crate) fn clear(&self) {
        self.mailbox.clear();
    }

    pub(crate) fn run_worker(&self) {
        let Some(session) = self.mailbox.peek() else {
            error!("CLI: worker woken with an empty mailbox");
            return;
        };

        let (request, wants_reply) = {
            let mut slot = session.slot();
            (slot.take_request(), slot.response_required)
        };

        if let Some(request) = request {
            let command = String::from_utf8_lossy(&request);
            let command = command.trim_end_matches('\0');
            debug!("CLI: running '{}'", command);

            let mut output = String::new();
            self.handler
                .request(session.transport, command, wants_reply.then_some(&mut output));

            let mut response = output.into_bytes();
            if !response.is_empty() {
                response.push(0);
            }
            session.slot().finish_work(response, None);
        } else {
            debug!("CLI: session ended before dispatch");
        }

        self.mailbox.clear();
        self.engine.wake();
    }
}

// ── Engine callbacks ──────────────────────────────────────────

pub(crate) fn on_request(
    service: Option<&CliService>,
    transport: Transport,
    response_required: bool,
    data: &[u8],
    more_data: bool,
    context: &mut Option<CliContext>,
) -> CallbackStatus {
    if data.is_empty() && context.is_none() {
        error!("CLI: empty first request chunk");
        return CallbackStatus::Error;
    }
    let session: &CliContext = context.get_or_insert_with(|| {
        Arc::new(CliSession {
            transport,
            slot: Mutex::new(Slot::new(response_required)),
        })
    });

    let Some(service) = service else {
        warn!("CLI: request received but no CLI handler is configured");
        session.slot().error = Some(CliError::NoCliSupport);
        return CallbackStatus::Error;
    };

    let mut slot = session.slot();
    match slot.advance(data, more_data, CliError::InsufficientMemory, || {
        service.mailbox.try_install(session)
    }) {
        Progress::NeedMore | Progress::Processed => CallbackStatus::Continue,
        Progress::Waiting => CallbackStatus::Busy,
        Progress::Overflow | Progress::Finished => CallbackStatus::Error,
    }
}

pub(crate) fn on_response(
    session: &CliContext,
    buffer: &mut [u8],
    bytes_used: &mut usize,
    more_data: &mut bool,
) -> CallbackStatus {
    let mut slot = session.slot();
    if !slot.response_required {
        return CallbackStatus::Error;
    }

    if let Some(e) = slot.error {
        if !slot.handled_internally {
            slot.respond_internally(format!("Error {} ({})", e.code(), e.name()));
        }
    }

    let (n, more) = slot.next_reply_chunk(buffer);
    *bytes_used = n;
    *more_data = more;
    CallbackStatus::Continue
}

pub(crate) fn on_response_length(session: &CliContext, total_bytes: &mut usize) -> CallbackStatus {
    *total_bytes = session.slot().cursor.remaining();
    CallbackStatus::Continue
}

pub(crate) fn on_status(
    service: Option<&CliService>,
    session: &CliContext,
    status: SessionStatus,
) -> CallbackStatus {
    let (output, error) = {
        let mut slot = session.slot();
        if slot.error.is_none() {
            slot.error = match status {
                SessionStatus::Complete => None,
                SessionStatus::Cancel => Some(CliError::StatusCancel),
                _ => Some(CliError::StatusError),
            };
        }
        slot.phase = SlotPhase::Free;
        let output = slot.user_response().map(|mut bytes| {
            if bytes.last() == Some(&0) {
                bytes.pop();
            }
            String::from_utf8_lossy(&bytes).into_owned()
        });
        (output, slot.error)
    };

    debug!("CLI: finished ({:?})", error);
    if let Some(service) = service {
        service.handler.finished(output, error);
    }
    CallbackStatus::Continue
}
