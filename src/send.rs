//! Send data and files to the cloud.
//!
//! Each call validates its arguments, then runs one rendezvous: the engine
//! pulls the payload through `SendData`, optionally reports the cloud
//! response, and releases the caller with `SendStatus`.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::connector::Connector;
use crate::engine::{Action, CallbackStatus, ResponseCode, SendRequest, SessionStatus, Transport};
use crate::error::SendError;
use crate::rendezvous::{self, LocalErrors, Outcome, Transaction};
use crate::sync::Timeout;

/// Longest content type the wire format can carry.
pub const CONTENT_TYPE_MAX_LEN: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SendBehavior {
    #[default]
    Overwrite,
    Append,
}

/// Where and how a payload lands in cloud storage.
#[derive(Debug, Clone, Copy)]
pub struct Destination<'a> {
    pub transport: Transport,
    pub cloud_path: &'a str,
    pub content_type: Option<&'a str>,
    pub behavior: SendBehavior,
}

impl<'a> Destination<'a> {
    pub fn new(transport: Transport, cloud_path: &'a str) -> Self {
        Self {
            transport,
            cloud_path,
            content_type: None,
            behavior: SendBehavior::default(),
        }
    }

    #[must_use]
    pub fn content_type(mut self, content_type: &'a str) -> Self {
        self.content_type = Some(content_type);
        self
    }

    #[must_use]
    pub fn behavior(mut self, behavior: SendBehavior) -> Self {
        self.behavior = behavior;
        self
    }
}

/// Caller-owned buffer receiving the cloud's response hint.
///
/// At most `capacity - 1` bytes are kept, mirroring a NUL terminated
/// buffer of `capacity` bytes.
#[derive(Debug, Clone, Default)]
pub struct HintBuffer {
    capacity: usize,
    text: String,
}

impl HintBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            text: String::new(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn store(&mut self, text: &str) {
        self.text.clear();
        self.text.push_str(text);
    }
}

pub(crate) fn truncate_hint(hint: &str, capacity: usize) -> String {
    let mut end = capacity.saturating_sub(1).min(hint.len());
    while !hint.is_char_boundary(end) {
        end -= 1;
    }
    hint[..end].to_owned()
}

// ── Transaction state ─────────────────────────────────────────

enum Source {
    Bytes { data: Vec<u8>, pos: usize },
    File(File),
}

pub struct SendState {
    source: Source,
    remaining: usize,
    outcome: Outcome<SendError>,
    hint_capacity: usize,
    hint: Option<String>,
}

pub type SendTransaction = Transaction<SendState>;

// ── Application API ───────────────────────────────────────────

impl Connector {
    pub fn send_data(&self, dest: Destination<'_>, data: &[u8]) -> Result<(), SendError> {
        self.send_data_inner(dest, data, None)
    }

    /// Send `data` and wait up to `timeout` for the cloud's answer.
    pub fn send_data_with_reply(
        &self,
        dest: Destination<'_>,
        data: &[u8],
        timeout: Timeout,
        hint: Option<&mut HintBuffer>,
    ) -> Result<(), SendError> {
        self.send_data_inner(dest, data, Some((timeout, hint)))
    }

    pub fn send_file(&self, dest: Destination<'_>, local_path: &Path) -> Result<(), SendError> {
        self.send_file_inner(dest, local_path, None)
    }

    pub fn send_file_with_reply(
        &self,
        dest: Destination<'_>,
        local_path: &Path,
        timeout: Timeout,
        hint: Option<&mut HintBuffer>,
    ) -> Result<(), SendError> {
        self.send_file_inner(dest, local_path, Some((timeout, hint)))
    }

    fn send_data_inner(
        &self,
        dest: Destination<'_>,
        data: &[u8],
        reply: Option<(Timeout, Option<&mut HintBuffer>)>,
    ) -> Result<(), SendError> {
        self.check_destination(&dest)?;
        if data.is_empty() {
            return Err(SendError::InvalidData);
        }
        check_hint(reply.as_ref())?;

        let source = Source::Bytes {
            data: data.to_vec(),
            pos: 0,
        };
        self.perform_send(dest, source, data.len(), reply)
    }

    fn send_file_inner(
        &self,
        dest: Destination<'_>,
        local_path: &Path,
        reply: Option<(Timeout, Option<&mut HintBuffer>)>,
    ) -> Result<(), SendError> {
        self.check_destination(&dest)?;
        if local_path.as_os_str().is_empty() {
            return Err(SendError::InvalidLocalPath);
        }
        check_hint(reply.as_ref())?;

        let meta = std::fs::metadata(local_path).map_err(|_| SendError::NotAFile)?;
        if !meta.is_file() {
            return Err(SendError::NotAFile);
        }
        let file = File::open(local_path).map_err(|e| {
            warn!("send: cannot open {}: {}", local_path.display(), e);
            SendError::AccessingFile
        })?;
        debug!("send: {} ({} bytes)", local_path.display(), meta.len());

        let size = usize::try_from(meta.len()).map_err(|_| SendError::InsufficientMemory)?;
        self.perform_send(dest, Source::File(file), size, reply)
    }

    fn check_destination(&self, dest: &Destination<'_>) -> Result<(), SendError> {
        if !self.is_running() {
            return Err(SendError::NotRunning);
        }
        if !self.inner.transport_started(dest.transport) {
            return Err(SendError::TransportNotStarted);
        }
        if dest.cloud_path.is_empty() {
            return Err(SendError::InvalidCloudPath);
        }
        if dest
            .content_type
            .is_some_and(|ct| ct.is_empty() || ct.len() > CONTENT_TYPE_MAX_LEN)
        {
            return Err(SendError::InvalidContentType);
        }
        Ok(())
    }

    fn perform_send(
        &self,
        dest: Destination<'_>,
        source: Source,
        size: usize,
        reply: Option<(Timeout, Option<&mut HintBuffer>)>,
    ) -> Result<(), SendError> {
        let with_reply = reply.is_some();
        let (timeout, mut hint) = match reply {
            Some((timeout, hint)) => (timeout, hint),
            None => (Timeout::Infinite, None),
        };

        let tx = Transaction::new(SendState {
            source,
            remaining: size,
            outcome: Outcome::new(),
            hint_capacity: hint.as_ref().map_or(0, |h| h.capacity),
            hint: None,
        });

        let action = Action::Send(SendRequest {
            transport: dest.transport,
            path: dest.cloud_path.to_owned(),
            content_type: dest.content_type.map(str::to_owned),
            behavior: dest.behavior,
            response_required: with_reply,
            timeout_secs: timeout.as_secs(),
            context: Arc::clone(&tx),
        });

        rendezvous::perform(
            &self.inner,
            action,
            &tx,
            timeout,
            LocalErrors {
                initiate_failed: SendError::InitiateActionFailed,
                lock_failed: SendError::LockFailed,
            },
        )?;

        let state = tx.state();
        if let (Some(buf), Some(text)) = (hint.as_deref_mut(), state.hint.as_ref()) {
            buf.store(text);
        }
        let result = state.outcome.resolve(with_reply);
        match result {
            Ok(()) => info!("send: {} delivered ({} bytes)", dest.cloud_path, size),
            Err(e) => warn!("send: {} failed: {}", dest.cloud_path, e),
        }
        result
    }
}

fn check_hint(reply: Option<&(Timeout, Option<&mut HintBuffer>)>) -> Result<(), SendError> {
    match reply {
        Some((_, Some(hint))) if hint.capacity == 0 => Err(SendError::InvalidHint),
        _ => Ok(()),
    }
}

// ── Engine callbacks ──────────────────────────────────────────

pub(crate) fn on_data(
    tx: &SendTransaction,
    buffer: &mut [u8],
    bytes_used: &mut usize,
    more_data: &mut bool,
) -> CallbackStatus {
    let mut guard = tx.state();
    let state = &mut *guard;
    let n = state.remaining.min(buffer.len());

    match &mut state.source {
        Source::Bytes { data, pos } => {
            buffer[..n].copy_from_slice(&data[*pos..*pos + n]);
            *pos += n;
        }
        Source::File(file) => {
            if let Err(e) = file.read_exact(&mut buffer[..n]) {
                warn!("send: file read failed: {}", e);
                state.outcome.request = Some(SendError::AccessingFile);
                return CallbackStatus::Error;
            }
        }
    }

    state.remaining -= n;
    *bytes_used = n;
    *more_data = state.remaining > 0;
    CallbackStatus::Continue
}

pub(crate) fn on_response(
    tx: &SendTransaction,
    response: ResponseCode,
    hint: Option<&str>,
) -> CallbackStatus {
    let mut state = tx.state();
    debug!("send: cloud response {:?}", response);
    state.outcome.response = match response {
        ResponseCode::Success => None,
        ResponseCode::BadRequest => Some(SendError::ResponseBadRequest),
        ResponseCode::Unavailable => Some(SendError::ResponseUnavailable),
        ResponseCode::CloudError => Some(SendError::ResponseCloudError),
    };
    if let Some(hint) = hint {
        debug!("send: cloud hint '{}'", hint);
        if state.hint_capacity > 0 {
            state.hint = Some(truncate_hint(hint, state.hint_capacity));
        }
    }
    CallbackStatus::Continue
}

pub(crate) fn on_status(tx: &SendTransaction, status: SessionStatus) -> CallbackStatus {
    {
        let mut state = tx.state();
        state.outcome.status = match status {
            SessionStatus::Complete => None,
            SessionStatus::Cancel => Some(SendError::StatusCancel),
            SessionStatus::Timeout => Some(SendError::StatusTimeout),
            SessionStatus::InvalidData | SessionStatus::SessionError => {
                Some(SendError::StatusSessionError)
            }
        };
    }
    tx.complete()
}

pub(crate) fn on_length(tx: &SendTransaction, total_bytes: &mut usize) -> CallbackStatus {
    *total_bytes = tx.state().remaining;
    CallbackStatus::Continue
}
