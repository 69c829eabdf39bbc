//! Single-slot request handoff shared by the receive and CLI services.
//!
//! ```text
//!  Idle ─▶ Assembling ─▶ ReadyForWorker ─▶ QueuedToWorker ─▶ ProcessedByWorker ─▶ Free
//!   │          │                                  ▲
//!   └──────────┴── request too big ──▶ Free       └─ worker marks processed only if
//!                                                    the slot is still queued
//! ```
//!
//! The engine thread owns the transitions up to `QueuedToWorker` and from
//! `ProcessedByWorker` on; the worker owns exactly one transition. The
//! [`Mailbox`] holds at most one queued session per service.

use std::sync::{Arc, Mutex};

use crate::sync::{self, Semaphore};

// ── Phase ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotPhase {
    Idle,
    Assembling,
    ReadyForWorker,
    QueuedToWorker,
    ProcessedByWorker,
    Free,
}

/// What the engine should be told after one request chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Chunk stored, more expected.
    NeedMore,
    /// Request complete but the worker has not finished with it yet.
    Waiting,
    /// The worker finished; the response cursor has been primed.
    Processed,
    /// The request exceeded its size limit and was dropped.
    Overflow,
    /// The slot is already free; nothing left to do.
    Finished,
}

// ── Response cursor ───────────────────────────────────────────

/// Read position into an owned response buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResponseCursor {
    offset: usize,
    remaining: usize,
}

impl ResponseCursor {
    pub fn over(buffer: &[u8]) -> Self {
        Self {
            offset: 0,
            remaining: buffer.len(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// Copy the next piece of `source` into `dest`. Returns bytes copied
    /// and whether anything is left afterwards. A cursor that no longer
    /// fits `source` is spent and copies nothing.
    pub fn copy_next(&mut self, source: &[u8], dest: &mut [u8]) -> (usize, bool) {
        let n = self.remaining.min(dest.len());
        let Some(piece) = source.get(self.offset..self.offset + n) else {
            *self = Self::default();
            return (0, false);
        };
        dest[..n].copy_from_slice(piece);
        self.offset += n;
        self.remaining -= n;
        (n, self.remaining > 0)
    }
}

// ── Slot ──────────────────────────────────────────────────────

/// Per-message assembly state. `E` is the service's error family.
#[derive(Debug)]
pub struct Slot<E> {
    pub phase: SlotPhase,
    pub request: Vec<u8>,
    pub max_request_size: Option<usize>,
    pub response_required: bool,
    pub response: Vec<u8>,
    pub cursor: ResponseCursor,
    /// `response` was generated by the connector, not the application.
    pub handled_internally: bool,
    pub error: Option<E>,
}

impl<E: Copy> Slot<E> {
    pub fn new(response_required: bool) -> Self {
        Self {
            phase: SlotPhase::Idle,
            request: Vec::new(),
            max_request_size: None,
            response_required,
            response: Vec::new(),
            cursor: ResponseCursor::default(),
            handled_internally: false,
            error: None,
        }
    }

    /// Advance the state machine for one engine request callback.
    ///
    /// `data` is appended only in the assembling phases. `install` is
    /// called in `ReadyForWorker` and must return `true` when the slot was
    /// placed in the service mailbox (the worker is then signalled by the
    /// mailbox itself).
    pub fn advance(
        &mut self,
        data: &[u8],
        more_data: bool,
        too_big: E,
        install: impl FnOnce() -> bool,
    ) -> Progress {
        match self.phase {
            SlotPhase::Idle | SlotPhase::Assembling => {
                let new_len = self.request.len() + data.len();
                if self.max_request_size.is_some_and(|max| new_len > max) {
                    self.error = Some(too_big);
                    self.request = Vec::new();
                    self.phase = SlotPhase::Free;
                    return Progress::Overflow;
                }
                self.request.extend_from_slice(data);
                if more_data {
                    self.phase = SlotPhase::Assembling;
                    Progress::NeedMore
                } else {
                    self.phase = SlotPhase::ReadyForWorker;
                    Progress::Waiting
                }
            }
            SlotPhase::ReadyForWorker => {
                if install() {
                    self.phase = SlotPhase::QueuedToWorker;
                }
                Progress::Waiting
            }
            SlotPhase::QueuedToWorker => Progress::Waiting,
            SlotPhase::ProcessedByWorker => {
                self.request = Vec::new();
                if self.response_required {
                    self.cursor = ResponseCursor::over(&self.response);
                }
                self.phase = SlotPhase::Free;
                Progress::Processed
            }
            SlotPhase::Free => Progress::Finished,
        }
    }

    /// Worker side: take the assembled request if the slot is queued.
    pub fn take_request(&mut self) -> Option<Vec<u8>> {
        (self.phase == SlotPhase::QueuedToWorker).then(|| std::mem::take(&mut self.request))
    }

    /// Worker side: store the handler's result. The phase moves to
    /// `ProcessedByWorker` only if nothing reset the slot meanwhile.
    pub fn finish_work(&mut self, response: Vec<u8>, error: Option<E>) {
        self.response = response;
        self.error = error;
        if self.phase == SlotPhase::QueuedToWorker {
            self.phase = SlotPhase::ProcessedByWorker;
        }
    }

    /// Replace the response with a connector-generated message and restart
    /// the cursor over it.
    pub fn respond_internally(&mut self, message: String) {
        self.response = message.into_bytes();
        self.cursor = ResponseCursor::over(&self.response);
        self.handled_internally = true;
    }

    /// Stream the next reply piece into the engine buffer.
    pub fn next_reply_chunk(&mut self, buffer: &mut [u8]) -> (usize, bool) {
        self.cursor.copy_next(&self.response, buffer)
    }

    /// Release the reply buffer on the final status call. Returns it only
    /// when the application wrote it; a connector-generated reply is
    /// dropped here.
    pub fn user_response(&mut self) -> Option<Vec<u8>> {
        self.cursor = ResponseCursor::default();
        let response = std::mem::take(&mut self.response);
        let user_owned = !self.handled_internally && self.response_required && !response.is_empty();
        user_owned.then_some(response)
    }
}

// ── Mailbox ───────────────────────────────────────────────────

/// Single-entry queue between the engine thread and one worker.
pub struct Mailbox<T> {
    entry: Mutex<Option<Arc<T>>>,
    wake: Arc<Semaphore>,
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        Self {
            entry: Mutex::new(None),
            wake: Arc::new(Semaphore::binary()),
        }
    }

    pub fn wake_handle(&self) -> Arc<Semaphore> {
        Arc::clone(&self.wake)
    }

    /// Install `item` if the mailbox is empty and wake the worker.
    pub fn try_install(&self, item: &Arc<T>) -> bool {
        let mut entry = sync::lock(&self.entry);
        if entry.is_some() {
            return false;
        }
        *entry = Some(Arc::clone(item));
        drop(entry);
        self.wake.signal();
        true
    }

    /// The queued item, left in place until [`clear`](Self::clear).
    pub fn peek(&self) -> Option<Arc<T>> {
        sync::lock(&self.entry).clone()
    }

    pub fn clear(&self) {
        *sync::lock(&self.entry) = None;
    }

    pub fn is_empty(&self) -> bool {
        sync::lock(&self.entry).is_none()
    }
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}
