//! Firmware image staging.
//!
//! The engine delivers image bytes in arbitrary pieces; the image writer
//! wants chunk-aligned blocks in offset order. A fixed ring of chunk
//! buffers sits between them:
//!
//! ```text
//!   engine thread                 ChunkPool                  firmware worker
//!   ─────────────   copy   ┌──────┬──────┬──────┐   take     ──────────────
//!   DownloadData ────────▶ │ head │      │ tail │ ────────▶ FirmwareHandler::data
//!        ▲                 └──────┴──────┴──────┘               │
//!        └── Busy while the head chunk is still in use ◀────────┘ finish + wake
//! ```
//!
//! A chunk is handed to the worker when it is full or holds the last byte
//! of the image. The engine thread never waits: if the next chunk is still
//! owned by the worker the call returns `Busy` and the engine repeats it.
//! A call spanning a chunk boundary is consumed in several `Busy` rounds;
//! `bytes_processed` remembers how far the current call got.

use std::sync::{Arc, Mutex};

use log::{debug, error, info, warn};

pub use crate::config::FirmwareVersion;
use crate::config::FirmwareTargetConfig;
use crate::engine::{CallbackStatus, Engine, FirmwareRequest};
use crate::error::{FirmwareDataError, FirmwareRequestError};
use crate::ports::{DeviceControl, FirmwareHandler};
use crate::sync::{self, Semaphore};

/// Chunk size used when a target leaves it unset.
pub const DEFAULT_CHUNK_SIZE: u32 = 1024;

// ── Engine-facing status types ────────────────────────────────

/// Why a download was abandoned, as reported to the image writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    UserAbort,
    DeviceError,
    InvalidOffset,
    InvalidData,
    HardwareError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DownloadStatus {
    #[default]
    Success,
    DownloadDenied,
    DownloadInvalidSize,
    DownloadInvalidVersion,
    DownloadUnauthenticated,
    DownloadNotAllowed,
    DownloadConfiguredToReject,
    EncounteredError,
    UserAbort,
    DeviceError,
    InvalidOffset,
    InvalidData,
    HardwareError,
}

impl DownloadStatus {
    /// Abort statuses map onto a cancel reason; start-time refusals do not.
    pub fn cancel_reason(self) -> Option<CancelReason> {
        match self {
            Self::UserAbort => Some(CancelReason::UserAbort),
            Self::DeviceError => Some(CancelReason::DeviceError),
            Self::InvalidOffset => Some(CancelReason::InvalidOffset),
            Self::InvalidData => Some(CancelReason::InvalidData),
            Self::HardwareError => Some(CancelReason::HardwareError),
            _ => None,
        }
    }
}

impl From<FirmwareRequestError> for DownloadStatus {
    fn from(e: FirmwareRequestError) -> Self {
        match e {
            FirmwareRequestError::Denied => Self::DownloadDenied,
            FirmwareRequestError::InvalidSize => Self::DownloadInvalidSize,
            FirmwareRequestError::InvalidVersion => Self::DownloadInvalidVersion,
            FirmwareRequestError::Unauthenticated => Self::DownloadUnauthenticated,
            FirmwareRequestError::NotAllowed => Self::DownloadNotAllowed,
            FirmwareRequestError::ConfiguredToReject => Self::DownloadConfiguredToReject,
            FirmwareRequestError::EncounteredError => Self::EncounteredError,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompleteStatus {
    #[default]
    Success,
    NotComplete,
    InvalidData,
}

/// Target description reported to the cloud.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetInfo {
    pub version: FirmwareVersion,
    pub description: String,
    pub filespec: String,
}

// ── Chunk pool ────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Chunk {
    data: Vec<u8>,
    in_use: bool,
    offset: u32,
    size: u32,
    last: bool,
}

/// One chunk lent to the worker. Returned through [`ChunkPool::finish`].
#[derive(Debug)]
pub struct ChunkJob {
    generation: u32,
    index: usize,
    pub target: u8,
    pub offset: u32,
    pub data: Vec<u8>,
    pub size: usize,
    pub last: bool,
}

impl ChunkJob {
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.size]
    }
}

/// Outcome of feeding one engine data call into the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feed {
    /// No download is active for this target.
    Rejected,
    /// Refused without consuming anything; report `status` and continue.
    Refused(DownloadStatus),
    /// The whole call was consumed.
    Consumed { handed_off: bool },
    /// Part of the call was consumed; the engine must repeat it.
    Partial { handed_off: bool },
    /// The head chunk is still owned by the worker.
    Full,
}

#[derive(Debug)]
pub struct ChunkPool {
    chunks: Vec<Chunk>,
    head: usize,
    tail: usize,
    chunk_size: u32,
    target: u8,
    total_size: u32,
    head_offset: u32,
    tail_offset: u32,
    bytes_processed: usize,
    data_error: bool,
    started: bool,
    /// Bumped on every start and release so stale jobs are discarded.
    generation: u32,
}

impl ChunkPool {
    pub fn new(pool_size: u8) -> Self {
        Self {
            chunks: (0..pool_size.max(1)).map(|_| Chunk::default()).collect(),
            head: 0,
            tail: 0,
            chunk_size: DEFAULT_CHUNK_SIZE,
            target: 0,
            total_size: 0,
            head_offset: 0,
            tail_offset: 0,
            bytes_processed: 0,
            data_error: false,
            started: false,
            generation: 0,
        }
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    fn is_active_for(&self, target: u8) -> bool {
        self.started && self.target == target
    }

    /// Any chunk still lent to the worker.
    pub fn is_draining(&self) -> bool {
        self.chunks.iter().any(|c| c.in_use)
    }

    pub fn begin(&mut self, target: u8, total_size: u32, chunk_size: u32) {
        let chunk_size = if chunk_size == 0 { DEFAULT_CHUNK_SIZE } else { chunk_size };
        for chunk in &mut self.chunks {
            *chunk = Chunk {
                data: vec![0; chunk_size as usize],
                ..Chunk::default()
            };
        }
        self.head = 0;
        self.tail = 0;
        self.chunk_size = chunk_size;
        self.target = target;
        self.total_size = total_size;
        self.head_offset = 0;
        self.tail_offset = 0;
        self.bytes_processed = 0;
        self.data_error = false;
        self.started = true;
        self.generation = self.generation.wrapping_add(1);
    }

    /// Drop the buffers and end the download.
    pub fn release(&mut self) {
        for chunk in &mut self.chunks {
            *chunk = Chunk::default();
        }
        self.started = false;
        self.generation = self.generation.wrapping_add(1);
    }

    pub fn feed(&mut self, target: u8, offset: u32, data: &[u8]) -> Feed {
        if !self.is_active_for(target) {
            return Feed::Rejected;
        }
        if self.data_error {
            return Feed::Refused(DownloadStatus::InvalidData);
        }
        let expected = self.tail_offset.wrapping_sub(self.bytes_processed as u32);
        if offset != expected {
            warn!("FW[{}]: out of order data at {:#x}, expected {:#x}", target, offset, expected);
            return Feed::Refused(DownloadStatus::InvalidOffset);
        }
        if u64::from(offset) + data.len() as u64 > u64::from(self.total_size) {
            warn!("FW[{}]: data past the announced image size {}", target, self.total_size);
            return Feed::Refused(DownloadStatus::InvalidData);
        }
        // Nothing to copy: never hand an empty chunk to the writer.
        if data.is_empty() {
            return Feed::Consumed { handed_off: false };
        }
        if self.chunks[self.head].in_use {
            return Feed::Full;
        }

        let chunk_size = self.chunk_size;
        let tail_offset = self.tail_offset;
        let room = chunk_size - tail_offset % chunk_size;
        let source = &data[self.bytes_processed.min(data.len())..];
        let to_copy = (source.len() as u32).min(room);
        let next_head_offset = tail_offset + to_copy;
        let last = next_head_offset == self.total_size;

        let mut handed_off = false;
        let mut partial = false;
        if tail_offset >= self.head_offset {
            let start = (tail_offset % chunk_size) as usize;
            let chunk = &mut self.chunks[self.head];
            chunk.data[start..start + to_copy as usize].copy_from_slice(&source[..to_copy as usize]);

            if last || next_head_offset % chunk_size == 0 {
                chunk.offset = self.head_offset;
                chunk.size = next_head_offset - self.head_offset;
                chunk.last = last;
                chunk.in_use = true;
                debug!(
                    "FW[{}]: queued chunk {} offset={:#x} size={} last={}",
                    target, self.head, chunk.offset, chunk.size, last
                );
                self.head_offset = next_head_offset;
                self.head = (self.head + 1) % self.chunks.len();
                handed_off = true;
            }

            self.bytes_processed += to_copy as usize;
            if self.bytes_processed == data.len() {
                self.bytes_processed = 0;
            } else {
                partial = true;
            }
        }
        self.tail_offset = next_head_offset;

        if partial {
            Feed::Partial { handed_off }
        } else {
            Feed::Consumed { handed_off }
        }
    }

    /// Lend the chunk at the tail to the worker, if it is ready.
    pub fn next_job(&mut self) -> Option<ChunkJob> {
        let chunk = &mut self.chunks[self.tail];
        if !chunk.in_use || chunk.data.is_empty() {
            return None;
        }
        Some(ChunkJob {
            generation: self.generation,
            index: self.tail,
            target: self.target,
            offset: chunk.offset,
            size: chunk.size as usize,
            data: std::mem::take(&mut chunk.data),
            last: chunk.last,
        })
    }

    /// Take a chunk back from the worker. Jobs from an earlier download
    /// are dropped.
    pub fn finish(&mut self, job: ChunkJob, result: Result<(), FirmwareDataError>) {
        if job.generation != self.generation {
            debug!("FW: discarding chunk from a finished download");
            return;
        }
        if result.is_err() {
            self.data_error = true;
        }
        let chunk = &mut self.chunks[job.index];
        chunk.data = job.data;
        chunk.in_use = false;
        self.tail = (self.tail + 1) % self.chunks.len();
    }

    pub fn head_offset(&self) -> u32 {
        self.head_offset
    }

    pub fn tail_offset(&self) -> u32 {
        self.tail_offset
    }
}

// ── Service ───────────────────────────────────────────────────

pub struct FirmwareService {
    targets: Mutex<Vec<FirmwareTargetConfig>>,
    handler: Arc<dyn FirmwareHandler>,
    device: Option<Arc<dyn DeviceControl>>,
    pool: Mutex<ChunkPool>,
    wake: Arc<Semaphore>,
    engine: Arc<dyn Engine>,
}

impl FirmwareService {
    pub(crate) fn new(
        targets: Vec<FirmwareTargetConfig>,
        pool_size: u8,
        handler: Arc<dyn FirmwareHandler>,
        device: Option<Arc<dyn DeviceControl>>,
        engine: Arc<dyn Engine>,
    ) -> Self {
        Self {
            targets: Mutex::new(targets),
            handler,
            device,
            pool: Mutex::new(ChunkPool::new(pool_size)),
            wake: Arc::new(Semaphore::binary()),
            engine,
        }
    }

    pub(crate) fn wake_handle(&self) -> Arc<Semaphore> {
        Arc::clone(&self.wake)
    }

    /// Current version of `target`, as last reported by the reset hook.
    pub fn target_version(&self, target: u8) -> Option<FirmwareVersion> {
        sync::lock(&self.targets).get(usize::from(target)).map(|t| t.version)
    }

    /// Worker body: write every chunk that is ready, then nudge the engine.
    pub(crate) fn run_worker(&self) {
        let mut wrote = false;
        loop {
            let Some(job) = sync::lock(&self.pool).next_job() else {
                break;
            };
            let result = self.handler.data(job.target, job.offset, job.bytes(), job.last);
            if let Err(e) = result {
                warn!("FW[{}]: writer rejected chunk at {:#x}: {}", job.target, job.offset, e);
            } else if job.last {
                info!("FW[{}]: last chunk written", job.target);
            }
            sync::lock(&self.pool).finish(job, result);
            wrote = true;
        }
        if !wrote {
            debug!("FW: worker woken with nothing to write");
        }
        self.engine.wake();
    }

    pub(crate) fn handle(&self, request: FirmwareRequest<'_>) -> CallbackStatus {
        match request {
            FirmwareRequest::TargetCount { count } => {
                *count = u8::try_from(sync::lock(&self.targets).len()).unwrap_or(u8::MAX);
                CallbackStatus::Continue
            }
            FirmwareRequest::TargetInfo { target, info } => {
                let targets = sync::lock(&self.targets);
                let Some(t) = targets.get(usize::from(target)) else {
                    error!("FW[{}]: info for unknown target", target);
                    return CallbackStatus::Error;
                };
                *info = TargetInfo {
                    version: t.version,
                    description: t.description.clone(),
                    filespec: t.filespec.clone(),
                };
                CallbackStatus::Continue
            }
            FirmwareRequest::DownloadStart {
                target,
                filename,
                code_size,
                status,
            } => {
                *status = self.start(target, filename, code_size);
                CallbackStatus::Continue
            }
            FirmwareRequest::DownloadData {
                target,
                offset,
                data,
                status,
            } => self.data(target, offset, data, status),
            FirmwareRequest::DownloadComplete { target, status } => self.complete(target, status),
            FirmwareRequest::DownloadAbort { target, status } => self.abort(target, status),
            FirmwareRequest::TargetReset { target } => self.reset(target),
        }
    }

    fn start(&self, target: u8, filename: &str, code_size: u32) -> DownloadStatus {
        info!("FW[{}]: download start '{}' ({} bytes)", target, filename, code_size);

        let Some(config) = sync::lock(&self.targets).get(usize::from(target)).cloned() else {
            error!("FW[{}]: no such target", target);
            return DownloadStatus::EncounteredError;
        };

        {
            let mut pool = sync::lock(&self.pool);
            if pool.is_started() {
                warn!("FW[{}]: start while a download is active", target);
                pool.release();
                return DownloadStatus::EncounteredError;
            }
        }

        if config.maximum_size != 0 && config.maximum_size < code_size {
            return DownloadStatus::DownloadInvalidSize;
        }
        if let Err(e) = self.handler.request(target, filename, code_size) {
            info!("FW[{}]: download refused: {}", target, e);
            return e.into();
        }

        sync::lock(&self.pool).begin(target, code_size, config.chunk_size);
        DownloadStatus::Success
    }

    fn data(&self, target: u8, offset: u32, data: &[u8], status: &mut DownloadStatus) -> CallbackStatus {
        let feed = sync::lock(&self.pool).feed(target, offset, data);
        let handed_off = matches!(
            feed,
            Feed::Consumed { handed_off: true } | Feed::Partial { handed_off: true }
        );
        if handed_off {
            self.wake.signal();
        }

        *status = DownloadStatus::Success;
        match feed {
            Feed::Rejected => {
                error!("FW[{}]: data without an active download", target);
                CallbackStatus::Error
            }
            Feed::Refused(s) => {
                *status = s;
                CallbackStatus::Continue
            }
            Feed::Consumed { .. } => CallbackStatus::Continue,
            Feed::Partial { .. } | Feed::Full => CallbackStatus::Busy,
        }
    }

    fn complete(&self, target: u8, status: &mut CompleteStatus) -> CallbackStatus {
        let mut pool = sync::lock(&self.pool);
        if !pool.is_active_for(target) {
            error!("FW[{}]: complete without an active download", target);
            return CallbackStatus::Error;
        }
        if pool.is_draining() {
            return CallbackStatus::Busy;
        }

        *status = if pool.head_offset != pool.total_size {
            warn!("FW[{}]: complete before all data arrived", target);
            CompleteStatus::NotComplete
        } else {
            CompleteStatus::Success
        };
        let result = if pool.data_error {
            warn!("FW[{}]: image rejected by writer", target);
            *status = CompleteStatus::InvalidData;
            CallbackStatus::Error
        } else {
            info!("FW[{}]: download complete", target);
            CallbackStatus::Continue
        };
        pool.release();
        result
    }

    fn abort(&self, target: u8, status: DownloadStatus) -> CallbackStatus {
        {
            let mut pool = sync::lock(&self.pool);
            if !pool.is_active_for(target) {
                error!("FW[{}]: abort without an active download", target);
                return CallbackStatus::Error;
            }
            if pool.is_draining() {
                return CallbackStatus::Busy;
            }
            if status.cancel_reason().is_none() {
                error!("FW[{}]: {:?} is not an abort status", target, status);
                return CallbackStatus::Error;
            }
            pool.release();
        }

        if let Some(reason) = status.cancel_reason() {
            warn!("FW[{}]: download aborted ({:?})", target, reason);
            self.handler.cancel(target, reason);
        }
        CallbackStatus::Continue
    }

    fn reset(&self, target: u8) -> CallbackStatus {
        let Some(mut version) = self.target_version(target) else {
            error!("FW[{}]: reset for unknown target", target);
            return CallbackStatus::Error;
        };

        let mut system_reset = true;
        self.handler.reset(target, &mut system_reset, &mut version);
        if let Some(t) = sync::lock(&self.targets).get_mut(usize::from(target)) {
            t.version = version;
        }
        info!("FW[{}]: reset requested, now at {}", target, version);

        if !system_reset {
            return CallbackStatus::Continue;
        }
        let Some(device) = &self.device else {
            warn!("FW[{}]: no device control to perform the reset", target);
            return CallbackStatus::Error;
        };
        match device.reset() {
            Ok(()) => CallbackStatus::Continue,
            Err(e) => {
                error!("FW[{}]: device reset failed: {:#}", target, e);
                CallbackStatus::Error
            }
        }
    }
}
