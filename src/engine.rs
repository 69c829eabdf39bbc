//! Protocol engine boundary.
//!
//! The engine is an external, single-threaded state machine. This module
//! describes both directions of its contract:
//!
//! ```text
//!   Connector ── &Action ─────────▶ Engine::initiate_action
//!   Connector ◀── Request<'a> ──── engine thread (Connector::dispatch)
//! ```
//!
//! Every callback payload is a variant of [`Request`] carrying typed
//! borrowed fields; contexts the engine keeps between calls (send
//! transactions, receive and CLI slots) are reference-counted handles the
//! engine stores and hands back.

use std::sync::Arc;

use crate::cli::CliContext;
use crate::datapoints::{DataPointTransaction, DataStream};
use crate::firmware::{CompleteStatus, DownloadStatus, TargetInfo};
use crate::ping::PingTransaction;
use crate::rci::{RciStep, RemoteConfigData};
use crate::receive::ReceiveContext;
use crate::send::{SendBehavior, SendTransaction};

// ── Shared vocabulary ─────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Transport {
    Tcp,
    Udp,
    Sms,
}

/// Result of one engine callback. The engine never waits: `Busy` means
/// "call me again with the same request later".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackStatus {
    Continue,
    Busy,
    Error,
    Unrecognized,
}

/// Result of submitting an [`Action`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    Success,
    /// The engine is momentarily saturated; resubmit shortly.
    ServiceBusy,
    Unavailable,
    InvalidData,
    NoResource,
    DeviceTerminated,
    Abort,
}

/// Cloud answer to a request that asked for a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    Success,
    BadRequest,
    Unavailable,
    CloudError,
}

/// Final session outcome reported once per transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Complete,
    Cancel,
    Timeout,
    InvalidData,
    SessionError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBehavior {
    Gracefully,
    Immediately,
}

// ── Engine (consumed) ─────────────────────────────────────────

/// The external protocol engine as seen from the connector.
pub trait Engine: Send + Sync {
    /// Queue an action. Must not block. The engine clones whatever it
    /// needs to keep (contexts are reference counted); on `ServiceBusy` the
    /// same action is offered again.
    fn initiate_action(&self, action: &Action) -> EngineStatus;

    /// Nudge the engine thread after new work was queued or a worker
    /// finished. Engines that poll continuously can ignore it.
    fn wake(&self) {}
}

/// Work submitted to the engine by application threads.
pub enum Action {
    Send(SendRequest),
    Ping(PingRequest),
    DataPoints(DataPointRequest),
    StartTransport(Transport),
    StopTransport {
        transport: Transport,
        behavior: StopBehavior,
    },
    Terminate,
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Send(_) => "send",
            Self::Ping(_) => "ping",
            Self::DataPoints(_) => "data points",
            Self::StartTransport(_) => "start transport",
            Self::StopTransport { .. } => "stop transport",
            Self::Terminate => "terminate",
        }
    }
}

pub struct SendRequest {
    pub transport: Transport,
    pub path: String,
    pub content_type: Option<String>,
    pub behavior: SendBehavior,
    pub response_required: bool,
    pub timeout_secs: u32,
    pub context: Arc<SendTransaction>,
}

pub struct PingRequest {
    pub transport: Transport,
    pub response_required: bool,
    pub timeout_secs: u32,
    pub context: Arc<PingTransaction>,
}

pub struct DataPointRequest {
    pub transport: Transport,
    pub response_required: bool,
    pub timeout_secs: u32,
    /// Streams in upload order.
    pub streams: Vec<DataStream>,
    pub context: Arc<DataPointTransaction>,
}

// ── Requests (engine → connector) ─────────────────────────────

/// One engine callback invocation, grouped by class.
pub enum Request<'a> {
    Status(StatusEvent),
    DataService(DataService<'a>),
    DataPoint(DataPointEvent<'a>),
    Firmware(FirmwareRequest<'a>),
    ShortMessage(ShortMessage<'a>),
    RemoteConfig {
        step: RciStep,
        data: &'a mut RemoteConfigData,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    TcpCommunicationStarted,
    KeepaliveMissed,
    KeepaliveRestored,
    StopCompleted(Option<Transport>),
    /// The engine gave up; the connector will not be called again.
    Aborted,
}

pub enum DataService<'a> {
    SendData {
        context: &'a SendTransaction,
        buffer: &'a mut [u8],
        bytes_used: &'a mut usize,
        more_data: &'a mut bool,
    },
    SendResponse {
        context: &'a SendTransaction,
        response: ResponseCode,
        hint: Option<&'a str>,
    },
    SendStatus {
        context: &'a SendTransaction,
        status: SessionStatus,
    },
    SendLength {
        context: &'a SendTransaction,
        total_bytes: &'a mut usize,
    },
    /// A new inbound message. The connector fills `context`; the engine
    /// passes it back on every later call for this message.
    ReceiveTarget {
        target: &'a str,
        transport: Transport,
        response_required: bool,
        context: &'a mut Option<ReceiveContext>,
    },
    ReceiveData {
        context: &'a ReceiveContext,
        data: &'a [u8],
        more_data: bool,
    },
    ReceiveReply {
        context: &'a ReceiveContext,
        buffer: &'a mut [u8],
        bytes_used: &'a mut usize,
        more_data: &'a mut bool,
    },
    ReceiveStatus {
        context: &'a ReceiveContext,
        status: SessionStatus,
    },
    ReceiveReplyLength {
        context: &'a ReceiveContext,
        total_bytes: &'a mut usize,
    },
}

pub enum DataPointEvent<'a> {
    Response {
        context: &'a DataPointTransaction,
        response: ResponseCode,
        hint: Option<&'a str>,
    },
    Status {
        context: &'a DataPointTransaction,
        status: SessionStatus,
    },
}

pub enum FirmwareRequest<'a> {
    TargetCount {
        count: &'a mut u8,
    },
    TargetInfo {
        target: u8,
        info: &'a mut TargetInfo,
    },
    DownloadStart {
        target: u8,
        filename: &'a str,
        code_size: u32,
        status: &'a mut DownloadStatus,
    },
    DownloadData {
        target: u8,
        offset: u32,
        data: &'a [u8],
        status: &'a mut DownloadStatus,
    },
    DownloadComplete {
        target: u8,
        status: &'a mut CompleteStatus,
    },
    DownloadAbort {
        target: u8,
        status: DownloadStatus,
    },
    TargetReset {
        target: u8,
    },
}

pub enum ShortMessage<'a> {
    /// A command-line request chunk. `context` is empty on the first
    /// chunk of a new request.
    CliRequest {
        transport: Transport,
        response_required: bool,
        data: &'a [u8],
        more_data: bool,
        context: &'a mut Option<CliContext>,
    },
    CliResponse {
        context: &'a CliContext,
        buffer: &'a mut [u8],
        bytes_used: &'a mut usize,
        more_data: &'a mut bool,
    },
    CliResponseLength {
        context: &'a CliContext,
        total_bytes: &'a mut usize,
    },
    CliStatus {
        context: &'a CliContext,
        status: SessionStatus,
    },
    PingResponse {
        context: &'a PingTransaction,
        status: SessionStatus,
    },
}
