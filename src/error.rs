//! Error types for every connector operation family.
//!
//! Each family has its own closed enum so a caller matching on a send
//! result never sees receive or firmware kinds. Discriminants are the wire
//! codes reported to the cloud (0 is reserved for "no error"), and every
//! enum is `Copy` so it can be recorded in shared state and replayed later
//! from another thread.

use core::fmt;

// ---------------------------------------------------------------------------
// Lock primitive
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockError {
    /// The wait expired before the semaphore was signalled.
    Timeout,
    /// A one-shot completion was signalled twice.
    AlreadyReleased,
}

impl fmt::Display for LockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "lock acquire timed out"),
            Self::AlreadyReleased => write!(f, "completion released twice"),
        }
    }
}

// ---------------------------------------------------------------------------
// Connector lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum StartError {
    InvalidVendorId = 2,
    InvalidDeviceId = 3,
    InvalidUrl = 4,
    InvalidDeviceType = 5,
    InvalidFirmwareInfo = 8,
    ThreadFailed = 12,
}

impl fmt::Display for StartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidVendorId => write!(f, "vendor id must be non-zero"),
            Self::InvalidDeviceId => write!(f, "device id must not be all zeroes"),
            Self::InvalidUrl => write!(f, "cloud URL is empty or too long"),
            Self::InvalidDeviceType => write!(f, "device type is empty or too long"),
            Self::InvalidFirmwareInfo => write!(f, "firmware target table is invalid"),
            Self::ThreadFailed => write!(f, "worker thread could not be spawned"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopError {
    NotStarted,
}

impl fmt::Display for StopError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "connector is not running"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    NotRunning,
    AlreadyStarted,
    NotStarted,
    InitiateActionFailed,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotRunning => write!(f, "connector is not running"),
            Self::AlreadyStarted => write!(f, "transport already started"),
            Self::NotStarted => write!(f, "transport not started"),
            Self::InitiateActionFailed => write!(f, "engine rejected the transport action"),
        }
    }
}

// ---------------------------------------------------------------------------
// Send data / file
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SendError {
    NotRunning = 1,
    TransportNotStarted = 2,
    InvalidCloudPath = 4,
    InvalidContentType = 5,
    InvalidData = 6,
    InvalidLocalPath = 7,
    NotAFile = 8,
    AccessingFile = 9,
    InvalidHint = 10,
    InsufficientMemory = 11,
    LockFailed = 12,
    InitiateActionFailed = 13,
    StatusCancel = 14,
    StatusTimeout = 15,
    StatusSessionError = 16,
    ResponseBadRequest = 17,
    ResponseUnavailable = 18,
    ResponseCloudError = 19,
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotRunning => write!(f, "connector is not running"),
            Self::TransportNotStarted => write!(f, "transport not started"),
            Self::InvalidCloudPath => write!(f, "cloud path is empty"),
            Self::InvalidContentType => write!(f, "content type is empty or too long"),
            Self::InvalidData => write!(f, "payload is empty"),
            Self::InvalidLocalPath => write!(f, "local path is empty"),
            Self::NotAFile => write!(f, "local path is not a regular file"),
            Self::AccessingFile => write!(f, "local file could not be read"),
            Self::InvalidHint => write!(f, "hint buffer has no capacity"),
            Self::InsufficientMemory => write!(f, "insufficient memory"),
            Self::LockFailed => write!(f, "transaction lock failed"),
            Self::InitiateActionFailed => write!(f, "engine rejected the send"),
            Self::StatusCancel => write!(f, "session cancelled"),
            Self::StatusTimeout => write!(f, "session timed out"),
            Self::StatusSessionError => write!(f, "session error"),
            Self::ResponseBadRequest => write!(f, "cloud answered bad request"),
            Self::ResponseUnavailable => write!(f, "cloud service unavailable"),
            Self::ResponseCloudError => write!(f, "cloud reported an error"),
        }
    }
}

// ---------------------------------------------------------------------------
// Ping
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PingError {
    NotRunning = 1,
    TransportNotValid = 2,
    TransportNotStarted = 3,
    InsufficientMemory = 4,
    LockFailed = 5,
    InitiateActionFailed = 6,
    ResponseCancel = 7,
    ResponseTimeout = 8,
    ResponseError = 9,
}

impl fmt::Display for PingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotRunning => write!(f, "connector is not running"),
            Self::TransportNotValid => write!(f, "ping is only valid on UDP or SMS"),
            Self::TransportNotStarted => write!(f, "transport not started"),
            Self::InsufficientMemory => write!(f, "insufficient memory"),
            Self::LockFailed => write!(f, "transaction lock failed"),
            Self::InitiateActionFailed => write!(f, "engine rejected the ping"),
            Self::ResponseCancel => write!(f, "ping cancelled"),
            Self::ResponseTimeout => write!(f, "ping timed out"),
            Self::ResponseError => write!(f, "ping failed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Data points
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DataPointError {
    InvalidArgument = 1,
    InvalidStreamId = 2,
    InvalidFormat = 3,
    InvalidUnits = 4,
    InvalidForwardTo = 5,
    InsufficientMemory = 6,
    LockFailed = 7,
    NotRunning = 8,
    TransportNotStarted = 9,
    InitiateActionFailed = 10,
    ResponseBadRequest = 11,
    ResponseUnavailable = 12,
    ResponseCloudError = 13,
    StatusCancel = 14,
    StatusTimeout = 15,
    StatusInvalidData = 16,
    StatusSessionError = 17,
}

impl fmt::Display for DataPointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::InvalidStreamId => write!(f, "invalid or unknown stream id"),
            Self::InvalidFormat => write!(f, "invalid stream format"),
            Self::InvalidUnits => write!(f, "invalid units"),
            Self::InvalidForwardTo => write!(f, "invalid forward-to list"),
            Self::InsufficientMemory => write!(f, "insufficient memory"),
            Self::LockFailed => write!(f, "lock failed"),
            Self::NotRunning => write!(f, "connector is not running"),
            Self::TransportNotStarted => write!(f, "transport not started"),
            Self::InitiateActionFailed => write!(f, "engine rejected the upload"),
            Self::ResponseBadRequest => write!(f, "cloud answered bad request"),
            Self::ResponseUnavailable => write!(f, "cloud service unavailable"),
            Self::ResponseCloudError => write!(f, "cloud reported an error"),
            Self::StatusCancel => write!(f, "upload cancelled"),
            Self::StatusTimeout => write!(f, "upload timed out"),
            Self::StatusInvalidData => write!(f, "engine reported invalid data"),
            Self::StatusSessionError => write!(f, "session error"),
        }
    }
}

// ---------------------------------------------------------------------------
// Receive service
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ReceiveError {
    NotRunning = 1,
    NoReceiveSupport = 2,
    InsufficientMemory = 3,
    InvalidTarget = 4,
    TargetNotAdded = 5,
    TargetAlreadyAdded = 6,
    InvalidDataCb = 7,
    LockFailed = 8,
    UserRefusedTarget = 9,
    RequestTooBig = 10,
    StatusCancel = 11,
    StatusTimeout = 12,
    StatusSessionError = 13,
}

impl ReceiveError {
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Symbolic name used in synthesised error responses.
    pub const fn name(self) -> &'static str {
        match self {
            Self::NotRunning => "NOT_RUNNING",
            Self::NoReceiveSupport => "NO_RECEIVE_SUPPORT",
            Self::InsufficientMemory => "INSUFFICIENT_MEMORY",
            Self::InvalidTarget => "INVALID_TARGET",
            Self::TargetNotAdded => "TARGET_NOT_ADDED",
            Self::TargetAlreadyAdded => "TARGET_ALREADY_ADDED",
            Self::InvalidDataCb => "INVALID_DATA_CB",
            Self::LockFailed => "LOCK_FAILED",
            Self::UserRefusedTarget => "USER_REFUSED_TARGET",
            Self::RequestTooBig => "REQUEST_TOO_BIG",
            Self::StatusCancel => "STATUS_CANCEL",
            Self::StatusTimeout => "STATUS_TIMEOUT",
            Self::StatusSessionError => "STATUS_SESSION_ERROR",
        }
    }
}

impl fmt::Display for ReceiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotRunning => write!(f, "connector is not running"),
            Self::NoReceiveSupport => write!(f, "receive service not configured"),
            Self::InsufficientMemory => write!(f, "insufficient memory"),
            Self::InvalidTarget => write!(f, "target name is empty"),
            Self::TargetNotAdded => write!(f, "target is not registered"),
            Self::TargetAlreadyAdded => write!(f, "target is already registered"),
            Self::InvalidDataCb => write!(f, "no handler for target"),
            Self::LockFailed => write!(f, "lock failed"),
            Self::UserRefusedTarget => write!(f, "target refused by accept hook"),
            Self::RequestTooBig => write!(f, "request exceeds the target size limit"),
            Self::StatusCancel => write!(f, "session cancelled"),
            Self::StatusTimeout => write!(f, "session timed out"),
            Self::StatusSessionError => write!(f, "session error"),
        }
    }
}

// ---------------------------------------------------------------------------
// CLI service
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CliError {
    NoCliSupport = 1,
    InsufficientMemory = 2,
    StatusCancel = 3,
    StatusError = 4,
}

impl CliError {
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Symbolic name used in synthesised error responses. Session-level
    /// kinds never produce a response, so they share a generic label.
    pub const fn name(self) -> &'static str {
        match self {
            Self::NoCliSupport => "NO_CLI_SUPPORT",
            Self::InsufficientMemory => "INSUFFICIENT_MEMORY",
            Self::StatusCancel | Self::StatusError => "Unexpected error",
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoCliSupport => write!(f, "CLI service not configured"),
            Self::InsufficientMemory => write!(f, "insufficient memory"),
            Self::StatusCancel => write!(f, "session cancelled"),
            Self::StatusError => write!(f, "session error"),
        }
    }
}

// ---------------------------------------------------------------------------
// Firmware update
// ---------------------------------------------------------------------------

/// Reasons a download request hook may refuse an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FirmwareRequestError {
    Denied = 1,
    InvalidSize = 2,
    InvalidVersion = 3,
    Unauthenticated = 4,
    NotAllowed = 5,
    ConfiguredToReject = 6,
    EncounteredError = 7,
}

impl fmt::Display for FirmwareRequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Denied => write!(f, "download denied"),
            Self::InvalidSize => write!(f, "image size rejected"),
            Self::InvalidVersion => write!(f, "image version rejected"),
            Self::Unauthenticated => write!(f, "download not authenticated"),
            Self::NotAllowed => write!(f, "download not allowed"),
            Self::ConfiguredToReject => write!(f, "device configured to reject downloads"),
            Self::EncounteredError => write!(f, "download request failed"),
        }
    }
}

/// Reported by the image writer for a chunk it cannot accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareDataError {
    InvalidData,
}

impl fmt::Display for FirmwareDataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidData => write!(f, "invalid firmware data"),
        }
    }
}

// ---------------------------------------------------------------------------
// Umbrella error
// ---------------------------------------------------------------------------

/// Any connector error, for applications that funnel several families
/// through one `?` chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    Start(StartError),
    Stop(StopError),
    Transport(TransportError),
    Send(SendError),
    Ping(PingError),
    DataPoint(DataPointError),
    Receive(ReceiveError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start(e) => write!(f, "start: {e}"),
            Self::Stop(e) => write!(f, "stop: {e}"),
            Self::Transport(e) => write!(f, "transport: {e}"),
            Self::Send(e) => write!(f, "send: {e}"),
            Self::Ping(e) => write!(f, "ping: {e}"),
            Self::DataPoint(e) => write!(f, "data point: {e}"),
            Self::Receive(e) => write!(f, "receive: {e}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<StartError> for Error {
    fn from(e: StartError) -> Self {
        Self::Start(e)
    }
}

impl From<StopError> for Error {
    fn from(e: StopError) -> Self {
        Self::Stop(e)
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<SendError> for Error {
    fn from(e: SendError) -> Self {
        Self::Send(e)
    }
}

impl From<PingError> for Error {
    fn from(e: PingError) -> Self {
        Self::Ping(e)
    }
}

impl From<DataPointError> for Error {
    fn from(e: DataPointError) -> Self {
        Self::DataPoint(e)
    }
}

impl From<ReceiveError> for Error {
    fn from(e: ReceiveError) -> Self {
        Self::Receive(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, Error>;
