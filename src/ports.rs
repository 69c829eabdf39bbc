//! Port traits: the boundary between the connector and application code.
//!
//! ```text
//!   engine thread ──▶ Connector ──▶ worker thread ──▶ Port trait (application)
//! ```
//!
//! Applications implement these traits and hand them to
//! [`Connector::start`](crate::connector::Connector::start) through
//! [`Services`](crate::connector::Services). Every port call that may be
//! slow happens on a worker thread; the only exceptions are the short
//! notification hooks noted below, which run on the engine thread and must
//! return promptly.

use crate::config::FirmwareVersion;
use crate::engine::Transport;
use crate::error::{CliError, FirmwareDataError, FirmwareRequestError, ReceiveError};
use crate::firmware::CancelReason;

// ───────────────────────────────────────────────────────────────
// Receive port (cloud → device messages)
// ───────────────────────────────────────────────────────────────

/// Handles complete inbound messages for one or more targets.
pub trait ReceiveHandler: Send + Sync {
    /// Process one fully reassembled request. `response` is present only
    /// when the sender expects a reply; whatever is written there is
    /// streamed back. Runs on the receive worker.
    fn data(
        &self,
        target: &str,
        transport: Transport,
        request: &[u8],
        response: Option<&mut Vec<u8>>,
    ) -> Result<(), ReceiveError>;

    /// Final notification for the message, called exactly once. The
    /// response written by [`data`](Self::data) is handed back here;
    /// internally generated error replies are not. Runs on the engine
    /// thread.
    fn status(
        &self,
        _target: &str,
        _transport: Transport,
        _response: Option<Vec<u8>>,
        _error: Option<ReceiveError>,
    ) {
    }
}

/// Decides whether an unregistered target may be handled by the default
/// handler. Runs on the engine thread.
pub trait AcceptFilter: Send + Sync {
    fn accept(&self, target: &str, transport: Transport) -> bool;
}

impl<F> AcceptFilter for F
where
    F: Fn(&str, Transport) -> bool + Send + Sync,
{
    fn accept(&self, target: &str, transport: Transport) -> bool {
        self(target, transport)
    }
}

// ───────────────────────────────────────────────────────────────
// CLI port (short-message command line)
// ───────────────────────────────────────────────────────────────

pub trait CliHandler: Send + Sync {
    /// Execute one command. `output` is present only when the cloud waits
    /// for a reply. Runs on the CLI worker.
    fn request(&self, transport: Transport, command: &str, output: Option<&mut String>);

    /// Called once per command with the output produced by
    /// [`request`](Self::request) and the final error, if any.
    fn finished(&self, _output: Option<String>, _error: Option<CliError>) {}
}

// ───────────────────────────────────────────────────────────────
// Firmware port (image writer)
// ───────────────────────────────────────────────────────────────

pub trait FirmwareHandler: Send + Sync {
    /// Approve or refuse a download before any buffer is allocated.
    fn request(
        &self,
        _target: u8,
        _filename: &str,
        _code_size: u32,
    ) -> Result<(), FirmwareRequestError> {
        Ok(())
    }

    /// Write one chunk of the image. Chunks arrive strictly in offset
    /// order on the firmware worker; `last` marks the final chunk.
    fn data(&self, target: u8, offset: u32, data: &[u8], last: bool)
    -> Result<(), FirmwareDataError>;

    /// The download was abandoned after all queued chunks were written.
    fn cancel(&self, _target: u8, _reason: CancelReason) {}

    /// The cloud asks for the target to be restarted. Clear
    /// `system_reset` to skip the device reset; `version` may be updated
    /// to report the newly installed image.
    fn reset(&self, _target: u8, _system_reset: &mut bool, _version: &mut FirmwareVersion) {}
}

// ───────────────────────────────────────────────────────────────
// Device control port
// ───────────────────────────────────────────────────────────────

/// Platform actions the connector may trigger.
pub trait DeviceControl: Send + Sync {
    /// Restart the device. Returning at all means the reset failed or was
    /// deferred.
    fn reset(&self) -> anyhow::Result<()>;
}

// ───────────────────────────────────────────────────────────────
// Status port (connection events)
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepaliveStatus {
    Missed,
    Restored,
}

/// Connection lifecycle notifications. All hooks run on the engine thread.
pub trait StatusListener: Send + Sync {
    fn tcp_connected(&self) {}
    fn keepalive(&self, _status: KeepaliveStatus) {}
    fn transport_stopped(&self, _transport: Transport) {}
    /// The engine terminated on its own; the connector is no longer running.
    fn aborted(&self) {}
}
