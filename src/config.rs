//! Connector configuration
//!
//! Identity, cloud endpoint, submit retry tuning and the firmware target
//! table. Loaded from JSON at start-up or persisted compactly with postcard.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::StartError;

/// Longest device type the cloud accepts.
pub const DEVICE_TYPE_MAX_LEN: usize = 63;
/// Longest cloud URL (host name) the cloud accepts.
pub const CLOUD_URL_MAX_LEN: usize = 127;
/// Default number of firmware chunk buffers in flight.
pub const DEFAULT_CHUNK_POOL_SIZE: u8 = 2;

/// Core connector configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    // --- Identity ---
    /// Vendor id assigned by the cloud operator (must be non-zero)
    pub vendor_id: u32,
    /// 128-bit device id
    pub device_id: [u8; 16],
    /// Free-form device type shown in the cloud inventory
    pub device_type: heapless::String<DEVICE_TYPE_MAX_LEN>,

    // --- Endpoint ---
    /// Cloud host name shared by TCP and UDP
    pub cloud_url: heapless::String<CLOUD_URL_MAX_LEN>,

    // --- Engine submission ---
    /// Resubmission policy while the engine reports itself busy
    pub retry: RetryPolicy,

    // --- Firmware ---
    /// Chunk buffers kept in flight between engine and image writer
    pub chunk_pool_size: u8,
    /// Updatable firmware targets, indexed by target number
    pub firmware_targets: Vec<FirmwareTargetConfig>,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        let mut device_type = heapless::String::new();
        let _ = device_type.push_str("Cloudlink Device");
        let mut cloud_url = heapless::String::new();
        let _ = cloud_url.push_str("devicecloud.example.com");
        Self {
            // Identity
            vendor_id: 0,
            device_id: [0; 16],
            device_type,

            // Endpoint
            cloud_url,

            // Submission
            retry: RetryPolicy::default(),

            // Firmware
            chunk_pool_size: DEFAULT_CHUNK_POOL_SIZE,
            firmware_targets: Vec::new(),
        }
    }
}

impl ConnectorConfig {
    /// Check the fields the engine cannot run without.
    pub fn validate(&self) -> Result<(), StartError> {
        if self.vendor_id == 0 {
            return Err(StartError::InvalidVendorId);
        }
        if self.device_id.iter().all(|b| *b == 0) {
            return Err(StartError::InvalidDeviceId);
        }
        if self.cloud_url.is_empty() {
            return Err(StartError::InvalidUrl);
        }
        if self.device_type.is_empty() {
            return Err(StartError::InvalidDeviceType);
        }
        if self.chunk_pool_size == 0 || self.firmware_targets.len() > usize::from(u8::MAX) {
            return Err(StartError::InvalidFirmwareInfo);
        }
        Ok(())
    }

    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        serde_json::from_str(text).context("parsing connector config JSON")
    }

    pub fn load_json(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading connector config {}", path.display()))?;
        Self::from_json(&text)
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        serde_json::to_string(self).context("encoding connector config JSON")
    }

    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        postcard::to_allocvec(self).context("encoding connector config")
    }

    pub fn from_bytes(bytes: &[u8]) -> anyhow::Result<Self> {
        postcard::from_bytes(bytes).context("decoding connector config")
    }
}

/// Bounded exponential backoff for resubmitting a busy action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Submission attempts before giving up
    pub max_attempts: u32,
    /// First backoff interval (microseconds)
    pub initial_backoff_us: u64,
    /// Backoff ceiling (microseconds)
    pub max_backoff_us: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 200,
            initial_backoff_us: 50,  // one scheduler tick on most hosts
            max_backoff_us: 20_000, // 20 ms
        }
    }
}

impl RetryPolicy {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_micros(self.initial_backoff_us)
    }

    pub fn next_backoff(&self, current: Duration) -> Duration {
        (current * 2).min(Duration::from_micros(self.max_backoff_us))
    }
}

/// Firmware version as reported to the cloud.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
    pub revision: u8,
    pub build: u8,
}

impl FirmwareVersion {
    pub const fn new(major: u8, minor: u8, revision: u8, build: u8) -> Self {
        Self {
            major,
            minor,
            revision,
            build,
        }
    }

    /// Packed big-endian form used on the wire.
    pub const fn to_u32(self) -> u32 {
        u32::from_be_bytes([self.major, self.minor, self.revision, self.build])
    }
}

impl core::fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{}.{}.{}", self.major, self.minor, self.revision, self.build)
    }
}

/// One updatable image on the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareTargetConfig {
    pub version: FirmwareVersion,
    pub description: String,
    /// Regular expression matched by the cloud against image file names
    pub filespec: String,
    /// Largest accepted image in bytes (0 = unlimited)
    pub maximum_size: u32,
    /// Chunk buffer size in bytes (0 = default)
    pub chunk_size: u32,
}

impl Default for FirmwareTargetConfig {
    fn default() -> Self {
        Self {
            version: FirmwareVersion::new(1, 0, 0, 0),
            description: "Application".into(),
            filespec: r".*\.bin".into(),
            maximum_size: 0,
            chunk_size: 0,
        }
    }
}
