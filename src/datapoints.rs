//! Data point collections and their upload.
//!
//! A [`DataPointCollection`] holds named streams, each declared with a
//! format string such as `"double ts_epoch qual"`. Points added to a
//! stream must carry exactly the fields its format names. Flushing the
//! collection sends every stream in one rendezvous and empties the streams
//! on success.
//!
//! Streams are sent newest first: the most recently added stream leads the
//! upload. Points inside a stream keep their insertion order.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};
use serde::Serialize;

use crate::connector::Connector;
use crate::engine::{Action, CallbackStatus, DataPointRequest, ResponseCode, SessionStatus, Transport};
use crate::error::DataPointError;
use crate::rendezvous::{self, LocalErrors, Outcome, Transaction};
use crate::send::{HintBuffer, truncate_hint};
use crate::sync::{self, Timeout};

/// Characters allowed in stream ids besides ASCII alphanumerics.
const STREAM_ID_SPECIALS: &str = "_-./[]!+:";

const MAX_FORMAT_KEYWORDS: usize = 4;

// ── Format ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DataType {
    Int32,
    Int64,
    Float,
    Double,
    String,
    Json,
    GeoJson,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TimestampKind {
    Epoch,
    EpochMs,
    Iso8601,
}

/// Parsed stream format: one data type plus optional timestamp, location
/// and quality fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StreamFormat {
    pub data_type: DataType,
    pub timestamp: Option<TimestampKind>,
    pub location: bool,
    pub quality: bool,
}

enum Keyword {
    Data(DataType),
    Timestamp(TimestampKind),
    Location,
    Quality,
}

impl Keyword {
    fn parse(word: &str) -> Option<Self> {
        Some(match word {
            "int32" => Self::Data(DataType::Int32),
            "int64" => Self::Data(DataType::Int64),
            "float" => Self::Data(DataType::Float),
            "double" => Self::Data(DataType::Double),
            "string" => Self::Data(DataType::String),
            "json" => Self::Data(DataType::Json),
            "geojson" => Self::Data(DataType::GeoJson),
            "ts_epoch" => Self::Timestamp(TimestampKind::Epoch),
            "ts_epoch_ms" => Self::Timestamp(TimestampKind::EpochMs),
            "ts_iso" => Self::Timestamp(TimestampKind::Iso8601),
            "loc" => Self::Location,
            "qual" => Self::Quality,
            _ => return None,
        })
    }
}

impl FromStr for StreamFormat {
    type Err = DataPointError;

    fn from_str(format: &str) -> Result<Self, Self::Err> {
        let well_formed = !format.is_empty()
            && !format.starts_with(' ')
            && format
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == ' ' || c == '_');
        if !well_formed {
            return Err(DataPointError::InvalidFormat);
        }

        let words: Vec<&str> = format.strip_suffix(' ').unwrap_or(format).split(' ').collect();
        if words.len() > MAX_FORMAT_KEYWORDS {
            debug!("DP: too many keywords in '{}'", format);
            return Err(DataPointError::InvalidFormat);
        }

        let mut data_type = None;
        let mut timestamp = None;
        let mut location = false;
        let mut quality = false;

        for word in words {
            let keyword = Keyword::parse(word).ok_or_else(|| {
                debug!("DP: unknown keyword '{}'", word);
                DataPointError::InvalidFormat
            })?;
            let duplicate = match keyword {
                Keyword::Data(t) => data_type.replace(t).is_some(),
                Keyword::Timestamp(k) => timestamp.replace(k).is_some(),
                Keyword::Location => std::mem::replace(&mut location, true),
                Keyword::Quality => std::mem::replace(&mut quality, true),
            };
            if duplicate {
                debug!("DP: ambiguous keyword '{}' in '{}'", word, format);
                return Err(DataPointError::InvalidFormat);
            }
        }

        Ok(Self {
            data_type: data_type.ok_or(DataPointError::InvalidFormat)?,
            timestamp,
            location,
            quality,
        })
    }
}

// ── Points ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PointValue {
    Int32(i32),
    Int64(i64),
    Float(f32),
    Double(f64),
    String(String),
    Json(String),
    GeoJson(String),
}

impl PointValue {
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Int32(_) => DataType::Int32,
            Self::Int64(_) => DataType::Int64,
            Self::Float(_) => DataType::Float,
            Self::Double(_) => DataType::Double,
            Self::String(_) => DataType::String,
            Self::Json(_) => DataType::Json,
            Self::GeoJson(_) => DataType::GeoJson,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Timestamp {
    Epoch { seconds: u32, milliseconds: u32 },
    EpochMs(u64),
    Iso8601(String),
}

impl Timestamp {
    pub fn kind(&self) -> TimestampKind {
        match self {
            Self::Epoch { .. } => TimestampKind::Epoch,
            Self::EpochMs(_) => TimestampKind::EpochMs,
            Self::Iso8601(_) => TimestampKind::Iso8601,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataPoint {
    pub value: PointValue,
    pub timestamp: Option<Timestamp>,
    pub location: Option<Location>,
    pub quality: Option<i32>,
}

impl DataPoint {
    pub fn new(value: PointValue) -> Self {
        Self {
            value,
            timestamp: None,
            location: None,
            quality: None,
        }
    }

    #[must_use]
    pub fn at(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    #[must_use]
    pub fn located(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    #[must_use]
    pub fn quality(mut self, quality: i32) -> Self {
        self.quality = Some(quality);
        self
    }

    fn matches(&self, format: &StreamFormat) -> bool {
        self.value.data_type() == format.data_type
            && self.timestamp.as_ref().map(Timestamp::kind) == format.timestamp
            && self.location.is_some() == format.location
            && self.quality.is_some() == format.quality
    }
}

// ── Streams and collection ────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataStream {
    pub stream_id: String,
    pub format: StreamFormat,
    pub units: Option<String>,
    pub forward_to: Option<String>,
    pub points: Vec<DataPoint>,
}

fn valid_stream_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || STREAM_ID_SPECIALS.contains(c))
}

/// Thread-safe set of streams waiting to be uploaded.
#[derive(Debug, Default)]
pub struct DataPointCollection {
    streams: Mutex<Vec<DataStream>>,
}

impl DataPointCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_stream(&self, stream_id: &str, format: &str) -> Result<(), DataPointError> {
        self.add_stream_with(stream_id, format, None, None)
    }

    /// Declare a stream with optional units and forward-to list.
    pub fn add_stream_with(
        &self,
        stream_id: &str,
        format: &str,
        units: Option<&str>,
        forward_to: Option<&str>,
    ) -> Result<(), DataPointError> {
        if !valid_stream_id(stream_id) {
            return Err(DataPointError::InvalidStreamId);
        }
        let format: StreamFormat = format.parse()?;
        if forward_to.is_some_and(|f| !valid_stream_id(f)) {
            return Err(DataPointError::InvalidForwardTo);
        }
        if units.is_some_and(str::is_empty) {
            return Err(DataPointError::InvalidUnits);
        }

        let mut streams = sync::lock(&self.streams);
        if streams.iter().any(|s| s.stream_id == stream_id) {
            return Err(DataPointError::InvalidStreamId);
        }
        streams.insert(
            0,
            DataStream {
                stream_id: stream_id.to_owned(),
                format,
                units: units.map(str::to_owned),
                forward_to: forward_to.map(str::to_owned),
                points: Vec::new(),
            },
        );
        debug!("DP[{}]: stream added ({})", stream_id, format.data_type);
        Ok(())
    }

    /// Drop a stream and any points still queued on it.
    pub fn remove_stream(&self, stream_id: &str) -> Result<(), DataPointError> {
        if !valid_stream_id(stream_id) {
            return Err(DataPointError::InvalidStreamId);
        }
        let mut streams = sync::lock(&self.streams);
        let index = streams
            .iter()
            .position(|s| s.stream_id == stream_id)
            .ok_or(DataPointError::InvalidStreamId)?;
        streams.remove(index);
        Ok(())
    }

    pub fn add(&self, stream_id: &str, point: DataPoint) -> Result<(), DataPointError> {
        if !valid_stream_id(stream_id) {
            return Err(DataPointError::InvalidStreamId);
        }
        let mut streams = sync::lock(&self.streams);
        let stream = streams
            .iter_mut()
            .find(|s| s.stream_id == stream_id)
            .ok_or(DataPointError::InvalidStreamId)?;
        if !point.matches(&stream.format) {
            warn!("DP[{}]: point does not match stream format", stream_id);
            return Err(DataPointError::InvalidArgument);
        }
        stream.points.push(point);
        Ok(())
    }

    pub fn point_count(&self) -> usize {
        sync::lock(&self.streams).iter().map(|s| s.points.len()).sum()
    }

    pub fn stream_count(&self) -> usize {
        sync::lock(&self.streams).len()
    }

    /// Discard queued points, keeping the stream declarations.
    pub fn clear(&self) {
        for stream in sync::lock(&self.streams).iter_mut() {
            stream.points.clear();
        }
    }
}

// ── Upload ────────────────────────────────────────────────────

pub struct DataPointState {
    outcome: Outcome<DataPointError>,
    hint_capacity: usize,
    hint: Option<String>,
}

pub type DataPointTransaction = Transaction<DataPointState>;

impl Connector {
    pub fn send_collection(
        &self,
        transport: Transport,
        collection: &DataPointCollection,
    ) -> Result<(), DataPointError> {
        self.flush(transport, collection, None)
    }

    /// Upload and wait up to `timeout` for the cloud's verdict.
    pub fn send_collection_with_reply(
        &self,
        transport: Transport,
        collection: &DataPointCollection,
        timeout: Timeout,
        hint: Option<&mut HintBuffer>,
    ) -> Result<(), DataPointError> {
        self.flush(transport, collection, Some((timeout, hint)))
    }

    fn flush(
        &self,
        transport: Transport,
        collection: &DataPointCollection,
        reply: Option<(Timeout, Option<&mut HintBuffer>)>,
    ) -> Result<(), DataPointError> {
        if collection.stream_count() == 0 {
            return Err(DataPointError::InvalidArgument);
        }
        if !self.is_running() {
            return Err(DataPointError::NotRunning);
        }
        if !self.inner.transport_started(transport) {
            return Err(DataPointError::TransportNotStarted);
        }

        let with_reply = reply.is_some();
        let (timeout, mut hint) = reply.unwrap_or((Timeout::Infinite, None));

        let mut outcome = Outcome::new();
        if with_reply {
            outcome.response = Some(DataPointError::InitiateActionFailed);
        }
        let tx = Transaction::new(DataPointState {
            outcome,
            hint_capacity: hint.as_ref().map_or(0, |h| h.capacity()),
            hint: None,
        });

        // Held across the wait so points added meanwhile are not cleared.
        let mut streams = sync::lock(&collection.streams);
        let action = Action::DataPoints(DataPointRequest {
            transport,
            response_required: with_reply,
            timeout_secs: timeout.as_secs(),
            streams: streams.clone(),
            context: Arc::clone(&tx),
        });

        rendezvous::perform(
            &self.inner,
            action,
            &tx,
            timeout,
            LocalErrors {
                initiate_failed: DataPointError::InitiateActionFailed,
                lock_failed: DataPointError::LockFailed,
            },
        )?;

        let state = tx.state();
        if let (Some(buf), Some(text)) = (hint.as_deref_mut(), state.hint.as_ref()) {
            buf.store(text);
        }
        state.outcome.resolve(with_reply)?;

        let sent: usize = streams.iter().map(|s| s.points.len()).sum();
        for stream in streams.iter_mut() {
            stream.points.clear();
        }
        info!("DP: uploaded {} points in {} streams", sent, streams.len());
        Ok(())
    }
}

pub(crate) fn on_response(
    tx: &DataPointTransaction,
    response: ResponseCode,
    hint: Option<&str>,
) -> CallbackStatus {
    let mut state = tx.state();
    state.outcome.response = match response {
        ResponseCode::Success => None,
        ResponseCode::BadRequest => Some(DataPointError::ResponseBadRequest),
        ResponseCode::Unavailable => Some(DataPointError::ResponseUnavailable),
        ResponseCode::CloudError => Some(DataPointError::ResponseCloudError),
    };
    if let Some(hint) = hint {
        if state.hint_capacity > 0 {
            state.hint = Some(truncate_hint(hint, state.hint_capacity));
        }
    }
    CallbackStatus::Continue
}

pub(crate) fn on_status(tx: &DataPointTransaction, status: SessionStatus) -> CallbackStatus {
    tx.state().outcome.status = match status {
        SessionStatus::Complete => None,
        SessionStatus::Cancel => Some(DataPointError::StatusCancel),
        SessionStatus::Timeout => Some(DataPointError::StatusTimeout),
        SessionStatus::InvalidData => Some(DataPointError::StatusInvalidData),
        SessionStatus::SessionError => Some(DataPointError::StatusSessionError),
    };
    tx.complete()
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keyword = match self {
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Float => "float",
            Self::Double => "double",
            Self::String => "string",
            Self::Json => "json",
            Self::GeoJson => "geojson",
        };
        f.write_str(keyword)
    }
}
