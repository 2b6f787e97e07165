mod event;
mod sensor;

pub use event::{EventKind, SensorEvent, EVENT_RECORD_SIZE, EVENT_VALUES};
pub use sensor::{ReportingMode, SensorInfo, SensorType, PRIVATE_TYPE_BASE};

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Global request ID counter for correlation
static REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Maximum message size for IPC (8KB)
pub const MAX_MESSAGE_SIZE: usize = 8 * 1024;

/// Highest sensor handle a client may address
pub const MAX_SENSOR_HANDLE: i32 = 63;

/// Longest batching timeout a client may request (one hour)
const MAX_TIMEOUT_NS: i64 = 3_600 * 1_000_000_000;

/// Generate a unique request ID for correlation
pub fn generate_request_id() -> u64 {
    REQUEST_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Unique request ID for correlation and debugging
    pub id: u64,
    /// The actual request
    #[serde(flatten)]
    pub request: Request,
}

impl RequestEnvelope {
    pub fn new(request: Request) -> Self {
        Self {
            id: generate_request_id(),
            request,
        }
    }

    pub fn with_id(request: Request, id: u64) -> Self {
        Self { id, request }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "cmd", content = "data")]
pub enum Request {
    Ping,
    Version,
    ListSensors,
    Activate { handle: i32, enabled: bool },
    /// Set sampling period and maximum report latency
    Batch { handle: i32, period_ns: i64, timeout_ns: i64 },
    Flush { handle: i32 },
    /// Switch this connection to event streaming
    Subscribe,
}

impl Request {
    /// Validate request parameters before sending to daemon
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Request::Ping | Request::Version | Request::ListSensors | Request::Subscribe => Ok(()),

            Request::Activate { handle, enabled: _ } => validate_handle(*handle),

            Request::Batch { handle, period_ns, timeout_ns } => {
                validate_handle(*handle)?;
                validate_period(*period_ns)?;
                validate_timeout(*timeout_ns)?;
                Ok(())
            }

            Request::Flush { handle } => validate_handle(*handle),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Request::Ping => "Ping",
            Request::Version => "Version",
            Request::ListSensors => "ListSensors",
            Request::Activate { .. } => "Activate",
            Request::Batch { .. } => "Batch",
            Request::Flush { .. } => "Flush",
            Request::Subscribe => "Subscribe",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Request ID this response corresponds to
    pub id: u64,
    /// The actual response
    #[serde(flatten)]
    pub response: Response,
}

impl ResponseEnvelope {
    pub fn new(id: u64, response: Response) -> Self {
        Self { id, response }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum Response {
    #[serde(rename = "ok")]
    Ok(ResponseData),
    #[serde(rename = "error")]
    Error { message: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sensors: Option<Vec<SensorInfo>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<SensorEvent>,
}

impl ResponseData {
    pub fn none() -> Self { Self::default() }
    pub fn string(v: String) -> Self { Self { value: Some(v), ..Self::default() } }
    pub fn sensor_list(s: Vec<SensorInfo>) -> Self { Self { sensors: Some(s), ..Self::default() } }
    pub fn sensor_event(e: SensorEvent) -> Self { Self { event: Some(e), ..Self::default() } }
}

impl Response {
    pub fn ok() -> Self {
        Response::Ok(ResponseData::none())
    }

    pub fn ok_string(s: impl Into<String>) -> Self {
        Response::Ok(ResponseData::string(s.into()))
    }

    pub fn ok_sensors(s: Vec<SensorInfo>) -> Self {
        Response::Ok(ResponseData::sensor_list(s))
    }

    pub fn ok_event(e: SensorEvent) -> Self {
        Response::Ok(ResponseData::sensor_event(e))
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Response::Error { message: msg.into() }
    }
}

pub fn validate_handle(handle: i32) -> Result<(), String> {
    if handle < 1 || handle > MAX_SENSOR_HANDLE {
        return Err(format!("Handle out of range (1-{})", MAX_SENSOR_HANDLE));
    }
    Ok(())
}

pub fn validate_period(period_ns: i64) -> Result<(), String> {
    if period_ns < 0 {
        return Err("Period cannot be negative".into());
    }
    Ok(())
}

pub fn validate_timeout(timeout_ns: i64) -> Result<(), String> {
    if timeout_ns < 0 {
        return Err("Timeout cannot be negative".into());
    }
    if timeout_ns > MAX_TIMEOUT_NS && timeout_ns != i64::MAX {
        return Err("Timeout too long (maximum 1 hour)".into());
    }
    Ok(())
}
