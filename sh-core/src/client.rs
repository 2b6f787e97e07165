//! Control socket client
//!
//! Blocking client for the `sensorhubd` control socket. One request is in
//! flight at a time; after [`HubClient::subscribe`] the connection also
//! carries sensor events, which [`HubClient::next_event`] reads.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Duration;

use sh_protocol::{
    generate_request_id, Request, RequestEnvelope, Response, ResponseData, ResponseEnvelope,
    SensorEvent, SensorInfo, MAX_MESSAGE_SIZE,
};
use tracing::{debug, trace};

use crate::constants::paths;
use crate::error::{Result, SensorHubError};

const TIMEOUT: Duration = Duration::from_secs(5);

const INITIAL_BUFFER_SIZE: usize = 1024;

pub struct HubClient {
    writer: UnixStream,
    reader: BufReader<UnixStream>,
    /// Id of the subscribe request, once subscribed
    subscription: Option<u64>,
    /// Events that arrived while waiting for a reply
    backlog: VecDeque<SensorEvent>,
}

impl HubClient {
    /// Connect to the daemon's default socket
    pub fn connect_default() -> Result<Self> {
        Self::connect(Path::new(paths::SOCKET_PATH))
    }

    pub fn connect(socket: &Path) -> Result<Self> {
        let stream = UnixStream::connect(socket).map_err(|e| {
            SensorHubError::protocol(format!(
                "failed to connect to {}: {}",
                socket.display(),
                e
            ))
        })?;
        let reader = stream.try_clone()?;

        stream.set_write_timeout(Some(TIMEOUT))?;
        reader.set_read_timeout(Some(TIMEOUT))?;

        Ok(Self {
            writer: stream,
            reader: BufReader::new(reader),
            subscription: None,
            backlog: VecDeque::new(),
        })
    }

    /// Send `request` and wait for its reply
    pub fn request(&mut self, request: Request) -> Result<ResponseData> {
        request
            .validate()
            .map_err(|e| SensorHubError::protocol(format!("invalid request: {}", e)))?;

        let id = generate_request_id();
        let mut json = serde_json::to_vec(&RequestEnvelope::with_id(request.clone(), id))?;
        json.push(b'\n');
        if json.len() > MAX_MESSAGE_SIZE {
            return Err(SensorHubError::protocol(format!(
                "request of {} bytes exceeds {}",
                json.len(),
                MAX_MESSAGE_SIZE
            )));
        }

        self.writer.write_all(&json)?;
        trace!(id, cmd = request.type_name(), "Request sent");

        loop {
            let envelope = self.read_envelope()?;
            if let Some(event) = self.as_event(&envelope) {
                self.backlog.push_back(event);
                continue;
            }
            if envelope.id != id {
                return Err(SensorHubError::protocol(format!(
                    "response id mismatch: expected {}, got {}",
                    id, envelope.id
                )));
            }
            return match envelope.response {
                Response::Ok(data) => Ok(data),
                Response::Error { message } => Err(SensorHubError::protocol(message)),
            };
        }
    }

    pub fn ping(&mut self) -> Result<()> {
        self.request(Request::Ping).map(|_| ())
    }

    pub fn version(&mut self) -> Result<String> {
        self.request(Request::Version)?
            .value
            .ok_or_else(|| SensorHubError::protocol("version reply carries no value"))
    }

    pub fn sensors(&mut self) -> Result<Vec<SensorInfo>> {
        self.request(Request::ListSensors)?
            .sensors
            .ok_or_else(|| SensorHubError::protocol("sensor list reply carries no sensors"))
    }

    pub fn activate(&mut self, handle: i32, enabled: bool) -> Result<()> {
        self.request(Request::Activate { handle, enabled }).map(|_| ())
    }

    pub fn batch(&mut self, handle: i32, period_ns: i64, timeout_ns: i64) -> Result<()> {
        self.request(Request::Batch {
            handle,
            period_ns,
            timeout_ns,
        })
        .map(|_| ())
    }

    pub fn flush(&mut self, handle: i32) -> Result<()> {
        self.request(Request::Flush { handle }).map(|_| ())
    }

    /// Switch the connection to event streaming
    pub fn subscribe(&mut self) -> Result<()> {
        if self.subscription.is_some() {
            return Ok(());
        }
        let id = generate_request_id();
        let mut json = serde_json::to_vec(&RequestEnvelope::with_id(Request::Subscribe, id))?;
        json.push(b'\n');
        self.writer.write_all(&json)?;

        let envelope = self.read_envelope()?;
        match envelope.response {
            Response::Ok(_) if envelope.id == id => {
                self.subscription = Some(id);
                // streams may stay idle for long periods
                self.reader.get_ref().set_read_timeout(None)?;
                debug!(id, "Subscribed to sensor events");
                Ok(())
            }
            Response::Ok(_) => Err(SensorHubError::protocol("unexpected reply to subscribe")),
            Response::Error { message } => Err(SensorHubError::protocol(message)),
        }
    }

    /// Block until the next sensor event
    pub fn next_event(&mut self) -> Result<SensorEvent> {
        if self.subscription.is_none() {
            return Err(SensorHubError::invalid_operation("not subscribed"));
        }
        if let Some(event) = self.backlog.pop_front() {
            return Ok(event);
        }
        loop {
            let envelope = self.read_envelope()?;
            if let Some(event) = self.as_event(&envelope) {
                return Ok(event);
            }
            debug!(id = envelope.id, "Ignoring stray response");
        }
    }

    fn as_event(&self, envelope: &ResponseEnvelope) -> Option<SensorEvent> {
        if self.subscription != Some(envelope.id) {
            return None;
        }
        match &envelope.response {
            Response::Ok(data) => data.event,
            Response::Error { .. } => None,
        }
    }

    fn read_envelope(&mut self) -> Result<ResponseEnvelope> {
        let mut buf: Vec<u8> = Vec::with_capacity(INITIAL_BUFFER_SIZE);
        let n = (&mut self.reader)
            .take(MAX_MESSAGE_SIZE as u64 + 1)
            .read_until(b'\n', &mut buf)?;
        if n == 0 {
            return Err(SensorHubError::protocol("daemon closed the connection"));
        }
        if buf.last() != Some(&b'\n') {
            return Err(SensorHubError::protocol("response too large or truncated"));
        }
        buf.pop();
        Ok(serde_json::from_slice(&buf)?)
    }
}
