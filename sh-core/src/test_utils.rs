//! Fixtures shared by the unit tests

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use sh_protocol::{SensorEvent, SensorType, EVENT_RECORD_SIZE};

use crate::data::{CalibrationStore, DeviceDescriptor, Tuning};
use crate::error::{Result, SensorHubError};
use crate::fusion::{FusionChannel, FusionEngine, FusionInputs};
use crate::iio::{ChannelInfo, DeviceConfig};
use crate::node::{EventSink, SensorNode, SoftwareKind};

#[derive(Debug, Default)]
struct FakeDeviceState {
    values: HashMap<String, String>,
    failing: Vec<String>,
    toggles: Vec<bool>,
}

/// In-memory device; clones share state so tests can inspect writes
#[derive(Debug, Clone, Default)]
pub struct FakeDevice {
    state: Arc<Mutex<FakeDeviceState>>,
}

impl FakeDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later write to `key` fail
    pub fn fail_key(&self, key: &str) {
        self.state.lock().failing.push(key.to_string());
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.state.lock().values.get(key).cloned()
    }

    /// Successful buffer enable/disable calls, in order
    pub fn buffer_toggles(&self) -> Vec<bool> {
        self.state.lock().toggles.clone()
    }

    fn store(&self, key: &str, value: String) -> Result<()> {
        let mut state = self.state.lock();
        if state.failing.iter().any(|k| k == key) {
            return Err(SensorHubError::config_write("/fake", key, value, "injected failure"));
        }
        state.values.insert(key.to_string(), value);
        Ok(())
    }
}

impl DeviceConfig for FakeDevice {
    fn describe(&self) -> String {
        "fake".to_string()
    }

    fn write_int(&self, key: &str, value: i64) -> Result<()> {
        self.store(key, value.to_string())
    }

    fn read_int(&self, key: &str) -> Result<i64> {
        self.value(key)
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| SensorHubError::config_read("/fake", key, "not set"))
    }

    fn write_float(&self, key: &str, value: f32) -> Result<()> {
        self.store(key, value.to_string())
    }

    fn enable_buffer(&self, enable: bool) -> Result<()> {
        self.store("buffer/enable", u8::from(enable).to_string())?;
        self.state.lock().toggles.push(enable);
        Ok(())
    }
}

/// Sink that decodes and keeps every record
struct RecordingSink {
    events: Arc<Mutex<Vec<SensorEvent>>>,
}

impl EventSink for RecordingSink {
    fn write_event(&self, record: &[u8; EVENT_RECORD_SIZE]) -> io::Result<()> {
        let event = SensorEvent::decode(record)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.events.lock().push(event);
        Ok(())
    }
}

pub fn recording_sink() -> (Arc<dyn EventSink>, Arc<Mutex<Vec<SensorEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = RecordingSink {
        events: Arc::clone(&events),
    };
    (Arc::new(sink), events)
}

struct NullSink;

impl EventSink for NullSink {
    fn write_event(&self, _record: &[u8; EVENT_RECORD_SIZE]) -> io::Result<()> {
        Ok(())
    }
}

pub fn null_sink() -> Arc<dyn EventSink> {
    Arc::new(NullSink)
}

/// Fails the first `n` writes, then accepts
pub struct FlakySink {
    fail_first: usize,
    attempts: AtomicUsize,
    written: AtomicUsize,
}

impl FlakySink {
    pub fn failing(n: usize) -> Self {
        Self {
            fail_first: n,
            attempts: AtomicUsize::new(0),
            written: AtomicUsize::new(0),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn written(&self) -> usize {
        self.written.load(Ordering::SeqCst)
    }
}

impl EventSink for FlakySink {
    fn write_event(&self, _record: &[u8; EVENT_RECORD_SIZE]) -> io::Result<()> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.fail_first {
            return Err(io::Error::new(io::ErrorKind::WouldBlock, "pipe full"));
        }
        self.written.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Engine producing a fixed output for every channel
struct StaticEngine;

impl FusionEngine for StaticEngine {
    fn init(&mut self) -> Result<()> {
        Ok(())
    }

    fn enable(&mut self, _enable: bool) -> Result<()> {
        Ok(())
    }

    fn run(&mut self, _inputs: &FusionInputs, _timestamp: i64) -> Result<()> {
        Ok(())
    }

    fn output(&mut self, _channel: FusionChannel) -> Result<[f32; 4]> {
        Ok([0.0, 0.0, 0.0, 1.0])
    }
}

pub fn static_engine() -> Box<dyn FusionEngine> {
    Box::new(StaticEngine)
}

fn three_axis(name: &str, sensor_type: SensorType, index: u32) -> DeviceDescriptor {
    let mut desc = DeviceDescriptor::new(name, sensor_type);
    desc.iio_index = Some(index);
    desc.channels = vec![
        ChannelInfo::new(format!("{}_x", name), 2, 16).signed(),
        ChannelInfo::new(format!("{}_y", name), 2, 16).signed(),
        ChannelInfo::new(format!("{}_z", name), 2, 16).signed(),
        ChannelInfo::timestamp(),
    ];
    desc
}

/// 3 x 16-bit signed axes plus timestamp, no frequencies or scales
pub fn accel_descriptor() -> DeviceDescriptor {
    three_axis("accel", SensorType::Accelerometer, 0)
}

pub fn gyro_descriptor() -> DeviceDescriptor {
    three_axis("gyro", SensorType::Gyroscope, 1)
}

pub fn hw_node(
    handle: i32,
    descriptor: &DeviceDescriptor,
    device: FakeDevice,
    sink: Arc<dyn EventSink>,
) -> Arc<SensorNode> {
    Arc::new(
        SensorNode::hardware(
            handle,
            descriptor,
            Box::new(device),
            None,
            &CalibrationStore::new(),
            Tuning::default(),
            sink,
        )
        .expect("hardware node"),
    )
}

pub fn sw_node(handle: i32, kind: SoftwareKind, sink: Arc<dyn EventSink>) -> Arc<SensorNode> {
    let engine: Option<Box<dyn FusionEngine>> = if kind.is_fusion() {
        Some(Box::new(StaticEngine))
    } else {
        None
    };
    Arc::new(
        SensorNode::software(handle, kind, engine, Tuning::default(), sink)
            .expect("software node"),
    )
}
