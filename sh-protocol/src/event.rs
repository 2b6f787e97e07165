//! Outbound event record
//!
//! Every node writes fixed-size records to one shared byte pipe. The layout
//! is little-endian and has no padding:
//!
//! | offset | size | field        |
//! |--------|------|--------------|
//! | 0      | 4    | handle       |
//! | 4      | 4    | sensor_type  |
//! | 8      | 8    | timestamp    |
//! | 16     | 4    | kind         |
//! | 20     | 4    | reserved     |
//! | 24     | 32   | values[8]    |
//! | 56     | 8    | step_count   |

use serde::{Deserialize, Serialize};

use crate::sensor::SensorType;

/// Size in bytes of one encoded event record
pub const EVENT_RECORD_SIZE: usize = 64;

/// Number of float payload slots in one record
pub const EVENT_VALUES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Data,
    FlushComplete,
}

impl EventKind {
    fn as_u32(self) -> u32 {
        match self {
            EventKind::Data => 0,
            EventKind::FlushComplete => 1,
        }
    }

    fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(EventKind::Data),
            1 => Some(EventKind::FlushComplete),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorEvent {
    pub handle: i32,
    pub sensor_type: i32,
    pub timestamp: i64,
    pub kind: EventKind,
    pub values: [f32; EVENT_VALUES],
    pub step_count: u64,
}

impl SensorEvent {
    /// Data event; extra values beyond [`EVENT_VALUES`] are ignored
    pub fn data(handle: i32, sensor_type: SensorType, timestamp: i64, values: &[f32]) -> Self {
        let mut payload = [0.0f32; EVENT_VALUES];
        let n = values.len().min(EVENT_VALUES);
        payload[..n].copy_from_slice(&values[..n]);
        Self {
            handle,
            sensor_type: sensor_type.as_i32(),
            timestamp,
            kind: EventKind::Data,
            values: payload,
            step_count: 0,
        }
    }

    pub fn step_count(handle: i32, timestamp: i64, steps: u64) -> Self {
        Self {
            handle,
            sensor_type: SensorType::StepCounter.as_i32(),
            timestamp,
            kind: EventKind::Data,
            values: [0.0; EVENT_VALUES],
            step_count: steps,
        }
    }

    /// Meta event marking the completion of a flush request for `handle`
    pub fn flush_complete(handle: i32) -> Self {
        Self {
            handle,
            sensor_type: SensorType::MetaData.as_i32(),
            timestamp: 0,
            kind: EventKind::FlushComplete,
            values: [0.0; EVENT_VALUES],
            step_count: 0,
        }
    }

    pub fn is_flush_complete(&self) -> bool {
        self.kind == EventKind::FlushComplete && self.sensor_type == SensorType::MetaData.as_i32()
    }

    pub fn encode(&self) -> [u8; EVENT_RECORD_SIZE] {
        let mut out = [0u8; EVENT_RECORD_SIZE];
        out[0..4].copy_from_slice(&self.handle.to_le_bytes());
        out[4..8].copy_from_slice(&self.sensor_type.to_le_bytes());
        out[8..16].copy_from_slice(&self.timestamp.to_le_bytes());
        out[16..20].copy_from_slice(&self.kind.as_u32().to_le_bytes());
        for (i, v) in self.values.iter().enumerate() {
            let start = 24 + i * 4;
            out[start..start + 4].copy_from_slice(&v.to_le_bytes());
        }
        out[56..64].copy_from_slice(&self.step_count.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, String> {
        if bytes.len() < EVENT_RECORD_SIZE {
            return Err(format!(
                "Event record too short: {} < {} bytes",
                bytes.len(),
                EVENT_RECORD_SIZE
            ));
        }

        let kind_raw = u32::from_le_bytes(le4(&bytes[16..20]));
        let kind = EventKind::from_u32(kind_raw)
            .ok_or_else(|| format!("Unknown event kind: {}", kind_raw))?;

        let mut values = [0.0f32; EVENT_VALUES];
        for (i, v) in values.iter_mut().enumerate() {
            let start = 24 + i * 4;
            *v = f32::from_le_bytes(le4(&bytes[start..start + 4]));
        }

        Ok(Self {
            handle: i32::from_le_bytes(le4(&bytes[0..4])),
            sensor_type: i32::from_le_bytes(le4(&bytes[4..8])),
            timestamp: i64::from_le_bytes(le8(&bytes[8..16])),
            kind,
            values,
            step_count: u64::from_le_bytes(le8(&bytes[56..64])),
        })
    }
}

fn le4(b: &[u8]) -> [u8; 4] {
    [b[0], b[1], b[2], b[3]]
}

fn le8(b: &[u8]) -> [u8; 8] {
    [b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]
}
