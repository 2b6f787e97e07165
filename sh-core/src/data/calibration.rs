//! Per-sensor calibration: mounting matrix and bias
//!
//! The store is built once (from configuration) and handed to every node
//! at construction time. Nodes only read from it.

use serde::{Deserialize, Serialize};
use sh_protocol::SensorType;
use std::collections::HashMap;

/// Calibration for one three-axis sensor type
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisCalibration {
    /// Subtracted from the rotated raw value to get the processed value
    #[serde(default)]
    pub bias: [f32; 3],
    /// Mounting matrix mapping device axes onto the board frame
    #[serde(default = "identity_matrix")]
    pub matrix: [[f32; 3]; 3],
}

fn identity_matrix() -> [[f32; 3]; 3] {
    [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]
}

impl Default for AxisCalibration {
    fn default() -> Self {
        Self {
            bias: [0.0; 3],
            matrix: identity_matrix(),
        }
    }
}

impl AxisCalibration {
    pub fn rotate(&self, v: [f32; 3]) -> [f32; 3] {
        let m = &self.matrix;
        [
            m[0][0] * v[0] + m[0][1] * v[1] + m[0][2] * v[2],
            m[1][0] * v[0] + m[1][1] * v[1] + m[1][2] * v[2],
            m[2][0] * v[0] + m[2][1] * v[1] + m[2][2] * v[2],
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CalibrationStore {
    entries: HashMap<SensorType, AxisCalibration>,
}

impl CalibrationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sensor_type: SensorType, calibration: AxisCalibration) -> Self {
        self.entries.insert(sensor_type, calibration);
        self
    }

    /// Calibration for a type, identity with zero bias when none was loaded
    pub fn get(&self, sensor_type: SensorType) -> AxisCalibration {
        self.entries.get(&sensor_type).copied().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
