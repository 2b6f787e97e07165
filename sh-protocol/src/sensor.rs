//! Sensor identity and metadata shared between the hub and its clients.

use serde::{Deserialize, Serialize};

/// Base value for private sensor types that are never exposed to clients
pub const PRIVATE_TYPE_BASE: i32 = 0x10000;

/// Semantic sensor type.
///
/// Numeric values follow the Android sensor type numbering so event records
/// can be consumed by existing tooling. Fusion types live above
/// [`PRIVATE_TYPE_BASE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorType {
    MetaData,
    Accelerometer,
    MagneticField,
    Orientation,
    Gyroscope,
    Pressure,
    Gravity,
    LinearAcceleration,
    RotationVector,
    MagneticFieldUncalibrated,
    GameRotationVector,
    GyroscopeUncalibrated,
    SignificantMotion,
    StepDetector,
    StepCounter,
    GeomagneticRotationVector,
    TiltDetector,
    AccelMagnFusion6X,
    AccelGyroFusion6X,
    AccelMagnGyroFusion9X,
}

/// How a sensor produces events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportingMode {
    /// Fixed-rate stream, subject to pollrate negotiation and batching
    Continuous,
    /// Emits only when the value changes
    OnChange,
    /// Fires once, then disables itself
    OneShot,
    /// Discrete detector events
    Special,
}

impl SensorType {
    pub const ALL: [SensorType; 20] = [
        SensorType::MetaData,
        SensorType::Accelerometer,
        SensorType::MagneticField,
        SensorType::Orientation,
        SensorType::Gyroscope,
        SensorType::Pressure,
        SensorType::Gravity,
        SensorType::LinearAcceleration,
        SensorType::RotationVector,
        SensorType::MagneticFieldUncalibrated,
        SensorType::GameRotationVector,
        SensorType::GyroscopeUncalibrated,
        SensorType::SignificantMotion,
        SensorType::StepDetector,
        SensorType::StepCounter,
        SensorType::GeomagneticRotationVector,
        SensorType::TiltDetector,
        SensorType::AccelMagnFusion6X,
        SensorType::AccelGyroFusion6X,
        SensorType::AccelMagnGyroFusion9X,
    ];

    pub fn as_i32(self) -> i32 {
        match self {
            SensorType::MetaData => 0,
            SensorType::Accelerometer => 1,
            SensorType::MagneticField => 2,
            SensorType::Orientation => 3,
            SensorType::Gyroscope => 4,
            SensorType::Pressure => 6,
            SensorType::Gravity => 9,
            SensorType::LinearAcceleration => 10,
            SensorType::RotationVector => 11,
            SensorType::MagneticFieldUncalibrated => 14,
            SensorType::GameRotationVector => 15,
            SensorType::GyroscopeUncalibrated => 16,
            SensorType::SignificantMotion => 17,
            SensorType::StepDetector => 18,
            SensorType::StepCounter => 19,
            SensorType::GeomagneticRotationVector => 20,
            SensorType::TiltDetector => 22,
            SensorType::AccelMagnFusion6X => PRIVATE_TYPE_BASE + 1,
            SensorType::AccelGyroFusion6X => PRIVATE_TYPE_BASE + 2,
            SensorType::AccelMagnGyroFusion9X => PRIVATE_TYPE_BASE + 3,
        }
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_i32() == value)
    }

    /// Android-style string type, e.g. `android.sensor.accelerometer`
    pub fn string_type(self) -> &'static str {
        match self {
            SensorType::MetaData => "android.sensor.meta_data",
            SensorType::Accelerometer => "android.sensor.accelerometer",
            SensorType::MagneticField => "android.sensor.magnetic_field",
            SensorType::Orientation => "android.sensor.orientation",
            SensorType::Gyroscope => "android.sensor.gyroscope",
            SensorType::Pressure => "android.sensor.pressure",
            SensorType::Gravity => "android.sensor.gravity",
            SensorType::LinearAcceleration => "android.sensor.linear_acceleration",
            SensorType::RotationVector => "android.sensor.rotation_vector",
            SensorType::MagneticFieldUncalibrated => "android.sensor.magnetic_field_uncalibrated",
            SensorType::GameRotationVector => "android.sensor.game_rotation_vector",
            SensorType::GyroscopeUncalibrated => "android.sensor.gyroscope_uncalibrated",
            SensorType::SignificantMotion => "android.sensor.significant_motion",
            SensorType::StepDetector => "android.sensor.step_detector",
            SensorType::StepCounter => "android.sensor.step_counter",
            SensorType::GeomagneticRotationVector => "android.sensor.geomagnetic_rotation_vector",
            SensorType::TiltDetector => "android.sensor.tilt_detector",
            SensorType::AccelMagnFusion6X => "sensorhub.fusion.accel_magn_6x",
            SensorType::AccelGyroFusion6X => "sensorhub.fusion.accel_gyro_6x",
            SensorType::AccelMagnGyroFusion9X => "sensorhub.fusion.accel_magn_gyro_9x",
        }
    }

    /// Private types are internal graph nodes, hidden from sensor lists
    pub fn is_private(self) -> bool {
        self.as_i32() >= PRIVATE_TYPE_BASE || self == SensorType::MetaData
    }

    pub fn reporting_mode(self) -> ReportingMode {
        match self {
            SensorType::SignificantMotion => ReportingMode::OneShot,
            SensorType::StepCounter => ReportingMode::OnChange,
            SensorType::StepDetector | SensorType::TiltDetector => ReportingMode::Special,
            _ => ReportingMode::Continuous,
        }
    }

    /// Number of meaningful payload values in an event of this type
    pub fn axis_count(self) -> usize {
        match self {
            SensorType::MetaData => 0,
            SensorType::Pressure
            | SensorType::SignificantMotion
            | SensorType::StepDetector
            | SensorType::StepCounter
            | SensorType::TiltDetector => 1,
            SensorType::RotationVector
            | SensorType::GameRotationVector
            | SensorType::GeomagneticRotationVector
            | SensorType::AccelMagnFusion6X
            | SensorType::AccelGyroFusion6X
            | SensorType::AccelMagnGyroFusion9X => 4,
            SensorType::MagneticFieldUncalibrated | SensorType::GyroscopeUncalibrated => 6,
            _ => 3,
        }
    }
}

/// Static description of a sensor as listed to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorInfo {
    pub name: String,
    pub vendor: String,
    pub version: i32,
    pub handle: i32,
    pub sensor_type: SensorType,
    pub string_type: String,
    pub max_range: f32,
    pub resolution: f32,
    pub power_ma: f32,
    /// Minimum period in microseconds (0 for non-continuous sensors)
    pub min_delay_us: i32,
    /// Maximum period in microseconds
    pub max_delay_us: i32,
    pub fifo_reserved: u32,
    pub fifo_max: u32,
    pub wake_up: bool,
    pub reporting_mode: ReportingMode,
}

impl SensorInfo {
    pub fn new(name: impl Into<String>, handle: i32, sensor_type: SensorType) -> Self {
        Self {
            name: name.into(),
            vendor: "SensorHub".to_string(),
            version: 1,
            handle,
            sensor_type,
            string_type: sensor_type.string_type().to_string(),
            max_range: 0.0,
            resolution: 0.0,
            power_ma: 0.0,
            min_delay_us: 0,
            max_delay_us: 0,
            fifo_reserved: 0,
            fifo_max: 0,
            wake_up: false,
            reporting_mode: sensor_type.reporting_mode(),
        }
    }
}
