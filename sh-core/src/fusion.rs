//! Contract between fusion nodes and a sensor fusion library
//!
//! The hub does not implement fusion math. A fusion node feeds the engine
//! time-aligned inputs on every primary sample and reads back one output
//! per channel it publishes. `init` runs once at graph construction and
//! `enable(true)` precedes any `run` or `output`. When a secondary input is
//! missing, `run` is skipped for that primary sample and `output` returns
//! whatever the engine last computed. An engine with nothing computed yet
//! may return an error from `output`; that channel is then not published.

use sh_protocol::SensorType;

use crate::data::Sample;
use crate::error::Result;

/// Output channel of a fusion engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FusionChannel {
    RotationVector,
    GameRotationVector,
    GeomagneticRotationVector,
    Orientation,
    Gravity,
    LinearAcceleration,
}

impl FusionChannel {
    /// Sensor type fed from this channel
    pub fn sensor_type(self) -> SensorType {
        match self {
            FusionChannel::RotationVector => SensorType::RotationVector,
            FusionChannel::GameRotationVector => SensorType::GameRotationVector,
            FusionChannel::GeomagneticRotationVector => SensorType::GeomagneticRotationVector,
            FusionChannel::Orientation => SensorType::Orientation,
            FusionChannel::Gravity => SensorType::Gravity,
            FusionChannel::LinearAcceleration => SensorType::LinearAcceleration,
        }
    }

    pub fn for_sensor(sensor_type: SensorType) -> Option<Self> {
        match sensor_type {
            SensorType::RotationVector => Some(FusionChannel::RotationVector),
            SensorType::GameRotationVector => Some(FusionChannel::GameRotationVector),
            SensorType::GeomagneticRotationVector => Some(FusionChannel::GeomagneticRotationVector),
            SensorType::Orientation => Some(FusionChannel::Orientation),
            SensorType::Gravity => Some(FusionChannel::Gravity),
            SensorType::LinearAcceleration => Some(FusionChannel::LinearAcceleration),
            _ => None,
        }
    }
}

/// Inputs for one engine step; absent roles are `None`
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FusionInputs {
    pub accel: Option<Sample>,
    pub magn: Option<Sample>,
    pub gyro: Option<Sample>,
    /// Set when any secondary input is outside the alignment band
    pub stale: bool,
}

impl FusionInputs {
    /// Place a sample in the role its producer type maps to
    pub fn set(&mut self, sensor_type: SensorType, sample: Sample) {
        match sensor_type {
            SensorType::Accelerometer => self.accel = Some(sample),
            SensorType::MagneticField => self.magn = Some(sample),
            SensorType::Gyroscope => self.gyro = Some(sample),
            _ => {}
        }
    }
}

/// Result of looking for a secondary input matching a primary timestamp
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AlignmentOutcome {
    /// Within the upper skew band of the primary
    Aligned(Sample),
    /// Best available sample, but outside the band after all retries
    Stale(Sample),
    /// Nothing was available
    Missing,
}

impl AlignmentOutcome {
    pub fn sample(&self) -> Option<Sample> {
        match self {
            AlignmentOutcome::Aligned(s) | AlignmentOutcome::Stale(s) => Some(*s),
            AlignmentOutcome::Missing => None,
        }
    }
}

/// A sensor fusion library instance
#[cfg_attr(test, mockall::automock)]
pub trait FusionEngine: Send {
    fn init(&mut self) -> Result<()>;

    fn enable(&mut self, enable: bool) -> Result<()>;

    fn run(&mut self, inputs: &FusionInputs, timestamp: i64) -> Result<()>;

    fn output(&mut self, channel: FusionChannel) -> Result<[f32; 4]>;
}

/// Builds an engine for a fusion node type, `None` when unsupported
pub type EngineFactory = dyn Fn(SensorType) -> Option<Box<dyn FusionEngine>> + Send + Sync;
