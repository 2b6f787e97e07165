//! Hub configuration
//!
//! The hub is described by one JSON document: tuning knobs for the
//! dataflow engine, the IIO devices to drive, the virtual sensors to build
//! on top of them, and per-sensor calibration.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sh_protocol::SensorType;
use tracing::{debug, info};

use crate::constants::{delivery, fusion, limits, paths, HW_POLL_TIMEOUT};
use crate::data::calibration::CalibrationStore;
use crate::data::validation::validate_config;
use crate::error::{Result, SensorHubError};
use crate::iio::ChannelInfo;

/// Timing knobs of the dataflow engine
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tuning {
    /// Delivery gate: a sample passes at `lower/den` of the period
    pub skew_lower_num: i64,
    /// Fusion alignment band: `upper/den` of the period
    pub skew_upper_num: i64,
    pub skew_den: i64,
    pub align_retry_count: u32,
    pub align_retry_sleep_us: u64,
    pub min_fusion_pollrate_hz: f64,
    pub hw_poll_timeout_ms: u64,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            skew_lower_num: delivery::SKEW_LOWER_NUM,
            skew_upper_num: delivery::SKEW_UPPER_NUM,
            skew_den: delivery::SKEW_DEN,
            align_retry_count: fusion::ALIGN_RETRY_COUNT,
            align_retry_sleep_us: fusion::ALIGN_RETRY_SLEEP_US,
            min_fusion_pollrate_hz: fusion::MIN_FUSION_POLLRATE_HZ,
            hw_poll_timeout_ms: HW_POLL_TIMEOUT.as_millis() as u64,
        }
    }
}

impl Tuning {
    fn scaled(period_ns: i64, num: i64, den: i64) -> i64 {
        let den = den.max(1);
        let v = i128::from(period_ns) * i128::from(num) / i128::from(den);
        v.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
    }

    pub fn lower_skew(&self, period_ns: i64) -> i64 {
        Self::scaled(period_ns, self.skew_lower_num, self.skew_den)
    }

    pub fn upper_skew(&self, period_ns: i64) -> i64 {
        Self::scaled(period_ns, self.skew_upper_num, self.skew_den)
    }

    pub fn align_retry_sleep(&self) -> Duration {
        Duration::from_micros(self.align_retry_sleep_us)
    }

    pub fn hw_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.hw_poll_timeout_ms)
    }
}

/// One physical IIO device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub name: String,
    pub sensor_type: SensorType,
    /// `N` in `iio:deviceN`; used when explicit paths are absent
    #[serde(default)]
    pub iio_index: Option<u32>,
    #[serde(default)]
    pub sysfs_path: Option<PathBuf>,
    #[serde(default)]
    pub dev_path: Option<PathBuf>,
    /// Scan channels in kernel order, timestamp included
    #[serde(default)]
    pub channels: Vec<ChannelInfo>,
    /// Available sampling frequencies in Hz
    #[serde(default)]
    pub sampling_frequencies: Vec<f64>,
    /// Available full-scale values
    #[serde(default)]
    pub scales: Vec<f32>,
    /// Hardware FIFO depth in samples, 0 when the device cannot batch
    #[serde(default)]
    pub fifo_max: u32,
    /// Requested full-scale range in physical units
    #[serde(default)]
    pub full_scale_range: Option<f32>,
    #[serde(default)]
    pub power_ma: f32,
    #[serde(default)]
    pub wake_up: bool,
}

impl DeviceDescriptor {
    pub fn new(name: impl Into<String>, sensor_type: SensorType) -> Self {
        Self {
            name: name.into(),
            sensor_type,
            iio_index: None,
            sysfs_path: None,
            dev_path: None,
            channels: Vec::new(),
            sampling_frequencies: Vec::new(),
            scales: Vec::new(),
            fifo_max: 0,
            full_scale_range: None,
            power_ma: 0.0,
            wake_up: false,
        }
    }

    pub fn sysfs_dir(&self) -> Option<PathBuf> {
        self.sysfs_path
            .clone()
            .or_else(|| self.iio_index.map(paths::iio_sysfs_dir))
    }

    pub fn dev_node(&self) -> Option<PathBuf> {
        self.dev_path
            .clone()
            .or_else(|| self.iio_index.map(paths::iio_dev_node))
    }

    /// Channel kind used in `in_<kind>_scale`
    pub fn scale_kind(&self) -> Option<&'static str> {
        match self.sensor_type {
            SensorType::Accelerometer => Some("accel"),
            SensorType::MagneticField => Some("magn"),
            SensorType::Gyroscope => Some("anglvel"),
            SensorType::Pressure => Some("pressure"),
            _ => None,
        }
    }

    /// Devices that report through the event descriptor only
    pub fn is_event_driven(&self) -> bool {
        matches!(
            self.sensor_type,
            SensorType::StepDetector | SensorType::TiltDetector | SensorType::SignificantMotion
        )
    }

    pub fn max_frequency(&self) -> Option<f64> {
        self.sampling_frequencies
            .iter()
            .copied()
            .fold(None, |acc, f| Some(acc.map_or(f, |a: f64| a.max(f))))
    }

    pub fn min_frequency(&self) -> Option<f64> {
        self.sampling_frequencies
            .iter()
            .copied()
            .fold(None, |acc, f| Some(acc.map_or(f, |a: f64| a.min(f))))
    }
}

/// Complete hub description
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default)]
    pub tuning: Tuning,
    #[serde(default)]
    pub devices: Vec<DeviceDescriptor>,
    #[serde(default)]
    pub virtual_sensors: Vec<SensorType>,
    #[serde(default)]
    pub calibration: CalibrationStore,
}

impl HubConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: HubConfig = serde_json::from_str(json)?;
        validate_config(&config)?;
        Ok(config)
    }
}

/// Load and validate the configuration at `path`
pub fn load_config(path: &Path) -> Result<HubConfig> {
    let metadata = fs::metadata(path).map_err(|e| SensorHubError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    if metadata.len() > limits::MAX_CONFIG_FILE_SIZE {
        return Err(SensorHubError::FileTooLarge {
            path: path.to_path_buf(),
            size: metadata.len(),
            max_size: limits::MAX_CONFIG_FILE_SIZE,
        });
    }

    let contents = fs::read_to_string(path).map_err(|e| SensorHubError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    debug!("Read {} bytes of configuration from {:?}", contents.len(), path);

    let config = HubConfig::from_json(&contents)?;
    info!(
        "Loaded {} devices and {} virtual sensors from {:?}",
        config.devices.len(),
        config.virtual_sensors.len(),
        path
    );
    Ok(config)
}
