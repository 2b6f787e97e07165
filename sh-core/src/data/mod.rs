//! Data types, configuration, and validation modules
//!
//! Contains the sample type carried through the graph, calibration, and
//! hub configuration management.

mod calibration;
mod config;
mod types;
mod validation;

pub use calibration::{AxisCalibration, CalibrationStore};
pub use config::{load_config, DeviceDescriptor, HubConfig, Tuning};
pub use types::Sample;
pub use validation::{validate_config, validate_device, validate_tuning};
