//! Configuration validation
//!
//! Rejects configurations the graph builder could not turn into a sane
//! dataflow: malformed scan layouts, ambiguous names and tuning values that
//! would divide by zero or spin.

use std::collections::HashSet;

use crate::constants::{buffer, limits};
use crate::data::config::{DeviceDescriptor, HubConfig, Tuning};
use crate::error::{Result, SensorHubError};

/// Validate a complete configuration
pub fn validate_config(config: &HubConfig) -> Result<()> {
    validate_tuning(&config.tuning)?;

    if config.devices.len() > limits::MAX_DEVICES {
        return Err(SensorHubError::config(format!(
            "configuration exceeds maximum of {} devices",
            limits::MAX_DEVICES
        )));
    }

    let mut names = HashSet::new();
    for device in &config.devices {
        if !names.insert(device.name.as_str()) {
            return Err(SensorHubError::config(format!(
                "duplicate device name '{}'",
                device.name
            )));
        }
        validate_device(device)?;
    }

    for sensor_type in &config.virtual_sensors {
        if config.devices.iter().any(|d| d.sensor_type == *sensor_type) {
            return Err(SensorHubError::config(format!(
                "{:?} is configured both as a device and as a virtual sensor",
                sensor_type
            )));
        }
    }

    Ok(())
}

/// Validate engine tuning values
pub fn validate_tuning(tuning: &Tuning) -> Result<()> {
    if tuning.skew_den <= 0 {
        return Err(SensorHubError::invalid_config("tuning.skew_den", "must be positive"));
    }

    if tuning.skew_lower_num <= 0 || tuning.skew_upper_num <= 0 {
        return Err(SensorHubError::invalid_config(
            "tuning.skew_*_num",
            "skew numerators must be positive",
        ));
    }

    if tuning.align_retry_sleep_us == 0 {
        return Err(SensorHubError::invalid_config(
            "tuning.align_retry_sleep_us",
            "must be non-zero",
        ));
    }

    if !(tuning.min_fusion_pollrate_hz > 0.0) {
        return Err(SensorHubError::invalid_config(
            "tuning.min_fusion_pollrate_hz",
            "must be positive",
        ));
    }

    if tuning.hw_poll_timeout_ms == 0 {
        return Err(SensorHubError::invalid_config(
            "tuning.hw_poll_timeout_ms",
            "must be non-zero",
        ));
    }

    Ok(())
}

/// Validate one device descriptor
pub fn validate_device(device: &DeviceDescriptor) -> Result<()> {
    let field = |name: &str| format!("devices.{}.{}", device.name, name);

    if device.name.trim().is_empty() {
        return Err(SensorHubError::config("device name cannot be empty"));
    }

    if device.sensor_type.is_private() {
        return Err(SensorHubError::invalid_config(
            field("sensor_type"),
            "private types cannot be backed by a device",
        ));
    }

    if device.sysfs_dir().is_none() {
        return Err(SensorHubError::invalid_config(
            field("iio_index"),
            "either iio_index or sysfs_path is required",
        ));
    }

    if !device.is_event_driven() && device.channels.is_empty() {
        return Err(SensorHubError::invalid_config(field("channels"), "no scan channels"));
    }

    if device.channels.len() > buffer::MAX_CHANNELS {
        return Err(SensorHubError::invalid_config(
            field("channels"),
            format!("more than {} channels", buffer::MAX_CHANNELS),
        ));
    }

    let data_channels = device
        .channels
        .iter()
        .filter(|c| !c.is_timestamp())
        .count();
    if data_channels > buffer::MAX_AXES {
        return Err(SensorHubError::invalid_config(
            field("channels"),
            format!("more than {} data channels", buffer::MAX_AXES),
        ));
    }

    let mut channel_names = HashSet::new();
    for ch in &device.channels {
        if !channel_names.insert(ch.name.as_str()) {
            return Err(SensorHubError::invalid_config(
                field("channels"),
                format!("duplicate channel '{}'", ch.name),
            ));
        }
        if !matches!(ch.bytes, 1 | 2 | 3 | 4 | 8) || (ch.bytes == 8 && !ch.is_signed) {
            return Err(SensorHubError::InvalidChannelWidth {
                channel: ch.name.clone(),
                bytes: ch.bytes,
            });
        }
        if ch.bits_used == 0 || u32::from(ch.bits_used) > u32::from(ch.bytes) * 8 {
            return Err(SensorHubError::invalid_config(
                field("channels"),
                format!("channel '{}' uses {} bits", ch.name, ch.bits_used),
            ));
        }
    }

    if device.sampling_frequencies.iter().any(|f| !(*f > 0.0)) {
        return Err(SensorHubError::invalid_config(
            field("sampling_frequencies"),
            "frequencies must be positive",
        ));
    }

    if device.scales.iter().any(|s| !(*s > 0.0)) {
        return Err(SensorHubError::invalid_config(field("scales"), "scales must be positive"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iio::ChannelInfo;
    use sh_protocol::SensorType;

    fn accel() -> DeviceDescriptor {
        let mut dev = DeviceDescriptor::new("accel", SensorType::Accelerometer);
        dev.iio_index = Some(0);
        dev.channels = vec![
            ChannelInfo::new("x", 2, 16).signed(),
            ChannelInfo::new("y", 2, 16).signed(),
            ChannelInfo::new("z", 2, 16).signed(),
            ChannelInfo::timestamp(),
        ];
        dev
    }

    #[test]
    fn test_valid_device() {
        assert!(validate_device(&accel()).is_ok());
    }

    #[test]
    fn test_empty_channels_rejected_unless_event_driven() {
        let mut dev = accel();
        dev.channels.clear();
        assert!(validate_device(&dev).is_err());

        let mut detector = DeviceDescriptor::new("step", SensorType::StepDetector);
        detector.iio_index = Some(2);
        assert!(validate_device(&detector).is_ok());
    }

    #[test]
    fn test_too_many_data_channels() {
        let mut dev = accel();
        dev.channels.insert(0, ChannelInfo::new("w", 2, 16));
        dev.channels.insert(0, ChannelInfo::new("v", 2, 16));
        assert!(validate_device(&dev).is_err());
    }

    #[test]
    fn test_duplicate_channel_and_bad_width() {
        let mut dev = accel();
        dev.channels[1].name = "x".to_string();
        assert!(validate_device(&dev).is_err());

        let mut dev = accel();
        dev.channels[0].bytes = 5;
        assert!(matches!(
            validate_device(&dev),
            Err(SensorHubError::InvalidChannelWidth { bytes: 5, .. })
        ));

        let mut dev = accel();
        dev.channels[0] = ChannelInfo::new("x", 8, 64);
        assert!(matches!(
            validate_device(&dev),
            Err(SensorHubError::InvalidChannelWidth { bytes: 8, .. })
        ));
    }

    #[test]
    fn test_missing_location() {
        let mut dev = accel();
        dev.iio_index = None;
        assert!(validate_device(&dev).is_err());
    }

    #[test]
    fn test_tuning_rejects_zero_values() {
        let mut tuning = Tuning::default();
        assert!(validate_tuning(&tuning).is_ok());

        tuning.skew_den = 0;
        assert!(validate_tuning(&tuning).is_err());

        let mut tuning = Tuning::default();
        tuning.align_retry_sleep_us = 0;
        assert!(validate_tuning(&tuning).is_err());
    }

    #[test]
    fn test_duplicate_device_names() {
        let config = HubConfig {
            devices: vec![accel(), accel()],
            ..HubConfig::default()
        };
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_virtual_sensor_shadowing_device() {
        let config = HubConfig {
            devices: vec![accel()],
            virtual_sensors: vec![SensorType::Accelerometer],
            ..HubConfig::default()
        };
        assert!(validate_config(&config).is_err());
    }
}
