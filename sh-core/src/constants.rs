//! Constants and configuration values for SensorHub
//!
//! Centralizes all magic numbers, paths, and configuration defaults.
//! This is the SINGLE SOURCE OF TRUTH for all configuration values.
//! Never use magic numbers in other files - add them here first.

use std::time::Duration;

/// System paths
pub mod paths {
    use std::path::PathBuf;

    /// Configuration directory
    pub const CONFIG_DIR: &str = "/etc/sensorhub";

    /// Hub configuration file
    pub const CONFIG_FILE: &str = "hub.json";

    /// Base path for IIO device attributes
    pub const IIO_SYSFS_BASE: &str = "/sys/bus/iio/devices";

    /// Directory holding IIO character devices
    pub const IIO_DEV_BASE: &str = "/dev";

    /// Daemon control socket
    pub const SOCKET_PATH: &str = "/run/sensorhub.sock";

    pub fn default_config_path() -> PathBuf {
        PathBuf::from(CONFIG_DIR).join(CONFIG_FILE)
    }

    /// Character device for buffered scans, e.g. `/dev/iio:device3`
    pub fn iio_dev_node(index: u32) -> PathBuf {
        PathBuf::from(IIO_DEV_BASE).join(format!("iio:device{}", index))
    }

    /// Sysfs attribute directory for an IIO device
    pub fn iio_sysfs_dir(index: u32) -> PathBuf {
        PathBuf::from(IIO_SYSFS_BASE).join(format!("iio:device{}", index))
    }
}

/// Sysfs attribute names written by the hub
pub mod sysfs {
    pub const SAMPLING_FREQUENCY: &str = "sampling_frequency";
    pub const BUFFER_ENABLE: &str = "buffer/enable";
    pub const BUFFER_LENGTH: &str = "buffer/length";
    pub const FLUSH: &str = "flush";
    pub const MAX_DELIVERY_RATE: &str = "max_delivery_rate";

    /// Full-scale attribute for a channel kind, e.g. `in_accel_scale`
    pub fn scale_key(kind: &str) -> String {
        format!("in_{}_scale", kind)
    }
}

/// Ring buffer and kernel buffer sizing
pub mod buffer {
    /// Smallest ring buffer capacity on any dependency edge
    pub const MIN_RING_CAPACITY: usize = 2;

    /// Kernel buffer length used when no batching is requested
    pub const DEFAULT_IIO_BUFFER_LEN: u32 = 2;

    /// Kernel buffer length is this multiple of the FIFO length
    pub const IIO_BUFFER_MULTIPLIER: u32 = 2;

    /// Maximum channels in one scan record (including timestamp)
    pub const MAX_CHANNELS: usize = 8;

    /// Number of data axes a sample carries
    pub const MAX_AXES: usize = 4;

    /// Size of one IIO event record (`u64` id + `i64` timestamp)
    pub const IIO_EVENT_RECORD_SIZE: usize = 16;
}

/// Dependency graph limits
pub mod graph {
    /// Maximum dependency edges per node
    pub const MAX_DEPENDENCIES: usize = 5;

    /// First handle assigned by the graph builder
    pub const FIRST_HANDLE: i32 = 1;

    /// Handles index bits of a `u64` enable mask
    pub const MAX_HANDLE: i32 = 63;
}

/// Time conversions
pub mod timing {
    pub const NS_PER_SEC: i64 = 1_000_000_000;
    pub const NS_PER_MS: i64 = 1_000_000;
    pub const NS_PER_US: i64 = 1_000;

    /// Sentinel meaning "no constraint from this handle"
    pub const UNCONSTRAINED: i64 = i64::MAX;

    pub fn hz_to_period_ns(hz: f64) -> i64 {
        if hz <= 0.0 {
            return UNCONSTRAINED;
        }
        (NS_PER_SEC as f64 / hz).round() as i64
    }

    pub fn period_ns_to_hz(period_ns: i64) -> f64 {
        if period_ns <= 0 {
            return 0.0;
        }
        NS_PER_SEC as f64 / period_ns as f64
    }
}

/// Outbound event stream
pub mod delivery {
    /// Attempts made for a flush-complete meta event
    pub const FLUSH_WRITE_ATTEMPTS: u32 = 3;

    /// Default lower skew band (9/10 of nominal period)
    pub const SKEW_LOWER_NUM: i64 = 9;

    /// Default upper skew band (11/10 of nominal period)
    pub const SKEW_UPPER_NUM: i64 = 11;

    pub const SKEW_DEN: i64 = 10;
}

/// Software fusion scheduling
pub mod fusion {
    /// Attempts to find a time-aligned secondary input
    pub const ALIGN_RETRY_COUNT: u32 = 10;

    /// Sleep between alignment attempts
    pub const ALIGN_RETRY_SLEEP_US: u64 = 200;

    /// Fusion runs at least this fast whenever a client asks for it
    pub const MIN_FUSION_POLLRATE_HZ: f64 = 50.0;
}

/// Physical unit conversions
pub mod units {
    /// Magnetometers report gauss, clients expect microtesla
    pub const GAUSS_TO_MICROTESLA: f32 = 100.0;

    /// Detector events carry this value
    pub const DETECTOR_EVENT_VALUE: f32 = 1.0;

    /// Fusion outputs are normalized; resolution is range / 2^24
    pub const FUSION_MAX_RANGE: f32 = 1.0;
    pub const FUSION_RESOLUTION: f32 = FUSION_MAX_RANGE / 16_777_216.0;

    /// Orientation reports degrees
    pub const ORIENTATION_MAX_RANGE: f32 = 360.0;

    /// Gravity and linear acceleration range, 4 g in m/s^2
    pub const ACCEL_DERIVED_MAX_RANGE: f32 = 39.226_6;
}

/// Configuration limits
pub mod limits {
    /// Largest configuration file accepted
    pub const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

    /// Largest number of devices in one configuration
    pub const MAX_DEVICES: usize = 32;
}

/// Hardware poll loop wakes at least this often to observe the stop signal
pub const HW_POLL_TIMEOUT: Duration = Duration::from_millis(200);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hz_period_conversions() {
        assert_eq!(timing::hz_to_period_ns(100.0), 10_000_000);
        assert_eq!(timing::hz_to_period_ns(0.0), timing::UNCONSTRAINED);
        assert!((timing::period_ns_to_hz(20_000_000) - 50.0).abs() < f64::EPSILON);
        assert_eq!(timing::period_ns_to_hz(0), 0.0);
    }

    #[test]
    fn test_paths() {
        assert_eq!(paths::iio_dev_node(3).to_str(), Some("/dev/iio:device3"));
        assert_eq!(
            paths::iio_sysfs_dir(0).to_str(),
            Some("/sys/bus/iio/devices/iio:device0")
        );
        assert_eq!(sysfs::scale_key("accel"), "in_accel_scale");
    }
}
