//! Device configuration surface
//!
//! Nodes treat a device's sysfs directory as an opaque key/value store.
//! Writes are verified by reading the attribute back where it is readable.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

use crate::constants::sysfs;
use crate::error::{Result, SensorHubError};

/// Key/value configuration of one IIO device
#[cfg_attr(test, mockall::automock)]
pub trait DeviceConfig: Send + Sync {
    /// Human readable location for logs
    fn describe(&self) -> String;

    fn write_int(&self, key: &str, value: i64) -> Result<()>;

    fn read_int(&self, key: &str) -> Result<i64>;

    fn write_float(&self, key: &str, value: f32) -> Result<()>;

    fn enable_buffer(&self, enable: bool) -> Result<()>;
}

/// Sysfs-backed device configuration
#[derive(Debug, Clone)]
pub struct SysfsDevice {
    dir: PathBuf,
}

impl SysfsDevice {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn attr(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }

    fn read_raw(&self, key: &str) -> Result<String> {
        let path = self.attr(key);
        fs::read_to_string(&path)
            .map(|s| s.trim().to_string())
            .map_err(|e| SensorHubError::config_read(&self.dir, key, e.to_string()))
    }

    fn write_raw(&self, key: &str, value: &str) -> Result<()> {
        let path = self.attr(key);
        trace!(path = %path.display(), value, "sysfs write");
        fs::write(&path, value)
            .map_err(|e| SensorHubError::config_write(&self.dir, key, value, e.to_string()))
    }
}

/// Integer attributes are sometimes reported with a fractional part
fn parse_int(s: &str) -> Option<i64> {
    s.parse::<i64>()
        .ok()
        .or_else(|| s.parse::<f64>().ok().map(|f| f.round() as i64))
}

impl DeviceConfig for SysfsDevice {
    fn describe(&self) -> String {
        self.dir.display().to_string()
    }

    fn write_int(&self, key: &str, value: i64) -> Result<()> {
        self.write_raw(key, &value.to_string())?;

        // write-only attributes (e.g. flush) cannot be verified
        if let Ok(readback) = self.read_raw(key) {
            match parse_int(&readback) {
                Some(v) if v == value => {}
                _ => {
                    return Err(SensorHubError::config_write(
                        &self.dir,
                        key,
                        value,
                        format!("read back '{}'", readback),
                    ))
                }
            }
        }

        debug!(device = %self.dir.display(), key, value, "attribute written");
        Ok(())
    }

    fn read_int(&self, key: &str) -> Result<i64> {
        let raw = self.read_raw(key)?;
        parse_int(&raw).ok_or_else(|| {
            SensorHubError::config_read(&self.dir, key, format!("not an integer: '{}'", raw))
        })
    }

    fn write_float(&self, key: &str, value: f32) -> Result<()> {
        self.write_raw(key, &format!("{:.6}", value))?;

        if let Ok(readback) = self.read_raw(key) {
            let ok = readback
                .parse::<f32>()
                .map(|v| (v - value).abs() <= value.abs() * 1e-4 + f32::EPSILON)
                .unwrap_or(false);
            if !ok {
                return Err(SensorHubError::config_write(
                    &self.dir,
                    key,
                    value,
                    format!("read back '{}'", readback),
                ));
            }
        }

        debug!(device = %self.dir.display(), key, value, "attribute written");
        Ok(())
    }

    fn enable_buffer(&self, enable: bool) -> Result<()> {
        self.write_int(sysfs::BUFFER_ENABLE, i64::from(enable))
    }
}
