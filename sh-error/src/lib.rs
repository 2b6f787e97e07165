//! Unified error handling for SensorHub
//!
//! This crate provides a single error type used across all SensorHub components.
//! It uses thiserror for ergonomic error definitions with proper Display and Error trait impls.

use std::io;
use std::path::PathBuf;

/// Result type alias using SensorHubError
pub type Result<T> = std::result::Result<T, SensorHubError>;

/// Unified error type for all SensorHub operations
#[derive(thiserror::Error, Debug)]
pub enum SensorHubError {
    // ============================================================================
    // I/O and File System Errors
    // ============================================================================
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: io::Error,
    },

    #[error("File too large: {path} ({size} bytes, max {max_size} bytes)")]
    FileTooLarge {
        path: PathBuf,
        size: u64,
        max_size: u64,
    },

    // ============================================================================
    // Device Configuration Errors
    // ============================================================================
    #[error("Failed to write {key}={value} under {path}: {reason}")]
    ConfigWriteFailed {
        path: PathBuf,
        key: String,
        value: String,
        reason: String,
    },

    #[error("Failed to read {key} under {path}: {reason}")]
    ConfigReadFailed {
        path: PathBuf,
        key: String,
        reason: String,
    },

    // ============================================================================
    // Graph Construction Errors
    // ============================================================================
    #[error("Sensor {sensor} depends on type {dependency_type}, which is not available")]
    DependencyUnavailable {
        sensor: String,
        dependency_type: i32,
    },

    #[error("Sensor {sensor} already has the maximum of {max} dependencies")]
    TooManyDependencies {
        sensor: String,
        max: usize,
    },

    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    // ============================================================================
    // Dataflow Errors
    // ============================================================================
    #[error("Ring buffer is empty")]
    BufferEmpty,

    #[error("Invalid channel width: {bytes} bytes (channel {channel})")]
    InvalidChannelWidth {
        channel: String,
        bytes: u8,
    },

    #[error("Scan record truncated: channel {channel} needs {needed} bytes, record has {available}")]
    ScanTruncated {
        channel: String,
        needed: usize,
        available: usize,
    },

    // ============================================================================
    // Control Plane Errors
    // ============================================================================
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Unknown sensor handle: {0}")]
    UnknownHandle(i32),

    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },

    // ============================================================================
    // Protocol Errors
    // ============================================================================
    #[error("Protocol error: {0}")]
    Protocol(String),

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Generic(String),
}

impl SensorHubError {
    /// Create a generic error from a string
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic(msg.into())
    }

    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid config error
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid operation error from a string
    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        Self::InvalidOperation(msg.into())
    }

    /// Create a device write failure
    pub fn config_write(
        path: impl Into<PathBuf>,
        key: impl Into<String>,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        Self::ConfigWriteFailed {
            path: path.into(),
            key: key.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a device read failure
    pub fn config_read(path: impl Into<PathBuf>, key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigReadFailed {
            path: path.into(),
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create a protocol error from a string
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// True for errors a dataflow loop treats as "no data yet" rather than a fault
    pub fn is_buffer_empty(&self) -> bool {
        matches!(self, Self::BufferEmpty)
    }
}

// Allow converting from String to SensorHubError
impl From<String> for SensorHubError {
    fn from(s: String) -> Self {
        Self::Generic(s)
    }
}

// Allow converting from &str to SensorHubError
impl From<&str> for SensorHubError {
    fn from(s: &str) -> Self {
        Self::Generic(s.to_string())
    }
}
