//! Error types for SensorHub
//!
//! Re-exports the unified error type from sh-error.

pub use sh_error::{Result, SensorHubError};
