//! SensorHub Core Library
//!
//! Sensor dependency graph and dataflow engine for IIO-backed sensors.
//!
//! # Features
//!
//! - **Scan Decoding**: Raw IIO scan records to calibrated physical values
//! - **Dependency Graph**: Physical sensors feed virtual sensors through bounded rings
//! - **Pollrate Negotiation**: Per-handle period and batching requests aggregated down the graph
//! - **Fusion Scheduling**: Time-aligned inputs handed to a pluggable fusion engine
//! - **Event Delivery**: Rate-gated, flush-ordered output on one shared pipe
//!
//! # Module Structure
//!
//! - `iio/` - Kernel interfaces (channel layout, decoding, sysfs, descriptors)
//! - `data/` - Data types, configuration, validation
//! - `node/` - Sensor nodes, edges, pollrate and delivery
//! - `graph` - Graph construction from configuration
//! - `hub` - Control plane and node threads
//! - `client` - Blocking client for the daemon's control socket
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use sh_core::{load_config, nonblocking_pipe, GraphBuilder, PipeSink, SensorHub};
//!
//! let config = load_config("/etc/sensorhub/hub.json".as_ref()).unwrap();
//! let (_events, pipe) = nonblocking_pipe().unwrap();
//! let graph = GraphBuilder::new(&config, Arc::new(PipeSink::new(pipe))).build();
//! let hub = SensorHub::new(graph);
//! hub.start().unwrap();
//! ```

// Grouped modules
pub mod data;
pub mod iio;
pub mod node;

// Standalone modules
pub mod client;
pub mod clock;
pub mod constants;
pub mod error;
pub mod fusion;
pub mod graph;
pub mod hub;
pub mod ring_buffer;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-export primary types from data/
pub use data::{AxisCalibration, CalibrationStore, DeviceDescriptor, HubConfig, Sample, Tuning};

// Re-export config and validation functions from data/
pub use data::{load_config, validate_config, validate_device, validate_tuning};

// Re-export error types
pub use error::{Result, SensorHubError};

// Re-export kernel interface types from iio/
pub use iio::{
    decode_scan, nonblocking_pipe, ChannelInfo, DeviceConfig, Endianness, IioEvent, IioStreams,
    Readiness, ScanLayout, SysfsDevice,
};

// Re-export node types
pub use node::{
    EventSink, FlushOutcome, HardwareKind, NodeKind, PipeSink, SensorNode, SoftwareKind,
};

// Re-export fusion contract
pub use fusion::{AlignmentOutcome, EngineFactory, FusionChannel, FusionEngine, FusionInputs};

// Re-export graph and hub
pub use graph::{open_sysfs_device, DeviceFactory, GraphBuilder, SensorGraph};
pub use hub::SensorHub;
pub use client::HubClient;
pub use ring_buffer::RingBuffer;
pub use clock::monotonic_ns;
