//! Kernel IIO interfaces
//!
//! - `channel` - scan channel metadata and record layout
//! - `decode` - scan record to [`Sample`](crate::data::Sample) conversion
//! - `device` - sysfs configuration surface
//! - `stream` - buffered scan and event descriptors

mod channel;
mod decode;
mod device;
mod stream;

pub use channel::{ChannelInfo, Endianness, ScanLayout};
pub use decode::decode_scan;
pub use device::{DeviceConfig, SysfsDevice};
pub use stream::{nonblocking_pipe, IioEvent, IioStreams, Readiness};

#[cfg(test)]
pub use device::MockDeviceConfig;
