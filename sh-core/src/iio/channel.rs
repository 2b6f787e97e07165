//! IIO scan channel metadata and record layout

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endianness {
    #[default]
    Little,
    Big,
}

/// Decode metadata for one channel of a scan record.
///
/// `location` is filled in by [`ScanLayout::new`]; configuration only
/// supplies the per-channel format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub name: String,
    /// Storage width in bytes (1, 2, 3, 4 or 8)
    pub bytes: u8,
    /// Significant bits within the storage width
    pub bits_used: u8,
    #[serde(default)]
    pub shift: u8,
    #[serde(default)]
    pub is_signed: bool,
    #[serde(default)]
    pub endianness: Endianness,
    #[serde(default = "default_scale")]
    pub scale: f32,
    #[serde(default)]
    pub offset: f32,
    #[serde(default)]
    pub is_float: bool,
    /// Channel packs two 16-bit sub-values (value and offset)
    #[serde(default)]
    pub multi_data: bool,
    /// Byte offset inside the scan record
    #[serde(skip)]
    pub location: usize,
}

fn default_scale() -> f32 {
    1.0
}

impl ChannelInfo {
    pub fn new(name: impl Into<String>, bytes: u8, bits_used: u8) -> Self {
        Self {
            name: name.into(),
            bytes,
            bits_used,
            shift: 0,
            is_signed: false,
            endianness: Endianness::Little,
            scale: 1.0,
            offset: 0.0,
            is_float: false,
            multi_data: false,
            location: 0,
        }
    }

    /// Signed 64-bit nanosecond timestamp channel
    pub fn timestamp() -> Self {
        Self::new("timestamp", 8, 64).signed()
    }

    pub fn signed(mut self) -> Self {
        self.is_signed = true;
        self
    }

    pub fn big_endian(mut self) -> Self {
        self.endianness = Endianness::Big;
        self
    }

    pub fn with_shift(mut self, shift: u8) -> Self {
        self.shift = shift;
        self
    }

    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_offset(mut self, offset: f32) -> Self {
        self.offset = offset;
        self
    }

    pub fn float(mut self) -> Self {
        self.is_float = true;
        self
    }

    pub fn multi(mut self) -> Self {
        self.multi_data = true;
        self
    }

    /// Mask covering `bits_used` low bits
    pub fn mask(&self) -> u64 {
        if self.bits_used >= 64 {
            u64::MAX
        } else {
            (1u64 << self.bits_used) - 1
        }
    }

    /// The record timestamp is a signed 8-byte channel with identity scaling
    pub fn is_timestamp(&self) -> bool {
        self.bytes == 8 && self.is_signed && self.scale == 1.0 && self.offset == 0.0
    }
}

/// Channels of one device with their computed byte locations
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScanLayout {
    channels: Vec<ChannelInfo>,
    scan_size: usize,
}

impl ScanLayout {
    /// Pack channels in declaration order, each aligned to its own width
    pub fn new(mut channels: Vec<ChannelInfo>) -> Self {
        let mut cursor = 0usize;
        let mut widest = 1usize;

        for ch in channels.iter_mut() {
            let width = usize::from(ch.bytes.max(1));
            if cursor % width != 0 {
                cursor += width - cursor % width;
            }
            ch.location = cursor;
            cursor += width;
            widest = widest.max(width);
        }

        let scan_size = if cursor % widest == 0 {
            cursor
        } else {
            cursor + widest - cursor % widest
        };

        Self { channels, scan_size }
    }

    pub fn channels(&self) -> &[ChannelInfo] {
        &self.channels
    }

    pub fn scan_size(&self) -> usize {
        self.scan_size
    }

    /// Channels that map onto sample axes
    pub fn data_axes(&self) -> usize {
        self.channels.iter().filter(|c| !c.is_timestamp()).count()
    }

    pub fn bits_used(&self) -> u8 {
        self.channels
            .iter()
            .find(|c| !c.is_timestamp())
            .map(|c| c.bits_used)
            .unwrap_or(0)
    }

    /// Replace the scale of every data channel (full-scale change)
    pub fn set_data_scale(&mut self, scale: f32) {
        for ch in self.channels.iter_mut().filter(|c| !c.is_timestamp()) {
            ch.scale = scale;
        }
    }
}
