//! Scan record decoding
//!
//! Turns one raw IIO scan record into a [`Sample`]. Every channel is decoded
//! according to its storage width:
//!
//! - 1 byte: raw unsigned value, no scale or offset
//! - 2/3 bytes: shift, mask, sign-extend, then `(v + offset) * scale`
//! - 4 bytes: 32-bit integer or IEEE-754 float, or two packed 16-bit values
//! - 8 bytes (signed only): the record timestamp, or a calibrated 64-bit channel
//!
//! Decoding is pure: it only fills the returned sample.

use crate::constants::buffer::MAX_AXES;
use crate::data::Sample;
use crate::error::{Result, SensorHubError};
use crate::iio::channel::{ChannelInfo, Endianness, ScanLayout};

/// Decode one scan record
pub fn decode_scan(record: &[u8], layout: &ScanLayout) -> Result<Sample> {
    let mut sample = Sample::default();
    let mut axis = 0usize;

    for ch in layout.channels() {
        let width = usize::from(ch.bytes);
        let end = ch.location + width;
        if end > record.len() {
            return Err(SensorHubError::ScanTruncated {
                channel: ch.name.clone(),
                needed: end,
                available: record.len(),
            });
        }
        let bytes = &record[ch.location..end];

        let decoded = match ch.bytes {
            1 => Decoded::Value(f32::from(bytes[0]), 0.0),
            2 => decode_2byte(record, ch),
            3 => Decoded::Value(decode_3byte(bytes, ch), 0.0),
            4 => decode_4byte(bytes, ch),
            8 if ch.is_signed => decode_8byte(bytes, ch),
            other => {
                return Err(SensorHubError::InvalidChannelWidth {
                    channel: ch.name.clone(),
                    bytes: other,
                })
            }
        };

        match decoded {
            Decoded::Timestamp(ts) => sample.timestamp = ts,
            Decoded::Value(value, offset) => {
                if axis < MAX_AXES {
                    sample.raw[axis] = value;
                    sample.offset[axis] = offset;
                }
                axis += 1;
            }
        }
    }

    Ok(sample)
}

enum Decoded {
    /// Physical value and secondary offset component
    Value(f32, f32),
    Timestamp(i64),
}

fn load_u16(b: &[u8], endianness: Endianness) -> u16 {
    match endianness {
        Endianness::Little => u16::from_le_bytes([b[0], b[1]]),
        Endianness::Big => u16::from_be_bytes([b[0], b[1]]),
    }
}

fn load_u24(b: &[u8], endianness: Endianness) -> u32 {
    match endianness {
        Endianness::Little => u32::from(b[0]) | u32::from(b[1]) << 8 | u32::from(b[2]) << 16,
        Endianness::Big => u32::from(b[0]) << 16 | u32::from(b[1]) << 8 | u32::from(b[2]),
    }
}

fn load_u32(b: &[u8], endianness: Endianness) -> u32 {
    let arr = [b[0], b[1], b[2], b[3]];
    match endianness {
        Endianness::Little => u32::from_le_bytes(arr),
        Endianness::Big => u32::from_be_bytes(arr),
    }
}

/// Shift, mask and (optionally) sign-extend within a `width`-bit container
fn extract_bits(raw: u32, ch: &ChannelInfo, width: u32) -> i32 {
    let bits = u32::from(ch.bits_used).clamp(1, width);
    let mask = if bits >= 32 { u32::MAX } else { (1u32 << bits) - 1 };
    let v = (raw >> u32::from(ch.shift).min(31)) & mask;

    if ch.is_signed && bits < 32 {
        let unused = 32 - bits;
        ((v << unused) as i32) >> unused
    } else {
        v as i32
    }
}

/// 16-bit multi_data sub-value: already integral, only scaled
fn multi_component(b: &[u8], ch: &ChannelInfo) -> f32 {
    f32::from(load_u16(b, ch.endianness) as i16) * ch.scale
}

fn decode_2byte(record: &[u8], ch: &ChannelInfo) -> Decoded {
    let at = ch.location;
    let bytes = &record[at..at + 2];

    if ch.multi_data {
        // the secondary component sits in the next 16-bit word when present
        let offset = record
            .get(at + 2..at + 4)
            .map(|b| multi_component(b, ch))
            .unwrap_or(0.0);
        return Decoded::Value(multi_component(bytes, ch), offset);
    }

    let v = extract_bits(u32::from(load_u16(bytes, ch.endianness)), ch, 16);
    Decoded::Value((v as f32 + ch.offset) * ch.scale, 0.0)
}

fn decode_3byte(bytes: &[u8], ch: &ChannelInfo) -> f32 {
    let v = extract_bits(load_u24(bytes, ch.endianness), ch, 24);
    (v as f32 + ch.offset) * ch.scale
}

fn decode_4byte(bytes: &[u8], ch: &ChannelInfo) -> Decoded {
    if ch.multi_data {
        return Decoded::Value(multi_component(&bytes[0..2], ch), multi_component(&bytes[2..4], ch));
    }

    let raw = load_u32(bytes, ch.endianness);
    let v = if ch.is_float {
        f32::from_bits(raw)
    } else if ch.is_signed {
        raw as i32 as f32
    } else {
        raw as f32
    };
    Decoded::Value((v + ch.offset) * ch.scale, 0.0)
}

fn decode_8byte(bytes: &[u8], ch: &ChannelInfo) -> Decoded {
    let arr = [
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ];
    let raw = match ch.endianness {
        Endianness::Little => u64::from_le_bytes(arr),
        Endianness::Big => u64::from_be_bytes(arr),
    };

    let mask = ch.mask();
    let mut v = raw & mask;
    if ch.bits_used > 0 && ch.bits_used < 64 && (v >> (ch.bits_used - 1)) & 1 == 1 {
        v |= !mask;
    }
    let v = v as i64;

    if ch.is_timestamp() {
        Decoded::Timestamp(v)
    } else {
        Decoded::Value((v as f32 + ch.offset) * ch.scale, 0.0)
    }
}
