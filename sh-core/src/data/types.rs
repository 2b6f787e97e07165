//! Core value types carried through the dataflow graph

use crate::constants::buffer::MAX_AXES;

/// One timestamped reading as it travels between nodes.
///
/// Samples are plain values: producers copy them into each consumer's ring
/// buffer and consumers pop them by value.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Sample {
    /// Decoded physical units before calibration
    pub raw: [f32; MAX_AXES],
    /// Calibrated values (raw minus offset) or fusion output
    pub processed: [f32; MAX_AXES],
    /// Calibration bias per axis
    pub offset: [f32; MAX_AXES],
    /// Monotonic nanoseconds
    pub timestamp: i64,
    /// Step counters report an integral count instead of axes
    pub step_count: u64,
}

impl Sample {
    pub fn at(timestamp: i64) -> Self {
        Self {
            timestamp,
            ..Self::default()
        }
    }

    /// Sample whose raw and processed values are both `values`
    pub fn with_values(timestamp: i64, values: &[f32]) -> Self {
        let mut sample = Self::at(timestamp);
        let n = values.len().min(MAX_AXES);
        sample.raw[..n].copy_from_slice(&values[..n]);
        sample.processed[..n].copy_from_slice(&values[..n]);
        sample
    }

    /// Recompute `processed = raw - offset` over the first `axes` axes
    pub fn apply_offset(&mut self, axes: usize) {
        for i in 0..axes.min(MAX_AXES) {
            self.processed[i] = self.raw[i] - self.offset[i];
        }
    }
}
