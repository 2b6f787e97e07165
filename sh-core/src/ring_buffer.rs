//! Bounded sample exchange between a producer and one consumer
//!
//! Every dependency edge owns one ring. The producer's thread writes,
//! the consumer's thread reads; both go through a single mutex.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::constants::buffer::MIN_RING_CAPACITY;
use crate::data::Sample;
use crate::error::{Result, SensorHubError};

/// Fixed-capacity store of the most recent samples
#[derive(Debug)]
pub struct RingBuffer {
    capacity: usize,
    slots: Mutex<VecDeque<Sample>>,
}

impl RingBuffer {
    /// Ring holding `max(2, capacity)` samples
    pub fn new(capacity: usize) -> Result<Self> {
        let capacity = capacity.max(MIN_RING_CAPACITY);
        let mut slots = VecDeque::new();
        slots.try_reserve_exact(capacity).map_err(|e| {
            SensorHubError::OutOfMemory(format!("ring buffer of {} samples: {}", capacity, e))
        })?;

        Ok(Self {
            capacity,
            slots: Mutex::new(slots),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Store a sample, dropping the oldest when full
    pub fn write(&self, sample: Sample) {
        let mut slots = self.slots.lock();
        if slots.len() == self.capacity {
            slots.pop_front();
        }
        slots.push_back(sample);
    }

    /// Remove the oldest sample, returning it with the count still queued
    pub fn read(&self) -> Result<(Sample, usize)> {
        let mut slots = self.slots.lock();
        let sample = slots.pop_front().ok_or(SensorHubError::BufferEmpty)?;
        Ok((sample, slots.len()))
    }

    pub fn available(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn clear(&self) {
        self.slots.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_has_floor() {
        assert_eq!(RingBuffer::new(0).unwrap().capacity(), 2);
        assert_eq!(RingBuffer::new(1).unwrap().capacity(), 2);
        assert_eq!(RingBuffer::new(16).unwrap().capacity(), 16);
    }

    #[test]
    fn test_overflow_keeps_last_samples_in_order() {
        let ring = RingBuffer::new(3).unwrap();
        for ts in 1..=5 {
            ring.write(Sample::at(ts));
        }
        assert_eq!(ring.available(), 3);

        let (s, left) = ring.read().unwrap();
        assert_eq!((s.timestamp, left), (3, 2));
        let (s, left) = ring.read().unwrap();
        assert_eq!((s.timestamp, left), (4, 1));
        let (s, left) = ring.read().unwrap();
        assert_eq!((s.timestamp, left), (5, 0));
    }

    #[test]
    fn test_empty_read_is_repeatable() {
        let ring = RingBuffer::new(2).unwrap();
        assert!(ring.read().unwrap_err().is_buffer_empty());
        assert!(ring.read().unwrap_err().is_buffer_empty());
    }

    #[test]
    fn test_clear() {
        let ring = RingBuffer::new(4).unwrap();
        ring.write(Sample::at(1));
        ring.write(Sample::at(2));
        ring.clear();
        assert_eq!(ring.available(), 0);
    }
}
