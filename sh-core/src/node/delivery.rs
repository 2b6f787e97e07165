//! Outbound event stream
//!
//! All nodes share one sink of fixed-size records. A node writes a sample
//! only while its own handle is enabled, and gates continuous streams to
//! the negotiated rate. Pending flush requests are reconciled against the
//! timestamps of outgoing samples so a flush-complete event always precedes
//! the first sample taken after the flush request.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Write};

use sh_protocol::{ReportingMode, SensorEvent, SensorType, EVENT_RECORD_SIZE};
use tracing::{debug, error, trace, warn};

use super::pollrate::is_constrained;
use super::{NodeKind, SensorNode};
use crate::constants::buffer::MAX_AXES;
use crate::constants::delivery::FLUSH_WRITE_ATTEMPTS;
use crate::data::Sample;

/// Destination of encoded event records
pub trait EventSink: Send + Sync {
    fn write_event(&self, record: &[u8; EVENT_RECORD_SIZE]) -> io::Result<()>;
}

/// Write end of the hub's event pipe
#[derive(Debug)]
pub struct PipeSink {
    pipe: File,
}

impl PipeSink {
    pub fn new(pipe: File) -> Self {
        Self { pipe }
    }
}

impl EventSink for PipeSink {
    fn write_event(&self, record: &[u8; EVENT_RECORD_SIZE]) -> io::Result<()> {
        // records are far below PIPE_BUF, so each write is atomic
        (&self.pipe).write_all(record)
    }
}

#[derive(Debug)]
pub(crate) struct DeliveryState {
    last_delivered: i64,
    pending_flushes: VecDeque<i64>,
}

impl Default for DeliveryState {
    fn default() -> Self {
        Self {
            last_delivered: i64::MIN,
            pending_flushes: VecDeque::new(),
        }
    }
}

impl DeliveryState {
    pub(crate) fn reset(&mut self) {
        self.last_delivered = i64::MIN;
    }
}

impl SensorNode {
    /// Period used to gate delivery, `None` for ungated streams
    fn delivery_period(&self) -> Option<i64> {
        if self.sensor_type.reporting_mode() != ReportingMode::Continuous {
            return None;
        }
        let period = match &self.kind {
            NodeKind::Hardware(hw) if hw.has_fifo() => hw.actual_period_ns(),
            NodeKind::Hardware(_) => return None,
            NodeKind::Software(_) => self.requested_period_ns(),
        };
        is_constrained(period).then_some(period)
    }

    fn event_for(&self, sample: &Sample) -> SensorEvent {
        match self.sensor_type {
            SensorType::StepCounter => {
                SensorEvent::step_count(self.handle, sample.timestamp, sample.step_count)
            }
            SensorType::GyroscopeUncalibrated | SensorType::MagneticFieldUncalibrated => {
                let mut values = [0.0f32; 6];
                values[..3].copy_from_slice(&sample.processed[..3]);
                values[3..].copy_from_slice(&sample.offset[..3]);
                SensorEvent::data(self.handle, self.sensor_type, sample.timestamp, &values)
            }
            other => {
                let axes = other.axis_count().min(MAX_AXES);
                SensorEvent::data(self.handle, other, sample.timestamp, &sample.processed[..axes])
            }
        }
    }

    /// Write a sample to the outbound stream if this node's own handle is enabled
    pub(crate) fn deliver(&self, sample: &Sample) {
        let period = self.delivery_period();
        let lower = period.map(|p| self.tuning.lower_skew(p));
        let mut state = self.delivery.lock();

        while let Some(&flush_ts) = state.pending_flushes.front() {
            let next_close = match (state.pending_flushes.get(1), lower) {
                (Some(&next), Some(lower)) => next.saturating_sub(flush_ts) < lower,
                _ => false,
            };
            if sample.timestamp < flush_ts && !next_close {
                break;
            }
            state.pending_flushes.pop_front();
            self.emit_flush_complete();
        }

        if !self.is_enabled_by(self.handle) {
            return;
        }

        let due = match lower {
            Some(lower) => sample.timestamp >= state.last_delivered.saturating_add(lower),
            None => sample.timestamp > state.last_delivered,
        };
        if !due {
            trace!(sensor = self.handle, ts = sample.timestamp, "Sample below delivery rate");
            return;
        }
        state.last_delivered = sample.timestamp;

        let record = self.event_for(sample).encode();
        if let Err(e) = self.sink.write_event(&record) {
            warn!(sensor = self.handle, ts = sample.timestamp, "Dropped event: {}", e);
        }
    }

    /// Emit flush-complete for this node's handle now
    pub(crate) fn emit_flush_complete(&self) {
        let record = SensorEvent::flush_complete(self.handle).encode();
        for attempt in 1..=FLUSH_WRITE_ATTEMPTS {
            match self.sink.write_event(&record) {
                Ok(()) => {
                    debug!(sensor = self.handle, "Flush complete");
                    return;
                }
                Err(e) => {
                    warn!(sensor = self.handle, attempt, "Flush-complete write failed: {}", e);
                }
            }
        }
        error!(
            sensor = self.handle,
            "Flush-complete dropped after {} attempts", FLUSH_WRITE_ATTEMPTS
        );
    }

    /// Complete a deferred flush once a sample stamped at or after `ts` goes out
    pub(crate) fn queue_flush(&self, ts: i64) {
        self.delivery.lock().pending_flushes.push_back(ts);
    }

    /// Nothing more will be delivered; answer every outstanding flush
    pub(crate) fn complete_pending_flushes(&self) {
        let pending: Vec<i64> = self.delivery.lock().pending_flushes.drain(..).collect();
        for _ in pending {
            self.emit_flush_complete();
        }
    }

    pub fn pending_flush_count(&self) -> usize {
        self.delivery.lock().pending_flushes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iio::nonblocking_pipe;
    use crate::node::SoftwareKind;
    use crate::test_utils::{
        accel_descriptor, gyro_descriptor, hw_node, recording_sink, sw_node, FakeDevice,
        FlakySink,
    };
    use std::io::Read;
    use std::sync::Arc;

    fn batched_accel(sink: Arc<dyn EventSink>) -> Arc<SensorNode> {
        let mut desc = accel_descriptor();
        desc.sampling_frequencies = vec![100.0];
        desc.fifo_max = 32;
        let node = hw_node(1, &desc, FakeDevice::new(), sink);
        node.enable(1, true).unwrap();
        node.set_delay(1, 10_000_000, 200_000_000).unwrap();
        node
    }

    #[test]
    fn test_pipe_sink_writes_whole_records() {
        let (mut rx, tx) = nonblocking_pipe().unwrap();
        let sink = PipeSink::new(tx);
        let event = SensorEvent::flush_complete(3);
        sink.write_event(&event.encode()).unwrap();

        let mut buf = [0u8; EVENT_RECORD_SIZE];
        rx.read_exact(&mut buf).unwrap();
        assert_eq!(SensorEvent::decode(&buf).unwrap(), event);
    }

    #[test]
    fn test_not_written_unless_own_handle_enabled() {
        let (sink, events) = recording_sink();
        let node = hw_node(1, &accel_descriptor(), FakeDevice::new(), sink);
        node.enable(2, true).unwrap();
        node.publish(&Sample::at(10));
        assert!(events.lock().is_empty());
    }

    #[test]
    fn test_rate_gate_with_lower_skew() {
        let (sink, events) = recording_sink();
        let node = batched_accel(sink);

        // period 10ms, gate at 9ms
        for ts in [0, 5_000_000, 9_000_000, 12_000_000, 18_000_000, 18_500_000] {
            node.publish(&Sample::at(ts));
        }
        let delivered: Vec<i64> = events.lock().iter().map(|e| e.timestamp).collect();
        assert_eq!(delivered, vec![0, 9_000_000, 18_000_000]);
    }

    #[test]
    fn test_ungated_stream_requires_increasing_timestamps() {
        let (sink, events) = recording_sink();
        let node = hw_node(1, &accel_descriptor(), FakeDevice::new(), sink);
        node.enable(1, true).unwrap();
        for ts in [5, 5, 3, 6] {
            node.publish(&Sample::at(ts));
        }
        let delivered: Vec<i64> = events.lock().iter().map(|e| e.timestamp).collect();
        assert_eq!(delivered, vec![5, 6]);
    }

    #[test]
    fn test_flush_reconciled_before_crossing_sample() {
        let (sink, events) = recording_sink();
        let node = batched_accel(sink);

        node.queue_flush(100_000_000);
        node.publish(&Sample::at(50_000_000));
        node.publish(&Sample::at(100_000_000));

        let events = events.lock();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].timestamp, 50_000_000);
        assert!(events[1].is_flush_complete());
        assert_eq!(events[2].timestamp, 100_000_000);
        assert_eq!(node.pending_flush_count(), 0);
    }

    #[test]
    fn test_close_flushes_collapse() {
        let (sink, events) = recording_sink();
        let node = batched_accel(sink);

        // second request lands within 9ms of the first
        node.queue_flush(100_000_000);
        node.queue_flush(104_000_000);
        node.queue_flush(300_000_000);
        node.publish(&Sample::at(50_000_000));

        let flushes = events.lock().iter().filter(|e| e.is_flush_complete()).count();
        assert_eq!(flushes, 1);
        assert_eq!(node.pending_flush_count(), 2);
    }

    #[test]
    fn test_uncalibrated_payload_carries_bias() {
        let (sink, events) = recording_sink();
        let node = sw_node(2, SoftwareKind::GyroscopeUncalibrated, sink);
        let gyro = hw_node(1, &gyro_descriptor(), FakeDevice::new(), crate::test_utils::null_sink());
        node.add_dependency(&gyro, true).unwrap();
        node.enable(2, true).unwrap();

        let mut sample = Sample::with_values(7, &[1.0, 2.0, 3.0]);
        sample.offset = [0.1, 0.2, 0.3, 0.0];
        node.publish(&sample);

        let events = events.lock();
        assert_eq!(&events[0].values[..6], &[1.0, 2.0, 3.0, 0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_flush_complete_retried() {
        let sink = Arc::new(FlakySink::failing(2));
        let node = hw_node(1, &accel_descriptor(), FakeDevice::new(), sink.clone());
        node.enable(1, true).unwrap();
        node.flush(true).unwrap();
        assert_eq!(sink.written(), 1);
        assert_eq!(sink.attempts(), 3);
    }

    #[test]
    fn test_data_write_not_retried() {
        let sink = Arc::new(FlakySink::failing(1));
        let node = hw_node(1, &accel_descriptor(), FakeDevice::new(), sink.clone());
        node.enable(1, true).unwrap();
        node.publish(&Sample::at(1));
        assert_eq!(sink.written(), 0);
        assert_eq!(sink.attempts(), 1);
    }

    #[test]
    fn test_disable_answers_pending_flushes() {
        let (sink, events) = recording_sink();
        let node = batched_accel(sink);
        node.queue_flush(i64::MAX);
        node.enable(1, false).unwrap();
        assert_eq!(events.lock().iter().filter(|e| e.is_flush_complete()).count(), 1);
    }

    #[test]
    fn test_step_counter_record() {
        let (sink, events) = recording_sink();
        let mut desc = crate::data::DeviceDescriptor::new("steps", SensorType::StepCounter);
        desc.iio_index = Some(4);
        desc.channels = vec![crate::iio::ChannelInfo::new("steps", 4, 32)];
        let node = hw_node(1, &desc, FakeDevice::new(), sink);
        node.enable(1, true).unwrap();

        let mut s = Sample::at(10);
        s.step_count = 1234;
        node.publish(&s);
        assert_eq!(events.lock()[0].step_count, 1234);
    }
}
