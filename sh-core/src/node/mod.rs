//! Sensor nodes of the dependency graph
//!
//! A node is one sensor, physical or virtual. It owns:
//!
//! - the enable mask: bit `h` is set while handle `h` (a client, or a
//!   dependent node) needs this node
//! - the per-handle pollrate table and the aggregate pushed to dependencies
//! - up to five dependency edges, each with its own ring buffer
//! - weak references to the dependents it pushes samples to and triggers
//! - its delivery state on the outbound event stream
//!
//! Control-plane calls (`enable`, `set_delay`, `flush`) take this node's
//! control lock and then call into dependencies, so locks are always taken
//! top-down. The data path never takes a control lock.

mod delivery;
mod edges;
mod hardware;
mod pollrate;
mod software;
mod trigger;

pub use delivery::{EventSink, PipeSink};
pub use hardware::{select_full_scale, HardwareKind, HardwareNode};
pub use pollrate::{
    compute_fifo_length, is_constrained, kernel_buffer_length, select_sampling_frequency,
    DelayRequest, HwPollrate, PollrateTable,
};
pub use software::{align_secondary, SoftwareKind, SoftwareNode};
pub use trigger::Trigger;

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use sh_protocol::{ReportingMode, SensorInfo, SensorType};
use tracing::{debug, info, warn};

use crate::clock::monotonic_ns;
use crate::constants::graph::{FIRST_HANDLE, MAX_HANDLE};
use crate::constants::timing::UNCONSTRAINED;
use crate::data::{CalibrationStore, DeviceDescriptor, Sample, Tuning};
use crate::error::{Result, SensorHubError};
use crate::fusion::FusionEngine;
use crate::iio::{DeviceConfig, IioEvent, IioStreams};

use delivery::DeliveryState;
use edges::{DependencyTable, Dependents};

/// How a flush request completes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing is buffered; complete now
    Immediate,
    /// Buffered samples are on their way; complete when they are delivered
    Deferred,
}

/// What drives a node
pub enum NodeKind {
    /// Polls an IIO device
    Hardware(HardwareNode),
    /// Woken by its trigger dependency
    Software(SoftwareNode),
}

#[derive(Debug, Default)]
struct ControlState {
    mask: u64,
    delays: PollrateTable,
}

/// One sensor in the graph
pub struct SensorNode {
    handle: i32,
    sensor_type: SensorType,
    info: RwLock<SensorInfo>,
    tuning: Tuning,
    control: Mutex<ControlState>,
    /// Mirror of `control.mask` for lock-free reads
    mask: AtomicU64,
    /// Aggregate period this node asks of its dependencies
    requested_period: AtomicI64,
    edges: RwLock<DependencyTable>,
    dependents: RwLock<Dependents>,
    trigger: Trigger,
    delivery: Mutex<DeliveryState>,
    sink: Arc<dyn EventSink>,
    kind: NodeKind,
}

impl std::fmt::Debug for SensorNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorNode")
            .field("handle", &self.handle)
            .field("sensor_type", &self.sensor_type)
            .field("mask", &self.enabled_mask())
            .finish()
    }
}

fn handle_bit(handle: i32) -> Result<u64> {
    if !(FIRST_HANDLE..=MAX_HANDLE).contains(&handle) {
        return Err(SensorHubError::UnknownHandle(handle));
    }
    Ok(1u64 << handle)
}

impl SensorNode {
    fn with_kind(
        handle: i32,
        info: SensorInfo,
        kind: NodeKind,
        tuning: Tuning,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        handle_bit(handle)?;
        Ok(Self {
            handle,
            sensor_type: info.sensor_type,
            info: RwLock::new(info),
            tuning,
            control: Mutex::new(ControlState::default()),
            mask: AtomicU64::new(0),
            requested_period: AtomicI64::new(UNCONSTRAINED),
            edges: RwLock::new(DependencyTable::default()),
            dependents: RwLock::new(Dependents::default()),
            trigger: Trigger::new(),
            delivery: Mutex::new(DeliveryState::default()),
            sink,
            kind,
        })
    }

    /// Node backed by an IIO device
    pub fn hardware(
        handle: i32,
        descriptor: &DeviceDescriptor,
        device: Box<dyn DeviceConfig>,
        streams: Option<IioStreams>,
        calibration: &CalibrationStore,
        tuning: Tuning,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let (hw, info) = HardwareNode::new(handle, descriptor, device, streams, calibration)?;
        Self::with_kind(handle, info, NodeKind::Hardware(hw), tuning, sink)
    }

    /// Virtual node; fusion kinds need an engine
    pub fn software(
        handle: i32,
        kind: SoftwareKind,
        engine: Option<Box<dyn FusionEngine>>,
        tuning: Tuning,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let (sw, info) = SoftwareNode::new(handle, kind, engine)?;
        Self::with_kind(handle, info, NodeKind::Software(sw), tuning, sink)
    }

    pub fn handle(&self) -> i32 {
        self.handle
    }

    pub fn sensor_type(&self) -> SensorType {
        self.sensor_type
    }

    pub fn name(&self) -> String {
        self.info.read().name.clone()
    }

    pub fn info(&self) -> SensorInfo {
        self.info.read().clone()
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn tuning(&self) -> &Tuning {
        &self.tuning
    }

    pub fn enabled_mask(&self) -> u64 {
        self.mask.load(Ordering::Acquire)
    }

    /// Some handle needs this node
    pub fn is_active(&self) -> bool {
        self.enabled_mask() != 0
    }

    pub fn is_enabled_by(&self, handle: i32) -> bool {
        handle_bit(handle)
            .map(|bit| self.enabled_mask() & bit != 0)
            .unwrap_or(false)
    }

    /// Aggregate period requested of this node, after kind adjustments
    pub fn requested_period_ns(&self) -> i64 {
        self.requested_period.load(Ordering::Acquire)
    }

    /// Period samples actually arrive at; 0 while unknown
    pub fn actual_period_ns(&self) -> i64 {
        match &self.kind {
            NodeKind::Hardware(hw) => hw.actual_period_ns(),
            NodeKind::Software(_) => self
                .edges
                .read()
                .trigger_edge()
                .map(|edge| edge.producer().actual_period_ns())
                .unwrap_or(0),
        }
    }

    pub fn dependency_count(&self) -> usize {
        self.edges.read().len()
    }

    pub fn dependency_handles(&self) -> Vec<i32> {
        self.edges.read().iter().map(|e| e.producer().handle()).collect()
    }

    // ------------------------------------------------------------------
    // Control plane
    // ------------------------------------------------------------------

    /// Set or clear `handle`'s claim on this node
    pub fn enable(&self, handle: i32, enable: bool) -> Result<()> {
        let bit = handle_bit(handle)?;
        let mut ctl = self.control.lock();
        if enable {
            self.enable_locked(&mut ctl, handle, bit)
        } else {
            self.disable_locked(&mut ctl, handle, bit)
        }
    }

    fn enable_locked(&self, ctl: &mut ControlState, handle: i32, bit: u64) -> Result<()> {
        if ctl.mask & bit != 0 {
            return Ok(());
        }

        let was_active = ctl.mask != 0;
        if !was_active {
            self.enable_dependencies()?;
        }

        ctl.mask |= bit;
        self.mask.store(ctl.mask, Ordering::Release);

        if !was_active {
            if let Err(e) = self.kind_enable(true) {
                ctl.mask &= !bit;
                self.mask.store(ctl.mask, Ordering::Release);
                self.disable_dependencies();
                return Err(e);
            }
            info!(sensor = %self.name(), handle = self.handle, by = handle, "Sensor enabled");
        } else {
            debug!(sensor = %self.name(), by = handle, mask = ctl.mask, "Sensor claimed");
        }
        Ok(())
    }

    fn disable_locked(&self, ctl: &mut ControlState, handle: i32, bit: u64) -> Result<()> {
        if ctl.mask & bit == 0 {
            return Ok(());
        }

        let claimed = ctl.delays.get(handle);
        self.apply_delay_locked(ctl, handle, DelayRequest::UNCONSTRAINED)?;

        ctl.mask &= !bit;
        self.mask.store(ctl.mask, Ordering::Release);

        if ctl.mask == 0 {
            if let Err(e) = self.kind_enable(false) {
                ctl.mask |= bit;
                self.mask.store(ctl.mask, Ordering::Release);
                ctl.delays.restore(handle, claimed);
                if let Err(restore) = self.commit_delays(&ctl.delays, true) {
                    warn!(sensor = %self.name(), by = handle, "Failed to restore pollrate: {}", restore);
                }
                return Err(e);
            }
            self.disable_dependencies();
            self.complete_pending_flushes();
            info!(sensor = %self.name(), handle = self.handle, "Sensor disabled");
        } else {
            debug!(sensor = %self.name(), by = handle, mask = ctl.mask, "Sensor released");
        }
        Ok(())
    }

    fn enable_dependencies(&self) -> Result<()> {
        let producers = self.edges.read().producers();
        for (i, producer) in producers.iter().enumerate() {
            if let Err(e) = producer.enable(self.handle, true) {
                for done in producers[..i].iter().rev() {
                    if let Err(undo) = done.enable(self.handle, false) {
                        warn!(sensor = %done.name(), "Rollback of enable failed: {}", undo);
                    }
                }
                return Err(e);
            }
        }
        Ok(())
    }

    fn disable_dependencies(&self) {
        for producer in self.edges.read().producers() {
            if let Err(e) = producer.enable(self.handle, false) {
                warn!(sensor = %producer.name(), by = self.handle, "Failed to disable dependency: {}", e);
            }
        }
    }

    fn kind_enable(&self, enable: bool) -> Result<()> {
        match &self.kind {
            NodeKind::Hardware(hw) => hw.set_enabled(enable)?,
            NodeKind::Software(sw) => sw.set_enabled(enable)?,
        }
        if !enable && self.sensor_type == SensorType::StepCounter {
            self.delivery.lock().reset();
        }
        Ok(())
    }

    /// Record `handle`'s period and timeout and renegotiate
    pub fn set_delay(&self, handle: i32, period_ns: i64, timeout_ns: i64) -> Result<()> {
        handle_bit(handle)?;
        let mut ctl = self.control.lock();
        self.apply_delay_locked(&mut ctl, handle, DelayRequest::new(period_ns, timeout_ns))
    }

    fn apply_delay_locked(
        &self,
        ctl: &mut ControlState,
        handle: i32,
        request: DelayRequest,
    ) -> Result<()> {
        let previous = ctl.delays.set(handle, request);
        let active = ctl.mask != 0;

        if let Err(e) = self.commit_delays(&ctl.delays, active) {
            ctl.delays.restore(handle, previous);
            if let Err(restore) = self.commit_delays(&ctl.delays, active) {
                warn!(sensor = %self.name(), "Failed to restore pollrate: {}", restore);
            }
            return Err(e);
        }
        Ok(())
    }

    fn commit_delays(&self, table: &PollrateTable, active: bool) -> Result<()> {
        let requested = table.aggregate();
        let target = match &self.kind {
            NodeKind::Hardware(hw) => {
                hw.apply_pollrate(requested, active)?;
                requested
            }
            NodeKind::Software(sw) => sw.adjust_request(requested, &self.tuning),
        };
        self.requested_period
            .store(target.period_ns, Ordering::Release);

        for producer in self.edges.read().producers() {
            producer.set_delay(self.handle, target.period_ns, target.timeout_ns)?;
        }

        debug!(
            sensor = %self.name(),
            period_ns = target.period_ns,
            timeout_ns = target.timeout_ns,
            "Pollrate negotiated"
        );
        Ok(())
    }

    /// Flush buffered samples; with `report`, a flush-complete event follows
    pub fn flush(&self, report: bool) -> Result<FlushOutcome> {
        if self.sensor_type.reporting_mode() == ReportingMode::OneShot {
            return Err(SensorHubError::invalid_operation(format!(
                "{} is a one-shot sensor and cannot be flushed",
                self.name()
            )));
        }

        let _ctl = self.control.lock();
        if !self.is_active() {
            return Err(SensorHubError::invalid_operation(format!(
                "{} is not enabled",
                self.name()
            )));
        }

        let outcome = match &self.kind {
            NodeKind::Hardware(hw) => hw.flush()?,
            NodeKind::Software(_) => {
                let mut outcome = FlushOutcome::Immediate;
                for producer in self.edges.read().producers() {
                    if producer.flush(false)? == FlushOutcome::Deferred {
                        outcome = FlushOutcome::Deferred;
                    }
                }
                outcome
            }
        };

        if report {
            match outcome {
                FlushOutcome::Immediate => self.emit_flush_complete(),
                FlushOutcome::Deferred => self.queue_flush(monotonic_ns()),
            }
        }

        debug!(sensor = %self.name(), ?outcome, report, "Flush requested");
        Ok(outcome)
    }

    // ------------------------------------------------------------------
    // Data path
    // ------------------------------------------------------------------

    /// Write to the outbound stream, then feed dependents
    pub fn publish(&self, sample: &Sample) {
        self.deliver(sample);
        self.process_data(sample);
    }

    /// Push a copy to every active dependent and wake the triggered ones
    pub fn process_data(&self, sample: &Sample) {
        self.push_to_dependents(sample, |_| true);
        self.trigger_dependents();
    }

    pub(crate) fn push_to_dependents(&self, sample: &Sample, accept: impl Fn(SensorType) -> bool) {
        for consumer in self.dependents.read().push_targets() {
            if consumer.is_active() && accept(consumer.sensor_type()) {
                consumer.receive(self.handle, sample);
            }
        }
    }

    pub(crate) fn trigger_dependents(&self) {
        for consumer in self.dependents.read().trigger_targets() {
            if consumer.is_active() {
                consumer.trigger.signal();
            }
        }
    }

    /// Accept a sample from `producer`; older or repeated timestamps are dropped
    pub fn receive(&self, producer: i32, sample: &Sample) -> bool {
        self.edges
            .read()
            .by_handle(producer)
            .map(|edge| edge.accept(sample))
            .unwrap_or(false)
    }

    /// Decode one scan record and run it through this node
    pub fn ingest_scan(&self, record: &[u8]) -> Result<()> {
        match &self.kind {
            NodeKind::Hardware(hw) => hw.ingest_scan(self, record),
            NodeKind::Software(_) => Err(SensorHubError::invalid_operation(format!(
                "{} has no device",
                self.name()
            ))),
        }
    }

    /// Run one device event through this node
    pub fn ingest_event(&self, event: IioEvent) -> Result<()> {
        match &self.kind {
            NodeKind::Hardware(hw) => {
                hw.ingest_event(self, event);
                Ok(())
            }
            NodeKind::Software(_) => Err(SensorHubError::invalid_operation(format!(
                "{} has no device",
                self.name()
            ))),
        }
    }

    /// Drain the trigger dependency's ring; one output per drained sample
    pub fn trigger_event_received(&self) {
        if let NodeKind::Software(sw) = &self.kind {
            sw.drain(self);
        }
    }

    // ------------------------------------------------------------------
    // Threads
    // ------------------------------------------------------------------

    /// Whether this node has work for a dedicated thread
    pub fn needs_thread(&self) -> bool {
        match &self.kind {
            NodeKind::Hardware(hw) => hw.has_streams(),
            NodeKind::Software(_) => true,
        }
    }

    /// Thread body; returns once `stop` is observed
    pub fn run(&self, stop: &AtomicBool) {
        debug!(sensor = %self.name(), "Node thread started");
        match &self.kind {
            NodeKind::Hardware(hw) => hw.poll_loop(self, stop),
            NodeKind::Software(_) => {
                while self.trigger.wait() {
                    if stop.load(Ordering::Acquire) {
                        break;
                    }
                    self.trigger_event_received();
                }
            }
        }
        debug!(sensor = %self.name(), "Node thread exited");
    }

    /// Wake a thread blocked on this node's trigger so it can observe stop
    pub fn stop(&self) {
        self.trigger.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iio::{ChannelInfo, MockDeviceConfig};
    use crate::test_utils::{
        accel_descriptor, gyro_descriptor, hw_node, recording_sink, sw_node, FakeDevice,
    };
    use sh_protocol::EventKind;

    #[test]
    fn test_invalid_handle_rejected() {
        let (sink, _) = recording_sink();
        let node = hw_node(1, &accel_descriptor(), FakeDevice::new(), sink);
        assert!(matches!(node.enable(0, true), Err(SensorHubError::UnknownHandle(0))));
        assert!(matches!(node.enable(64, true), Err(SensorHubError::UnknownHandle(64))));
    }

    #[test]
    fn test_enable_enables_buffer_once() {
        let (sink, _) = recording_sink();
        let device = FakeDevice::new();
        let node = hw_node(1, &accel_descriptor(), device.clone(), sink);

        node.enable(1, true).unwrap();
        node.enable(5, true).unwrap();
        assert!(node.is_enabled_by(1) && node.is_enabled_by(5));
        assert_eq!(device.buffer_toggles(), vec![true]);

        node.enable(1, false).unwrap();
        assert!(node.is_active());
        node.enable(5, false).unwrap();
        assert!(!node.is_active());
        assert_eq!(device.buffer_toggles(), vec![true, false]);
    }

    #[test]
    fn test_enable_hook_failure_rolls_back() {
        let (sink, _) = recording_sink();
        let mut device = MockDeviceConfig::new();
        device.expect_describe().return_const("mock".to_string());
        device
            .expect_enable_buffer()
            .returning(|_| Err(SensorHubError::config_write("/mock", "buffer/enable", 1, "EIO")));

        let node = Arc::new(
            SensorNode::hardware(
                1,
                &accel_descriptor(),
                Box::new(device),
                None,
                &CalibrationStore::new(),
                Tuning::default(),
                sink,
            )
            .unwrap(),
        );

        assert!(node.enable(1, true).is_err());
        assert!(!node.is_active());
    }

    #[test]
    fn test_virtual_enable_cascades_to_shared_dependencies_once() {
        let (sink, _) = recording_sink();
        let accel_dev = FakeDevice::new();
        let gyro_dev = FakeDevice::new();
        let accel = hw_node(1, &accel_descriptor(), accel_dev.clone(), Arc::clone(&sink));
        let gyro = hw_node(2, &gyro_descriptor(), gyro_dev.clone(), Arc::clone(&sink));

        let a = sw_node(3, SoftwareKind::AccelGyroFusion6X, Arc::clone(&sink));
        a.add_dependency(&accel, false).unwrap();
        a.add_dependency(&gyro, true).unwrap();

        gyro.enable(2, true).unwrap();
        a.enable(3, true).unwrap();

        assert!(accel.is_enabled_by(3));
        assert!(gyro.is_enabled_by(3) && gyro.is_enabled_by(2));
        assert_eq!(accel_dev.buffer_toggles(), vec![true]);
        assert_eq!(gyro_dev.buffer_toggles(), vec![true]);

        // disabling one claimant keeps the shared dependency running
        a.enable(3, false).unwrap();
        assert!(!accel.is_active());
        assert!(gyro.is_active());
        assert_eq!(gyro_dev.buffer_toggles(), vec![true]);
    }

    #[test]
    fn test_dependency_enable_failure_unwinds() {
        let (sink, _) = recording_sink();
        let accel = hw_node(1, &accel_descriptor(), FakeDevice::new(), Arc::clone(&sink));
        let gyro_dev = FakeDevice::new();
        gyro_dev.fail_key("buffer/enable");
        let gyro = hw_node(2, &gyro_descriptor(), gyro_dev, Arc::clone(&sink));

        let fusion = sw_node(3, SoftwareKind::AccelGyroFusion6X, Arc::clone(&sink));
        fusion.add_dependency(&accel, false).unwrap();
        fusion.add_dependency(&gyro, true).unwrap();

        assert!(fusion.enable(3, true).is_err());
        assert!(!fusion.is_active());
        assert!(!accel.is_active());
        assert!(!gyro.is_active());
    }

    #[test]
    fn test_set_delay_negotiates_hardware_pollrate() {
        let (sink, _) = recording_sink();
        let device = FakeDevice::new();
        let mut desc = accel_descriptor();
        desc.sampling_frequencies = vec![50.0, 100.0, 200.0];
        desc.fifo_max = 20;
        let node = hw_node(1, &desc, device.clone(), sink);

        node.enable(1, true).unwrap();
        node.set_delay(1, 12_500_000, 500_000_000).unwrap();

        assert_eq!(node.actual_period_ns(), 10_000_000);
        assert_eq!(device.value("sampling_frequency").as_deref(), Some("100"));
        assert_eq!(device.value("buffer/length").as_deref(), Some("40"));
        // buffer cycled around the length change
        assert_eq!(device.buffer_toggles(), vec![true, false, true]);
    }

    #[test]
    fn test_set_delay_failure_restores_previous_request() {
        let (sink, _) = recording_sink();
        let device = FakeDevice::new();
        let mut desc = accel_descriptor();
        desc.sampling_frequencies = vec![50.0, 100.0];
        let node = hw_node(1, &desc, device.clone(), sink);

        node.set_delay(1, 20_000_000, 0).unwrap();
        assert_eq!(node.actual_period_ns(), 20_000_000);

        device.fail_key("sampling_frequency");
        assert!(node.set_delay(1, 10_000_000, 0).is_err());
        assert_eq!(node.actual_period_ns(), 20_000_000);
        assert_eq!(node.requested_period_ns(), 20_000_000);
    }

    #[test]
    fn test_disable_releases_pollrate_claim() {
        let (sink, _) = recording_sink();
        let mut desc = accel_descriptor();
        desc.sampling_frequencies = vec![50.0, 100.0];
        let node = hw_node(1, &desc, FakeDevice::new(), sink);

        node.enable(1, true).unwrap();
        node.enable(2, true).unwrap();
        node.set_delay(1, 10_000_000, 0).unwrap();
        node.set_delay(2, 20_000_000, 0).unwrap();
        assert_eq!(node.requested_period_ns(), 10_000_000);

        node.enable(1, false).unwrap();
        assert_eq!(node.requested_period_ns(), 20_000_000);
    }

    #[test]
    fn test_disable_hook_failure_restores_pollrate_claim() {
        let (sink, _) = recording_sink();
        let device = FakeDevice::new();
        let mut desc = accel_descriptor();
        desc.sampling_frequencies = vec![50.0, 100.0];
        let node = hw_node(1, &desc, device.clone(), sink);

        node.enable(1, true).unwrap();
        node.set_delay(1, 10_000_000, 0).unwrap();

        device.fail_key("buffer/enable");
        assert!(node.enable(1, false).is_err());
        assert!(node.is_enabled_by(1));
        assert_eq!(node.requested_period_ns(), 10_000_000);
        assert_eq!(node.actual_period_ns(), 10_000_000);
        assert_eq!(device.value("sampling_frequency").as_deref(), Some("100"));
    }

    #[test]
    fn test_disable_fails_when_pollrate_release_fails() {
        let (sink, _) = recording_sink();
        let device = FakeDevice::new();
        let mut desc = accel_descriptor();
        desc.sampling_frequencies = vec![100.0];
        desc.fifo_max = 32;
        let node = hw_node(1, &desc, device.clone(), sink);

        node.enable(1, true).unwrap();
        node.set_delay(1, 10_000_000, 100_000_000).unwrap();
        assert_eq!(device.value("buffer/length").as_deref(), Some("20"));

        // unbatching needs the buffer cycled, which now fails
        device.fail_key("buffer/enable");
        assert!(node.enable(1, false).is_err());
        assert!(node.is_enabled_by(1));
        assert_eq!(node.requested_period_ns(), 10_000_000);
        assert_eq!(device.value("buffer/length").as_deref(), Some("20"));
        assert_eq!(node.flush(false).unwrap(), FlushOutcome::Deferred);
    }

    #[test]
    fn test_process_data_respects_last_received() {
        let (sink, _) = recording_sink();
        let gyro = hw_node(1, &gyro_descriptor(), FakeDevice::new(), Arc::clone(&sink));
        let uncal = sw_node(2, SoftwareKind::GyroscopeUncalibrated, Arc::clone(&sink));
        uncal.add_dependency(&gyro, true).unwrap();
        uncal.enable(2, true).unwrap();

        gyro.process_data(&Sample::at(100));
        gyro.process_data(&Sample::at(100));
        gyro.process_data(&Sample::at(50));
        gyro.process_data(&Sample::at(200));

        let edges = uncal.edges.read();
        let ring = edges.trigger_edge().unwrap().ring();
        assert_eq!(ring.read().unwrap().0.timestamp, 100);
        assert_eq!(ring.read().unwrap().0.timestamp, 200);
        assert!(ring.read().is_err());
    }

    #[test]
    fn test_inactive_dependents_are_skipped() {
        let (sink, _) = recording_sink();
        let gyro = hw_node(1, &gyro_descriptor(), FakeDevice::new(), Arc::clone(&sink));
        let uncal = sw_node(2, SoftwareKind::GyroscopeUncalibrated, Arc::clone(&sink));
        uncal.add_dependency(&gyro, true).unwrap();

        gyro.process_data(&Sample::at(10));
        assert_eq!(uncal.edges.read().trigger_edge().unwrap().ring().available(), 0);
    }

    #[test]
    fn test_flush_without_batching_completes_immediately() {
        let (sink, events) = recording_sink();
        let node = hw_node(4, &accel_descriptor(), FakeDevice::new(), sink);
        node.enable(4, true).unwrap();

        assert_eq!(node.flush(true).unwrap(), FlushOutcome::Immediate);
        let events = events.lock();
        assert_eq!(events.len(), 1);
        assert!(events[0].is_flush_complete());
        assert_eq!(events[0].handle, 4);
    }

    #[test]
    fn test_flush_with_batching_is_deferred() {
        let (sink, events) = recording_sink();
        let device = FakeDevice::new();
        let mut desc = accel_descriptor();
        desc.sampling_frequencies = vec![100.0];
        desc.fifo_max = 32;
        let node = hw_node(1, &desc, device.clone(), sink);
        node.enable(1, true).unwrap();
        node.set_delay(1, 10_000_000, 100_000_000).unwrap();

        assert_eq!(node.flush(true).unwrap(), FlushOutcome::Deferred);
        assert_eq!(device.value("flush").as_deref(), Some("1"));
        assert!(events.lock().is_empty());

        // data stamped after the request crosses the flush threshold
        let after = monotonic_ns() + 1;
        node.publish(&Sample::with_values(after, &[1.0, 2.0, 3.0]));
        let events = events.lock();
        assert_eq!(events.len(), 2);
        assert!(events[0].is_flush_complete());
        assert_eq!(events[1].kind, EventKind::Data);
    }

    #[test]
    fn test_flush_with_two_sample_fifo_is_deferred() {
        let (sink, events) = recording_sink();
        let device = FakeDevice::new();
        let mut desc = accel_descriptor();
        desc.sampling_frequencies = vec![100.0];
        desc.fifo_max = 32;
        let node = hw_node(1, &desc, device.clone(), sink);
        node.enable(1, true).unwrap();

        // one sample per timeout still fits the default kernel buffer
        node.set_delay(1, 10_000_000, 10_000_000).unwrap();
        assert_eq!(node.flush(true).unwrap(), FlushOutcome::Immediate);
        assert_eq!(device.value("flush"), None);
        events.lock().clear();

        node.set_delay(1, 10_000_000, 20_000_000).unwrap();
        assert_eq!(device.value("buffer/length").as_deref(), Some("4"));
        assert_eq!(node.flush(true).unwrap(), FlushOutcome::Deferred);
        assert_eq!(device.value("flush").as_deref(), Some("1"));
        assert!(events.lock().is_empty());
    }

    #[test]
    fn test_flush_inactive_or_one_shot_is_invalid() {
        let (sink, _) = recording_sink();
        let node = hw_node(1, &accel_descriptor(), FakeDevice::new(), Arc::clone(&sink));
        assert!(matches!(node.flush(true), Err(SensorHubError::InvalidOperation(_))));

        let mut sig = crate::data::DeviceDescriptor::new("sigmo", SensorType::SignificantMotion);
        sig.iio_index = Some(9);
        let sig = hw_node(2, &sig, FakeDevice::new(), sink);
        sig.enable(2, true).unwrap();
        assert!(matches!(sig.flush(true), Err(SensorHubError::InvalidOperation(_))));
    }

    #[test]
    fn test_significant_motion_disables_itself() {
        let (sink, events) = recording_sink();
        let mut desc = crate::data::DeviceDescriptor::new("sigmo", SensorType::SignificantMotion);
        desc.iio_index = Some(9);
        let node = hw_node(7, &desc, FakeDevice::new(), sink);
        node.enable(7, true).unwrap();

        node.ingest_event(IioEvent { id: 1, timestamp: 1_000 }).unwrap();
        assert!(!node.is_active());

        let events = events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].values[0], 1.0);
        assert_eq!(events[0].timestamp, 1_000);
    }

    #[test]
    fn test_ingest_scan_on_software_node_fails() {
        let (sink, _) = recording_sink();
        let node = sw_node(3, SoftwareKind::GyroscopeUncalibrated, sink);
        assert!(node.ingest_scan(&[0u8; 16]).is_err());
    }

    #[test]
    fn test_ingest_scan_applies_layout() {
        let (sink, events) = recording_sink();
        let mut desc = crate::data::DeviceDescriptor::new("baro", SensorType::Pressure);
        desc.iio_index = Some(3);
        desc.channels = vec![ChannelInfo::new("p", 4, 32).with_scale(0.5), ChannelInfo::timestamp()];
        let node = hw_node(1, &desc, FakeDevice::new(), sink);
        node.enable(1, true).unwrap();

        let mut record = vec![0u8; 16];
        record[0..4].copy_from_slice(&2000u32.to_le_bytes());
        record[8..16].copy_from_slice(&42i64.to_le_bytes());
        node.ingest_scan(&record).unwrap();

        let events = events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].values[0], 1000.0);
        assert_eq!(events[0].timestamp, 42);
    }
}
