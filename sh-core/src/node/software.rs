//! Virtual nodes
//!
//! Software nodes own no device. They sleep on their trigger, drain the
//! trigger dependency's ring and either pass samples through (leaf
//! sensors) or run a fusion engine over time-aligned inputs and fan its
//! output channels out to the leaves that consume them.

use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use sh_protocol::{SensorInfo, SensorType};
use tracing::{debug, trace, warn};

use super::edges::{DependencyEdge, DependencyTable};
use super::pollrate::{is_constrained, DelayRequest};
use super::SensorNode;
use crate::constants::timing::hz_to_period_ns;
use crate::constants::units::{
    ACCEL_DERIVED_MAX_RANGE, FUSION_MAX_RANGE, FUSION_RESOLUTION, ORIENTATION_MAX_RANGE,
};
use crate::data::{Sample, Tuning};
use crate::error::{Result, SensorHubError};
use crate::fusion::{AlignmentOutcome, FusionChannel, FusionEngine, FusionInputs};
use crate::ring_buffer::RingBuffer;

/// Virtual sensor kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SoftwareKind {
    AccelGyroFusion6X,
    AccelMagnFusion6X,
    AccelMagnGyroFusion9X,
    GameRotationVector,
    GeomagneticRotationVector,
    RotationVector,
    Orientation,
    Gravity,
    LinearAcceleration,
    GyroscopeUncalibrated,
    MagneticFieldUncalibrated,
}

/// Which dependency metadata a kind takes over
#[derive(Debug, Clone, Copy)]
struct Inheritance {
    resolution: bool,
    range: bool,
    delay: bool,
    name: bool,
}

impl Inheritance {
    const fn new(resolution: bool, range: bool, delay: bool, name: bool) -> Self {
        Self {
            resolution,
            range,
            delay,
            name,
        }
    }
}

const FUSION_AG: SensorType = SensorType::AccelGyroFusion6X;
const FUSION_AM: SensorType = SensorType::AccelMagnFusion6X;
const FUSION_9X: SensorType = SensorType::AccelMagnGyroFusion9X;

impl SoftwareKind {
    pub const ALL: [SoftwareKind; 11] = [
        SoftwareKind::AccelGyroFusion6X,
        SoftwareKind::AccelMagnFusion6X,
        SoftwareKind::AccelMagnGyroFusion9X,
        SoftwareKind::GameRotationVector,
        SoftwareKind::GeomagneticRotationVector,
        SoftwareKind::RotationVector,
        SoftwareKind::Orientation,
        SoftwareKind::Gravity,
        SoftwareKind::LinearAcceleration,
        SoftwareKind::GyroscopeUncalibrated,
        SoftwareKind::MagneticFieldUncalibrated,
    ];

    pub fn from_sensor_type(sensor_type: SensorType) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.sensor_type() == sensor_type)
    }

    pub fn sensor_type(self) -> SensorType {
        match self {
            SoftwareKind::AccelGyroFusion6X => FUSION_AG,
            SoftwareKind::AccelMagnFusion6X => FUSION_AM,
            SoftwareKind::AccelMagnGyroFusion9X => FUSION_9X,
            SoftwareKind::GameRotationVector => SensorType::GameRotationVector,
            SoftwareKind::GeomagneticRotationVector => SensorType::GeomagneticRotationVector,
            SoftwareKind::RotationVector => SensorType::RotationVector,
            SoftwareKind::Orientation => SensorType::Orientation,
            SoftwareKind::Gravity => SensorType::Gravity,
            SoftwareKind::LinearAcceleration => SensorType::LinearAcceleration,
            SoftwareKind::GyroscopeUncalibrated => SensorType::GyroscopeUncalibrated,
            SoftwareKind::MagneticFieldUncalibrated => SensorType::MagneticFieldUncalibrated,
        }
    }

    pub fn is_fusion(self) -> bool {
        matches!(
            self,
            SoftwareKind::AccelGyroFusion6X
                | SoftwareKind::AccelMagnFusion6X
                | SoftwareKind::AccelMagnGyroFusion9X
        )
    }

    pub fn is_uncalibrated(self) -> bool {
        matches!(
            self,
            SoftwareKind::GyroscopeUncalibrated | SoftwareKind::MagneticFieldUncalibrated
        )
    }

    /// Dependency slots in wiring order; each slot lists acceptable types,
    /// most preferred first
    pub fn dependency_slots(self) -> &'static [&'static [SensorType]] {
        match self {
            SoftwareKind::AccelGyroFusion6X => {
                &[&[SensorType::Accelerometer], &[SensorType::Gyroscope]]
            }
            SoftwareKind::AccelMagnFusion6X => {
                &[&[SensorType::Accelerometer], &[SensorType::MagneticField]]
            }
            SoftwareKind::AccelMagnGyroFusion9X => &[
                &[SensorType::Accelerometer],
                &[SensorType::MagneticField],
                &[SensorType::Gyroscope],
            ],
            SoftwareKind::GameRotationVector => &[&[FUSION_AG]],
            SoftwareKind::GeomagneticRotationVector => &[&[FUSION_AM]],
            SoftwareKind::RotationVector => &[&[FUSION_9X]],
            SoftwareKind::Orientation => &[&[FUSION_9X, FUSION_AM]],
            SoftwareKind::Gravity | SoftwareKind::LinearAcceleration => {
                &[&[FUSION_9X, FUSION_AG, FUSION_AM]]
            }
            SoftwareKind::GyroscopeUncalibrated => &[&[SensorType::Gyroscope]],
            SoftwareKind::MagneticFieldUncalibrated => &[&[SensorType::MagneticField]],
        }
    }

    /// Index into [`dependency_slots`](Self::dependency_slots) of the trigger source
    pub fn trigger_slot(self) -> usize {
        match self {
            SoftwareKind::AccelGyroFusion6X | SoftwareKind::AccelMagnFusion6X => 1,
            SoftwareKind::AccelMagnGyroFusion9X => 2,
            _ => 0,
        }
    }

    /// Channels a fusion kind produces; empty for leaves
    pub fn outputs(self) -> &'static [FusionChannel] {
        match self {
            SoftwareKind::AccelGyroFusion6X => &[
                FusionChannel::GameRotationVector,
                FusionChannel::LinearAcceleration,
                FusionChannel::Gravity,
            ],
            SoftwareKind::AccelMagnFusion6X => &[
                FusionChannel::GeomagneticRotationVector,
                FusionChannel::Orientation,
                FusionChannel::LinearAcceleration,
                FusionChannel::Gravity,
            ],
            SoftwareKind::AccelMagnGyroFusion9X => &[
                FusionChannel::RotationVector,
                FusionChannel::Orientation,
                FusionChannel::Gravity,
                FusionChannel::LinearAcceleration,
            ],
            _ => &[],
        }
    }

    fn default_name(self) -> &'static str {
        match self {
            SoftwareKind::AccelGyroFusion6X => "Accel-Gyro Fusion 6X",
            SoftwareKind::AccelMagnFusion6X => "Accel-Magn Fusion 6X",
            SoftwareKind::AccelMagnGyroFusion9X => "Accel-Magn-Gyro Fusion 9X",
            SoftwareKind::GameRotationVector => "Game Rotation Vector",
            SoftwareKind::GeomagneticRotationVector => "Geomagnetic Rotation Vector",
            SoftwareKind::RotationVector => "Rotation Vector",
            SoftwareKind::Orientation => "Orientation",
            SoftwareKind::Gravity => "Gravity",
            SoftwareKind::LinearAcceleration => "Linear Acceleration",
            SoftwareKind::GyroscopeUncalibrated => "Gyroscope Uncalibrated",
            SoftwareKind::MagneticFieldUncalibrated => "Magnetometer Uncalibrated",
        }
    }

    fn inheritance(self) -> Inheritance {
        match self {
            SoftwareKind::AccelGyroFusion6X
            | SoftwareKind::AccelMagnFusion6X
            | SoftwareKind::AccelMagnGyroFusion9X => Inheritance::new(false, false, true, false),
            SoftwareKind::GameRotationVector
            | SoftwareKind::GeomagneticRotationVector
            | SoftwareKind::RotationVector => Inheritance::new(true, true, true, false),
            SoftwareKind::Orientation | SoftwareKind::Gravity | SoftwareKind::LinearAcceleration => {
                Inheritance::new(true, false, true, false)
            }
            SoftwareKind::GyroscopeUncalibrated | SoftwareKind::MagneticFieldUncalibrated => {
                Inheritance::new(true, true, true, true)
            }
        }
    }

    fn initial_info(self, handle: i32) -> SensorInfo {
        let mut info = SensorInfo::new(self.default_name(), handle, self.sensor_type());
        match self {
            k if k.is_fusion() => {
                info.resolution = FUSION_RESOLUTION;
                info.max_range = FUSION_MAX_RANGE;
            }
            SoftwareKind::Orientation => info.max_range = ORIENTATION_MAX_RANGE,
            SoftwareKind::Gravity | SoftwareKind::LinearAcceleration => {
                info.max_range = ACCEL_DERIVED_MAX_RANGE
            }
            _ => {}
        }
        info
    }
}

/// Look for a secondary sample matching `primary_ts`.
///
/// Misaligned samples are consumed while looking. An empty ring is retried
/// `retry_count` times, `retry_sleep` apart; after that the newest
/// misaligned sample, if any, is returned as stale.
pub fn align_secondary(
    ring: &RingBuffer,
    primary_ts: i64,
    band_ns: i64,
    retry_count: u32,
    retry_sleep: Duration,
) -> AlignmentOutcome {
    let mut best = None;
    let mut retries = retry_count;

    loop {
        match ring.read() {
            Ok((sample, _)) => {
                if primary_ts.saturating_sub(sample.timestamp) < band_ns {
                    return AlignmentOutcome::Aligned(sample);
                }
                best = Some(sample);
            }
            Err(_) if retries > 0 => {
                retries -= 1;
                thread::sleep(retry_sleep);
            }
            Err(_) => {
                return best.map_or(AlignmentOutcome::Missing, AlignmentOutcome::Stale);
            }
        }
    }
}

pub struct SoftwareNode {
    kind: SoftwareKind,
    engine: Option<Mutex<Box<dyn FusionEngine>>>,
}

impl SoftwareNode {
    /// Fusion kinds require an engine, which is initialised here
    pub fn new(
        handle: i32,
        kind: SoftwareKind,
        engine: Option<Box<dyn FusionEngine>>,
    ) -> Result<(Self, SensorInfo)> {
        let engine = match (kind.is_fusion(), engine) {
            (true, Some(mut engine)) => {
                engine.init()?;
                Some(Mutex::new(engine))
            }
            (true, None) => {
                return Err(SensorHubError::config(format!(
                    "{} requires a fusion engine",
                    kind.default_name()
                )))
            }
            (false, _) => None,
        };

        let node = Self { kind, engine };
        Ok((node, kind.initial_info(handle)))
    }

    pub fn kind(&self) -> SoftwareKind {
        self.kind
    }

    pub(crate) fn set_enabled(&self, enable: bool) -> Result<()> {
        match &self.engine {
            Some(engine) => engine.lock().enable(enable),
            None => Ok(()),
        }
    }

    /// Fusion runs at least at the configured minimum rate once constrained
    pub(crate) fn adjust_request(&self, requested: DelayRequest, tuning: &Tuning) -> DelayRequest {
        if !self.kind.is_fusion() || !is_constrained(requested.period_ns) {
            return requested;
        }
        let ceiling = hz_to_period_ns(tuning.min_fusion_pollrate_hz);
        DelayRequest::new(requested.period_ns.min(ceiling), requested.timeout_ns)
    }

    /// Fold one dependency's metadata into this node's
    pub(crate) fn merge_metadata(
        &self,
        info: &mut SensorInfo,
        dependency: &SensorInfo,
        is_trigger: bool,
        first: bool,
    ) {
        let inherit = self.kind.inheritance();

        if first {
            info.wake_up = dependency.wake_up;
            info.fifo_max = dependency.fifo_max;
        } else {
            info.wake_up &= dependency.wake_up;
            info.fifo_max = info.fifo_max.min(dependency.fifo_max);
        }

        if inherit.delay {
            if info.min_delay_us == 0 || dependency.min_delay_us > info.min_delay_us {
                info.min_delay_us = dependency.min_delay_us;
            }
            if dependency.max_delay_us > 0
                && (info.max_delay_us == 0 || dependency.max_delay_us < info.max_delay_us)
            {
                info.max_delay_us = dependency.max_delay_us;
            }
        }

        if !is_trigger {
            return;
        }
        if inherit.resolution {
            info.resolution = dependency.resolution;
        }
        if inherit.range {
            info.max_range = dependency.max_range;
        }
        if inherit.name {
            info.name = format!("{} (uncalibrated)", dependency.name);
        }
    }

    /// Drain the trigger ring, one output per drained sample
    pub(crate) fn drain(&self, node: &SensorNode) {
        let edges = node.edges.read();
        let Some(primary) = edges.trigger_edge() else {
            warn!(sensor = %node.name(), "Triggered without a trigger dependency");
            return;
        };

        match &self.engine {
            Some(engine) => self.drain_fusion(node, &edges, primary, engine),
            None => self.drain_leaf(node, primary),
        }
    }

    fn drain_leaf(&self, node: &SensorNode, primary: &DependencyEdge) {
        while let Ok((mut sample, _)) = primary.ring().read() {
            if self.kind.is_uncalibrated() {
                // offset keeps the producer's bias
                sample.processed[..3].copy_from_slice(&sample.raw[..3]);
            }
            node.publish(&sample);
        }
    }

    fn drain_fusion(
        &self,
        node: &SensorNode,
        edges: &DependencyTable,
        primary: &DependencyEdge,
        engine: &Mutex<Box<dyn FusionEngine>>,
    ) {
        let tuning = node.tuning();
        let period = primary.producer().actual_period_ns();
        let band = if is_constrained(period) {
            tuning.upper_skew(period)
        } else {
            i64::MAX
        };

        while let Ok((sample, _)) = primary.ring().read() {
            let mut inputs = FusionInputs::default();
            inputs.set(primary.sensor_type(), sample);

            let mut missing = false;
            for edge in edges.secondaries() {
                match align_secondary(
                    edge.ring(),
                    sample.timestamp,
                    band,
                    tuning.align_retry_count,
                    tuning.align_retry_sleep(),
                ) {
                    AlignmentOutcome::Aligned(s) => inputs.set(edge.sensor_type(), s),
                    AlignmentOutcome::Stale(s) => {
                        inputs.set(edge.sensor_type(), s);
                        inputs.stale = true;
                    }
                    AlignmentOutcome::Missing => {
                        trace!(
                            sensor = %node.name(),
                            input = ?edge.sensor_type(),
                            ts = sample.timestamp,
                            "Secondary input missing"
                        );
                        missing = true;
                    }
                }
            }

            let mut engine = engine.lock();
            if !missing {
                if let Err(e) = engine.run(&inputs, sample.timestamp) {
                    warn!(sensor = %node.name(), ts = sample.timestamp, "Fusion step failed: {}", e);
                }
            }

            for &channel in self.kind.outputs() {
                match engine.output(channel) {
                    Ok(values) => {
                        let out = Sample::with_values(sample.timestamp, &values);
                        node.push_to_dependents(&out, |t| FusionChannel::for_sensor(t) == Some(channel));
                    }
                    Err(e) => {
                        debug!(sensor = %node.name(), ?channel, "No fusion output: {}", e);
                    }
                }
            }
            drop(engine);

            node.trigger_dependents();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion::MockFusionEngine;
    use crate::test_utils::{
        accel_descriptor, gyro_descriptor, hw_node, recording_sink, sw_node, FakeDevice,
    };
    use crate::node::EventSink;
    use std::sync::Arc;

    fn fusion_mock(runs: usize) -> MockFusionEngine {
        let mut engine = MockFusionEngine::new();
        engine.expect_init().times(1).returning(|| Ok(()));
        engine.expect_enable().returning(|_| Ok(()));
        engine.expect_run().times(runs).returning(|_, _| Ok(()));
        engine.expect_output().returning(|channel| {
            Ok(match channel {
                FusionChannel::GameRotationVector => [0.1, 0.2, 0.3, 0.9],
                FusionChannel::Gravity => [0.0, 0.0, 9.8, 0.0],
                _ => [1.0, 1.0, 1.0, 0.0],
            })
        });
        engine
    }

    fn fusion_node(handle: i32, engine: MockFusionEngine, sink: Arc<dyn EventSink>) -> Arc<SensorNode> {
        Arc::new(
            SensorNode::software(
                handle,
                SoftwareKind::AccelGyroFusion6X,
                Some(Box::new(engine)),
                Tuning {
                    align_retry_count: 1,
                    align_retry_sleep_us: 1,
                    ..Default::default()
                },
                sink,
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_kind_tables() {
        let kind = SoftwareKind::AccelMagnGyroFusion9X;
        assert_eq!(kind.dependency_slots().len(), 3);
        assert_eq!(kind.dependency_slots()[kind.trigger_slot()], &[SensorType::Gyroscope]);
        assert_eq!(kind.outputs().len(), 4);
        assert!(SoftwareKind::Gravity.outputs().is_empty());
        assert_eq!(
            SoftwareKind::from_sensor_type(SensorType::GameRotationVector),
            Some(SoftwareKind::GameRotationVector)
        );
        assert_eq!(SoftwareKind::from_sensor_type(SensorType::Accelerometer), None);
    }

    #[test]
    fn test_fusion_requires_engine() {
        assert!(SoftwareNode::new(3, SoftwareKind::AccelGyroFusion6X, None).is_err());
        assert!(SoftwareNode::new(3, SoftwareKind::Gravity, None).is_ok());
    }

    #[test]
    fn test_engine_init_failure_propagates() {
        let mut engine = MockFusionEngine::new();
        engine
            .expect_init()
            .returning(|| Err(SensorHubError::generic("no calibration")));
        let res = SoftwareNode::new(3, SoftwareKind::AccelMagnFusion6X, Some(Box::new(engine)));
        assert!(res.is_err());
    }

    #[test]
    fn test_adjust_request_clamps_fusion_only() {
        let tuning = Tuning::default();
        let (fusion, _) =
            SoftwareNode::new(3, SoftwareKind::AccelGyroFusion6X, Some(Box::new(fusion_mock(0)))).unwrap();
        let (leaf, _) = SoftwareNode::new(4, SoftwareKind::Gravity, None).unwrap();

        let slow = DelayRequest::new(100_000_000, 0);
        assert_eq!(fusion.adjust_request(slow, &tuning).period_ns, 20_000_000);
        assert_eq!(leaf.adjust_request(slow, &tuning).period_ns, 100_000_000);
        assert_eq!(
            fusion.adjust_request(DelayRequest::UNCONSTRAINED, &tuning),
            DelayRequest::UNCONSTRAINED
        );
    }

    #[test]
    fn test_align_secondary_outcomes() {
        let ring = RingBuffer::new(4).unwrap();
        let band = 11_000_000;

        ring.write(Sample::at(95_000_000));
        assert_eq!(
            align_secondary(&ring, 100_000_000, band, 0, Duration::ZERO),
            AlignmentOutcome::Aligned(Sample::at(95_000_000))
        );

        // old samples are consumed; the newest becomes the stale fallback
        ring.write(Sample::at(10_000_000));
        ring.write(Sample::at(20_000_000));
        assert_eq!(
            align_secondary(&ring, 100_000_000, band, 2, Duration::ZERO),
            AlignmentOutcome::Stale(Sample::at(20_000_000))
        );
        assert_eq!(ring.available(), 0);

        assert_eq!(
            align_secondary(&ring, 100_000_000, band, 2, Duration::ZERO),
            AlignmentOutcome::Missing
        );
    }

    #[test]
    fn test_merge_metadata_for_uncalibrated() {
        let (sink, _) = recording_sink();
        let mut desc = gyro_descriptor();
        desc.sampling_frequencies = vec![26.0, 208.0];
        desc.fifo_max = 16;
        let gyro = hw_node(1, &desc, FakeDevice::new(), Arc::clone(&sink));
        let uncal = sw_node(2, SoftwareKind::GyroscopeUncalibrated, sink);
        uncal.add_dependency(&gyro, true).unwrap();

        let gyro_info = gyro.info();
        let info = uncal.info();
        assert_eq!(info.name, format!("{} (uncalibrated)", gyro_info.name));
        assert_eq!(info.resolution, gyro_info.resolution);
        assert_eq!(info.max_range, gyro_info.max_range);
        assert_eq!(info.min_delay_us, gyro_info.min_delay_us);
        assert_eq!(info.max_delay_us, gyro_info.max_delay_us);
        assert_eq!(info.fifo_max, 16);
    }

    #[test]
    fn test_merge_metadata_for_fusion() {
        let (sink, _) = recording_sink();
        let mut a = accel_descriptor();
        a.sampling_frequencies = vec![12.5, 400.0];
        a.fifo_max = 32;
        let mut g = gyro_descriptor();
        g.sampling_frequencies = vec![25.0, 200.0];
        g.fifo_max = 8;
        let accel = hw_node(1, &a, FakeDevice::new(), Arc::clone(&sink));
        let gyro = hw_node(2, &g, FakeDevice::new(), Arc::clone(&sink));

        let fusion = fusion_node(3, fusion_mock(0), sink);
        fusion.add_dependency(&accel, false).unwrap();
        fusion.add_dependency(&gyro, true).unwrap();

        let info = fusion.info();
        // slowest fastest rate, fastest slowest rate
        assert_eq!(info.min_delay_us, 5000);
        assert_eq!(info.max_delay_us, 40000);
        assert_eq!(info.fifo_max, 8);
        assert_eq!(info.max_range, FUSION_MAX_RANGE);
        assert_eq!(info.name, "Accel-Gyro Fusion 6X");
    }

    #[test]
    fn test_fusion_fans_out_by_channel() {
        let (sink, events) = recording_sink();
        let accel = hw_node(1, &accel_descriptor(), FakeDevice::new(), Arc::clone(&sink));
        let gyro = hw_node(2, &gyro_descriptor(), FakeDevice::new(), Arc::clone(&sink));
        let fusion = fusion_node(3, fusion_mock(1), Arc::clone(&sink));
        fusion.add_dependency(&accel, false).unwrap();
        fusion.add_dependency(&gyro, true).unwrap();

        let game = sw_node(4, SoftwareKind::GameRotationVector, Arc::clone(&sink));
        let gravity = sw_node(5, SoftwareKind::Gravity, sink);
        game.add_dependency(&fusion, true).unwrap();
        gravity.add_dependency(&fusion, true).unwrap();

        game.enable(4, true).unwrap();
        gravity.enable(5, true).unwrap();
        assert!(accel.is_enabled_by(3) && gyro.is_enabled_by(3));

        accel.process_data(&Sample::with_values(1_000, &[0.0, 0.0, 9.8]));
        gyro.process_data(&Sample::with_values(1_000, &[0.0, 0.1, 0.0]));
        fusion.trigger_event_received();
        game.trigger_event_received();
        gravity.trigger_event_received();

        let events = events.lock();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].handle, 4);
        assert_eq!(&events[0].values[..4], &[0.1, 0.2, 0.3, 0.9]);
        assert_eq!(events[1].handle, 5);
        assert_eq!(&events[1].values[..3], &[0.0, 0.0, 9.8]);
        assert!(events.iter().all(|e| e.timestamp == 1_000));
    }

    #[test]
    fn test_missing_secondary_skips_run_but_publishes() {
        let (sink, events) = recording_sink();
        let accel = hw_node(1, &accel_descriptor(), FakeDevice::new(), Arc::clone(&sink));
        let gyro = hw_node(2, &gyro_descriptor(), FakeDevice::new(), Arc::clone(&sink));
        let fusion = fusion_node(3, fusion_mock(0), Arc::clone(&sink));
        fusion.add_dependency(&accel, false).unwrap();
        fusion.add_dependency(&gyro, true).unwrap();
        let game = sw_node(4, SoftwareKind::GameRotationVector, sink);
        game.add_dependency(&fusion, true).unwrap();
        game.enable(4, true).unwrap();

        gyro.process_data(&Sample::at(2_000));
        fusion.trigger_event_received();
        game.trigger_event_received();

        assert_eq!(events.lock().len(), 1);
    }

    #[test]
    fn test_uncalibrated_leaf_reports_raw_axes() {
        let (sink, events) = recording_sink();
        let gyro = hw_node(1, &gyro_descriptor(), FakeDevice::new(), Arc::clone(&sink));
        let uncal = sw_node(2, SoftwareKind::GyroscopeUncalibrated, sink);
        uncal.add_dependency(&gyro, true).unwrap();
        uncal.enable(2, true).unwrap();

        let mut sample = Sample::with_values(10, &[1.0, 2.0, 3.0]);
        sample.offset = [0.5, 0.5, 0.5, 0.0];
        sample.apply_offset(3);
        gyro.process_data(&sample);
        uncal.trigger_event_received();

        let events = events.lock();
        assert_eq!(&events[0].values[..6], &[1.0, 2.0, 3.0, 0.5, 0.5, 0.5]);
    }
}
