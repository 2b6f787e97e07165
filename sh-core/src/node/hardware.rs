//! Hardware-backed nodes
//!
//! A hardware node drives one IIO device: it negotiates sampling frequency
//! and FIFO depth through sysfs, polls the buffered scan and event
//! descriptors on its own thread, and turns decoded scans into calibrated
//! samples according to its kind.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::thread;

use parking_lot::Mutex;
use sh_protocol::{ReportingMode, SensorInfo, SensorType};
use tracing::{debug, error, info, warn};

use super::pollrate::{
    compute_fifo_length, is_constrained, kernel_buffer_length, select_sampling_frequency,
    DelayRequest, HwPollrate,
};
use super::{FlushOutcome, SensorNode};
use crate::constants::buffer::DEFAULT_IIO_BUFFER_LEN;
use crate::constants::timing::{hz_to_period_ns, NS_PER_MS, NS_PER_US};
use crate::constants::units::{DETECTOR_EVENT_VALUE, GAUSS_TO_MICROTESLA};
use crate::constants::sysfs;
use crate::data::{AxisCalibration, CalibrationStore, DeviceDescriptor, Sample};
use crate::error::{Result, SensorHubError};
use crate::iio::{decode_scan, DeviceConfig, IioEvent, IioStreams, ScanLayout};

/// Physical sensor kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareKind {
    Accelerometer,
    Magnetometer,
    Gyroscope,
    Pressure,
    StepCounter,
    StepDetector,
    TiltDetector,
    SignificantMotion,
}

impl HardwareKind {
    pub fn from_sensor_type(sensor_type: SensorType) -> Option<Self> {
        match sensor_type {
            SensorType::Accelerometer => Some(HardwareKind::Accelerometer),
            SensorType::MagneticField => Some(HardwareKind::Magnetometer),
            SensorType::Gyroscope => Some(HardwareKind::Gyroscope),
            SensorType::Pressure => Some(HardwareKind::Pressure),
            SensorType::StepCounter => Some(HardwareKind::StepCounter),
            SensorType::StepDetector => Some(HardwareKind::StepDetector),
            SensorType::TiltDetector => Some(HardwareKind::TiltDetector),
            SensorType::SignificantMotion => Some(HardwareKind::SignificantMotion),
            _ => None,
        }
    }

    pub fn sensor_type(self) -> SensorType {
        match self {
            HardwareKind::Accelerometer => SensorType::Accelerometer,
            HardwareKind::Magnetometer => SensorType::MagneticField,
            HardwareKind::Gyroscope => SensorType::Gyroscope,
            HardwareKind::Pressure => SensorType::Pressure,
            HardwareKind::StepCounter => SensorType::StepCounter,
            HardwareKind::StepDetector => SensorType::StepDetector,
            HardwareKind::TiltDetector => SensorType::TiltDetector,
            HardwareKind::SignificantMotion => SensorType::SignificantMotion,
        }
    }

    /// Reports through the event descriptor instead of scans
    pub fn is_event_driven(self) -> bool {
        matches!(
            self,
            HardwareKind::StepDetector | HardwareKind::TiltDetector | HardwareKind::SignificantMotion
        )
    }

    /// Three-axis kinds with a mounting matrix and bias
    fn is_calibrated(self) -> bool {
        matches!(
            self,
            HardwareKind::Accelerometer | HardwareKind::Magnetometer | HardwareKind::Gyroscope
        )
    }

    /// Factor from device units to reported units
    fn unit_factor(self) -> f32 {
        match self {
            HardwareKind::Magnetometer => GAUSS_TO_MICROTESLA,
            _ => 1.0,
        }
    }
}

/// First scale whose range covers `range`, else the widest one
pub fn select_full_scale(scales: &[f32], bits_used: u8, range: f32) -> Option<f32> {
    let max_code = max_positive_code(bits_used);
    scales
        .iter()
        .copied()
        .find(|s| s * max_code >= range)
        .or_else(|| scales.last().copied())
}

fn max_positive_code(bits_used: u8) -> f32 {
    if bits_used < 2 {
        return 1.0;
    }
    2f32.powi(i32::from(bits_used) - 1) - 1.0
}

pub struct HardwareNode {
    kind: HardwareKind,
    device: Box<dyn DeviceConfig>,
    streams: Mutex<Option<IioStreams>>,
    layout: ScanLayout,
    frequencies: Vec<f64>,
    fifo_max: u32,
    calibration: AxisCalibration,
    pollrate: Mutex<HwPollrate>,
    actual_period_ns: AtomicI64,
    fifo_len: AtomicU32,
}

impl HardwareNode {
    pub fn new(
        handle: i32,
        descriptor: &DeviceDescriptor,
        device: Box<dyn DeviceConfig>,
        streams: Option<IioStreams>,
        calibration: &CalibrationStore,
    ) -> Result<(Self, SensorInfo)> {
        let kind = HardwareKind::from_sensor_type(descriptor.sensor_type).ok_or_else(|| {
            SensorHubError::invalid_config(
                format!("devices.{}.sensor_type", descriptor.name),
                format!("{:?} is not a hardware sensor", descriptor.sensor_type),
            )
        })?;

        let mut layout = ScanLayout::new(descriptor.channels.clone());
        let mut info = SensorInfo::new(descriptor.name.clone(), handle, descriptor.sensor_type);
        info.power_ma = descriptor.power_ma;
        info.wake_up = descriptor.wake_up;
        info.fifo_max = descriptor.fifo_max;

        match descriptor.sensor_type.reporting_mode() {
            ReportingMode::Continuous => {
                info.min_delay_us = descriptor.max_frequency().map(hz_to_us).unwrap_or(0);
                info.max_delay_us = descriptor.min_frequency().map(hz_to_us).unwrap_or(0);
            }
            ReportingMode::OneShot => info.min_delay_us = -1,
            ReportingMode::OnChange | ReportingMode::Special => {}
        }

        let bits = layout.bits_used();
        match kind {
            HardwareKind::StepCounter => {
                info.resolution = 1.0;
                info.max_range = 2f32.powi(i32::from(bits)) - 1.0;
            }
            k if k.is_event_driven() => {
                info.resolution = 1.0;
                info.max_range = 1.0;
            }
            _ => {
                let mut scale = layout
                    .channels()
                    .iter()
                    .find(|c| !c.is_timestamp())
                    .map(|c| c.scale)
                    .unwrap_or(1.0);

                if let Some(selected) = apply_full_scale(kind, descriptor, device.as_ref(), bits) {
                    layout.set_data_scale(selected);
                    scale = selected;
                }

                let unit = kind.unit_factor();
                info.resolution = scale * unit;
                info.max_range = scale * max_positive_code(bits) * unit;
            }
        }

        debug!(
            sensor = %descriptor.name,
            device = %device.describe(),
            scan_size = layout.scan_size(),
            "Hardware sensor configured"
        );

        let node = Self {
            kind,
            device,
            streams: Mutex::new(streams),
            layout,
            frequencies: descriptor.sampling_frequencies.clone(),
            fifo_max: descriptor.fifo_max,
            calibration: calibration.get(descriptor.sensor_type),
            pollrate: Mutex::new(HwPollrate::default()),
            actual_period_ns: AtomicI64::new(0),
            fifo_len: AtomicU32::new(0),
        };
        Ok((node, info))
    }

    pub fn kind(&self) -> HardwareKind {
        self.kind
    }

    pub fn layout(&self) -> &ScanLayout {
        &self.layout
    }

    pub fn actual_period_ns(&self) -> i64 {
        self.actual_period_ns.load(Ordering::Acquire)
    }

    pub fn fifo_len(&self) -> u32 {
        self.fifo_len.load(Ordering::Acquire)
    }

    pub fn has_fifo(&self) -> bool {
        self.fifo_max > 0
    }

    pub(crate) fn has_streams(&self) -> bool {
        self.streams.lock().is_some()
    }

    pub(crate) fn set_enabled(&self, enable: bool) -> Result<()> {
        if self.kind.is_event_driven() {
            return Ok(());
        }
        self.device.enable_buffer(enable)
    }

    /// Program the device for an aggregate request, restoring on failure
    pub(crate) fn apply_pollrate(&self, requested: DelayRequest, active: bool) -> Result<()> {
        if self.kind.is_event_driven() {
            return Ok(());
        }

        if self.kind == HardwareKind::StepCounter {
            if is_constrained(requested.period_ns) {
                self.device
                    .write_int(sysfs::MAX_DELIVERY_RATE, requested.period_ns / NS_PER_MS)?;
            }
            return Ok(());
        }

        let mut current = self.pollrate.lock();
        let mut target = *current;

        if is_constrained(requested.period_ns) {
            if let Some(hz) = select_sampling_frequency(&self.frequencies, requested.period_ns) {
                target.frequency_hz = Some(hz);
                target.actual_period_ns = hz_to_period_ns(hz);
            }
        }
        target.fifo_len =
            compute_fifo_length(requested.timeout_ns, target.actual_period_ns, self.fifo_max);

        if target == *current {
            return Ok(());
        }

        if let Err(e) = self.program(&current, &target, active) {
            if let Err(restore) = self.program(&target, &current, active) {
                error!(device = %self.device.describe(), "Failed to restore pollrate: {}", restore);
            }
            return Err(e);
        }

        *current = target;
        self.actual_period_ns
            .store(target.actual_period_ns, Ordering::Release);
        self.fifo_len.store(target.fifo_len, Ordering::Release);

        info!(
            device = %self.device.describe(),
            hz = ?target.frequency_hz,
            fifo = target.fifo_len,
            "Pollrate applied"
        );
        Ok(())
    }

    /// Write every attribute that differs between `from` and `to`
    fn program(&self, from: &HwPollrate, to: &HwPollrate, active: bool) -> Result<()> {
        if to.frequency_hz != from.frequency_hz {
            if let Some(hz) = to.frequency_hz {
                self.device.write_float(sysfs::SAMPLING_FREQUENCY, hz as f32)?;
            }
        }

        if to.fifo_len != from.fifo_len {
            let length = kernel_buffer_length(to.fifo_len);
            // the kernel refuses length changes on a running buffer
            if active {
                self.device.enable_buffer(false)?;
            }
            let written = self.device.write_int(sysfs::BUFFER_LENGTH, i64::from(length));
            if active {
                self.device.enable_buffer(true)?;
            }
            written?;
        }
        Ok(())
    }

    pub(crate) fn flush(&self) -> Result<FlushOutcome> {
        if kernel_buffer_length(self.fifo_len()) > DEFAULT_IIO_BUFFER_LEN {
            self.device.write_int(sysfs::FLUSH, 1)?;
            Ok(FlushOutcome::Deferred)
        } else {
            Ok(FlushOutcome::Immediate)
        }
    }

    pub(crate) fn ingest_scan(&self, node: &SensorNode, record: &[u8]) -> Result<()> {
        let sample = decode_scan(record, &self.layout)?;
        self.process_scan(node, sample);
        Ok(())
    }

    fn process_scan(&self, node: &SensorNode, mut sample: Sample) {
        match self.kind {
            k if k.is_calibrated() => {
                let unit = k.unit_factor();
                let device_axes = [
                    sample.raw[0] * unit,
                    sample.raw[1] * unit,
                    sample.raw[2] * unit,
                ];
                let rotated = self.calibration.rotate(device_axes);
                sample.raw[..3].copy_from_slice(&rotated);
                sample.offset[..3].copy_from_slice(&self.calibration.bias);
                sample.apply_offset(3);
            }
            HardwareKind::Pressure => sample.apply_offset(1),
            HardwareKind::StepCounter => {
                sample.step_count = sample.raw[0].max(0.0) as u64;
                sample.processed[0] = sample.raw[0];
            }
            _ => {
                debug!(kind = ?self.kind, "Ignoring scan on event-driven sensor");
                return;
            }
        }
        node.publish(&sample);
    }

    pub(crate) fn ingest_event(&self, node: &SensorNode, event: IioEvent) {
        if !self.kind.is_event_driven() {
            debug!(kind = ?self.kind, id = event.id, "Ignoring device event");
            return;
        }

        let mut sample = Sample::at(event.timestamp);
        sample.raw[0] = DETECTOR_EVENT_VALUE;
        sample.processed[0] = DETECTOR_EVENT_VALUE;
        node.publish(&sample);

        if self.kind == HardwareKind::SignificantMotion {
            if let Err(e) = node.enable(node.handle(), false) {
                warn!(sensor = %node.name(), "Failed to disarm after trigger: {}", e);
            }
        }
    }

    /// Wait on the device descriptors until `stop` is set
    pub(crate) fn poll_loop(&self, node: &SensorNode, stop: &AtomicBool) {
        let Some(mut streams) = self.streams.lock().take() else {
            warn!(sensor = %node.name(), "No device streams, not polling");
            return;
        };

        let scan_size = self.layout.scan_size();
        let max_records = (self.fifo_max as usize).max(1);
        let mut buf = vec![0u8; scan_size.max(1) * max_records];
        let timeout = node.tuning().hw_poll_timeout();

        while !stop.load(Ordering::Acquire) {
            let ready = match streams.wait(timeout) {
                Ok(ready) => ready,
                Err(e) => {
                    error!(sensor = %node.name(), "Poll failed: {}", e);
                    thread::sleep(timeout);
                    continue;
                }
            };

            if ready.scan && scan_size > 0 {
                let records = (self.fifo_len() as usize).clamp(1, max_records);
                match streams.read_scans(&mut buf[..records * scan_size]) {
                    Ok(n) => {
                        for record in buf[..n].chunks_exact(scan_size) {
                            if let Err(e) = self.ingest_scan(node, record) {
                                warn!(sensor = %node.name(), "Skipping scan record: {}", e);
                            }
                        }
                    }
                    Err(e) => warn!(sensor = %node.name(), "Scan read failed: {}", e),
                }
            }

            if ready.event {
                match streams.read_event() {
                    Ok(Some(event)) => self.ingest_event(node, event),
                    Ok(None) => {}
                    Err(e) => warn!(sensor = %node.name(), "Event read failed: {}", e),
                }
            }
        }

        *self.streams.lock() = Some(streams);
    }
}

fn hz_to_us(hz: f64) -> i32 {
    if hz <= 0.0 {
        return 0;
    }
    (hz_to_period_ns(hz) / NS_PER_US).clamp(0, i64::from(i32::MAX)) as i32
}

/// Pick and write the full-scale value; `None` keeps the configured scale
fn apply_full_scale(
    kind: HardwareKind,
    descriptor: &DeviceDescriptor,
    device: &dyn DeviceConfig,
    bits: u8,
) -> Option<f32> {
    let range = descriptor.full_scale_range?;
    let key = sysfs::scale_key(descriptor.scale_kind()?);
    let scale = select_full_scale(&descriptor.scales, bits, range / kind.unit_factor())?;

    match device.write_float(&key, scale) {
        Ok(()) => Some(scale),
        Err(e) => {
            warn!(sensor = %descriptor.name, "Keeping default full scale: {}", e);
            None
        }
    }
}
