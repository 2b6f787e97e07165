//! Dependency graph construction
//!
//! Hardware nodes are created first, one per configured device, then the
//! configured virtual sensors. Dependencies are resolved by sensor type; a
//! fusion node a leaf needs is built on demand even when it is not listed.
//! A node whose dependencies cannot be satisfied is unwound and left out
//! while construction carries on with the rest.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use sh_protocol::{SensorInfo, SensorType};
use tracing::{debug, info, warn};

use crate::constants::graph::{FIRST_HANDLE, MAX_HANDLE};
use crate::data::{DeviceDescriptor, HubConfig};
use crate::error::{Result, SensorHubError};
use crate::fusion::EngineFactory;
use crate::iio::{DeviceConfig, IioStreams, SysfsDevice};
use crate::node::{EventSink, SensorNode, SoftwareKind};

/// Opens the configuration surface and descriptors of one device
pub type DeviceFactory =
    dyn Fn(&DeviceDescriptor) -> Result<(Box<dyn DeviceConfig>, Option<IioStreams>)> + Send + Sync;

/// Sysfs attributes plus `/dev/iio:deviceN`
pub fn open_sysfs_device(
    descriptor: &DeviceDescriptor,
) -> Result<(Box<dyn DeviceConfig>, Option<IioStreams>)> {
    let dir = descriptor.sysfs_dir().ok_or_else(|| {
        SensorHubError::invalid_config(
            format!("devices.{}", descriptor.name),
            "no sysfs path or IIO index",
        )
    })?;
    let streams = match descriptor.dev_node() {
        Some(node) => Some(IioStreams::open(&node)?),
        None => None,
    };
    Ok((Box::new(SysfsDevice::new(dir)), streams))
}

/// The constructed node set
#[derive(Debug, Default)]
pub struct SensorGraph {
    nodes: Vec<Arc<SensorNode>>,
    by_handle: HashMap<i32, usize>,
}

impl SensorGraph {
    pub fn nodes(&self) -> &[Arc<SensorNode>] {
        &self.nodes
    }

    pub fn node(&self, handle: i32) -> Option<&Arc<SensorNode>> {
        self.by_handle.get(&handle).map(|&i| &self.nodes[i])
    }

    pub fn find_by_type(&self, sensor_type: SensorType) -> Option<&Arc<SensorNode>> {
        self.nodes.iter().find(|n| n.sensor_type() == sensor_type)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Client-visible sensors in handle order
    pub fn sensor_list(&self) -> Vec<SensorInfo> {
        self.nodes
            .iter()
            .filter(|n| !n.sensor_type().is_private())
            .map(|n| n.info())
            .collect()
    }

    fn insert(&mut self, node: Arc<SensorNode>) {
        self.by_handle.insert(node.handle(), self.nodes.len());
        self.nodes.push(node);
    }
}

/// Scratch state while building
#[derive(Default)]
struct BuildState {
    graph: SensorGraph,
    by_type: HashMap<SensorType, Arc<SensorNode>>,
    failed: HashSet<SensorType>,
    next_handle: i32,
}

impl BuildState {
    fn peek_handle(&self) -> Result<i32> {
        if self.next_handle > MAX_HANDLE {
            return Err(SensorHubError::config(format!(
                "no sensor handles left (maximum {})",
                MAX_HANDLE
            )));
        }
        Ok(self.next_handle)
    }

    fn register(&mut self, node: Arc<SensorNode>) -> Arc<SensorNode> {
        self.next_handle = node.handle() + 1;
        self.by_type
            .entry(node.sensor_type())
            .or_insert_with(|| Arc::clone(&node));
        self.graph.insert(Arc::clone(&node));
        node
    }
}

pub struct GraphBuilder<'a> {
    config: &'a HubConfig,
    sink: Arc<dyn EventSink>,
    devices: Box<DeviceFactory>,
    engines: Option<Box<EngineFactory>>,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(config: &'a HubConfig, sink: Arc<dyn EventSink>) -> Self {
        Self {
            config,
            sink,
            devices: Box::new(open_sysfs_device),
            engines: None,
        }
    }

    pub fn with_device_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&DeviceDescriptor) -> Result<(Box<dyn DeviceConfig>, Option<IioStreams>)>
            + Send
            + Sync
            + 'static,
    {
        self.devices = Box::new(factory);
        self
    }

    pub fn with_engine_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(SensorType) -> Option<Box<dyn crate::fusion::FusionEngine>> + Send + Sync + 'static,
    {
        self.engines = Some(Box::new(factory));
        self
    }

    pub fn build(self) -> SensorGraph {
        let mut state = BuildState {
            next_handle: FIRST_HANDLE,
            ..Default::default()
        };

        for descriptor in &self.config.devices {
            if let Err(e) = self.build_hardware(descriptor, &mut state) {
                warn!(sensor = %descriptor.name, "Skipping device: {}", e);
            }
        }

        for &sensor_type in &self.config.virtual_sensors {
            let Some(kind) = SoftwareKind::from_sensor_type(sensor_type) else {
                warn!(?sensor_type, "Not a virtual sensor type, skipping");
                continue;
            };
            if let Err(e) = self.build_virtual(kind, &mut state) {
                warn!(?sensor_type, "Virtual sensor unavailable: {}", e);
            }
        }

        info!(
            sensors = state.graph.len(),
            listed = state.graph.sensor_list().len(),
            "Sensor graph built"
        );
        state.graph
    }

    fn build_hardware(&self, descriptor: &DeviceDescriptor, state: &mut BuildState) -> Result<()> {
        let handle = state.peek_handle()?;
        let (device, streams) = (self.devices)(descriptor)?;
        let node = SensorNode::hardware(
            handle,
            descriptor,
            device,
            streams,
            &self.config.calibration,
            self.config.tuning,
            Arc::clone(&self.sink),
        )?;

        if state.by_type.contains_key(&descriptor.sensor_type) {
            warn!(
                sensor = %descriptor.name,
                "Another {:?} is already registered; dependents use the first",
                descriptor.sensor_type
            );
        }
        debug!(sensor = %descriptor.name, handle, "Hardware sensor added");
        state.register(Arc::new(node));
        Ok(())
    }

    fn build_virtual(&self, kind: SoftwareKind, state: &mut BuildState) -> Result<Arc<SensorNode>> {
        let sensor_type = kind.sensor_type();
        if let Some(existing) = state.by_type.get(&sensor_type) {
            return Ok(Arc::clone(existing));
        }

        let mut producers = Vec::with_capacity(kind.dependency_slots().len());
        for (slot, candidates) in kind.dependency_slots().iter().enumerate() {
            let producer = self.resolve(candidates, state).ok_or_else(|| {
                SensorHubError::DependencyUnavailable {
                    sensor: format!("{:?}", sensor_type),
                    dependency_type: candidates.first().map_or(0, |t| t.as_i32()),
                }
            })?;
            producers.push((producer, slot == kind.trigger_slot()));
        }

        let handle = state.peek_handle()?;
        let engine = match (&self.engines, kind.is_fusion()) {
            (Some(factory), true) => factory(sensor_type),
            _ => None,
        };
        let node = Arc::new(SensorNode::software(
            handle,
            kind,
            engine,
            self.config.tuning,
            Arc::clone(&self.sink),
        )?);

        for (producer, is_trigger) in &producers {
            if let Err(e) = node.add_dependency(producer, *is_trigger) {
                node.remove_dependencies();
                return Err(e);
            }
        }

        debug!(
            sensor = %node.name(),
            handle,
            dependencies = ?node.dependency_handles(),
            "Virtual sensor added"
        );
        Ok(state.register(node))
    }

    /// Most preferred candidate that exists or can be built
    fn resolve(&self, candidates: &[SensorType], state: &mut BuildState) -> Option<Arc<SensorNode>> {
        for &candidate in candidates {
            if let Some(node) = state.by_type.get(&candidate) {
                return Some(Arc::clone(node));
            }
            if state.failed.contains(&candidate) {
                continue;
            }
            let Some(kind) = SoftwareKind::from_sensor_type(candidate) else {
                continue;
            };
            match self.build_virtual(kind, state) {
                Ok(node) => return Some(node),
                Err(e) => {
                    debug!(?candidate, "Provider unavailable: {}", e);
                    state.failed.insert(candidate);
                }
            }
        }
        None
    }
}
