//! Dependency and dependent edges
//!
//! A consumer holds strong references to its producers through
//! [`DependencyEdge`]s; a producer holds weak references back to its
//! consumers. Edges are wired once while the graph is built.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Weak};

use sh_protocol::SensorType;
use tracing::debug;

use super::{NodeKind, SensorNode};
use crate::constants::graph::MAX_DEPENDENCIES;
use crate::data::Sample;
use crate::error::{Result, SensorHubError};
use crate::ring_buffer::RingBuffer;

/// Consumer side of one producer relationship
#[derive(Debug)]
pub(crate) struct DependencyEdge {
    producer: Arc<SensorNode>,
    ring: RingBuffer,
    last_received: AtomicI64,
}

impl DependencyEdge {
    fn new(producer: Arc<SensorNode>, capacity: usize) -> Result<Self> {
        Ok(Self {
            producer,
            ring: RingBuffer::new(capacity)?,
            last_received: AtomicI64::new(i64::MIN),
        })
    }

    pub(crate) fn producer(&self) -> &Arc<SensorNode> {
        &self.producer
    }

    pub(crate) fn sensor_type(&self) -> SensorType {
        self.producer.sensor_type()
    }

    pub(crate) fn ring(&self) -> &RingBuffer {
        &self.ring
    }

    /// Queue a sample newer than anything received on this edge
    pub(crate) fn accept(&self, sample: &Sample) -> bool {
        if sample.timestamp <= self.last_received.load(Ordering::Acquire) {
            return false;
        }
        self.ring.write(*sample);
        self.last_received.store(sample.timestamp, Ordering::Release);
        true
    }
}

/// Edges of one consumer, addressed by index or by producer handle
#[derive(Debug, Default)]
pub(crate) struct DependencyTable {
    edges: Vec<DependencyEdge>,
    by_handle: HashMap<i32, usize>,
    trigger: Option<usize>,
}

impl DependencyTable {
    pub(crate) fn len(&self) -> usize {
        self.edges.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &DependencyEdge> {
        self.edges.iter()
    }

    pub(crate) fn by_handle(&self, handle: i32) -> Option<&DependencyEdge> {
        self.by_handle.get(&handle).map(|&i| &self.edges[i])
    }

    pub(crate) fn trigger_edge(&self) -> Option<&DependencyEdge> {
        self.trigger.map(|i| &self.edges[i])
    }

    /// Every edge except the trigger edge
    pub(crate) fn secondaries(&self) -> impl Iterator<Item = &DependencyEdge> {
        let trigger = self.trigger;
        self.edges
            .iter()
            .enumerate()
            .filter(move |(i, _)| Some(*i) != trigger)
            .map(|(_, e)| e)
    }

    pub(crate) fn producers(&self) -> Vec<Arc<SensorNode>> {
        self.edges.iter().map(|e| Arc::clone(&e.producer)).collect()
    }

    fn push(&mut self, edge: DependencyEdge, is_trigger: bool) {
        let index = self.edges.len();
        self.by_handle.insert(edge.producer.handle(), index);
        if is_trigger {
            self.trigger = Some(index);
        }
        self.edges.push(edge);
    }

    fn pop(&mut self) -> Option<DependencyEdge> {
        let edge = self.edges.pop()?;
        let index = self.edges.len();
        self.by_handle.remove(&edge.producer.handle());
        if self.trigger == Some(index) {
            self.trigger = None;
        }
        Some(edge)
    }
}

/// Producer side: consumers to push samples to and to wake
#[derive(Debug, Default)]
pub(crate) struct Dependents {
    push: Vec<Weak<SensorNode>>,
    trigger: Vec<Weak<SensorNode>>,
}

impl Dependents {
    fn add(&mut self, consumer: &Arc<SensorNode>, trigger: bool) {
        self.push.push(Arc::downgrade(consumer));
        if trigger {
            self.trigger.push(Arc::downgrade(consumer));
        }
    }

    fn remove(&mut self, handle: i32) {
        let keep = |w: &Weak<SensorNode>| w.upgrade().map_or(false, |n| n.handle() != handle);
        self.push.retain(keep);
        self.trigger.retain(keep);
    }

    pub(crate) fn push_targets(&self) -> impl Iterator<Item = Arc<SensorNode>> + '_ {
        self.push.iter().filter_map(Weak::upgrade)
    }

    pub(crate) fn trigger_targets(&self) -> impl Iterator<Item = Arc<SensorNode>> + '_ {
        self.trigger.iter().filter_map(Weak::upgrade)
    }

    pub(crate) fn count(&self) -> usize {
        self.push.len()
    }
}

impl SensorNode {
    /// Make `producer` a dependency of this node.
    ///
    /// With `is_trigger`, the producer also wakes this node after every
    /// sample. On failure nothing stays registered.
    pub fn add_dependency(self: &Arc<Self>, producer: &Arc<SensorNode>, is_trigger: bool) -> Result<()> {
        let mut edges = self.edges.write();

        if edges.len() >= MAX_DEPENDENCIES {
            return Err(SensorHubError::TooManyDependencies {
                sensor: self.name(),
                max: MAX_DEPENDENCIES,
            });
        }
        if edges.by_handle(producer.handle()).is_some() {
            return Err(SensorHubError::invalid_operation(format!(
                "{} already depends on {}",
                self.name(),
                producer.name()
            )));
        }
        if is_trigger && edges.trigger_edge().is_some() {
            return Err(SensorHubError::invalid_operation(format!(
                "{} already has a trigger source",
                self.name()
            )));
        }

        let producer_info = producer.info();
        let edge = DependencyEdge::new(Arc::clone(producer), producer_info.fifo_max as usize)?;
        let first = edges.len() == 0;

        producer.dependents.write().add(self, is_trigger);
        edges.push(edge, is_trigger);
        drop(edges);

        let mut info = self.info.write();
        info.power_ma += producer_info.power_ma;
        if let NodeKind::Software(sw) = &self.kind {
            sw.merge_metadata(&mut info, &producer_info, is_trigger, first);
        }

        debug!(
            consumer = %info.name,
            producer = %producer_info.name,
            trigger = is_trigger,
            "Dependency added"
        );
        Ok(())
    }

    /// Unwind every dependency edge of this node
    pub fn remove_dependencies(&self) {
        let mut edges = self.edges.write();
        while let Some(edge) = edges.pop() {
            edge.producer.dependents.write().remove(self.handle);
        }
    }

    /// Number of nodes fed by this one
    pub fn dependent_count(&self) -> usize {
        self.dependents.read().count()
    }
}
