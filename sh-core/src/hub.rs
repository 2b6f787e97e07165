//! Control-plane facade over a built graph
//!
//! The hub owns the node threads. Client calls address public sensors by
//! handle; private fusion nodes are only reachable through their leaves.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use sh_protocol::SensorInfo;
use tracing::{debug, error, info};

use crate::error::{Result, SensorHubError};
use crate::graph::SensorGraph;
use crate::node::SensorNode;

pub struct SensorHub {
    graph: SensorGraph,
    stop: Arc<AtomicBool>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl SensorHub {
    pub fn new(graph: SensorGraph) -> Self {
        Self {
            graph,
            stop: Arc::new(AtomicBool::new(false)),
            threads: Mutex::new(Vec::new()),
        }
    }

    /// Spawn one thread per node with work to do
    pub fn start(&self) -> Result<()> {
        let mut threads = self.threads.lock();
        if !threads.is_empty() {
            return Err(SensorHubError::invalid_operation("hub already started"));
        }

        for node in self.graph.nodes() {
            if !node.needs_thread() {
                debug!(sensor = %node.name(), "No thread needed");
                continue;
            }
            let worker = Arc::clone(node);
            let stop = Arc::clone(&self.stop);
            let handle = thread::Builder::new()
                .name(thread_name(node))
                .spawn(move || worker.run(&stop))?;
            threads.push(handle);
        }

        info!(threads = threads.len(), "Sensor hub started");
        Ok(())
    }

    pub fn graph(&self) -> &SensorGraph {
        &self.graph
    }

    pub fn sensor_list(&self) -> Vec<SensorInfo> {
        self.graph.sensor_list()
    }

    fn public_node(&self, handle: i32) -> Result<&Arc<SensorNode>> {
        self.graph
            .node(handle)
            .filter(|n| !n.sensor_type().is_private())
            .ok_or(SensorHubError::UnknownHandle(handle))
    }

    pub fn enable(&self, handle: i32, enabled: bool) -> Result<()> {
        self.public_node(handle)?.enable(handle, enabled)
    }

    pub fn set_delay(&self, handle: i32, period_ns: i64, timeout_ns: i64) -> Result<()> {
        self.public_node(handle)?
            .set_delay(handle, period_ns, timeout_ns)
    }

    /// Flush `handle`; a flush-complete event follows on the event stream
    pub fn flush(&self, handle: i32) -> Result<()> {
        self.public_node(handle)?.flush(true).map(|_| ())
    }

    /// Signal every node and join their threads
    pub fn stop(&self) {
        if self.stop.swap(true, Ordering::AcqRel) {
            return;
        }
        for node in self.graph.nodes() {
            node.stop();
        }

        let threads: Vec<JoinHandle<()>> = self.threads.lock().drain(..).collect();
        let count = threads.len();
        for handle in threads {
            let name = handle.thread().name().unwrap_or("sensor").to_string();
            if handle.join().is_err() {
                error!(thread = %name, "Sensor thread panicked");
            }
        }
        info!(threads = count, "Sensor hub stopped");
    }
}

impl Drop for SensorHub {
    fn drop(&mut self) {
        self.stop();
    }
}

fn thread_name(node: &SensorNode) -> String {
    // pthread names are limited to 15 bytes
    let mut name = format!("sh-{}", node.name().replace(' ', "-"));
    if name.len() > 15 {
        let mut end = 15;
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        name.truncate(end);
    }
    name
}
