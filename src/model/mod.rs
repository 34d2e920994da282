//! Performance model of a running pipeline.
//!
//! The model holds a tree of per-stage performance nodes mirroring the
//! pipeline topology: leaves are sources, the root is the sink-side driver.
//! The foreground pull path records counters into it, the optimizer rewrites
//! node tunables, and the metrics sampler reads it for publication. All three
//! go through the model's internal lock, so none of them can observe a
//! half-updated tree.

mod node;
pub mod optimize;

pub use node::{DEFAULT_BUFFER_SIZE, NodeCounters, NodeId, NodeMetrics, Tunables};
pub use optimize::AutotuneAlgorithm;

use crate::observability::metrics as obs;
use node::NodeState;
use std::sync::Mutex;
use std::time::Duration;

/// The performance node tree for one pipeline instance.
///
/// Topology is fixed once the stages have registered themselves during
/// initialization; afterwards only counters and tunables change.
pub struct Model {
    state: Mutex<ModelState>,
}

pub(crate) struct ModelState {
    pub(crate) nodes: Vec<NodeState>,
    pub(crate) root: Option<NodeId>,
}

impl Model {
    /// Create an empty model.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ModelState {
                nodes: Vec::new(),
                root: None,
            }),
        }
    }

    /// Register the root node (the driver's own pass-through node).
    ///
    /// # Panics
    ///
    /// Panics if a root has already been registered; the tree topology is
    /// fixed and there is exactly one sink.
    pub fn add_root(&self, name: impl Into<String>, ratio: f64) -> NodeId {
        let mut state = self.state.lock().unwrap();
        assert!(state.root.is_none(), "model already has a root node");
        let id = NodeId(state.nodes.len());
        state.nodes.push(NodeState::new(name.into(), ratio, None));
        state.root = Some(id);
        id
    }

    /// Register a child node under `parent` and return its handle.
    pub fn add_node(&self, parent: NodeId, name: impl Into<String>, ratio: f64) -> NodeId {
        let mut state = self.state.lock().unwrap();
        let id = NodeId(state.nodes.len());
        state
            .nodes
            .push(NodeState::new(name.into(), ratio, Some(parent)));
        state.nodes[parent.index()].children.push(id);
        id
    }

    /// Get the root node handle, if one has been registered.
    pub fn root(&self) -> Option<NodeId> {
        self.state.lock().unwrap().root
    }

    /// Get a node's parent handle (`None` for the root).
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.state.lock().unwrap().nodes[id.index()].parent
    }

    /// Get a node's children handles.
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.state.lock().unwrap().nodes[id.index()]
            .children
            .to_vec()
    }

    /// Number of nodes in the tree.
    pub fn num_nodes(&self) -> usize {
        self.state.lock().unwrap().nodes.len()
    }

    /// Record one element produced by a node.
    pub fn record_element(&self, id: NodeId) {
        let mut state = self.state.lock().unwrap();
        state.nodes[id.index()].counters.num_elements += 1;
    }

    /// Record bytes consumed from upstream by a node.
    pub fn record_bytes_consumed(&self, id: NodeId, bytes: u64) {
        let mut state = self.state.lock().unwrap();
        state.nodes[id.index()].counters.bytes_consumed += bytes;
    }

    /// Record bytes produced downstream by a node.
    pub fn record_bytes_produced(&self, id: NodeId, bytes: u64) {
        let mut state = self.state.lock().unwrap();
        state.nodes[id.index()].counters.bytes_produced += bytes;
    }

    /// Add computation time spent by a node producing elements.
    pub fn add_computation_time(&self, id: NodeId, elapsed: Duration) {
        let mut state = self.state.lock().unwrap();
        state.nodes[id.index()].counters.computation_time += elapsed;
    }

    /// Get a node's current tunables.
    pub fn tunables(&self, id: NodeId) -> Tunables {
        self.state.lock().unwrap().nodes[id.index()].tunables
    }

    /// Recompute tunables for every node under the given budgets.
    ///
    /// Total by contract: always leaves a valid assignment behind, even with
    /// no recorded history.
    pub fn optimize(
        &self,
        algorithm: AutotuneAlgorithm,
        cpu_budget: u64,
        ram_budget: u64,
        input_time: Duration,
    ) {
        let mut state = self.state.lock().unwrap();
        optimize::run(
            &mut state.nodes,
            algorithm,
            cpu_budget,
            ram_budget,
            input_time,
        );
    }

    /// Publish each node's counter delta since the last flush to the
    /// telemetry sink.
    pub fn flush_metrics(&self) {
        let mut state = self.state.lock().unwrap();
        for node in &mut state.nodes {
            let delta = node.counters.delta_since(&node.flushed);
            if delta == NodeCounters::default() {
                continue;
            }
            obs::publish_node_delta(&node.name, &delta);
            node.flushed = node.counters;
        }
    }

    /// Snapshot the cumulative metrics of every node.
    pub fn collect_metrics(&self) -> Vec<NodeMetrics> {
        let state = self.state.lock().unwrap();
        state
            .nodes
            .iter()
            .map(|node| NodeMetrics {
                name: node.name.clone(),
                ratio: node.ratio,
                counters: node.counters,
                tunables: node.tunables,
            })
            .collect()
    }
}

impl Default for Model {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap();
        f.debug_struct("Model")
            .field("num_nodes", &state.nodes.len())
            .field("root", &state.root)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_wiring() {
        let model = Model::new();
        let root = model.add_root("sink", 1.0);
        let mid = model.add_node(root, "transform", 1.0);
        let leaf = model.add_node(mid, "source", 1.0);

        assert_eq!(model.root(), Some(root));
        assert_eq!(model.num_nodes(), 3);
        assert_ne!(root, mid);
        assert_ne!(mid, leaf);

        assert_eq!(model.parent(root), None);
        assert_eq!(model.parent(mid), Some(root));
        assert_eq!(model.parent(leaf), Some(mid));
        assert_eq!(model.children(root), vec![mid]);
        assert_eq!(model.children(mid), vec![leaf]);
        assert!(model.children(leaf).is_empty());
    }

    #[test]
    #[should_panic(expected = "already has a root")]
    fn test_second_root_rejected() {
        let model = Model::new();
        model.add_root("a", 1.0);
        model.add_root("b", 1.0);
    }

    #[test]
    fn test_counter_recording() {
        let model = Model::new();
        let root = model.add_root("sink", 1.0);

        model.record_element(root);
        model.record_element(root);
        model.record_bytes_consumed(root, 100);
        model.record_bytes_produced(root, 80);
        model.add_computation_time(root, Duration::from_millis(3));

        let metrics = model.collect_metrics();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].name, "sink");
        assert_eq!(metrics[0].counters.num_elements, 2);
        assert_eq!(metrics[0].counters.bytes_consumed, 100);
        assert_eq!(metrics[0].counters.bytes_produced, 80);
        assert_eq!(metrics[0].counters.computation_time, Duration::from_millis(3));
    }

    #[test]
    fn test_flush_advances_watermark() {
        let model = Model::new();
        let root = model.add_root("sink", 1.0);
        model.record_element(root);

        // First flush publishes the delta and moves the watermark; a second
        // flush with no new activity publishes nothing (delta is zero).
        model.flush_metrics();
        model.flush_metrics();

        // Cumulative snapshot is unaffected by flushing.
        let metrics = model.collect_metrics();
        assert_eq!(metrics[0].counters.num_elements, 1);
    }

    #[test]
    fn test_optimize_with_empty_history_is_total() {
        let model = Model::new();
        let root = model.add_root("sink", 1.0);
        let _leaf = model.add_node(root, "source", 1.0);

        model.optimize(AutotuneAlgorithm::HillClimb, 4, 1_000_000, Duration::ZERO);

        let metrics = model.collect_metrics();
        for m in metrics {
            assert!(m.tunables.parallelism >= 1);
        }
    }
}
