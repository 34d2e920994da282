//! Per-stage performance nodes.
//!
//! Each pipeline stage is represented by a node holding its tunable
//! parameters and accumulated performance counters. Nodes live in an arena
//! owned by [`Model`](crate::model::Model) and reference each other by
//! handle, so the tree carries no ownership cycles.

use smallvec::SmallVec;
use std::time::Duration;

/// Default buffer size granted to a node before any optimization has run.
pub const DEFAULT_BUFFER_SIZE: u64 = 4096;

/// Unique handle for a node in the performance tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Get the underlying arena index.
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Tunable parameters the optimizer assigns to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tunables {
    /// Degree of parallelism for the stage (worker count).
    pub parallelism: u32,
    /// Buffer size for the stage, in bytes.
    pub buffer_size: u64,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            parallelism: 1,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

/// Accumulated performance counters for a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeCounters {
    /// Total bytes consumed from upstream.
    pub bytes_consumed: u64,
    /// Total bytes produced downstream.
    pub bytes_produced: u64,
    /// Total elements produced.
    pub num_elements: u64,
    /// Cumulative computation time spent producing elements.
    pub computation_time: Duration,
}

impl NodeCounters {
    /// Counter change since an earlier snapshot.
    ///
    /// Counters only grow, so the subtraction is saturating purely to keep
    /// the operation total.
    pub(crate) fn delta_since(&self, earlier: &NodeCounters) -> NodeCounters {
        NodeCounters {
            bytes_consumed: self.bytes_consumed.saturating_sub(earlier.bytes_consumed),
            bytes_produced: self.bytes_produced.saturating_sub(earlier.bytes_produced),
            num_elements: self.num_elements.saturating_sub(earlier.num_elements),
            computation_time: self
                .computation_time
                .saturating_sub(earlier.computation_time),
        }
    }
}

/// A node record in the performance tree arena.
///
/// Topology (parent/children/ratio) is fixed once the tree is wired; only
/// tunables and counters change afterwards.
#[derive(Debug)]
pub(crate) struct NodeState {
    pub(crate) name: String,
    /// Upstream elements consumed per element produced (pass-through = 1).
    pub(crate) ratio: f64,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: SmallVec<[NodeId; 2]>,
    pub(crate) tunables: Tunables,
    pub(crate) counters: NodeCounters,
    /// Counters as of the last flush, for delta publication.
    pub(crate) flushed: NodeCounters,
}

impl NodeState {
    pub(crate) fn new(name: String, ratio: f64, parent: Option<NodeId>) -> Self {
        Self {
            name,
            ratio,
            parent,
            children: SmallVec::new(),
            tunables: Tunables::default(),
            counters: NodeCounters::default(),
            flushed: NodeCounters::default(),
        }
    }
}

/// Point-in-time metrics snapshot for a single node.
#[derive(Debug, Clone)]
pub struct NodeMetrics {
    /// Node name (unique within the tree).
    pub name: String,
    /// Upstream elements consumed per element produced.
    pub ratio: f64,
    /// Cumulative counters at snapshot time.
    pub counters: NodeCounters,
    /// Tunables at snapshot time.
    pub tunables: Tunables,
}
