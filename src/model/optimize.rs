//! Budget-constrained autotuning algorithms.
//!
//! Both algorithms are total: given any tree state they always leave behind a
//! valid tunable assignment that respects the CPU and RAM budgets. Every node
//! keeps at least one worker and one buffer byte; the budgets constrain
//! everything above those floors.

use super::node::{DEFAULT_BUFFER_SIZE, NodeState};
use std::time::Duration;

/// Selects which autotuning algorithm the optimizer runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutotuneAlgorithm {
    /// Greedy: repeatedly grant a unit of parallelism to the stage with the
    /// highest estimated per-element latency.
    #[default]
    HillClimb,
    /// Proportional: assign budget shares weighted by each stage's share of
    /// total per-element computation time.
    GradientDescent,
}

impl AutotuneAlgorithm {
    /// Human-readable algorithm name, as reported in trace metadata.
    pub fn name(&self) -> &'static str {
        match self {
            Self::HillClimb => "hill climb",
            Self::GradientDescent => "gradient descent",
        }
    }
}

impl std::fmt::Display for AutotuneAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-node statistics the algorithms score against.
struct NodeStats {
    /// Mean computation time per produced element, in nanoseconds.
    avg_element_time_ns: u64,
    /// Mean produced element size in bytes (default when no history).
    avg_element_bytes: u64,
}

fn stats(node: &NodeState) -> NodeStats {
    let elements = node.counters.num_elements;
    if elements == 0 {
        return NodeStats {
            avg_element_time_ns: 0,
            avg_element_bytes: DEFAULT_BUFFER_SIZE,
        };
    }
    NodeStats {
        avg_element_time_ns: (node.counters.computation_time.as_nanos() / elements as u128)
            as u64,
        avg_element_bytes: (node.counters.bytes_produced / elements).max(1),
    }
}

/// Run the selected algorithm over the node arena.
pub(crate) fn run(
    nodes: &mut [NodeState],
    algorithm: AutotuneAlgorithm,
    cpu_budget: u64,
    ram_budget: u64,
    input_time: Duration,
) {
    if nodes.is_empty() {
        return;
    }
    match algorithm {
        AutotuneAlgorithm::HillClimb => hill_climb(nodes, cpu_budget, ram_budget, input_time),
        AutotuneAlgorithm::GradientDescent => gradient_descent(nodes, cpu_budget, ram_budget),
    }
}

/// Greedy hill climb.
///
/// Starting from one worker per node, repeatedly grants a unit of
/// parallelism to the node with the highest estimated per-worker element
/// latency, growing that node's buffer along with it, until the CPU or RAM
/// budget is exhausted or no stage's estimated latency still exceeds the
/// consumer's observed wait time (`input_time`; zero means "no wait-time
/// information", which keeps climbing while budget lasts).
fn hill_climb(nodes: &mut [NodeState], cpu_budget: u64, ram_budget: u64, input_time: Duration) {
    let node_stats: Vec<NodeStats> = nodes.iter().map(stats).collect();
    let input_time_ns = input_time.as_nanos() as u64;

    for (node, st) in nodes.iter_mut().zip(&node_stats) {
        node.tunables.parallelism = 1;
        node.tunables.buffer_size = st.avg_element_bytes;
    }
    fit_buffers_to_budget(nodes, ram_budget);

    loop {
        let used_cpu: u64 = nodes.iter().map(|n| n.tunables.parallelism as u64).sum();
        if used_cpu >= cpu_budget {
            return;
        }

        // Estimated per-worker latency of each stage at the current
        // assignment; the best candidate is the slowest stage.
        let best = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| {
                (
                    i,
                    node_stats[i].avg_element_time_ns / n.tunables.parallelism as u64,
                )
            })
            .max_by_key(|&(_, latency)| latency);

        let (index, latency) = match best {
            Some(found) => found,
            None => return,
        };
        if latency == 0 || (input_time_ns > 0 && latency <= input_time_ns) {
            return;
        }

        let grown_buffer =
            (nodes[index].tunables.parallelism as u64 + 1) * node_stats[index].avg_element_bytes;
        let other_buffers: u64 = nodes
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != index)
            .map(|(_, n)| n.tunables.buffer_size)
            .sum();
        if other_buffers + grown_buffer > ram_budget {
            return;
        }

        nodes[index].tunables.parallelism += 1;
        nodes[index].tunables.buffer_size = grown_buffer;
    }
}

/// One-shot proportional-share assignment.
///
/// Each node receives a CPU and RAM share proportional to its fraction of
/// total per-element computation time, then the assignment is trimmed back
/// into the budgets. Nodes with no recorded history fall back to the minimum
/// assignment.
fn gradient_descent(nodes: &mut [NodeState], cpu_budget: u64, ram_budget: u64) {
    let node_stats: Vec<NodeStats> = nodes.iter().map(stats).collect();
    let total_time: u64 = node_stats.iter().map(|s| s.avg_element_time_ns).sum();

    if total_time == 0 {
        for (node, st) in nodes.iter_mut().zip(&node_stats) {
            node.tunables.parallelism = 1;
            node.tunables.buffer_size = st.avg_element_bytes;
        }
        fit_buffers_to_budget(nodes, ram_budget);
        return;
    }

    for (node, st) in nodes.iter_mut().zip(&node_stats) {
        let cpu_share =
            (cpu_budget as u128 * st.avg_element_time_ns as u128 / total_time as u128) as u64;
        node.tunables.parallelism = cpu_share.clamp(1, u32::MAX as u64) as u32;

        let ram_share =
            (ram_budget as u128 * st.avg_element_time_ns as u128 / total_time as u128) as u64;
        node.tunables.buffer_size = ram_share.max(st.avg_element_bytes);
    }

    // Proportional shares can overshoot through the per-node floors; trim
    // back the largest assignments until the CPU budget holds.
    loop {
        let used_cpu: u64 = nodes.iter().map(|n| n.tunables.parallelism as u64).sum();
        if used_cpu <= cpu_budget {
            break;
        }
        let largest = nodes
            .iter_mut()
            .filter(|n| n.tunables.parallelism > 1)
            .max_by_key(|n| n.tunables.parallelism);
        match largest {
            Some(node) => node.tunables.parallelism -= 1,
            None => break,
        }
    }
    fit_buffers_to_budget(nodes, ram_budget);
}

/// Scale buffer sizes down proportionally until their sum fits the RAM
/// budget, keeping every node at least one byte.
///
/// The one-byte floor is the budget's effective lower bound: a RAM budget
/// smaller than the node count is degenerate, and the total then settles at
/// one byte per node rather than zeroing any buffer out.
fn fit_buffers_to_budget(nodes: &mut [NodeState], ram_budget: u64) {
    let total: u64 = nodes.iter().map(|n| n.tunables.buffer_size).sum();
    if total <= ram_budget || total == 0 {
        return;
    }
    for node in nodes.iter_mut() {
        let scaled =
            (node.tunables.buffer_size as u128 * ram_budget as u128 / total as u128) as u64;
        node.tunables.buffer_size = scaled.max(1);
    }
}
