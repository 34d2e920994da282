//! Metrics publication using metrics-rs.

use crate::model::NodeCounters;
use metrics::{Unit, counter, histogram};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Whether metrics have been initialized.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

// Metric names as constants for consistency
const BYTES_CONSUMED: &str = "flowtune_bytes_consumed";
const BYTES_PRODUCED: &str = "flowtune_bytes_produced";
const ELEMENTS_PRODUCED: &str = "flowtune_elements_produced";
const COMPUTATION_TIME_NS: &str = "flowtune_computation_time_ns";
const OPTIMIZATION_TIME_NS: &str = "flowtune_optimization_time_ns";
const OPTIMIZATION_PASSES: &str = "flowtune_optimization_passes";

/// Initialize metrics descriptions.
///
/// Call this once at application startup before using any metrics.
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return; // Already initialized
    }

    metrics::describe_counter!(
        BYTES_CONSUMED,
        Unit::Bytes,
        "Total bytes consumed from upstream, per pipeline node"
    );
    metrics::describe_counter!(
        BYTES_PRODUCED,
        Unit::Bytes,
        "Total bytes produced downstream, per pipeline node"
    );
    metrics::describe_counter!(
        ELEMENTS_PRODUCED,
        Unit::Count,
        "Total elements produced, per pipeline node"
    );
    metrics::describe_counter!(
        COMPUTATION_TIME_NS,
        Unit::Nanoseconds,
        "Cumulative computation time, per pipeline node"
    );
    metrics::describe_histogram!(
        OPTIMIZATION_TIME_NS,
        Unit::Nanoseconds,
        "Time spent in one autotuning optimization pass"
    );
    metrics::describe_counter!(
        OPTIMIZATION_PASSES,
        Unit::Count,
        "Number of completed autotuning optimization passes"
    );
}

/// Publish a node's counter delta since the last flush.
#[inline]
pub fn publish_node_delta(node: &str, delta: &NodeCounters) {
    counter!(BYTES_CONSUMED, "node" => node.to_string()).increment(delta.bytes_consumed);
    counter!(BYTES_PRODUCED, "node" => node.to_string()).increment(delta.bytes_produced);
    counter!(ELEMENTS_PRODUCED, "node" => node.to_string()).increment(delta.num_elements);
    counter!(COMPUTATION_TIME_NS, "node" => node.to_string())
        .increment(delta.computation_time.as_nanos() as u64);
}

/// Record the duration of one optimization pass.
#[inline]
pub fn record_optimization(pipeline: &str, elapsed: Duration) {
    counter!(OPTIMIZATION_PASSES, "pipeline" => pipeline.to_string()).increment(1);
    histogram!(OPTIMIZATION_TIME_NS, "pipeline" => pipeline.to_string())
        .record(elapsed.as_nanos() as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics() {
        // Should not panic
        init_metrics();
        // Should be idempotent
        init_metrics();
    }

    #[test]
    fn test_publish_without_recorder() {
        // These should not panic even without a recorder installed
        let delta = NodeCounters {
            bytes_consumed: 10,
            bytes_produced: 10,
            num_elements: 1,
            computation_time: Duration::from_micros(50),
        };
        publish_node_delta("test::node", &delta);
        record_optimization("test", Duration::from_micros(10));
    }
}
