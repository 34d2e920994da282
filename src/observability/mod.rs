//! Observability features: metrics publication and the shared registry.
//!
//! The metrics sampler publishes per-node counter deltas through this module
//! on a fixed cadence, independent of the optimizer's backoff schedule.
//!
//! ## Metrics
//!
//! | Metric | Type | Description |
//! |--------|------|-------------|
//! | `flowtune_bytes_consumed` | Counter | Bytes consumed per node |
//! | `flowtune_bytes_produced` | Counter | Bytes produced per node |
//! | `flowtune_elements_produced` | Counter | Elements produced per node |
//! | `flowtune_computation_time_ns` | Counter | Computation time per node |
//! | `flowtune_optimization_time_ns` | Histogram | Optimization pass duration |
//! | `flowtune_optimization_passes` | Counter | Completed optimization passes |
//!
//! Readers must tolerate eventual, not atomic, visibility of a snapshot
//! across counters: the sampler is the sole writer, but publication is not
//! transactional.

pub mod metrics;
mod registry;

pub use registry::ResourceRegistry;
