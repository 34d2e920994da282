//! # flowtune
//!
//! An adaptive parallelism autotuner for pull-based data pipelines.
//!
//! flowtune wraps the consumer end of a stage chain and tunes per-stage
//! parallelism and buffer sizes at runtime, maximizing throughput under
//! fixed CPU and RAM budgets.
//!
//! ## Features
//!
//! - **Performance node tree**: per-stage counters and tunables in a
//!   handle-based arena mirroring the pipeline topology
//! - **Autotuning optimizer**: hill-climb or gradient-descent assignment
//!   under budget constraints, with exponential backoff (10 ms → 60 s)
//! - **Metrics sampler**: fixed 10 ms publication cadence, independent of
//!   the optimizer's backoff
//! - **Non-intrusive**: the upstream pull runs unlocked; a slow stage never
//!   blocks tuning or sampling
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use flowtune::prelude::*;
//! use flowtune::stage::testing::RangeSource;
//!
//! let source = Box::new(RangeSource::new(1_000, 64));
//! let mut driver = ModelDriver::new("ingest", source, ModelConfig::default())?;
//! driver.initialize()?;
//! while let Some(batch) = driver.pull()? {
//!     // consume elements; tuning and sampling run in the background
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buffer;
pub mod error;
pub mod model;
pub mod observability;
pub mod pipeline;
pub mod stage;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::buffer::Buffer;
    pub use crate::error::{Error, Result};
    pub use crate::model::{AutotuneAlgorithm, Model, NodeId, NodeMetrics, Tunables};
    pub use crate::pipeline::{ModelConfig, ModelDriver};
    pub use crate::stage::{Stage, StageContext};
}

pub use error::{Error, Result};
