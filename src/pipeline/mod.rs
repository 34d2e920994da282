//! Pipeline driving: the foreground pull path and its background loops.

mod driver;

pub use driver::{
    INITIAL_OPTIMIZATION_PERIOD, METRICS_SAMPLE_PERIOD, ModelConfig, ModelDriver,
    OPTIMIZATION_PERIOD_CEILING,
};
