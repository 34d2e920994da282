//! Error types for flowtune.

use thiserror::Error;

/// Result type alias using flowtune's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for flowtune operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A resource budget was negative at construction time.
    #[error("{budget} budget must be non-negative but is {value}")]
    InvalidBudget {
        /// Which budget was rejected ("cpu" or "ram").
        budget: &'static str,
        /// The rejected value.
        value: i64,
    },

    /// An upstream stage failed while producing elements.
    ///
    /// The driver forwards these verbatim; it never wraps or retries them.
    #[error("stage error: {0}")]
    Stage(String),

    /// A checkpoint is missing a key the stage expected.
    #[error("missing checkpoint key: {0}")]
    MissingStateKey(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
