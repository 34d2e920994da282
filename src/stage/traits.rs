//! Core stage traits.
//!
//! A [`Stage`] is one pull-based pipeline operator: the driver delegates to
//! exactly one upstream stage, which may itself wrap further stages. flowtune
//! never transforms elements; it only moves them and observes the timing.

use crate::buffer::Buffer;
use crate::error::Result;
use crate::stage::StageContext;
use std::collections::HashMap;

/// A pull-based pipeline stage.
///
/// # Lifecycle
///
/// - `initialize()` is called exactly once, before any pull, with a context
///   carrying the shared performance model. Stages register their node in
///   the model here and propagate the child context upstream.
/// - `pull()` is called repeatedly by the consumer:
///   - `Ok(Some(elements))` yields a batch of produced elements,
///   - `Ok(None)` signals end of sequence,
///   - `Err(...)` propagates unchanged to the driver's caller.
/// - `save()`/`restore()` checkpoint any stage-owned state.
///
/// # Example
///
/// ```rust,ignore
/// struct CounterSource {
///     next: u64,
///     max: u64,
/// }
///
/// impl Stage for CounterSource {
///     fn initialize(&mut self, _ctx: &StageContext) -> Result<()> {
///         Ok(())
///     }
///
///     fn pull(&mut self, _ctx: &StageContext) -> Result<Option<Vec<Buffer>>> {
///         if self.next >= self.max {
///             return Ok(None); // end of sequence
///         }
///         let buf = Buffer::new(self.next.to_le_bytes().to_vec(), self.next);
///         self.next += 1;
///         Ok(Some(vec![buf]))
///     }
/// }
/// ```
pub trait Stage: Send {
    /// Initialize the stage and propagate the context upstream.
    fn initialize(&mut self, ctx: &StageContext) -> Result<()>;

    /// Pull the next batch of elements.
    ///
    /// Returns `Ok(None)` when the stage is exhausted (end of sequence).
    /// This call may block for unbounded external reasons; callers must not
    /// hold locks across it.
    fn pull(&mut self, ctx: &StageContext) -> Result<Option<Vec<Buffer>>>;

    /// Save stage-owned state to a checkpoint.
    fn save(&self, _writer: &mut dyn StateWriter) -> Result<()> {
        Ok(())
    }

    /// Restore stage-owned state from a checkpoint.
    fn restore(&mut self, _reader: &dyn StateReader) -> Result<()> {
        Ok(())
    }

    /// Get the name of this stage (for debugging/logging).
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Checkpoint writer a stage saves its state into.
pub trait StateWriter {
    /// Write a scalar value under a key.
    fn write_scalar(&mut self, key: &str, value: u64) -> Result<()>;
}

/// Checkpoint reader a stage restores its state from.
pub trait StateReader {
    /// Read a scalar value by key, `None` if absent.
    fn read_scalar(&self, key: &str) -> Result<Option<u64>>;
}

/// In-memory checkpoint store implementing both sides of the contract.
///
/// Real deployments supply durable implementations; this one exists for
/// tests and examples.
#[derive(Debug, Default)]
pub struct MemoryCheckpoint {
    scalars: HashMap<String, u64>,
}

impl MemoryCheckpoint {
    /// Create an empty checkpoint.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.scalars.len()
    }

    /// Check if the checkpoint is empty.
    pub fn is_empty(&self) -> bool {
        self.scalars.is_empty()
    }
}

impl StateWriter for MemoryCheckpoint {
    fn write_scalar(&mut self, key: &str, value: u64) -> Result<()> {
        self.scalars.insert(key.to_string(), value);
        Ok(())
    }
}

impl StateReader for MemoryCheckpoint {
    fn read_scalar(&self, key: &str) -> Result<Option<u64>> {
        Ok(self.scalars.get(key).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_checkpoint_round_trip() {
        let mut ckpt = MemoryCheckpoint::new();
        assert!(ckpt.is_empty());

        ckpt.write_scalar("next", 42).unwrap();
        ckpt.write_scalar("next", 43).unwrap();
        assert_eq!(ckpt.len(), 1);
        assert_eq!(ckpt.read_scalar("next").unwrap(), Some(43));
        assert_eq!(ckpt.read_scalar("missing").unwrap(), None);
    }
}
