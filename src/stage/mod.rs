//! Pipeline stages and their runtime context.

mod context;
pub mod testing;
mod traits;

pub use context::StageContext;
pub use traits::{MemoryCheckpoint, Stage, StateReader, StateWriter};
