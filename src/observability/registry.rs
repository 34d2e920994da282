//! Shared resource registry.
//!
//! A process-wide map of named counters that external observers share with
//! the pipeline's background loops. Lookups that miss create the entry with
//! an initial value; a miss is never an error.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Registry of shared counters keyed by (container, name).
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    entries: Mutex<HashMap<(String, String), Arc<AtomicU64>>>,
}

impl ResourceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a counter, creating it with `initial` if absent.
    pub fn lookup_or_create(&self, container: &str, name: &str, initial: u64) -> Arc<AtomicU64> {
        let mut entries = self.entries.lock().unwrap();
        entries
            .entry((container.to_string(), name.to_string()))
            .or_insert_with(|| Arc::new(AtomicU64::new(initial)))
            .clone()
    }

    /// Look up a counter without creating it.
    pub fn lookup(&self, container: &str, name: &str) -> Option<Arc<AtomicU64>> {
        let entries = self.entries.lock().unwrap();
        entries
            .get(&(container.to_string(), name.to_string()))
            .cloned()
    }

    /// Number of registered counters.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}
