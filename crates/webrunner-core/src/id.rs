//! Injectable ID generation.
//!
//! Executors stamp execution IDs onto results and events. Replay requires
//! those IDs to be reproducible, so the generator is a collaborator rather
//! than a direct clock/random read.

use std::sync::atomic::{AtomicU64, Ordering};

/// Source of opaque unique identifiers.
pub trait IdSource: Send + Sync {
    /// Produce the next identifier.
    fn next_id(&self) -> String;
}

/// Production source backed by UUID v4.
#[derive(Debug, Default)]
pub struct UuidIdSource;

impl IdSource for UuidIdSource {
    fn next_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Deterministic source for tests and replay: `prefix-1`, `prefix-2`, ...
#[derive(Debug)]
pub struct SequentialIdSource {
    prefix: String,
    counter: AtomicU64,
}

impl SequentialIdSource {
    /// Create a new sequential source with the given prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: AtomicU64::new(0),
        }
    }
}

impl IdSource for SequentialIdSource {
    fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}-{}", self.prefix, n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_source_is_deterministic() {
        let ids = SequentialIdSource::new("exec");
        assert_eq!(ids.next_id(), "exec-1");
        assert_eq!(ids.next_id(), "exec-2");
    }

    #[test]
    fn test_uuid_source_yields_distinct_ids() {
        let ids = UuidIdSource;
        assert_ne!(ids.next_id(), ids.next_id());
    }
}
