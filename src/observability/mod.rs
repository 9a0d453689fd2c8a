//! Observability: tracing setup, correlation ids, process-local counters
//!
//! The durable analytics counters live in the KV store; this module is the
//! process-local surface: cheap atomic counters for dashboards and tests,
//! correlation ids attached to every request span, and the subscriber
//! bootstrap used by the binary.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;
use uuid::Uuid;

/// Correlation id attached to a request's span and error envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generate a fresh id
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// The id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Process-local counter registry
///
/// Counters are created on first touch; reads take a point-in-time
/// snapshot. Lock-free on the hot path.
#[derive(Clone, Default)]
pub struct CounterRegistry {
    counters: Arc<DashMap<String, AtomicU64>>,
}

impl CounterRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a counter by one
    pub fn incr(&self, name: &str) {
        self.add(name, 1);
    }

    /// Increment a counter by `n`
    pub fn add(&self, name: &str, n: u64) {
        self.counters
            .entry(name.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(n, Ordering::Relaxed);
    }

    /// Current value of a counter (0 when never touched)
    pub fn get(&self, name: &str) -> u64 {
        self.counters
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Point-in-time snapshot of every counter
    pub fn snapshot(&self) -> HashMap<String, u64> {
        self.counters
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed)))
            .collect()
    }
}

/// Install the global tracing subscriber
///
/// Filter comes from `RUST_LOG`, defaulting to `info`. Idempotent: a second
/// call is a no-op so tests can race it freely.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correlation_ids_unique() {
        let a = CorrelationId::new();
        let b = CorrelationId::new();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
    }

    #[test]
    fn test_counter_registry() {
        let registry = CounterRegistry::new();
        assert_eq!(registry.get("hits.l1"), 0);
        registry.incr("hits.l1");
        registry.incr("hits.l1");
        registry.add("hits.l2", 5);
        assert_eq!(registry.get("hits.l1"), 2);
        assert_eq!(registry.get("hits.l2"), 5);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot["hits.l1"], 2);
    }

    #[test]
    fn test_init_tracing_idempotent() {
        init_tracing();
        init_tracing();
    }
}
