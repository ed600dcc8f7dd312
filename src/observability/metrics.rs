//! Metrics registry for aerodoc
//!
//! - Counters only
//! - Monotonic increase
//! - Thread-safe but lock-minimal

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Operational counters shared by a database and its collections
///
/// All counters use Relaxed ordering; eventual consistency is fine for metrics.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    queries_executed: AtomicU64,
    queries_rejected: AtomicU64,
    retries: AtomicU64,
    cancellations: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    cache_evictions: AtomicU64,
    documents_inserted: AtomicU64,
    documents_updated: AtomicU64,
    documents_deleted: AtomicU64,
    transactions_committed: AtomicU64,
    transactions_rolled_back: AtomicU64,
}

impl MetricsRegistry {
    /// Create a new metrics registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    // Query metrics

    /// Increment queries executed
    pub fn increment_queries_executed(&self) {
        self.queries_executed.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment queries rejected before execution
    pub fn increment_queries_rejected(&self) {
        self.queries_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment retry attempts
    pub fn increment_retries(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment observed cancellations
    pub fn increment_cancellations(&self) {
        self.cancellations.fetch_add(1, Ordering::Relaxed);
    }

    // Statement cache metrics

    pub fn increment_cache_hits(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_cache_misses(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_cache_evictions(&self) {
        self.cache_evictions.fetch_add(1, Ordering::Relaxed);
    }

    // Document metrics

    /// Add to documents inserted
    pub fn add_documents_inserted(&self, count: u64) {
        self.documents_inserted.fetch_add(count, Ordering::Relaxed);
    }

    /// Add to documents updated
    pub fn add_documents_updated(&self, count: u64) {
        self.documents_updated.fetch_add(count, Ordering::Relaxed);
    }

    /// Add to documents deleted
    pub fn add_documents_deleted(&self, count: u64) {
        self.documents_deleted.fetch_add(count, Ordering::Relaxed);
    }

    // Transaction metrics

    pub fn increment_commits(&self) {
        self.transactions_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_rollbacks(&self) {
        self.transactions_rolled_back.fetch_add(1, Ordering::Relaxed);
    }

    /// Get all metrics as a snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queries_executed: self.queries_executed.load(Ordering::Relaxed),
            queries_rejected: self.queries_rejected.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            cancellations: self.cancellations.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            cache_evictions: self.cache_evictions.load(Ordering::Relaxed),
            documents_inserted: self.documents_inserted.load(Ordering::Relaxed),
            documents_updated: self.documents_updated.load(Ordering::Relaxed),
            documents_deleted: self.documents_deleted.load(Ordering::Relaxed),
            transactions_committed: self.transactions_committed.load(Ordering::Relaxed),
            transactions_rolled_back: self.transactions_rolled_back.load(Ordering::Relaxed),
        }
    }

    /// Current snapshot of all metrics as JSON
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.snapshot()).unwrap_or_else(|_| "{}".to_string())
    }
}

/// A point-in-time snapshot of all metrics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub queries_executed: u64,
    pub queries_rejected: u64,
    pub retries: u64,
    pub cancellations: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_evictions: u64,
    pub documents_inserted: u64,
    pub documents_updated: u64,
    pub documents_deleted: u64,
    pub transactions_committed: u64,
    pub transactions_rolled_back: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_registry_has_zero_values() {
        let snapshot = MetricsRegistry::new().snapshot();
        assert_eq!(snapshot.queries_executed, 0);
        assert_eq!(snapshot.cache_hits, 0);
        assert_eq!(snapshot.transactions_committed, 0);
    }

    #[test]
    fn test_counters_accumulate() {
        let registry = MetricsRegistry::new();
        registry.increment_retries();
        registry.increment_retries();
        registry.add_documents_inserted(5);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.retries, 2);
        assert_eq!(snapshot.documents_inserted, 5);
    }

    #[test]
    fn test_to_json_parses() {
        let registry = MetricsRegistry::new();
        registry.increment_cache_misses();

        let parsed: serde_json::Value = serde_json::from_str(&registry.to_json()).unwrap();
        assert_eq!(parsed["cache_misses"], 1);
        assert_eq!(parsed["cache_hits"], 0);
    }
}
