//! Observable events for aerodoc
//!
//! Events are explicit and typed. Each maps to one stable log event name.

use std::fmt;

use super::logger::Severity;

/// Observable events in the query lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Database connection opened
    DatabaseOpened,
    /// Collection table and indexes ensured
    CollectionReady,

    /// Statement built for an operation
    QueryPlanned,
    /// Statement executed successfully
    QueryExecuted,
    /// Operation rejected before execution
    QueryRejected,
    /// Attempt failed with a transient error and will be retried
    QueryRetry,
    /// Cancellation observed at a checkpoint
    QueryCancelled,
    /// Attempt failed with a non-retryable error
    QueryFailed,

    /// Cursor boundary document no longer exists
    CursorBoundaryMissing,

    /// Template evicted from the statement cache
    StatementCacheEvict,

    /// Storage transaction committed
    TransactionCommit,
    /// Storage transaction rolled back
    TransactionRollback,

    /// Batch item rejected
    BatchItemFailed,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::DatabaseOpened => "DATABASE_OPENED",
            Event::CollectionReady => "COLLECTION_READY",
            Event::QueryPlanned => "QUERY_PLANNED",
            Event::QueryExecuted => "QUERY_COMPLETE",
            Event::QueryRejected => "QUERY_REJECTED",
            Event::QueryRetry => "QUERY_RETRY",
            Event::QueryCancelled => "QUERY_CANCELLED",
            Event::QueryFailed => "QUERY_FAILED",
            Event::CursorBoundaryMissing => "CURSOR_BOUNDARY_MISSING",
            Event::StatementCacheEvict => "STATEMENT_CACHE_EVICT",
            Event::TransactionCommit => "TRANSACTION_COMMIT",
            Event::TransactionRollback => "TRANSACTION_ROLLBACK",
            Event::BatchItemFailed => "BATCH_ITEM_FAILED",
        }
    }

    /// Default severity the event is logged at
    pub fn severity(&self) -> Severity {
        match self {
            Event::QueryPlanned | Event::StatementCacheEvict => Severity::Trace,
            Event::DatabaseOpened
            | Event::CollectionReady
            | Event::QueryExecuted
            | Event::TransactionCommit
            | Event::CursorBoundaryMissing => Severity::Info,
            Event::QueryRejected
            | Event::QueryRetry
            | Event::QueryCancelled
            | Event::TransactionRollback
            | Event::BatchItemFailed => Severity::Warn,
            Event::QueryFailed => Severity::Error,
        }
    }

    /// Logs this event at its default severity
    pub fn emit(&self, fields: &[(&str, &str)]) {
        super::Logger::log(self.severity(), self.as_str(), fields);
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names_unique() {
        let events = [
            Event::DatabaseOpened,
            Event::CollectionReady,
            Event::QueryPlanned,
            Event::QueryExecuted,
            Event::QueryRejected,
            Event::QueryRetry,
            Event::QueryCancelled,
            Event::QueryFailed,
            Event::CursorBoundaryMissing,
            Event::StatementCacheEvict,
            Event::TransactionCommit,
            Event::TransactionRollback,
            Event::BatchItemFailed,
        ];
        let mut names: Vec<_> = events.iter().map(|e| e.as_str()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), events.len());
    }

    #[test]
    fn test_failures_log_above_info() {
        assert!(Event::QueryRetry.severity() > Severity::Info);
        assert_eq!(Event::QueryFailed.severity(), Severity::Error);
    }
}
