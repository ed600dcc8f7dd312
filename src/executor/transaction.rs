//! Storage transactions
//!
//! A `TransactionGuard` rolls back when dropped unless it was committed, so
//! an error returned with `?` anywhere inside an attempt leaves no partial
//! writes behind. Savepoints scope per-item failures inside a batch.

use rusqlite::Connection;

use super::storage::classify_error;
use crate::error::{QueryError, QueryResult};
use crate::observability::{Event, MetricsRegistry};

/// How the transaction acquires its lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    /// Lock on first access; used for reads
    Deferred,
    /// Take the write lock up front, so contention surfaces at `BEGIN`
    Immediate,
}

impl TransactionMode {
    fn begin_sql(&self) -> &'static str {
        match self {
            TransactionMode::Deferred => "BEGIN DEFERRED",
            TransactionMode::Immediate => "BEGIN IMMEDIATE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    Active,
    Committed,
    RolledBack,
}

/// Open transaction on a borrowed connection
pub struct TransactionGuard<'c> {
    conn: &'c Connection,
    state: TxState,
    metrics: Option<&'c MetricsRegistry>,
}

impl<'c> TransactionGuard<'c> {
    pub fn begin(conn: &'c Connection, mode: TransactionMode) -> QueryResult<Self> {
        conn.execute_batch(mode.begin_sql())
            .map_err(|e| classify_error(e, None))?;
        Ok(Self {
            conn,
            state: TxState::Active,
            metrics: None,
        })
    }

    /// Counts commits and rollbacks in `metrics`
    pub fn with_metrics(mut self, metrics: &'c MetricsRegistry) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn conn(&self) -> &'c Connection {
        self.conn
    }

    pub fn is_active(&self) -> bool {
        self.state == TxState::Active
    }

    /// Runs `f` inside a savepoint. On error the savepoint's writes are
    /// undone and the transaction stays usable.
    pub fn savepoint<T, F>(&self, name: &str, f: F) -> QueryResult<T>
    where
        F: FnOnce(&Connection) -> QueryResult<T>,
    {
        self.ensure_active()?;
        self.conn
            .execute_batch(&format!("SAVEPOINT {}", name))
            .map_err(|e| classify_error(e, None))?;

        match f(self.conn) {
            Ok(value) => {
                self.conn
                    .execute_batch(&format!("RELEASE {}", name))
                    .map_err(|e| classify_error(e, None))?;
                Ok(value)
            }
            Err(err) => {
                let undo = format!("ROLLBACK TO {0}; RELEASE {0}", name);
                if let Err(undo_err) = self.conn.execute_batch(&undo) {
                    return Err(classify_error(undo_err, None));
                }
                Err(err)
            }
        }
    }

    pub fn commit(mut self) -> QueryResult<()> {
        self.ensure_active()?;
        self.conn
            .execute_batch("COMMIT")
            .map_err(|e| classify_error(e, None))?;
        self.state = TxState::Committed;
        if let Some(metrics) = self.metrics {
            metrics.increment_commits();
        }
        Event::TransactionCommit.emit(&[]);
        Ok(())
    }

    pub fn rollback(mut self) -> QueryResult<()> {
        self.ensure_active()?;
        self.finish_rollback()
    }

    fn finish_rollback(&mut self) -> QueryResult<()> {
        self.state = TxState::RolledBack;
        if let Some(metrics) = self.metrics {
            metrics.increment_rollbacks();
        }
        Event::TransactionRollback.emit(&[]);
        self.conn
            .execute_batch("ROLLBACK")
            .map_err(|e| classify_error(e, None))
    }

    fn ensure_active(&self) -> QueryResult<()> {
        match self.state {
            TxState::Active => Ok(()),
            TxState::Committed => Err(QueryError::Storage("transaction already committed".into())),
            TxState::RolledBack => Err(QueryError::Storage("transaction already rolled back".into())),
        }
    }
}

impl Drop for TransactionGuard<'_> {
    fn drop(&mut self) {
        if self.state == TxState::Active {
            // Nothing to report to from a destructor; a failed ROLLBACK means
            // SQLite already ended the transaction
            let _ = self.finish_rollback();
        }
    }
}
