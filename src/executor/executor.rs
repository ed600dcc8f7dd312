//! Execution wrapper
//!
//! Runs one logical operation against the shared connection:
//!
//! ```text
//! Pending → check cancellation → Attempting → Success
//!                                           → transient failure → backoff → check cancellation → Attempting
//!                                           → fatal failure
//! ```
//!
//! The connection lock is held only for the duration of one attempt and
//! never across an await point. Cancellation always wins over remaining
//! retry budget.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rusqlite::Connection;

use super::cancel::CancellationSignal;
use super::retry::{AttemptContext, RetryOptions};
use crate::error::{QueryError, QueryResult};
use crate::observability::{Event, MetricsRegistry};

/// Per-operation execution settings
#[derive(Debug, Clone)]
pub struct ExecutionContext<'a> {
    pub collection: &'a str,
    /// Operation name for logs (`find`, `insert_many`, …)
    pub operation: &'a str,
    /// Resolved retry policy; `None` means a single attempt
    pub retry: Option<RetryOptions>,
    pub signal: Option<&'a CancellationSignal>,
}

impl<'a> ExecutionContext<'a> {
    pub fn new(collection: &'a str, operation: &'a str) -> Self {
        Self {
            collection,
            operation,
            retry: None,
            signal: None,
        }
    }

    pub fn with_retry(mut self, retry: Option<RetryOptions>) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_signal(mut self, signal: Option<&'a CancellationSignal>) -> Self {
        self.signal = signal;
        self
    }

    fn is_cancelled(&self) -> bool {
        self.signal.map_or(false, CancellationSignal::is_cancelled)
    }
}

/// Runs attempts against one connection with retry and cancellation
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    conn: Arc<Mutex<Connection>>,
    metrics: Arc<MetricsRegistry>,
}

impl QueryExecutor {
    pub fn new(conn: Arc<Mutex<Connection>>, metrics: Arc<MetricsRegistry>) -> Self {
        Self { conn, metrics }
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Runs `attempt` until it succeeds, fails fatally, runs out of retry
    /// budget or is cancelled.
    ///
    /// Each call of `attempt` is one storage attempt under the connection
    /// lock. Everything it does must be undone on error (use a
    /// `TransactionGuard` for writes).
    pub async fn run<T, F>(&self, ctx: &ExecutionContext<'_>, mut attempt: F) -> QueryResult<T>
    where
        F: FnMut(&Connection) -> QueryResult<T>,
    {
        let started = Instant::now();
        let mut attempt_number: u32 = 0;
        let mut retries_left = ctx.retry.as_ref().map_or(0, |r| r.retries);

        loop {
            if ctx.is_cancelled() {
                return Err(self.cancelled(ctx, attempt_number));
            }
            attempt_number += 1;

            let result = {
                let conn = self.conn.lock();
                attempt(&*conn)
            };
            let err = match result {
                Ok(value) => {
                    self.metrics.increment_queries_executed();
                    Event::QueryExecuted.emit(&[
                        ("attempts", attempt_number.to_string().as_str()),
                        ("collection", ctx.collection),
                        ("operation", ctx.operation),
                    ]);
                    return Ok(value);
                }
                Err(err) => err,
            };

            let delay = match &ctx.retry {
                Some(policy) if err.is_retryable() => {
                    match next_delay(policy, &err, attempt_number, &mut retries_left, started) {
                        Some(delay) => delay,
                        None => return Err(self.failed(ctx, err, attempt_number)),
                    }
                }
                _ => return Err(self.failed(ctx, err, attempt_number)),
            };

            self.metrics.increment_retries();
            Event::QueryRetry.emit(&[
                ("attempt", attempt_number.to_string().as_str()),
                ("collection", ctx.collection),
                ("delay_ms", delay.as_millis().to_string().as_str()),
                ("error", err.code()),
                ("operation", ctx.operation),
                ("retries_left", retries_left.to_string().as_str()),
            ]);

            match ctx.signal {
                Some(signal) => {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = signal.wait() => return Err(self.cancelled(ctx, attempt_number)),
                    }
                }
                None => tokio::time::sleep(delay).await,
            }
        }
    }

    /// Runs the synchronous work that precedes the first attempt
    /// (translation, validation).
    ///
    /// A cancelled signal wins and `step` is not run. The resolved retry
    /// policy is validated next. Failures are reported like attempt
    /// failures, with zero attempts.
    pub fn prepare<T, F>(&self, ctx: &ExecutionContext<'_>, step: F) -> QueryResult<T>
    where
        F: FnOnce() -> QueryResult<T>,
    {
        if ctx.is_cancelled() {
            return Err(self.cancelled(ctx, 0));
        }
        if let Some(policy) = &ctx.retry {
            policy.validate().map_err(|err| self.failed(ctx, err, 0))?;
        }
        step().map_err(|err| self.failed(ctx, err, 0))
    }

    fn cancelled(&self, ctx: &ExecutionContext<'_>, attempts: u32) -> QueryError {
        self.metrics.increment_cancellations();
        Event::QueryCancelled.emit(&[
            ("attempts", attempts.to_string().as_str()),
            ("collection", ctx.collection),
            ("operation", ctx.operation),
        ]);
        QueryError::Cancelled
    }

    fn failed(&self, ctx: &ExecutionContext<'_>, err: QueryError, attempts: u32) -> QueryError {
        let message = err.to_string();
        let fields = [
            ("attempts", attempts.to_string()),
            ("code", err.code().to_string()),
            ("collection", ctx.collection.to_string()),
            ("message", message),
            ("operation", ctx.operation.to_string()),
        ];
        let fields: Vec<(&str, &str)> = fields.iter().map(|(k, v)| (*k, v.as_str())).collect();

        match err {
            QueryError::Translation { .. }
            | QueryError::Validation { .. }
            | QueryError::UniqueConstraint { .. } => {
                self.metrics.increment_queries_rejected();
                Event::QueryRejected.emit(&fields);
            }
            QueryError::Cancelled => {
                self.metrics.increment_cancellations();
                Event::QueryCancelled.emit(&fields);
            }
            _ => Event::QueryFailed.emit(&fields),
        }
        err
    }
}

/// Applies the policy to a transient failure. Returns the backoff delay, or
/// `None` when the error must be surfaced.
fn next_delay(
    policy: &RetryOptions,
    err: &QueryError,
    attempt_number: u32,
    retries_left: &mut u32,
    started: Instant,
) -> Option<Duration> {
    let context = AttemptContext {
        error: err,
        attempt_number,
        retries_left: *retries_left,
        retries: policy.retries,
    };
    if let Some(hook) = &policy.on_failed_attempt {
        hook(&context);
    }
    if *retries_left == 0 {
        return None;
    }
    if let Some(should_retry) = &policy.should_retry {
        if !should_retry(&context) {
            return None;
        }
    }

    let delay = policy.backoff(attempt_number);
    if let Some(max) = policy.max_retry_time {
        if started.elapsed() + delay > Duration::from_millis(max) {
            return None;
        }
    }

    let consume = policy
        .should_consume_retry
        .as_ref()
        .map_or(true, |consume| consume(&context));
    if consume {
        *retries_left -= 1;
    }
    Some(delay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn executor() -> QueryExecutor {
        let conn = Connection::open_in_memory().unwrap();
        QueryExecutor::new(Arc::new(Mutex::new(conn)), Arc::new(MetricsRegistry::new()))
    }

    fn busy() -> QueryError {
        QueryError::TransientStorage("database is locked".into())
    }

    fn fast_retries(retries: u32) -> Option<RetryOptions> {
        Some(RetryOptions::with_retries(retries).with_timeouts(1, 2))
    }

    #[tokio::test]
    async fn test_success_runs_once() {
        let executor = executor();
        let ctx = ExecutionContext::new("users", "find");
        let value = executor
            .run(&ctx, |conn| {
                conn.query_row("SELECT 41 + 1", [], |r| r.get::<_, i64>(0))
                    .map_err(|e| QueryError::Storage(e.to_string()))
            })
            .await
            .unwrap();
        assert_eq!(value, 42);
        assert_eq!(executor.metrics().snapshot().queries_executed, 1);
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let executor = executor();
        let ctx = ExecutionContext::new("users", "find").with_retry(fast_retries(3));
        let mut calls = 0;
        let value = executor
            .run(&ctx, |_| {
                calls += 1;
                if calls < 3 {
                    Err(busy())
                } else {
                    Ok(calls)
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 3);
        assert_eq!(executor.metrics().snapshot().retries, 2);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_returns_last_error() {
        let executor = executor();
        let ctx = ExecutionContext::new("users", "find").with_retry(fast_retries(2));
        let mut calls = 0;
        let err = executor
            .run(&ctx, |_| -> QueryResult<()> {
                calls += 1;
                Err(busy())
            })
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_non_transient_errors_are_not_retried() {
        let executor = executor();
        let ctx = ExecutionContext::new("users", "insert_one").with_retry(fast_retries(5));
        let mut calls = 0;
        let err = executor
            .run(&ctx, |_| -> QueryResult<()> {
                calls += 1;
                Err(QueryError::unique("email"))
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "AERO_UNIQUE_CONSTRAINT");
        assert_eq!(calls, 1);
        assert_eq!(executor.metrics().snapshot().queries_rejected, 1);
    }

    #[tokio::test]
    async fn test_no_policy_means_single_attempt() {
        let executor = executor();
        let ctx = ExecutionContext::new("users", "find");
        let mut calls = 0;
        let result = executor
            .run(&ctx, |_| -> QueryResult<()> {
                calls += 1;
                Err(busy())
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_pre_cancelled_signal_skips_storage() {
        let executor = executor();
        let signal = CancellationSignal::cancelled();
        let ctx = ExecutionContext::new("users", "find")
            .with_retry(fast_retries(3))
            .with_signal(Some(&signal));
        let mut calls = 0;
        let err = executor
            .run(&ctx, |_| -> QueryResult<()> {
                calls += 1;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Cancelled));
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_prepare_reports_rejections() {
        let executor = executor();
        let ctx = ExecutionContext::new("users", "find");
        let err = executor
            .prepare(&ctx, || -> QueryResult<()> { Err(QueryError::translation("bad")) })
            .unwrap_err();
        assert!(matches!(err, QueryError::Translation { .. }));
        assert_eq!(executor.metrics().snapshot().queries_rejected, 1);

        let signal = CancellationSignal::cancelled();
        let ctx = ctx.with_signal(Some(&signal));
        let mut ran = false;
        let err = executor
            .prepare(&ctx, || -> QueryResult<()> {
                ran = true;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, QueryError::Cancelled));
        assert!(!ran);
    }

    #[test]
    fn test_prepare_rejects_invalid_policy() {
        let executor = executor();
        let mut policy = RetryOptions::with_retries(3);
        policy.factor = 0.5;
        let ctx = ExecutionContext::new("users", "find").with_retry(Some(policy));
        let mut ran = false;
        let err = executor
            .prepare(&ctx, || -> QueryResult<()> {
                ran = true;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, QueryError::Config(_)));
        assert!(!ran);
    }

    #[tokio::test]
    async fn test_cancel_during_backoff_stops_retries() {
        let executor = executor();
        let signal = CancellationSignal::new();
        let trigger = signal.clone();
        let policy = RetryOptions::with_retries(10).with_timeouts(5_000, 5_000);
        let ctx = ExecutionContext::new("users", "find")
            .with_retry(Some(policy))
            .with_signal(Some(&signal));

        let mut calls = 0;
        let err = executor
            .run(&ctx, |_| -> QueryResult<()> {
                calls += 1;
                trigger.cancel();
                Err(busy())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Cancelled));
        assert_eq!(calls, 1);
        assert_eq!(executor.metrics().snapshot().cancellations, 1);
    }

    #[tokio::test]
    async fn test_hooks_observe_policy() {
        let executor = executor();
        let seen = Arc::new(AtomicU32::new(0));
        let observed = Arc::clone(&seen);
        let policy = RetryOptions::with_retries(7)
            .with_timeouts(1, 1)
            .on_failed_attempt(move |ctx| observed.store(ctx.retries, Ordering::SeqCst))
            .should_retry(|ctx| ctx.attempt_number < 2);
        let ctx = ExecutionContext::new("users", "find").with_retry(Some(policy));

        let mut calls = 0;
        let result = executor
            .run(&ctx, |_| -> QueryResult<()> {
                calls += 1;
                Err(busy())
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls, 2);
        assert_eq!(seen.load(Ordering::SeqCst), 7);
    }

    #[tokio::test]
    async fn test_unconsumed_retries_keep_budget() {
        let executor = executor();
        let policy = RetryOptions::with_retries(1)
            .with_timeouts(1, 1)
            .should_consume_retry(|ctx| ctx.attempt_number > 2);
        let ctx = ExecutionContext::new("users", "find").with_retry(Some(policy));

        let mut calls = 0;
        let result = executor
            .run(&ctx, |_| -> QueryResult<()> {
                calls += 1;
                Err(busy())
            })
            .await;
        assert!(result.is_err());
        // two free retries, then the single budgeted one
        assert_eq!(calls, 4);
    }

    #[tokio::test]
    async fn test_max_retry_time_bounds_retries() {
        let executor = executor();
        let policy = RetryOptions::with_retries(100)
            .with_timeouts(20, 20)
            .with_max_retry_time(30);
        let ctx = ExecutionContext::new("users", "find").with_retry(Some(policy));

        let mut calls = 0;
        let result = executor
            .run(&ctx, |_| -> QueryResult<()> {
                calls += 1;
                Err(busy())
            })
            .await;
        assert!(result.is_err());
        assert!(calls <= 3, "calls = {}", calls);
    }
}
