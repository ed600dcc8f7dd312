//! Retry policy for transient storage contention
//!
//! Policies are resolved with precedence operation > collection > database >
//! built-in default (no retries). `RetrySetting::Disabled` (the JSON `false`)
//! switches retries off at its scope and wins over every lower scope.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Deserializer};

use crate::error::{QueryError, QueryResult};

/// State of a failed attempt, passed to the policy callbacks
#[derive(Debug)]
pub struct AttemptContext<'a> {
    /// The error the attempt failed with
    pub error: &'a QueryError,
    /// 1-based attempt number
    pub attempt_number: u32,
    /// Retries still available after this failure
    pub retries_left: u32,
    /// Configured retry budget of the effective policy
    pub retries: u32,
}

/// Callback invoked after every failed attempt
pub type FailedAttemptHook = Arc<dyn Fn(&AttemptContext<'_>) + Send + Sync>;

/// Predicate over a failed attempt
pub type AttemptPredicate = Arc<dyn Fn(&AttemptContext<'_>) -> bool + Send + Sync>;

/// Retry options. Timeouts are in milliseconds.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryOptions {
    /// Maximum number of retries after the first attempt
    pub retries: u32,
    /// Exponential backoff factor
    pub factor: f64,
    /// Delay before the first retry
    pub min_timeout: u64,
    /// Upper bound on any single delay
    pub max_timeout: u64,
    /// Total time budget across all attempts
    pub max_retry_time: Option<u64>,
    /// Multiply each delay by a random factor in [1, 2)
    pub randomize: bool,
    #[serde(skip)]
    pub on_failed_attempt: Option<FailedAttemptHook>,
    #[serde(skip)]
    pub should_retry: Option<AttemptPredicate>,
    #[serde(skip)]
    pub should_consume_retry: Option<AttemptPredicate>,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            retries: 3,
            factor: 2.0,
            min_timeout: 10,
            max_timeout: 1_000,
            max_retry_time: None,
            randomize: false,
            on_failed_attempt: None,
            should_retry: None,
            should_consume_retry: None,
        }
    }
}

impl fmt::Debug for RetryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOptions")
            .field("retries", &self.retries)
            .field("factor", &self.factor)
            .field("min_timeout", &self.min_timeout)
            .field("max_timeout", &self.max_timeout)
            .field("max_retry_time", &self.max_retry_time)
            .field("randomize", &self.randomize)
            .field("on_failed_attempt", &self.on_failed_attempt.is_some())
            .field("should_retry", &self.should_retry.is_some())
            .field("should_consume_retry", &self.should_consume_retry.is_some())
            .finish()
    }
}

impl RetryOptions {
    /// Options with the given retry budget and default backoff
    pub fn with_retries(retries: u32) -> Self {
        Self {
            retries,
            ..Self::default()
        }
    }

    /// Sets the backoff bounds (milliseconds)
    pub fn with_timeouts(mut self, min_timeout: u64, max_timeout: u64) -> Self {
        self.min_timeout = min_timeout;
        self.max_timeout = max_timeout;
        self
    }

    /// Sets the total time budget (milliseconds)
    pub fn with_max_retry_time(mut self, max_retry_time: u64) -> Self {
        self.max_retry_time = Some(max_retry_time);
        self
    }

    /// Enables randomized backoff
    pub fn randomized(mut self) -> Self {
        self.randomize = true;
        self
    }

    pub fn on_failed_attempt(
        mut self,
        hook: impl Fn(&AttemptContext<'_>) + Send + Sync + 'static,
    ) -> Self {
        self.on_failed_attempt = Some(Arc::new(hook));
        self
    }

    pub fn should_retry(
        mut self,
        predicate: impl Fn(&AttemptContext<'_>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.should_retry = Some(Arc::new(predicate));
        self
    }

    pub fn should_consume_retry(
        mut self,
        predicate: impl Fn(&AttemptContext<'_>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.should_consume_retry = Some(Arc::new(predicate));
        self
    }

    /// Rejects option combinations that cannot produce a sane schedule
    pub fn validate(&self) -> QueryResult<()> {
        if !self.factor.is_finite() || self.factor < 1.0 {
            return Err(QueryError::config("retry factor must be >= 1"));
        }
        if self.min_timeout > self.max_timeout {
            return Err(QueryError::config(
                "retry minTimeout must not exceed maxTimeout",
            ));
        }
        Ok(())
    }

    /// Delay before retry number `retry` (1-based)
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(32) as i32;
        let mut delay = self.min_timeout as f64 * self.factor.powi(exponent);
        if self.randomize {
            delay *= rand::thread_rng().gen_range(1.0..2.0);
        }
        let capped = delay.min(self.max_timeout as f64).max(0.0);
        Duration::from_millis(capped.round() as u64)
    }
}

/// Retry setting at one scope (database, collection or operation)
#[derive(Debug, Clone, Default)]
pub enum RetrySetting {
    /// Defer to the next lower scope
    #[default]
    Inherit,
    /// No retries at this scope
    Disabled,
    /// Explicit policy
    Policy(RetryOptions),
}

impl RetrySetting {
    /// Resolves the effective policy; `None` means a single attempt.
    pub fn resolve(
        operation: &RetrySetting,
        collection: &RetrySetting,
        database: &RetrySetting,
    ) -> Option<RetryOptions> {
        for scope in [operation, collection, database] {
            match scope {
                RetrySetting::Inherit => continue,
                RetrySetting::Disabled => return None,
                RetrySetting::Policy(options) => return Some(options.clone()),
            }
        }
        None
    }
}

impl From<RetryOptions> for RetrySetting {
    fn from(options: RetryOptions) -> Self {
        RetrySetting::Policy(options)
    }
}

impl<'de> Deserialize<'de> for RetrySetting {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Flag(bool),
            Options(RetryOptions),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Flag(false) => RetrySetting::Disabled,
            Repr::Flag(true) => RetrySetting::Policy(RetryOptions::default()),
            Repr::Options(options) => RetrySetting::Policy(options),
        })
    }
}
