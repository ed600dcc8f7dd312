//! Database configuration
//!
//! Loaded from camelCase JSON or built programmatically. Every field has a
//! default, so `{}` is a valid configuration (in-memory, cache on, no retries).
//!
//! ```json
//! {
//!   "path": "data/app.db",
//!   "busyTimeoutMs": 0,
//!   "statementCache": { "enabled": true, "capacity": 500 },
//!   "dateRepresentation": "iso8601",
//!   "logLevel": "warn",
//!   "retry": { "retries": 3, "factor": 2, "minTimeout": 10, "maxTimeout": 1000 }
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{QueryError, QueryResult};
use crate::executor::RetrySetting;
use crate::observability::Severity;

/// Default statement cache capacity
pub const DEFAULT_CACHE_CAPACITY: usize = 500;

/// How `Date` fields are stored and how date operands are bound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DateRepresentation {
    /// RFC 3339 text in UTC, millisecond precision
    #[default]
    Iso8601,
    /// Milliseconds since the Unix epoch
    UnixMillis,
}

/// Statement cache settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StatementCacheConfig {
    /// Whether compiled templates are cached
    pub enabled: bool,
    /// Maximum number of cached templates
    pub capacity: usize,
}

impl Default for StatementCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl StatementCacheConfig {
    /// Cache disabled
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

/// Configuration for a `Database`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseConfig {
    /// Database file. `None` opens an in-memory database.
    pub path: Option<PathBuf>,
    /// Milliseconds SQLite waits on a lock before reporting busy
    pub busy_timeout_ms: u64,
    /// Statement cache settings
    pub statement_cache: StatementCacheConfig,
    /// Date storage representation
    pub date_representation: DateRepresentation,
    /// Minimum severity emitted by the logger
    pub log_level: Severity,
    /// Database-level retry setting
    pub retry: RetrySetting,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: 0,
            statement_cache: StatementCacheConfig::default(),
            date_representation: DateRepresentation::default(),
            log_level: Severity::Warn,
            retry: RetrySetting::Inherit,
        }
    }
}

impl DatabaseConfig {
    /// In-memory database with defaults
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// File-backed database with defaults
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Sets the statement cache settings
    pub fn with_statement_cache(mut self, cache: StatementCacheConfig) -> Self {
        self.statement_cache = cache;
        self
    }

    /// Sets the database-level retry setting
    pub fn with_retry(mut self, retry: RetrySetting) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the date representation
    pub fn with_date_representation(mut self, repr: DateRepresentation) -> Self {
        self.date_representation = repr;
        self
    }

    /// Parses configuration from a JSON string
    pub fn from_json_str(content: &str) -> QueryResult<Self> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| QueryError::config(format!("Invalid JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a JSON file
    pub fn load(path: &Path) -> QueryResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            QueryError::config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&content)
    }

    /// Checks settings that serde cannot express
    pub fn validate(&self) -> QueryResult<()> {
        if self.statement_cache.enabled && self.statement_cache.capacity == 0 {
            return Err(QueryError::config(
                "statementCache.capacity must be positive when the cache is enabled",
            ));
        }
        if let RetrySetting::Policy(options) = &self.retry {
            options.validate()?;
        }
        Ok(())
    }
}
