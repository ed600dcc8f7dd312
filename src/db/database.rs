//! Database handle
//!
//! Owns one SQLite connection behind a mutex. Collections share it through
//! their executor; the lock is taken per attempt, never across an await.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::Connection;

use super::collection::{Collection, CollectionOptions};
use crate::cache::StatementCache;
use crate::config::DatabaseConfig;
use crate::error::{QueryError, QueryResult};
use crate::executor::storage::classify_error;
use crate::executor::{QueryExecutor, RetrySetting};
use crate::observability::{Event, Logger, MetricsRegistry};
use crate::schema::{ddl, SchemaDefinition, SchemaLoader};

/// An open database
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    config: DatabaseConfig,
    metrics: Arc<MetricsRegistry>,
}

impl Database {
    /// Opens (or creates) the database described by `config`
    pub fn open(config: DatabaseConfig) -> QueryResult<Self> {
        config.validate()?;
        Logger::set_min_severity(config.log_level);

        let conn = match &config.path {
            Some(path) => Connection::open(path),
            None => Connection::open_in_memory(),
        }
        .map_err(|e| classify_error(e, None))?;
        configure(&conn, &config).map_err(|e| classify_error(e, None))?;

        let location = config
            .path
            .as_ref()
            .map_or_else(|| ":memory:".to_string(), |p| p.display().to_string());
        Event::DatabaseOpened.emit(&[
            ("busy_timeout_ms", config.busy_timeout_ms.to_string().as_str()),
            ("path", location.as_str()),
        ]);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            config,
            metrics: Arc::new(MetricsRegistry::new()),
        })
    }

    /// In-memory database with default settings
    pub fn open_in_memory() -> QueryResult<Self> {
        Self::open(DatabaseConfig::in_memory())
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Ensures the collection's table and indexes exist and returns a handle
    pub fn collection(
        &self,
        schema: impl Into<Arc<SchemaDefinition>>,
        options: CollectionOptions,
    ) -> QueryResult<Collection> {
        let schema: Arc<SchemaDefinition> = schema.into();
        if let RetrySetting::Policy(policy) = &options.retry {
            policy.validate()?;
        }

        let statements = ddl::create_statements(&schema, self.config.date_representation)?;
        {
            let conn = self.conn.lock();
            // the table comes first; its indexes need the generated columns
            if let Some((table, indexes)) = statements.split_first() {
                conn.execute_batch(table)
                    .map_err(|e| classify_error(e, Some(&schema)))?;
                check_columns(&conn, &schema)?;
                for statement in indexes {
                    conn.execute_batch(statement)
                        .map_err(|e| classify_error(e, Some(&schema)))?;
                }
            }
        }

        let cache_config = options
            .statement_cache
            .unwrap_or(self.config.statement_cache);
        let cache = if cache_config.enabled {
            Some(StatementCache::new(cache_config.capacity)?.with_metrics(Arc::clone(&self.metrics)))
        } else {
            None
        };

        Event::CollectionReady.emit(&[
            ("cache_capacity", cache_config.capacity.to_string().as_str()),
            ("cache_enabled", if cache.is_some() { "true" } else { "false" }),
            ("collection", schema.collection()),
            ("indexes", (statements.len() - 1).to_string().as_str()),
        ]);

        Ok(Collection::new(
            schema,
            QueryExecutor::new(Arc::clone(&self.conn), Arc::clone(&self.metrics)),
            cache,
            self.config.date_representation,
            self.config.retry.clone(),
            options,
        ))
    }

    /// Loads every schema file in `schema_dir` and opens each collection
    /// with default options, in collection-name order.
    pub fn load_collections(&self, schema_dir: &Path) -> QueryResult<Vec<Collection>> {
        let mut loader = SchemaLoader::new(schema_dir);
        loader.load_all()?;
        loader
            .all_schemas()
            .map(|schema| self.collection(Arc::clone(schema), CollectionOptions::default()))
            .collect()
    }
}

/// Fails when an existing table predates a materialized field.
/// `CREATE TABLE IF NOT EXISTS` never adds columns to it.
fn check_columns(conn: &Connection, schema: &SchemaDefinition) -> QueryResult<()> {
    let existing: HashSet<String> = conn
        .prepare("SELECT name FROM pragma_table_xinfo(?1)")
        .and_then(|mut stmt| {
            let rows = stmt.query_map([schema.collection()], |row| row.get(0))?;
            rows.collect()
        })
        .map_err(|e| classify_error(e, Some(schema)))?;

    let missing: Vec<String> = schema
        .materialized_fields()
        .map(|field| field.column_name())
        .filter(|column| !existing.contains(column))
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    Err(QueryError::config(format!(
        "collection '{}' has no generated column {}; the stored table predates the schema",
        schema.collection(),
        missing.join(", ")
    )))
}

fn configure(conn: &Connection, config: &DatabaseConfig) -> rusqlite::Result<()> {
    conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
    if config.path.is_some() {
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    }
    // LIKE compiles to case-sensitive matching; ILIKE lowers both sides
    conn.pragma_update(None, "case_sensitive_like", true)?;
    Ok(())
}
