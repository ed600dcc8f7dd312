//! Collection operations
//!
//! Every operation follows the same shape:
//!
//! 1. Resolve the execution context (retry scope, cancellation signal)
//! 2. Translate and validate synchronously; nothing touches storage yet
//! 3. Run the storage work through the executor, one attempt per lock
//!
//! Writes run inside an immediate transaction so a failed attempt leaves no
//! partial effects and can be retried whole.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use rusqlite::types::Value as SqlValue;
use rusqlite::Connection;
use serde_json::{Map, Value};

use super::id::{IdGenerator, UuidGenerator};
use crate::cache::{CacheStats, StatementCache};
use crate::config::{DateRepresentation, StatementCacheConfig};
use crate::document;
use crate::error::{QueryError, QueryResult};
use crate::executor::storage;
use crate::executor::{
    BatchItemError, DeleteResult, ExecutionContext, InsertManyResult, InsertOneResult,
    QueryExecutor, RetrySetting, TransactionGuard, TransactionMode, UpdateResult,
};
use crate::observability::{Event, MetricsRegistry};
use crate::planner::{
    lookup_boundary, ExplainPlan, FilterNode, IntoFilter, PlanBuilder, PlanKind, QueryOptions,
    QueryPlan,
};
use crate::schema::ddl::DATA_COLUMN;
use crate::schema::paths::{quote, ID_FIELD};
use crate::schema::{DocumentValidator, SchemaDefinition, SchemaValidator};
use crate::update::{IntoUpdate, UpdateSpec};

const ITEM_SAVEPOINT: &str = "aerodoc_batch_item";

/// Per-collection settings
#[derive(Clone, Default)]
pub struct CollectionOptions {
    /// Overrides the database statement cache settings
    pub statement_cache: Option<StatementCacheConfig>,
    /// Collection-level retry setting
    pub retry: RetrySetting,
    /// Runs after the schema checks on every written document
    pub validator: Option<Arc<dyn DocumentValidator>>,
    /// Defaults to random UUIDs
    pub id_generator: Option<Arc<dyn IdGenerator>>,
}

impl CollectionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_statement_cache(mut self, cache: StatementCacheConfig) -> Self {
        self.statement_cache = Some(cache);
        self
    }

    pub fn with_retry(mut self, retry: impl Into<RetrySetting>) -> Self {
        self.retry = retry.into();
        self
    }

    pub fn with_validator(mut self, validator: impl DocumentValidator + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn with_id_generator(mut self, generator: impl IdGenerator + 'static) -> Self {
        self.id_generator = Some(Arc::new(generator));
        self
    }
}

/// Handle to one collection. Cheap to clone.
#[derive(Clone)]
pub struct Collection {
    inner: Arc<Inner>,
}

struct Inner {
    schema: Arc<SchemaDefinition>,
    executor: QueryExecutor,
    cache: Option<StatementCache>,
    dates: DateRepresentation,
    retry: RetrySetting,
    database_retry: RetrySetting,
    validator: Option<Arc<dyn DocumentValidator>>,
    id_generator: Arc<dyn IdGenerator>,
    insert_sql: String,
    update_sql: String,
}

/// A validated document ready for INSERT
#[derive(Clone, Debug)]
struct PreparedInsert {
    id: String,
    data: String,
    document: Value,
}

impl Collection {
    pub(super) fn new(
        schema: Arc<SchemaDefinition>,
        executor: QueryExecutor,
        cache: Option<StatementCache>,
        dates: DateRepresentation,
        database_retry: RetrySetting,
        options: CollectionOptions,
    ) -> Self {
        let table = quote(schema.collection());
        let insert_sql = format!(
            "INSERT INTO {} ({}, {}) VALUES (?, ?)",
            table, ID_FIELD, DATA_COLUMN
        );
        let update_sql = format!(
            "UPDATE {} SET {} = ? WHERE {} = ?",
            table, DATA_COLUMN, ID_FIELD
        );
        Self {
            inner: Arc::new(Inner {
                schema,
                executor,
                cache,
                dates,
                retry: options.retry,
                database_retry,
                validator: options.validator,
                id_generator: options
                    .id_generator
                    .unwrap_or_else(|| Arc::new(UuidGenerator)),
                insert_sql,
                update_sql,
            }),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.schema.collection()
    }

    pub fn schema(&self) -> &SchemaDefinition {
        &self.inner.schema
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        self.inner.executor.metrics()
    }

    /// `None` when the statement cache is disabled for this collection
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.inner.cache.as_ref().map(StatementCache::stats)
    }

    // ==================
    // Reads
    // ==================

    /// Returns the matching documents in the requested order
    pub async fn find(
        &self,
        filter: impl IntoFilter,
        options: &QueryOptions,
    ) -> QueryResult<Vec<Value>> {
        let ctx = self.context("find", options);
        let (filter, base) = self.plan(&ctx, PlanKind::Select, filter, options)?;

        self.executor()
            .run(&ctx, |conn| {
                let plan = self.bind_cursor(conn, PlanKind::Select, &filter, options, &base)?;
                let mut documents =
                    storage::query_documents(conn, plan.sql(), &plan.params, self.schema())?;
                if plan.reverse_rows {
                    documents.reverse();
                }
                documents
                    .into_iter()
                    .map(|doc| plan.projection.apply(doc))
                    .collect()
            })
            .await
    }

    /// First matching document in the requested order
    pub async fn find_one(
        &self,
        filter: impl IntoFilter,
        options: &QueryOptions,
    ) -> QueryResult<Option<Value>> {
        let options = options.clone().limit(1);
        Ok(self.find(filter, &options).await?.into_iter().next())
    }

    pub async fn find_by_id(&self, id: &str, options: &QueryOptions) -> QueryResult<Option<Value>> {
        self.find_one(FilterNode::eq(ID_FIELD, id), options).await
    }

    /// Counts matching documents. `limit`/`skip` cap the count; sort and
    /// cursor are ignored.
    pub async fn count(&self, filter: impl IntoFilter, options: &QueryOptions) -> QueryResult<u64> {
        let ctx = self.context("count", options);
        let (_, plan) = self.plan(&ctx, PlanKind::Count, filter, options)?;

        self.executor()
            .run(&ctx, |conn| {
                storage::query_count(conn, plan.sql(), &plan.params, self.schema())
            })
            .await
    }

    /// Describes the statement an operation of `kind` would run
    pub async fn explain(
        &self,
        kind: PlanKind,
        filter: impl IntoFilter,
        options: &QueryOptions,
    ) -> QueryResult<ExplainPlan> {
        let ctx = self.context("explain", options);
        let (filter, base) = self.plan(&ctx, kind, filter, options)?;

        self.executor()
            .run(&ctx, |conn| {
                let plan = self.bind_cursor(conn, kind, &filter, options, &base)?;
                Ok(ExplainPlan::from_plan(&plan))
            })
            .await
    }

    // ==================
    // Inserts
    // ==================

    /// Inserts one document. A missing id is generated.
    pub async fn insert_one(
        &self,
        document: Value,
        options: &QueryOptions,
    ) -> QueryResult<InsertOneResult> {
        let ctx = self.context("insert_one", options);
        let insert = self
            .executor()
            .prepare(&ctx, || self.prepare_insert(document))?;

        self.executor()
            .run(&ctx, |conn| self.insert_row(conn, &insert))
            .await?;
        self.metrics().add_documents_inserted(1);

        Ok(InsertOneResult {
            inserted_id: insert.id,
            document: insert.document,
        })
    }

    /// Inserts a batch in one transaction.
    ///
    /// Validation and unique-constraint failures are reported per item and
    /// undo only that item. Ordered mode stops at the first such failure;
    /// unordered mode keeps going. Any other failure rolls back the whole
    /// batch.
    pub async fn insert_many(
        &self,
        documents: Vec<Value>,
        ordered: bool,
        options: &QueryOptions,
    ) -> QueryResult<InsertManyResult> {
        let ctx = self.context("insert_many", options);
        let prepared: Vec<QueryResult<PreparedInsert>> = self.executor().prepare(&ctx, || {
            Ok(documents
                .into_iter()
                .map(|doc| self.prepare_insert(doc))
                .collect())
        })?;

        let result = self
            .executor()
            .run(&ctx, |conn| {
                let tx = TransactionGuard::begin(conn, TransactionMode::Immediate)?
                    .with_metrics(self.metrics());
                let mut result = InsertManyResult::default();

                for (index, item) in prepared.iter().enumerate() {
                    let outcome = match item {
                        Ok(insert) => tx
                            .savepoint(ITEM_SAVEPOINT, |conn| self.insert_row(conn, insert))
                            .map(|_| insert.id.clone()),
                        Err(err) => Err(err.clone()),
                    };
                    match outcome {
                        Ok(id) => result.inserted_ids.push(id),
                        Err(err) if err.is_item_level() => {
                            Event::BatchItemFailed.emit(&[
                                ("code", err.code()),
                                ("collection", self.name()),
                                ("index", index.to_string().as_str()),
                            ]);
                            result.errors.push(BatchItemError { index, error: err });
                            if ordered {
                                break;
                            }
                        }
                        Err(err) => return Err(err),
                    }
                }

                result.inserted_count = result.inserted_ids.len();
                tx.commit()?;
                Ok(result)
            })
            .await?;

        self.metrics()
            .add_documents_inserted(result.inserted_count as u64);
        Ok(result)
    }

    // ==================
    // Updates
    // ==================

    /// Updates the first match in sort order
    pub async fn update_one(
        &self,
        filter: impl IntoFilter,
        update: impl IntoUpdate,
        options: &QueryOptions,
    ) -> QueryResult<UpdateResult> {
        let options = options.clone().limit(1);
        self.update("update_one", filter, update, &options).await
    }

    pub async fn update_many(
        &self,
        filter: impl IntoFilter,
        update: impl IntoUpdate,
        options: &QueryOptions,
    ) -> QueryResult<UpdateResult> {
        self.update("update_many", filter, update, options).await
    }

    async fn update(
        &self,
        operation: &str,
        filter: impl IntoFilter,
        update: impl IntoUpdate,
        options: &QueryOptions,
    ) -> QueryResult<UpdateResult> {
        let ctx = self.context(operation, options);
        let (filter, update, base) = self.executor().prepare(&ctx, || {
            let filter = filter.into_filter()?;
            let update = update.into_update()?;
            let plan = self.planner().build(PlanKind::Update, &filter, options, None)?;
            Ok((filter, update, plan))
        })?;

        let result = self
            .executor()
            .run(&ctx, |conn| {
                let tx = TransactionGuard::begin(conn, TransactionMode::Immediate)?
                    .with_metrics(self.metrics());
                let plan = self.bind_cursor(conn, PlanKind::Update, &filter, options, &base)?;
                let documents =
                    storage::query_documents(conn, plan.sql(), &plan.params, self.schema())?;

                let mut result = UpdateResult::default();
                for mut document in documents {
                    result.matched_count += 1;
                    if !self.apply_update(&update, &mut document)? {
                        continue;
                    }
                    let (id, data) = storage::encode_document(&document)?;
                    storage::execute(
                        conn,
                        &self.inner.update_sql,
                        &[SqlValue::Text(data), SqlValue::Text(id)],
                        self.schema(),
                    )?;
                    result.modified_count += 1;
                }

                tx.commit()?;
                Ok(result)
            })
            .await?;

        self.metrics().add_documents_updated(result.modified_count);
        Ok(result)
    }

    // ==================
    // Deletes
    // ==================

    /// Deletes the first match in sort order
    pub async fn delete_one(
        &self,
        filter: impl IntoFilter,
        options: &QueryOptions,
    ) -> QueryResult<DeleteResult> {
        let options = options.clone().limit(1);
        self.delete("delete_one", filter, &options).await
    }

    pub async fn delete_many(
        &self,
        filter: impl IntoFilter,
        options: &QueryOptions,
    ) -> QueryResult<DeleteResult> {
        self.delete("delete_many", filter, options).await
    }

    async fn delete(
        &self,
        operation: &str,
        filter: impl IntoFilter,
        options: &QueryOptions,
    ) -> QueryResult<DeleteResult> {
        let ctx = self.context(operation, options);
        let (filter, base) = self.plan(&ctx, PlanKind::Delete, filter, options)?;

        let deleted_count = self
            .executor()
            .run(&ctx, |conn| {
                let tx = TransactionGuard::begin(conn, TransactionMode::Immediate)?
                    .with_metrics(self.metrics());
                let plan = self.bind_cursor(conn, PlanKind::Delete, &filter, options, &base)?;
                let deleted = storage::execute(conn, plan.sql(), &plan.params, self.schema())?;
                tx.commit()?;
                Ok(deleted)
            })
            .await?;

        self.metrics().add_documents_deleted(deleted_count);
        Ok(DeleteResult { deleted_count })
    }

    // ==================
    // Internals
    // ==================

    fn executor(&self) -> &QueryExecutor {
        &self.inner.executor
    }

    fn planner(&self) -> PlanBuilder<'_> {
        PlanBuilder::new(&self.inner.schema, self.inner.dates).with_cache(self.inner.cache.as_ref())
    }

    fn context<'a>(&'a self, operation: &'a str, options: &'a QueryOptions) -> ExecutionContext<'a> {
        let retry = RetrySetting::resolve(&options.retry, &self.inner.retry, &self.inner.database_retry);
        ExecutionContext::new(self.name(), operation)
            .with_retry(retry)
            .with_signal(options.signal.as_ref())
    }

    /// Translates the filter and builds the boundary-free plan
    fn plan(
        &self,
        ctx: &ExecutionContext<'_>,
        kind: PlanKind,
        filter: impl IntoFilter,
        options: &QueryOptions,
    ) -> QueryResult<(FilterNode, QueryPlan)> {
        self.executor().prepare(ctx, || {
            let filter = filter.into_filter()?;
            let plan = self.planner().build(kind, &filter, options, None)?;
            Ok((filter, plan))
        })
    }

    /// Rebuilds `base` with the keyset predicate when the options carry a
    /// cursor whose boundary document still exists. A missing boundary
    /// falls back to the first page.
    fn bind_cursor<'p>(
        &self,
        conn: &Connection,
        kind: PlanKind,
        filter: &FilterNode,
        options: &QueryOptions,
        base: &'p QueryPlan,
    ) -> QueryResult<Cow<'p, QueryPlan>> {
        let cursor = match &options.cursor {
            Some(cursor) if kind != PlanKind::Count && !options.sort.is_empty() => cursor,
            _ => return Ok(Cow::Borrowed(base)),
        };

        match lookup_boundary(conn, self.schema(), &options.sort, cursor)? {
            Some(boundary) => {
                let plan = self.planner().build(kind, filter, options, Some(&boundary))?;
                Ok(Cow::Owned(plan))
            }
            None => {
                Event::CursorBoundaryMissing.emit(&[
                    ("collection", self.name()),
                    ("id", cursor.document_id()),
                ]);
                Ok(Cow::Borrowed(base))
            }
        }
    }

    fn prepare_insert(&self, document: Value) -> QueryResult<PreparedInsert> {
        let mut body = match document {
            Value::Object(map) => map,
            other => {
                return Err(QueryError::validation(
                    "$",
                    other,
                    "document must be a JSON object",
                ))
            }
        };

        let id = match body.remove(ID_FIELD) {
            None | Some(Value::Null) => self.inner.id_generator.generate(),
            Some(Value::String(id)) if !id.is_empty() => id,
            Some(other) => {
                return Err(QueryError::validation(
                    ID_FIELD,
                    other,
                    "id must be a non-empty string",
                ))
            }
        };

        let mut with_id = Map::new();
        with_id.insert(ID_FIELD.to_string(), Value::String(id.clone()));
        with_id.extend(body);
        let mut document = Value::Object(with_id);

        let schema = self.schema();
        document::apply_defaults(schema, &mut document)?;
        document::stamp(schema, &mut document, self.inner.dates, true)?;
        document::coerce_dates(schema, &mut document, self.inner.dates)?;
        self.validate(&document)?;

        let (_, data) = storage::encode_document(&document)?;
        Ok(PreparedInsert { id, data, document })
    }

    fn insert_row(&self, conn: &Connection, insert: &PreparedInsert) -> QueryResult<u64> {
        storage::execute(
            conn,
            &self.inner.insert_sql,
            &[
                SqlValue::Text(insert.id.clone()),
                SqlValue::Text(insert.data.clone()),
            ],
            self.schema(),
        )
    }

    /// Applies `update` and re-validates. Returns false when nothing changed.
    fn apply_update(&self, update: &UpdateSpec, document: &mut Value) -> QueryResult<bool> {
        if !update.apply(document)? {
            return Ok(false);
        }
        let schema = self.schema();
        document::stamp(schema, document, self.inner.dates, false)?;
        document::coerce_dates(schema, document, self.inner.dates)?;
        self.validate(document)?;
        Ok(true)
    }

    fn validate(&self, document: &Value) -> QueryResult<()> {
        SchemaValidator::new(self.schema()).validate_document(document)?;
        if let Some(validator) = &self.inner.validator {
            validator.validate(document)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name())
            .field("cache", &self.cache_stats())
            .finish()
    }
}
