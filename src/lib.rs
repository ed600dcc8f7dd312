//! aerodoc - A MongoDB-style document query layer over embedded SQLite
//!
//! Documents live as JSON in one table per collection. Filters, sort,
//! paging and projection are translated into a single parameterized SQL
//! statement; declared fields are materialized as indexed generated columns.
//!
//! ```ignore
//! use aerodoc::{Database, CollectionOptions, QueryOptions, SchemaDefinition, SchemaField, SqlType};
//! use serde_json::json;
//!
//! let db = Database::open_in_memory()?;
//! let schema = SchemaDefinition::builder("users")
//!     .field(SchemaField::new("age", SqlType::Integer).indexed())
//!     .build()?;
//! let users = db.collection(schema, CollectionOptions::default())?;
//! users.insert_one(json!({"name": "Alice", "age": 30}), &QueryOptions::new()).await?;
//! let adults = users
//!     .find(json!({"age": {"$gte": 18}}), &QueryOptions::new().sort_desc("age").limit(10))
//!     .await?;
//! ```

pub mod cache;
pub mod config;
pub mod db;
pub mod document;
pub mod error;
pub mod executor;
pub mod observability;
pub mod planner;
pub mod schema;
pub mod update;

pub use config::{DatabaseConfig, DateRepresentation, StatementCacheConfig};
pub use db::{Collection, CollectionOptions, Database, IdGenerator, UuidGenerator};
pub use error::{QueryError, QueryResult};
pub use executor::{
    CancellationSignal, DeleteResult, InsertManyResult, InsertOneResult, RetryOptions,
    RetrySetting, UpdateResult,
};
pub use planner::{Cursor, ExplainPlan, FilterNode, PlanKind, QueryOptions, SearchSpec};
pub use schema::{CompoundIndex, SchemaDefinition, SchemaField, SqlType, TimestampPolicy};
pub use update::UpdateSpec;
