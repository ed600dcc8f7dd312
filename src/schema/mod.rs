//! Collection schemas for aerodoc
//!
//! A schema declares which document fields are typed, which are materialized
//! as indexed generated columns, and how the collection's table is laid out.
//!
//! # Design Principles
//!
//! - Built once per collection, immutable afterwards
//! - Generated column names are a pure function of the field name
//! - Unknown fields are allowed (flexible schema), declared fields are checked
//! - Validation happens before any statement reaches storage

pub mod ddl;
mod loader;
pub mod paths;
mod types;
mod validator;

pub use loader::SchemaLoader;
pub use types::{
    CompoundIndex, SchemaBuilder, SchemaDefinition, SchemaField, SchemaSpec, SqlType,
    TimestampPolicy,
};
pub use validator::{DocumentValidator, SchemaValidator};
