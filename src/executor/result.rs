//! Result types for collection operations

use serde::Serialize;
use serde_json::Value;

use crate::error::QueryError;

/// Result of `insert_one`
#[derive(Debug, Clone, PartialEq)]
pub struct InsertOneResult {
    pub inserted_id: String,
    /// The stored document, with id, defaults and timestamps applied
    pub document: Value,
}

/// A batch item that was rejected
#[derive(Debug, Clone)]
pub struct BatchItemError {
    /// Position of the item in the input
    pub index: usize,
    pub error: QueryError,
}

/// Result of `insert_many`
#[derive(Debug, Clone, Default)]
pub struct InsertManyResult {
    /// Ids of the inserted documents, in input order
    pub inserted_ids: Vec<String>,
    pub inserted_count: usize,
    /// Rejected items. Ordered mode reports at most one.
    pub errors: Vec<BatchItemError>,
}

impl InsertManyResult {
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Result of `update_one` / `update_many`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResult {
    /// Documents selected by the filter
    pub matched_count: u64,
    /// Documents whose content changed
    pub modified_count: u64,
}

/// Result of `delete_one` / `delete_many`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResult {
    pub deleted_count: u64,
}
