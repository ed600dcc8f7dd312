//! SQLite binding: error classification, row decoding and statement helpers
//!
//! Every `rusqlite::Error` that leaves this crate passes through
//! `classify_error`, which is the only place storage failures are mapped onto
//! the `QueryError` taxonomy.

use rusqlite::types::Value as SqlValue;
use rusqlite::{ffi, params_from_iter, Connection, ErrorCode};
use serde_json::{Map, Value};

use crate::error::{QueryError, QueryResult};
use crate::schema::paths::ID_FIELD;
use crate::schema::SchemaDefinition;

/// Maps a storage error onto the error taxonomy.
///
/// `schema` is used to turn generated column and index names back into
/// field names.
pub fn classify_error(err: rusqlite::Error, schema: Option<&SchemaDefinition>) -> QueryError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, message) => {
            let message = message.clone().unwrap_or_else(|| failure.to_string());
            match failure.code {
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                    QueryError::TransientStorage(message)
                }
                ErrorCode::ConstraintViolation => match failure.extended_code {
                    ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                        QueryError::unique(constraint_field(&message, schema))
                    }
                    ffi::SQLITE_CONSTRAINT_NOTNULL => QueryError::validation(
                        constraint_field(&message, schema),
                        Value::Null,
                        "must not be null",
                    ),
                    _ => QueryError::Storage(message),
                },
                _ => QueryError::Storage(message),
            }
        }
        _ => QueryError::Storage(err.to_string()),
    }
}

/// Recovers the field name from a constraint message.
///
/// SQLite reports column constraints as `... failed: users.idx_email` (comma
/// separated for multi-column indexes) and expression indexes as
/// `... failed: index 'users_by_city'`.
fn constraint_field(message: &str, schema: Option<&SchemaDefinition>) -> String {
    let detail = message
        .split_once(": ")
        .map_or(message, |(_, rest)| rest)
        .trim();

    let names: Vec<&str> = match detail.strip_prefix("index '") {
        Some(rest) => vec![rest.trim_end_matches('\'')],
        None => detail
            .split(", ")
            .map(|column| column.split_once('.').map_or(column, |(_, c)| c))
            .collect(),
    };

    names
        .iter()
        .map(|name| {
            schema
                .and_then(|s| s.field_for_storage_name(name))
                .unwrap_or_else(|| name.to_string())
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Rebuilds a document from its stored `id` and `data` columns
pub fn decode_document(id: String, data: &str) -> QueryResult<Value> {
    let body: Value = serde_json::from_str(data)?;
    let Value::Object(body) = body else {
        return Err(QueryError::Serialization(format!(
            "stored document '{}' is not a JSON object",
            id
        )));
    };
    let mut document = Map::with_capacity(body.len() + 1);
    document.insert(ID_FIELD.to_string(), Value::String(id));
    document.extend(body);
    Ok(Value::Object(document))
}

/// Splits a document into its id and the `data` column text (without the id)
pub fn encode_document(document: &Value) -> QueryResult<(String, String)> {
    let map = document
        .as_object()
        .ok_or_else(|| QueryError::Serialization("document must be a JSON object".into()))?;
    let id = match map.get(ID_FIELD) {
        Some(Value::String(id)) => id.clone(),
        _ => {
            return Err(QueryError::Serialization(
                "document is missing a string id".into(),
            ))
        }
    };
    let mut body = map.clone();
    body.remove(ID_FIELD);
    Ok((id, serde_json::to_string(&Value::Object(body))?))
}

/// Runs a row-returning statement that yields `(id, data)` pairs
pub fn query_documents(
    conn: &Connection,
    sql: &str,
    params: &[SqlValue],
    schema: &SchemaDefinition,
) -> QueryResult<Vec<Value>> {
    let classify = |e| classify_error(e, Some(schema));
    let mut stmt = conn.prepare_cached(sql).map_err(classify)?;
    let rows = stmt
        .query_map(params_from_iter(params.iter()), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })
        .map_err(classify)?;

    let mut documents = Vec::new();
    for row in rows {
        let (id, data) = row.map_err(classify)?;
        documents.push(decode_document(id, &data)?);
    }
    Ok(documents)
}

/// Runs a single-value `COUNT(*)` statement
pub fn query_count(
    conn: &Connection,
    sql: &str,
    params: &[SqlValue],
    schema: &SchemaDefinition,
) -> QueryResult<u64> {
    let count: i64 = conn
        .prepare_cached(sql)
        .and_then(|mut stmt| stmt.query_row(params_from_iter(params.iter()), |row| row.get(0)))
        .map_err(|e| classify_error(e, Some(schema)))?;
    Ok(u64::try_from(count).unwrap_or(0))
}

/// Runs a write statement, returning the number of changed rows
pub fn execute(
    conn: &Connection,
    sql: &str,
    params: &[SqlValue],
    schema: &SchemaDefinition,
) -> QueryResult<u64> {
    let changed = conn
        .prepare_cached(sql)
        .and_then(|mut stmt| stmt.execute(params_from_iter(params.iter())))
        .map_err(|e| classify_error(e, Some(schema)))?;
    Ok(changed as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DateRepresentation;
    use crate::schema::{ddl, CompoundIndex, SchemaField, SqlType};
    use serde_json::json;

    fn schema() -> SchemaDefinition {
        SchemaDefinition::builder("users")
            .field(SchemaField::new("email", SqlType::Text).unique())
            .field(SchemaField::new("handle", SqlType::Text).indexed().required())
            .field(SchemaField::new("city", SqlType::Text))
            .compound_index(CompoundIndex::new("by_city", &["city", "handle"]).unique())
            .build()
            .unwrap()
    }

    fn setup() -> (Connection, SchemaDefinition) {
        let schema = schema();
        let conn = Connection::open_in_memory().unwrap();
        for stmt in ddl::create_statements(&schema, DateRepresentation::Iso8601).unwrap() {
            conn.execute(&stmt, []).unwrap();
        }
        (conn, schema)
    }

    fn insert(conn: &Connection, schema: &SchemaDefinition, doc: Value) -> QueryResult<u64> {
        let (id, data) = encode_document(&doc)?;
        execute(
            conn,
            "INSERT INTO \"users\" (id, data) VALUES (?, ?)",
            &[SqlValue::Text(id), SqlValue::Text(data)],
            schema,
        )
    }

    #[test]
    fn test_unique_violation_names_field() {
        let (conn, schema) = setup();
        insert(&conn, &schema, json!({"id": "1", "email": "a@x", "handle": "a"})).unwrap();
        let err = insert(&conn, &schema, json!({"id": "2", "email": "a@x", "handle": "b"}))
            .unwrap_err();
        assert!(matches!(err, QueryError::UniqueConstraint { ref field } if field == "email"));
    }

    #[test]
    fn test_duplicate_id_is_unique_violation() {
        let (conn, schema) = setup();
        insert(&conn, &schema, json!({"id": "1", "email": "a@x", "handle": "a"})).unwrap();
        let err = insert(&conn, &schema, json!({"id": "1", "email": "b@x", "handle": "b"}))
            .unwrap_err();
        assert!(matches!(err, QueryError::UniqueConstraint { ref field } if field == "id"));
    }

    #[test]
    fn test_not_null_violation_is_validation() {
        let (conn, schema) = setup();
        let err = insert(&conn, &schema, json!({"id": "1", "email": "a@x"})).unwrap_err();
        match err {
            QueryError::Validation { field, .. } => assert_eq!(field, "handle"),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_constraint_message_parsing() {
        let schema = schema();
        assert_eq!(
            constraint_field("UNIQUE constraint failed: users.idx_email", Some(&schema)),
            "email"
        );
        assert_eq!(
            constraint_field("UNIQUE constraint failed: index 'users_by_city'", Some(&schema)),
            "city,handle"
        );
        assert_eq!(
            constraint_field("UNIQUE constraint failed: users.idx_a, users.idx_b", None),
            "idx_a,idx_b"
        );
    }

    #[test]
    fn test_busy_is_transient() {
        let err = rusqlite::Error::SqliteFailure(
            ffi::Error::new(ffi::SQLITE_BUSY),
            Some("database is locked".into()),
        );
        assert!(classify_error(err, None).is_retryable());

        let err = rusqlite::Error::SqliteFailure(ffi::Error::new(ffi::SQLITE_IOERR), None);
        assert_eq!(classify_error(err, None).code(), "AERO_STORAGE_FAILED");
    }

    #[test]
    fn test_document_encoding() {
        let (id, data) = encode_document(&json!({"id": "7", "name": "Ann"})).unwrap();
        assert_eq!(id, "7");
        assert_eq!(data, r#"{"name":"Ann"}"#);

        let doc = decode_document(id, &data).unwrap();
        assert_eq!(doc, json!({"id": "7", "name": "Ann"}));

        assert!(encode_document(&json!({"name": "no id"})).is_err());
        assert!(decode_document("x".into(), "[1]").is_err());
    }
}
