//! Table and index DDL for a collection
//!
//! Layout: `"<collection>"(id TEXT PRIMARY KEY, data TEXT NOT NULL, idx_* ...)`.
//! `data` holds the document without its id. Each materialized field adds a
//! virtual generated column extracted from `data` and a B-tree index over it.

use super::paths::{quote, ID_FIELD};
use super::types::{SchemaDefinition, SchemaField};
use crate::config::DateRepresentation;
use crate::error::QueryResult;

/// Name of the document column
pub const DATA_COLUMN: &str = "data";

/// Statements that create the table and its indexes. Idempotent.
pub fn create_statements(
    schema: &SchemaDefinition,
    dates: DateRepresentation,
) -> QueryResult<Vec<String>> {
    let table = quote(schema.collection());
    let mut columns = vec![
        format!("{} TEXT PRIMARY KEY", ID_FIELD),
        format!("{} TEXT NOT NULL", DATA_COLUMN),
    ];
    for field in schema.materialized_fields() {
        columns.push(generated_column(field, dates));
    }

    let mut statements = vec![format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        table,
        columns.join(", ")
    )];

    for field in schema.materialized_fields() {
        statements.push(format!(
            "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
            if field.unique { "UNIQUE " } else { "" },
            quote(&schema.index_name(field)),
            table,
            quote(&field.column_name())
        ));
    }

    for index in schema.compound_indexes() {
        let mut members = Vec::with_capacity(index.fields.len());
        for path in &index.fields {
            members.push(index_member(schema, path)?);
        }
        statements.push(format!(
            "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
            if index.unique { "UNIQUE " } else { "" },
            quote(&schema.compound_index_name(index)),
            table,
            members.join(", ")
        ));
    }

    Ok(statements)
}

fn generated_column(field: &SchemaField, dates: DateRepresentation) -> String {
    format!(
        "{} {} GENERATED ALWAYS AS (json_extract({}, '{}')) VIRTUAL{}",
        quote(&field.column_name()),
        field.sql_type.column_type(dates),
        DATA_COLUMN,
        field.json_path(),
        if field.nullable { "" } else { " NOT NULL" }
    )
}

/// Generated column when materialized, otherwise an expression index member
fn index_member(schema: &SchemaDefinition, path: &str) -> QueryResult<String> {
    if path == ID_FIELD {
        return Ok(ID_FIELD.to_string());
    }
    if let Some(field) = schema.field_for_path(path) {
        if field.is_materialized() {
            return Ok(quote(&field.column_name()));
        }
        return Ok(format!("json_extract({}, '{}')", DATA_COLUMN, field.json_path()));
    }
    Ok(format!(
        "json_extract({}, '{}')",
        DATA_COLUMN,
        super::paths::to_json_path(path)?
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CompoundIndex, SqlType};

    fn schema() -> SchemaDefinition {
        SchemaDefinition::builder("users")
            .field(SchemaField::new("email", SqlType::Text).unique().required())
            .field(SchemaField::new("age", SqlType::Integer).indexed())
            .field(SchemaField::new("joined", SqlType::Date).indexed())
            .field(SchemaField::new("nick", SqlType::Text))
            .compound_index(CompoundIndex::new("by_age_nick", &["age", "nick"]).unique())
            .build()
            .unwrap()
    }

    #[test]
    fn test_table_layout() {
        let statements = create_statements(&schema(), DateRepresentation::Iso8601).unwrap();
        let table = &statements[0];
        assert!(table.starts_with("CREATE TABLE IF NOT EXISTS \"users\" (id TEXT PRIMARY KEY, data TEXT NOT NULL"));
        assert!(table.contains(
            "\"idx_email\" TEXT GENERATED ALWAYS AS (json_extract(data, '$.email')) VIRTUAL NOT NULL"
        ));
        assert!(table.contains("\"idx_age\" INTEGER GENERATED ALWAYS AS"));
        assert!(table.contains("\"idx_joined\" TEXT GENERATED"));
        assert!(!table.contains("idx_nick"));
    }

    #[test]
    fn test_unix_millis_dates_are_integer_columns() {
        let statements = create_statements(&schema(), DateRepresentation::UnixMillis).unwrap();
        assert!(statements[0].contains("\"idx_joined\" INTEGER GENERATED"));
    }

    #[test]
    fn test_indexes() {
        let statements = create_statements(&schema(), DateRepresentation::Iso8601).unwrap();
        assert!(statements.contains(
            &"CREATE UNIQUE INDEX IF NOT EXISTS \"users_idx_email\" ON \"users\" (\"idx_email\")"
                .to_string()
        ));
        assert!(statements.contains(
            &"CREATE INDEX IF NOT EXISTS \"users_idx_age\" ON \"users\" (\"idx_age\")".to_string()
        ));
        assert!(statements.contains(
            &"CREATE UNIQUE INDEX IF NOT EXISTS \"users_by_age_nick\" ON \"users\" (\"idx_age\", json_extract(data, '$.nick'))"
                .to_string()
        ));
    }
}
