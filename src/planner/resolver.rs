//! Field resolution: filter path → SQL access expression
//!
//! Pure and uncached. A path that names an indexed field (by name or by its
//! declared JSON path) addresses the generated column; everything else falls
//! back to `json_extract` over the document column. Unknown paths are not an
//! error, they simply evaluate to NULL.

use crate::error::QueryResult;
use crate::schema::ddl::DATA_COLUMN;
use crate::schema::paths::{self, quote, ID_FIELD};
use crate::schema::{SchemaDefinition, SchemaField, SqlType};

/// How a path is read in SQL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldAccess {
    /// The primary key column
    DocumentId,
    /// Materialized column of an indexed field
    GeneratedColumn(String),
    /// `json_extract(<column>, '<path>')`
    JsonExtract { column: String, path: String },
    /// Current array element inside `$elemMatch`
    ElementValue { alias: String },
}

impl FieldAccess {
    /// Scalar SQL expression
    pub fn sql(&self) -> String {
        match self {
            FieldAccess::DocumentId => ID_FIELD.to_string(),
            FieldAccess::GeneratedColumn(name) => quote(name),
            FieldAccess::JsonExtract { column, path } => {
                format!("json_extract({}, '{}')", column, path)
            }
            FieldAccess::ElementValue { alias } => format!("{}.value", alias),
        }
    }

    /// Argument list addressing the value as JSON (for `json_each`,
    /// `json_array_length`)
    pub fn json_source(&self) -> String {
        match self {
            FieldAccess::JsonExtract { column, path } => format!("{}, '{}'", column, path),
            other => other.sql(),
        }
    }

    /// Expression yielding the JSON type name (`'array'`, `'object'`, …)
    pub fn json_type(&self) -> String {
        match self {
            FieldAccess::ElementValue { alias } => format!("{}.type", alias),
            other => format!("json_type({})", other.json_source()),
        }
    }
}

/// A resolved path with its declared field, if any
#[derive(Debug, Clone)]
pub struct ResolvedField<'s> {
    pub access: FieldAccess,
    pub field: Option<&'s SchemaField>,
}

impl ResolvedField<'_> {
    /// Declared type, `None` for undeclared paths
    pub fn sql_type(&self) -> Option<SqlType> {
        self.field.map(|f| f.sql_type)
    }

    /// Name used in error messages
    pub fn display_name(&self, path: &str) -> String {
        self.field.map_or_else(|| path.to_string(), |f| f.name.clone())
    }
}

/// Resolves a document-level path
pub fn resolve<'s>(schema: &'s SchemaDefinition, path: &str) -> QueryResult<ResolvedField<'s>> {
    if path == ID_FIELD {
        return Ok(ResolvedField {
            access: FieldAccess::DocumentId,
            field: None,
        });
    }

    let json_path = paths::to_json_path(path)?;
    let field = schema.field_for_path(path);
    let access = match field {
        Some(f) if f.is_materialized() => FieldAccess::GeneratedColumn(f.column_name()),
        Some(f) => FieldAccess::JsonExtract {
            column: DATA_COLUMN.to_string(),
            path: f.json_path().to_string(),
        },
        None => FieldAccess::JsonExtract {
            column: DATA_COLUMN.to_string(),
            path: json_path,
        },
    };

    Ok(ResolvedField { access, field })
}

/// Resolves a path relative to the current `$elemMatch` element.
///
/// Element fields are never declared, so no type information is attached.
pub fn resolve_in_element(alias: &str, path: &str) -> QueryResult<ResolvedField<'static>> {
    let json_path = paths::to_json_path(path)?;
    let access = if json_path == "$" {
        FieldAccess::ElementValue {
            alias: alias.to_string(),
        }
    } else {
        FieldAccess::JsonExtract {
            column: format!("{}.value", alias),
            path: json_path,
        }
    };
    Ok(ResolvedField {
        access,
        field: None,
    })
}
