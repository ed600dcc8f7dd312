//! Document validation
//!
//! Validation runs before any statement reaches storage, so a rejected
//! document never leaves partial side effects. The built-in
//! `SchemaValidator` checks declared field types and nullability; extra
//! validators plug in through `DocumentValidator`.

use serde_json::Value;

use super::types::{SchemaDefinition, SchemaField, SqlType};
use crate::document;
use crate::error::{QueryError, QueryResult};

/// Validation seam. Receives the full document (id included).
pub trait DocumentValidator: Send + Sync {
    fn validate(&self, document: &Value) -> QueryResult<()>;
}

impl<F> DocumentValidator for F
where
    F: Fn(&Value) -> QueryResult<()> + Send + Sync,
{
    fn validate(&self, document: &Value) -> QueryResult<()> {
        self(document)
    }
}

/// Validator derived from the declared fields of a schema.
///
/// Reports the first violation in declaration order.
pub struct SchemaValidator<'a> {
    schema: &'a SchemaDefinition,
}

impl<'a> SchemaValidator<'a> {
    pub fn new(schema: &'a SchemaDefinition) -> Self {
        Self { schema }
    }

    /// Runs the built-in checks and then the schema's own validator
    pub fn validate_document(&self, document: &Value) -> QueryResult<()> {
        if !document.is_object() {
            return Err(QueryError::validation(
                "$",
                document.clone(),
                "document must be a JSON object",
            ));
        }

        for field in self.schema.fields() {
            let value = document::get_path(document, field.json_path());
            self.validate_field(field, value)?;
        }

        if let Some(custom) = self.schema.validator() {
            custom.validate(document)?;
        }
        Ok(())
    }

    fn validate_field(&self, field: &SchemaField, value: Option<&Value>) -> QueryResult<()> {
        let value = match value {
            None | Some(Value::Null) => {
                if field.nullable {
                    return Ok(());
                }
                return Err(QueryError::validation(
                    &field.name,
                    Value::Null,
                    "field is not nullable",
                ));
            }
            Some(v) => v,
        };

        let ok = match field.sql_type {
            SqlType::Text => value.is_string(),
            SqlType::Integer => value.is_i64() || value.is_u64(),
            SqlType::Real => value.is_number(),
            SqlType::Boolean => value.is_boolean(),
            // Already coerced to the configured representation
            SqlType::Date => value.is_string() || value.is_i64(),
            SqlType::Json => true,
        };

        if ok {
            Ok(())
        } else {
            Err(QueryError::validation(
                &field.name,
                value.clone(),
                format!(
                    "expected {}, got {}",
                    field.sql_type.type_name(),
                    json_type_name(value)
                ),
            ))
        }
    }
}

impl DocumentValidator for SchemaDefinition {
    fn validate(&self, document: &Value) -> QueryResult<()> {
        SchemaValidator::new(self).validate_document(document)
    }
}

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "real",
        Value::String(_) => "text",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
