//! Collection schema types
//!
//! A `SchemaDefinition` is built once per collection and is immutable
//! afterwards. Declared fields drive three things:
//! - which paths are materialized as generated columns (and indexed)
//! - which operators are legal on a path (ordering needs an orderable type)
//! - how operands are coerced before binding (booleans, dates)

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::paths::{self, ID_FIELD};
use super::validator::DocumentValidator;
use crate::config::DateRepresentation;
use crate::error::{QueryError, QueryResult};

/// Declared storage type of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlType {
    Text,
    Integer,
    Real,
    Boolean,
    Date,
    Json,
}

impl SqlType {
    /// Returns the type name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            SqlType::Text => "text",
            SqlType::Integer => "integer",
            SqlType::Real => "real",
            SqlType::Boolean => "boolean",
            SqlType::Date => "date",
            SqlType::Json => "json",
        }
    }

    /// Whether `$gt`/`$gte`/`$lt`/`$lte` are meaningful on this type
    pub fn is_orderable(&self) -> bool {
        matches!(self, SqlType::Integer | SqlType::Real | SqlType::Date)
    }

    /// Column affinity of the generated column
    pub fn column_type(&self, dates: DateRepresentation) -> &'static str {
        match self {
            SqlType::Text | SqlType::Json => "TEXT",
            SqlType::Integer | SqlType::Boolean => "INTEGER",
            SqlType::Real => "REAL",
            SqlType::Date => match dates {
                DateRepresentation::Iso8601 => "TEXT",
                DateRepresentation::UnixMillis => "INTEGER",
            },
        }
    }
}

/// Declared field of a collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaField {
    /// Dotted field name as used in filters
    pub name: String,
    /// JSON path inside the document; `$.<name>` when omitted
    #[serde(default)]
    pub path: String,
    pub sql_type: SqlType,
    #[serde(default)]
    pub indexed: bool,
    /// Implies `indexed`
    #[serde(default)]
    pub unique: bool,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    /// Applied on insert when the field is absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

fn default_nullable() -> bool {
    true
}

impl SchemaField {
    /// Nullable, unindexed field
    pub fn new(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            path: String::new(),
            sql_type,
            indexed: false,
            unique: false,
            nullable: true,
            default: None,
        }
    }

    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self.indexed = true;
        self
    }

    /// Marks the field non-nullable
    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Stores the field at an explicit JSON path
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    /// JSON path of the field (normalized at build time)
    pub fn json_path(&self) -> &str {
        &self.path
    }

    /// Generated column name, a pure function of the field name
    pub fn column_name(&self) -> String {
        format!("idx_{}", self.name.replace('.', "_"))
    }

    /// Whether the field is backed by a generated column
    pub fn is_materialized(&self) -> bool {
        self.indexed || self.unique
    }
}

/// Multi-field index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompoundIndex {
    pub name: String,
    pub fields: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

impl CompoundIndex {
    pub fn new(name: impl Into<String>, fields: &[&str]) -> Self {
        Self {
            name: name.into(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Automatic `createdAt` / `updatedAt` maintenance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimestampPolicy {
    pub created_at: bool,
    pub updated_at: bool,
}

impl TimestampPolicy {
    pub const CREATED_AT: &'static str = "createdAt";
    pub const UPDATED_AT: &'static str = "updatedAt";

    /// Both timestamps on
    pub fn all() -> Self {
        Self {
            created_at: true,
            updated_at: true,
        }
    }

    pub fn none() -> Self {
        Self::default()
    }
}

impl<'de> Deserialize<'de> for TimestampPolicy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Flags {
            #[serde(default)]
            created_at: bool,
            #[serde(default)]
            updated_at: bool,
        }

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Flag(bool),
            Flags(Flags),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Flag(true) => TimestampPolicy::all(),
            Repr::Flag(false) => TimestampPolicy::none(),
            Repr::Flags(flags) => TimestampPolicy {
                created_at: flags.created_at,
                updated_at: flags.updated_at,
            },
        })
    }
}

/// Serializable form of a schema, as found in schema files
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaSpec {
    pub collection: String,
    #[serde(default)]
    pub fields: Vec<SchemaField>,
    #[serde(default)]
    pub compound_indexes: Vec<CompoundIndex>,
    #[serde(default)]
    pub timestamps: TimestampPolicy,
}

/// Immutable schema of one collection
#[derive(Clone)]
pub struct SchemaDefinition {
    collection: String,
    fields: Vec<SchemaField>,
    compound_indexes: Vec<CompoundIndex>,
    timestamps: TimestampPolicy,
    validator: Option<Arc<dyn DocumentValidator>>,
}

impl fmt::Debug for SchemaDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaDefinition")
            .field("collection", &self.collection)
            .field("fields", &self.fields)
            .field("compound_indexes", &self.compound_indexes)
            .field("timestamps", &self.timestamps)
            .field("validator", &self.validator.is_some())
            .finish()
    }
}

impl SchemaDefinition {
    /// Starts a builder for `collection`
    pub fn builder(collection: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder {
            spec: SchemaSpec {
                collection: collection.into(),
                fields: Vec::new(),
                compound_indexes: Vec::new(),
                timestamps: TimestampPolicy::none(),
            },
            validator: None,
        }
    }

    /// Builds a schema from its serializable form
    pub fn from_spec(spec: SchemaSpec) -> QueryResult<Self> {
        SchemaBuilder {
            spec,
            validator: None,
        }
        .build()
    }

    /// Table name
    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn fields(&self) -> &[SchemaField] {
        &self.fields
    }

    pub fn compound_indexes(&self) -> &[CompoundIndex] {
        &self.compound_indexes
    }

    pub fn timestamps(&self) -> TimestampPolicy {
        self.timestamps
    }

    pub fn validator(&self) -> Option<&Arc<dyn DocumentValidator>> {
        self.validator.as_ref()
    }

    /// Looks up a field by name
    pub fn field(&self, name: &str) -> Option<&SchemaField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Looks up the field a filter path refers to, by name or declared JSON path
    pub fn field_for_path(&self, path: &str) -> Option<&SchemaField> {
        if let Some(field) = self.field(path) {
            return Some(field);
        }
        let json_path = paths::to_json_path(path).ok()?;
        self.fields.iter().find(|f| f.path == json_path)
    }

    /// Maps a generated column or index name back to a field name
    pub fn field_for_storage_name(&self, name: &str) -> Option<String> {
        if name == ID_FIELD {
            return Some(ID_FIELD.to_string());
        }
        if let Some(field) = self
            .fields
            .iter()
            .find(|f| f.column_name() == name || self.index_name(f) == name)
        {
            return Some(field.name.clone());
        }
        self.compound_indexes
            .iter()
            .find(|c| self.compound_index_name(c) == name)
            .map(|c| c.fields.join(","))
    }

    /// Fields backed by a generated column
    pub fn materialized_fields(&self) -> impl Iterator<Item = &SchemaField> {
        self.fields.iter().filter(|f| f.is_materialized())
    }

    /// Index name of a single-field index
    pub fn index_name(&self, field: &SchemaField) -> String {
        format!("{}_{}", self.collection, field.column_name())
    }

    /// Index name of a compound index
    pub fn compound_index_name(&self, index: &CompoundIndex) -> String {
        format!("{}_{}", self.collection, index.name)
    }

    /// Serializable form (validator excluded)
    pub fn to_spec(&self) -> SchemaSpec {
        SchemaSpec {
            collection: self.collection.clone(),
            fields: self.fields.clone(),
            compound_indexes: self.compound_indexes.clone(),
            timestamps: self.timestamps,
        }
    }
}

/// Builder for `SchemaDefinition`
pub struct SchemaBuilder {
    spec: SchemaSpec,
    validator: Option<Arc<dyn DocumentValidator>>,
}

impl SchemaBuilder {
    pub fn field(mut self, field: SchemaField) -> Self {
        self.spec.fields.push(field);
        self
    }

    pub fn compound_index(mut self, index: CompoundIndex) -> Self {
        self.spec.compound_indexes.push(index);
        self
    }

    pub fn timestamps(mut self, policy: TimestampPolicy) -> Self {
        self.spec.timestamps = policy;
        self
    }

    /// Validator run after the built-in type checks
    pub fn validator(mut self, validator: Arc<dyn DocumentValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Normalizes paths, adds timestamp fields and checks the definition
    pub fn build(self) -> QueryResult<SchemaDefinition> {
        let SchemaSpec {
            collection,
            mut fields,
            compound_indexes,
            timestamps,
        } = self.spec;

        paths::validate_identifier(&collection)
            .map_err(|_| QueryError::config(format!("invalid collection name '{}'", collection)))?;

        for name in [
            (timestamps.created_at, TimestampPolicy::CREATED_AT),
            (timestamps.updated_at, TimestampPolicy::UPDATED_AT),
        ]
        .into_iter()
        .filter_map(|(enabled, name)| enabled.then_some(name))
        {
            if !fields.iter().any(|f| f.name == name) {
                fields.push(SchemaField::new(name, SqlType::Date));
            }
        }

        let mut seen = HashSet::new();
        let mut columns = HashSet::new();
        for field in &mut fields {
            if field.name == ID_FIELD {
                return Err(QueryError::config("'id' is reserved and cannot be declared"));
            }
            if !seen.insert(field.name.clone()) {
                return Err(QueryError::config(format!(
                    "field '{}' declared twice",
                    field.name
                )));
            }
            if !columns.insert(field.column_name()) {
                return Err(QueryError::config(format!(
                    "field '{}' collides with another field's column name",
                    field.name
                )));
            }
            for segment in field.name.split('.') {
                paths::validate_identifier(segment).map_err(|_| {
                    QueryError::config(format!("invalid field name '{}'", field.name))
                })?;
            }

            let source = if field.path.is_empty() {
                field.name.clone()
            } else {
                field.path.clone()
            };
            field.path = paths::to_json_path(&source)
                .map_err(|e| QueryError::config(format!("field '{}': {}", field.name, e)))?;

            if field.unique {
                field.indexed = true;
            }
        }

        let mut index_names = HashSet::new();
        for index in &compound_indexes {
            paths::validate_identifier(&index.name).map_err(|_| {
                QueryError::config(format!("invalid index name '{}'", index.name))
            })?;
            if !index_names.insert(index.name.clone()) {
                return Err(QueryError::config(format!(
                    "index '{}' declared twice",
                    index.name
                )));
            }
            if index.fields.is_empty() {
                return Err(QueryError::config(format!(
                    "index '{}' has no fields",
                    index.name
                )));
            }
            for path in &index.fields {
                if path != ID_FIELD {
                    paths::to_json_path(path).map_err(|e| {
                        QueryError::config(format!("index '{}': {}", index.name, e))
                    })?;
                }
            }
        }

        Ok(SchemaDefinition {
            collection,
            fields,
            compound_indexes,
            timestamps,
            validator: self.validator,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn users() -> SchemaDefinition {
        SchemaDefinition::builder("users")
            .field(SchemaField::new("email", SqlType::Text).unique())
            .field(SchemaField::new("age", SqlType::Integer).indexed())
            .field(SchemaField::new("profile.city", SqlType::Text).indexed())
            .field(SchemaField::new("nick", SqlType::Text).with_path("$.meta.nickname"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_paths_default_from_name() {
        let schema = users();
        assert_eq!(schema.field("email").unwrap().json_path(), "$.email");
        assert_eq!(
            schema.field("profile.city").unwrap().json_path(),
            "$.profile.city"
        );
        assert_eq!(schema.field("nick").unwrap().json_path(), "$.meta.nickname");
    }

    #[test]
    fn test_unique_implies_indexed() {
        let schema = users();
        assert!(schema.field("email").unwrap().indexed);
        assert_eq!(schema.materialized_fields().count(), 3);
    }

    #[test]
    fn test_column_names_are_deterministic() {
        let schema = users();
        assert_eq!(schema.field("profile.city").unwrap().column_name(), "idx_profile_city");
        assert_eq!(
            schema.field_for_storage_name("idx_email"),
            Some("email".to_string())
        );
        assert_eq!(
            schema.field_for_storage_name("users_idx_age"),
            Some("age".to_string())
        );
    }

    #[test]
    fn test_lookup_by_declared_path() {
        let schema = users();
        assert_eq!(schema.field_for_path("meta.nickname").unwrap().name, "nick");
        assert_eq!(schema.field_for_path("nick").unwrap().name, "nick");
        assert!(schema.field_for_path("unknown").is_none());
    }

    #[test]
    fn test_timestamps_add_date_fields() {
        let schema = SchemaDefinition::builder("events")
            .timestamps(TimestampPolicy::all())
            .build()
            .unwrap();
        assert_eq!(schema.field("createdAt").unwrap().sql_type, SqlType::Date);
        assert_eq!(schema.field("updatedAt").unwrap().sql_type, SqlType::Date);
    }

    #[test]
    fn test_invalid_definitions_rejected() {
        let reserved = SchemaDefinition::builder("users")
            .field(SchemaField::new("id", SqlType::Text))
            .build();
        assert!(reserved.is_err());

        let duplicate = SchemaDefinition::builder("users")
            .field(SchemaField::new("a", SqlType::Text))
            .field(SchemaField::new("a", SqlType::Integer))
            .build();
        assert!(duplicate.is_err());

        let bad_table = SchemaDefinition::builder("users; DROP").build();
        assert!(bad_table.is_err());

        let bad_path = SchemaDefinition::builder("users")
            .field(SchemaField::new("a", SqlType::Text).with_path("$.a'b"))
            .build();
        assert!(bad_path.is_err());
    }

    #[test]
    fn test_spec_deserialization() {
        let spec: SchemaSpec = serde_json::from_value(json!({
            "collection": "orders",
            "fields": [
                { "name": "total", "sqlType": "real", "indexed": true },
                { "name": "status", "sqlType": "text", "nullable": false, "default": "new" }
            ],
            "compoundIndexes": [{ "name": "by_status_total", "fields": ["status", "total"] }],
            "timestamps": true
        }))
        .unwrap();

        let schema = SchemaDefinition::from_spec(spec).unwrap();
        assert_eq!(schema.field("status").unwrap().default, Some(json!("new")));
        assert!(!schema.field("status").unwrap().nullable);
        assert_eq!(schema.compound_indexes().len(), 1);
        assert!(schema.timestamps().created_at);
    }

    #[test]
    fn test_orderable_types() {
        assert!(SqlType::Integer.is_orderable());
        assert!(SqlType::Date.is_orderable());
        assert!(!SqlType::Text.is_orderable());
        assert!(!SqlType::Boolean.is_orderable());
    }
}
