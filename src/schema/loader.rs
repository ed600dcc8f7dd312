//! Schema loader for reading collection schemas from disk
//!
//! One JSON file per collection (`<dir>/<name>.json`) in the `SchemaSpec`
//! shape. Malformed files fail the whole load.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::types::{SchemaDefinition, SchemaSpec};
use crate::error::{QueryError, QueryResult};

/// Registry of built schemas keyed by collection name
pub struct SchemaLoader {
    schema_dir: PathBuf,
    schemas: BTreeMap<String, Arc<SchemaDefinition>>,
}

impl SchemaLoader {
    pub fn new(schema_dir: &Path) -> Self {
        Self {
            schema_dir: schema_dir.to_path_buf(),
            schemas: BTreeMap::new(),
        }
    }

    pub fn schema_dir(&self) -> &Path {
        &self.schema_dir
    }

    /// Loads every `*.json` file in the schema directory.
    ///
    /// Files are read in name order so failures are reproducible.
    pub fn load_all(&mut self) -> QueryResult<usize> {
        let entries = fs::read_dir(&self.schema_dir).map_err(|e| {
            QueryError::config(format!(
                "Failed to read schema directory {}: {}",
                self.schema_dir.display(),
                e
            ))
        })?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().map_or(false, |ext| ext == "json"))
            .collect();
        files.sort();

        for path in &files {
            self.load_schema_file(path)?;
        }
        Ok(files.len())
    }

    fn load_schema_file(&mut self, path: &Path) -> QueryResult<()> {
        let content = fs::read_to_string(path).map_err(|e| {
            QueryError::config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let schema = Self::parse(&content)
            .map_err(|e| QueryError::config(format!("{}: {}", path.display(), e)))?;
        self.register(schema)
    }

    /// Parses and builds a schema from JSON text
    pub fn parse(content: &str) -> QueryResult<SchemaDefinition> {
        let spec: SchemaSpec = serde_json::from_str(content)
            .map_err(|e| QueryError::config(format!("Invalid schema JSON: {}", e)))?;
        SchemaDefinition::from_spec(spec)
    }

    /// Registers a schema. A collection can only be registered once.
    pub fn register(&mut self, schema: SchemaDefinition) -> QueryResult<()> {
        let name = schema.collection().to_string();
        if self.schemas.contains_key(&name) {
            return Err(QueryError::config(format!(
                "schema for collection '{}' already registered",
                name
            )));
        }
        self.schemas.insert(name, Arc::new(schema));
        Ok(())
    }

    pub fn get(&self, collection: &str) -> Option<Arc<SchemaDefinition>> {
        self.schemas.get(collection).cloned()
    }

    pub fn all_schemas(&self) -> impl Iterator<Item = &Arc<SchemaDefinition>> {
        self.schemas.values()
    }

    pub fn schema_count(&self) -> usize {
        self.schemas.len()
    }

    /// Writes a schema to `<dir>/<collection>.json`
    pub fn save_schema(&self, schema: &SchemaDefinition) -> QueryResult<PathBuf> {
        fs::create_dir_all(&self.schema_dir).map_err(|e| {
            QueryError::config(format!("Failed to create schema directory: {}", e))
        })?;
        let path = self
            .schema_dir
            .join(format!("{}.json", schema.collection()));
        let json = serde_json::to_string_pretty(&schema.to_spec())?;
        fs::write(&path, json)
            .map_err(|e| QueryError::config(format!("Failed to write {}: {}", path.display(), e)))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{SchemaField, SqlType};
    use tempfile::TempDir;

    fn sample() -> SchemaDefinition {
        SchemaDefinition::builder("users")
            .field(SchemaField::new("email", SqlType::Text).unique())
            .build()
            .unwrap()
    }

    #[test]
    fn test_register_and_get() {
        let dir = TempDir::new().unwrap();
        let mut loader = SchemaLoader::new(dir.path());
        loader.register(sample()).unwrap();
        assert_eq!(loader.schema_count(), 1);
        assert!(loader.get("users").is_some());
        assert!(loader.get("orders").is_none());
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let dir = TempDir::new().unwrap();
        let mut loader = SchemaLoader::new(dir.path());
        loader.register(sample()).unwrap();
        assert!(loader.register(sample()).is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let writer = SchemaLoader::new(dir.path());
        writer.save_schema(&sample()).unwrap();

        let mut reader = SchemaLoader::new(dir.path());
        assert_eq!(reader.load_all().unwrap(), 1);
        let loaded = reader.get("users").unwrap();
        assert!(loaded.field("email").unwrap().unique);
        assert_eq!(loaded.field("email").unwrap().json_path(), "$.email");
    }

    #[test]
    fn test_malformed_file_fails() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("bad.json"), "{ not json").unwrap();
        let mut loader = SchemaLoader::new(dir.path());
        let err = loader.load_all().unwrap_err();
        assert_eq!(err.code(), "AERO_CONFIG_INVALID");
    }
}
