//! Shared fixtures for the integration tests
#![allow(dead_code)]

use aerodoc::{
    Collection, CollectionOptions, Database, QueryOptions, SchemaDefinition, SchemaField, SqlType,
    TimestampPolicy,
};
use serde_json::Value;

/// `users`: unique email, indexed integer age, text name/status, JSON tags
pub fn users_schema() -> SchemaDefinition {
    SchemaDefinition::builder("users")
        .field(SchemaField::new("email", SqlType::Text).unique())
        .field(SchemaField::new("name", SqlType::Text))
        .field(SchemaField::new("status", SqlType::Text).indexed())
        .field(SchemaField::new("age", SqlType::Integer).indexed())
        .field(SchemaField::new("score", SqlType::Real))
        .field(SchemaField::new("tags", SqlType::Json))
        .field(SchemaField::new("role", SqlType::Text).with_default(Value::from("member")))
        .timestamps(TimestampPolicy::all())
        .build()
        .unwrap()
}

/// `posts`: indexed date for cursor pagination
pub fn posts_schema() -> SchemaDefinition {
    SchemaDefinition::builder("posts")
        .field(SchemaField::new("publishedAt", SqlType::Date).indexed())
        .field(SchemaField::new("title", SqlType::Text))
        .field(SchemaField::new("rank", SqlType::Integer).indexed())
        .build()
        .unwrap()
}

pub fn users(db: &Database) -> Collection {
    db.collection(users_schema(), CollectionOptions::default())
        .unwrap()
}

pub fn posts(db: &Database) -> Collection {
    db.collection(posts_schema(), CollectionOptions::default())
        .unwrap()
}

pub fn opts() -> QueryOptions {
    QueryOptions::new()
}

/// Inserts every document, failing the test on any rejected item
pub async fn seed(collection: &Collection, documents: Vec<Value>) {
    let result = collection
        .insert_many(documents, true, &QueryOptions::new())
        .await
        .unwrap();
    assert!(result.is_complete(), "seed rejected: {:?}", result.errors);
}

pub fn ids(documents: &[Value]) -> Vec<String> {
    documents
        .iter()
        .map(|d| d["id"].as_str().unwrap().to_string())
        .collect()
}
