//! Collection Operation Tests
//!
//! Writes and their failure modes:
//! - Inserts generate ids, apply defaults and timestamps, validate first
//! - Batch inserts report per-item failures in ordered and unordered mode
//! - Updates and deletes honor filter, sort and limit
//! - A failing write leaves no partial effects

mod common;

use aerodoc::{
    CollectionOptions, Database, QueryError, QueryResult, UpdateResult, UpdateSpec,
};
use common::{ids, opts, seed, users, users_schema};
use serde_json::{json, Value};

fn people() -> Vec<Value> {
    vec![
        json!({"id": "a", "email": "a@x", "name": "Alice", "age": 30, "score": 1.5}),
        json!({"id": "b", "email": "b@x", "name": "Bob", "age": 45, "score": 4.0}),
        json!({"id": "c", "email": "c@x", "name": "Carol", "age": 50, "score": 2.5}),
    ]
}

// =============================================================================
// Inserts
// =============================================================================

#[tokio::test]
async fn test_insert_one_generates_id_and_stamps() {
    let db = Database::open_in_memory().unwrap();
    let users = users(&db);

    let result = users
        .insert_one(json!({"email": "a@x", "name": "Alice"}), &opts())
        .await
        .unwrap();
    assert!(!result.inserted_id.is_empty());
    assert_eq!(result.document["id"], result.inserted_id.as_str());
    assert_eq!(result.document["role"], "member");
    assert!(result.document["createdAt"].is_string());
    assert!(result.document["updatedAt"].is_string());

    let stored = users
        .find_by_id(&result.inserted_id, &opts())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored, result.document);
    assert_eq!(users.metrics().snapshot().documents_inserted, 1);
}

#[tokio::test]
async fn test_insert_validation_happens_before_storage() {
    let db = Database::open_in_memory().unwrap();
    let users = users(&db);

    let err = users
        .insert_one(json!({"email": 42}), &opts())
        .await
        .unwrap_err();
    match err {
        QueryError::Validation { field, value, .. } => {
            assert_eq!(field, "email");
            assert_eq!(value, json!(42));
        }
        other => panic!("expected validation error, got {:?}", other),
    }
    assert_eq!(users.count(json!({}), &opts()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_insert_duplicate_reports_field() {
    let db = Database::open_in_memory().unwrap();
    let users = users(&db);
    users.insert_one(json!({"email": "a@x"}), &opts()).await.unwrap();

    let err = users
        .insert_one(json!({"email": "a@x"}), &opts())
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::UniqueConstraint { ref field } if field == "email"));

    users
        .insert_one(json!({"id": "x", "email": "x@x"}), &opts())
        .await
        .unwrap();
    let err = users
        .insert_one(json!({"id": "x", "email": "y@x"}), &opts())
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::UniqueConstraint { ref field } if field == "id"));
}

#[tokio::test]
async fn test_custom_validator_and_id_generator() {
    let db = Database::open_in_memory().unwrap();
    let options = CollectionOptions::new()
        .with_validator(|doc: &Value| -> QueryResult<()> {
            match doc.get("age").and_then(Value::as_i64) {
                Some(age) if age < 0 => Err(QueryError::validation("age", json!(age), "must be positive")),
                _ => Ok(()),
            }
        })
        .with_id_generator(|| "fixed-id".to_string());
    let users = db.collection(users_schema(), options).unwrap();

    let ok = users.insert_one(json!({"age": 3}), &opts()).await.unwrap();
    assert_eq!(ok.inserted_id, "fixed-id");

    let err = users.insert_one(json!({"age": -1}), &opts()).await.unwrap_err();
    assert!(matches!(err, QueryError::Validation { .. }));
}

/// Unordered batch: items 2 and 4 collide, the other three land.
#[tokio::test]
async fn test_unordered_batch_reports_each_failure() {
    let db = Database::open_in_memory().unwrap();
    let users = users(&db);

    let batch = vec![
        json!({"email": "a@x"}),
        json!({"email": "a@x"}),
        json!({"email": "b@x"}),
        json!({"email": "b@x"}),
        json!({"email": "c@x"}),
    ];
    let result = users.insert_many(batch, false, &opts()).await.unwrap();

    assert_eq!(result.inserted_count, 3);
    assert_eq!(result.inserted_ids.len(), 3);
    let indices: Vec<usize> = result.errors.iter().map(|e| e.index).collect();
    assert_eq!(indices, vec![1, 3]);
    assert!(result
        .errors
        .iter()
        .all(|e| matches!(e.error, QueryError::UniqueConstraint { .. })));
    assert_eq!(users.count(json!({}), &opts()).await.unwrap(), 3);
}

#[tokio::test]
async fn test_ordered_batch_stops_at_first_failure() {
    let db = Database::open_in_memory().unwrap();
    let users = users(&db);

    let batch = vec![
        json!({"email": "a@x"}),
        json!({"email": 7}),
        json!({"email": "b@x"}),
    ];
    let result = users.insert_many(batch, true, &opts()).await.unwrap();

    assert_eq!(result.inserted_count, 1);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].index, 1);
    assert!(matches!(result.errors[0].error, QueryError::Validation { .. }));

    // prior successes stay committed, later items were never tried
    let emails: Vec<Value> = users
        .find(json!({}), &opts())
        .await
        .unwrap()
        .into_iter()
        .map(|d| d["email"].clone())
        .collect();
    assert_eq!(emails, vec![json!("a@x")]);
}

// =============================================================================
// Updates
// =============================================================================

/// An update over an empty collection matches nothing.
#[tokio::test]
async fn test_update_many_on_empty_collection() {
    let db = Database::open_in_memory().unwrap();
    let users = users(&db);

    let result = users
        .update_many(json!({}), json!({"$set": {"status": "x"}}), &opts())
        .await
        .unwrap();
    assert_eq!(
        result,
        UpdateResult {
            matched_count: 0,
            modified_count: 0
        }
    );
}

#[tokio::test]
async fn test_update_many_applies_operators() {
    let db = Database::open_in_memory().unwrap();
    let users = users(&db);
    seed(&users, people()).await;

    let result = users
        .update_many(
            json!({"age": {"$gte": 45}}),
            json!({"$inc": {"age": 1}, "$push": {"tags": "senior"}}),
            &opts(),
        )
        .await
        .unwrap();
    assert_eq!(result.matched_count, 2);
    assert_eq!(result.modified_count, 2);

    let bob = users.find_by_id("b", &opts()).await.unwrap().unwrap();
    assert_eq!(bob["age"], 46);
    assert_eq!(bob["tags"], json!(["senior"]));
    // generated column follows the document
    assert_eq!(
        ids(&users.find(json!({"age": 51}), &opts()).await.unwrap()),
        vec!["c"]
    );
    assert_eq!(users.metrics().snapshot().documents_updated, 2);
}

#[tokio::test]
async fn test_unchanged_documents_are_not_modified() {
    let db = Database::open_in_memory().unwrap();
    let users = users(&db);
    seed(&users, people()).await;
    let before = users.find_by_id("a", &opts()).await.unwrap().unwrap();

    let result = users
        .update_many(json!({"id": "a"}), json!({"name": "Alice"}), &opts())
        .await
        .unwrap();
    assert_eq!(result.matched_count, 1);
    assert_eq!(result.modified_count, 0);

    let after = users.find_by_id("a", &opts()).await.unwrap().unwrap();
    assert_eq!(before["updatedAt"], after["updatedAt"]);
}

#[tokio::test]
async fn test_update_one_follows_sort() {
    let db = Database::open_in_memory().unwrap();
    let users = users(&db);
    seed(&users, people()).await;

    let update = UpdateSpec::new().set("status", "top");
    let result = users
        .update_one(json!({}), &update, &opts().sort_desc("score"))
        .await
        .unwrap();
    assert_eq!(result.modified_count, 1);

    let top = users.find(json!({"status": "top"}), &opts()).await.unwrap();
    assert_eq!(ids(&top), vec!["b"]);
}

#[tokio::test]
async fn test_failed_update_rolls_back_every_document() {
    let db = Database::open_in_memory().unwrap();
    let users = users(&db);
    seed(&users, people()).await;

    let err = users
        .update_many(json!({}), json!({"$set": {"email": "same@x"}}), &opts())
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::UniqueConstraint { .. }));
    assert_eq!(
        users.count(json!({"email": "same@x"}), &opts()).await.unwrap(),
        0
    );
    assert!(users.metrics().snapshot().transactions_rolled_back >= 1);
}

#[tokio::test]
async fn test_invalid_updates_are_rejected() {
    let db = Database::open_in_memory().unwrap();
    let users = users(&db);
    seed(&users, people()).await;

    let err = users
        .update_many(json!({}), json!({"$set": {"id": "z"}}), &opts())
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::Translation { .. }));

    let err = users
        .update_many(json!({}), json!({"$set": {"age": "old"}}), &opts())
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::Validation { .. }));
    assert_eq!(users.count(json!({"age": 30}), &opts()).await.unwrap(), 1);
}

// =============================================================================
// Deletes & Counts
// =============================================================================

#[tokio::test]
async fn test_delete_one_and_many() {
    let db = Database::open_in_memory().unwrap();
    let users = users(&db);
    seed(&users, people()).await;

    let one = users
        .delete_one(json!({}), &opts().sort_asc("age"))
        .await
        .unwrap();
    assert_eq!(one.deleted_count, 1);
    assert!(users.find_by_id("a", &opts()).await.unwrap().is_none());

    let many = users
        .delete_many(json!({"age": {"$gt": 40}}), &opts())
        .await
        .unwrap();
    assert_eq!(many.deleted_count, 2);
    assert_eq!(users.count(json!({}), &opts()).await.unwrap(), 0);
    assert_eq!(users.metrics().snapshot().documents_deleted, 3);
}

#[tokio::test]
async fn test_count_honors_limit_and_skip() {
    let db = Database::open_in_memory().unwrap();
    let users = users(&db);
    seed(&users, people()).await;

    assert_eq!(users.count(json!({}), &opts()).await.unwrap(), 3);
    assert_eq!(users.count(json!({}), &opts().limit(2)).await.unwrap(), 2);
    assert_eq!(users.count(json!({}), &opts().skip(2)).await.unwrap(), 1);
    assert_eq!(
        users.count(json!({"age": {"$lt": 0}}), &opts()).await.unwrap(),
        0
    );
}

#[tokio::test]
async fn test_find_one_and_not_found() {
    let db = Database::open_in_memory().unwrap();
    let users = users(&db);
    seed(&users, people()).await;

    let oldest = users
        .find_one(json!({}), &opts().sort_desc("age"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(oldest["id"], "c");
    assert!(users
        .find_one(json!({"name": "Nobody"}), &opts())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_collections_share_one_database() {
    let db = Database::open_in_memory().unwrap();
    let first = users(&db);
    let second = first.clone();

    let writer = tokio::spawn(async move {
        for i in 0..20 {
            second
                .insert_one(json!({"email": format!("w{}@x", i)}), &opts())
                .await
                .unwrap();
        }
    });
    for i in 0..20 {
        first
            .insert_one(json!({"email": format!("m{}@x", i)}), &opts())
            .await
            .unwrap();
    }
    writer.await.unwrap();
    assert_eq!(first.count(json!({}), &opts()).await.unwrap(), 40);
}
