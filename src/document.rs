//! In-memory document helpers
//!
//! Path access over `serde_json::Value`, plus the insert-time preparation
//! steps (defaults, timestamps, date coercion) shared by inserts and updates.

use chrono::{DateTime, NaiveDate, SecondsFormat, TimeZone, Utc};
use serde_json::{Map, Value};

use crate::config::DateRepresentation;
use crate::error::{QueryError, QueryResult};
use crate::schema::{paths, SchemaDefinition, SqlType, TimestampPolicy};

/// One step of a JSON path
#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Key(String),
    Index(usize),
}

/// Parses a dotted or `$.`-prefixed path into steps
fn steps(path: &str) -> QueryResult<Vec<Step>> {
    let json_path = paths::to_json_path(path)?;
    let mut out = Vec::new();
    let mut rest = json_path.trim_start_matches('$');
    while !rest.is_empty() {
        if let Some(tail) = rest.strip_prefix('.') {
            let end = tail.find(['.', '[']).unwrap_or(tail.len());
            out.push(Step::Key(tail[..end].to_string()));
            rest = &tail[end..];
        } else if let Some(tail) = rest.strip_prefix('[') {
            let end = tail.find(']').unwrap_or(tail.len());
            let index = tail[..end]
                .parse()
                .map_err(|_| QueryError::translation(format!("invalid path '{}'", path)))?;
            out.push(Step::Index(index));
            rest = tail.get(end + 1..).unwrap_or("");
        } else {
            return Err(QueryError::translation(format!("invalid path '{}'", path)));
        }
    }
    Ok(out)
}

/// Reads the value at `path`, `None` when any step is missing
pub fn get_path<'v>(document: &'v Value, path: &str) -> Option<&'v Value> {
    let mut current = document;
    for step in steps(path).ok()? {
        current = match step {
            Step::Key(key) => current.as_object()?.get(&key)?,
            Step::Index(index) => current.as_array()?.get(index)?,
        };
    }
    Some(current)
}

/// Writes `value` at `path`, creating intermediate objects as needed
pub fn set_path(document: &mut Value, path: &str, value: Value) -> QueryResult<()> {
    let steps = steps(path)?;
    let Some((last, parents)) = steps.split_last() else {
        return Err(QueryError::translation("cannot replace the document root"));
    };

    let mut current = document;
    for step in parents {
        current = match step {
            Step::Key(key) => {
                let object = current.as_object_mut().ok_or_else(|| not_container(path))?;
                object
                    .entry(key.clone())
                    .or_insert_with(|| Value::Object(Map::new()))
            }
            Step::Index(index) => current
                .as_array_mut()
                .and_then(|a| a.get_mut(*index))
                .ok_or_else(|| not_container(path))?,
        };
    }

    match last {
        Step::Key(key) => {
            current
                .as_object_mut()
                .ok_or_else(|| not_container(path))?
                .insert(key.clone(), value);
        }
        Step::Index(index) => {
            let slot = current
                .as_array_mut()
                .and_then(|a| a.get_mut(*index))
                .ok_or_else(|| not_container(path))?;
            *slot = value;
        }
    }
    Ok(())
}

/// Removes the value at `path`; returns whether something was removed
pub fn remove_path(document: &mut Value, path: &str) -> QueryResult<bool> {
    let steps = steps(path)?;
    let Some((last, parents)) = steps.split_last() else {
        return Err(QueryError::translation("cannot remove the document root"));
    };

    let mut current = document;
    for step in parents {
        let next = match step {
            Step::Key(key) => current.as_object_mut().and_then(|o| o.get_mut(key)),
            Step::Index(index) => current.as_array_mut().and_then(|a| a.get_mut(*index)),
        };
        match next {
            Some(v) => current = v,
            None => return Ok(false),
        }
    }

    Ok(match last {
        Step::Key(key) => current
            .as_object_mut()
            .map(|o| o.remove(key).is_some())
            .unwrap_or(false),
        // Array slots are nulled rather than shifted
        Step::Index(index) => match current.as_array_mut().and_then(|a| a.get_mut(*index)) {
            Some(slot) => {
                *slot = Value::Null;
                true
            }
            None => false,
        },
    })
}

fn not_container(path: &str) -> QueryError {
    QueryError::translation(format!(
        "path '{}' crosses a value that is not an object or array",
        path
    ))
}

/// Normalizes a date operand to the configured representation.
///
/// Accepts RFC 3339 text, `YYYY-MM-DD`, or integer epoch milliseconds.
pub fn coerce_date(value: &Value, repr: DateRepresentation) -> QueryResult<Value> {
    let parsed: DateTime<Utc> = match value {
        Value::String(text) => parse_date_text(text).ok_or_else(|| {
            QueryError::translation(format!("'{}' is not a valid date", text))
        })?,
        Value::Number(n) => n
            .as_i64()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
            .ok_or_else(|| QueryError::translation(format!("{} is not a valid timestamp", n)))?,
        Value::Null => return Ok(Value::Null),
        other => {
            return Err(QueryError::translation(format!(
                "expected a date, got {}",
                other
            )))
        }
    };

    Ok(match repr {
        DateRepresentation::Iso8601 => {
            Value::String(parsed.to_rfc3339_opts(SecondsFormat::Millis, true))
        }
        DateRepresentation::UnixMillis => Value::from(parsed.timestamp_millis()),
    })
}

fn parse_date_text(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Current time in the configured representation
pub fn now(repr: DateRepresentation) -> Value {
    let now = Utc::now();
    match repr {
        DateRepresentation::Iso8601 => Value::String(now.to_rfc3339_opts(SecondsFormat::Millis, true)),
        DateRepresentation::UnixMillis => Value::from(now.timestamp_millis()),
    }
}

/// Coerces every declared `Date` field present in the document
pub fn coerce_dates(
    schema: &SchemaDefinition,
    document: &mut Value,
    repr: DateRepresentation,
) -> QueryResult<()> {
    for field in schema.fields().iter().filter(|f| f.sql_type == SqlType::Date) {
        let Some(current) = get_path(document, field.json_path()) else {
            continue;
        };
        let coerced = coerce_date(current, repr).map_err(|e| {
            QueryError::validation(&field.name, current.clone(), e.to_string())
        })?;
        set_path(document, field.json_path(), coerced)?;
    }
    Ok(())
}

/// Fills absent fields that declare a default
pub fn apply_defaults(schema: &SchemaDefinition, document: &mut Value) -> QueryResult<()> {
    for field in schema.fields() {
        if let Some(default) = &field.default {
            if get_path(document, field.json_path()).is_none() {
                set_path(document, field.json_path(), default.clone())?;
            }
        }
    }
    Ok(())
}

/// Stamps `createdAt` (inserts only) and `updatedAt` per the timestamp policy
pub fn stamp(
    schema: &SchemaDefinition,
    document: &mut Value,
    repr: DateRepresentation,
    inserting: bool,
) -> QueryResult<()> {
    let policy = schema.timestamps();
    let now = now(repr);
    if inserting && policy.created_at && document.get(TimestampPolicy::CREATED_AT).is_none() {
        set_path(document, TimestampPolicy::CREATED_AT, now.clone())?;
    }
    if policy.updated_at {
        set_path(document, TimestampPolicy::UPDATED_AT, now)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaField;
    use serde_json::json;

    #[test]
    fn test_get_nested_and_indexed() {
        let doc = json!({"profile": {"city": "Oslo"}, "items": [{"sku": "a"}, {"sku": "b"}]});
        assert_eq!(get_path(&doc, "profile.city"), Some(&json!("Oslo")));
        assert_eq!(get_path(&doc, "items.1.sku"), Some(&json!("b")));
        assert_eq!(get_path(&doc, "$.items[0].sku"), Some(&json!("a")));
        assert_eq!(get_path(&doc, "profile.zip"), None);
        assert_eq!(get_path(&doc, "items.9.sku"), None);
    }

    #[test]
    fn test_set_creates_intermediate_objects() {
        let mut doc = json!({});
        set_path(&mut doc, "a.b.c", json!(1)).unwrap();
        assert_eq!(doc, json!({"a": {"b": {"c": 1}}}));
    }

    #[test]
    fn test_set_through_scalar_fails() {
        let mut doc = json!({"a": 5});
        assert!(set_path(&mut doc, "a.b", json!(1)).is_err());
    }

    #[test]
    fn test_remove() {
        let mut doc = json!({"a": {"b": 1, "c": 2}});
        assert!(remove_path(&mut doc, "a.b").unwrap());
        assert!(!remove_path(&mut doc, "a.zzz").unwrap());
        assert!(!remove_path(&mut doc, "x.y").unwrap());
        assert_eq!(doc, json!({"a": {"c": 2}}));
    }

    #[test]
    fn test_coerce_date_representations() {
        let iso = coerce_date(&json!("2024-03-01T12:00:00+02:00"), DateRepresentation::Iso8601)
            .unwrap();
        assert_eq!(iso, json!("2024-03-01T10:00:00.000Z"));

        let millis = coerce_date(&json!("1970-01-02"), DateRepresentation::UnixMillis).unwrap();
        assert_eq!(millis, json!(86_400_000));

        let back = coerce_date(&json!(86_400_000), DateRepresentation::Iso8601).unwrap();
        assert_eq!(back, json!("1970-01-02T00:00:00.000Z"));

        assert!(coerce_date(&json!("yesterday"), DateRepresentation::Iso8601).is_err());
        assert!(coerce_date(&json!(true), DateRepresentation::Iso8601).is_err());
    }

    #[test]
    fn test_defaults_and_timestamps() {
        let schema = SchemaDefinition::builder("posts")
            .field(SchemaField::new("status", SqlType::Text).with_default(json!("draft")))
            .timestamps(TimestampPolicy::all())
            .build()
            .unwrap();

        let mut doc = json!({"title": "x"});
        apply_defaults(&schema, &mut doc).unwrap();
        stamp(&schema, &mut doc, DateRepresentation::UnixMillis, true).unwrap();

        assert_eq!(doc["status"], json!("draft"));
        assert!(doc["createdAt"].is_i64());
        assert!(doc["updatedAt"].is_i64());

        let mut explicit = json!({"status": "live"});
        apply_defaults(&schema, &mut explicit).unwrap();
        assert_eq!(explicit["status"], json!("live"));
    }
}
