//! Read/write options: sort, paging, projection, search, cancellation, retry
//!
//! JSON form:
//!
//! ```json
//! { "sort": { "publishedAt": -1 }, "limit": 20,
//!   "cursor": { "after": "<id>" },
//!   "select": ["title"],
//!   "search": { "text": "rust", "fields": ["title", "body"], "caseSensitive": false },
//!   "retry": false }
//! ```

use serde_json::{Map, Value};

use super::ast::{SortDirection, SortSpec};
use crate::error::{QueryError, QueryResult};
use crate::executor::{CancellationSignal, RetryOptions, RetrySetting};

/// Keyset pagination boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cursor {
    /// Rows strictly after the boundary document in sort order
    After(String),
    /// Rows strictly before the boundary document in sort order
    Before(String),
}

impl Cursor {
    pub fn document_id(&self) -> &str {
        match self {
            Cursor::After(id) | Cursor::Before(id) => id,
        }
    }

    pub fn is_before(&self) -> bool {
        matches!(self, Cursor::Before(_))
    }
}

/// Multi-field substring search, ANDed with the filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchSpec {
    pub text: String,
    pub fields: Vec<String>,
    pub case_sensitive: bool,
}

impl SearchSpec {
    /// Case-insensitive search
    pub fn new(text: impl Into<String>, fields: &[&str]) -> Self {
        Self {
            text: text.into(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
            case_sensitive: false,
        }
    }

    pub fn case_sensitive(mut self) -> Self {
        self.case_sensitive = true;
        self
    }
}

/// Per-call options.
///
/// `select`, `omit` and `projection` are mutually exclusive; setting more
/// than one is rejected when the plan is built.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub sort: Vec<SortSpec>,
    pub limit: Option<u64>,
    pub skip: Option<u64>,
    pub cursor: Option<Cursor>,
    pub select: Option<Vec<String>>,
    pub omit: Option<Vec<String>>,
    /// Mongo-style `{field: 1 | 0}` map
    pub projection: Option<Vec<(String, bool)>>,
    pub search: Option<SearchSpec>,
    pub signal: Option<CancellationSignal>,
    pub retry: RetrySetting,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sort_asc(mut self, field: impl Into<String>) -> Self {
        self.sort.push(SortSpec::asc(field));
        self
    }

    pub fn sort_desc(mut self, field: impl Into<String>) -> Self {
        self.sort.push(SortSpec::desc(field));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn after(mut self, id: impl Into<String>) -> Self {
        self.cursor = Some(Cursor::After(id.into()));
        self
    }

    pub fn before(mut self, id: impl Into<String>) -> Self {
        self.cursor = Some(Cursor::Before(id.into()));
        self
    }

    pub fn select(mut self, fields: &[&str]) -> Self {
        self.select = Some(fields.iter().map(|f| f.to_string()).collect());
        self
    }

    pub fn omit(mut self, fields: &[&str]) -> Self {
        self.omit = Some(fields.iter().map(|f| f.to_string()).collect());
        self
    }

    pub fn projection(mut self, entries: &[(&str, bool)]) -> Self {
        self.projection = Some(entries.iter().map(|(f, on)| (f.to_string(), *on)).collect());
        self
    }

    pub fn search(mut self, search: SearchSpec) -> Self {
        self.search = Some(search);
        self
    }

    pub fn signal(mut self, signal: CancellationSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Operation-level retry setting
    pub fn retry(mut self, retry: impl Into<RetrySetting>) -> Self {
        self.retry = retry.into();
        self
    }

    /// Disables retries for this call
    pub fn no_retry(mut self) -> Self {
        self.retry = RetrySetting::Disabled;
        self
    }

    /// Parses the JSON options form. `signal` has no JSON form.
    pub fn from_json(value: &Value) -> QueryResult<Self> {
        let map = match value {
            Value::Null => return Ok(Self::default()),
            Value::Object(map) => map,
            other => {
                return Err(QueryError::translation(format!(
                    "options must be an object, got {}",
                    other
                )))
            }
        };

        let mut options = Self::default();
        for (key, value) in map {
            match key.as_str() {
                "sort" => options.sort = parse_sort(value)?,
                "limit" => options.limit = Some(non_negative(key, value)?),
                "skip" => options.skip = Some(non_negative(key, value)?),
                "cursor" => options.cursor = Some(parse_cursor(value)?),
                "select" => options.select = Some(string_list(key, value)?),
                "omit" => options.omit = Some(string_list(key, value)?),
                "projection" => options.projection = Some(parse_projection(value)?),
                "search" => options.search = Some(parse_search(value)?),
                "retry" => options.retry = parse_retry(value)?,
                other => {
                    return Err(QueryError::translation(format!(
                        "unknown option '{}'",
                        other
                    )))
                }
            }
        }
        Ok(options)
    }
}

fn parse_sort(value: &Value) -> QueryResult<Vec<SortSpec>> {
    let map = value
        .as_object()
        .ok_or_else(|| QueryError::translation("sort expects an object of field: 1 | -1"))?;
    map.iter()
        .map(|(field, dir)| {
            let direction = match dir.as_i64() {
                Some(1) => SortDirection::Asc,
                Some(-1) => SortDirection::Desc,
                _ => match dir.as_str() {
                    Some("asc") => SortDirection::Asc,
                    Some("desc") => SortDirection::Desc,
                    _ => {
                        return Err(QueryError::translation(format!(
                            "sort direction for '{}' must be 1 or -1",
                            field
                        )))
                    }
                },
            };
            Ok(SortSpec {
                field: field.clone(),
                direction,
            })
        })
        .collect()
}

fn non_negative(key: &str, value: &Value) -> QueryResult<u64> {
    value
        .as_u64()
        .ok_or_else(|| QueryError::translation(format!("{} must be a non-negative integer", key)))
}

fn parse_cursor(value: &Value) -> QueryResult<Cursor> {
    let map = value
        .as_object()
        .ok_or_else(|| QueryError::translation("cursor expects {after|before: id}"))?;
    match (map.get("after"), map.get("before"), map.len()) {
        (Some(Value::String(id)), None, 1) => Ok(Cursor::After(id.clone())),
        (None, Some(Value::String(id)), 1) => Ok(Cursor::Before(id.clone())),
        _ => Err(QueryError::translation(
            "cursor expects exactly one of after/before with a document id",
        )),
    }
}

fn string_list(key: &str, value: &Value) -> QueryResult<Vec<String>> {
    value
        .as_array()
        .and_then(|items| {
            items
                .iter()
                .map(|v| v.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
        })
        .ok_or_else(|| QueryError::translation(format!("{} expects an array of field names", key)))
}

fn parse_projection(value: &Value) -> QueryResult<Vec<(String, bool)>> {
    let map: &Map<String, Value> = value
        .as_object()
        .ok_or_else(|| QueryError::translation("projection expects an object of field: 1 | 0"))?;
    map.iter()
        .map(|(field, flag)| {
            let on = match flag {
                Value::Bool(b) => *b,
                Value::Number(n) if n.as_i64() == Some(1) => true,
                Value::Number(n) if n.as_i64() == Some(0) => false,
                _ => {
                    return Err(QueryError::translation(format!(
                        "projection value for '{}' must be 1 or 0",
                        field
                    )))
                }
            };
            Ok((field.clone(), on))
        })
        .collect()
}

fn parse_search(value: &Value) -> QueryResult<SearchSpec> {
    let text = value
        .get("text")
        .and_then(Value::as_str)
        .ok_or_else(|| QueryError::translation("search.text must be a string"))?;
    let fields = string_list(
        "search.fields",
        value.get("fields").unwrap_or(&Value::Null),
    )?;
    let case_sensitive = match value.get("caseSensitive") {
        None => false,
        Some(Value::Bool(b)) => *b,
        Some(_) => return Err(QueryError::translation("search.caseSensitive must be a boolean")),
    };
    Ok(SearchSpec {
        text: text.to_string(),
        fields,
        case_sensitive,
    })
}

fn parse_retry(value: &Value) -> QueryResult<RetrySetting> {
    match value {
        Value::Bool(false) => Ok(RetrySetting::Disabled),
        Value::Bool(true) => Ok(RetrySetting::Policy(RetryOptions::default())),
        Value::Object(_) => {
            let options: RetryOptions = serde_json::from_value(value.clone())
                .map_err(|e| QueryError::translation(format!("invalid retry options: {}", e)))?;
            options.validate()?;
            Ok(RetrySetting::Policy(options))
        }
        _ => Err(QueryError::translation("retry expects false or an options object")),
    }
}
