//! Keyset pagination
//!
//! A cursor names a boundary document. At execution time its sort-key tuple
//! is read by id; the page is then every row strictly after (or before) that
//! tuple in sort order, with the document id as the final ascending
//! tiebreaker. A boundary that no longer exists yields no predicate, so the
//! caller gets the first page.
//!
//! The tuple comparison is expanded into OR-of-ANDs:
//!
//! ```text
//! (k1 > v1) OR (k1 IS v1 AND k2 > v2) OR (k1 IS v1 AND k2 IS v2 AND id > vid)
//! ```
//!
//! SQLite sorts NULL first ascending and last descending, and each strict
//! comparison accounts for that.

use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension};

use super::ast::{SortDirection, SortSpec};
use super::compiler::SqlWriter;
use super::options::Cursor;
use super::resolver;
use crate::error::QueryResult;
use crate::executor::storage;
use crate::schema::paths::{quote, ID_FIELD};
use crate::schema::SchemaDefinition;

/// Sort-key tuple of the boundary document
#[derive(Debug, Clone, PartialEq)]
pub struct Boundary {
    /// One value per sort field, in sort order
    pub values: Vec<SqlValue>,
    pub id: String,
}

impl Boundary {
    /// Which boundary values are NULL; part of the statement shape
    pub fn null_mask(&self) -> String {
        self.values
            .iter()
            .map(|v| if matches!(v, SqlValue::Null) { 'n' } else { '?' })
            .collect()
    }
}

/// Sort expressions for `sort`, in order
pub fn sort_expressions(schema: &SchemaDefinition, sort: &[SortSpec]) -> QueryResult<Vec<String>> {
    sort.iter()
        .map(|spec| Ok(resolver::resolve(schema, &spec.field)?.access.sql()))
        .collect()
}

/// Reads the boundary document's sort-key tuple by id.
///
/// Returns `None` when the document is gone or when there is no sort.
pub fn lookup_boundary(
    conn: &Connection,
    schema: &SchemaDefinition,
    sort: &[SortSpec],
    cursor: &Cursor,
) -> QueryResult<Option<Boundary>> {
    if sort.is_empty() {
        return Ok(None);
    }

    let exprs = sort_expressions(schema, sort)?;
    let sql = format!(
        "SELECT {}, {} FROM {} WHERE {} = ?",
        exprs.join(", "),
        ID_FIELD,
        quote(schema.collection()),
        ID_FIELD
    );
    let width = exprs.len();

    conn.query_row(&sql, [cursor.document_id()], |row| {
        let mut values = Vec::with_capacity(width);
        for i in 0..width {
            values.push(row.get::<_, SqlValue>(i)?);
        }
        Ok(Boundary {
            values,
            id: row.get(width)?,
        })
    })
    .optional()
    .map_err(|e| storage::classify_error(e, Some(schema)))
}

/// Writes the keyset predicate for rows strictly past `boundary`.
///
/// `before` selects rows preceding the boundary in sort order.
pub fn keyset_predicate(
    w: &mut SqlWriter,
    sort_exprs: &[String],
    sort: &[SortSpec],
    before: bool,
    boundary: &Boundary,
) {
    let mut keys: Vec<(&str, SortDirection, SqlValue)> = sort_exprs
        .iter()
        .zip(sort)
        .zip(&boundary.values)
        .map(|((expr, spec), value)| (expr.as_str(), spec.direction, value.clone()))
        .collect();
    keys.push((ID_FIELD, SortDirection::Asc, SqlValue::Text(boundary.id.clone())));

    w.push("(");
    for i in 0..keys.len() {
        if i > 0 {
            w.push(" OR ");
        }
        w.push("(");
        for (expr, _, value) in &keys[..i] {
            w.push_with(|| format!("{} IS ? AND ", expr));
            w.bind(value.clone());
        }
        let (expr, direction, value) = &keys[i];
        strictly_past(w, expr, *direction, before, value);
        w.push(")");
    }
    w.push(")");
}

fn strictly_past(
    w: &mut SqlWriter,
    expr: &str,
    direction: SortDirection,
    before: bool,
    value: &SqlValue,
) {
    let ascending_after = (direction == SortDirection::Asc) != before;
    let is_null = matches!(value, SqlValue::Null);
    match (ascending_after, is_null) {
        // Everything non-null sorts after NULL
        (true, true) => w.push_with(|| format!("{} IS NOT NULL", expr)),
        (true, false) => {
            w.push_with(|| format!("{} > ?", expr));
            w.bind(value.clone());
        }
        // Nothing sorts before NULL
        (false, true) => w.push("0"),
        (false, false) => {
            w.push_with(|| format!("({0} < ? OR {0} IS NULL)", expr));
            w.bind(value.clone());
        }
    }
}
