//! Field path and identifier rules
//!
//! Paths and names are inlined into SQL text (JSON path literals, generated
//! column names, table names), so they are restricted to a conservative
//! identifier alphabet rather than escaped.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{QueryError, QueryResult};

/// Reserved path addressing the document id column
pub const ID_FIELD: &str = "id";

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex"))
}

fn index_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9]+$").expect("static regex"))
}

/// Checks a table, column or index name
pub fn validate_identifier(name: &str) -> QueryResult<()> {
    if identifier_re().is_match(name) {
        Ok(())
    } else {
        Err(QueryError::translation(format!(
            "'{}' is not a valid identifier",
            name
        )))
    }
}

/// Converts a dotted field path to a JSON path.
///
/// `profile.city` → `$.profile.city`, `items.0.sku` → `$.items[0].sku`.
/// A path already starting with `$` is validated and returned normalized.
pub fn to_json_path(path: &str) -> QueryResult<String> {
    let dotted = if path == "$" {
        ""
    } else if let Some(rest) = path.strip_prefix("$.") {
        rest
    } else {
        path
    };

    let mut json_path = String::from("$");
    if dotted.is_empty() {
        return Ok(json_path);
    }

    for (position, raw) in dotted.split('.').enumerate() {
        // `$.items[0]` form
        let (segment, subscripts) = split_subscripts(raw)?;
        if index_re().is_match(segment) && position > 0 {
            json_path.push('[');
            json_path.push_str(segment);
            json_path.push(']');
        } else if identifier_re().is_match(segment) {
            json_path.push('.');
            json_path.push_str(segment);
        } else {
            return Err(QueryError::translation(format!(
                "invalid field path '{}'",
                path
            )));
        }
        for index in subscripts {
            json_path.push('[');
            json_path.push_str(index);
            json_path.push(']');
        }
    }

    Ok(json_path)
}

fn split_subscripts(raw: &str) -> QueryResult<(&str, Vec<&str>)> {
    let Some(open) = raw.find('[') else {
        return Ok((raw, Vec::new()));
    };

    let (segment, mut rest) = raw.split_at(open);
    let mut subscripts = Vec::new();
    while !rest.is_empty() {
        let inner = rest
            .strip_prefix('[')
            .and_then(|r| r.split_once(']'))
            .filter(|(index, _)| index_re().is_match(index));
        match inner {
            Some((index, tail)) => {
                subscripts.push(index);
                rest = tail;
            }
            None => {
                return Err(QueryError::translation(format!(
                    "invalid array subscript in '{}'",
                    raw
                )))
            }
        }
    }
    Ok((segment, subscripts))
}

/// Splits a dotted path into document segments (used by in-memory path access)
pub fn segments(path: &str) -> Vec<&str> {
    path.strip_prefix("$.")
        .unwrap_or(path)
        .split('.')
        .filter(|s| !s.is_empty())
        .collect()
}

/// Double-quotes an identifier that has already passed `validate_identifier`
pub fn quote(name: &str) -> String {
    format!("\"{}\"", name)
}
