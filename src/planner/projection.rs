//! Result projection
//!
//! Statements always read `id, data`; projection is applied to the decoded
//! document. `select` always keeps the id, `omit` can never remove it, and
//! only a mongo-style map with `id: 0` drops it.

use serde_json::{Map, Value};

use super::options::QueryOptions;
use crate::document;
use crate::error::{QueryError, QueryResult};
use crate::schema::paths::{self, ID_FIELD};

/// Resolved projection mode
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Projection {
    #[default]
    All,
    /// Only these fields, plus the id
    Select(Vec<String>),
    /// Everything except these fields; the id always stays
    Omit(Vec<String>),
    /// Mongo-style inclusion map
    Include { fields: Vec<String>, keep_id: bool },
    /// Mongo-style exclusion map
    Exclude { fields: Vec<String>, keep_id: bool },
}

impl Projection {
    /// Rejects options that set more than one projection mode. Checked for
    /// every plan kind, not only reads.
    pub fn ensure_single_mode(options: &QueryOptions) -> QueryResult<()> {
        let set = [
            options.select.is_some(),
            options.omit.is_some(),
            options.projection.is_some(),
        ]
        .iter()
        .filter(|s| **s)
        .count();
        if set > 1 {
            return Err(QueryError::translation(
                "select, omit and projection are mutually exclusive",
            ));
        }
        Ok(())
    }

    /// Resolves the projection mode set in `options`. Callers run
    /// `ensure_single_mode` first.
    pub fn from_options(options: &QueryOptions) -> QueryResult<Self> {
        let projection = if let Some(fields) = &options.select {
            Projection::Select(fields.clone())
        } else if let Some(fields) = &options.omit {
            Projection::Omit(fields.clone())
        } else if let Some(entries) = &options.projection {
            Self::from_map(entries)?
        } else {
            Projection::All
        };
        projection.validate_paths()?;
        Ok(projection)
    }

    fn from_map(entries: &[(String, bool)]) -> QueryResult<Self> {
        let mut keep_id = true;
        let mut included = Vec::new();
        let mut excluded = Vec::new();
        for (field, on) in entries {
            if field == ID_FIELD {
                keep_id = *on;
            } else if *on {
                included.push(field.clone());
            } else {
                excluded.push(field.clone());
            }
        }

        match (included.is_empty(), excluded.is_empty()) {
            (false, false) => Err(QueryError::translation(
                "projection cannot mix inclusion and exclusion (except id: 0)",
            )),
            (false, true) => Ok(Projection::Include {
                fields: included,
                keep_id,
            }),
            (true, false) => Ok(Projection::Exclude {
                fields: excluded,
                keep_id,
            }),
            // Only `id` was mentioned
            (true, true) if keep_id => Ok(Projection::Include {
                fields: Vec::new(),
                keep_id,
            }),
            (true, true) => Ok(Projection::Exclude {
                fields: Vec::new(),
                keep_id,
            }),
        }
    }

    fn validate_paths(&self) -> QueryResult<()> {
        let fields = match self {
            Projection::All => return Ok(()),
            Projection::Select(f) | Projection::Omit(f) => f,
            Projection::Include { fields, .. } | Projection::Exclude { fields, .. } => fields,
        };
        for field in fields {
            if field != ID_FIELD {
                paths::to_json_path(field)?;
            }
        }
        Ok(())
    }

    /// Literal-free description used in the statement cache key
    pub fn shape(&self) -> String {
        match self {
            Projection::All => "all".to_string(),
            Projection::Select(f) => format!("select[{}]", f.join(",")),
            Projection::Omit(f) => format!("omit[{}]", f.join(",")),
            Projection::Include { fields, keep_id } => {
                format!("include[{}]id={}", fields.join(","), keep_id)
            }
            Projection::Exclude { fields, keep_id } => {
                format!("exclude[{}]id={}", fields.join(","), keep_id)
            }
        }
    }

    /// Applies the projection to a full document (id included)
    pub fn apply(&self, document: Value) -> QueryResult<Value> {
        match self {
            Projection::All => Ok(document),
            Projection::Select(fields) => pick(&document, fields, true),
            Projection::Include { fields, keep_id } => pick(&document, fields, *keep_id),
            Projection::Omit(fields) => drop_fields(document, fields, true),
            Projection::Exclude { fields, keep_id } => drop_fields(document, fields, *keep_id),
        }
    }
}

fn pick(document: &Value, fields: &[String], keep_id: bool) -> QueryResult<Value> {
    let mut out = Value::Object(Map::new());
    if keep_id {
        if let Some(id) = document.get(ID_FIELD) {
            document::set_path(&mut out, ID_FIELD, id.clone())?;
        }
    }
    for field in fields.iter().filter(|f| f.as_str() != ID_FIELD) {
        if let Some(value) = document::get_path(document, field) {
            document::set_path(&mut out, field, value.clone())?;
        }
    }
    Ok(out)
}

fn drop_fields(mut document: Value, fields: &[String], keep_id: bool) -> QueryResult<Value> {
    for field in fields.iter().filter(|f| f.as_str() != ID_FIELD) {
        document::remove_path(&mut document, field)?;
    }
    if !keep_id {
        if let Some(map) = document.as_object_mut() {
            map.remove(ID_FIELD);
        }
    }
    Ok(document)
}
