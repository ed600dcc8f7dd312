//! Parsed update description and its application

use serde_json::{Number, Value};

use crate::document;
use crate::error::{QueryError, QueryResult};
use crate::schema::paths::{self, ID_FIELD};

/// One field mutation
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOp {
    Set(String, Value),
    Unset(String),
    /// Adds a number; a missing field starts at zero
    Inc(String, Number),
    /// Appends values; a missing field becomes an array
    Push(String, Vec<Value>),
    /// Removes every element equal to the value
    Pull(String, Value),
}

impl UpdateOp {
    pub fn path(&self) -> &str {
        match self {
            UpdateOp::Set(p, _)
            | UpdateOp::Unset(p)
            | UpdateOp::Inc(p, _)
            | UpdateOp::Push(p, _)
            | UpdateOp::Pull(p, _) => p,
        }
    }
}

/// Ordered list of mutations
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateSpec {
    ops: Vec<UpdateOp>,
}

impl UpdateSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(UpdateOp::Set(path.into(), value.into()))
    }

    pub fn unset(self, path: impl Into<String>) -> Self {
        self.with(UpdateOp::Unset(path.into()))
    }

    pub fn inc(self, path: impl Into<String>, by: impl Into<Number>) -> Self {
        self.with(UpdateOp::Inc(path.into(), by.into()))
    }

    pub fn push(self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(UpdateOp::Push(path.into(), vec![value.into()]))
    }

    pub fn pull(self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(UpdateOp::Pull(path.into(), value.into()))
    }

    fn with(mut self, op: UpdateOp) -> Self {
        self.ops.push(op);
        self
    }

    pub fn ops(&self) -> &[UpdateOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Parses the JSON update language
    pub fn parse(update: &Value) -> QueryResult<Self> {
        let map = update
            .as_object()
            .ok_or_else(|| QueryError::translation(format!("update must be an object, got {}", update)))?;
        if map.is_empty() {
            return Err(QueryError::translation("update must not be empty"));
        }

        let operators = map.keys().filter(|k| k.starts_with('$')).count();
        if operators == 0 {
            let ops = map
                .iter()
                .map(|(path, value)| UpdateOp::Set(path.clone(), value.clone()))
                .collect();
            let spec = Self { ops };
            spec.validate()?;
            return Ok(spec);
        }
        if operators != map.len() {
            return Err(QueryError::translation(
                "update cannot mix operators and plain fields",
            ));
        }

        let mut ops = Vec::new();
        for (operator, fields) in map {
            let fields = fields.as_object().ok_or_else(|| {
                QueryError::translation(format!("{} expects an object of field: value", operator))
            })?;
            for (path, value) in fields {
                ops.push(parse_op(operator, path, value)?);
            }
        }
        let spec = Self { ops };
        spec.validate()?;
        Ok(spec)
    }

    /// Rejects invalid paths and any write to the document id
    pub fn validate(&self) -> QueryResult<()> {
        if self.ops.is_empty() {
            return Err(QueryError::translation("update must not be empty"));
        }
        for op in &self.ops {
            let path = op.path();
            let first = paths::segments(path).into_iter().next().unwrap_or_default();
            if first == ID_FIELD {
                return Err(QueryError::translation("the document id cannot be updated"));
            }
            paths::to_json_path(path)?;
        }
        Ok(())
    }

    /// Applies every mutation in order. Returns whether the document changed.
    pub fn apply(&self, document: &mut Value) -> QueryResult<bool> {
        let before = document.clone();
        for op in &self.ops {
            apply_op(op, document)?;
        }
        Ok(*document != before)
    }
}

fn parse_op(operator: &str, path: &str, value: &Value) -> QueryResult<UpdateOp> {
    let path = path.to_string();
    match operator {
        "$set" => Ok(UpdateOp::Set(path, value.clone())),
        "$unset" => Ok(UpdateOp::Unset(path)),
        "$inc" => match value {
            Value::Number(n) => Ok(UpdateOp::Inc(path, n.clone())),
            other => Err(QueryError::translation(format!(
                "$inc for '{}' expects a number, got {}",
                path, other
            ))),
        },
        "$push" => match value.get("$each") {
            Some(Value::Array(items)) => Ok(UpdateOp::Push(path, items.clone())),
            Some(_) => Err(QueryError::translation("$each expects an array")),
            None => Ok(UpdateOp::Push(path, vec![value.clone()])),
        },
        "$pull" => Ok(UpdateOp::Pull(path, value.clone())),
        other => Err(QueryError::translation(format!(
            "unknown update operator '{}'",
            other
        ))),
    }
}

fn apply_op(op: &UpdateOp, document: &mut Value) -> QueryResult<()> {
    match op {
        UpdateOp::Set(path, value) => document::set_path(document, path, value.clone()),
        UpdateOp::Unset(path) => document::remove_path(document, path).map(|_| ()),
        UpdateOp::Inc(path, by) => {
            let next = match document::get_path(document, path) {
                None | Some(Value::Null) => Value::Number(by.clone()),
                Some(Value::Number(current)) => Value::Number(add(current, by)),
                Some(other) => {
                    return Err(QueryError::translation(format!(
                        "$inc on '{}' requires a numeric value, found {}",
                        path, other
                    )))
                }
            };
            document::set_path(document, path, next)
        }
        UpdateOp::Push(path, items) => {
            let mut array = match document::get_path(document, path) {
                None | Some(Value::Null) => Vec::new(),
                Some(Value::Array(existing)) => existing.clone(),
                Some(other) => {
                    return Err(QueryError::translation(format!(
                        "$push on '{}' requires an array, found {}",
                        path, other
                    )))
                }
            };
            array.extend(items.iter().cloned());
            document::set_path(document, path, Value::Array(array))
        }
        UpdateOp::Pull(path, value) => match document::get_path(document, path) {
            None | Some(Value::Null) => Ok(()),
            Some(Value::Array(existing)) => {
                let kept: Vec<Value> = existing.iter().filter(|v| *v != value).cloned().collect();
                document::set_path(document, path, Value::Array(kept))
            }
            Some(other) => Err(QueryError::translation(format!(
                "$pull on '{}' requires an array, found {}",
                path, other
            ))),
        },
    }
}

/// Integer addition when both sides are integers and it does not overflow
fn add(a: &Number, b: &Number) -> Number {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        if let Some(sum) = x.checked_add(y) {
            return Number::from(sum);
        }
    }
    let sum = a.as_f64().unwrap_or(0.0) + b.as_f64().unwrap_or(0.0);
    Number::from_f64(sum).unwrap_or_else(|| Number::from(0))
}

impl TryFrom<&Value> for UpdateSpec {
    type Error = QueryError;

    fn try_from(value: &Value) -> QueryResult<Self> {
        Self::parse(value)
    }
}

/// Anything an update operation accepts as an update
pub trait IntoUpdate {
    fn into_update(self) -> QueryResult<UpdateSpec>;
}

impl IntoUpdate for UpdateSpec {
    fn into_update(self) -> QueryResult<UpdateSpec> {
        self.validate()?;
        Ok(self)
    }
}

impl IntoUpdate for &UpdateSpec {
    fn into_update(self) -> QueryResult<UpdateSpec> {
        self.clone().into_update()
    }
}

impl IntoUpdate for Value {
    fn into_update(self) -> QueryResult<UpdateSpec> {
        UpdateSpec::parse(&self)
    }
}

impl IntoUpdate for &Value {
    fn into_update(self) -> QueryResult<UpdateSpec> {
        UpdateSpec::parse(self)
    }
}
