//! Explain output
//!
//! Deterministic, human-readable view of a built plan: the SQL, the bound
//! parameters and whether the template came from the statement cache.

use std::fmt;

use rusqlite::types::Value as SqlValue;
use serde::Serialize;
use serde_json::Value;

use super::planner::QueryPlan;

/// Explain plan output
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplainPlan {
    /// Statement kind (`SELECT`, `COUNT`, `UPDATE`, `DELETE`)
    pub kind: String,
    pub sql: String,
    /// Bound parameters, in order
    pub params: Vec<Value>,
    pub cache_hit: bool,
    /// Hex structural key
    pub structural_key: String,
    pub result_shape: String,
}

impl ExplainPlan {
    pub fn from_plan(plan: &QueryPlan) -> Self {
        Self {
            kind: plan.kind.as_str().to_string(),
            sql: plan.sql().to_string(),
            params: plan.params.iter().map(sql_to_json).collect(),
            cache_hit: plan.cache_hit,
            structural_key: plan.key.to_string(),
            result_shape: plan.template.result_shape.clone(),
        }
    }
}

fn sql_to_json(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => Value::from(*i),
        SqlValue::Real(f) => Value::from(*f),
        SqlValue::Text(s) => Value::String(s.clone()),
        SqlValue::Blob(b) => Value::String(format!("<blob {} bytes>", b.len())),
    }
}

impl fmt::Display for ExplainPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== EXPLAIN PLAN ===")?;
        writeln!(f, "Kind: {}", self.kind)?;
        writeln!(f, "SQL: {}", self.sql)?;
        if !self.params.is_empty() {
            writeln!(f, "Params:")?;
            for (i, param) in self.params.iter().enumerate() {
                writeln!(f, "  {}: {}", i + 1, param)?;
            }
        }
        writeln!(f, "Cache: {}", if self.cache_hit { "HIT" } else { "MISS" })?;
        writeln!(f, "Key: {}", self.structural_key)?;
        writeln!(f, "Result: {}", self.result_shape)?;
        Ok(())
    }
}
