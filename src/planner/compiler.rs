//! Filter compiler: `FilterNode` → parameterized SQL fragment
//!
//! Recursive descent over the tree. Literals are never inlined; each operand
//! is coerced by the declared type of its field and pushed onto the parameter
//! list in emission order.
//!
//! The same traversal runs in two modes. With SQL emission on it produces
//! the fragment and the parameters; with emission off it only collects the
//! parameters, which is how a cached template is re-bound for new literals.
//! Because both modes walk the tree identically, parameter order always
//! matches the cached SQL.

use rusqlite::types::Value as SqlValue;
use serde_json::Value;

use super::ast::{FieldOperator, FilterNode};
use super::resolver::{self, ResolvedField};
use crate::config::DateRepresentation;
use crate::document;
use crate::error::{QueryError, QueryResult};
use crate::schema::{SchemaDefinition, SqlType};

/// Tautology and contradiction fragments
pub const MATCH_ALL: &str = "1=1";
pub const MATCH_NONE: &str = "1=0";

/// Output buffer. `sql` is `None` in parameter-only mode.
#[derive(Debug)]
pub struct SqlWriter {
    sql: Option<String>,
    params: Vec<SqlValue>,
}

impl SqlWriter {
    /// Emits SQL and parameters
    pub fn new() -> Self {
        Self {
            sql: Some(String::new()),
            params: Vec::new(),
        }
    }

    /// Collects parameters only
    pub fn params_only() -> Self {
        Self {
            sql: None,
            params: Vec::new(),
        }
    }

    pub fn emits_sql(&self) -> bool {
        self.sql.is_some()
    }

    pub fn push(&mut self, text: &str) {
        if let Some(sql) = &mut self.sql {
            sql.push_str(text);
        }
    }

    /// Pushes text built lazily; skipped entirely in parameter-only mode
    pub fn push_with(&mut self, build: impl FnOnce() -> String) {
        if let Some(sql) = &mut self.sql {
            sql.push_str(&build());
        }
    }

    pub fn bind(&mut self, value: SqlValue) {
        self.params.push(value);
    }

    pub fn params(&self) -> &[SqlValue] {
        &self.params
    }

    pub fn finish(self) -> (Option<String>, Vec<SqlValue>) {
        (self.sql, self.params)
    }
}

/// Resolution scope: the document, or the current `$elemMatch` element
#[derive(Debug, Clone)]
enum Scope {
    Document,
    Element { alias: String, depth: usize },
}

impl Scope {
    fn depth(&self) -> usize {
        match self {
            Scope::Document => 0,
            Scope::Element { depth, .. } => *depth,
        }
    }
}

/// Compiles filters against one schema
pub struct FilterCompiler<'s> {
    schema: &'s SchemaDefinition,
    dates: DateRepresentation,
}

impl<'s> FilterCompiler<'s> {
    pub fn new(schema: &'s SchemaDefinition, dates: DateRepresentation) -> Self {
        Self { schema, dates }
    }

    /// Compiles `node` into `w`. An empty top-level filter is the tautology.
    pub fn compile(&self, node: &FilterNode, w: &mut SqlWriter) -> QueryResult<()> {
        self.compile_node(node, &Scope::Document, w)
    }

    /// Convenience: `(sql, params)` for a filter
    pub fn compile_to_sql(&self, node: &FilterNode) -> QueryResult<(String, Vec<SqlValue>)> {
        let mut w = SqlWriter::new();
        self.compile(node, &mut w)?;
        let (sql, params) = w.finish();
        Ok((sql.unwrap_or_default(), params))
    }

    fn compile_node(&self, node: &FilterNode, scope: &Scope, w: &mut SqlWriter) -> QueryResult<()> {
        match node {
            FilterNode::Condition { path, op } => self.compile_condition(path, op, scope, w),
            FilterNode::And(children) if children.is_empty() => {
                w.push(MATCH_ALL);
                Ok(())
            }
            FilterNode::Or(children) if children.is_empty() => {
                w.push(MATCH_NONE);
                Ok(())
            }
            FilterNode::And(children) => self.compile_group(children, " AND ", scope, w),
            FilterNode::Or(children) => self.compile_group(children, " OR ", scope, w),
            FilterNode::Nor(children) => {
                // NOT over unknown (NULL) counts as a match, like a missing field
                w.push("NOT COALESCE(");
                if children.is_empty() {
                    w.push(MATCH_NONE);
                } else {
                    self.compile_group(children, " OR ", scope, w)?;
                }
                w.push(", 0)");
                Ok(())
            }
            FilterNode::Not(child) => {
                w.push("NOT COALESCE((");
                self.compile_node(child, scope, w)?;
                w.push("), 0)");
                Ok(())
            }
        }
    }

    fn compile_group(
        &self,
        children: &[FilterNode],
        joiner: &str,
        scope: &Scope,
        w: &mut SqlWriter,
    ) -> QueryResult<()> {
        w.push("(");
        for (i, child) in children.iter().enumerate() {
            if i > 0 {
                w.push(joiner);
            }
            w.push("(");
            self.compile_node(child, scope, w)?;
            w.push(")");
        }
        w.push(")");
        Ok(())
    }

    fn resolve(&self, path: &str, scope: &Scope) -> QueryResult<ResolvedField<'s>> {
        match scope {
            Scope::Document => resolver::resolve(self.schema, path),
            Scope::Element { alias, .. } => resolver::resolve_in_element(alias, path),
        }
    }

    fn compile_condition(
        &self,
        path: &str,
        op: &FieldOperator,
        scope: &Scope,
        w: &mut SqlWriter,
    ) -> QueryResult<()> {
        let resolved = self.resolve(path, scope)?;
        self.check_operator(path, op, &resolved)?;
        let expr = resolved.access.sql();

        match op {
            FieldOperator::Eq(Value::Null) => w.push_with(|| format!("{} IS NULL", expr)),
            FieldOperator::Ne(Value::Null) => w.push_with(|| format!("{} IS NOT NULL", expr)),
            FieldOperator::Eq(v) => {
                w.push_with(|| format!("{} = ?", expr));
                w.bind(self.operand(path, &resolved, v)?);
            }
            FieldOperator::Ne(v) => {
                w.push_with(|| format!("({0} IS NULL OR {0} != ?)", expr));
                w.bind(self.operand(path, &resolved, v)?);
            }
            FieldOperator::Gt(v) => self.comparison(path, &resolved, &expr, ">", v, w)?,
            FieldOperator::Gte(v) => self.comparison(path, &resolved, &expr, ">=", v, w)?,
            FieldOperator::Lt(v) => self.comparison(path, &resolved, &expr, "<", v, w)?,
            FieldOperator::Lte(v) => self.comparison(path, &resolved, &expr, "<=", v, w)?,
            FieldOperator::In(values) => self.membership(path, &resolved, &expr, values, false, w)?,
            FieldOperator::Nin(values) => self.membership(path, &resolved, &expr, values, true, w)?,
            FieldOperator::Exists(true) => w.push_with(|| format!("{} IS NOT NULL", expr)),
            FieldOperator::Exists(false) => w.push_with(|| format!("{} IS NULL", expr)),
            FieldOperator::Like(pattern) => {
                w.push_with(|| format!("{} LIKE ?", expr));
                w.bind(SqlValue::Text(pattern.clone()));
            }
            FieldOperator::ILike(pattern) => {
                w.push_with(|| format!("LOWER({}) LIKE LOWER(?)", expr));
                w.bind(SqlValue::Text(pattern.clone()));
            }
            FieldOperator::Contains(text) => {
                w.push_with(|| format!("{} LIKE ? ESCAPE '\\'", expr));
                w.bind(SqlValue::Text(format!("%{}%", escape_like(text))));
            }
            FieldOperator::StartsWith(text) => {
                w.push_with(|| format!("{} LIKE ? ESCAPE '\\'", expr));
                w.bind(SqlValue::Text(format!("{}%", escape_like(text))));
            }
            FieldOperator::EndsWith(text) => {
                w.push_with(|| format!("{} LIKE ? ESCAPE '\\'", expr));
                w.bind(SqlValue::Text(format!("%{}", escape_like(text))));
            }
            FieldOperator::All(values) => {
                if values.is_empty() {
                    w.push(MATCH_NONE);
                    return Ok(());
                }
                let source = resolved.access.json_source();
                w.push("(");
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        w.push(" AND ");
                    }
                    if value.is_null() {
                        w.push_with(|| {
                            format!("EXISTS (SELECT 1 FROM json_each({}) WHERE value IS NULL)", source)
                        });
                    } else {
                        w.push_with(|| {
                            format!("EXISTS (SELECT 1 FROM json_each({}) WHERE value = ?)", source)
                        });
                        w.bind(to_sql_value(value));
                    }
                }
                w.push(")");
            }
            FieldOperator::Size(len) => {
                // json_array_length is 0 for scalars
                w.push_with(|| {
                    format!(
                        "({} = 'array' AND json_array_length({}) = ?)",
                        resolved.access.json_type(),
                        resolved.access.json_source()
                    )
                });
                w.bind(SqlValue::Integer(i64::try_from(*len).unwrap_or(i64::MAX)));
            }
            FieldOperator::ElemMatch(inner) => {
                let depth = scope.depth() + 1;
                let alias = format!("je{}", depth);
                w.push_with(|| {
                    format!(
                        "EXISTS (SELECT 1 FROM json_each({}) AS {} WHERE ",
                        resolved.access.json_source(),
                        alias
                    )
                });
                let inner_scope = Scope::Element { alias, depth };
                self.compile_node(inner, &inner_scope, w)?;
                w.push(")");
            }
        }
        Ok(())
    }

    /// Schema-driven operator legality
    fn check_operator(
        &self,
        path: &str,
        op: &FieldOperator,
        resolved: &ResolvedField<'_>,
    ) -> QueryResult<()> {
        let Some(sql_type) = resolved.sql_type() else {
            if matches!(resolved.access, resolver::FieldAccess::DocumentId)
                && matches!(
                    op,
                    FieldOperator::All(_) | FieldOperator::Size(_) | FieldOperator::ElemMatch(_)
                )
            {
                return Err(QueryError::translation(format!(
                    "{} cannot be applied to the document id",
                    op.op_name()
                )));
            }
            return Ok(());
        };

        let legal = match op {
            _ if op.is_ordering() => sql_type.is_orderable(),
            FieldOperator::Like(_)
            | FieldOperator::ILike(_)
            | FieldOperator::Contains(_)
            | FieldOperator::StartsWith(_)
            | FieldOperator::EndsWith(_) => matches!(sql_type, SqlType::Text | SqlType::Json),
            FieldOperator::All(_) | FieldOperator::Size(_) | FieldOperator::ElemMatch(_) => {
                sql_type == SqlType::Json
            }
            _ => true,
        };

        if legal {
            Ok(())
        } else {
            Err(QueryError::translation(format!(
                "{} is not supported on {} field '{}'",
                op.op_name(),
                sql_type.type_name(),
                resolved.display_name(path)
            )))
        }
    }

    fn comparison(
        &self,
        path: &str,
        resolved: &ResolvedField<'_>,
        expr: &str,
        sql_op: &str,
        value: &Value,
        w: &mut SqlWriter,
    ) -> QueryResult<()> {
        if !(value.is_number() || value.is_string()) {
            return Err(QueryError::translation(format!(
                "ordering operand for '{}' must be a number or string, got {}",
                path, value
            )));
        }
        w.push_with(|| format!("{} {} ?", expr, sql_op));
        w.bind(self.operand(path, resolved, value)?);
        Ok(())
    }

    fn membership(
        &self,
        path: &str,
        resolved: &ResolvedField<'_>,
        expr: &str,
        values: &[Value],
        negated: bool,
        w: &mut SqlWriter,
    ) -> QueryResult<()> {
        if values.is_empty() {
            w.push(if negated { MATCH_ALL } else { MATCH_NONE });
            return Ok(());
        }

        let has_null = values.iter().any(Value::is_null);
        let present: Vec<&Value> = values.iter().filter(|v| !v.is_null()).collect();

        if present.is_empty() {
            w.push_with(|| {
                format!("{} {}", expr, if negated { "IS NOT NULL" } else { "IS NULL" })
            });
            return Ok(());
        }

        let placeholders = vec!["?"; present.len()].join(", ");
        w.push_with(|| match (negated, has_null) {
            (false, false) => format!("{} IN ({})", expr, placeholders),
            (false, true) => format!("({0} IN ({1}) OR {0} IS NULL)", expr, placeholders),
            // Missing fields are "not in" any list
            (true, false) => format!("({0} IS NULL OR {0} NOT IN ({1}))", expr, placeholders),
            (true, true) => format!("({0} IS NOT NULL AND {0} NOT IN ({1}))", expr, placeholders),
        });
        for value in present {
            w.bind(self.operand(path, resolved, value)?);
        }
        Ok(())
    }

    /// Coerces an operand by the declared type of its field
    fn operand(&self, path: &str, resolved: &ResolvedField<'_>, value: &Value) -> QueryResult<SqlValue> {
        let mismatch = |expected: &str| {
            QueryError::translation(format!(
                "operand {} for '{}' does not match declared type {}",
                value,
                resolved.display_name(path),
                expected
            ))
        };

        match resolved.sql_type() {
            None | Some(SqlType::Json) => Ok(to_sql_value(value)),
            Some(SqlType::Date) => Ok(to_sql_value(&document::coerce_date(value, self.dates)?)),
            Some(SqlType::Boolean) => match value {
                Value::Bool(b) => Ok(SqlValue::Integer(i64::from(*b))),
                Value::Number(n) if n.as_i64() == Some(0) || n.as_i64() == Some(1) => {
                    Ok(to_sql_value(value))
                }
                _ => Err(mismatch("boolean")),
            },
            Some(SqlType::Integer) | Some(SqlType::Real) if value.is_number() => {
                Ok(to_sql_value(value))
            }
            Some(t @ SqlType::Integer) | Some(t @ SqlType::Real) => Err(mismatch(t.type_name())),
            Some(SqlType::Text) if value.is_string() => Ok(to_sql_value(value)),
            Some(SqlType::Text) => Err(mismatch("text")),
        }
    }
}

/// Converts a JSON value to the SQL value it is bound as.
///
/// Booleans become 0/1 to match what `json_extract` yields for JSON
/// booleans; arrays and objects bind as their JSON text.
pub fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Array(_) | Value::Object(_) => SqlValue::Text(value.to_string()),
    }
}

/// Escapes LIKE wildcards for use with `ESCAPE '\'`
pub fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
