//! Filter AST
//!
//! Every filter, whether built with the typed constructors below or parsed
//! from JSON, ends up as a `FilterNode` tree. Downstream stages only ever see
//! this tree.

use std::fmt::Write as _;

use serde_json::Value;

/// Field-level operator with its operand
#[derive(Debug, Clone, PartialEq)]
pub enum FieldOperator {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Exists(bool),
    /// SQL LIKE pattern, case-sensitive
    Like(String),
    /// SQL LIKE pattern, ASCII case-insensitive
    ILike(String),
    Contains(String),
    StartsWith(String),
    EndsWith(String),
    /// Array contains every listed value
    All(Vec<Value>),
    /// Array length
    Size(u64),
    /// Some array element matches the nested filter (paths relative to the element)
    ElemMatch(Box<FilterNode>),
}

impl FieldOperator {
    /// Operator name as written in the JSON filter language
    pub fn op_name(&self) -> &'static str {
        match self {
            FieldOperator::Eq(_) => "$eq",
            FieldOperator::Ne(_) => "$ne",
            FieldOperator::Gt(_) => "$gt",
            FieldOperator::Gte(_) => "$gte",
            FieldOperator::Lt(_) => "$lt",
            FieldOperator::Lte(_) => "$lte",
            FieldOperator::In(_) => "$in",
            FieldOperator::Nin(_) => "$nin",
            FieldOperator::Exists(_) => "$exists",
            FieldOperator::Like(_) => "$like",
            FieldOperator::ILike(_) => "$ilike",
            FieldOperator::Contains(_) => "$contains",
            FieldOperator::StartsWith(_) => "$startsWith",
            FieldOperator::EndsWith(_) => "$endsWith",
            FieldOperator::All(_) => "$all",
            FieldOperator::Size(_) => "$size",
            FieldOperator::ElemMatch(_) => "$elemMatch",
        }
    }

    /// Returns true for `$gt`, `$gte`, `$lt`, `$lte`
    pub fn is_ordering(&self) -> bool {
        matches!(
            self,
            FieldOperator::Gt(_) | FieldOperator::Gte(_) | FieldOperator::Lt(_) | FieldOperator::Lte(_)
        )
    }

    /// Writes the literal-free shape of the operator.
    ///
    /// Anything that changes the SQL text is part of the shape: null-ness of
    /// operands, list arity, the `$exists` flag, nested filters.
    fn write_shape(&self, out: &mut String) {
        out.push_str(self.op_name());
        match self {
            FieldOperator::Eq(v) | FieldOperator::Ne(v) => {
                out.push_str(if v.is_null() { "(null)" } else { "(?)" });
            }
            FieldOperator::In(values) | FieldOperator::Nin(values) | FieldOperator::All(values) => {
                // Arity and null positions both change the emitted SQL
                out.push('(');
                for value in values {
                    out.push(if value.is_null() { 'n' } else { '?' });
                }
                out.push(')');
            }
            FieldOperator::Exists(flag) => {
                let _ = write!(out, "({})", flag);
            }
            FieldOperator::ElemMatch(inner) => {
                out.push('(');
                inner.write_shape(out);
                out.push(')');
            }
            _ => out.push_str("(?)"),
        }
    }
}

/// Recursive filter expression
#[derive(Debug, Clone, PartialEq)]
pub enum FilterNode {
    Condition { path: String, op: FieldOperator },
    And(Vec<FilterNode>),
    Or(Vec<FilterNode>),
    Nor(Vec<FilterNode>),
    Not(Box<FilterNode>),
}

impl Default for FilterNode {
    fn default() -> Self {
        FilterNode::all()
    }
}

impl FilterNode {
    /// Matches every document
    pub fn all() -> Self {
        FilterNode::And(Vec::new())
    }

    pub fn condition(path: impl Into<String>, op: FieldOperator) -> Self {
        FilterNode::Condition {
            path: path.into(),
            op,
        }
    }

    pub fn eq(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::condition(path, FieldOperator::Eq(value.into()))
    }

    pub fn ne(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::condition(path, FieldOperator::Ne(value.into()))
    }

    pub fn gt(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::condition(path, FieldOperator::Gt(value.into()))
    }

    pub fn gte(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::condition(path, FieldOperator::Gte(value.into()))
    }

    pub fn lt(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::condition(path, FieldOperator::Lt(value.into()))
    }

    pub fn lte(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::condition(path, FieldOperator::Lte(value.into()))
    }

    pub fn is_in<V: Into<Value>>(path: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Self::condition(
            path,
            FieldOperator::In(values.into_iter().map(Into::into).collect()),
        )
    }

    pub fn not_in<V: Into<Value>>(
        path: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::condition(
            path,
            FieldOperator::Nin(values.into_iter().map(Into::into).collect()),
        )
    }

    pub fn exists(path: impl Into<String>, exists: bool) -> Self {
        Self::condition(path, FieldOperator::Exists(exists))
    }

    pub fn like(path: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::condition(path, FieldOperator::Like(pattern.into()))
    }

    pub fn ilike(path: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::condition(path, FieldOperator::ILike(pattern.into()))
    }

    pub fn contains(path: impl Into<String>, text: impl Into<String>) -> Self {
        Self::condition(path, FieldOperator::Contains(text.into()))
    }

    pub fn starts_with(path: impl Into<String>, text: impl Into<String>) -> Self {
        Self::condition(path, FieldOperator::StartsWith(text.into()))
    }

    pub fn ends_with(path: impl Into<String>, text: impl Into<String>) -> Self {
        Self::condition(path, FieldOperator::EndsWith(text.into()))
    }

    pub fn all_of<V: Into<Value>>(path: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Self::condition(
            path,
            FieldOperator::All(values.into_iter().map(Into::into).collect()),
        )
    }

    pub fn size(path: impl Into<String>, len: u64) -> Self {
        Self::condition(path, FieldOperator::Size(len))
    }

    pub fn elem_match(path: impl Into<String>, inner: FilterNode) -> Self {
        Self::condition(path, FieldOperator::ElemMatch(Box::new(inner)))
    }

    pub fn and(children: Vec<FilterNode>) -> Self {
        FilterNode::And(children)
    }

    pub fn or(children: Vec<FilterNode>) -> Self {
        FilterNode::Or(children)
    }

    pub fn nor(children: Vec<FilterNode>) -> Self {
        FilterNode::Nor(children)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(child: FilterNode) -> Self {
        FilterNode::Not(Box::new(child))
    }

    /// Appends the structural (literal-free) shape of the tree
    pub fn write_shape(&self, out: &mut String) {
        match self {
            FilterNode::Condition { path, op } => {
                out.push('{');
                out.push_str(path);
                out.push(':');
                op.write_shape(out);
                out.push('}');
            }
            FilterNode::And(children) => write_group(out, "and", children),
            FilterNode::Or(children) => write_group(out, "or", children),
            FilterNode::Nor(children) => write_group(out, "nor", children),
            FilterNode::Not(child) => {
                out.push_str("not[");
                child.write_shape(out);
                out.push(']');
            }
        }
    }

    /// Structural shape as a string
    pub fn shape(&self) -> String {
        let mut out = String::new();
        self.write_shape(&mut out);
        out
    }
}

fn write_group(out: &mut String, name: &str, children: &[FilterNode]) {
    out.push_str(name);
    out.push('[');
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        child.write_shape(out);
    }
    out.push(']');
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }

    pub fn reversed(&self) -> Self {
        match self {
            SortDirection::Asc => SortDirection::Desc,
            SortDirection::Desc => SortDirection::Asc,
        }
    }
}

/// One sort key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub field: String,
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}
