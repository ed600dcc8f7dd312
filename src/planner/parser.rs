//! JSON filter language → `FilterNode`
//!
//! ```json
//! { "status": "active",
//!   "$or": [ { "name": "Alice" }, { "age": { "$gt": 40 } } ],
//!   "tags": { "$all": ["a", "b"] } }
//! ```
//!
//! Object keys are field paths or `$and`/`$or`/`$nor`/`$not`. A field value
//! is a literal (implicit `$eq`) or an object made only of `$operator` keys.
//! Several keys at one level are combined with AND, in written order.

use serde_json::{Map, Value};

use super::ast::{FieldOperator, FilterNode};
use crate::error::{QueryError, QueryResult};

/// Parses a JSON filter document
pub fn parse_filter(filter: &Value) -> QueryResult<FilterNode> {
    match filter {
        Value::Object(map) => parse_object(map),
        Value::Null => Ok(FilterNode::all()),
        other => Err(QueryError::translation(format!(
            "filter must be an object, got {}",
            other
        ))),
    }
}

/// Anything a collection operation accepts as a filter
pub trait IntoFilter {
    fn into_filter(self) -> QueryResult<FilterNode>;
}

impl IntoFilter for FilterNode {
    fn into_filter(self) -> QueryResult<FilterNode> {
        Ok(self)
    }
}

impl IntoFilter for &FilterNode {
    fn into_filter(self) -> QueryResult<FilterNode> {
        Ok(self.clone())
    }
}

impl IntoFilter for Value {
    fn into_filter(self) -> QueryResult<FilterNode> {
        parse_filter(&self)
    }
}

impl IntoFilter for &Value {
    fn into_filter(self) -> QueryResult<FilterNode> {
        parse_filter(self)
    }
}

fn parse_object(map: &Map<String, Value>) -> QueryResult<FilterNode> {
    let mut clauses = Vec::with_capacity(map.len());
    for (key, value) in map {
        clauses.push(parse_clause(key, value)?);
    }
    Ok(collapse(clauses))
}

/// A single clause stays unwrapped; several become an AND
fn collapse(mut clauses: Vec<FilterNode>) -> FilterNode {
    if clauses.len() == 1 {
        clauses.remove(0)
    } else {
        FilterNode::And(clauses)
    }
}

fn parse_clause(key: &str, value: &Value) -> QueryResult<FilterNode> {
    match key {
        "$and" => Ok(FilterNode::And(parse_list(key, value)?)),
        "$or" => Ok(FilterNode::Or(parse_list(key, value)?)),
        "$nor" => Ok(FilterNode::Nor(parse_list(key, value)?)),
        "$not" => match value {
            Value::Object(map) => Ok(FilterNode::not(parse_object(map)?)),
            _ => Err(QueryError::translation("$not expects a filter object")),
        },
        k if k.starts_with('$') => Err(QueryError::translation(format!(
            "unknown top-level operator '{}'",
            k
        ))),
        path => parse_field(path, value),
    }
}

fn parse_list(key: &str, value: &Value) -> QueryResult<Vec<FilterNode>> {
    let items = value
        .as_array()
        .ok_or_else(|| QueryError::translation(format!("{} expects an array", key)))?;
    items.iter().map(parse_filter_strict).collect()
}

fn parse_filter_strict(value: &Value) -> QueryResult<FilterNode> {
    match value {
        Value::Object(map) => parse_object(map),
        other => Err(QueryError::translation(format!(
            "expected a filter object, got {}",
            other
        ))),
    }
}

/// Whether an object is an operator object (`{ "$gt": 1 }`) rather than a literal
fn is_operator_object(map: &Map<String, Value>) -> QueryResult<bool> {
    let dollar = map.keys().filter(|k| k.starts_with('$')).count();
    if dollar == 0 {
        return Ok(false);
    }
    if dollar != map.len() {
        return Err(QueryError::translation(
            "cannot mix $operators and plain keys in one field object",
        ));
    }
    Ok(true)
}

fn parse_field(path: &str, value: &Value) -> QueryResult<FilterNode> {
    match value {
        Value::Object(map) if is_operator_object(map)? => {
            let conditions = parse_operators(path, map)?;
            Ok(collapse(conditions))
        }
        literal => Ok(FilterNode::eq(path, literal.clone())),
    }
}

fn parse_operators(path: &str, map: &Map<String, Value>) -> QueryResult<Vec<FilterNode>> {
    let mut conditions = Vec::with_capacity(map.len());
    for (op, operand) in map {
        if op == "$not" {
            let inner = match operand {
                Value::Object(inner) if is_operator_object(inner)? => {
                    parse_operators(path, inner)?
                }
                _ => {
                    return Err(QueryError::translation(format!(
                        "field-level $not on '{}' expects an operator object",
                        path
                    )))
                }
            };
            conditions.push(FilterNode::not(collapse(inner)));
            continue;
        }
        conditions.push(FilterNode::condition(path, parse_operator(path, op, operand)?));
    }
    Ok(conditions)
}

fn parse_operator(path: &str, op: &str, operand: &Value) -> QueryResult<FieldOperator> {
    let operator = match op {
        "$eq" => FieldOperator::Eq(operand.clone()),
        "$ne" => FieldOperator::Ne(operand.clone()),
        "$gt" => FieldOperator::Gt(scalar(path, op, operand)?),
        "$gte" => FieldOperator::Gte(scalar(path, op, operand)?),
        "$lt" => FieldOperator::Lt(scalar(path, op, operand)?),
        "$lte" => FieldOperator::Lte(scalar(path, op, operand)?),
        "$in" => FieldOperator::In(list(path, op, operand)?),
        "$nin" => FieldOperator::Nin(list(path, op, operand)?),
        "$all" => FieldOperator::All(list(path, op, operand)?),
        "$exists" => FieldOperator::Exists(
            operand
                .as_bool()
                .ok_or_else(|| operand_error(path, op, "a boolean"))?,
        ),
        "$like" => FieldOperator::Like(text(path, op, operand)?),
        "$ilike" => FieldOperator::ILike(text(path, op, operand)?),
        "$contains" => FieldOperator::Contains(text(path, op, operand)?),
        "$startsWith" => FieldOperator::StartsWith(text(path, op, operand)?),
        "$endsWith" => FieldOperator::EndsWith(text(path, op, operand)?),
        "$size" => FieldOperator::Size(
            operand
                .as_u64()
                .ok_or_else(|| operand_error(path, op, "a non-negative integer"))?,
        ),
        "$elemMatch" => FieldOperator::ElemMatch(Box::new(parse_elem_match(path, operand)?)),
        unknown => {
            return Err(QueryError::translation(format!(
                "unknown operator '{}' on '{}'",
                unknown, path
            )))
        }
    };
    Ok(operator)
}

/// `$elemMatch` takes either operators applied to the element itself
/// (`{ "$gte": 80 }`) or a filter over the element's fields.
fn parse_elem_match(path: &str, operand: &Value) -> QueryResult<FilterNode> {
    let map = operand
        .as_object()
        .ok_or_else(|| operand_error(path, "$elemMatch", "an object"))?;
    let logical = ["$and", "$or", "$nor"];
    let element_ops = !map.is_empty()
        && map
            .keys()
            .all(|k| k.starts_with('$') && !logical.contains(&k.as_str()));
    if element_ops {
        Ok(collapse(parse_operators("", map)?))
    } else {
        parse_object(map)
    }
}

fn scalar(path: &str, op: &str, operand: &Value) -> QueryResult<Value> {
    match operand {
        Value::Number(_) | Value::String(_) => Ok(operand.clone()),
        _ => Err(operand_error(path, op, "a number or string")),
    }
}

fn list(path: &str, op: &str, operand: &Value) -> QueryResult<Vec<Value>> {
    operand
        .as_array()
        .cloned()
        .ok_or_else(|| operand_error(path, op, "an array"))
}

fn text(path: &str, op: &str, operand: &Value) -> QueryResult<String> {
    operand
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| operand_error(path, op, "a string"))
}

fn operand_error(path: &str, op: &str, expected: &str) -> QueryError {
    QueryError::translation(format!("{} on '{}' expects {}", op, path, expected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_literal_is_implicit_eq() {
        let node = parse_filter(&json!({"name": "Alice"})).unwrap();
        assert_eq!(node, FilterNode::eq("name", "Alice"));
    }

    #[test]
    fn test_empty_filter_matches_all() {
        assert_eq!(parse_filter(&json!({})).unwrap(), FilterNode::And(vec![]));
        assert_eq!(parse_filter(&Value::Null).unwrap(), FilterNode::all());
    }

    #[test]
    fn test_multiple_operators_are_and() {
        let node = parse_filter(&json!({"age": {"$gte": 30, "$lte": 40}})).unwrap();
        assert_eq!(
            node,
            FilterNode::and(vec![FilterNode::gte("age", 30), FilterNode::lte("age", 40)])
        );
    }

    #[test]
    fn test_logical_operators() {
        let node = parse_filter(&json!({
            "$or": [{"name": "Alice"}, {"age": {"$gt": 40}}],
            "status": "active"
        }))
        .unwrap();
        assert_eq!(
            node,
            FilterNode::and(vec![
                FilterNode::or(vec![FilterNode::eq("name", "Alice"), FilterNode::gt("age", 40)]),
                FilterNode::eq("status", "active"),
            ])
        );
    }

    #[test]
    fn test_field_level_not() {
        let node = parse_filter(&json!({"age": {"$not": {"$gt": 5}}})).unwrap();
        assert_eq!(node, FilterNode::not(FilterNode::gt("age", 5)));
    }

    #[test]
    fn test_elem_match_forms() {
        let on_fields = parse_filter(&json!({"items": {"$elemMatch": {"sku": "a", "qty": {"$gt": 1}}}}))
            .unwrap();
        assert_eq!(
            on_fields,
            FilterNode::elem_match(
                "items",
                FilterNode::and(vec![FilterNode::eq("sku", "a"), FilterNode::gt("qty", 1)])
            )
        );

        let on_element = parse_filter(&json!({"scores": {"$elemMatch": {"$gte": 80}}})).unwrap();
        assert_eq!(
            on_element,
            FilterNode::elem_match("scores", FilterNode::gte("", 80))
        );
    }

    #[test]
    fn test_literal_object_is_eq() {
        let node = parse_filter(&json!({"meta": {"a": 1}})).unwrap();
        assert_eq!(node, FilterNode::eq("meta", json!({"a": 1})));
    }

    #[test]
    fn test_malformed_filters_rejected() {
        assert!(parse_filter(&json!([1, 2])).is_err());
        assert!(parse_filter(&json!({"$where": "1"})).is_err());
        assert!(parse_filter(&json!({"age": {"$between": [1, 2]}})).is_err());
        assert!(parse_filter(&json!({"age": {"$gt": 1, "plain": 2}})).is_err());
        assert!(parse_filter(&json!({"tags": {"$in": "a"}})).is_err());
        assert!(parse_filter(&json!({"tags": {"$size": -1}})).is_err());
        assert!(parse_filter(&json!({"a": {"$exists": "yes"}})).is_err());
        assert!(parse_filter(&json!({"$or": {"a": 1}})).is_err());
        assert!(parse_filter(&json!({"age": {"$gt": [1]}})).is_err());
    }
}
