//! Query plan builder
//!
//! Assembles a complete statement for one operation:
//!
//! ```text
//! WHERE (filter) [AND (search)] [AND keyset]  ORDER BY sort.., id  LIMIT ? OFFSET ?
//! ```
//!
//! Parameters are bound in that textual order: filter, search, keyset,
//! limit, offset. The plan builder is the only client of the statement
//! cache; on a hit the same traversal runs in parameter-only mode.

use std::fmt;
use std::sync::Arc;

use rusqlite::types::Value as SqlValue;

use super::ast::{FilterNode, SortDirection};
use super::compiler::{escape_like, FilterCompiler, SqlWriter};
use super::cursor::{self, Boundary};
use super::options::QueryOptions;
use super::projection::Projection;
use super::resolver;
use crate::cache::{CompiledTemplate, StatementCache, StructuralKey};
use crate::config::DateRepresentation;
use crate::error::{QueryError, QueryResult};
use crate::observability::Event;
use crate::schema::paths::{quote, ID_FIELD};
use crate::schema::ddl::DATA_COLUMN;
use crate::schema::SchemaDefinition;

/// Statement kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlanKind {
    /// Read `id, data` rows
    Select,
    /// Read a row count
    Count,
    /// Read `id, data` rows that will be rewritten
    Update,
    /// Delete matching rows
    Delete,
}

impl PlanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanKind::Select => "SELECT",
            PlanKind::Count => "COUNT",
            PlanKind::Update => "UPDATE",
            PlanKind::Delete => "DELETE",
        }
    }
}

impl fmt::Display for PlanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ready-to-run statement
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub kind: PlanKind,
    pub template: Arc<CompiledTemplate>,
    /// Values for every placeholder, in binding order
    pub params: Vec<SqlValue>,
    pub key: StructuralKey,
    pub cache_hit: bool,
    /// Applied to each decoded document after fetch
    pub projection: Projection,
    /// Rows come back in inverted order (a `before` cursor) and must be
    /// reversed to restore the requested order
    pub reverse_rows: bool,
}

impl QueryPlan {
    pub fn sql(&self) -> &str {
        &self.template.sql
    }
}

/// Keyset state actually applied to a statement
struct Keyset<'b> {
    before: bool,
    boundary: &'b Boundary,
}

/// Builds plans against one schema, optionally through a statement cache
pub struct PlanBuilder<'a> {
    schema: &'a SchemaDefinition,
    dates: DateRepresentation,
    cache: Option<&'a StatementCache>,
}

impl<'a> PlanBuilder<'a> {
    pub fn new(schema: &'a SchemaDefinition, dates: DateRepresentation) -> Self {
        Self {
            schema,
            dates,
            cache: None,
        }
    }

    /// Routes compilation through `cache`; `None` compiles every call
    pub fn with_cache(mut self, cache: Option<&'a StatementCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Builds the statement for `kind`.
    ///
    /// `boundary` is the looked-up cursor boundary, if the options carry a
    /// cursor and the boundary document still exists.
    pub fn build(
        &self,
        kind: PlanKind,
        filter: &FilterNode,
        options: &QueryOptions,
        boundary: Option<&Boundary>,
    ) -> QueryResult<QueryPlan> {
        if kind != PlanKind::Count
            && options.cursor.is_some()
            && !options.sort.is_empty()
            && options.skip.is_some()
        {
            return Err(QueryError::translation(
                "skip cannot be combined with a cursor",
            ));
        }
        if let Some(search) = &options.search {
            if search.fields.is_empty() {
                return Err(QueryError::translation("search requires at least one field"));
            }
        }
        Projection::ensure_single_mode(options)?;
        let projection = match kind {
            PlanKind::Select => Projection::from_options(options)?,
            _ => Projection::All,
        };

        let keyset = self.keyset(kind, options, boundary);
        let shape = self.shape(kind, filter, options, keyset.as_ref(), &projection);
        let key = StructuralKey::from_shape(&shape);
        let result_shape = match kind {
            PlanKind::Select => projection.shape(),
            PlanKind::Update => "rows".to_string(),
            PlanKind::Count => "count".to_string(),
            PlanKind::Delete => "changes".to_string(),
        };

        let compile = || -> QueryResult<(CompiledTemplate, Vec<SqlValue>)> {
            let mut w = SqlWriter::new();
            self.write_statement(kind, filter, options, keyset.as_ref(), &mut w)?;
            let (sql, params) = w.finish();
            let template = CompiledTemplate {
                sql: sql.unwrap_or_default(),
                param_count: params.len(),
                result_shape: result_shape.clone(),
            };
            Ok((template, params))
        };

        let (template, params, cache_hit) = match self.cache {
            Some(cache) => {
                let mut fresh = None;
                let (template, hit) = cache.get_or_compile(key, || {
                    let (template, params) = compile()?;
                    fresh = Some(params);
                    Ok(template)
                })?;
                let params = match fresh {
                    Some(params) => params,
                    None => {
                        let mut w = SqlWriter::params_only();
                        self.write_statement(kind, filter, options, keyset.as_ref(), &mut w)?;
                        w.finish().1
                    }
                };
                (template, params, hit)
            }
            None => {
                let (template, params) = compile()?;
                (Arc::new(template), params, false)
            }
        };
        debug_assert_eq!(params.len(), template.param_count);

        Event::QueryPlanned.emit(&[
            ("cache_hit", if cache_hit { "true" } else { "false" }),
            ("collection", self.schema.collection()),
            ("key", key.short().as_str()),
            ("kind", kind.as_str()),
        ]);

        Ok(QueryPlan {
            kind,
            template,
            params,
            key,
            cache_hit,
            projection,
            reverse_rows: keyset.as_ref().map_or(false, |k| k.before),
        })
    }

    fn keyset<'b>(
        &self,
        kind: PlanKind,
        options: &QueryOptions,
        boundary: Option<&'b Boundary>,
    ) -> Option<Keyset<'b>> {
        if kind == PlanKind::Count || options.sort.is_empty() {
            return None;
        }
        match (&options.cursor, boundary) {
            (Some(cursor), Some(boundary)) => Some(Keyset {
                before: cursor.is_before(),
                boundary,
            }),
            _ => None,
        }
    }

    /// Literal-free description of everything that changes the SQL text
    fn shape(
        &self,
        kind: PlanKind,
        filter: &FilterNode,
        options: &QueryOptions,
        keyset: Option<&Keyset<'_>>,
        projection: &Projection,
    ) -> String {
        let mut out = format!("{}|{}|f:", self.schema.collection(), kind.as_str());
        filter.write_shape(&mut out);

        out.push_str("|s:");
        if kind != PlanKind::Count {
            let sort: Vec<String> = options
                .sort
                .iter()
                .map(|s| format!("{}:{}", s.field, s.direction.as_str()))
                .collect();
            out.push_str(&sort.join(","));
        }
        out.push_str(&format!(
            "|l:{}|k:{}",
            u8::from(options.limit.is_some()),
            u8::from(options.skip.is_some())
        ));
        out.push_str("|c:");
        match keyset {
            Some(k) => {
                out.push_str(if k.before { "before:" } else { "after:" });
                out.push_str(&k.boundary.null_mask());
            }
            None => out.push('-'),
        }
        out.push_str("|q:");
        if let Some(search) = &options.search {
            out.push_str(&search.fields.join(","));
            out.push_str(if search.case_sensitive { ":cs" } else { ":ci" });
        }
        out.push_str("|p:");
        out.push_str(&projection.shape());
        out
    }

    fn write_statement(
        &self,
        kind: PlanKind,
        filter: &FilterNode,
        options: &QueryOptions,
        keyset: Option<&Keyset<'_>>,
        w: &mut SqlWriter,
    ) -> QueryResult<()> {
        let table = quote(self.schema.collection());
        match kind {
            PlanKind::Select | PlanKind::Update => {
                w.push_with(|| format!("SELECT {}, {} FROM {} WHERE ", ID_FIELD, DATA_COLUMN, table));
                self.write_where(filter, options, keyset, w)?;
                self.write_order_by(options, keyset, w)?;
                self.write_paging(options, w);
            }
            PlanKind::Count => {
                let paged = options.limit.is_some() || options.skip.is_some();
                if paged {
                    w.push_with(|| format!("SELECT COUNT(*) FROM (SELECT 1 FROM {} WHERE ", table));
                } else {
                    w.push_with(|| format!("SELECT COUNT(*) FROM {} WHERE ", table));
                }
                self.write_where(filter, options, None, w)?;
                if paged {
                    self.write_paging(options, w);
                    w.push(")");
                }
            }
            PlanKind::Delete => {
                let targeted =
                    options.limit.is_some() || options.skip.is_some() || !options.sort.is_empty();
                if targeted {
                    w.push_with(|| {
                        format!(
                            "DELETE FROM {0} WHERE {1} IN (SELECT {1} FROM {0} WHERE ",
                            table, ID_FIELD
                        )
                    });
                    self.write_where(filter, options, keyset, w)?;
                    self.write_order_by(options, keyset, w)?;
                    self.write_paging(options, w);
                    w.push(")");
                } else {
                    w.push_with(|| format!("DELETE FROM {} WHERE ", table));
                    self.write_where(filter, options, keyset, w)?;
                }
            }
        }
        Ok(())
    }

    fn write_where(
        &self,
        filter: &FilterNode,
        options: &QueryOptions,
        keyset: Option<&Keyset<'_>>,
        w: &mut SqlWriter,
    ) -> QueryResult<()> {
        w.push("(");
        FilterCompiler::new(self.schema, self.dates).compile(filter, w)?;
        w.push(")");

        if let Some(search) = &options.search {
            let pattern = format!("%{}%", escape_like(&search.text));
            w.push(" AND (");
            for (i, field) in search.fields.iter().enumerate() {
                if i > 0 {
                    w.push(" OR ");
                }
                let expr = resolver::resolve(self.schema, field)?.access.sql();
                if search.case_sensitive {
                    w.push_with(|| format!("{} LIKE ? ESCAPE '\\'", expr));
                } else {
                    w.push_with(|| format!("LOWER({}) LIKE LOWER(?) ESCAPE '\\'", expr));
                }
                w.bind(SqlValue::Text(pattern.clone()));
            }
            w.push(")");
        }

        if let Some(keyset) = keyset {
            let exprs = cursor::sort_expressions(self.schema, &options.sort)?;
            w.push(" AND ");
            cursor::keyset_predicate(w, &exprs, &options.sort, keyset.before, keyset.boundary);
        }
        Ok(())
    }

    /// Sort keys with the id as final tiebreaker; all flipped for a `before`
    /// cursor
    fn write_order_by(
        &self,
        options: &QueryOptions,
        keyset: Option<&Keyset<'_>>,
        w: &mut SqlWriter,
    ) -> QueryResult<()> {
        if options.sort.is_empty() {
            return Ok(());
        }
        let flip = keyset.map_or(false, |k| k.before);
        let direction = |d: SortDirection| if flip { d.reversed() } else { d };

        let exprs = cursor::sort_expressions(self.schema, &options.sort)?;
        let mut terms: Vec<String> = exprs
            .iter()
            .zip(&options.sort)
            .map(|(expr, spec)| format!("{} {}", expr, direction(spec.direction).as_str()))
            .collect();
        terms.push(format!("{} {}", ID_FIELD, direction(SortDirection::Asc).as_str()));
        w.push_with(|| format!(" ORDER BY {}", terms.join(", ")));
        Ok(())
    }

    fn write_paging(&self, options: &QueryOptions, w: &mut SqlWriter) {
        match (options.limit, options.skip) {
            (None, None) => {}
            (Some(limit), None) => {
                w.push(" LIMIT ?");
                w.bind(to_integer(limit));
            }
            (limit, Some(skip)) => {
                match limit {
                    Some(limit) => {
                        w.push(" LIMIT ?");
                        w.bind(to_integer(limit));
                    }
                    None => w.push(" LIMIT -1"),
                }
                w.push(" OFFSET ?");
                w.bind(to_integer(skip));
            }
        }
    }
}

fn to_integer(n: u64) -> SqlValue {
    SqlValue::Integer(i64::try_from(n).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::options::SearchSpec;
    use crate::planner::parser::parse_filter;
    use crate::schema::{SchemaField, SqlType};
    use serde_json::json;

    fn schema() -> SchemaDefinition {
        SchemaDefinition::builder("users")
            .field(SchemaField::new("age", SqlType::Integer).indexed())
            .field(SchemaField::new("name", SqlType::Text))
            .build()
            .unwrap()
    }

    fn build(
        kind: PlanKind,
        filter: serde_json::Value,
        options: &QueryOptions,
        cache: Option<&StatementCache>,
    ) -> QueryResult<QueryPlan> {
        let schema = schema();
        PlanBuilder::new(&schema, DateRepresentation::Iso8601)
            .with_cache(cache)
            .build(kind, &parse_filter(&filter)?, options, None)
    }

    #[test]
    fn test_select_with_sort_and_limit() {
        let options = QueryOptions::new().sort_desc("age").limit(10);
        let plan = build(PlanKind::Select, json!({"name": "Ann"}), &options, None).unwrap();
        assert_eq!(
            plan.sql(),
            "SELECT id, data FROM \"users\" WHERE (json_extract(data, '$.name') = ?) \
             ORDER BY \"idx_age\" DESC, id ASC LIMIT ?"
        );
        assert_eq!(
            plan.params,
            vec![SqlValue::Text("Ann".into()), SqlValue::Integer(10)]
        );
        assert!(!plan.cache_hit);
    }

    #[test]
    fn test_skip_without_limit() {
        let options = QueryOptions::new().skip(5);
        let plan = build(PlanKind::Select, json!({}), &options, None).unwrap();
        assert_eq!(
            plan.sql(),
            "SELECT id, data FROM \"users\" WHERE (1=1) LIMIT -1 OFFSET ?"
        );
        assert_eq!(plan.params, vec![SqlValue::Integer(5)]);
    }

    #[test]
    fn test_search_is_anded_after_filter() {
        let options = QueryOptions::new().search(SearchSpec::new("o_k", &["name", "bio"]));
        let plan = build(PlanKind::Select, json!({"age": 3}), &options, None).unwrap();
        assert_eq!(
            plan.sql(),
            "SELECT id, data FROM \"users\" WHERE (\"idx_age\" = ?) AND \
             (LOWER(json_extract(data, '$.name')) LIKE LOWER(?) ESCAPE '\\' OR \
             LOWER(json_extract(data, '$.bio')) LIKE LOWER(?) ESCAPE '\\')"
        );
        assert_eq!(
            plan.params,
            vec![
                SqlValue::Integer(3),
                SqlValue::Text("%o\\_k%".into()),
                SqlValue::Text("%o\\_k%".into())
            ]
        );
    }

    #[test]
    fn test_empty_search_fields_rejected() {
        let options = QueryOptions::new().search(SearchSpec::new("x", &[]));
        assert!(build(PlanKind::Select, json!({}), &options, None).is_err());
    }

    #[test]
    fn test_skip_with_cursor_rejected() {
        let options = QueryOptions::new().sort_asc("age").after("a").skip(1);
        let err = build(PlanKind::Select, json!({}), &options, None).unwrap_err();
        assert_eq!(err.code(), "AERO_QUERY_TRANSLATION");
    }

    #[test]
    fn test_skip_with_unsorted_cursor_is_plain_paging() {
        let options = QueryOptions::new().after("a").skip(1).limit(2);
        let plan = build(PlanKind::Select, json!({}), &options, None).unwrap();
        assert!(plan.sql().ends_with("LIMIT ? OFFSET ?"));
        assert_eq!(plan.params, vec![SqlValue::Integer(2), SqlValue::Integer(1)]);
    }

    #[test]
    fn test_projection_modes_checked_for_every_kind() {
        let options = QueryOptions::new().select(&["name"]).omit(&["age"]);
        for kind in [PlanKind::Select, PlanKind::Count, PlanKind::Update, PlanKind::Delete] {
            let err = build(kind, json!({}), &options, None).unwrap_err();
            assert_eq!(err.code(), "AERO_QUERY_TRANSLATION", "{:?}", kind);
        }
    }

    #[test]
    fn test_before_cursor_flips_order() {
        let schema = schema();
        let boundary = Boundary {
            values: vec![SqlValue::Integer(30)],
            id: "b".into(),
        };
        let options = QueryOptions::new().sort_asc("age").before("b").limit(2);
        let plan = PlanBuilder::new(&schema, DateRepresentation::Iso8601)
            .build(PlanKind::Select, &FilterNode::all(), &options, Some(&boundary))
            .unwrap();
        assert!(plan.reverse_rows);
        assert!(plan
            .sql()
            .ends_with("ORDER BY \"idx_age\" DESC, id DESC LIMIT ?"));
        // keyset params come before the limit
        assert_eq!(plan.params.len(), 4);
        assert_eq!(plan.params[3], SqlValue::Integer(2));
    }

    #[test]
    fn test_cursor_without_sort_is_ignored() {
        let schema = schema();
        let boundary = Boundary {
            values: vec![],
            id: "b".into(),
        };
        let options = QueryOptions::new().after("b");
        let plan = PlanBuilder::new(&schema, DateRepresentation::Iso8601)
            .build(PlanKind::Select, &FilterNode::all(), &options, Some(&boundary))
            .unwrap();
        assert_eq!(plan.sql(), "SELECT id, data FROM \"users\" WHERE (1=1)");
        assert!(!plan.reverse_rows);
    }

    #[test]
    fn test_count_ignores_sort_and_wraps_paging() {
        let options = QueryOptions::new().sort_asc("age");
        let plan = build(PlanKind::Count, json!({"age": {"$gt": 1}}), &options, None).unwrap();
        assert_eq!(
            plan.sql(),
            "SELECT COUNT(*) FROM \"users\" WHERE (\"idx_age\" > ?)"
        );

        let options = QueryOptions::new().limit(3);
        let plan = build(PlanKind::Count, json!({}), &options, None).unwrap();
        assert_eq!(
            plan.sql(),
            "SELECT COUNT(*) FROM (SELECT 1 FROM \"users\" WHERE (1=1) LIMIT ?)"
        );
    }

    #[test]
    fn test_delete_forms() {
        let plan = build(PlanKind::Delete, json!({"age": 1}), &QueryOptions::new(), None).unwrap();
        assert_eq!(plan.sql(), "DELETE FROM \"users\" WHERE (\"idx_age\" = ?)");

        let options = QueryOptions::new().sort_asc("age").limit(1);
        let plan = build(PlanKind::Delete, json!({}), &options, None).unwrap();
        assert_eq!(
            plan.sql(),
            "DELETE FROM \"users\" WHERE id IN (SELECT id FROM \"users\" WHERE (1=1) \
             ORDER BY \"idx_age\" ASC, id ASC LIMIT ?)"
        );
    }

    #[test]
    fn test_cache_hit_rebinds_new_literals() {
        let cache = StatementCache::new(8).unwrap();
        let first = build(PlanKind::Select, json!({"age": 1}), &QueryOptions::new(), Some(&cache)).unwrap();
        let second = build(PlanKind::Select, json!({"age": 2}), &QueryOptions::new(), Some(&cache)).unwrap();

        assert!(!first.cache_hit);
        assert!(second.cache_hit);
        assert_eq!(first.key, second.key);
        assert_eq!(first.sql(), second.sql());
        assert_eq!(second.params, vec![SqlValue::Integer(2)]);
    }

    #[test]
    fn test_null_operand_changes_key() {
        let cache = StatementCache::new(8).unwrap();
        let a = build(PlanKind::Select, json!({"name": "x"}), &QueryOptions::new(), Some(&cache)).unwrap();
        let b = build(PlanKind::Select, json!({"name": null}), &QueryOptions::new(), Some(&cache)).unwrap();
        assert_ne!(a.key, b.key);
        assert!(!b.cache_hit);
        assert!(b.params.is_empty());
    }

    #[test]
    fn test_cached_and_uncached_plans_agree() {
        let cache = StatementCache::new(8).unwrap();
        let filter = json!({"$or": [{"age": {"$in": [1, 2]}}, {"name": {"$contains": "a"}}]});
        let options = QueryOptions::new().sort_asc("name").limit(5).skip(1);

        build(PlanKind::Select, filter.clone(), &options, Some(&cache)).unwrap();
        let cached = build(PlanKind::Select, filter.clone(), &options, Some(&cache)).unwrap();
        let uncached = build(PlanKind::Select, filter, &options, None).unwrap();

        assert!(cached.cache_hit);
        assert_eq!(cached.sql(), uncached.sql());
        assert_eq!(cached.params, uncached.params);
    }

    #[test]
    fn test_translation_errors_surface_on_cache_hit() {
        let cache = StatementCache::new(8).unwrap();
        build(PlanKind::Select, json!({"age": 1}), &QueryOptions::new(), Some(&cache)).unwrap();
        let err = build(PlanKind::Select, json!({"age": "one"}), &QueryOptions::new(), Some(&cache))
            .unwrap_err();
        assert_eq!(err.code(), "AERO_QUERY_TRANSLATION");
    }
}
