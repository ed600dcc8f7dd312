//! Query translation subsystem
//!
//! Turns a filter tree plus options into one parameterized SQL statement.
//!
//! # Pipeline
//!
//! 1. `parser` reads the JSON filter language into a `FilterNode` tree
//!    (or callers build the tree directly)
//! 2. `resolver` maps each path to a generated column, the id column or a
//!    `json_extract` expression
//! 3. `compiler` emits the WHERE fragment; literals are always bound
//! 4. `cursor` adds the keyset predicate for cursor pagination
//! 5. `planner` assembles the statement and consults the statement cache
//!
//! Translation is deterministic: the same inputs always produce the same
//! SQL text and parameter list, which is what makes the cache transparent.

mod ast;
mod compiler;
mod cursor;
mod explain;
mod options;
mod parser;
mod planner;
mod projection;
mod resolver;

pub use ast::{FieldOperator, FilterNode, SortDirection, SortSpec};
pub use compiler::{escape_like, to_sql_value, FilterCompiler, SqlWriter, MATCH_ALL, MATCH_NONE};
pub use cursor::{keyset_predicate, lookup_boundary, sort_expressions, Boundary};
pub use explain::ExplainPlan;
pub use options::{Cursor, QueryOptions, SearchSpec};
pub use parser::{parse_filter, IntoFilter};
pub use planner::{PlanBuilder, PlanKind, QueryPlan};
pub use projection::Projection;
pub use resolver::{resolve, resolve_in_element, FieldAccess, ResolvedField};
