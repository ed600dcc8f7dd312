//! Statement template cache
//!
//! One `StatementCache` per collection, created with an injected capacity and
//! passed to the plan builder. There is no process-wide cache.

mod statement_cache;

pub use statement_cache::{CacheStats, CompiledTemplate, StatementCache, StructuralKey};
