//! Database and collection handles
//!
//! `Database` owns the SQLite connection, the metrics registry and the
//! database-level configuration. `Collection` is the public query surface:
//! every operation translates, plans and executes through the subsystems
//! below it.
//!
//! # Retry resolution
//!
//! Operation options override collection options, which override the
//! database configuration. `Inherit` defers to the next scope; `Disabled`
//! stops the search with a single attempt.

mod collection;
mod database;
mod id;

pub use collection::{Collection, CollectionOptions};
pub use database::Database;
pub use id::{IdGenerator, UuidGenerator};
