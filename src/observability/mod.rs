//! Observability subsystem for aerodoc
//!
//! - Structured logging (JSON lines)
//! - Typed lifecycle events
//! - Atomic operational counters
//!
//! Observability is read-only: it never changes query results.
//!
//! ```ignore
//! use aerodoc::observability::{Event, Logger, Severity};
//!
//! Logger::set_min_severity(Severity::Info);
//! Event::QueryExecuted.emit(&[("collection", "users"), ("rows", "42")]);
//! ```

mod events;
mod logger;
mod metrics;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{MetricsRegistry, MetricsSnapshot};
