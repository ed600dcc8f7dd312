//! Update language
//!
//! ```json
//! { "$set": {"profile.city": "Oslo"}, "$inc": {"visits": 1},
//!   "$push": {"tags": "new"}, "$pull": {"tags": "old"}, "$unset": {"nick": ""} }
//! ```
//!
//! A plain object without operators is shorthand for `$set`. Updates are
//! applied to the decoded document; the result is validated and written back
//! whole. The document id is immutable.

mod spec;

pub use spec::{IntoUpdate, UpdateOp, UpdateSpec};
