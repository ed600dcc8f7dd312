//! Execution subsystem
//!
//! Wraps every storage call in a retry/cancellation envelope and maps
//! storage failures onto the error taxonomy.
//!
//! # Attempt lifecycle (strict order)
//!
//! 1. Check the cancellation signal
//! 2. Lock the connection and run one attempt (writes inside a transaction)
//! 3. On success, release the lock and return
//! 4. On a transient failure, consult the resolved retry policy
//! 5. Wait out the backoff, racing it against the cancellation signal
//!
//! Only `TransientStorage` errors are ever retried.

mod cancel;
mod executor;
mod result;
mod retry;
pub mod storage;
mod transaction;

pub use cancel::CancellationSignal;
pub use executor::{ExecutionContext, QueryExecutor};
pub use result::{BatchItemError, DeleteResult, InsertManyResult, InsertOneResult, UpdateResult};
pub use retry::{AttemptContext, AttemptPredicate, FailedAttemptHook, RetryOptions, RetrySetting};
pub use transaction::{TransactionGuard, TransactionMode};
