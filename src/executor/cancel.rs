//! Cooperative cancellation
//!
//! A `CancellationSignal` is observed only at checkpoints: before the first
//! attempt, before every retry, and while waiting out a backoff delay. An
//! in-flight storage call is never interrupted.

use std::sync::Arc;

use tokio::sync::watch;

/// Cloneable cancellation handle
#[derive(Debug, Clone)]
pub struct CancellationSignal {
    state: Arc<watch::Sender<bool>>,
}

impl Default for CancellationSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationSignal {
    /// Creates a signal that has not been triggered
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            state: Arc::new(tx),
        }
    }

    /// Creates a signal that is already cancelled
    pub fn cancelled() -> Self {
        let signal = Self::new();
        signal.cancel();
        signal
    }

    /// Triggers cancellation. Idempotent.
    pub fn cancel(&self) {
        self.state.send_replace(true);
    }

    /// Returns true once `cancel` has been called on any clone
    pub fn is_cancelled(&self) -> bool {
        *self.state.borrow()
    }

    /// Resolves when the signal is triggered
    pub async fn wait(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives as long as `self`, so the channel cannot close here
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}
