use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A shared, advisory cancellation flag.
///
/// Cancellation is cooperative: workers check the token at the top of
/// every poll iteration and exit at the next safe point. Nothing is
/// interrupted mid-computation. All blocking waits in this crate are
/// bounded by a poll timeout, so a canceled token is observed within one
/// poll interval.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    canceled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a new, not-yet-canceled token
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        if !self.canceled.swap(true, Ordering::SeqCst) {
            tracing::info!("cancellation requested");
        }
    }

    /// Whether cancellation has been requested
    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }
}
