//! Cooperative cancellation for blocking codec operations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::Error;

/// Cancellation signal threaded through frame encode and decode.
///
/// Cloning is cheap and yields a handle to the same signal, so one side
/// can hold the token while the connection observes it. A cancelled
/// operation leaves the connection in an indeterminate protocol state;
/// the caller is expected to close.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trips the signal. Blocking operations fail with [`Error::Cancelled`]
    /// at their next checkpoint.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub(crate) fn check(&self) -> Result<(), Error> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}
