//! Cooperative cancellation shared by every worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cancellation state polled by workers between blocking operations.
///
/// The token only carries the flags; waking threads blocked inside
/// queues and rings is the job of [`Pipeline`](crate::pipeline::Pipeline),
/// which broadcasts `signal_shutdown` to each of them when the token
/// trips. Workers observe the wakeup through their next blocking call.
#[derive(Debug, Default)]
pub struct ShutdownToken {
    requested: AtomicBool,
    error_occurred: AtomicBool,
}

impl ShutdownToken {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Clean cancellation (Ctrl-C, natural end of stream).
    pub fn request(&self) {
        self.requested.store(true, Ordering::Release);
    }

    /// Fatal stage error: implies shutdown.
    pub fn fail(&self) {
        self.error_occurred.store(true, Ordering::Release);
        self.requested.store(true, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    pub fn error_occurred(&self) -> bool {
        self.error_occurred.load(Ordering::Acquire)
    }
}
