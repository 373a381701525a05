//! Cooperative cancellation.
//!
//! A single [`CancellationSignal`] is threaded from the top-level entry down
//! through every subagent, LLM call, and tool handler. Cancellation is
//! cooperative: tasks poll [`is_cancelled`](CancellationSignal::is_cancelled)
//! at suspension points, or await [`cancelled`](CancellationSignal::cancelled)
//! inside a `select!`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    flag: AtomicBool,
    notify: Notify,
}

/// A clonable cancellation flag shared by every task of a run tree.
///
/// Cloning is cheap; all clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationSignal {
    inner: Arc<Inner>,
}

impl CancellationSignal {
    /// Create a fresh, un-cancelled signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Trip the signal. Idempotent; wakes every task currently awaiting
    /// [`cancelled`](Self::cancelled).
    pub fn cancel(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Returns `true` once [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// Wait until the signal is tripped.
    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            let notified = self.inner.notify.notified();
            // Re-check after registering interest so a cancel between the
            // check and the await cannot be missed.
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}
