//! Cooperative cancellation for in-flight fetches.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// Cloneable cancellation token.
///
/// All clones share one flag. Fetches poll [`cancelled`](Self::cancelled)
/// alongside every network await, so triggering the handle aborts the
/// request at the next suspension point.
#[derive(Debug, Clone, Default)]
pub struct CancellationHandle {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancellationHandle {
    /// Create a new, untriggered handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Trigger cancellation. Wakes every waiter exactly once.
    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    /// Whether cancellation has been triggered.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Wait until cancellation is triggered. Returns immediately if already set.
    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent cancel is not missed.
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

/// Resolves when either handle is cancelled.
pub(crate) async fn either_cancelled(a: &CancellationHandle, b: &CancellationHandle) {
    tokio::select! {
        _ = a.cancelled() => {}
        _ = b.cancelled() => {}
    }
}
