//! Owned, cancellable timer handles
//!
//! Every pending delay in the game (entity expiry, miss timeout, the
//! super-fraudster appearance, the session limit) is held as a
//! `PendingTimer`. Dropping or replacing the handle aborts the underlying
//! task, so a superseded timer can never fire a stale event after a state
//! transition.

use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

/// Handle to an event scheduled for future delivery.
#[derive(Debug)]
pub struct PendingTimer {
    handle: JoinHandle<()>,
}

impl PendingTimer {
    /// Delivers `event` on `tx` after `delay`, unless cancelled first.
    pub fn schedule<E>(delay: Duration, tx: UnboundedSender<E>, event: E) -> Self
    where
        E: Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(event);
        });
        Self { handle }
    }

    /// Explicit cancellation; equivalent to dropping the handle.
    pub fn cancel(self) {
        self.handle.abort();
    }
}

impl Drop for PendingTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
