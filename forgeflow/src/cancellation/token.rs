//! Run cancellation token.

use std::fmt;
use std::sync::OnceLock;
use tokio::sync::Notify;

/// Signals that a run should stop.
///
/// The first call to [`cancel`](Self::cancel) wins and its reason is kept;
/// later calls are ignored. The stage runner races the current stage
/// against [`cancelled`](Self::cancelled), and the orchestrator skips every
/// stage not yet started before going to teardown.
#[derive(Default)]
pub struct CancellationToken {
    reason: OnceLock<String>,
    notify: Notify,
}

impl CancellationToken {
    /// An untriggered token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Triggers the token with `reason` unless it is already triggered.
    pub fn cancel(&self, reason: impl Into<String>) {
        if self.reason.set(reason.into()).is_ok() {
            self.notify.notify_waiters();
        }
    }

    /// Whether the token has been triggered.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.reason.get().is_some()
    }

    /// The reason given by the first `cancel` call.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.reason.get().cloned()
    }

    /// Resolves once the token is triggered; immediately if it already is.
    pub async fn cancelled(&self) {
        loop {
            // A Notified future sees notify_waiters from creation on, so it
            // must exist before the check.
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("reason", &self.reason.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_first_reason_wins() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert_eq!(token.reason(), None);

        token.cancel("interrupted");
        token.cancel("shutdown");

        assert!(token.is_cancelled());
        assert_eq!(token.reason().as_deref(), Some("interrupted"));
    }

    #[test]
    fn test_cancelled_pending_until_cancel() {
        let token = CancellationToken::new();
        let mut waiter = tokio_test::task::spawn(token.cancelled());
        tokio_test::assert_pending!(waiter.poll());

        token.cancel("stop");

        assert!(waiter.is_woken());
        tokio_test::assert_ready!(waiter.poll());
    }

    #[tokio::test]
    async fn test_wakes_waiter_on_another_task() {
        let token = Arc::new(CancellationToken::new());
        let waiter = tokio::spawn({
            let token = Arc::clone(&token);
            async move { token.cancelled().await }
        });

        tokio::task::yield_now().await;
        token.cancel("ctrl-c");

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_already_cancelled_resolves_at_once() {
        let token = CancellationToken::new();
        token.cancel("done");
        tokio::time::timeout(Duration::from_millis(50), token.cancelled())
            .await
            .unwrap();
    }
}
