//! Cooperative cancellation shared by the controller and every worker.

use std::sync::{Arc, OnceLock};

use tokio_util::sync::CancellationToken;

use crate::error::{Result, SpeedTestError};

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: CancellationToken,
    reason: Arc<OnceLock<String>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels this token and all of its children. Only the first reason sticks.
    pub fn cancel(&self, reason: impl Into<String>) {
        let _ = self.reason.set(reason.into());
        self.inner.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.get().map(String::as_str)
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        self.inner.cancelled().await
    }

    /// A token cancelled together with this one, but also cancellable on its own.
    pub fn child(&self) -> CancelToken {
        CancelToken {
            inner: self.inner.child_token(),
            reason: Arc::default(),
        }
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(self.to_error())
        } else {
            Ok(())
        }
    }

    pub fn to_error(&self) -> SpeedTestError {
        SpeedTestError::Cancelled {
            reason: self.reason().unwrap_or("cancelled").to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_first_reason_wins() {
        let token = CancelToken::new();
        assert!(token.check().is_ok());
        token.cancel("stopped by user");
        token.cancel("reset");
        assert!(token.is_cancelled());
        assert_eq!(token.reason(), Some("stopped by user"));
        assert!(token.check().unwrap_err().is_cancelled());
    }

    #[test]
    fn test_parent_cancels_child() {
        let parent = CancelToken::new();
        let child = parent.child();
        parent.cancel("stop");
        assert!(child.is_cancelled());
        assert_eq!(child.reason(), None);
    }

    #[test]
    fn test_child_does_not_cancel_parent() {
        let parent = CancelToken::new();
        let child = parent.child();
        child.cancel("sibling failed");
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiters() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });
        token.cancel("done");
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
