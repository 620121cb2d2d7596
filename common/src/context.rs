//! Per-request context threaded through every pipeline call.
//!
//! Replaces hidden module state: the caller identity used to scope storage
//! keys, plus the cancellation token and optional deadline that every
//! provider and storage call is raced against.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{CommonError, Result};

/// Identity and lifetime of one indexing or query request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    user_id: String,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestContext {
    /// Create a context for the given user with no deadline.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Abort the request after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Share an externally owned cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// The user this request runs on behalf of.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Token that cancels this request.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Qualify a storage key with the user id: `"<userId>:<key>"`.
    pub fn scoped_key(&self, key: &str) -> String {
        format!("{}:{key}", self.user_id)
    }

    /// Fail fast if the request is already cancelled or past its deadline.
    pub fn check(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(CommonError::Cancelled);
        }
        if let Some(deadline) = self.deadline
            && Instant::now() >= deadline
        {
            return Err(CommonError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Run `fut` unless the request is cancelled or its deadline passes first.
    pub async fn guard<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        self.check()?;

        let deadline = self.deadline;
        let expired = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(CommonError::Cancelled),
            _ = expired => Err(CommonError::DeadlineExceeded),
            out = fut => Ok(out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_scoped_key() {
        let ctx = RequestContext::new("alice");
        assert_eq!(ctx.scoped_key("omni_indexes_list"), "alice:omni_indexes_list");
    }

    #[tokio::test]
    async fn test_guard_passes_through() {
        let ctx = RequestContext::new("u");
        let value = ctx.guard(async { 7 }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_guard_observes_cancellation() {
        let ctx = RequestContext::new("u");
        ctx.cancellation_token().cancel();
        let result = ctx.guard(async { 7 }).await;
        assert_eq!(result, Err(CommonError::Cancelled));
    }

    #[tokio::test]
    async fn test_guard_cancels_pending_work() {
        let ctx = RequestContext::new("u");
        let token = ctx.cancellation_token().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token.cancel();
        });
        let result = ctx.guard(std::future::pending::<()>()).await;
        assert_eq!(result, Err(CommonError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_enforces_deadline() {
        let ctx = RequestContext::new("u").with_timeout(Duration::from_secs(1));
        let result = ctx
            .guard(tokio::time::sleep(Duration::from_secs(5)))
            .await;
        assert_eq!(result, Err(CommonError::DeadlineExceeded));
        assert_eq!(ctx.check(), Err(CommonError::DeadlineExceeded));
    }
}
