use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::Trace;

/// HTTP header used to propagate the request id to backends.
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Cancellation scope, deadline and identity for one request.
///
/// A context is cheap to clone; clones share the request id, the [`Trace`]
/// and the cancellation signal. [`RequestContext::child_with_timeout`]
/// derives a narrower scope: cancelling the parent cancels the child, and
/// the child's deadline never extends past the parent's.
#[derive(Debug, Clone)]
pub struct RequestContext {
    id: Uuid,
    trace: Arc<Trace>,
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestContext {
    /// A fresh root context with no deadline.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            trace: Arc::new(Trace::new()),
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    /// Cancel this context and every child derived from it.
    pub fn cancel(&self) {
        self.token.cancel()
    }

    /// Derive a child scope bounded by `timeout` from now.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) => existing.min(candidate),
            None => candidate,
        };

        Self {
            id: self.id,
            trace: Arc::clone(&self.trace),
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the context is already cancelled or past its deadline.
    pub fn is_done(&self) -> bool {
        if self.token.is_cancelled() {
            return true;
        }
        matches!(self.deadline, Some(d) if Instant::now() >= d)
    }

    /// Resolves once the context is cancelled or its deadline passes.
    ///
    /// A context without a deadline only resolves on cancellation.
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }
}
