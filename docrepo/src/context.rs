use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::driver::Session;
use crate::errors::{ErrorKind, RepoError, RepoResult};

/// Per-call execution context.
///
/// A `Context` carries a cancellation flag, an optional deadline and an
/// optional session binding. Every repository and driver operation accepts
/// one and checks it before doing any work, so a caller can abort a long
/// running call from another thread or bound it in time.
///
/// Contexts form a tree: a child created with [`Context::with_timeout`] or
/// [`Context::with_cancel`] observes the cancellation of its ancestors, while
/// cancelling the child leaves the parent untouched.
///
/// # Examples
///
/// ```rust,ignore
/// use std::time::Duration;
/// use docrepo::context::Context;
///
/// let ctx = Context::background().with_timeout(Duration::from_secs(5));
/// let users = repo.find(&ctx, None, None)?;
/// ```
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
    session: Option<Session>,
}

struct ContextInner {
    cancelled: AtomicBool,
    deadline: Option<Instant>,
    parent: Option<Arc<ContextInner>>,
}

impl ContextInner {
    fn is_cancelled(&self) -> bool {
        if self.cancelled.load(Ordering::Acquire) {
            return true;
        }
        match &self.parent {
            Some(parent) => parent.is_cancelled(),
            None => false,
        }
    }

    fn deadline(&self) -> Option<Instant> {
        let parent = self.parent.as_ref().and_then(|p| p.deadline());
        match (self.deadline, parent) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

impl Context {
    /// Returns a root context that is never cancelled and has no deadline.
    pub fn background() -> Context {
        Context {
            inner: Arc::new(ContextInner {
                cancelled: AtomicBool::new(false),
                deadline: None,
                parent: None,
            }),
            session: None,
        }
    }

    /// Returns a child context that can be cancelled independently.
    pub fn with_cancel(&self) -> Context {
        self.child(None)
    }

    /// Returns a child context that expires after `timeout`.
    pub fn with_timeout(&self, timeout: Duration) -> Context {
        self.child(Some(Instant::now() + timeout))
    }

    /// Returns a child context that expires at `deadline`.
    pub fn with_deadline(&self, deadline: Instant) -> Context {
        self.child(Some(deadline))
    }

    fn child(&self, deadline: Option<Instant>) -> Context {
        Context {
            inner: Arc::new(ContextInner {
                cancelled: AtomicBool::new(false),
                deadline,
                parent: Some(self.inner.clone()),
            }),
            session: self.session.clone(),
        }
    }

    /// Cancels this context and every context derived from it.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// The earliest deadline along the chain of ancestors, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline()
    }

    /// Time left before the deadline; `None` if there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline()
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Fails with [`ErrorKind::Cancelled`] when the context was cancelled or
    /// its deadline has passed.
    pub fn check(&self) -> RepoResult<()> {
        if self.is_cancelled() {
            log::debug!("Operation aborted, context cancelled");
            return Err(RepoError::new("context cancelled", ErrorKind::Cancelled));
        }
        if let Some(deadline) = self.deadline() {
            if Instant::now() >= deadline {
                log::debug!("Operation aborted, context deadline exceeded");
                return Err(RepoError::new("context deadline exceeded", ErrorKind::Cancelled));
            }
        }
        Ok(())
    }

    /// Returns a context sharing this one's cancellation, bound to `session`.
    ///
    /// Operations issued with the returned context run inside the session
    /// and, if one is open, its transaction.
    pub fn with_session(&self, session: Session) -> Context {
        Context {
            inner: self.inner.clone(),
            session: Some(session),
        }
    }

    /// Returns a context sharing this one's cancellation with no session bound.
    pub fn without_session(&self) -> Context {
        Context {
            inner: self.inner.clone(),
            session: None,
        }
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }
}

impl Default for Context {
    fn default() -> Self {
        Context::background()
    }
}

impl Debug for Context {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("cancelled", &self.is_cancelled())
            .field("deadline", &self.deadline())
            .field("session", &self.session.as_ref().map(|s| s.id()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_background_is_live() {
        let ctx = Context::background();
        assert!(ctx.check().is_ok());
        assert!(ctx.deadline().is_none());
        assert!(ctx.remaining().is_none());
        assert!(ctx.session().is_none());
    }

    #[test]
    fn test_cancel_fails_check() {
        let ctx = Context::background();
        ctx.cancel();
        let err = ctx.check().unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::Cancelled);
        assert_eq!(err.message(), "context cancelled");
    }

    #[test]
    fn test_parent_cancel_propagates_to_child() {
        let parent = Context::background();
        let child = parent.with_cancel();
        parent.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn test_child_cancel_does_not_touch_parent() {
        let parent = Context::background();
        let child = parent.with_cancel();
        child.cancel();
        assert!(!parent.is_cancelled());
        assert!(child.is_cancelled());
    }

    #[test]
    fn test_expired_deadline_fails_check() {
        let ctx = Context::background().with_deadline(Instant::now() - Duration::from_millis(1));
        let err = ctx.check().unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::Cancelled);
        assert_eq!(err.message(), "context deadline exceeded");
    }

    #[test]
    fn test_earliest_deadline_wins() {
        let outer = Context::background().with_timeout(Duration::from_millis(10));
        let inner = outer.with_timeout(Duration::from_secs(60));
        assert!(inner.remaining().unwrap() <= Duration::from_millis(10));
    }

    #[test]
    fn test_clone_shares_cancellation() {
        let ctx = Context::background();
        let clone = ctx.clone();
        clone.cancel();
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn test_default_is_background() {
        let ctx = Context::default();
        assert!(ctx.check().is_ok());
    }
}
