use std::any::Any;
use std::fmt::{Debug, Formatter};
use std::ops::Deref;
use std::sync::Arc;

use crate::context::Context;
use crate::errors::RepoResult;
use crate::options::TransactionOptions;

/// Driver side of a client session.
///
/// A session scopes a sequence of operations and hosts at most one open
/// transaction at a time. Operations join the session when they are issued
/// with a [`Context`] bound to it.
pub trait SessionProvider: Send + Sync {
    /// Identifier of the session, unique within the process.
    fn id(&self) -> String;

    /// Opens a transaction on this session.
    ///
    /// # Arguments
    /// * `ctx` - Context of the call
    /// * `options` - Transaction options; `None` applies the session defaults
    fn start_transaction(&self, ctx: &Context, options: Option<TransactionOptions>) -> RepoResult<()>;

    /// Commits the open transaction.
    ///
    /// Errors carrying the transient or unknown-commit labels may be retried.
    fn commit_transaction(&self, ctx: &Context) -> RepoResult<()>;

    /// Discards the open transaction. Aborting with no open transaction fails.
    fn abort_transaction(&self, ctx: &Context) -> RepoResult<()>;

    fn in_transaction(&self) -> bool;

    /// Releases the session. Any open transaction is aborted.
    fn end_session(&self);

    fn as_any(&self) -> &dyn Any;
}

/// Shared handle of a [`SessionProvider`].
#[derive(Clone)]
pub struct Session {
    inner: Arc<dyn SessionProvider>,
}

impl Session {
    pub fn new<T: SessionProvider + 'static>(inner: T) -> Self {
        Session { inner: Arc::new(inner) }
    }

    /// Returns the concrete provider if it is a `T`.
    ///
    /// Drivers use it to recover their own session type from a context.
    pub fn provider_as<T: 'static>(&self) -> Option<&T> {
        self.inner.as_any().downcast_ref::<T>()
    }

    /// Returns `true` when both handles refer to the same session.
    pub fn same_as(&self, other: &Session) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Deref for Session {
    type Target = Arc<dyn SessionProvider>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl Debug for Session {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id())
            .field("in_transaction", &self.inner.in_transaction())
            .finish()
    }
}
