use std::fmt::{Debug, Formatter};
use std::ops::Deref;
use std::sync::Arc;

use crate::context::Context;
use crate::driver::{Collection, Session};
use crate::errors::RepoResult;
use crate::options::SessionOptions;
use crate::repository::TransactionRunner;

/// Driver side of a named logical database.
pub trait DatabaseProvider: Send + Sync {
    fn name(&self) -> String;

    /// Returns a handle to the named collection. No round-trip is made; the
    /// collection is created by the store on first write.
    fn collection(&self, name: &str) -> Collection;

    fn list_collection_names(&self, ctx: &Context) -> RepoResult<Vec<String>>;

    /// Opens a session on the client owning this database.
    fn start_session(&self, ctx: &Context, options: Option<SessionOptions>) -> RepoResult<Session>;

    /// Liveness check of the store.
    fn ping(&self, ctx: &Context) -> RepoResult<()>;

    /// Removes the database with all of its collections.
    fn drop_database(&self, ctx: &Context) -> RepoResult<()>;
}

/// Shared handle of a [`DatabaseProvider`].
///
/// A `Database` is what a connection establisher returns. It is cheap to
/// clone and safe to share between threads; the connection pool behind it
/// lives as long as any clone does.
#[derive(Clone)]
pub struct Database {
    inner: Arc<dyn DatabaseProvider>,
}

impl Database {
    pub fn new<T: DatabaseProvider + 'static>(inner: T) -> Self {
        Database { inner: Arc::new(inner) }
    }

    /// Runs `unit_of_work` inside a transaction on a fresh session.
    ///
    /// See [`TransactionRunner`] for the commit, abort and retry rules.
    pub fn with_transaction<R, F>(
        &self,
        ctx: &Context,
        unit_of_work: F,
        options: impl Into<Option<SessionOptions>>,
    ) -> RepoResult<R>
    where
        F: FnMut(&Context) -> RepoResult<R>,
    {
        TransactionRunner::new(self.clone(), options.into()).run(ctx, unit_of_work)
    }
}

impl Debug for Database {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").field("name", &self.inner.name()).finish()
    }
}

impl Deref for Database {
    type Target = Arc<dyn DatabaseProvider>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
