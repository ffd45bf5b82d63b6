use std::any::Any;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::context::Context;
use crate::driver::memory::database::DatabaseState;
use crate::driver::memory::store::{Change, CollectionData};
use crate::driver::SessionProvider;
use crate::errors::{ErrorKind, RepoError, RepoResult, TRANSIENT_TRANSACTION_ERROR};
use crate::options::{SessionOptions, TransactionOptions};

// Private copy of one collection taken on first access in a transaction.
struct Snapshot {
    base_version: u64,
    data: CollectionData,
    dirty: bool,
}

struct TransactionState {
    snapshots: BTreeMap<String, Snapshot>,
    pending: Vec<(String, Change)>,
    options: TransactionOptions,
}

/// Session of the in-memory driver.
///
/// Transactions run on copy-on-write snapshots: the first access to a
/// collection copies it, later reads and writes in the transaction see only
/// that copy, and commit installs the copies atomically. A commit fails with
/// a [`TRANSIENT_TRANSACTION_ERROR`] labelled error when another writer
/// changed one of the written collections since its snapshot was taken.
pub struct InMemorySession {
    id: String,
    state: Arc<DatabaseState>,
    defaults: Option<TransactionOptions>,
    transaction: Mutex<Option<TransactionState>>,
    ended: AtomicBool,
}

impl InMemorySession {
    pub(crate) fn new(state: Arc<DatabaseState>, options: Option<SessionOptions>) -> InMemorySession {
        InMemorySession {
            id: uuid::Uuid::new_v4().to_string(),
            state,
            defaults: options.and_then(|o| o.default_transaction_options),
            transaction: Mutex::new(None),
            ended: AtomicBool::new(false),
        }
    }

    pub(crate) fn belongs_to(&self, state: &Arc<DatabaseState>) -> bool {
        Arc::ptr_eq(&self.state, state)
    }

    /// Options of the open transaction.
    pub fn transaction_options(&self) -> Option<TransactionOptions> {
        self.transaction.lock().as_ref().map(|t| t.options.clone())
    }

    /// Runs `f` on the transaction's snapshot of `collection`.
    ///
    /// Changes `f` reports are held back until commit.
    pub(crate) fn with_snapshot<R>(
        &self,
        collection: &str,
        f: impl FnOnce(&mut CollectionData, &mut Vec<Change>) -> RepoResult<R>,
    ) -> RepoResult<R> {
        let mut guard = self.transaction.lock();
        let transaction = guard
            .as_mut()
            .ok_or_else(|| RepoError::new("no transaction in progress", ErrorKind::TransactionError))?;

        let snapshot = transaction
            .snapshots
            .entry(collection.to_string())
            .or_insert_with(|| {
                let (data, base_version) = match self.state.existing(collection) {
                    Some(live) => {
                        let live = live.lock();
                        (live.clone(), live.version)
                    }
                    None => (CollectionData::new(&self.state.namespace(collection)), 0),
                };
                Snapshot {
                    base_version,
                    data,
                    dirty: false,
                }
            });

        let version = snapshot.data.version;
        let mut changes = Vec::new();
        let result = f(&mut snapshot.data, &mut changes);
        if snapshot.data.version != version {
            snapshot.dirty = true;
        }
        transaction
            .pending
            .extend(changes.into_iter().map(|change| (collection.to_string(), change)));
        result
    }

    fn commit(&self, transaction: TransactionState) -> RepoResult<()> {
        let written: Vec<(String, Snapshot)> = transaction
            .snapshots
            .into_iter()
            .filter(|(_, snapshot)| snapshot.dirty)
            .collect();
        let handles: Vec<_> = written
            .iter()
            .map(|(name, _)| self.state.get_or_create(name))
            .collect();

        // snapshots come out of a BTreeMap, so locks are taken in name order
        let mut guards: Vec<MutexGuard<CollectionData>> = handles.iter().map(|h| h.lock()).collect();
        for ((name, snapshot), live) in written.iter().zip(guards.iter()) {
            if live.version != snapshot.base_version {
                log::warn!(
                    "write conflict on {} in session {}, transaction aborted",
                    self.state.namespace(name),
                    self.id
                );
                return Err(RepoError::new(
                    &format!(
                        "write conflict: {} was modified by a concurrent operation",
                        self.state.namespace(name)
                    ),
                    ErrorKind::TransactionError,
                )
                .with_label(TRANSIENT_TRANSACTION_ERROR));
            }
        }
        for ((_, snapshot), live) in written.into_iter().zip(guards.iter_mut()) {
            let version = live.version + 1;
            **live = snapshot.data;
            live.version = version;
        }
        for (collection, change) in transaction.pending {
            self.state.feed.publish(&collection, vec![change]);
        }
        drop(guards);
        Ok(())
    }
}

impl SessionProvider for InMemorySession {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn start_transaction(&self, ctx: &Context, options: Option<TransactionOptions>) -> RepoResult<()> {
        ctx.check()?;
        if self.ended.load(Ordering::Acquire) {
            return Err(RepoError::new("session has ended", ErrorKind::TransactionError));
        }
        let mut transaction = self.transaction.lock();
        if transaction.is_some() {
            return Err(RepoError::new("transaction already in progress", ErrorKind::TransactionError));
        }
        log::debug!("starting transaction on session {}", self.id);
        *transaction = Some(TransactionState {
            snapshots: BTreeMap::new(),
            pending: Vec::new(),
            options: options.or_else(|| self.defaults.clone()).unwrap_or_default(),
        });
        Ok(())
    }

    fn commit_transaction(&self, ctx: &Context) -> RepoResult<()> {
        ctx.check()?;
        let transaction = self
            .transaction
            .lock()
            .take()
            .ok_or_else(|| RepoError::new("no transaction started", ErrorKind::TransactionError))?;
        log::debug!("committing transaction on session {}", self.id);
        self.commit(transaction)
    }

    fn abort_transaction(&self, _ctx: &Context) -> RepoResult<()> {
        match self.transaction.lock().take() {
            Some(_) => {
                log::debug!("aborted transaction on session {}", self.id);
                Ok(())
            }
            None => Err(RepoError::new("no transaction started", ErrorKind::TransactionError)),
        }
    }

    fn in_transaction(&self) -> bool {
        self.transaction.lock().is_some()
    }

    fn end_session(&self) {
        if !self.ended.swap(true, Ordering::AcqRel) {
            self.transaction.lock().take();
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
