use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};

use docrepo::context::Context;
use docrepo::driver::{Session, SessionProvider};
use docrepo::errors::{ErrorKind, RepoError, RepoResult, UNKNOWN_TRANSACTION_COMMIT_RESULT};
use docrepo::options::TransactionOptions;
use mongodb::sync::ClientSession;
use parking_lot::{Mutex, MutexGuard};

use crate::convert;
use crate::errors::store_error;

/// A driver session shared by every operation bound to it through a [`Context`].
///
/// The driver session needs exclusive access per operation, so it sits
/// behind a mutex. Whether a transaction is open is tracked here because the
/// synchronous driver session does not report it.
pub struct MongoSession {
    id: String,
    session: Mutex<ClientSession>,
    in_transaction: AtomicBool,
    ended: AtomicBool,
}

impl MongoSession {
    pub(crate) fn new(session: ClientSession) -> MongoSession {
        MongoSession {
            id: session.id().to_string(),
            session: Mutex::new(session),
            in_transaction: AtomicBool::new(false),
            ended: AtomicBool::new(false),
        }
    }

    /// Locks the driver session for one operation.
    pub(crate) fn lock(&self) -> RepoResult<MutexGuard<'_, ClientSession>> {
        if self.ended.load(Ordering::Acquire) {
            log::error!("Session {} used after it ended", self.id);
            return Err(RepoError::new("session has ended", ErrorKind::BackendError));
        }
        Ok(self.session.lock())
    }

    /// The session bound to `ctx`, if any.
    pub(crate) fn from_context(ctx: &Context) -> RepoResult<Option<&MongoSession>> {
        match ctx.session() {
            None => Ok(None),
            Some(session) => match session.provider_as::<MongoSession>() {
                Some(own) => Ok(Some(own)),
                None => {
                    log::error!("Session {} was not started by the mongodb adapter", session.id());
                    Err(RepoError::new(
                        "session was started on a different database",
                        ErrorKind::BackendError,
                    ))
                }
            },
        }
    }
}

impl SessionProvider for MongoSession {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn start_transaction(&self, ctx: &Context, options: Option<TransactionOptions>) -> RepoResult<()> {
        ctx.check()?;
        let mut session = self.lock()?;
        session
            .start_transaction()
            .with_options(convert::transaction(options))
            .run()
            .map_err(store_error)?;
        self.in_transaction.store(true, Ordering::Release);
        log::debug!("Started transaction on session {}", self.id);
        Ok(())
    }

    fn commit_transaction(&self, ctx: &Context) -> RepoResult<()> {
        ctx.check()?;
        let mut session = self.lock()?;
        match session.commit_transaction().run() {
            Ok(()) => {
                self.in_transaction.store(false, Ordering::Release);
                Ok(())
            }
            Err(err) => {
                let err = store_error(err);
                // Only an unknown outcome leaves the transaction committable.
                if !err.has_label(UNKNOWN_TRANSACTION_COMMIT_RESULT) {
                    self.in_transaction.store(false, Ordering::Release);
                }
                Err(err)
            }
        }
    }

    fn abort_transaction(&self, _ctx: &Context) -> RepoResult<()> {
        let mut session = self.lock()?;
        self.in_transaction.store(false, Ordering::Release);
        session.abort_transaction().run().map_err(store_error)
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction.load(Ordering::Acquire)
    }

    fn end_session(&self) {
        if self.ended.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.in_transaction.swap(false, Ordering::AcqRel) {
            if let Err(err) = self.session.lock().abort_transaction().run() {
                log::warn!("Failed to abort transaction while ending session {}: {}", self.id, err);
            }
        }
        log::debug!("Ended session {}", self.id);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(crate) fn new_session(session: ClientSession) -> Session {
    Session::new(MongoSession::new(session))
}
