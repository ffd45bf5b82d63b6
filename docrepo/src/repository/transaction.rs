use std::time::{Duration, Instant};

use crate::context::Context;
use crate::driver::{Database, Session};
use crate::errors::{
    wrap_err, ErrorKind, RepoResult, TRANSIENT_TRANSACTION_ERROR, UNKNOWN_TRANSACTION_COMMIT_RESULT,
};
use crate::options::SessionOptions;

/// Runs a unit of work inside a transaction on a fresh session.
///
/// The runner opens a session, starts a transaction and calls the unit of
/// work with a [`Context`] bound to the session. It commits when the unit of
/// work returns `Ok` and aborts when it returns `Err`, handing that error back
/// unchanged.
///
/// Retries follow the usual driver rules, bounded by the retry budget of the
/// session's default transaction options (120 seconds unless set):
///
/// - an error labelled [`TRANSIENT_TRANSACTION_ERROR`], raised by the unit of
///   work or by the commit, restarts the whole transaction, so the unit of
///   work may run more than once
/// - a commit error labelled [`UNKNOWN_TRANSACTION_COMMIT_RESULT`] retries
///   only the commit
///
/// The session is ended when the runner returns, whether it succeeds, fails
/// or the unit of work panics.
pub struct TransactionRunner {
    database: Database,
    options: Option<SessionOptions>,
}

// Ends the session on every exit path, aborting a transaction left open.
struct SessionGuard {
    session: Session,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.session.in_transaction() {
            if let Err(err) = self.session.abort_transaction(&Context::background()) {
                log::warn!("failed to abort transaction on session {}: {}", self.session.id(), err);
            }
        }
        self.session.end_session();
    }
}

impl TransactionRunner {
    pub fn new(database: Database, options: Option<SessionOptions>) -> TransactionRunner {
        TransactionRunner { database, options }
    }

    fn retry_budget(&self) -> Duration {
        self.options
            .as_ref()
            .and_then(|o| o.default_transaction_options.as_ref())
            .map(|o| o.effective_retry_budget())
            .unwrap_or_else(|| crate::options::TransactionOptions::default().effective_retry_budget())
    }

    pub fn run<R, F>(&self, ctx: &Context, mut unit_of_work: F) -> RepoResult<R>
    where
        F: FnMut(&Context) -> RepoResult<R>,
    {
        ctx.check()?;
        let session = self
            .database
            .start_session(ctx, self.options.clone())
            .map_err(wrap_err("failed to start session", ErrorKind::TransactionError))?;
        let guard = SessionGuard { session };
        let session = &guard.session;

        let budget = self.retry_budget();
        let started = Instant::now();
        let within_budget = || started.elapsed() < budget;

        'transaction: loop {
            ctx.check()?;
            session
                .start_transaction(ctx, None)
                .map_err(wrap_err("failed to start transaction", ErrorKind::TransactionError))?;

            let tx_ctx = ctx.with_session(session.clone());
            let value = match unit_of_work(&tx_ctx) {
                Ok(value) => value,
                Err(err) => {
                    if session.in_transaction() {
                        if let Err(abort_err) = session.abort_transaction(ctx) {
                            log::warn!("failed to abort transaction on session {}: {}", session.id(), abort_err);
                        }
                    }
                    if err.has_label(TRANSIENT_TRANSACTION_ERROR) && within_budget() {
                        log::warn!("transient transaction error, retrying: {}", err);
                        continue 'transaction;
                    }
                    return Err(err);
                }
            };

            // the unit of work committed or aborted on its own
            if !session.in_transaction() {
                return Ok(value);
            }

            loop {
                match session.commit_transaction(ctx) {
                    Ok(()) => return Ok(value),
                    Err(err) => {
                        if err.kind() == &ErrorKind::Cancelled {
                            return Err(err);
                        }
                        if err.has_label(UNKNOWN_TRANSACTION_COMMIT_RESULT)
                            && session.in_transaction()
                            && within_budget()
                        {
                            log::warn!("unknown commit result, retrying commit: {}", err);
                            continue;
                        }
                        if err.has_label(TRANSIENT_TRANSACTION_ERROR) && within_budget() {
                            log::warn!("transient commit error, retrying transaction: {}", err);
                            if session.in_transaction() {
                                let _ = session.abort_transaction(ctx);
                            }
                            continue 'transaction;
                        }
                        return Err(wrap_err("failed to commit transaction", ErrorKind::TransactionError)(err));
                    }
                }
            }
        }
    }
}
