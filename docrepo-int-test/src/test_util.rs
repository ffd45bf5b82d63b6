use docrepo::context::Context;
use docrepo::driver::Database;
use docrepo::errors::RepoResult;
use docrepo::model::Model;
use docrepo::repository::Repository;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::Duration;

// Attempts a flaky test gets before it is reported as failed.
const ATTEMPTS: u32 = 3;

/// Runs `test` against a fresh context from `before`, retrying a failed
/// attempt after a short pause.
///
/// `after` runs after every attempt, including one that panicked, so a
/// failure never leaves state behind for the next attempt.
pub fn run_test<T, B, A>(before: B, test: T, after: A)
where
    T: Fn(TestContext) -> RepoResult<()>,
    B: Fn() -> RepoResult<TestContext>,
    A: Fn(TestContext) -> RepoResult<()>,
{
    let mut failure = String::new();
    for attempt in 1..=ATTEMPTS {
        match run_once(&before, &test, &after) {
            Ok(()) => return,
            Err(reason) => failure = reason,
        }
        if attempt < ATTEMPTS {
            eprintln!("attempt {}/{} failed: {}", attempt, ATTEMPTS, failure);
            thread::sleep(Duration::from_millis(100 * attempt as u64));
        }
    }
    panic!("test failed after {} attempts: {}", ATTEMPTS, failure);
}

fn run_once<T, B, A>(before: &B, test: &T, after: &A) -> Result<(), String>
where
    T: Fn(TestContext) -> RepoResult<()>,
    B: Fn() -> RepoResult<TestContext>,
    A: Fn(TestContext) -> RepoResult<()>,
{
    let ctx = before().map_err(|err| format!("setup failed: {}", err))?;
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| test(ctx.clone())));
    let cleanup = after(ctx);
    match outcome {
        Ok(Ok(())) => cleanup.map_err(|err| format!("cleanup failed: {}", err)),
        Ok(Err(err)) => Err(format!("{:?}", err)),
        Err(payload) => Err(panic_message(payload.as_ref())),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| message.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic without message".to_string())
}

/// A fresh database and the context the test runs its operations with.
#[derive(Clone)]
pub struct TestContext {
    db: Database,
    ctx: Context,
}

impl TestContext {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            ctx: Context::background().with_timeout(Duration::from_secs(30)),
        }
    }

    pub fn db(&self) -> Database {
        self.db.clone()
    }

    pub fn ctx(&self) -> &Context {
        &self.ctx
    }

    pub fn repository<T: Model>(&self, name: &str) -> Repository<T> {
        Repository::new(&self.db, name)
    }
}

/// A database name no other test uses.
pub fn random_database_name() -> String {
    format!("docrepo_test_{}", uuid::Uuid::new_v4().simple())
}

#[cfg(all(feature = "memory", not(feature = "mongodb")))]
pub fn create_test_context() -> RepoResult<TestContext> {
    use docrepo::driver::memory::InMemoryDatabase;

    Ok(TestContext::new(InMemoryDatabase::open(&random_database_name())))
}

/// Connects to the server at `DOCREPO_TEST_URI` (a local replica set by
/// default; transactions and change streams need one).
#[cfg(feature = "mongodb")]
pub fn create_test_context() -> RepoResult<TestContext> {
    const DEFAULT_URI: &str = "mongodb://localhost:27017/?replicaSet=rs0";

    let uri = std::env::var("DOCREPO_TEST_URI").unwrap_or_else(|_| DEFAULT_URI.to_string());
    let db = docrepo_mongodb_adapter::MongoConnector::with_config()
        .uri(&uri)
        .database(&random_database_name())
        .app_name("docrepo-int-test")
        .server_selection_timeout(Duration::from_secs(5))
        .build()?
        .connect(&Context::background())?;
    Ok(TestContext::new(db))
}

pub fn cleanup(ctx: TestContext) -> RepoResult<()> {
    if let Err(e) = ctx.db().drop_database(&Context::background()) {
        eprintln!("Warning: Failed to drop database {}: {:?}", ctx.db().name(), e);
    }
    Ok(())
}

/// Polls `check` until it holds or `timeout_ms` elapses.
pub fn wait_for<F: Fn() -> bool>(timeout_ms: u64, check: F) {
    awaitility::at_most(Duration::from_millis(timeout_ms)).until(check);
}
