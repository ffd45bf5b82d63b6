use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::driver::memory::InMemoryDatabase;

/// Default name of an in-memory database.
pub const DEFAULT_DATABASE_NAME: &str = "test";

/// Default number of undelivered events a change stream buffers.
pub const DEFAULT_CHANGE_FEED_CAPACITY: usize = 1024;

#[derive(Clone)]
/// Configuration of an in-memory database.
///
/// Cloneable and thread-safe; clones share the same settings. Built through
/// [`InMemoryDatabase::with_config`].
pub struct InMemoryConfig {
    inner: Arc<InMemoryConfigInner>,
}

impl InMemoryConfig {
    pub fn new() -> InMemoryConfig {
        InMemoryConfig {
            inner: Arc::new(InMemoryConfigInner::new()),
        }
    }

    #[inline]
    pub fn database_name(&self) -> String {
        self.inner.database_name.read().clone()
    }

    #[inline]
    pub(crate) fn set_database_name(&self, name: &str) {
        *self.inner.database_name.write() = name.to_string();
    }

    /// Undelivered events buffered per change stream; `0` means unbounded.
    #[inline]
    pub fn change_feed_capacity(&self) -> usize {
        self.inner.change_feed_capacity.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_change_feed_capacity(&self, capacity: usize) {
        self.inner.change_feed_capacity.store(capacity, Ordering::Relaxed)
    }
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        InMemoryConfig::new()
    }
}

struct InMemoryConfigInner {
    database_name: RwLock<String>,
    change_feed_capacity: AtomicUsize,
}

impl InMemoryConfigInner {
    fn new() -> InMemoryConfigInner {
        InMemoryConfigInner {
            database_name: RwLock::new(DEFAULT_DATABASE_NAME.to_string()),
            change_feed_capacity: AtomicUsize::new(DEFAULT_CHANGE_FEED_CAPACITY),
        }
    }
}

/// Builder of an [`InMemoryDatabase`].
///
/// # Examples
///
/// ```rust,ignore
/// let db = InMemoryDatabase::with_config()
///     .name("shop")
///     .change_feed_capacity(64)
///     .open();
/// ```
pub struct InMemoryDatabaseBuilder {
    config: InMemoryConfig,
}

impl InMemoryDatabaseBuilder {
    pub fn new() -> InMemoryDatabaseBuilder {
        InMemoryDatabaseBuilder {
            config: InMemoryConfig::new(),
        }
    }

    pub fn name(self, name: &str) -> Self {
        self.config.set_database_name(name);
        self
    }

    pub fn change_feed_capacity(self, capacity: usize) -> Self {
        self.config.set_change_feed_capacity(capacity);
        self
    }

    pub fn config(&self) -> &InMemoryConfig {
        &self.config
    }

    pub fn open(self) -> crate::driver::Database {
        crate::driver::Database::new(InMemoryDatabase::new(self.config))
    }
}

impl Default for InMemoryDatabaseBuilder {
    fn default() -> Self {
        InMemoryDatabaseBuilder::new()
    }
}
