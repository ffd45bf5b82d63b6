use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::errors::MongoAdapterError;

/// Default time allowed for establishing a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time allowed for selecting a server before an operation fails.
pub const DEFAULT_SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration of a MongoDB connection.
///
/// `MongoConfig` is cloneable and thread-safe; clones share the same
/// settings. It is filled in by [`MongoConnectorBuilder`](crate::MongoConnectorBuilder)
/// and read once when the client is created.
///
/// A pool size of `0` leaves the driver default in place.
#[derive(Clone)]
pub struct MongoConfig {
    inner: Arc<MongoConfigInner>,
}

impl MongoConfig {
    pub fn new() -> MongoConfig {
        MongoConfig {
            inner: Arc::new(MongoConfigInner::new()),
        }
    }

    #[inline]
    pub fn uri(&self) -> String {
        self.inner.uri.read().clone()
    }

    #[inline]
    pub fn database(&self) -> String {
        self.inner.database.read().clone()
    }

    #[inline]
    pub fn app_name(&self) -> Option<String> {
        self.inner.app_name.read().clone()
    }

    #[inline]
    pub fn connect_timeout(&self) -> Duration {
        *self.inner.connect_timeout.read()
    }

    #[inline]
    pub fn server_selection_timeout(&self) -> Duration {
        *self.inner.server_selection_timeout.read()
    }

    #[inline]
    pub fn max_pool_size(&self) -> u32 {
        self.inner.max_pool_size.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn min_pool_size(&self) -> u32 {
        self.inner.min_pool_size.load(Ordering::Relaxed)
    }

    /// Checks that the settings can produce a client.
    pub fn validate(&self) -> Result<(), MongoAdapterError> {
        if self.uri().trim().is_empty() {
            return Err(MongoAdapterError::MissingUri);
        }
        if self.database().trim().is_empty() {
            return Err(MongoAdapterError::MissingDatabase);
        }
        let (min, max) = (self.min_pool_size(), self.max_pool_size());
        if max != 0 && min > max {
            return Err(MongoAdapterError::InvalidSetting(
                "min_pool_size",
                format!("{} exceeds max_pool_size {}", min, max),
            ));
        }
        Ok(())
    }

    pub(crate) fn set_uri(&self, uri: &str) {
        *self.inner.uri.write() = uri.to_string();
    }

    pub(crate) fn set_database(&self, database: &str) {
        *self.inner.database.write() = database.to_string();
    }

    pub(crate) fn set_app_name(&self, app_name: &str) {
        *self.inner.app_name.write() = Some(app_name.to_string());
    }

    pub(crate) fn set_connect_timeout(&self, timeout: Duration) {
        *self.inner.connect_timeout.write() = timeout;
    }

    pub(crate) fn set_server_selection_timeout(&self, timeout: Duration) {
        *self.inner.server_selection_timeout.write() = timeout;
    }

    pub(crate) fn set_max_pool_size(&self, size: u32) {
        self.inner.max_pool_size.store(size, Ordering::Relaxed)
    }

    pub(crate) fn set_min_pool_size(&self, size: u32) {
        self.inner.min_pool_size.store(size, Ordering::Relaxed)
    }
}

impl Default for MongoConfig {
    fn default() -> Self {
        MongoConfig::new()
    }
}

struct MongoConfigInner {
    uri: RwLock<String>,
    database: RwLock<String>,
    app_name: RwLock<Option<String>>,
    connect_timeout: RwLock<Duration>,
    server_selection_timeout: RwLock<Duration>,
    max_pool_size: AtomicU32,
    min_pool_size: AtomicU32,
}

impl MongoConfigInner {
    fn new() -> MongoConfigInner {
        MongoConfigInner {
            uri: RwLock::new(String::new()),
            database: RwLock::new(String::new()),
            app_name: RwLock::new(None),
            connect_timeout: RwLock::new(DEFAULT_CONNECT_TIMEOUT),
            server_selection_timeout: RwLock::new(DEFAULT_SERVER_SELECTION_TIMEOUT),
            max_pool_size: AtomicU32::new(0),
            min_pool_size: AtomicU32::new(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MongoConfig::new();
        assert_eq!(config.uri(), "");
        assert_eq!(config.app_name(), None);
        assert_eq!(config.connect_timeout(), DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(config.server_selection_timeout(), DEFAULT_SERVER_SELECTION_TIMEOUT);
        assert_eq!(config.max_pool_size(), 0);
    }

    #[test]
    fn test_clones_share_settings() {
        let config = MongoConfig::new();
        let clone = config.clone();
        config.set_uri("mongodb://localhost:27017");
        config.set_max_pool_size(8);
        assert_eq!(clone.uri(), "mongodb://localhost:27017");
        assert_eq!(clone.max_pool_size(), 8);
    }

    #[test]
    fn test_validate_requires_uri_and_database() {
        let config = MongoConfig::new();
        assert_eq!(config.validate(), Err(MongoAdapterError::MissingUri));
        config.set_uri("mongodb://localhost:27017");
        assert_eq!(config.validate(), Err(MongoAdapterError::MissingDatabase));
        config.set_database("shop");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_pool_bounds() {
        let config = MongoConfig::new();
        config.set_uri("mongodb://localhost:27017");
        config.set_database("shop");
        config.set_min_pool_size(10);
        config.set_max_pool_size(5);
        assert!(matches!(
            config.validate(),
            Err(MongoAdapterError::InvalidSetting("min_pool_size", _))
        ));
        config.set_max_pool_size(0);
        assert!(config.validate().is_ok());
    }
}
