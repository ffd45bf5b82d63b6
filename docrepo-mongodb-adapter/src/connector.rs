use std::time::Duration;

use docrepo::bson::doc;
use docrepo::common::SRV_SCHEME_MARKER;
use docrepo::context::Context;
use docrepo::driver::Database;
use docrepo::errors::{ErrorKind, RepoError, RepoResult};
use mongodb::options::{ClientOptions, ServerApi, ServerApiVersion};
use mongodb::sync::Client;

use crate::config::MongoConfig;
use crate::database::MongoDatabase;
use crate::errors::{store_error, MongoAdapterError};

/// Opens a client for `uri`, pings `database` and returns its handle.
///
/// A `mongodb+srv` URI pins server API version 1. Parse and client creation
/// failures are `ConnectionError`s; a failed ping is `ServerUnreachable`.
///
/// # Examples
///
/// ```rust,ignore
/// let db = docrepo_mongodb_adapter::connect(&Context::background(), "mongodb://localhost:27017", "shop")?;
/// let users: Repository<User> = Repository::new(&db, "users");
/// ```
pub fn connect(ctx: &Context, uri: &str, database: &str) -> RepoResult<Database> {
    MongoConnector::with_config()
        .uri(uri)
        .database(database)
        .build()?
        .connect(ctx)
}

/// Connection establisher backed by the official MongoDB driver.
///
/// # Examples
///
/// ```rust,ignore
/// use docrepo_mongodb_adapter::MongoConnector;
///
/// let db = MongoConnector::with_config()
///     .uri("mongodb+srv://cluster0.example.net")
///     .database("shop")
///     .app_name("shop-api")
///     .max_pool_size(20)
///     .build()?
///     .connect(&ctx)?;
/// ```
pub struct MongoConnector {
    config: MongoConfig,
}

impl MongoConnector {
    #[inline]
    pub fn with_config() -> MongoConnectorBuilder {
        MongoConnectorBuilder::new()
    }

    pub fn config(&self) -> &MongoConfig {
        &self.config
    }

    /// Creates the client and verifies the server answers a ping.
    pub fn connect(&self, ctx: &Context) -> RepoResult<Database> {
        ctx.check()?;
        let uri = self.config.uri();
        let database_name = self.config.database();

        let mut options = ClientOptions::parse(uri.as_str()).run().map_err(|err| {
            log::error!("Failed to parse connection uri: {}", err);
            RepoError::new_with_cause("failed to parse connection uri", ErrorKind::ConnectionError, store_error(err))
        })?;
        self.apply(ctx, &uri, &mut options);

        let client = Client::with_options(options).map_err(|err| {
            log::error!("Failed to create client: {}", err);
            RepoError::new_with_cause("failed to create client", ErrorKind::ConnectionError, store_error(err))
        })?;

        let database = client.database(&database_name);
        database.run_command(doc! { "ping": 1 }).run().map_err(|err| {
            log::error!("Failed to ping {}: {}", database_name, err);
            RepoError::new_with_cause("failed to ping server", ErrorKind::ServerUnreachable, store_error(err))
        })?;

        log::debug!("Connected to database {}", database_name);
        Ok(Database::new(MongoDatabase::new(client, database)))
    }

    fn apply(&self, ctx: &Context, uri: &str, options: &mut ClientOptions) {
        if uri.contains(SRV_SCHEME_MARKER) {
            options.server_api = Some(ServerApi::builder().version(ServerApiVersion::V1).build());
        }
        if let Some(app_name) = self.config.app_name() {
            options.app_name = Some(app_name);
        }
        options.connect_timeout = Some(self.config.connect_timeout());
        options.server_selection_timeout = Some(within_deadline(ctx, self.config.server_selection_timeout()));
        if self.config.max_pool_size() > 0 {
            options.max_pool_size = Some(self.config.max_pool_size());
        }
        if self.config.min_pool_size() > 0 {
            options.min_pool_size = Some(self.config.min_pool_size());
        }
    }
}

// The ping must not outlive the caller's deadline.
fn within_deadline(ctx: &Context, timeout: Duration) -> Duration {
    match ctx.remaining() {
        Some(remaining) => remaining.min(timeout),
        None => timeout,
    }
}

/// Builder of a [`MongoConnector`].
///
/// Invalid settings do not fail the chain; the first one is kept and
/// returned by [`build`](MongoConnectorBuilder::build).
pub struct MongoConnectorBuilder {
    config: MongoConfig,
    error: Option<MongoAdapterError>,
}

impl MongoConnectorBuilder {
    pub fn new() -> MongoConnectorBuilder {
        MongoConnectorBuilder {
            config: MongoConfig::new(),
            error: None,
        }
    }

    pub fn uri(self, uri: &str) -> Self {
        self.config.set_uri(uri);
        self
    }

    pub fn database(self, database: &str) -> Self {
        self.config.set_database(database);
        self
    }

    pub fn app_name(self, app_name: &str) -> Self {
        self.config.set_app_name(app_name);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        if timeout.is_zero() {
            self.capture(MongoAdapterError::InvalidSetting("connect_timeout", "must be > 0".to_string()));
        } else {
            self.config.set_connect_timeout(timeout);
        }
        self
    }

    pub fn server_selection_timeout(mut self, timeout: Duration) -> Self {
        if timeout.is_zero() {
            self.capture(MongoAdapterError::InvalidSetting(
                "server_selection_timeout",
                "must be > 0".to_string(),
            ));
        } else {
            self.config.set_server_selection_timeout(timeout);
        }
        self
    }

    pub fn max_pool_size(mut self, size: u32) -> Self {
        if size == 0 {
            self.capture(MongoAdapterError::InvalidSetting("max_pool_size", "must be > 0".to_string()));
        } else {
            self.config.set_max_pool_size(size);
        }
        self
    }

    pub fn min_pool_size(self, size: u32) -> Self {
        self.config.set_min_pool_size(size);
        self
    }

    pub fn build(self) -> RepoResult<MongoConnector> {
        if let Some(err) = self.error {
            log::error!("Invalid connector configuration: {}", err);
            return Err(err.into());
        }
        self.config.validate().map_err(|err| {
            log::error!("Invalid connector configuration: {}", err);
            RepoError::from(err)
        })?;
        Ok(MongoConnector { config: self.config })
    }

    fn capture(&mut self, err: MongoAdapterError) {
        self.error.get_or_insert(err);
    }
}

impl Default for MongoConnectorBuilder {
    fn default() -> Self {
        MongoConnectorBuilder::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_applies_settings() {
        let connector = MongoConnector::with_config()
            .uri("mongodb://localhost:27017")
            .database("shop")
            .app_name("shop-api")
            .connect_timeout(Duration::from_secs(3))
            .max_pool_size(20)
            .min_pool_size(2)
            .build()
            .unwrap();
        let config = connector.config();
        assert_eq!(config.database(), "shop");
        assert_eq!(config.app_name(), Some("shop-api".to_string()));
        assert_eq!(config.connect_timeout(), Duration::from_secs(3));
        assert_eq!(config.max_pool_size(), 20);
        assert_eq!(config.min_pool_size(), 2);
    }

    #[test]
    fn test_missing_uri_is_configuration_error() {
        let err = MongoConnector::with_config().database("shop").build().err().unwrap();
        assert_eq!(err.kind(), &ErrorKind::ConfigurationError);
    }

    #[test]
    fn test_missing_database_is_configuration_error() {
        let err = MongoConnector::with_config()
            .uri("mongodb://localhost:27017")
            .build()
            .err()
            .unwrap();
        assert_eq!(err.kind(), &ErrorKind::ConfigurationError);
        assert_eq!(err.message(), "database name is required");
    }

    #[test]
    fn test_first_invalid_setting_is_reported() {
        let err = MongoConnector::with_config()
            .uri("mongodb://localhost:27017")
            .database("shop")
            .max_pool_size(0)
            .connect_timeout(Duration::ZERO)
            .build()
            .err()
            .unwrap();
        assert_eq!(err.kind(), &ErrorKind::ConfigurationError);
        assert!(err.message().contains("max_pool_size"));
    }

    #[test]
    fn test_malformed_uri_is_connection_error() {
        let connector = MongoConnector::with_config()
            .uri("not-a-uri")
            .database("shop")
            .build()
            .unwrap();
        let err = connector.connect(&Context::background()).err().unwrap();
        assert_eq!(err.kind(), &ErrorKind::ConnectionError);
    }

    #[test]
    fn test_srv_uri_pins_server_api() {
        let connector = MongoConnector::with_config()
            .uri("mongodb://localhost:27017")
            .database("shop")
            .build()
            .unwrap();
        let ctx = Context::background();

        let mut options = ClientOptions::default();
        connector.apply(&ctx, "mongodb+srv://cluster0.example.net", &mut options);
        assert!(options.server_api.is_some());

        let mut options = ClientOptions::default();
        connector.apply(&ctx, "mongodb://localhost:27017", &mut options);
        assert!(options.server_api.is_none());
    }

    #[test]
    fn test_server_selection_respects_deadline() {
        let ctx = Context::background().with_timeout(Duration::from_secs(2));
        let timeout = within_deadline(&ctx, Duration::from_secs(30));
        assert!(timeout <= Duration::from_secs(2));
        assert_eq!(
            within_deadline(&Context::background(), Duration::from_secs(30)),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_cancelled_context_skips_connect() {
        let ctx = Context::background();
        ctx.cancel();
        let err = connect(&ctx, "mongodb://localhost:27017", "shop").err().unwrap();
        assert_eq!(err.kind(), &ErrorKind::Cancelled);
    }
}
