use docrepo::bson::doc;
use docrepo::context::Context;
use docrepo::driver::{Collection, DatabaseProvider, Session};
use docrepo::errors::RepoResult;
use docrepo::options::SessionOptions;
use mongodb::sync::{Client, Database as DriverDatabase};

use crate::collection::MongoCollection;
use crate::convert;
use crate::errors::store_error;
use crate::session::{new_session, MongoSession};

/// A database on a MongoDB deployment.
///
/// Clones share the driver client and its connection pool.
#[derive(Clone)]
pub struct MongoDatabase {
    client: Client,
    database: DriverDatabase,
}

impl MongoDatabase {
    pub(crate) fn new(client: Client, database: DriverDatabase) -> MongoDatabase {
        MongoDatabase { client, database }
    }

    pub(crate) fn driver_database(&self) -> &DriverDatabase {
        &self.database
    }

    pub(crate) fn client(&self) -> &Client {
        &self.client
    }
}

impl DatabaseProvider for MongoDatabase {
    fn name(&self) -> String {
        self.database.name().to_string()
    }

    fn collection(&self, name: &str) -> Collection {
        Collection::new(MongoCollection::new(self.clone(), name))
    }

    fn list_collection_names(&self, ctx: &Context) -> RepoResult<Vec<String>> {
        ctx.check()?;
        match MongoSession::from_context(ctx)? {
            Some(session) => {
                let mut guard = session.lock()?;
                self.database.list_collection_names().session(&mut *guard).run()
            }
            None => self.database.list_collection_names().run(),
        }
        .map_err(store_error)
    }

    fn start_session(&self, ctx: &Context, options: Option<SessionOptions>) -> RepoResult<Session> {
        ctx.check()?;
        let session = self
            .client
            .start_session()
            .with_options(convert::session(options))
            .run()
            .map_err(store_error)?;
        Ok(new_session(session))
    }

    fn ping(&self, ctx: &Context) -> RepoResult<()> {
        ctx.check()?;
        self.database
            .run_command(doc! { "ping": 1 })
            .run()
            .map(|_| ())
            .map_err(store_error)
    }

    fn drop_database(&self, ctx: &Context) -> RepoResult<()> {
        ctx.check()?;
        log::debug!("Dropping database {}", self.database.name());
        self.database.drop().run().map_err(store_error)
    }
}
