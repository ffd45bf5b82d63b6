use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::context::Context;
use crate::driver::memory::change_feed::ChangeFeed;
use crate::driver::memory::collection::InMemoryCollection;
use crate::driver::memory::config::{InMemoryConfig, InMemoryDatabaseBuilder};
use crate::driver::memory::session::InMemorySession;
use crate::driver::memory::store::CollectionData;
use crate::driver::{Collection, Database, DatabaseProvider, Session};
use crate::errors::RepoResult;
use crate::options::SessionOptions;

/// State shared by every handle of one in-memory database.
pub(crate) struct DatabaseState {
    name: String,
    collections: DashMap<String, Arc<Mutex<CollectionData>>>,
    pub feed: ChangeFeed,
}

impl DatabaseState {
    pub fn namespace(&self, collection: &str) -> String {
        format!("{}.{}", self.name, collection)
    }

    pub fn existing(&self, collection: &str) -> Option<Arc<Mutex<CollectionData>>> {
        self.collections.get(collection).map(|entry| entry.value().clone())
    }

    pub fn get_or_create(&self, collection: &str) -> Arc<Mutex<CollectionData>> {
        self.collections
            .entry(collection.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(CollectionData::new(&self.namespace(collection)))))
            .value()
            .clone()
    }

    /// Removes a collection, returning `true` when it existed.
    pub fn remove(&self, collection: &str) -> bool {
        let removed = self.collections.remove(collection).is_some();
        if removed {
            self.feed.publish_drop(collection);
        }
        removed
    }
}

/// An in-process document database.
///
/// Collections are created on first write. All handles obtained from the
/// same `open` call share data; separate `open` calls are independent
/// databases, even with equal names.
///
/// # Examples
///
/// ```rust,ignore
/// use docrepo::driver::memory::InMemoryDatabase;
///
/// let db = InMemoryDatabase::open("shop");
/// let orders = db.collection("orders");
/// ```
#[derive(Clone)]
pub struct InMemoryDatabase {
    state: Arc<DatabaseState>,
}

impl InMemoryDatabase {
    /// Opens an empty database with default settings.
    pub fn open(name: &str) -> Database {
        InMemoryDatabase::with_config().name(name).open()
    }

    pub fn with_config() -> InMemoryDatabaseBuilder {
        InMemoryDatabaseBuilder::new()
    }

    pub(crate) fn new(config: InMemoryConfig) -> InMemoryDatabase {
        let name = config.database_name();
        log::debug!("opening in-memory database {}", name);
        InMemoryDatabase {
            state: Arc::new(DatabaseState {
                feed: ChangeFeed::new(&name, config.change_feed_capacity()),
                name,
                collections: DashMap::new(),
            }),
        }
    }

    pub(crate) fn state(&self) -> Arc<DatabaseState> {
        self.state.clone()
    }

    pub(crate) fn from_state(state: Arc<DatabaseState>) -> InMemoryDatabase {
        InMemoryDatabase { state }
    }
}

impl DatabaseProvider for InMemoryDatabase {
    fn name(&self) -> String {
        self.state.name.clone()
    }

    fn collection(&self, name: &str) -> Collection {
        Collection::new(InMemoryCollection::new(name, self.state.clone()))
    }

    fn list_collection_names(&self, ctx: &Context) -> RepoResult<Vec<String>> {
        ctx.check()?;
        let mut names: Vec<String> = self.state.collections.iter().map(|e| e.key().clone()).collect();
        names.sort();
        Ok(names)
    }

    fn start_session(&self, ctx: &Context, options: Option<SessionOptions>) -> RepoResult<Session> {
        ctx.check()?;
        Ok(Session::new(InMemorySession::new(self.state.clone(), options)))
    }

    fn ping(&self, ctx: &Context) -> RepoResult<()> {
        ctx.check()
    }

    fn drop_database(&self, ctx: &Context) -> RepoResult<()> {
        ctx.check()?;
        for name in self.list_collection_names(ctx)? {
            self.state.remove(&name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_collections_are_created_on_write() {
        let db = InMemoryDatabase::open("shop");
        let ctx = Context::background();
        let orders = db.collection("orders");
        assert!(db.list_collection_names(&ctx).unwrap().is_empty());
        orders.insert_one(&ctx, doc! { "a": 1 }, None).unwrap();
        assert_eq!(db.list_collection_names(&ctx).unwrap(), vec!["orders".to_string()]);
        assert_eq!(db.name(), "shop");
    }

    #[test]
    fn test_separate_opens_are_independent() {
        let ctx = Context::background();
        let a = InMemoryDatabase::open("same");
        let b = InMemoryDatabase::open("same");
        a.collection("c").insert_one(&ctx, doc! {}, None).unwrap();
        assert_eq!(b.collection("c").estimated_document_count(&ctx, None).unwrap(), 0);
    }

    #[test]
    fn test_drop_database() {
        let db = InMemoryDatabase::open("shop");
        let ctx = Context::background();
        db.collection("a").insert_one(&ctx, doc! {}, None).unwrap();
        db.collection("b").insert_one(&ctx, doc! {}, None).unwrap();
        db.drop_database(&ctx).unwrap();
        assert!(db.list_collection_names(&ctx).unwrap().is_empty());
    }

    #[test]
    fn test_ping_honours_cancellation() {
        let db = InMemoryDatabase::open("shop");
        let ctx = Context::background();
        assert!(db.ping(&ctx).is_ok());
        ctx.cancel();
        assert!(db.ping(&ctx).is_err());
    }
}
