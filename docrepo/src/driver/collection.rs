use std::fmt::{Debug, Formatter};
use std::ops::Deref;
use std::sync::Arc;

use bson::{Bson, Document};

use crate::context::Context;
use crate::driver::{
    BulkWriteResult, ChangeStream, Cursor, Database, DeleteResult, InsertManyResult,
    InsertOneResult, UpdateResult, WriteModel,
};
use crate::errors::RepoResult;
use crate::model::IndexModel;
use crate::options::{
    AggregateOptions, BulkWriteOptions, ChangeStreamOptions, CountOptions, CreateIndexesOptions,
    DeleteOptions, DistinctOptions, EstimatedCountOptions, FindOneAndDeleteOptions,
    FindOneAndUpdateOptions, FindOneOptions, FindOptions, InsertManyOptions, InsertOneOptions,
    UpdateOptions,
};

/// Driver side of a collection.
///
/// # Purpose
/// Executes data operations against one physical collection. Every method
/// receives the caller's [`Context`] and must honour its cancellation and,
/// when a session is bound to it, run inside that session.
///
/// # Contract
/// - Filters are passed as given; an empty document matches everything
/// - Updates are operator documents; the repository never sends anything else
/// - Errors are raw store errors, not prefixed with the operation name
/// - "Nothing matched" is a normal outcome (`None` or a zero count)
pub trait CollectionProvider: Send + Sync {
    fn name(&self) -> String;

    /// The database this collection belongs to.
    fn database(&self) -> Database;

    fn insert_one(
        &self,
        ctx: &Context,
        document: Document,
        options: Option<InsertOneOptions>,
    ) -> RepoResult<InsertOneResult>;

    fn insert_many(
        &self,
        ctx: &Context,
        documents: Vec<Document>,
        options: Option<InsertManyOptions>,
    ) -> RepoResult<InsertManyResult>;

    fn find(&self, ctx: &Context, filter: Document, options: Option<FindOptions>) -> RepoResult<Cursor>;

    fn find_one(
        &self,
        ctx: &Context,
        filter: Document,
        options: Option<FindOneOptions>,
    ) -> RepoResult<Option<Document>>;

    fn find_one_and_update(
        &self,
        ctx: &Context,
        filter: Document,
        update: Document,
        options: Option<FindOneAndUpdateOptions>,
    ) -> RepoResult<Option<Document>>;

    fn find_one_and_delete(
        &self,
        ctx: &Context,
        filter: Document,
        options: Option<FindOneAndDeleteOptions>,
    ) -> RepoResult<Option<Document>>;

    fn update_one(
        &self,
        ctx: &Context,
        filter: Document,
        update: Document,
        options: Option<UpdateOptions>,
    ) -> RepoResult<UpdateResult>;

    fn update_many(
        &self,
        ctx: &Context,
        filter: Document,
        update: Document,
        options: Option<UpdateOptions>,
    ) -> RepoResult<UpdateResult>;

    fn delete_one(
        &self,
        ctx: &Context,
        filter: Document,
        options: Option<DeleteOptions>,
    ) -> RepoResult<DeleteResult>;

    fn delete_many(
        &self,
        ctx: &Context,
        filter: Document,
        options: Option<DeleteOptions>,
    ) -> RepoResult<DeleteResult>;

    /// Count from collection metadata; fast, possibly stale.
    fn estimated_document_count(
        &self,
        ctx: &Context,
        options: Option<EstimatedCountOptions>,
    ) -> RepoResult<u64>;

    /// Exact count of the documents matching `filter`.
    fn count_documents(
        &self,
        ctx: &Context,
        filter: Document,
        options: Option<CountOptions>,
    ) -> RepoResult<u64>;

    fn aggregate(
        &self,
        ctx: &Context,
        pipeline: Vec<Document>,
        options: Option<AggregateOptions>,
    ) -> RepoResult<Cursor>;

    fn distinct(
        &self,
        ctx: &Context,
        field_name: &str,
        filter: Document,
        options: Option<DistinctOptions>,
    ) -> RepoResult<Vec<Bson>>;

    fn bulk_write(
        &self,
        ctx: &Context,
        models: Vec<WriteModel>,
        options: Option<BulkWriteOptions>,
    ) -> RepoResult<BulkWriteResult>;

    fn watch(
        &self,
        ctx: &Context,
        pipeline: Vec<Document>,
        options: Option<ChangeStreamOptions>,
    ) -> RepoResult<ChangeStream>;

    /// Creates the given indexes and returns their names. Creating an index
    /// identical to an existing one is a no-op.
    fn create_indexes(
        &self,
        ctx: &Context,
        models: Vec<IndexModel>,
        options: Option<CreateIndexesOptions>,
    ) -> RepoResult<Vec<String>>;

    fn list_indexes(&self, ctx: &Context) -> RepoResult<Vec<Document>>;

    fn drop_index(&self, ctx: &Context, name: &str) -> RepoResult<()>;

    /// Removes the collection with its documents and indexes.
    fn drop(&self, ctx: &Context) -> RepoResult<()>;
}

/// Shared handle of a [`CollectionProvider`].
///
/// Cloning is cheap; all clones address the same collection.
#[derive(Clone)]
pub struct Collection {
    inner: Arc<dyn CollectionProvider>,
}

impl Collection {
    pub fn new<T: CollectionProvider + 'static>(inner: T) -> Self {
        Collection { inner: Arc::new(inner) }
    }
}

impl Debug for Collection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection").field("name", &self.inner.name()).finish()
    }
}

impl Deref for Collection {
    type Target = Arc<dyn CollectionProvider>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
