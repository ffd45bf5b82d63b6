use std::fmt::{Debug, Formatter};
use std::marker::PhantomData;

use bson::{Bson, Document};

use crate::context::Context;
use crate::driver::{
    BulkWriteResult, ChangeStream, Collection, Cursor, Database, UpdateResult, WriteModel,
};
use crate::errors::{wrap_err, ErrorKind, RepoError, RepoResult};
use crate::model::{IndexModel, Model};
use crate::options::{
    id_filter, AggregateOptions, BulkWriteOptions, ChangeStreamOptions, CountOptions,
    CreateIndexesOptions, DeleteOptions, DistinctOptions, EstimatedCountOptions,
    FindOneAndDeleteOptions, FindOneAndUpdateOptions, FindOneOptions, FindOptions,
    InsertManyOptions, InsertOneOptions, ReturnDocument, SessionOptions, UpdateOptions,
};
use crate::repository::{classify_update, Update};

/// Typed access to one collection.
///
/// # Purpose
///
/// A `Repository<T>` binds the document type `T` to a collection and turns
/// typed calls into driver calls. It runs the lifecycle hooks of `T`,
/// classifies update arguments, defaults absent filters to "match all" and
/// prefixes every store failure with the operation that failed.
///
/// # Characteristics
///
/// - **Stateless**: holds nothing but the collection handle; cloning is cheap
/// - **Thread-Safe**: share it freely between threads
/// - **Context-Aware**: every call takes a [`Context`] first; a context bound
///   to a session runs the call inside that session's transaction
/// - **Stable Errors**: store failures come back as the operation's
///   [`ErrorKind`] with the driver error as cause; cancellation and
///   validation failures keep their own kind
///
/// # Examples
///
/// ```rust,ignore
/// use docrepo::repository::Repository;
///
/// let users: Repository<User> = Repository::new(&db, "users");
/// let stored = users.insert_one(&ctx, user, None)?;
/// let found = users.find_by_id(&ctx, stored.base.id, None)?;
/// ```
pub struct Repository<T: Model> {
    collection: Collection,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Model> Clone for Repository<T> {
    fn clone(&self) -> Self {
        Repository {
            collection: self.collection.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Model> Debug for Repository<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("collection", &self.collection.name())
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

fn match_all(filter: Option<Document>) -> Document {
    filter.unwrap_or_default()
}

fn not_found(message: &str) -> RepoError {
    log::debug!("{}", message);
    RepoError::new(message, ErrorKind::NotFound)
}

fn decode<T: Model>(document: Document, message: &str) -> RepoResult<T> {
    bson::from_document::<T>(document).map_err(|err| {
        let err = RepoError::from_source(message, ErrorKind::DecodeError, err);
        log::error!("{}", err);
        err
    })
}

// Decode failures keep their kind, anything else raised while draining is a
// failure of the operation itself.
fn drain_error(message: &'static str, kind: ErrorKind) -> impl FnOnce(RepoError) -> RepoError {
    move |err| {
        if err.kind() == &ErrorKind::DecodeError {
            wrap_err(message, ErrorKind::DecodeError)(err)
        } else {
            wrap_err(message, kind)(err)
        }
    }
}

impl<T: Model> Repository<T> {
    /// Binds `T` to the collection `name` of `database`.
    pub fn new(database: &Database, name: &str) -> Repository<T> {
        Repository::from_collection(database.collection(name))
    }

    pub fn from_collection(collection: Collection) -> Repository<T> {
        Repository {
            collection,
            _marker: PhantomData,
        }
    }

    /// The underlying collection handle, for operations the repository does
    /// not wrap.
    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    pub fn database(&self) -> Database {
        self.collection.database()
    }

    /// Inserts `document` and returns it as stored.
    ///
    /// Runs `before_insert` and `validate` first, then re-reads the document
    /// by its identifier so server-side defaults are reflected.
    pub fn insert_one(
        &self,
        ctx: &Context,
        mut document: T,
        options: impl Into<Option<InsertOneOptions>>,
    ) -> RepoResult<T> {
        ctx.check()?;
        document.before_insert();
        document.validate()?;
        let encoded = bson::to_document(&document)
            .map_err(RepoError::from)
            .map_err(wrap_err("failed to insert document", ErrorKind::InsertError))?;

        let result = self
            .collection
            .insert_one(ctx, encoded, options.into())
            .map_err(wrap_err("failed to insert document", ErrorKind::InsertError))?;

        let stored = self
            .collection
            .find_one(ctx, id_filter(result.inserted_id), None)
            .and_then(|found| found.ok_or_else(|| not_found("inserted document not found")))
            .and_then(|found| decode::<T>(found, "failed to decode inserted document"))
            .map_err(wrap_err("failed to fetch inserted document", ErrorKind::InsertError))?;
        Ok(stored)
    }

    /// Inserts `documents` and returns their identifiers in input order.
    ///
    /// An empty list fails before the store is contacted.
    pub fn insert_many(
        &self,
        ctx: &Context,
        documents: Vec<T>,
        options: impl Into<Option<InsertManyOptions>>,
    ) -> RepoResult<Vec<Bson>> {
        if documents.is_empty() {
            return Err(RepoError::new("no documents to insert", ErrorKind::InsertError));
        }
        ctx.check()?;

        let mut encoded = Vec::with_capacity(documents.len());
        for mut document in documents {
            document.before_insert();
            document.validate()?;
            encoded.push(
                bson::to_document(&document)
                    .map_err(RepoError::from)
                    .map_err(wrap_err("failed to insert documents", ErrorKind::InsertError))?,
            );
        }

        let result = self
            .collection
            .insert_many(ctx, encoded, options.into())
            .map_err(wrap_err("failed to insert documents", ErrorKind::InsertError))?;
        Ok(result.inserted_ids)
    }

    /// Returns the first document matching `filter`.
    ///
    /// Fails with [`ErrorKind::NotFound`] when nothing matches.
    pub fn find_one(
        &self,
        ctx: &Context,
        filter: impl Into<Option<Document>>,
        options: impl Into<Option<FindOneOptions>>,
    ) -> RepoResult<T> {
        let found = self
            .collection
            .find_one(ctx, match_all(filter.into()), options.into())
            .map_err(wrap_err("failed to execute find", ErrorKind::QueryError))?;
        match found {
            Some(document) => decode(document, "failed to decode result"),
            None => Err(not_found("no document matches the filter")),
        }
    }

    /// Returns every document matching `filter`.
    pub fn find(
        &self,
        ctx: &Context,
        filter: impl Into<Option<Document>>,
        options: impl Into<Option<FindOptions>>,
    ) -> RepoResult<Vec<T>> {
        self.find_decoded(ctx, filter, options)
    }

    /// Like [`Repository::find`], taking the full set of find options.
    pub fn find_decoded(
        &self,
        ctx: &Context,
        filter: impl Into<Option<Document>>,
        options: impl Into<Option<FindOptions>>,
    ) -> RepoResult<Vec<T>> {
        let cursor = self
            .collection
            .find(ctx, match_all(filter.into()), options.into())
            .map_err(wrap_err("failed to execute find", ErrorKind::QueryError))?;
        self.drain(ctx, cursor, "failed to decode results", ErrorKind::QueryError)
    }

    pub fn find_by_id(
        &self,
        ctx: &Context,
        id: impl Into<Bson>,
        options: impl Into<Option<FindOneOptions>>,
    ) -> RepoResult<T> {
        self.find_one(ctx, id_filter(id), options)
    }

    /// Returns one page of the documents matching `filter`.
    ///
    /// Pages are 1-based. `page` and `page_size` below 1 fail with
    /// [`ErrorKind::ValidationError`] before the store is contacted.
    pub fn find_paginated(
        &self,
        ctx: &Context,
        filter: impl Into<Option<Document>>,
        page: i64,
        page_size: i64,
    ) -> RepoResult<Vec<T>> {
        let options = page_options(page, page_size)?;
        self.find_decoded(ctx, filter, options)
    }

    /// Returns one page and the total number of matching documents.
    ///
    /// The count and the page are fetched by two separate round-trips, so
    /// concurrent writes may make them disagree.
    pub fn find_paginated_with_total(
        &self,
        ctx: &Context,
        filter: impl Into<Option<Document>>,
        page: i64,
        page_size: i64,
    ) -> RepoResult<(Vec<T>, u64)> {
        let options = page_options(page, page_size)?;
        self.find_decoded_with_total(ctx, filter, options)
    }

    /// Returns the documents matching `filter` shaped by `options`, and the
    /// total number of matching documents regardless of skip and limit.
    ///
    /// Subject to the same race as [`Repository::find_paginated_with_total`].
    pub fn find_decoded_with_total(
        &self,
        ctx: &Context,
        filter: impl Into<Option<Document>>,
        options: impl Into<Option<FindOptions>>,
    ) -> RepoResult<(Vec<T>, u64)> {
        let filter = match_all(filter.into());
        let total = self.count_documents(ctx, filter.clone(), None)?;
        let results = self.find_decoded(ctx, filter, options)?;
        Ok((results, total))
    }

    /// Updates the first document matching `filter` and returns it as it is
    /// after the update.
    ///
    /// The return-document option is always forced to
    /// [`ReturnDocument::After`].
    pub fn find_one_and_update(
        &self,
        ctx: &Context,
        filter: impl Into<Option<Document>>,
        update: impl Into<Update<T>>,
        options: impl Into<Option<FindOneAndUpdateOptions>>,
    ) -> RepoResult<T> {
        let update = classify_update(update.into())?.into_document();
        let mut options = options.into().unwrap_or_default();
        options.return_document = Some(ReturnDocument::After);

        let updated = self
            .collection
            .find_one_and_update(ctx, match_all(filter.into()), update, Some(options))
            .map_err(wrap_err("failed to update document", ErrorKind::UpdateError))?;
        match updated {
            Some(document) => decode(document, "failed to decode result"),
            None => Err(not_found("no document matches the filter")),
        }
    }

    pub fn find_one_and_update_by_id(
        &self,
        ctx: &Context,
        id: impl Into<Bson>,
        update: impl Into<Update<T>>,
        options: impl Into<Option<FindOneAndUpdateOptions>>,
    ) -> RepoResult<T> {
        self.find_one_and_update(ctx, id_filter(id), update, options)
    }

    /// Updates the first document matching `filter`. Matching nothing is not
    /// an error.
    pub fn update_one(
        &self,
        ctx: &Context,
        filter: impl Into<Option<Document>>,
        update: impl Into<Update<T>>,
        options: impl Into<Option<UpdateOptions>>,
    ) -> RepoResult<UpdateResult> {
        let update = classify_update(update.into())?.into_document();
        self.collection
            .update_one(ctx, match_all(filter.into()), update, options.into())
            .map_err(wrap_err("failed to update document", ErrorKind::UpdateError))
    }

    pub fn update_by_id(
        &self,
        ctx: &Context,
        id: impl Into<Bson>,
        update: impl Into<Update<T>>,
        options: impl Into<Option<UpdateOptions>>,
    ) -> RepoResult<UpdateResult> {
        self.update_one(ctx, id_filter(id), update, options)
    }

    /// Updates every document matching `filter`.
    pub fn update_many(
        &self,
        ctx: &Context,
        filter: impl Into<Option<Document>>,
        update: impl Into<Update<T>>,
        options: impl Into<Option<UpdateOptions>>,
    ) -> RepoResult<UpdateResult> {
        let update = classify_update(update.into())?.into_document();
        self.collection
            .update_many(ctx, match_all(filter.into()), update, options.into())
            .map_err(wrap_err("failed to update documents", ErrorKind::UpdateError))
    }

    /// Deletes the first document matching `filter` and returns it.
    pub fn find_one_and_delete(
        &self,
        ctx: &Context,
        filter: impl Into<Option<Document>>,
        options: impl Into<Option<FindOneAndDeleteOptions>>,
    ) -> RepoResult<T> {
        let deleted = self
            .collection
            .find_one_and_delete(ctx, match_all(filter.into()), options.into())
            .map_err(wrap_err("failed to delete document", ErrorKind::DeleteError))?;
        match deleted {
            Some(document) => decode(document, "failed to decode result"),
            None => Err(not_found("no document matches the filter")),
        }
    }

    /// Deletes the first document matching `filter`.
    ///
    /// Fails with [`ErrorKind::NotFound`] when nothing was deleted.
    pub fn delete_one(
        &self,
        ctx: &Context,
        filter: impl Into<Option<Document>>,
        options: impl Into<Option<DeleteOptions>>,
    ) -> RepoResult<()> {
        let result = self
            .collection
            .delete_one(ctx, match_all(filter.into()), options.into())
            .map_err(wrap_err("failed to delete document", ErrorKind::DeleteError))?;
        if result.deleted_count == 0 {
            return Err(not_found("no document matches the filter"));
        }
        Ok(())
    }

    pub fn delete_by_id(
        &self,
        ctx: &Context,
        id: impl Into<Bson>,
        options: impl Into<Option<DeleteOptions>>,
    ) -> RepoResult<()> {
        self.delete_one(ctx, id_filter(id), options)
    }

    /// Deletes every document matching `filter` and returns how many were
    /// deleted.
    pub fn delete_many(
        &self,
        ctx: &Context,
        filter: impl Into<Option<Document>>,
        options: impl Into<Option<DeleteOptions>>,
    ) -> RepoResult<u64> {
        self.collection
            .delete_many(ctx, match_all(filter.into()), options.into())
            .map(|result| result.deleted_count)
            .map_err(wrap_err("failed to delete documents", ErrorKind::DeleteError))
    }

    /// Fast count from collection metadata. May be stale.
    pub fn estimated_count(
        &self,
        ctx: &Context,
        options: impl Into<Option<EstimatedCountOptions>>,
    ) -> RepoResult<u64> {
        self.collection
            .estimated_document_count(ctx, options.into())
            .map_err(wrap_err("failed to count documents", ErrorKind::QueryError))
    }

    pub fn count_documents(
        &self,
        ctx: &Context,
        filter: impl Into<Option<Document>>,
        options: impl Into<Option<CountOptions>>,
    ) -> RepoResult<u64> {
        self.collection
            .count_documents(ctx, match_all(filter.into()), options.into())
            .map_err(wrap_err("failed to count documents", ErrorKind::QueryError))
    }

    /// Runs an aggregation pipeline and returns the raw result documents.
    pub fn aggregate(
        &self,
        ctx: &Context,
        pipeline: Vec<Document>,
        options: impl Into<Option<AggregateOptions>>,
    ) -> RepoResult<Vec<Document>> {
        let cursor = self
            .collection
            .aggregate(ctx, pipeline, options.into())
            .map_err(wrap_err("failed to execute aggregate", ErrorKind::AggregateError))?;
        cursor
            .collect_documents(ctx)
            .map_err(drain_error("failed to decode aggregate results", ErrorKind::AggregateError))
    }

    /// Runs an aggregation pipeline and decodes every result as `T`.
    pub fn aggregate_typed(
        &self,
        ctx: &Context,
        pipeline: Vec<Document>,
        options: impl Into<Option<AggregateOptions>>,
    ) -> RepoResult<Vec<T>> {
        let cursor = self
            .collection
            .aggregate(ctx, pipeline, options.into())
            .map_err(wrap_err("failed to execute aggregate", ErrorKind::AggregateError))?;
        self.drain(ctx, cursor, "failed to decode aggregate results", ErrorKind::AggregateError)
    }

    /// Distinct values of `field_name` among the documents matching `filter`.
    pub fn distinct(
        &self,
        ctx: &Context,
        field_name: &str,
        filter: impl Into<Option<Document>>,
        options: impl Into<Option<DistinctOptions>>,
    ) -> RepoResult<Vec<Bson>> {
        self.collection
            .distinct(ctx, field_name, match_all(filter.into()), options.into())
            .map_err(wrap_err("failed to find distinct values", ErrorKind::QueryError))
    }

    /// Submits a list of heterogeneous writes in one call.
    ///
    /// Writes run in order and stop at the first failure unless the options
    /// say otherwise.
    pub fn bulk_write(
        &self,
        ctx: &Context,
        models: Vec<WriteModel>,
        options: impl Into<Option<BulkWriteOptions>>,
    ) -> RepoResult<BulkWriteResult> {
        self.collection
            .bulk_write(ctx, models, options.into())
            .map_err(wrap_err("failed to perform bulk write", ErrorKind::BulkWriteError))
    }

    /// Opens a change stream on the collection. The caller owns the stream.
    pub fn watch(
        &self,
        ctx: &Context,
        pipeline: Vec<Document>,
        options: impl Into<Option<ChangeStreamOptions>>,
    ) -> RepoResult<ChangeStream> {
        self.collection
            .watch(ctx, pipeline, options.into())
            .map_err(wrap_err("failed to create change stream", ErrorKind::ChangeStreamError))
    }

    /// Creates `models` and returns the index names. Existing identical
    /// indexes are left alone by the store.
    pub fn ensure_indexes(
        &self,
        ctx: &Context,
        models: Vec<IndexModel>,
        options: impl Into<Option<CreateIndexesOptions>>,
    ) -> RepoResult<Vec<String>> {
        ctx.check()?;
        if models.is_empty() {
            return Ok(Vec::new());
        }
        self.collection
            .create_indexes(ctx, models, options.into())
            .map_err(wrap_err("failed to create indexes", ErrorKind::IndexError))
    }

    /// Creates the indexes declared by [`Model::indexes`].
    ///
    /// Fails with [`ErrorKind::ConfigurationError`] if `T` declares none.
    pub fn ensure_indexes_from_model(
        &self,
        ctx: &Context,
        options: impl Into<Option<CreateIndexesOptions>>,
    ) -> RepoResult<Vec<String>> {
        let Some(models) = T::indexes() else {
            let err = RepoError::new(
                &format!("{} does not declare any indexes", std::any::type_name::<T>()),
                ErrorKind::ConfigurationError,
            );
            log::error!("{}", err);
            return Err(err);
        };
        self.ensure_indexes(ctx, models, options)
    }

    /// Lists the indexes of the collection as raw documents.
    pub fn get_indexes(&self, ctx: &Context) -> RepoResult<Vec<Document>> {
        self.collection
            .list_indexes(ctx)
            .map_err(wrap_err("failed to list indexes", ErrorKind::IndexError))
    }

    /// Runs `unit_of_work` in a transaction on the collection's database.
    ///
    /// Operations inside must use the context handed to the closure. See
    /// [`TransactionRunner`](crate::repository::TransactionRunner) for the
    /// retry rules.
    pub fn transaction<R, F>(
        &self,
        ctx: &Context,
        unit_of_work: F,
        options: impl Into<Option<SessionOptions>>,
    ) -> RepoResult<R>
    where
        F: FnMut(&Context) -> RepoResult<R>,
    {
        self.database().with_transaction(ctx, unit_of_work, options)
    }

    fn drain(&self, ctx: &Context, cursor: Cursor, message: &'static str, kind: ErrorKind) -> RepoResult<Vec<T>> {
        cursor.deserialize_all::<T>(ctx).map_err(drain_error(message, kind))
    }
}

fn page_options(page: i64, page_size: i64) -> RepoResult<FindOptions> {
    if page < 1 {
        return Err(RepoError::new("invalid page: must be >= 1", ErrorKind::ValidationError));
    }
    if page_size < 1 {
        return Err(RepoError::new("invalid pageSize: must be >= 1", ErrorKind::ValidationError));
    }
    let skip = (page - 1).saturating_mul(page_size) as u64;
    Ok(FindOptions::new().skip(skip).limit(page_size))
}
