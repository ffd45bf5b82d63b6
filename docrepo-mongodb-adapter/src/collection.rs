use docrepo::bson::{self, Bson, Document};
use docrepo::context::Context;
use docrepo::driver::{
    BulkWriteResult, ChangeStream, CollectionProvider, Cursor, Database, DeleteResult,
    InsertManyResult, InsertOneResult, UpdateResult, WriteModel,
};
use docrepo::errors::{ErrorKind, RepoError, RepoResult};
use docrepo::model::IndexModel;
use docrepo::options::{
    AggregateOptions, BulkWriteOptions, ChangeStreamOptions, CountOptions, CreateIndexesOptions,
    DeleteOptions, DistinctOptions, EstimatedCountOptions, FindOneAndDeleteOptions,
    FindOneAndUpdateOptions, FindOneOptions, FindOptions, InsertManyOptions, InsertOneOptions,
    UpdateOptions,
};
use mongodb::error::ErrorKind as MongoErrorKind;
use mongodb::sync::{ClientSession, Collection as DriverCollection, SessionCursor};
use serde::de::DeserializeOwned;

use crate::convert;
use crate::cursor::{MongoChangeStream, MongoCursor};
use crate::database::MongoDatabase;
use crate::errors::{error_code, store_error};
use crate::session::MongoSession;

// Server code for an operation on a collection that does not exist.
const NAMESPACE_NOT_FOUND: i32 = 26;

// Runs a driver action inside the session bound to the context, if any.
macro_rules! run_in_session {
    ($ctx:expr, $action:expr) => {{
        match MongoSession::from_context($ctx)? {
            Some(session) => {
                let mut guard = session.lock()?;
                $action.session(&mut *guard).run()
            }
            None => $action.run(),
        }
        .map_err(store_error)
    }};
}

// Session cursors borrow the session for every batch, so they are read to
// the end under one lock.
fn drain<T>(ctx: &Context, mut cursor: SessionCursor<T>, session: &mut ClientSession) -> RepoResult<Vec<T>>
where
    T: DeserializeOwned + Unpin + Send + Sync,
{
    let mut items = Vec::new();
    while let Some(item) = cursor.next(session) {
        ctx.check()?;
        items.push(item.map_err(store_error)?);
    }
    Ok(items)
}

/// A collection on a MongoDB deployment.
pub(crate) struct MongoCollection {
    database: MongoDatabase,
    collection: DriverCollection<Document>,
    name: String,
}

impl MongoCollection {
    pub(crate) fn new(database: MongoDatabase, name: &str) -> MongoCollection {
        let collection = database.driver_database().collection::<Document>(name);
        MongoCollection {
            database,
            collection,
            name: name.to_string(),
        }
    }

    fn apply_model(&self, ctx: &Context, index: usize, model: WriteModel, result: &mut BulkWriteResult) -> RepoResult<()> {
        match model {
            WriteModel::InsertOne { document } => {
                let inserted = run_in_session!(ctx, self.collection.insert_one(document))?;
                result.add_insert(index, inserted.inserted_id);
            }
            WriteModel::UpdateOne { filter, update, upsert } => {
                let updated = run_in_session!(
                    ctx,
                    self.collection.update_one(filter, update).with_options(convert::upsert_only(upsert))
                )?;
                result.add_update(index, update_result(updated));
            }
            WriteModel::UpdateMany { filter, update, upsert } => {
                let updated = run_in_session!(
                    ctx,
                    self.collection.update_many(filter, update).with_options(convert::upsert_only(upsert))
                )?;
                result.add_update(index, update_result(updated));
            }
            WriteModel::ReplaceOne {
                filter,
                replacement,
                upsert,
            } => {
                let replaced = run_in_session!(
                    ctx,
                    self.collection
                        .replace_one(filter, replacement)
                        .with_options(convert::replace(upsert))
                )?;
                result.add_update(index, update_result(replaced));
            }
            WriteModel::DeleteOne { filter } => {
                let deleted = run_in_session!(ctx, self.collection.delete_one(filter))?;
                result.add_delete(DeleteResult {
                    deleted_count: deleted.deleted_count,
                });
            }
            WriteModel::DeleteMany { filter } => {
                let deleted = run_in_session!(ctx, self.collection.delete_many(filter))?;
                result.add_delete(DeleteResult {
                    deleted_count: deleted.deleted_count,
                });
            }
        }
        Ok(())
    }
}

fn update_result(result: mongodb::results::UpdateResult) -> UpdateResult {
    UpdateResult {
        matched_count: result.matched_count,
        modified_count: result.modified_count,
        upserted_id: result.upserted_id,
    }
}

impl CollectionProvider for MongoCollection {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn database(&self) -> Database {
        Database::new(self.database.clone())
    }

    fn insert_one(
        &self,
        ctx: &Context,
        document: Document,
        options: Option<InsertOneOptions>,
    ) -> RepoResult<InsertOneResult> {
        ctx.check()?;
        log::debug!("insert_one into {}", self.name);
        let result = run_in_session!(
            ctx,
            self.collection.insert_one(document).with_options(convert::insert_one(options))
        )?;
        Ok(InsertOneResult {
            inserted_id: result.inserted_id,
        })
    }

    fn insert_many(
        &self,
        ctx: &Context,
        documents: Vec<Document>,
        options: Option<InsertManyOptions>,
    ) -> RepoResult<InsertManyResult> {
        ctx.check()?;
        log::debug!("insert_many of {} documents into {}", documents.len(), self.name);
        let result = run_in_session!(
            ctx,
            self.collection.insert_many(documents).with_options(convert::insert_many(options))
        )?;
        let mut ids: Vec<(usize, Bson)> = result.inserted_ids.into_iter().collect();
        ids.sort_by_key(|(index, _)| *index);
        Ok(InsertManyResult {
            inserted_ids: ids.into_iter().map(|(_, id)| id).collect(),
        })
    }

    fn find(&self, ctx: &Context, filter: Document, options: Option<FindOptions>) -> RepoResult<Cursor> {
        ctx.check()?;
        log::debug!("find on {}", self.name);
        let options = convert::find(ctx, options);
        // Outside a session the cursor is streamed; inside one it is buffered.
        match MongoSession::from_context(ctx)? {
            Some(session) => {
                let mut guard = session.lock()?;
                let cursor = self
                    .collection
                    .find(filter)
                    .with_options(options)
                    .session(&mut *guard)
                    .run()
                    .map_err(store_error)?;
                drain(ctx, cursor, &mut guard).map(Cursor::from_documents)
            }
            None => {
                let cursor = self.collection.find(filter).with_options(options).run().map_err(store_error)?;
                Ok(Cursor::new(MongoCursor::new(cursor)))
            }
        }
    }

    fn find_one(
        &self,
        ctx: &Context,
        filter: Document,
        options: Option<FindOneOptions>,
    ) -> RepoResult<Option<Document>> {
        ctx.check()?;
        run_in_session!(
            ctx,
            self.collection.find_one(filter).with_options(convert::find_one(ctx, options))
        )
    }

    fn find_one_and_update(
        &self,
        ctx: &Context,
        filter: Document,
        update: Document,
        options: Option<FindOneAndUpdateOptions>,
    ) -> RepoResult<Option<Document>> {
        ctx.check()?;
        log::debug!("find_one_and_update on {}", self.name);
        run_in_session!(
            ctx,
            self.collection
                .find_one_and_update(filter, update)
                .with_options(convert::find_one_and_update(ctx, options))
        )
    }

    fn find_one_and_delete(
        &self,
        ctx: &Context,
        filter: Document,
        options: Option<FindOneAndDeleteOptions>,
    ) -> RepoResult<Option<Document>> {
        ctx.check()?;
        log::debug!("find_one_and_delete on {}", self.name);
        run_in_session!(
            ctx,
            self.collection
                .find_one_and_delete(filter)
                .with_options(convert::find_one_and_delete(ctx, options))
        )
    }

    fn update_one(
        &self,
        ctx: &Context,
        filter: Document,
        update: Document,
        options: Option<UpdateOptions>,
    ) -> RepoResult<UpdateResult> {
        ctx.check()?;
        log::debug!("update_one on {}", self.name);
        run_in_session!(
            ctx,
            self.collection.update_one(filter, update).with_options(convert::update(options))
        )
        .map(update_result)
    }

    fn update_many(
        &self,
        ctx: &Context,
        filter: Document,
        update: Document,
        options: Option<UpdateOptions>,
    ) -> RepoResult<UpdateResult> {
        ctx.check()?;
        log::debug!("update_many on {}", self.name);
        run_in_session!(
            ctx,
            self.collection.update_many(filter, update).with_options(convert::update(options))
        )
        .map(update_result)
    }

    fn delete_one(
        &self,
        ctx: &Context,
        filter: Document,
        options: Option<DeleteOptions>,
    ) -> RepoResult<DeleteResult> {
        ctx.check()?;
        log::debug!("delete_one on {}", self.name);
        let result = run_in_session!(
            ctx,
            self.collection.delete_one(filter).with_options(convert::delete(options))
        )?;
        Ok(DeleteResult {
            deleted_count: result.deleted_count,
        })
    }

    fn delete_many(
        &self,
        ctx: &Context,
        filter: Document,
        options: Option<DeleteOptions>,
    ) -> RepoResult<DeleteResult> {
        ctx.check()?;
        log::debug!("delete_many on {}", self.name);
        let result = run_in_session!(
            ctx,
            self.collection.delete_many(filter).with_options(convert::delete(options))
        )?;
        Ok(DeleteResult {
            deleted_count: result.deleted_count,
        })
    }

    fn estimated_document_count(
        &self,
        ctx: &Context,
        options: Option<EstimatedCountOptions>,
    ) -> RepoResult<u64> {
        ctx.check()?;
        // Not permitted inside transactions, so never sent with the session.
        self.collection
            .estimated_document_count()
            .with_options(convert::estimated_count(ctx, options))
            .run()
            .map_err(store_error)
    }

    fn count_documents(
        &self,
        ctx: &Context,
        filter: Document,
        options: Option<CountOptions>,
    ) -> RepoResult<u64> {
        ctx.check()?;
        run_in_session!(
            ctx,
            self.collection.count_documents(filter).with_options(convert::count(ctx, options))
        )
    }

    fn aggregate(
        &self,
        ctx: &Context,
        pipeline: Vec<Document>,
        options: Option<AggregateOptions>,
    ) -> RepoResult<Cursor> {
        ctx.check()?;
        log::debug!("aggregate of {} stages on {}", pipeline.len(), self.name);
        let options = convert::aggregate(ctx, options);
        match MongoSession::from_context(ctx)? {
            Some(session) => {
                let mut guard = session.lock()?;
                let cursor = self
                    .collection
                    .aggregate(pipeline)
                    .with_options(options)
                    .session(&mut *guard)
                    .run()
                    .map_err(store_error)?;
                drain(ctx, cursor, &mut guard).map(Cursor::from_documents)
            }
            None => {
                let cursor = self
                    .collection
                    .aggregate(pipeline)
                    .with_options(options)
                    .run()
                    .map_err(store_error)?;
                Ok(Cursor::new(MongoCursor::new(cursor)))
            }
        }
    }

    fn distinct(
        &self,
        ctx: &Context,
        field_name: &str,
        filter: Document,
        options: Option<DistinctOptions>,
    ) -> RepoResult<Vec<Bson>> {
        ctx.check()?;
        run_in_session!(
            ctx,
            self.collection
                .distinct(field_name, filter)
                .with_options(convert::distinct(ctx, options))
        )
    }

    fn bulk_write(
        &self,
        ctx: &Context,
        models: Vec<WriteModel>,
        options: Option<BulkWriteOptions>,
    ) -> RepoResult<BulkWriteResult> {
        ctx.check()?;
        log::debug!("bulk_write of {} operations into {}", models.len(), self.name);
        if models.is_empty() {
            return Err(RepoError::new("write models must be a non-empty list", ErrorKind::BackendError));
        }
        let ordered = convert::is_ordered(&options);
        let batch = convert::bulk_models(&self.collection.namespace(), models.iter().cloned());
        let client = self.database.client();
        let outcome = match MongoSession::from_context(ctx)? {
            Some(session) => {
                let mut guard = session.lock()?;
                client
                    .bulk_write(batch)
                    .verbose_results()
                    .ordered(ordered)
                    .session(&mut *guard)
                    .run()
            }
            None => client.bulk_write(batch).verbose_results().ordered(ordered).run(),
        };
        match outcome {
            Ok(verbose) => return Ok(convert::bulk_write_result(verbose)),
            Err(err) if matches!(*err.kind, MongoErrorKind::IncompatibleServer { .. }) => {
                log::warn!("server has no bulkWrite command, applying {} operations one by one", models.len());
            }
            Err(err) => return Err(store_error(err)),
        }

        // Servers before 8.0: one round trip per model.
        let mut result = BulkWriteResult::default();
        let mut first_error: Option<RepoError> = None;
        for (index, model) in models.into_iter().enumerate() {
            ctx.check()?;
            let operation = model.operation_name();
            if let Err(err) = self.apply_model(ctx, index, model, &mut result) {
                log::debug!("bulk operation {} ({}) failed: {}", index, operation, err);
                if ordered {
                    return Err(err);
                }
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(result),
        }
    }

    fn watch(
        &self,
        ctx: &Context,
        pipeline: Vec<Document>,
        options: Option<ChangeStreamOptions>,
    ) -> RepoResult<ChangeStream> {
        ctx.check()?;
        log::debug!("watching {}", self.name);
        let options = convert::change_stream(options)?;
        let stream = self
            .collection
            .watch()
            .pipeline(pipeline)
            .with_options(options)
            .run()
            .map_err(store_error)?
            .with_type::<Document>();
        Ok(ChangeStream::new(MongoChangeStream::new(stream)))
    }

    fn create_indexes(
        &self,
        ctx: &Context,
        models: Vec<IndexModel>,
        options: Option<CreateIndexesOptions>,
    ) -> RepoResult<Vec<String>> {
        ctx.check()?;
        log::debug!("create_indexes on {}", self.name);
        let models: Vec<mongodb::IndexModel> = models.into_iter().map(convert::index_model).collect();
        let result = run_in_session!(
            ctx,
            self.collection
                .create_indexes(models)
                .with_options(convert::create_indexes(ctx, options))
        )?;
        Ok(result.index_names)
    }

    fn list_indexes(&self, ctx: &Context) -> RepoResult<Vec<Document>> {
        ctx.check()?;
        let listed: RepoResult<Vec<mongodb::IndexModel>> = match MongoSession::from_context(ctx)? {
            Some(session) => {
                let mut guard = session.lock()?;
                match self.collection.list_indexes().session(&mut *guard).run() {
                    Ok(cursor) => drain(ctx, cursor, &mut guard),
                    Err(err) => missing_namespace(err),
                }
            }
            None => match self.collection.list_indexes().run() {
                Ok(cursor) => cursor.map(|model| model.map_err(store_error)).collect(),
                Err(err) => missing_namespace(err),
            },
        };
        listed?
            .iter()
            .map(|model| bson::to_document(model).map_err(RepoError::from))
            .collect()
    }

    fn drop_index(&self, ctx: &Context, name: &str) -> RepoResult<()> {
        ctx.check()?;
        log::debug!("dropping index {} on {}", name, self.name);
        run_in_session!(ctx, self.collection.drop_index(name))
    }

    fn drop(&self, ctx: &Context) -> RepoResult<()> {
        ctx.check()?;
        log::debug!("dropping collection {}", self.name);
        run_in_session!(ctx, self.collection.drop())
    }
}

// A collection that was never written to has no indexes to list.
fn missing_namespace<T>(err: mongodb::error::Error) -> RepoResult<Vec<T>> {
    if error_code(&err) == Some(NAMESPACE_NOT_FOUND) {
        Ok(Vec::new())
    } else {
        Err(store_error(err))
    }
}
