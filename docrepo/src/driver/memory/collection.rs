use std::sync::Arc;

use bson::{Bson, Document};

use crate::context::Context;
use crate::driver::memory::aggregate::{run_pipeline, sort_documents};
use crate::driver::memory::change_feed::{validate_watch_pipeline, InMemoryChangeStream};
use crate::driver::memory::compare::values_equal;
use crate::driver::memory::database::{DatabaseState, InMemoryDatabase};
use crate::driver::memory::path::lookup;
use crate::driver::memory::projection::project;
use crate::driver::memory::session::InMemorySession;
use crate::driver::memory::store::{Change, CollectionData, Rewrite};
use crate::driver::memory::store_error;
use crate::driver::{
    BulkWriteResult, ChangeStream, CollectionProvider, Cursor, Database, DeleteResult,
    InsertManyResult, InsertOneResult, UpdateResult, WriteModel,
};
use crate::errors::{RepoError, RepoResult};
use crate::model::IndexModel;
use crate::options::{
    AggregateOptions, BulkWriteOptions, ChangeStreamOptions, CountOptions, CreateIndexesOptions,
    DeleteOptions, DistinctOptions, EstimatedCountOptions, FindOneAndDeleteOptions,
    FindOneAndUpdateOptions, FindOneOptions, FindOptions, InsertManyOptions, InsertOneOptions,
    ReturnDocument, UpdateOptions,
};

/// Collection of the in-memory driver.
///
/// Operations issued with a context bound to an [`InMemorySession`] that has
/// an open transaction work on the transaction's snapshot; all others work
/// on the live data and publish their changes immediately.
pub(crate) struct InMemoryCollection {
    name: String,
    state: Arc<DatabaseState>,
}

impl InMemoryCollection {
    pub fn new(name: &str, state: Arc<DatabaseState>) -> InMemoryCollection {
        InMemoryCollection {
            name: name.to_string(),
            state,
        }
    }

    fn transaction<'a>(&self, ctx: &'a Context) -> RepoResult<Option<&'a InMemorySession>> {
        let Some(session) = ctx.session() else {
            return Ok(None);
        };
        match session.provider_as::<InMemorySession>() {
            Some(own) if own.belongs_to(&self.state) => {
                Ok(if session.in_transaction() { Some(own) } else { None })
            }
            _ => Err(store_error("session was started on a different database")),
        }
    }

    fn read<R>(&self, ctx: &Context, f: impl FnOnce(&CollectionData) -> RepoResult<R>) -> RepoResult<R> {
        ctx.check()?;
        if let Some(session) = self.transaction(ctx)? {
            return session.with_snapshot(&self.name, |data, _| f(data));
        }
        match self.state.existing(&self.name) {
            Some(live) => f(&live.lock()),
            None => f(&CollectionData::new(&self.state.namespace(&self.name))),
        }
    }

    fn write<R>(
        &self,
        ctx: &Context,
        f: impl FnOnce(&mut CollectionData, &mut Vec<Change>) -> RepoResult<R>,
    ) -> RepoResult<R> {
        ctx.check()?;
        if let Some(session) = self.transaction(ctx)? {
            return session.with_snapshot(&self.name, f);
        }
        let live = self.state.get_or_create(&self.name);
        let mut data = live.lock();
        let mut changes = Vec::new();
        let result = f(&mut data, &mut changes);
        // whatever was applied before a failure is visible, so it is announced
        self.state.feed.publish(&self.name, changes);
        result
    }

    fn shape(
        &self,
        mut documents: Vec<Document>,
        sort: Option<&Document>,
        skip: Option<u64>,
        limit: Option<i64>,
        projection: Option<&Document>,
    ) -> RepoResult<Vec<Document>> {
        if let Some(sort) = sort {
            sort_documents(&mut documents, sort)?;
        }
        let skip = skip.unwrap_or(0) as usize;
        let limit = match limit {
            Some(0) | None => usize::MAX,
            Some(n) => n.unsigned_abs() as usize,
        };
        let selected = documents.into_iter().skip(skip).take(limit);
        match projection {
            Some(projection) => selected.map(|d| project(&d, projection, None)).collect(),
            None => Ok(selected.collect()),
        }
    }
}

impl CollectionProvider for InMemoryCollection {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn database(&self) -> Database {
        Database::new(InMemoryDatabase::from_state(self.state.clone()))
    }

    fn insert_one(
        &self,
        ctx: &Context,
        document: Document,
        _options: Option<InsertOneOptions>,
    ) -> RepoResult<InsertOneResult> {
        log::debug!("insert_one into {}", self.name);
        let inserted_id = self.write(ctx, |data, changes| data.insert(document, changes))?;
        Ok(InsertOneResult { inserted_id })
    }

    fn insert_many(
        &self,
        ctx: &Context,
        documents: Vec<Document>,
        options: Option<InsertManyOptions>,
    ) -> RepoResult<InsertManyResult> {
        log::debug!("insert_many of {} documents into {}", documents.len(), self.name);
        if documents.is_empty() {
            return Err(store_error("documents must be a non-empty list"));
        }
        let ordered = options.unwrap_or_default().is_ordered();
        self.write(ctx, |data, changes| {
            let mut inserted_ids = Vec::with_capacity(documents.len());
            let mut first_error: Option<RepoError> = None;
            for document in documents {
                match data.insert(document, changes) {
                    Ok(id) => inserted_ids.push(id),
                    Err(err) if ordered => return Err(err),
                    Err(err) => {
                        first_error.get_or_insert(err);
                    }
                }
            }
            match first_error {
                Some(err) => Err(err),
                None => Ok(InsertManyResult { inserted_ids }),
            }
        })
    }

    fn find(&self, ctx: &Context, filter: Document, options: Option<FindOptions>) -> RepoResult<Cursor> {
        log::debug!("find in {}", self.name);
        let options = options.unwrap_or_default();
        let found = self.read(ctx, |data| data.find(&filter))?;
        let documents = self.shape(
            found,
            options.sort.as_ref(),
            options.skip,
            options.limit,
            options.projection.as_ref(),
        )?;
        Ok(Cursor::from_documents(documents))
    }

    fn find_one(
        &self,
        ctx: &Context,
        filter: Document,
        options: Option<FindOneOptions>,
    ) -> RepoResult<Option<Document>> {
        let options: FindOptions = options.unwrap_or_default().into();
        let mut cursor = self.find(ctx, filter, Some(options))?;
        cursor.next_document(ctx).transpose()
    }

    fn find_one_and_update(
        &self,
        ctx: &Context,
        filter: Document,
        update: Document,
        options: Option<FindOneAndUpdateOptions>,
    ) -> RepoResult<Option<Document>> {
        log::debug!("find_one_and_update in {}", self.name);
        let options = options.unwrap_or_default();
        let report = self.write(ctx, |data, changes| {
            data.update(
                &filter,
                Rewrite::Operators(&update),
                options.sort.as_ref(),
                false,
                options.upsert.unwrap_or(false),
                changes,
            )
        })?;
        let image = match options.return_document.unwrap_or_default() {
            ReturnDocument::Before => report.before,
            ReturnDocument::After => report.after,
        };
        match (image, options.projection.as_ref()) {
            (Some(document), Some(projection)) => Ok(Some(project(&document, projection, None)?)),
            (image, _) => Ok(image),
        }
    }

    fn find_one_and_delete(
        &self,
        ctx: &Context,
        filter: Document,
        options: Option<FindOneAndDeleteOptions>,
    ) -> RepoResult<Option<Document>> {
        log::debug!("find_one_and_delete in {}", self.name);
        let options = options.unwrap_or_default();
        let removed = self.write(ctx, |data, changes| {
            data.delete(&filter, options.sort.as_ref(), false, changes)
        })?;
        match (removed.into_iter().next(), options.projection.as_ref()) {
            (Some(document), Some(projection)) => Ok(Some(project(&document, projection, None)?)),
            (document, _) => Ok(document),
        }
    }

    fn update_one(
        &self,
        ctx: &Context,
        filter: Document,
        update: Document,
        options: Option<UpdateOptions>,
    ) -> RepoResult<UpdateResult> {
        log::debug!("update_one in {}", self.name);
        let upsert = options.and_then(|o| o.upsert).unwrap_or(false);
        let report = self.write(ctx, |data, changes| {
            data.update(&filter, Rewrite::Operators(&update), None, false, upsert, changes)
        })?;
        Ok(UpdateResult {
            matched_count: report.matched,
            modified_count: report.modified,
            upserted_id: report.upserted_id,
        })
    }

    fn update_many(
        &self,
        ctx: &Context,
        filter: Document,
        update: Document,
        options: Option<UpdateOptions>,
    ) -> RepoResult<UpdateResult> {
        log::debug!("update_many in {}", self.name);
        let upsert = options.and_then(|o| o.upsert).unwrap_or(false);
        let report = self.write(ctx, |data, changes| {
            data.update(&filter, Rewrite::Operators(&update), None, true, upsert, changes)
        })?;
        Ok(UpdateResult {
            matched_count: report.matched,
            modified_count: report.modified,
            upserted_id: report.upserted_id,
        })
    }

    fn delete_one(
        &self,
        ctx: &Context,
        filter: Document,
        _options: Option<DeleteOptions>,
    ) -> RepoResult<DeleteResult> {
        log::debug!("delete_one in {}", self.name);
        let removed = self.write(ctx, |data, changes| data.delete(&filter, None, false, changes))?;
        Ok(DeleteResult {
            deleted_count: removed.len() as u64,
        })
    }

    fn delete_many(
        &self,
        ctx: &Context,
        filter: Document,
        _options: Option<DeleteOptions>,
    ) -> RepoResult<DeleteResult> {
        log::debug!("delete_many in {}", self.name);
        let removed = self.write(ctx, |data, changes| data.delete(&filter, None, true, changes))?;
        Ok(DeleteResult {
            deleted_count: removed.len() as u64,
        })
    }

    fn estimated_document_count(
        &self,
        ctx: &Context,
        _options: Option<EstimatedCountOptions>,
    ) -> RepoResult<u64> {
        self.read(ctx, |data| Ok(data.len() as u64))
    }

    fn count_documents(
        &self,
        ctx: &Context,
        filter: Document,
        options: Option<CountOptions>,
    ) -> RepoResult<u64> {
        let options = options.unwrap_or_default();
        let matched = self.read(ctx, |data| data.find(&filter))?.len() as u64;
        let remaining = matched.saturating_sub(options.skip.unwrap_or(0));
        Ok(match options.limit {
            Some(limit) if limit > 0 => remaining.min(limit),
            _ => remaining,
        })
    }

    fn aggregate(
        &self,
        ctx: &Context,
        pipeline: Vec<Document>,
        options: Option<AggregateOptions>,
    ) -> RepoResult<Cursor> {
        log::debug!("aggregate over {} with {} stages", self.name, pipeline.len());
        let vars = options.and_then(|o| o.let_vars);
        let documents = self.read(ctx, |data| data.find(&Document::new()))?;
        let results = run_pipeline(documents, &pipeline, vars.as_ref())?;
        Ok(Cursor::from_documents(results))
    }

    fn distinct(
        &self,
        ctx: &Context,
        field_name: &str,
        filter: Document,
        _options: Option<DistinctOptions>,
    ) -> RepoResult<Vec<Bson>> {
        let documents = self.read(ctx, |data| data.find(&filter))?;
        let mut values: Vec<Bson> = Vec::new();
        for document in &documents {
            for value in lookup(document, field_name) {
                let candidates = match value {
                    Bson::Array(items) => items,
                    other => vec![other],
                };
                for candidate in candidates {
                    if !values.iter().any(|v| values_equal(v, &candidate)) {
                        values.push(candidate);
                    }
                }
            }
        }
        Ok(values)
    }

    fn bulk_write(
        &self,
        ctx: &Context,
        models: Vec<WriteModel>,
        options: Option<BulkWriteOptions>,
    ) -> RepoResult<BulkWriteResult> {
        log::debug!("bulk_write of {} operations into {}", models.len(), self.name);
        if models.is_empty() {
            return Err(store_error("write models must be a non-empty list"));
        }
        let ordered = options.unwrap_or_default().is_ordered();
        self.write(ctx, |data, changes| {
            let mut result = BulkWriteResult::default();
            let mut first_error: Option<RepoError> = None;
            for (index, model) in models.into_iter().enumerate() {
                let operation = model.operation_name();
                match apply_model(data, model, changes) {
                    Ok(Applied::Inserted(id)) => result.add_insert(index, id),
                    Ok(Applied::Updated(update)) => result.add_update(index, update),
                    Ok(Applied::Deleted(delete)) => result.add_delete(delete),
                    Err(err) => {
                        log::debug!("bulk operation {} ({}) failed: {}", index, operation, err);
                        if ordered {
                            return Err(err);
                        }
                        first_error.get_or_insert(err);
                    }
                }
            }
            match first_error {
                Some(err) => Err(err),
                None => Ok(result),
            }
        })
    }

    fn watch(
        &self,
        ctx: &Context,
        pipeline: Vec<Document>,
        options: Option<ChangeStreamOptions>,
    ) -> RepoResult<ChangeStream> {
        ctx.check()?;
        validate_watch_pipeline(&pipeline)?;
        let options = options.unwrap_or_default();
        if options.resume_after.is_some() {
            log::warn!(
                "resume_after is not supported by the in-memory driver, watching {} from now",
                self.name
            );
        }
        let subscription = self.state.feed.subscribe(Some(&self.name));
        Ok(ChangeStream::new(InMemoryChangeStream::new(
            subscription,
            pipeline,
            options.full_document.unwrap_or_default(),
        )))
    }

    fn create_indexes(
        &self,
        ctx: &Context,
        models: Vec<IndexModel>,
        _options: Option<CreateIndexesOptions>,
    ) -> RepoResult<Vec<String>> {
        ctx.check()?;
        log::debug!("create_indexes on {}", self.name);
        let live = self.state.get_or_create(&self.name);
        let mut data = live.lock();
        models.into_iter().map(|model| data.create_index(model)).collect()
    }

    fn list_indexes(&self, ctx: &Context) -> RepoResult<Vec<Document>> {
        self.read(ctx, |data| Ok(data.indexes().iter().map(IndexModel::to_document).collect()))
    }

    fn drop_index(&self, ctx: &Context, name: &str) -> RepoResult<()> {
        ctx.check()?;
        match self.state.existing(&self.name) {
            Some(live) => live.lock().drop_index(name),
            None => Err(store_error(&format!("ns not found: {}", self.state.namespace(&self.name)))),
        }
    }

    fn drop(&self, ctx: &Context) -> RepoResult<()> {
        ctx.check()?;
        log::debug!("dropping {}", self.state.namespace(&self.name));
        self.state.remove(&self.name);
        Ok(())
    }
}

enum Applied {
    Inserted(Bson),
    Updated(UpdateResult),
    Deleted(DeleteResult),
}

fn apply_model(data: &mut CollectionData, model: WriteModel, changes: &mut Vec<Change>) -> RepoResult<Applied> {
    let (filter, rewrite_doc, replace, multi, upsert) = match model {
        WriteModel::InsertOne { document } => return data.insert(document, changes).map(Applied::Inserted),
        WriteModel::DeleteOne { filter } => return delete_model(data, filter, false, changes),
        WriteModel::DeleteMany { filter } => return delete_model(data, filter, true, changes),
        WriteModel::UpdateOne { filter, update, upsert } => (filter, update, false, false, upsert),
        WriteModel::UpdateMany { filter, update, upsert } => (filter, update, false, true, upsert),
        WriteModel::ReplaceOne {
            filter,
            replacement,
            upsert,
        } => (filter, replacement, true, false, upsert),
    };
    let rewrite = if replace {
        Rewrite::Replacement(&rewrite_doc)
    } else {
        Rewrite::Operators(&rewrite_doc)
    };
    let report = data.update(&filter, rewrite, None, multi, upsert.unwrap_or(false), changes)?;
    Ok(Applied::Updated(UpdateResult {
        matched_count: report.matched,
        modified_count: report.modified,
        upserted_id: report.upserted_id,
    }))
}

fn delete_model(
    data: &mut CollectionData,
    filter: Document,
    multi: bool,
    changes: &mut Vec<Change>,
) -> RepoResult<Applied> {
    let removed = data.delete(&filter, None, multi, changes)?;
    Ok(Applied::Deleted(DeleteResult {
        deleted_count: removed.len() as u64,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::memory::InMemoryDatabase;
    use crate::errors::ErrorKind;
    use crate::options::{FindOneAndUpdateOptions, FullDocumentType};
    use bson::doc;
    use std::time::Duration;

    fn people() -> (Database, crate::driver::Collection, Context) {
        let db = InMemoryDatabase::open("test");
        let collection = db.collection("people");
        let ctx = Context::background();
        collection
            .insert_many(
                &ctx,
                vec![
                    doc! { "_id": 1, "name": "ada", "age": 36, "tags": ["math", "code"] },
                    doc! { "_id": 2, "name": "alan", "age": 41, "tags": ["code"] },
                    doc! { "_id": 3, "name": "grace", "age": 85, "tags": [] },
                ],
                None,
            )
            .unwrap();
        (db, collection, ctx)
    }

    #[test]
    fn test_find_with_sort_skip_limit_projection() {
        let (_db, collection, ctx) = people();
        let options = FindOptions::new()
            .sort(doc! { "age": -1 })
            .skip(1)
            .limit(1)
            .projection(doc! { "name": 1, "_id": 0 });
        let found = collection
            .find(&ctx, doc! {}, Some(options))
            .unwrap()
            .collect_documents(&ctx)
            .unwrap();
        assert_eq!(found, vec![doc! { "name": "alan" }]);
    }

    #[test]
    fn test_find_one_and_update_return_document() {
        let (_db, collection, ctx) = people();
        let before = collection
            .find_one_and_update(&ctx, doc! { "_id": 1 }, doc! { "$inc": { "age": 1 } }, None)
            .unwrap()
            .unwrap();
        assert_eq!(before.get_i32("age").unwrap(), 36);
        let after = collection
            .find_one_and_update(
                &ctx,
                doc! { "_id": 1 },
                doc! { "$inc": { "age": 1 } },
                Some(FindOneAndUpdateOptions::new().return_document(ReturnDocument::After)),
            )
            .unwrap()
            .unwrap();
        assert_eq!(after.get_i32("age").unwrap(), 38);
        let missing = collection
            .find_one_and_update(&ctx, doc! { "_id": 99 }, doc! { "$set": { "a": 1 } }, None)
            .unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_counts_and_distinct() {
        let (_db, collection, ctx) = people();
        assert_eq!(collection.estimated_document_count(&ctx, None).unwrap(), 3);
        assert_eq!(
            collection
                .count_documents(&ctx, doc! { "age": { "$gt": 40 } }, None)
                .unwrap(),
            2
        );
        assert_eq!(
            collection
                .count_documents(&ctx, doc! {}, Some(CountOptions::new().skip(1).limit(1)))
                .unwrap(),
            1
        );
        let tags = collection.distinct(&ctx, "tags", doc! {}, None).unwrap();
        assert_eq!(tags, vec![Bson::from("math"), Bson::from("code")]);
    }

    #[test]
    fn test_bulk_write_ordered_and_unordered() {
        let (_db, collection, ctx) = people();
        let models = vec![
            WriteModel::insert_one(doc! { "_id": 4, "name": "linus" }),
            WriteModel::update_one(doc! { "_id": 1 }, doc! { "$set": { "age": 37 } }),
            WriteModel::delete_many(doc! { "age": { "$gt": 80 } }),
            WriteModel::replace_one(doc! { "_id": 9 }, doc! { "name": "new" }).with_upsert(true),
        ];
        let result = collection.bulk_write(&ctx, models, None).unwrap();
        assert_eq!(result.inserted_count, 1);
        assert_eq!(result.modified_count, 1);
        assert_eq!(result.deleted_count, 1);
        assert_eq!(result.upserted_ids.get(&3), Some(&Bson::Int32(9)));

        let failing = vec![
            WriteModel::insert_one(doc! { "_id": 1 }),
            WriteModel::insert_one(doc! { "_id": 10 }),
        ];
        let err = collection.bulk_write(&ctx, failing.clone(), None).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::DuplicateKey);
        assert!(collection.find_one(&ctx, doc! { "_id": 10 }, None).unwrap().is_none());

        let unordered = Some(BulkWriteOptions::new().ordered(false));
        assert!(collection.bulk_write(&ctx, failing, unordered).is_err());
        assert!(collection.find_one(&ctx, doc! { "_id": 10 }, None).unwrap().is_some());
    }

    #[test]
    fn test_transactional_writes_are_invisible_outside() {
        let (db, collection, ctx) = people();
        let session = db.start_session(&ctx, None).unwrap();
        session.start_transaction(&ctx, None).unwrap();
        let tx_ctx = ctx.with_session(session.clone());
        collection.delete_many(&tx_ctx, doc! {}, None).unwrap();
        assert_eq!(collection.count_documents(&tx_ctx, doc! {}, None).unwrap(), 0);
        assert_eq!(collection.count_documents(&ctx, doc! {}, None).unwrap(), 3);
        session.commit_transaction(&ctx).unwrap();
        assert_eq!(collection.count_documents(&ctx, doc! {}, None).unwrap(), 0);
    }

    #[test]
    fn test_foreign_session_is_rejected() {
        let (_db, collection, ctx) = people();
        let other = InMemoryDatabase::open("other");
        let session = other.start_session(&ctx, None).unwrap();
        let err = collection
            .find_one(&ctx.with_session(session), doc! {}, None)
            .unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::BackendError);
    }

    #[test]
    fn test_watch_receives_changes() {
        let (_db, collection, ctx) = people();
        let mut stream = collection
            .watch(
                &ctx,
                vec![doc! { "$match": { "operationType": { "$in": ["update", "delete"] } } }],
                Some(ChangeStreamOptions::new().full_document(FullDocumentType::UpdateLookup)),
            )
            .unwrap();
        collection.insert_one(&ctx, doc! { "_id": 5 }, None).unwrap();
        collection
            .update_one(&ctx, doc! { "_id": 5 }, doc! { "$set": { "x": 1 } }, None)
            .unwrap();
        let event = stream.next(&ctx.with_timeout(Duration::from_secs(5))).unwrap().unwrap();
        assert_eq!(event.operation_type(), Some(crate::driver::OperationType::Update));
        assert_eq!(event.full_document_raw().unwrap(), &doc! { "_id": 5, "x": 1 });
        assert!(collection
            .watch(&ctx, vec![doc! { "$group": { "_id": 1 } }], None)
            .is_err());
    }

    #[test]
    fn test_indexes() {
        let (_db, collection, ctx) = people();
        let names = collection
            .create_indexes(&ctx, vec![IndexModel::from_key_spec("name:1,age:-1")], None)
            .unwrap();
        assert_eq!(names, vec!["name_1_age_-1".to_string()]);
        let listed = collection.list_indexes(&ctx).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].get_str("name").unwrap(), "_id_");
        collection.drop_index(&ctx, "name_1_age_-1").unwrap();
        assert_eq!(collection.list_indexes(&ctx).unwrap().len(), 1);
    }

    #[test]
    fn test_cancelled_context_skips_write() {
        let (_db, collection, ctx) = people();
        let cancelled = ctx.with_cancel();
        cancelled.cancel();
        let err = collection.delete_many(&cancelled, doc! {}, None).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::Cancelled);
        assert_eq!(collection.estimated_document_count(&ctx, None).unwrap(), 3);
    }
}
