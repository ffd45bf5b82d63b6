//! Translation of repository option structs into driver option structs.
//!
//! A `max_time` left unset is taken from the context deadline, so the server
//! gives up no later than the caller does.

use std::time::Duration;

use docrepo::bson::{self, Bson, Document};
use docrepo::context::Context;
use docrepo::driver::{BulkWriteResult, DeleteResult, UpdateResult, WriteModel};
use docrepo::errors::{ErrorKind, RepoError, RepoResult};
use docrepo::model::IndexModel;
use docrepo::options::{
    AggregateOptions, BulkWriteOptions, ChangeStreamOptions, CountOptions, CreateIndexesOptions,
    DeleteOptions, DistinctOptions, EstimatedCountOptions, FindOneAndDeleteOptions,
    FindOneAndUpdateOptions, FindOneOptions, FindOptions, FullDocumentType, InsertManyOptions,
    InsertOneOptions, ReadConcernLevel, ReturnDocument, SessionOptions, TransactionOptions,
    UpdateOptions, WriteConcernLevel,
};
use mongodb::change_stream::event::ResumeToken;
use mongodb::options as driver;
use mongodb::results::VerboseBulkWriteResult;
use mongodb::Namespace;

fn max_time(ctx: &Context, explicit: Option<Duration>) -> Option<Duration> {
    explicit.or_else(|| ctx.remaining())
}

pub(crate) fn find(ctx: &Context, options: Option<FindOptions>) -> driver::FindOptions {
    let options = options.unwrap_or_default();
    let mut converted = driver::FindOptions::default();
    converted.skip = options.skip;
    converted.limit = options.limit;
    converted.sort = options.sort;
    converted.projection = options.projection;
    converted.batch_size = options.batch_size;
    converted.max_time = max_time(ctx, options.max_time);
    converted
}

pub(crate) fn find_one(ctx: &Context, options: Option<FindOneOptions>) -> driver::FindOneOptions {
    let options = options.unwrap_or_default();
    let mut converted = driver::FindOneOptions::default();
    converted.skip = options.skip;
    converted.sort = options.sort;
    converted.projection = options.projection;
    converted.max_time = max_time(ctx, options.max_time);
    converted
}

pub(crate) fn find_one_and_update(
    ctx: &Context,
    options: Option<FindOneAndUpdateOptions>,
) -> driver::FindOneAndUpdateOptions {
    let options = options.unwrap_or_default();
    let mut converted = driver::FindOneAndUpdateOptions::default();
    converted.upsert = options.upsert;
    converted.sort = options.sort;
    converted.projection = options.projection;
    converted.return_document = options.return_document.map(|r| match r {
        ReturnDocument::Before => driver::ReturnDocument::Before,
        ReturnDocument::After => driver::ReturnDocument::After,
    });
    converted.max_time = max_time(ctx, options.max_time);
    converted
}

pub(crate) fn find_one_and_delete(
    ctx: &Context,
    options: Option<FindOneAndDeleteOptions>,
) -> driver::FindOneAndDeleteOptions {
    let options = options.unwrap_or_default();
    let mut converted = driver::FindOneAndDeleteOptions::default();
    converted.sort = options.sort;
    converted.projection = options.projection;
    converted.max_time = max_time(ctx, options.max_time);
    converted
}

pub(crate) fn insert_one(options: Option<InsertOneOptions>) -> driver::InsertOneOptions {
    let options = options.unwrap_or_default();
    let mut converted = driver::InsertOneOptions::default();
    converted.bypass_document_validation = options.bypass_document_validation;
    converted
}

pub(crate) fn insert_many(options: Option<InsertManyOptions>) -> driver::InsertManyOptions {
    let options = options.unwrap_or_default();
    let mut converted = driver::InsertManyOptions::default();
    converted.ordered = Some(options.is_ordered());
    converted.bypass_document_validation = options.bypass_document_validation;
    converted
}

pub(crate) fn update(options: Option<UpdateOptions>) -> driver::UpdateOptions {
    let options = options.unwrap_or_default();
    let mut converted = driver::UpdateOptions::default();
    converted.upsert = options.upsert;
    converted.hint = options.hint.map(driver::Hint::Keys);
    converted
}

pub(crate) fn replace(upsert: Option<bool>) -> driver::ReplaceOptions {
    let mut converted = driver::ReplaceOptions::default();
    converted.upsert = upsert;
    converted
}

pub(crate) fn upsert_only(upsert: Option<bool>) -> driver::UpdateOptions {
    let mut converted = driver::UpdateOptions::default();
    converted.upsert = upsert;
    converted
}

pub(crate) fn delete(options: Option<DeleteOptions>) -> driver::DeleteOptions {
    let options = options.unwrap_or_default();
    let mut converted = driver::DeleteOptions::default();
    converted.hint = options.hint.map(driver::Hint::Keys);
    converted
}

pub(crate) fn estimated_count(
    ctx: &Context,
    options: Option<EstimatedCountOptions>,
) -> driver::EstimatedDocumentCountOptions {
    let options = options.unwrap_or_default();
    let mut converted = driver::EstimatedDocumentCountOptions::default();
    converted.max_time = max_time(ctx, options.max_time);
    converted
}

pub(crate) fn count(ctx: &Context, options: Option<CountOptions>) -> driver::CountOptions {
    let options = options.unwrap_or_default();
    let mut converted = driver::CountOptions::default();
    converted.skip = options.skip;
    converted.limit = options.limit;
    converted.max_time = max_time(ctx, options.max_time);
    converted
}

pub(crate) fn distinct(ctx: &Context, options: Option<DistinctOptions>) -> driver::DistinctOptions {
    let options = options.unwrap_or_default();
    let mut converted = driver::DistinctOptions::default();
    converted.max_time = max_time(ctx, options.max_time);
    converted
}

pub(crate) fn aggregate(ctx: &Context, options: Option<AggregateOptions>) -> driver::AggregateOptions {
    let options = options.unwrap_or_default();
    let mut converted = driver::AggregateOptions::default();
    converted.allow_disk_use = options.allow_disk_use;
    converted.batch_size = options.batch_size;
    converted.let_vars = options.let_vars;
    converted.max_time = max_time(ctx, options.max_time);
    converted
}

pub(crate) fn is_ordered(options: &Option<BulkWriteOptions>) -> bool {
    options.as_ref().map(BulkWriteOptions::is_ordered).unwrap_or(true)
}

/// Addresses every write model to `namespace` for a client-level bulk write.
pub(crate) fn bulk_models(
    namespace: &Namespace,
    models: impl IntoIterator<Item = WriteModel>,
) -> Vec<driver::WriteModel> {
    models
        .into_iter()
        .map(|model| match model {
            WriteModel::InsertOne { document } => driver::InsertOneModel::builder()
                .namespace(namespace.clone())
                .document(document)
                .build()
                .into(),
            WriteModel::UpdateOne { filter, update, upsert } => driver::UpdateOneModel::builder()
                .namespace(namespace.clone())
                .filter(filter)
                .update(driver::UpdateModifications::Document(update))
                .upsert(upsert)
                .build()
                .into(),
            WriteModel::UpdateMany { filter, update, upsert } => driver::UpdateManyModel::builder()
                .namespace(namespace.clone())
                .filter(filter)
                .update(driver::UpdateModifications::Document(update))
                .upsert(upsert)
                .build()
                .into(),
            WriteModel::ReplaceOne {
                filter,
                replacement,
                upsert,
            } => driver::ReplaceOneModel::builder()
                .namespace(namespace.clone())
                .filter(filter)
                .replacement(replacement)
                .upsert(upsert)
                .build()
                .into(),
            WriteModel::DeleteOne { filter } => driver::DeleteOneModel::builder()
                .namespace(namespace.clone())
                .filter(filter)
                .build()
                .into(),
            WriteModel::DeleteMany { filter } => driver::DeleteManyModel::builder()
                .namespace(namespace.clone())
                .filter(filter)
                .build()
                .into(),
        })
        .collect()
}

pub(crate) fn bulk_write_result(verbose: VerboseBulkWriteResult) -> BulkWriteResult {
    let mut result = BulkWriteResult::default();
    for (index, inserted) in verbose.insert_results {
        result.add_insert(index, inserted.inserted_id);
    }
    for (index, updated) in verbose.update_results {
        result.add_update(
            index,
            UpdateResult {
                matched_count: updated.matched_count,
                modified_count: updated.modified_count,
                upserted_id: updated.upserted_id,
            },
        );
    }
    for deleted in verbose.delete_results.into_values() {
        result.add_delete(DeleteResult {
            deleted_count: deleted.deleted_count,
        });
    }
    result
}

pub(crate) fn create_indexes(ctx: &Context, options: Option<CreateIndexesOptions>) -> driver::CreateIndexOptions {
    let options = options.unwrap_or_default();
    let mut converted = driver::CreateIndexOptions::default();
    converted.max_time = max_time(ctx, options.max_time);
    converted
}

pub(crate) fn index_model(model: IndexModel) -> mongodb::IndexModel {
    let options = model.options.map(|options| {
        driver::IndexOptions::builder()
            .name(options.name)
            .unique(options.unique)
            .sparse(options.sparse)
            .expire_after(options.expire_after)
            .build()
    });
    mongodb::IndexModel::builder().keys(model.keys).options(options).build()
}

pub(crate) fn change_stream(options: Option<ChangeStreamOptions>) -> RepoResult<driver::ChangeStreamOptions> {
    let options = options.unwrap_or_default();
    let mut converted = driver::ChangeStreamOptions::default();
    converted.full_document = options.full_document.and_then(|kind| match kind {
        FullDocumentType::Default => None,
        FullDocumentType::UpdateLookup => Some(driver::FullDocumentType::UpdateLookup),
        FullDocumentType::WhenAvailable => Some(driver::FullDocumentType::WhenAvailable),
        FullDocumentType::Required => Some(driver::FullDocumentType::Required),
    });
    converted.max_await_time = options.max_await_time;
    converted.batch_size = options.batch_size;
    converted.resume_after = match options.resume_after {
        Some(token) => Some(resume_token(token)?),
        None => None,
    };
    Ok(converted)
}

fn resume_token(token: Document) -> RepoResult<ResumeToken> {
    bson::from_bson::<ResumeToken>(Bson::Document(token))
        .map_err(|err| RepoError::from_source("invalid resume token", ErrorKind::ValidationError, err))
}

pub(crate) fn transaction(options: Option<TransactionOptions>) -> Option<driver::TransactionOptions> {
    let options = options?;
    let mut converted = driver::TransactionOptions::default();
    converted.read_concern = options.read_concern.map(|level| match level {
        ReadConcernLevel::Local => driver::ReadConcern::local(),
        ReadConcernLevel::Majority => driver::ReadConcern::majority(),
        ReadConcernLevel::Snapshot => driver::ReadConcern::snapshot(),
    });
    converted.write_concern = options.write_concern.map(|level| match level {
        WriteConcernLevel::Nodes(n) => driver::WriteConcern::nodes(n),
        WriteConcernLevel::Majority => driver::WriteConcern::majority(),
    });
    converted.max_commit_time = options.max_commit_time;
    Some(converted)
}

pub(crate) fn session(options: Option<SessionOptions>) -> Option<driver::SessionOptions> {
    let options = options?;
    let mut converted = driver::SessionOptions::default();
    converted.causal_consistency = options.causal_consistency;
    converted.default_transaction_options = transaction(options.default_transaction_options);
    Some(converted)
}
