use crate::repository::{generate_user, User};
use docrepo::bson::{doc, oid::ObjectId, Bson};
use docrepo::errors::ErrorKind;
use docrepo::repository::{Repository, Update};
use docrepo_int_test::test_util::{cleanup, create_test_context, run_test};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize, docrepo_derive::Model)]
struct Strict {
    count: i32,
}

#[test]
fn test_missing_documents_are_not_found() {
    run_test(
        create_test_context,
        |ctx| {
            let users: Repository<User> = ctx.repository("users");
            let id = ObjectId::new();

            let err = users.find_by_id(ctx.ctx(), id, None).unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::NotFound);
            let err = users.delete_by_id(ctx.ctx(), id, None).unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::NotFound);
            let err = users
                .find_one_and_update_by_id(ctx.ctx(), id, doc! { "$set": { "age": 1 } }, None)
                .unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::NotFound);
            let err = users.find_one_and_delete(ctx.ctx(), doc! { "_id": id }, None).unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::NotFound);

            // Updating nothing is a normal outcome.
            let result = users.update_by_id(ctx.ctx(), id, doc! { "$set": { "age": 1 } }, None)?;
            assert_eq!(result.matched_count, 0);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_unsupported_updates_are_rejected() {
    run_test(
        create_test_context,
        |ctx| {
            let users: Repository<User> = ctx.repository("users");
            let stored = users.insert_one(ctx.ctx(), generate_user(), None)?;
            let id = stored.base.id().expect("id assigned on insert");

            let err = users.update_by_id(ctx.ctx(), id, doc! {}, None).unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::ValidationError);
            assert!(err.message().starts_with("unsupported update type"));

            let err = users
                .update_by_id(ctx.ctx(), id, Update::Value(Bson::Int32(5)), None)
                .unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::ValidationError);

            // A field document without operators is neither an operator
            // update nor a typed value.
            let err = users
                .update_by_id(ctx.ctx(), id, doc! { "city": "Porto" }, None)
                .unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::ValidationError);
            let err = users
                .update_many(ctx.ctx(), None, doc! { "age": 1 }, None)
                .unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::ValidationError);

            assert_eq!(users.find_by_id(ctx.ctx(), id, None)?, stored);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_empty_insert_many() {
    run_test(
        create_test_context,
        |ctx| {
            let users: Repository<User> = ctx.repository("users");
            let err = users.insert_many(ctx.ctx(), vec![], None).unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::InsertError);
            assert_eq!(err.message(), "no documents to insert");
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_undecodable_documents() {
    run_test(
        create_test_context,
        |ctx| {
            let raw: Repository<docrepo::bson::Document> = ctx.repository("strict");
            raw.insert_one(ctx.ctx(), doc! { "count": "many" }, None)?;

            let strict: Repository<Strict> = ctx.repository("strict");
            let err = strict.find(ctx.ctx(), None, None).unwrap_err();
            assert!(err.is_caused_by(&ErrorKind::DecodeError) || err.kind() == &ErrorKind::DecodeError);
            let err = strict.find_one(ctx.ctx(), None, None).unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::DecodeError);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_cancelled_context_leaves_store_untouched() {
    run_test(
        create_test_context,
        |ctx| {
            let users: Repository<User> = ctx.repository("users");
            users.insert_one(ctx.ctx(), generate_user(), None)?;

            let cancelled = ctx.ctx().with_cancel();
            cancelled.cancel();
            let err = users.insert_one(&cancelled, generate_user(), None).unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::Cancelled);
            let err = users.delete_many(&cancelled, None, None).unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::Cancelled);
            let err = users.find(&cancelled, None, None).unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::Cancelled);

            assert_eq!(users.count_documents(ctx.ctx(), None, None)?, 1);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_expired_deadline_is_cancellation() {
    run_test(
        create_test_context,
        |ctx| {
            let users: Repository<User> = ctx.repository("users");
            let expired = ctx.ctx().with_timeout(Duration::ZERO);
            std::thread::sleep(Duration::from_millis(2));
            let err = users.count_documents(&expired, None, None).unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::Cancelled);
            Ok(())
        },
        cleanup,
    )
}
