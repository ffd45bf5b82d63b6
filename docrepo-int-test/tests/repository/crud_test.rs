use crate::repository::{generate_user, user_aged, Note, User};
use docrepo::bson::{doc, Bson};
use docrepo::driver::WriteModel;
use docrepo::errors::ErrorKind;
use docrepo::options::{BulkWriteOptions, FindOptions, SortOrder};
use docrepo::repository::{Repository, Update};
use docrepo_int_test::test_util::{cleanup, create_test_context, run_test};
use std::thread;
use std::time::Duration;

#[test]
fn test_insert_one_returns_stored_document() {
    run_test(
        create_test_context,
        |ctx| {
            let users: Repository<User> = ctx.repository("users");
            let user = generate_user();
            let stored = users.insert_one(ctx.ctx(), user.clone(), None)?;

            let id = stored.base.id().expect("id assigned on insert");
            assert_eq!(stored.name, user.name);
            assert_eq!(stored.email, user.email);
            let created = stored.base.created_at().expect("stamped on insert");
            assert!(created <= chrono::Utc::now());
            assert!(chrono::Utc::now() - created < chrono::Duration::seconds(30));
            assert_eq!(stored.base.created_at(), stored.base.updated_at());

            let found = users.find_by_id(ctx.ctx(), id, None)?;
            assert_eq!(found, stored);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_insert_many_preserves_order() {
    run_test(
        create_test_context,
        |ctx| {
            let users: Repository<User> = ctx.repository("users");
            let batch: Vec<User> = (0..5).map(|_| generate_user()).collect();
            let ids = users.insert_many(ctx.ctx(), batch.clone(), None)?;
            assert_eq!(ids.len(), 5);

            for (id, user) in ids.iter().zip(batch.iter()) {
                let stored = users.find_by_id(ctx.ctx(), id.clone(), None)?;
                assert_eq!(stored.email, user.email);
                assert!(stored.base.created_at().is_some());
            }
            assert_eq!(users.count_documents(ctx.ctx(), None, None)?, 5);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_find_with_filter_and_sort() {
    run_test(
        create_test_context,
        |ctx| {
            let users: Repository<User> = ctx.repository("users");
            for (name, age) in [("Ann", 31), ("Bob", 25), ("Cid", 42), ("Dee", 19)] {
                users.insert_one(ctx.ctx(), user_aged(name, age), None)?;
            }

            let adults = users.find(
                ctx.ctx(),
                doc! { "age": { "$gte": 25 } },
                FindOptions::new().sort_by("age", SortOrder::Descending),
            )?;
            let names: Vec<&str> = adults.iter().map(|u| u.name.as_str()).collect();
            assert_eq!(names, vec!["Cid", "Ann", "Bob"]);

            let everyone = users.find(ctx.ctx(), None, None)?;
            assert_eq!(everyone.len(), 4);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_update_by_id_with_model_restamps_updated_at() {
    run_test(
        create_test_context,
        |ctx| {
            let users: Repository<User> = ctx.repository("users");
            let stored = users.insert_one(ctx.ctx(), generate_user(), None)?;
            let id = stored.base.id().expect("id assigned on insert");

            thread::sleep(Duration::from_millis(5));
            let mut changed = stored.clone();
            changed.city = "Lisbon".to_string();
            let result = users.update_by_id(ctx.ctx(), id, Update::Model(changed), None)?;
            assert_eq!(result.matched_count, 1);
            assert_eq!(result.modified_count, 1);

            let reloaded = users.find_by_id(ctx.ctx(), id, None)?;
            assert_eq!(reloaded.city, "Lisbon");
            assert_eq!(reloaded.base.created_at(), stored.base.created_at());
            assert!(reloaded.base.updated_at() > stored.base.updated_at());
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_update_with_operator_documents() {
    run_test(
        create_test_context,
        |ctx| {
            let users: Repository<User> = ctx.repository("users");
            let stored = users.insert_one(ctx.ctx(), user_aged("Eve", 30), None)?;
            let id = stored.base.id().expect("id assigned on insert");

            users.update_by_id(ctx.ctx(), id, doc! { "$inc": { "age": 2 } }, None)?;
            assert_eq!(users.find_by_id(ctx.ctx(), id, None)?.age, 32);

            users.update_by_id(ctx.ctx(), id, doc! { "$set": { "city": "Porto" } }, None)?;
            let reloaded = users.find_by_id(ctx.ctx(), id, None)?;
            assert_eq!(reloaded.city, "Porto");
            assert_eq!(reloaded.age, 32);
            assert_eq!(reloaded.name, "Eve");
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_update_many_reports_counts() {
    run_test(
        create_test_context,
        |ctx| {
            let users: Repository<User> = ctx.repository("users");
            for (name, age) in [("Fay", 17), ("Gus", 16), ("Hal", 40)] {
                users.insert_one(ctx.ctx(), user_aged(name, age), None)?;
            }

            let result = users.update_many(
                ctx.ctx(),
                doc! { "age": { "$lt": 18 } },
                doc! { "$set": { "tags": ["minor"] } },
                None,
            )?;
            assert_eq!(result.matched_count, 2);
            assert_eq!(result.modified_count, 2);

            let none = users.update_many(ctx.ctx(), doc! { "age": { "$gt": 100 } }, doc! { "$set": { "city": "x" } }, None)?;
            assert_eq!(none.matched_count, 0);

            let minors = users.count_documents(ctx.ctx(), doc! { "tags": "minor" }, None)?;
            assert_eq!(minors, 2);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_find_one_and_update_returns_new_version() {
    run_test(
        create_test_context,
        |ctx| {
            let users: Repository<User> = ctx.repository("users");
            let stored = users.insert_one(ctx.ctx(), user_aged("Ivy", 50), None)?;
            let id = stored.base.id().expect("id assigned on insert");

            let updated = users.find_one_and_update_by_id(ctx.ctx(), id, doc! { "$set": { "age": 51 } }, None)?;
            assert_eq!(updated.age, 51);
            assert_eq!(updated.base.id(), Some(id));
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_delete_operations() {
    run_test(
        create_test_context,
        |ctx| {
            let users: Repository<User> = ctx.repository("users");
            let first = users.insert_one(ctx.ctx(), user_aged("Jon", 20), None)?;
            users.insert_one(ctx.ctx(), user_aged("Kim", 21), None)?;
            users.insert_one(ctx.ctx(), user_aged("Lea", 22), None)?;
            users.insert_one(ctx.ctx(), user_aged("Max", 23), None)?;

            let id = first.base.id().expect("id assigned on insert");
            users.delete_by_id(ctx.ctx(), id, None)?;
            let err = users.find_by_id(ctx.ctx(), id, None).unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::NotFound);

            let removed = users.find_one_and_delete(ctx.ctx(), doc! { "name": "Kim" }, None)?;
            assert_eq!(removed.name, "Kim");

            let deleted = users.delete_many(ctx.ctx(), doc! { "age": { "$gte": 22 } }, None)?;
            assert_eq!(deleted, 2);
            assert_eq!(users.count_documents(ctx.ctx(), None, None)?, 0);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_distinct_values() {
    run_test(
        create_test_context,
        |ctx| {
            let users: Repository<User> = ctx.repository("users");
            for (name, city) in [("Ned", "Oslo"), ("Oda", "Rome"), ("Pia", "Oslo")] {
                let mut user = user_aged(name, 30);
                user.city = city.to_string();
                users.insert_one(ctx.ctx(), user, None)?;
            }

            let mut cities = users.distinct(ctx.ctx(), "city", None, None)?;
            cities.sort_by_key(|c| c.as_str().map(str::to_string));
            assert_eq!(cities, vec![Bson::from("Oslo"), Bson::from("Rome")]);

            let filtered = users.distinct(ctx.ctx(), "name", doc! { "city": "Rome" }, None)?;
            assert_eq!(filtered, vec![Bson::from("Oda")]);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_bulk_write_mixed_operations() {
    run_test(
        create_test_context,
        |ctx| {
            let users: Repository<User> = ctx.repository("users");
            users.insert_one(ctx.ctx(), user_aged("Quinn", 40), None)?;
            users.insert_one(ctx.ctx(), user_aged("Rex", 41), None)?;

            let models = vec![
                WriteModel::insert_model(user_aged("Sam", 18))?,
                WriteModel::update_one(doc! { "name": "Quinn" }, doc! { "$set": { "city": "Bern" } }),
                WriteModel::DeleteOne { filter: doc! { "name": "Rex" } },
            ];
            let result = users.bulk_write(ctx.ctx(), models, BulkWriteOptions::new().ordered(true))?;
            assert_eq!(result.inserted_count, 1);
            assert_eq!(result.matched_count, 1);
            assert_eq!(result.modified_count, 1);
            assert_eq!(result.deleted_count, 1);

            let sam = users.find_one(ctx.ctx(), doc! { "name": "Sam" }, None)?;
            assert!(sam.base.id().is_some());
            assert_eq!(users.find_one(ctx.ctx(), doc! { "name": "Quinn" }, None)?.city, "Bern");
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_raw_documents_without_hooks() {
    run_test(
        create_test_context,
        |ctx| {
            let notes: Repository<Note> = ctx.repository("notes");
            notes.insert_one(ctx.ctx(), Note { text: "first".to_string() }, None)?;
            notes.insert_one(ctx.ctx(), Note { text: "second".to_string() }, None)?;

            let found = notes.find_one(ctx.ctx(), doc! { "text": "second" }, None)?;
            assert_eq!(found.text, "second");

            // The raw collection still shows the store-assigned identifier.
            let raw: Repository<docrepo::bson::Document> = Repository::from_collection(notes.collection().clone());
            let document = raw.find_one(ctx.ctx(), doc! { "text": "first" }, None)?;
            assert!(document.get_object_id("_id").is_ok());
            assert!(!document.contains_key("createdAt"));
            Ok(())
        },
        cleanup,
    )
}
