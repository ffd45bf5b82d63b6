use crate::repository::{generate_user, Note, Order, User};
use docrepo::errors::ErrorKind;
use docrepo::model::{IndexModel, IndexOptions};
use docrepo::repository::Repository;
use docrepo_int_test::test_util::{cleanup, create_test_context, run_test};
use std::time::Duration;

fn index_names(indexes: &[docrepo::bson::Document]) -> Vec<String> {
    let mut names: Vec<String> = indexes
        .iter()
        .filter_map(|index| index.get_str("name").ok().map(str::to_string))
        .collect();
    names.sort();
    names
}

#[test]
fn test_ensure_indexes_from_model() {
    run_test(
        create_test_context,
        |ctx| {
            let users: Repository<User> = ctx.repository("users");
            let created = users.ensure_indexes_from_model(ctx.ctx(), None)?;
            assert_eq!(created, vec!["email_1".to_string(), "age_name".to_string()]);

            let names = index_names(&users.get_indexes(ctx.ctx())?);
            assert_eq!(names, vec!["_id_", "age_name", "email_1"]);

            // Declaring the same indexes again is a no-op.
            users.ensure_indexes_from_model(ctx.ctx(), None)?;
            assert_eq!(users.get_indexes(ctx.ctx())?.len(), 3);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_unique_index_rejects_duplicates() {
    run_test(
        create_test_context,
        |ctx| {
            let users: Repository<User> = ctx.repository("users");
            users.ensure_indexes_from_model(ctx.ctx(), None)?;

            let first = generate_user();
            let mut second = generate_user();
            second.email = first.email.clone();

            users.insert_one(ctx.ctx(), first, None)?;
            let err = users.insert_one(ctx.ctx(), second, None).unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::InsertError);
            assert!(err.is_caused_by(&ErrorKind::DuplicateKey));
            assert_eq!(users.count_documents(ctx.ctx(), None, None)?, 1);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_explicit_indexes_and_empty_list() {
    run_test(
        create_test_context,
        |ctx| {
            let orders: Repository<Order> = ctx.repository("orders");
            assert!(orders.ensure_indexes(ctx.ctx(), vec![], None)?.is_empty());

            let created = orders.ensure_indexes(
                ctx.ctx(),
                vec![
                    IndexModel::from_key_spec("status:1"),
                    IndexModel::from_key_spec("createdAt:1")
                        .with_options(IndexOptions::new().name("expiry").expire_after(Duration::from_secs(3600))),
                ],
                None,
            )?;
            assert_eq!(created, vec!["status_1".to_string(), "expiry".to_string()]);

            let indexes = orders.get_indexes(ctx.ctx())?;
            let expiry = indexes
                .iter()
                .find(|index| index.get_str("name").ok() == Some("expiry"))
                .expect("expiry index listed");
            assert!(expiry.contains_key("expireAfterSeconds"));
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_model_without_indexes() {
    run_test(
        create_test_context,
        |ctx| {
            let notes: Repository<Note> = ctx.repository("notes");
            notes.insert_one(ctx.ctx(), Note { text: "kept".to_string() }, None)?;

            let err = notes.ensure_indexes_from_model(ctx.ctx(), None).unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::ConfigurationError);
            assert_eq!(index_names(&notes.get_indexes(ctx.ctx())?), vec!["_id_".to_string()]);
            Ok(())
        },
        cleanup,
    )
}
