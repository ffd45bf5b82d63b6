use crate::repository::{generate_user, order, Order, User};
use docrepo::bson::doc;
use docrepo::errors::{ErrorKind, RepoError};
use docrepo::options::{ReadConcernLevel, SessionOptions, TransactionOptions};
use docrepo::repository::Repository;
use docrepo_int_test::test_util::{cleanup, create_test_context, run_test};
use std::cell::Cell;

#[test]
fn test_commit_makes_writes_visible() {
    run_test(
        create_test_context,
        |ctx| {
            let users: Repository<User> = ctx.repository("users");
            let orders: Repository<Order> = ctx.repository("orders");
            // Collections must exist before a transaction writes to them.
            users.ensure_indexes_from_model(ctx.ctx(), None)?;
            orders.ensure_indexes_from_model(ctx.ctx(), None)?;

            let email = users.transaction(
                ctx.ctx(),
                |tx| {
                    let user = users.insert_one(tx, generate_user(), None)?;
                    orders.insert_one(tx, order(&user.email, 99, "paid"), None)?;
                    assert_eq!(users.count_documents(tx, None, None)?, 1);
                    Ok(user.email)
                },
                None,
            )?;

            assert_eq!(users.count_documents(ctx.ctx(), None, None)?, 1);
            let placed = orders.find_one(ctx.ctx(), doc! { "customer": &email }, None)?;
            assert_eq!(placed.amount, 99);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_error_aborts_and_is_returned_unchanged() {
    run_test(
        create_test_context,
        |ctx| {
            let users: Repository<User> = ctx.repository("users");
            users.ensure_indexes_from_model(ctx.ctx(), None)?;

            let result: Result<(), RepoError> = users.transaction(
                ctx.ctx(),
                |tx| {
                    users.insert_one(tx, generate_user(), None)?;
                    Err(RepoError::new("insufficient funds", ErrorKind::ValidationError))
                },
                None,
            );
            let err = result.unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::ValidationError);
            assert_eq!(err.message(), "insufficient funds");
            assert_eq!(users.count_documents(ctx.ctx(), None, None)?, 0);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_writes_are_isolated_until_commit() {
    run_test(
        create_test_context,
        |ctx| {
            let users: Repository<User> = ctx.repository("users");
            users.ensure_indexes_from_model(ctx.ctx(), None)?;
            let outside_count = Cell::new(u64::MAX);

            ctx.db().with_transaction(
                ctx.ctx(),
                |tx| {
                    users.insert_one(tx, generate_user(), None)?;
                    outside_count.set(users.count_documents(ctx.ctx(), None, None)?);
                    Ok(())
                },
                SessionOptions::new().default_transaction_options(
                    TransactionOptions::new().read_concern(ReadConcernLevel::Snapshot),
                ),
            )?;

            assert_eq!(outside_count.get(), 0);
            assert_eq!(users.count_documents(ctx.ctx(), None, None)?, 1);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_unique_violation_inside_transaction() {
    run_test(
        create_test_context,
        |ctx| {
            let users: Repository<User> = ctx.repository("users");
            users.ensure_indexes_from_model(ctx.ctx(), None)?;
            let existing = users.insert_one(ctx.ctx(), generate_user(), None)?;

            let err = users
                .transaction(
                    ctx.ctx(),
                    |tx| {
                        users.insert_one(tx, generate_user(), None)?;
                        let mut clash = generate_user();
                        clash.email = existing.email.clone();
                        users.insert_one(tx, clash, None)
                    },
                    None,
                )
                .unwrap_err();
            assert!(err.is_caused_by(&ErrorKind::DuplicateKey));
            assert_eq!(users.count_documents(ctx.ctx(), None, None)?, 1);
            Ok(())
        },
        cleanup,
    )
}
