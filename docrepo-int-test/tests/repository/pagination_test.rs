use crate::repository::{user_aged, User};
use docrepo::bson::doc;
use docrepo::errors::ErrorKind;
use docrepo::options::{FindOptions, SortOrder};
use docrepo::repository::Repository;
use docrepo_int_test::test_util::{cleanup, create_test_context, run_test, TestContext};
use docrepo::errors::RepoResult;

fn seed(ctx: &TestContext, count: i32) -> RepoResult<Repository<User>> {
    let users: Repository<User> = ctx.repository("users");
    let batch: Vec<User> = (0..count).map(|i| user_aged(&format!("user{:02}", i), 20 + i)).collect();
    users.insert_many(ctx.ctx(), batch, None)?;
    Ok(users)
}

#[test]
fn test_pages_partition_the_collection() {
    run_test(
        create_test_context,
        |ctx| {
            let users = seed(&ctx, 23)?;

            let mut seen = Vec::new();
            for page in 1..=3 {
                let (items, total) = users.find_paginated_with_total(ctx.ctx(), None, page, 10)?;
                assert_eq!(total, 23);
                seen.extend(items.into_iter().map(|u| u.email));
            }
            seen.sort();
            seen.dedup();
            assert_eq!(seen.len(), 23);

            let last = users.find_paginated(ctx.ctx(), None, 3, 10)?;
            assert_eq!(last.len(), 3);
            let beyond = users.find_paginated(ctx.ctx(), None, 4, 10)?;
            assert!(beyond.is_empty());
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_total_counts_the_filter_not_the_page() {
    run_test(
        create_test_context,
        |ctx| {
            let users = seed(&ctx, 15)?;
            let filter = doc! { "age": { "$gte": 30 } };

            let (items, total) = users.find_paginated_with_total(ctx.ctx(), filter.clone(), 1, 2)?;
            assert_eq!(items.len(), 2);
            assert_eq!(total, 5);

            let (sorted, total) = users.find_decoded_with_total(
                ctx.ctx(),
                filter,
                FindOptions::new().sort_by("age", SortOrder::Descending).limit(1),
            )?;
            assert_eq!(total, 5);
            assert_eq!(sorted.len(), 1);
            assert_eq!(sorted[0].age, 34);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_invalid_page_arguments() {
    run_test(
        create_test_context,
        |ctx| {
            let users = seed(&ctx, 3)?;

            let err = users.find_paginated(ctx.ctx(), None, 0, 10).unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::ValidationError);
            assert_eq!(err.message(), "invalid page: must be >= 1");

            let err = users.find_paginated_with_total(ctx.ctx(), None, 1, -5).unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::ValidationError);
            assert_eq!(err.message(), "invalid pageSize: must be >= 1");
            Ok(())
        },
        cleanup,
    )
}
