use crate::repository::{order, Order};
use docrepo::bson::doc;
use docrepo::errors::ErrorKind;
use docrepo::repository::Repository;
use docrepo_int_test::test_util::{cleanup, create_test_context, run_test};
use serde::Deserialize;

#[derive(Debug, Deserialize, PartialEq)]
struct CustomerTotal {
    #[serde(rename = "_id")]
    customer: String,
    total: i64,
}

fn seed(orders: &Repository<Order>, ctx: &docrepo::context::Context) -> docrepo::errors::RepoResult<()> {
    let batch = vec![
        order("acme", 120, "paid"),
        order("acme", 80, "paid"),
        order("globex", 300, "paid"),
        order("globex", 50, "refunded"),
        order("initech", 10, "paid"),
    ];
    orders.insert_many(ctx, batch, None)?;
    Ok(())
}

#[test]
fn test_group_totals() {
    run_test(
        create_test_context,
        |ctx| {
            let orders: Repository<Order> = ctx.repository("orders");
            seed(&orders, ctx.ctx())?;

            let results = orders.aggregate(
                ctx.ctx(),
                vec![
                    doc! { "$match": { "status": "paid" } },
                    doc! { "$group": { "_id": "$customer", "total": { "$sum": "$amount" } } },
                    doc! { "$sort": { "total": -1 } },
                ],
                None,
            )?;
            let totals: Vec<CustomerTotal> = results
                .into_iter()
                .map(|document| docrepo::bson::from_document(document).expect("decodes"))
                .collect();
            assert_eq!(
                totals,
                vec![
                    CustomerTotal { customer: "globex".to_string(), total: 300 },
                    CustomerTotal { customer: "acme".to_string(), total: 200 },
                    CustomerTotal { customer: "initech".to_string(), total: 10 },
                ]
            );
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_typed_aggregate() {
    run_test(
        create_test_context,
        |ctx| {
            let orders: Repository<Order> = ctx.repository("orders");
            seed(&orders, ctx.ctx())?;

            let big = orders.aggregate_typed(
                ctx.ctx(),
                vec![doc! { "$match": { "amount": { "$gte": 100 } } }, doc! { "$sort": { "amount": 1 } }],
                None,
            )?;
            assert_eq!(big.len(), 2);
            assert_eq!(big[0].customer, "acme");
            assert_eq!(big[1].amount, 300);
            assert!(big.iter().all(|o| o.base.id().is_some()));

            // Reshaped documents no longer decode as orders.
            let err = orders
                .aggregate_typed(ctx.ctx(), vec![doc! { "$project": { "amount": 1 } }], None)
                .unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::DecodeError);
            Ok(())
        },
        cleanup,
    )
}
