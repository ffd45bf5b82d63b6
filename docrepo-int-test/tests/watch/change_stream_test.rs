use crate::repository::{generate_user, User};
use docrepo::bson::doc;
use docrepo::context::Context;
use docrepo::driver::{ChangeEvent, ChangeStream, OperationType};
use docrepo::errors::ErrorKind;
use docrepo::options::{ChangeStreamOptions, FullDocumentType};
use docrepo::repository::Repository;
use docrepo_int_test::test_util::{cleanup, create_test_context, run_test, wait_for};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

// Collects events on a background thread until `ctx` is cancelled.
fn collect(mut stream: ChangeStream, ctx: Context) -> (Arc<Mutex<Vec<ChangeEvent>>>, JoinHandle<()>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let handle = thread::spawn(move || {
        while let Ok(Some(event)) = stream.next(&ctx) {
            sink.lock().unwrap().push(event);
        }
        stream.close();
    });
    (events, handle)
}

fn operations(events: &Arc<Mutex<Vec<ChangeEvent>>>) -> Vec<OperationType> {
    events
        .lock()
        .unwrap()
        .iter()
        .filter_map(ChangeEvent::operation_type)
        .collect()
}

#[test]
fn test_stream_observes_writes_in_order() {
    run_test(
        create_test_context,
        |ctx| {
            let users: Repository<User> = ctx.repository("users");
            users.ensure_indexes_from_model(ctx.ctx(), None)?;

            let reader = ctx.ctx().with_cancel();
            let stream = users.watch(
                ctx.ctx(),
                vec![],
                ChangeStreamOptions::new().full_document(FullDocumentType::UpdateLookup),
            )?;
            let (events, handle) = collect(stream, reader.clone());

            let stored = users.insert_one(ctx.ctx(), generate_user(), None)?;
            let id = stored.base.id().expect("id assigned on insert");
            users.update_by_id(ctx.ctx(), id, doc! { "$set": { "city": "Quito" } }, None)?;
            users.delete_by_id(ctx.ctx(), id, None)?;

            wait_for(5000, || operations(&events).len() >= 3);
            reader.cancel();
            handle.join().expect("reader thread");

            assert_eq!(
                operations(&events),
                vec![OperationType::Insert, OperationType::Update, OperationType::Delete]
            );
            let events = events.lock().unwrap();
            let inserted: User = events[0].full_document()?.expect("insert carries the document");
            assert_eq!(inserted.email, stored.email);
            let updated: User = events[1].full_document()?.expect("update looked up");
            assert_eq!(updated.city, "Quito");
            assert!(events.iter().all(|e| e.document_id() == Some(&docrepo::bson::Bson::ObjectId(id))));
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_pipeline_filters_events() {
    run_test(
        create_test_context,
        |ctx| {
            let users: Repository<User> = ctx.repository("users");
            users.ensure_indexes_from_model(ctx.ctx(), None)?;

            let reader = ctx.ctx().with_cancel();
            let stream = users.watch(
                ctx.ctx(),
                vec![doc! { "$match": { "operationType": "delete" } }],
                None,
            )?;
            let (events, handle) = collect(stream, reader.clone());

            let first = users.insert_one(ctx.ctx(), generate_user(), None)?;
            let second = users.insert_one(ctx.ctx(), generate_user(), None)?;
            users.delete_by_id(ctx.ctx(), first.base.id().expect("id"), None)?;
            users.delete_by_id(ctx.ctx(), second.base.id().expect("id"), None)?;

            wait_for(5000, || operations(&events).len() >= 2);
            reader.cancel();
            handle.join().expect("reader thread");

            assert_eq!(operations(&events), vec![OperationType::Delete, OperationType::Delete]);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_watch_with_cancelled_context() {
    run_test(
        create_test_context,
        |ctx| {
            let users: Repository<User> = ctx.repository("users");
            let cancelled = ctx.ctx().with_cancel();
            cancelled.cancel();
            let err = users.watch(&cancelled, vec![], None).unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::Cancelled);
            Ok(())
        },
        cleanup,
    )
}
