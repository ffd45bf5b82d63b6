use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bson::{doc, Bson, Document, Timestamp};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;

use crate::context::Context;
use crate::driver::memory::aggregate::run_pipeline;
use crate::driver::memory::store::Change;
use crate::driver::memory::store_error;
use crate::driver::ChangeStreamProvider;
use crate::errors::{ErrorKind, RepoError, RepoResult};
use crate::options::FullDocumentType;

// Stages a change stream pipeline may contain.
const WATCH_STAGES: [&str; 7] = [
    "$match",
    "$project",
    "$addFields",
    "$set",
    "$unset",
    "$replaceRoot",
    "$replaceWith",
];

struct Subscriber {
    collection: Option<String>,
    sender: Sender<Document>,
    lost: Arc<AtomicBool>,
}

/// Receiving end of a change feed subscription.
///
/// `lost` is raised when the feed had to drop the subscriber because its
/// buffer was full; the events buffered before that point stay readable.
pub(crate) struct Subscription {
    receiver: Receiver<Document>,
    lost: Arc<AtomicBool>,
}

/// Fan-out of committed changes to open change streams.
pub(crate) struct ChangeFeed {
    database: String,
    capacity: usize,
    sequence: AtomicU32,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl ChangeFeed {
    pub fn new(database: &str, capacity: usize) -> ChangeFeed {
        ChangeFeed {
            database: database.to_string(),
            capacity,
            sequence: AtomicU32::new(0),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Opens a subscription to one collection, or to the whole database when
    /// `collection` is `None`.
    pub fn subscribe(&self, collection: Option<&str>) -> Subscription {
        let (sender, receiver) = if self.capacity == 0 {
            crossbeam_channel::unbounded()
        } else {
            crossbeam_channel::bounded(self.capacity)
        };
        let lost = Arc::new(AtomicBool::new(false));
        self.subscribers.lock().push(Subscriber {
            collection: collection.map(str::to_string),
            sender,
            lost: lost.clone(),
        });
        Subscription { receiver, lost }
    }

    pub fn publish(&self, collection: &str, changes: Vec<Change>) {
        if changes.is_empty() {
            return;
        }
        let mut subscribers = self.subscribers.lock();
        if subscribers.is_empty() {
            return;
        }
        for change in changes {
            let event = self.event(collection, change);
            self.deliver(&mut subscribers, collection, event);
        }
    }

    /// Announces that a collection was dropped. Streams on that collection
    /// receive an `invalidate` event after the `drop` and end.
    pub fn publish_drop(&self, collection: &str) {
        let mut subscribers = self.subscribers.lock();
        let drop_event = self.envelope("drop", collection);
        self.deliver(&mut subscribers, collection, drop_event);
        let invalidate = self.envelope("invalidate", collection);
        subscribers.retain(|s| {
            if s.collection.as_deref() == Some(collection) {
                let _ = s.sender.try_send(invalidate.clone());
                false
            } else {
                true
            }
        });
    }

    fn deliver(&self, subscribers: &mut Vec<Subscriber>, collection: &str, event: Document) {
        subscribers.retain(|s| {
            if s.collection.as_deref().is_some_and(|c| c != collection) {
                return true;
            }
            match s.sender.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    log::warn!(
                        "change stream on {}.{} is not keeping up, closing it",
                        self.database,
                        collection
                    );
                    s.lost.store(true, Ordering::SeqCst);
                    false
                }
                Err(TrySendError::Disconnected(_)) => false,
            }
        });
    }

    fn envelope(&self, operation_type: &str, collection: &str) -> Document {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let now = bson::DateTime::now();
        doc! {
            "_id": { "_data": format!("{:016X}{:08X}", now.timestamp_millis(), sequence) },
            "operationType": operation_type,
            "clusterTime": Timestamp { time: (now.timestamp_millis() / 1000) as u32, increment: sequence },
            "wallTime": now,
            "ns": { "db": self.database.clone(), "coll": collection },
        }
    }

    fn event(&self, collection: &str, change: Change) -> Document {
        match change {
            Change::Insert { document } => {
                let mut event = self.envelope("insert", collection);
                event.insert("documentKey", doc! { "_id": document.get("_id").cloned().unwrap_or(Bson::Null) });
                event.insert("fullDocument", document);
                event
            }
            Change::Update {
                id,
                updated_fields,
                removed_fields,
                document,
            } => {
                let mut event = self.envelope("update", collection);
                event.insert("documentKey", doc! { "_id": id });
                event.insert(
                    "updateDescription",
                    doc! {
                        "updatedFields": updated_fields,
                        "removedFields": removed_fields,
                        "truncatedArrays": [],
                    },
                );
                event.insert("fullDocument", document);
                event
            }
            Change::Replace { id, document } => {
                let mut event = self.envelope("replace", collection);
                event.insert("documentKey", doc! { "_id": id });
                event.insert("fullDocument", document);
                event
            }
            Change::Delete { id } => {
                let mut event = self.envelope("delete", collection);
                event.insert("documentKey", doc! { "_id": id });
                event
            }
        }
    }
}

/// Rejects pipelines a change stream cannot run.
pub(crate) fn validate_watch_pipeline(pipeline: &[Document]) -> RepoResult<()> {
    for stage in pipeline {
        match stage.keys().next() {
            Some(name) if WATCH_STAGES.contains(&name.as_str()) => {}
            Some(name) => {
                return Err(store_error(&format!(
                    "{} is not permitted in a change stream pipeline",
                    name
                )))
            }
            None => return Err(store_error("empty change stream pipeline stage")),
        }
    }
    Ok(())
}

/// Change stream over an in-memory change feed.
pub(crate) struct InMemoryChangeStream {
    receiver: Option<Receiver<Document>>,
    lost: Arc<AtomicBool>,
    pipeline: Vec<Document>,
    full_document: FullDocumentType,
    resume_token: Option<Document>,
    invalidated: bool,
}

impl InMemoryChangeStream {
    pub fn new(
        subscription: Subscription,
        pipeline: Vec<Document>,
        full_document: FullDocumentType,
    ) -> InMemoryChangeStream {
        InMemoryChangeStream {
            receiver: Some(subscription.receiver),
            lost: subscription.lost,
            pipeline,
            full_document,
            resume_token: None,
            invalidated: false,
        }
    }

    fn shape(&self, mut event: Document) -> RepoResult<Option<Document>> {
        if event.get_str("operationType").ok() == Some("update") && self.full_document == FullDocumentType::Default {
            event.remove("fullDocument");
        }
        if self.pipeline.is_empty() {
            return Ok(Some(event));
        }
        Ok(run_pipeline(vec![event], &self.pipeline, None)?.into_iter().next())
    }
}

impl ChangeStreamProvider for InMemoryChangeStream {
    fn poll_next(&mut self, ctx: &Context, wait: Duration) -> RepoResult<Option<Document>> {
        let deadline = Instant::now() + wait;
        loop {
            ctx.check()?;
            let Some(receiver) = &self.receiver else {
                return Ok(None);
            };
            let remaining = deadline.saturating_duration_since(Instant::now());
            let event = match receiver.recv_timeout(remaining) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => {
                    self.receiver = None;
                    if self.lost.load(Ordering::SeqCst) {
                        let err = RepoError::new(
                            "change stream history lost: the reader fell behind the change feed",
                            ErrorKind::ChangeStreamError,
                        );
                        log::error!("{}", err);
                        return Err(err);
                    }
                    return Ok(None);
                }
            };
            let token = event.get_document("_id").ok().cloned();
            if event.get_str("operationType").ok() == Some("invalidate") {
                self.invalidated = true;
                self.receiver = None;
            }
            if let Some(shaped) = self.shape(event)? {
                self.resume_token = token;
                return Ok(Some(shaped));
            }
            if self.invalidated {
                return Ok(None);
            }
        }
    }

    fn is_alive(&self) -> bool {
        self.receiver.is_some()
    }

    fn resume_token(&self) -> Option<Document> {
        self.resume_token.clone()
    }

    fn close(&mut self) {
        self.receiver = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insert(id: i32) -> Change {
        Change::Insert {
            document: doc! { "_id": id, "name": "x" },
        }
    }

    #[test]
    fn test_events_are_routed_by_collection() {
        let feed = ChangeFeed::new("db", 16);
        let users = feed.subscribe(Some("users"));
        let all = feed.subscribe(None);
        feed.publish("orders", vec![insert(1)]);
        feed.publish("users", vec![insert(2)]);
        assert_eq!(users.receiver.len(), 1);
        assert_eq!(all.receiver.len(), 2);

        let event = users.receiver.try_recv().unwrap();
        assert_eq!(event.get_str("operationType").unwrap(), "insert");
        assert_eq!(event.get_document("ns").unwrap(), &doc! { "db": "db", "coll": "users" });
        assert_eq!(event.get_document("documentKey").unwrap(), &doc! { "_id": 2 });
    }

    #[test]
    fn test_disconnected_subscribers_are_pruned() {
        let feed = ChangeFeed::new("db", 16);
        drop(feed.subscribe(Some("users")));
        feed.publish("users", vec![insert(1)]);
        assert!(feed.subscribers.lock().is_empty());
    }

    #[test]
    fn test_slow_reader_gets_buffered_events_then_history_lost() {
        let feed = ChangeFeed::new("db", 2);
        let subscription = feed.subscribe(Some("users"));
        for id in 0..5 {
            feed.publish("users", vec![insert(id)]);
        }
        assert!(feed.subscribers.lock().is_empty());

        let mut stream = InMemoryChangeStream::new(subscription, Vec::new(), FullDocumentType::Default);
        let ctx = Context::background();
        for id in 0..2 {
            let event = stream.poll_next(&ctx, Duration::from_millis(10)).unwrap().unwrap();
            assert_eq!(event.get_document("documentKey").unwrap(), &doc! { "_id": id });
        }
        let err = stream.poll_next(&ctx, Duration::from_millis(10)).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::ChangeStreamError);
        assert!(err.message().starts_with("change stream history lost"));
        assert!(!stream.is_alive());
        assert!(stream.poll_next(&ctx, Duration::from_millis(10)).unwrap().is_none());
    }

    #[test]
    fn test_update_event_hides_full_document_by_default() {
        let feed = ChangeFeed::new("db", 16);
        let receiver = feed.subscribe(Some("users"));
        feed.publish(
            "users",
            vec![Change::Update {
                id: Bson::Int32(1),
                updated_fields: doc! { "name": "y" },
                removed_fields: vec!["age".to_string()],
                document: doc! { "_id": 1, "name": "y" },
            }],
        );
        let mut stream = InMemoryChangeStream::new(receiver, Vec::new(), FullDocumentType::Default);
        let event = stream
            .poll_next(&Context::background(), Duration::from_millis(10))
            .unwrap()
            .unwrap();
        assert!(!event.contains_key("fullDocument"));
        let description = event.get_document("updateDescription").unwrap();
        assert_eq!(description.get_document("updatedFields").unwrap(), &doc! { "name": "y" });
        assert!(stream.resume_token().is_some());
    }

    #[test]
    fn test_pipeline_filters_events() {
        let feed = ChangeFeed::new("db", 0);
        let receiver = feed.subscribe(Some("users"));
        feed.publish(
            "users",
            vec![insert(1), Change::Delete { id: Bson::Int32(1) }],
        );
        let pipeline = vec![doc! { "$match": { "operationType": "delete" } }];
        let mut stream = InMemoryChangeStream::new(receiver, pipeline, FullDocumentType::Default);
        let event = stream
            .poll_next(&Context::background(), Duration::from_millis(10))
            .unwrap()
            .unwrap();
        assert_eq!(event.get_str("operationType").unwrap(), "delete");
    }

    #[test]
    fn test_drop_invalidates_stream() {
        let feed = ChangeFeed::new("db", 16);
        let receiver = feed.subscribe(Some("users"));
        feed.publish_drop("users");
        let mut stream = InMemoryChangeStream::new(receiver, Vec::new(), FullDocumentType::Default);
        let ctx = Context::background();
        let first = stream.poll_next(&ctx, Duration::from_millis(10)).unwrap().unwrap();
        assert_eq!(first.get_str("operationType").unwrap(), "drop");
        assert!(stream.is_alive());
        let second = stream.poll_next(&ctx, Duration::from_millis(10)).unwrap().unwrap();
        assert_eq!(second.get_str("operationType").unwrap(), "invalidate");
        assert!(!stream.is_alive());
    }

    #[test]
    fn test_watch_pipeline_validation() {
        assert!(validate_watch_pipeline(&[doc! { "$match": {} }]).is_ok());
        assert!(validate_watch_pipeline(&[doc! { "$group": { "_id": 1 } }]).is_err());
    }
}
