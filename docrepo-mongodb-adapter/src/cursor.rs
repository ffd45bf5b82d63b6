use std::time::Duration;

use docrepo::bson::{self, Document};
use docrepo::context::Context;
use docrepo::driver::{ChangeStreamProvider, CursorProvider};
use docrepo::errors::RepoResult;
use mongodb::sync::{ChangeStream, Cursor};

use crate::errors::store_error;

/// Server cursor fetched lazily, one batch at a time.
pub(crate) struct MongoCursor {
    cursor: Option<Cursor<Document>>,
}

impl MongoCursor {
    pub(crate) fn new(cursor: Cursor<Document>) -> MongoCursor {
        MongoCursor { cursor: Some(cursor) }
    }
}

impl CursorProvider for MongoCursor {
    fn next_document(&mut self, _ctx: &Context) -> Option<RepoResult<Document>> {
        let next = self.cursor.as_mut()?.next();
        next.map(|result| result.map_err(store_error))
    }

    fn close(&mut self) {
        // Dropping the driver cursor kills it on the server.
        self.cursor.take();
    }
}

/// Change stream over raw event documents.
///
/// Each poll issues at most one `getMore`; how long the server holds it open
/// is governed by `max_await_time`, not by the poll wait.
pub(crate) struct MongoChangeStream {
    stream: Option<ChangeStream<Document>>,
}

impl MongoChangeStream {
    pub(crate) fn new(stream: ChangeStream<Document>) -> MongoChangeStream {
        MongoChangeStream { stream: Some(stream) }
    }
}

impl ChangeStreamProvider for MongoChangeStream {
    fn poll_next(&mut self, ctx: &Context, _wait: Duration) -> RepoResult<Option<Document>> {
        ctx.check()?;
        match self.stream.as_mut() {
            Some(stream) => stream.next_if_any().map_err(store_error),
            None => Ok(None),
        }
    }

    fn is_alive(&self) -> bool {
        self.stream.as_ref().is_some_and(|stream| stream.is_alive())
    }

    fn resume_token(&self) -> Option<Document> {
        let token = self.stream.as_ref()?.resume_token()?;
        match bson::to_document(&token) {
            Ok(document) => Some(document),
            Err(err) => {
                log::warn!("Resume token is not a document: {}", err);
                None
            }
        }
    }

    fn close(&mut self) {
        self.stream.take();
    }
}
