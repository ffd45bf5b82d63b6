use std::fmt::{Debug, Formatter};
use std::time::Duration;

use bson::{Bson, Document};
use serde::de::DeserializeOwned;

use crate::context::Context;
use crate::errors::{ErrorKind, RepoError, RepoResult};

/// How long a blocking [`ChangeStream::next`] waits per poll before it
/// re-checks its context.
pub const CHANGE_STREAM_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Driver side of a change stream.
pub trait ChangeStreamProvider: Send {
    /// Waits up to `wait` for the next raw event document.
    ///
    /// Returns `Ok(None)` when nothing arrived in time. A zero `wait` polls
    /// without blocking.
    fn poll_next(&mut self, ctx: &Context, wait: Duration) -> RepoResult<Option<Document>>;

    /// `false` once the stream can never deliver another event.
    fn is_alive(&self) -> bool;

    /// Token of the last delivered event.
    fn resume_token(&self) -> Option<Document>;

    /// Releases the subscription. Called at most once.
    fn close(&mut self);
}

/// Kind of mutation a change event describes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationType {
    Insert,
    Update,
    Replace,
    Delete,
    Drop,
    Invalidate,
    Other(String),
}

impl From<&str> for OperationType {
    fn from(value: &str) -> Self {
        match value {
            "insert" => OperationType::Insert,
            "update" => OperationType::Update,
            "replace" => OperationType::Replace,
            "delete" => OperationType::Delete,
            "drop" => OperationType::Drop,
            "invalidate" => OperationType::Invalidate,
            other => OperationType::Other(other.to_string()),
        }
    }
}

/// One event of a change stream.
///
/// Wraps the raw event document; the accessors read its conventional fields
/// (`operationType`, `documentKey`, `fullDocument`, `updateDescription`).
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    raw: Document,
}

impl ChangeEvent {
    pub fn new(raw: Document) -> ChangeEvent {
        ChangeEvent { raw }
    }

    pub fn operation_type(&self) -> Option<OperationType> {
        self.raw.get_str("operationType").ok().map(OperationType::from)
    }

    /// Resume token of this event.
    pub fn id(&self) -> Option<&Document> {
        self.raw.get_document("_id").ok()
    }

    /// `{_id: ...}` of the changed document.
    pub fn document_key(&self) -> Option<&Document> {
        self.raw.get_document("documentKey").ok()
    }

    /// Identifier of the changed document.
    pub fn document_id(&self) -> Option<&Bson> {
        self.document_key().and_then(|k| k.get("_id"))
    }

    pub fn update_description(&self) -> Option<&Document> {
        self.raw.get_document("updateDescription").ok()
    }

    pub fn full_document_raw(&self) -> Option<&Document> {
        self.raw.get_document("fullDocument").ok()
    }

    /// Decodes `fullDocument` as `T`; `Ok(None)` when the event has none.
    pub fn full_document<T: DeserializeOwned>(&self) -> RepoResult<Option<T>> {
        match self.full_document_raw() {
            Some(document) => bson::from_document::<T>(document.clone())
                .map(Some)
                .map_err(|err| {
                    RepoError::from_source("failed to decode change event", ErrorKind::DecodeError, err)
                }),
            None => Ok(None),
        }
    }

    pub fn raw(&self) -> &Document {
        &self.raw
    }

    pub fn into_document(self) -> Document {
        self.raw
    }
}

/// Live subscription to the changes of a collection.
///
/// The caller owns the stream: it stays open until [`ChangeStream::close`]
/// is called or it is dropped.
///
/// # Examples
///
/// ```rust,ignore
/// let mut stream = repo.watch(&ctx, vec![doc! { "$match": { "operationType": "insert" } }], None)?;
/// while let Some(event) = stream.next(&ctx)? {
///     let user: Option<User> = event.full_document()?;
/// }
/// ```
pub struct ChangeStream {
    inner: Box<dyn ChangeStreamProvider>,
    closed: bool,
}

impl ChangeStream {
    pub fn new<T: ChangeStreamProvider + 'static>(inner: T) -> Self {
        ChangeStream {
            inner: Box::new(inner),
            closed: false,
        }
    }

    /// Blocks until the next event arrives.
    ///
    /// Returns `Ok(None)` once the stream is closed or can no longer deliver
    /// events, and a [`ErrorKind::Cancelled`] error when `ctx` fires first.
    pub fn next(&mut self, ctx: &Context) -> RepoResult<Option<ChangeEvent>> {
        loop {
            ctx.check()?;
            if self.closed || !self.inner.is_alive() {
                return Ok(None);
            }
            let wait = match ctx.remaining() {
                Some(remaining) => remaining.min(CHANGE_STREAM_POLL_INTERVAL),
                None => CHANGE_STREAM_POLL_INTERVAL,
            };
            if let Some(event) = self.inner.poll_next(ctx, wait)? {
                return Ok(Some(ChangeEvent::new(event)));
            }
        }
    }

    /// Returns the next event if one is already available.
    pub fn try_next(&mut self, ctx: &Context) -> RepoResult<Option<ChangeEvent>> {
        ctx.check()?;
        if self.closed || !self.inner.is_alive() {
            return Ok(None);
        }
        Ok(self.inner.poll_next(ctx, Duration::ZERO)?.map(ChangeEvent::new))
    }

    pub fn resume_token(&self) -> Option<Document> {
        self.inner.resume_token()
    }

    pub fn is_alive(&self) -> bool {
        !self.closed && self.inner.is_alive()
    }

    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.inner.close();
        }
    }
}

impl Debug for ChangeStream {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeStream")
            .field("alive", &self.is_alive())
            .field("resume_token", &self.resume_token())
            .finish()
    }
}

impl Drop for ChangeStream {
    fn drop(&mut self) {
        self.close();
    }
}
