use std::collections::VecDeque;
use std::fmt::{Debug, Formatter};

use bson::Document;
use serde::de::DeserializeOwned;

use crate::context::Context;
use crate::errors::{ErrorKind, RepoError, RepoResult};

/// Driver side of a result cursor.
pub trait CursorProvider: Send {
    /// Fetches the next document, `None` once the cursor is exhausted.
    fn next_document(&mut self, ctx: &Context) -> Option<RepoResult<Document>>;

    /// Releases server-side resources. Called at most once.
    fn close(&mut self) {}
}

/// Result cursor of a find or aggregate.
///
/// The cursor is closed when it is exhausted, when [`Cursor::close`] is
/// called or when it is dropped, whichever comes first, so a decode failure
/// halfway through never leaks it.
pub struct Cursor {
    inner: Box<dyn CursorProvider>,
    closed: bool,
}

impl Cursor {
    pub fn new<T: CursorProvider + 'static>(inner: T) -> Self {
        Cursor {
            inner: Box::new(inner),
            closed: false,
        }
    }

    /// A cursor over documents that are already in memory.
    pub fn from_documents(documents: Vec<Document>) -> Self {
        Cursor::new(BufferedCursor {
            documents: documents.into(),
        })
    }

    pub fn next_document(&mut self, ctx: &Context) -> Option<RepoResult<Document>> {
        if self.closed {
            return None;
        }
        if let Err(err) = ctx.check() {
            self.close();
            return Some(Err(err));
        }
        let next = self.inner.next_document(ctx);
        if next.is_none() {
            self.close();
        }
        next
    }

    /// Drains the cursor into untyped documents.
    pub fn collect_documents(mut self, ctx: &Context) -> RepoResult<Vec<Document>> {
        let mut documents = Vec::new();
        while let Some(document) = self.next_document(ctx) {
            documents.push(document?);
        }
        Ok(documents)
    }

    /// Drains the cursor, decoding every document as `T`.
    ///
    /// A document that does not decode fails the whole call with
    /// [`ErrorKind::DecodeError`]; store failures keep their own kind.
    pub fn deserialize_all<T: DeserializeOwned>(mut self, ctx: &Context) -> RepoResult<Vec<T>> {
        let mut values = Vec::new();
        while let Some(document) = self.next_document(ctx) {
            let value = bson::from_document::<T>(document?).map_err(|err| {
                RepoError::from_source("failed to decode document", ErrorKind::DecodeError, err)
            })?;
            values.push(value);
        }
        Ok(values)
    }

    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.inner.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Debug for Cursor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor").field("closed", &self.closed).finish()
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        self.close();
    }
}

struct BufferedCursor {
    documents: VecDeque<Document>,
}

impl CursorProvider for BufferedCursor {
    fn next_document(&mut self, _ctx: &Context) -> Option<RepoResult<Document>> {
        self.documents.pop_front().map(Ok)
    }

    fn close(&mut self) {
        self.documents.clear();
    }
}
