use std::time::Duration;

use bson::Document;

/// What a change event carries in its `fullDocument` field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FullDocumentType {
    /// Inserts and replacements only.
    #[default]
    Default,
    /// Updates also carry the current state of the document.
    UpdateLookup,
    /// Like `UpdateLookup`, omitted when the document is gone.
    WhenAvailable,
    /// Like `UpdateLookup`, failing when the document is gone.
    Required,
}

/// Options for `watch`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeStreamOptions {
    pub full_document: Option<FullDocumentType>,
    /// Longest time the store waits for new events before answering an
    /// empty poll.
    pub max_await_time: Option<Duration>,
    pub batch_size: Option<u32>,
    /// Resume token of the event after which the stream starts.
    pub resume_after: Option<Document>,
}

impl ChangeStreamOptions {
    pub fn new() -> ChangeStreamOptions {
        ChangeStreamOptions::default()
    }

    pub fn full_document(mut self, full_document: FullDocumentType) -> Self {
        self.full_document = Some(full_document);
        self
    }

    pub fn max_await_time(mut self, max_await_time: Duration) -> Self {
        self.max_await_time = Some(max_await_time);
        self
    }

    pub fn resume_after(mut self, token: Document) -> Self {
        self.resume_after = Some(token);
        self
    }
}
