use bson::Document;

/// Options for `insert_one`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertOneOptions {
    pub bypass_document_validation: Option<bool>,
}

/// Options for `insert_many`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertManyOptions {
    /// Stop at the first failing document (the default) or keep inserting
    /// the remaining ones.
    pub ordered: Option<bool>,
    pub bypass_document_validation: Option<bool>,
}

impl InsertManyOptions {
    pub fn new() -> InsertManyOptions {
        InsertManyOptions::default()
    }

    pub fn ordered(mut self, ordered: bool) -> Self {
        self.ordered = Some(ordered);
        self
    }

    pub fn is_ordered(&self) -> bool {
        self.ordered.unwrap_or(true)
    }
}

/// Options for `update_one`, `update_by_id` and `update_many`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOptions {
    /// Insert a document built from the filter and the update when nothing matches.
    pub upsert: Option<bool>,
    /// Index to use, given by its key specification.
    pub hint: Option<Document>,
}

impl UpdateOptions {
    pub fn new() -> UpdateOptions {
        UpdateOptions::default()
    }

    pub fn upsert(mut self, upsert: bool) -> Self {
        self.upsert = Some(upsert);
        self
    }

    pub fn hint(mut self, hint: Document) -> Self {
        self.hint = Some(hint);
        self
    }
}

/// Options for `delete_one`, `delete_by_id` and `delete_many`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeleteOptions {
    /// Index to use, given by its key specification.
    pub hint: Option<Document>,
}

/// Options for `bulk_write`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkWriteOptions {
    /// Stop at the first failing operation (the default) or apply every
    /// operation and report all failures at the end.
    pub ordered: Option<bool>,
    pub bypass_document_validation: Option<bool>,
}

impl BulkWriteOptions {
    pub fn new() -> BulkWriteOptions {
        BulkWriteOptions::default()
    }

    pub fn ordered(mut self, ordered: bool) -> Self {
        self.ordered = Some(ordered);
        self
    }

    pub fn is_ordered(&self) -> bool {
        self.ordered.unwrap_or(true)
    }
}

/// Options for `ensure_indexes`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateIndexesOptions {
    pub max_time: Option<std::time::Duration>,
}
