use std::time::Duration;

use bson::{doc, Document};

/// Sort direction of a single field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    fn as_i32(&self) -> i32 {
        match self {
            SortOrder::Ascending => 1,
            SortOrder::Descending => -1,
        }
    }
}

/// Options for `find` and the paginated reads.
///
/// # Examples
///
/// ```rust,ignore
/// use docrepo::options::{FindOptions, SortOrder};
///
/// let options = FindOptions::new()
///     .sort_by("age", SortOrder::Descending)
///     .skip(10)
///     .limit(20);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    /// Number of matching documents to skip.
    pub skip: Option<u64>,
    /// Maximum number of documents to return. A negative value returns a
    /// single batch of at most `|limit|` documents.
    pub limit: Option<i64>,
    /// Sort specification, e.g. `{age: -1, name: 1}`.
    pub sort: Option<Document>,
    /// Projection, e.g. `{name: 1}` or `{secret: 0}`.
    pub projection: Option<Document>,
    /// Number of documents fetched per round-trip.
    pub batch_size: Option<u32>,
    /// Server-side time limit. When unset, drivers derive it from the
    /// context deadline.
    pub max_time: Option<Duration>,
}

/// Creates `FindOptions` sorted by one field.
pub fn order_by(field_name: &str, sort_order: SortOrder) -> FindOptions {
    FindOptions::new().sort_by(field_name, sort_order)
}

/// Creates `FindOptions` that skips `skip` documents.
pub fn skip_by(skip: u64) -> FindOptions {
    FindOptions::new().skip(skip)
}

/// Creates `FindOptions` returning at most `limit` documents.
pub fn limit_to(limit: i64) -> FindOptions {
    FindOptions::new().limit(limit)
}

impl FindOptions {
    pub fn new() -> FindOptions {
        FindOptions::default()
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn sort(mut self, sort: Document) -> Self {
        self.sort = Some(sort);
        self
    }

    /// Appends a field to the sort specification.
    pub fn sort_by(mut self, field_name: &str, sort_order: SortOrder) -> Self {
        let sort = self.sort.get_or_insert_with(Document::new);
        sort.insert(field_name, sort_order.as_i32());
        self
    }

    pub fn projection(mut self, projection: Document) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn max_time(mut self, max_time: Duration) -> Self {
        self.max_time = Some(max_time);
        self
    }
}

/// Options for `find_one` and `find_by_id`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOneOptions {
    pub skip: Option<u64>,
    pub sort: Option<Document>,
    pub projection: Option<Document>,
    pub max_time: Option<Duration>,
}

impl FindOneOptions {
    pub fn new() -> FindOneOptions {
        FindOneOptions::default()
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn sort(mut self, sort: Document) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn projection(mut self, projection: Document) -> Self {
        self.projection = Some(projection);
        self
    }
}

impl From<FindOneOptions> for FindOptions {
    fn from(options: FindOneOptions) -> Self {
        FindOptions {
            skip: options.skip,
            limit: Some(-1),
            sort: options.sort,
            projection: options.projection,
            batch_size: None,
            max_time: options.max_time,
        }
    }
}

/// Which version of a document a find-and-modify returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReturnDocument {
    #[default]
    Before,
    After,
}

/// Options for `find_one_and_update`.
///
/// The repository always overrides `return_document` with
/// [`ReturnDocument::After`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOneAndUpdateOptions {
    pub upsert: Option<bool>,
    pub sort: Option<Document>,
    pub projection: Option<Document>,
    pub return_document: Option<ReturnDocument>,
    pub max_time: Option<Duration>,
}

impl FindOneAndUpdateOptions {
    pub fn new() -> FindOneAndUpdateOptions {
        FindOneAndUpdateOptions::default()
    }

    pub fn upsert(mut self, upsert: bool) -> Self {
        self.upsert = Some(upsert);
        self
    }

    pub fn sort(mut self, sort: Document) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn projection(mut self, projection: Document) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn return_document(mut self, return_document: ReturnDocument) -> Self {
        self.return_document = Some(return_document);
        self
    }
}

/// Options for `find_one_and_delete`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOneAndDeleteOptions {
    pub sort: Option<Document>,
    pub projection: Option<Document>,
    pub max_time: Option<Duration>,
}

impl FindOneAndDeleteOptions {
    pub fn new() -> FindOneAndDeleteOptions {
        FindOneAndDeleteOptions::default()
    }

    pub fn sort(mut self, sort: Document) -> Self {
        self.sort = Some(sort);
        self
    }
}

/// Options for `count_documents`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CountOptions {
    pub skip: Option<u64>,
    pub limit: Option<u64>,
    pub max_time: Option<Duration>,
}

impl CountOptions {
    pub fn new() -> CountOptions {
        CountOptions::default()
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Options for `estimated_count`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EstimatedCountOptions {
    pub max_time: Option<Duration>,
}

/// Options for `distinct`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DistinctOptions {
    pub max_time: Option<Duration>,
}

/// Options for `aggregate` and `aggregate_typed`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateOptions {
    pub allow_disk_use: Option<bool>,
    pub batch_size: Option<u32>,
    pub max_time: Option<Duration>,
    /// Variables accessible in the pipeline as `$$name`.
    pub let_vars: Option<Document>,
}

impl AggregateOptions {
    pub fn new() -> AggregateOptions {
        AggregateOptions::default()
    }

    pub fn allow_disk_use(mut self, allow: bool) -> Self {
        self.allow_disk_use = Some(allow);
        self
    }

    pub fn batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = Some(batch_size);
        self
    }
}

/// Builds the `{_id: id}` filter used by the by-id helpers.
pub fn id_filter(id: impl Into<bson::Bson>) -> Document {
    doc! { "_id": id.into() }
}
