use std::time::Duration;

use bson::{doc, Bson, Document};

use crate::common::{index_name_from_keys, INDEX_VERSION};

/// Options of an index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexOptions {
    pub name: Option<String>,
    pub unique: Option<bool>,
    pub sparse: Option<bool>,
    pub expire_after: Option<Duration>,
}

impl IndexOptions {
    pub fn new() -> IndexOptions {
        IndexOptions::default()
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = Some(unique);
        self
    }

    pub fn sparse(mut self, sparse: bool) -> Self {
        self.sparse = Some(sparse);
        self
    }

    pub fn expire_after(mut self, expire_after: Duration) -> Self {
        self.expire_after = Some(expire_after);
        self
    }
}

/// Describes one index a collection should have.
///
/// `keys` maps field paths to a direction (`1` ascending, `-1` descending).
///
/// # Examples
///
/// ```rust,ignore
/// use bson::doc;
/// use docrepo::model::{IndexModel, IndexOptions};
///
/// let by_email = IndexModel::new(doc! { "email": 1 })
///     .with_options(IndexOptions::new().unique(true));
/// assert_eq!(by_email.name(), "email_1");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct IndexModel {
    pub keys: Document,
    pub options: Option<IndexOptions>,
}

impl IndexModel {
    pub fn new(keys: Document) -> IndexModel {
        IndexModel { keys, options: None }
    }

    /// Builds an index model from a compact key list such as `"email:1,name:-1"`.
    ///
    /// A field without an explicit direction is ascending.
    pub fn from_key_spec(spec: &str) -> IndexModel {
        let mut keys = Document::new();
        for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (field, direction) = match part.split_once(':') {
                Some((field, direction)) => (field.trim(), direction.trim()),
                None => (part, "1"),
            };
            let direction = match direction.parse::<i32>() {
                Ok(d) => Bson::Int32(d),
                Err(_) => Bson::String(direction.to_string()),
            };
            keys.insert(field, direction);
        }
        IndexModel::new(keys)
    }

    pub fn with_options(mut self, options: IndexOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// The explicit name, or the conventional one derived from the keys.
    pub fn name(&self) -> String {
        self.options
            .as_ref()
            .and_then(|o| o.name.clone())
            .unwrap_or_else(|| index_name_from_keys(&self.keys))
    }

    pub fn is_unique(&self) -> bool {
        self.options.as_ref().and_then(|o| o.unique).unwrap_or(false)
    }

    pub fn is_sparse(&self) -> bool {
        self.options.as_ref().and_then(|o| o.sparse).unwrap_or(false)
    }

    pub fn expire_after(&self) -> Option<Duration> {
        self.options.as_ref().and_then(|o| o.expire_after)
    }

    /// The untyped descriptor form reported by index listings.
    pub fn to_document(&self) -> Document {
        let mut descriptor = doc! {
            "v": INDEX_VERSION,
            "key": self.keys.clone(),
            "name": self.name(),
        };
        if self.is_unique() {
            descriptor.insert("unique", true);
        }
        if self.is_sparse() {
            descriptor.insert("sparse", true);
        }
        if let Some(ttl) = self.expire_after() {
            descriptor.insert("expireAfterSeconds", ttl.as_secs() as i64);
        }
        descriptor
    }
}
