use bson::{doc, Bson, Document};
use indexmap::IndexMap;
use itertools::Itertools;

use crate::common::{is_operator_document, DOC_ID, ID_INDEX_NAME};
use crate::driver::memory::aggregate::sort_documents;
use crate::driver::memory::compare::canonical_key;
use crate::driver::memory::filter::matches;
use crate::driver::memory::path::get_path;
use crate::driver::memory::store_error;
use crate::driver::memory::update::{apply_replacement, apply_update, upsert_document, with_id_first};
use crate::errors::{ErrorKind, RepoError, RepoResult};
use crate::model::IndexModel;

/// A mutation of one document, published to watchers once it is durable.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Change {
    Insert {
        document: Document,
    },
    Update {
        id: Bson,
        updated_fields: Document,
        removed_fields: Vec<String>,
        document: Document,
    },
    Replace {
        id: Bson,
        document: Document,
    },
    Delete {
        id: Bson,
    },
}

/// How matched documents are rewritten.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Rewrite<'a> {
    Operators(&'a Document),
    Replacement(&'a Document),
}

/// What an update did, with the images `find_one_and_update` returns.
#[derive(Debug, Default)]
pub(crate) struct UpdateReport {
    pub matched: u64,
    pub modified: u64,
    pub upserted_id: Option<Bson>,
    pub before: Option<Document>,
    pub after: Option<Document>,
}

/// Documents and indexes of one collection.
///
/// `version` grows with every committed mutation; snapshot transactions use
/// it to detect concurrent writers.
#[derive(Debug, Clone)]
pub(crate) struct CollectionData {
    namespace: String,
    docs: IndexMap<Vec<u8>, Document>,
    indexes: Vec<IndexModel>,
    pub version: u64,
}

impl CollectionData {
    pub fn new(namespace: &str) -> CollectionData {
        let id_index = IndexModel::new(doc! { DOC_ID: 1 })
            .with_options(crate::model::IndexOptions::new().name(ID_INDEX_NAME));
        CollectionData {
            namespace: namespace.to_string(),
            docs: IndexMap::new(),
            indexes: vec![id_index],
            version: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    /// Every document matching `filter`, in insertion order.
    pub fn find(&self, filter: &Document) -> RepoResult<Vec<Document>> {
        let mut found = Vec::new();
        for document in self.docs.values() {
            if matches(document, filter)? {
                found.push(document.clone());
            }
        }
        Ok(found)
    }

    pub fn insert(&mut self, document: Document, changes: &mut Vec<Change>) -> RepoResult<Bson> {
        let document = with_id_first(document);
        let id = document.get(DOC_ID).cloned().unwrap_or(Bson::Null);
        if matches!(id, Bson::Array(_)) {
            return Err(store_error("the '_id' value cannot be of type array"));
        }
        self.check_unique(&document, None)?;
        self.docs.insert(canonical_key(&id), document.clone());
        self.version += 1;
        changes.push(Change::Insert { document });
        Ok(id)
    }

    // Keys of the documents matching `filter`, ordered by `sort` when given.
    fn matching_keys(&self, filter: &Document, sort: Option<&Document>, multi: bool) -> RepoResult<Vec<Vec<u8>>> {
        let mut keys = Vec::new();
        match sort {
            Some(sort) if !sort.is_empty() => {
                let mut found = self.find(filter)?;
                sort_documents(&mut found, sort)?;
                for document in found {
                    keys.push(canonical_key(document.get(DOC_ID).unwrap_or(&Bson::Null)));
                    if !multi {
                        break;
                    }
                }
            }
            _ => {
                for (key, document) in &self.docs {
                    if matches(document, filter)? {
                        keys.push(key.clone());
                        if !multi {
                            break;
                        }
                    }
                }
            }
        }
        Ok(keys)
    }

    /// Applies `rewrite` to the documents matching `filter`.
    ///
    /// With `multi` unset only the first match (by `sort`, else insertion
    /// order) is touched. With `upsert` set and nothing matched, a document
    /// built from the filter and the rewrite is inserted.
    pub fn update(
        &mut self,
        filter: &Document,
        rewrite: Rewrite,
        sort: Option<&Document>,
        multi: bool,
        upsert: bool,
        changes: &mut Vec<Change>,
    ) -> RepoResult<UpdateReport> {
        if let Rewrite::Operators(update) = rewrite {
            if update.is_empty() || !is_operator_document(update) {
                return Err(store_error("update document requires atomic operators"));
            }
        }
        let keys = self.matching_keys(filter, sort, multi)?;
        let mut report = UpdateReport::default();

        if keys.is_empty() {
            if upsert {
                let seed = match rewrite {
                    Rewrite::Operators(update) | Rewrite::Replacement(update) => upsert_document(filter, update)?,
                };
                let id = self.insert(seed, changes)?;
                report.after = self.get(&id).cloned();
                report.upserted_id = Some(id);
            }
            return Ok(report);
        }

        for key in keys {
            let Some(current) = self.docs.get(&key).cloned() else {
                continue;
            };
            let mut next = current.clone();
            let outcome = match rewrite {
                Rewrite::Operators(update) => apply_update(&mut next, update, false)?,
                Rewrite::Replacement(replacement) => apply_replacement(&mut next, replacement)?,
            };
            report.matched += 1;
            if report.before.is_none() {
                report.before = Some(current);
            }
            if outcome.modified {
                self.check_unique(&next, Some(&key))?;
                self.docs.insert(key.clone(), next.clone());
                self.version += 1;
                report.modified += 1;
                let id = next.get(DOC_ID).cloned().unwrap_or(Bson::Null);
                changes.push(match rewrite {
                    Rewrite::Operators(_) => Change::Update {
                        id,
                        updated_fields: outcome.updated_fields,
                        removed_fields: outcome.removed_fields,
                        document: next.clone(),
                    },
                    Rewrite::Replacement(_) => Change::Replace {
                        id,
                        document: next.clone(),
                    },
                });
            }
            if report.after.is_none() {
                report.after = Some(next);
            }
        }
        Ok(report)
    }

    /// Removes the documents matching `filter` and returns them.
    pub fn delete(
        &mut self,
        filter: &Document,
        sort: Option<&Document>,
        multi: bool,
        changes: &mut Vec<Change>,
    ) -> RepoResult<Vec<Document>> {
        let keys = self.matching_keys(filter, sort, multi)?;
        let mut removed = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(document) = self.docs.shift_remove(&key) {
                changes.push(Change::Delete {
                    id: document.get(DOC_ID).cloned().unwrap_or(Bson::Null),
                });
                removed.push(document);
            }
        }
        if !removed.is_empty() {
            self.version += 1;
        }
        Ok(removed)
    }

    pub fn get(&self, id: &Bson) -> Option<&Document> {
        self.docs.get(&canonical_key(id))
    }

    /// Removes every document, keeping the indexes.
    pub fn clear(&mut self) {
        self.docs.clear();
        self.version += 1;
    }

    pub fn indexes(&self) -> &[IndexModel] {
        &self.indexes
    }

    /// Registers an index and returns its name.
    ///
    /// Re-creating an identical index is a no-op; reusing a name with other
    /// keys or options is an error, as is a unique index over data that
    /// already holds duplicates.
    pub fn create_index(&mut self, model: IndexModel) -> RepoResult<String> {
        if model.keys.is_empty() {
            return Err(RepoError::new("index keys must not be empty", ErrorKind::IndexError));
        }
        let name = model.name();
        if let Some(existing) = self.indexes.iter().find(|i| i.name() == name) {
            if existing.keys == model.keys
                && existing.is_unique() == model.is_unique()
                && existing.is_sparse() == model.is_sparse()
            {
                return Ok(name);
            }
            return Err(RepoError::new(
                &format!("index with name: {} already exists with different options", name),
                ErrorKind::IndexError,
            ));
        }
        if model.is_unique() {
            let mut seen = std::collections::HashSet::new();
            for document in self.docs.values() {
                if let Some(key) = index_key(&model, document) {
                    if !seen.insert(key) {
                        return Err(self.duplicate_error(&model, document));
                    }
                }
            }
        }
        self.indexes.push(model);
        self.version += 1;
        Ok(name)
    }

    pub fn drop_index(&mut self, name: &str) -> RepoResult<()> {
        if name == ID_INDEX_NAME {
            return Err(RepoError::new("cannot drop _id index", ErrorKind::IndexError));
        }
        let before = self.indexes.len();
        self.indexes.retain(|i| i.name() != name);
        if self.indexes.len() == before {
            return Err(RepoError::new(
                &format!("index not found with name [{}]", name),
                ErrorKind::IndexError,
            ));
        }
        self.version += 1;
        Ok(())
    }

    fn check_unique(&self, document: &Document, own_key: Option<&Vec<u8>>) -> RepoResult<()> {
        for index in self.indexes.iter().filter(|i| i.is_unique() || i.name() == ID_INDEX_NAME) {
            let Some(key) = index_key(index, document) else {
                continue;
            };
            let clash = self
                .docs
                .iter()
                .filter(|(k, _)| Some(*k) != own_key)
                .any(|(_, other)| index_key(index, other).as_ref() == Some(&key));
            if clash {
                return Err(self.duplicate_error(index, document));
            }
        }
        Ok(())
    }

    fn duplicate_error(&self, index: &IndexModel, document: &Document) -> RepoError {
        let values = index
            .keys
            .keys()
            .map(|field| {
                let value = get_path(document, field).cloned().unwrap_or(Bson::Null);
                format!("{}: {}", field, value)
            })
            .join(", ");
        RepoError::new(
            &format!(
                "E11000 duplicate key error collection: {} index: {} dup key: {{ {} }}",
                self.namespace,
                index.name(),
                values
            ),
            ErrorKind::DuplicateKey,
        )
    }
}

// Key a document occupies in an index; `None` when a sparse index skips it.
fn index_key(index: &IndexModel, document: &Document) -> Option<Vec<u8>> {
    let values: Vec<Option<&Bson>> = index.keys.keys().map(|field| get_path(document, field)).collect();
    if index.is_sparse() && values.iter().all(Option::is_none) {
        return None;
    }
    let tuple = values.into_iter().map(|v| v.cloned().unwrap_or(Bson::Null)).collect();
    Some(canonical_key(&Bson::Array(tuple)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::IndexOptions;

    fn collection() -> CollectionData {
        let mut data = CollectionData::new("test.users");
        let mut changes = Vec::new();
        data.insert(doc! { "_id": 1, "email": "a@x", "age": 30 }, &mut changes).unwrap();
        data.insert(doc! { "_id": 2, "email": "b@x", "age": 20 }, &mut changes).unwrap();
        data
    }

    #[test]
    fn test_insert_generates_id_and_rejects_duplicates() {
        let mut data = collection();
        let mut changes = Vec::new();
        let id = data.insert(doc! { "email": "c@x" }, &mut changes).unwrap();
        assert!(matches!(id, Bson::ObjectId(_)));
        assert_eq!(changes.len(), 1);

        let err = data.insert(doc! { "_id": 1 }, &mut changes).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::DuplicateKey);
        assert!(err.message().starts_with("E11000 duplicate key error collection: test.users index: _id_"));
    }

    #[test]
    fn test_numeric_ids_collide_across_widths() {
        let mut data = collection();
        let err = data.insert(doc! { "_id": 1.0 }, &mut Vec::new()).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::DuplicateKey);
    }

    #[test]
    fn test_unique_index() {
        let mut data = collection();
        data.create_index(IndexModel::from_key_spec("email:1").with_options(IndexOptions::new().unique(true)))
            .unwrap();
        let err = data.insert(doc! { "email": "a@x" }, &mut Vec::new()).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::DuplicateKey);

        let err = data
            .update(
                &doc! { "_id": 2 },
                Rewrite::Operators(&doc! { "$set": { "email": "a@x" } }),
                None,
                false,
                false,
                &mut Vec::new(),
            )
            .unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::DuplicateKey);
        assert_eq!(data.get(&Bson::Int32(2)).unwrap().get_str("email").unwrap(), "b@x");
    }

    #[test]
    fn test_unique_index_over_duplicates_fails() {
        let mut data = collection();
        data.insert(doc! { "email": "a@x" }, &mut Vec::new()).unwrap();
        let result = data.create_index(IndexModel::from_key_spec("email:1").with_options(IndexOptions::new().unique(true)));
        assert_eq!(result.unwrap_err().kind(), &ErrorKind::DuplicateKey);
    }

    #[test]
    fn test_create_index_idempotent() {
        let mut data = collection();
        let model = IndexModel::from_key_spec("age:-1");
        assert_eq!(data.create_index(model.clone()).unwrap(), "age_-1");
        assert_eq!(data.create_index(model).unwrap(), "age_-1");
        assert_eq!(data.indexes().len(), 2);
        let clash = IndexModel::from_key_spec("age:-1").with_options(IndexOptions::new().unique(true));
        assert_eq!(data.create_index(clash).unwrap_err().kind(), &ErrorKind::IndexError);
    }

    #[test]
    fn test_drop_index() {
        let mut data = collection();
        data.create_index(IndexModel::from_key_spec("age:1")).unwrap();
        data.drop_index("age_1").unwrap();
        assert!(data.drop_index("age_1").is_err());
        assert!(data.drop_index("_id_").is_err());
    }

    #[test]
    fn test_update_reports_and_changes() {
        let mut data = collection();
        let mut changes = Vec::new();
        let report = data
            .update(
                &doc! {},
                Rewrite::Operators(&doc! { "$inc": { "age": 1 } }),
                None,
                true,
                false,
                &mut changes,
            )
            .unwrap();
        assert_eq!((report.matched, report.modified), (2, 2));
        assert_eq!(changes.len(), 2);
        assert!(matches!(&changes[0], Change::Update { updated_fields, .. } if updated_fields.get_i32("age").ok() == Some(31)));
    }

    #[test]
    fn test_update_with_sort_picks_first() {
        let mut data = collection();
        let report = data
            .update(
                &doc! {},
                Rewrite::Operators(&doc! { "$set": { "picked": true } }),
                Some(&doc! { "age": 1 }),
                false,
                false,
                &mut Vec::new(),
            )
            .unwrap();
        assert_eq!(report.before.unwrap().get_i32("_id").unwrap(), 2);
        assert!(report.after.unwrap().get_bool("picked").unwrap());
    }

    #[test]
    fn test_upsert() {
        let mut data = collection();
        let report = data
            .update(
                &doc! { "email": "z@x" },
                Rewrite::Operators(&doc! { "$set": { "age": 5 } }),
                None,
                false,
                true,
                &mut Vec::new(),
            )
            .unwrap();
        assert_eq!(report.matched, 0);
        assert!(report.upserted_id.is_some());
        assert_eq!(data.len(), 3);
        assert_eq!(report.after.unwrap().get_str("email").unwrap(), "z@x");
    }

    #[test]
    fn test_unmodified_update_bumps_nothing() {
        let mut data = collection();
        let version = data.version;
        let report = data
            .update(
                &doc! { "_id": 1 },
                Rewrite::Operators(&doc! { "$set": { "age": 30 } }),
                None,
                false,
                false,
                &mut Vec::new(),
            )
            .unwrap();
        assert_eq!((report.matched, report.modified), (1, 0));
        assert_eq!(data.version, version);
    }

    #[test]
    fn test_replace() {
        let mut data = collection();
        let mut changes = Vec::new();
        data.update(
            &doc! { "_id": 1 },
            Rewrite::Replacement(&doc! { "email": "new@x" }),
            None,
            false,
            false,
            &mut changes,
        )
        .unwrap();
        assert_eq!(data.get(&Bson::Int32(1)).unwrap(), &doc! { "_id": 1, "email": "new@x" });
        assert!(matches!(changes[0], Change::Replace { .. }));
    }

    #[test]
    fn test_delete() {
        let mut data = collection();
        let mut changes = Vec::new();
        let removed = data.delete(&doc! { "age": { "$lt": 25 } }, None, true, &mut changes).unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(data.len(), 1);
        assert_eq!(changes, vec![Change::Delete { id: Bson::Int32(2) }]);
        assert!(data.delete(&doc! { "age": 99 }, None, false, &mut changes).unwrap().is_empty());
    }
}
