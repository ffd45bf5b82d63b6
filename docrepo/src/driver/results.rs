use std::collections::BTreeMap;

use bson::Bson;

/// Outcome of inserting one document.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertOneResult {
    pub inserted_id: Bson,
}

/// Outcome of inserting many documents. Identifiers are in input order.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertManyResult {
    pub inserted_ids: Vec<Bson>,
}

/// Outcome of an update.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UpdateResult {
    pub matched_count: u64,
    pub modified_count: u64,
    pub upserted_id: Option<Bson>,
}

/// Outcome of a delete.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeleteResult {
    pub deleted_count: u64,
}

/// Summary of a bulk write.
///
/// `inserted_ids` and `upserted_ids` are keyed by the position of the
/// operation in the submitted list.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BulkWriteResult {
    pub inserted_count: u64,
    pub matched_count: u64,
    pub modified_count: u64,
    pub deleted_count: u64,
    pub upserted_count: u64,
    pub inserted_ids: BTreeMap<usize, Bson>,
    pub upserted_ids: BTreeMap<usize, Bson>,
}

impl BulkWriteResult {
    /// Folds the outcome of operation `index` into the summary.
    pub fn add_update(&mut self, index: usize, result: UpdateResult) {
        self.matched_count += result.matched_count;
        self.modified_count += result.modified_count;
        if let Some(id) = result.upserted_id {
            self.upserted_count += 1;
            self.upserted_ids.insert(index, id);
        }
    }

    pub fn add_insert(&mut self, index: usize, id: Bson) {
        self.inserted_count += 1;
        self.inserted_ids.insert(index, id);
    }

    pub fn add_delete(&mut self, result: DeleteResult) {
        self.deleted_count += result.deleted_count;
    }
}
