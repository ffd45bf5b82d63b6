use std::sync::Arc;

use bson::{Bson, Document};
use parking_lot::RwLock;

use crate::common::OPERATOR_SIGIL;

pub type Atomic<T> = Arc<RwLock<T>>;

#[inline]
pub fn atomic<T>(t: T) -> Atomic<T> {
    Arc::new(RwLock::new(t))
}

/// Returns `true` when at least one top-level key of `doc` is an operator.
#[inline]
pub fn is_operator_document(doc: &Document) -> bool {
    doc.keys().any(|k| k.starts_with(OPERATOR_SIGIL))
}

/// Builds the conventional name of an index from its key specification,
/// e.g. `{email: 1, age: -1}` becomes `email_1_age_-1`.
pub fn index_name_from_keys(keys: &Document) -> String {
    keys.iter()
        .map(|(field, direction)| {
            let direction = match direction {
                Bson::Int32(i) => i.to_string(),
                Bson::Int64(i) => i.to_string(),
                Bson::Double(d) => (*d as i64).to_string(),
                Bson::String(s) => s.clone(),
                other => other.to_string(),
            };
            format!("{}_{}", field, direction)
        })
        .collect::<Vec<_>>()
        .join("_")
}
