use bson::{Bson, Document};

use crate::driver::memory::store_error;
use crate::errors::RepoResult;

/// Every value reachable through a dotted `path`.
///
/// Arrays met along the way are traversed element by element, and a numeric
/// segment also addresses the array position, so `items.sku` yields the sku
/// of every item. An empty result means the path is missing.
pub(crate) fn lookup(doc: &Document, path: &str) -> Vec<Bson> {
    let parts: Vec<&str> = path.split('.').collect();
    let mut out = Vec::new();
    if let Some(first) = doc.get(parts[0]) {
        lookup_in(first, &parts[1..], &mut out);
    }
    out
}

fn lookup_in(value: &Bson, parts: &[&str], out: &mut Vec<Bson>) {
    let Some((head, rest)) = parts.split_first() else {
        out.push(value.clone());
        return;
    };
    match value {
        Bson::Document(doc) => {
            if let Some(next) = doc.get(*head) {
                lookup_in(next, rest, out);
            }
        }
        Bson::Array(items) => {
            if let Ok(position) = head.parse::<usize>() {
                if let Some(next) = items.get(position) {
                    lookup_in(next, rest, out);
                }
            }
            for item in items {
                if let Bson::Document(_) = item {
                    lookup_in(item, parts, out);
                }
            }
        }
        _ => {}
    }
}

/// The value at a dotted `path` without array expansion.
pub(crate) fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Bson::Document(d) => d.get(part)?,
            Bson::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Writes `value` at a dotted `path`, creating intermediate documents.
pub(crate) fn set_path(doc: &mut Document, path: &str, value: Bson) -> RepoResult<()> {
    let parts: Vec<&str> = path.split('.').collect();
    set_in_document(doc, &parts, value, path)
}

fn set_in_document(doc: &mut Document, parts: &[&str], value: Bson, path: &str) -> RepoResult<()> {
    let (head, rest) = match parts.split_first() {
        Some(split) => split,
        None => return Err(store_error("empty field path")),
    };
    if head.is_empty() {
        return Err(store_error(&format!("invalid empty segment in field path '{}'", path)));
    }
    if rest.is_empty() {
        doc.insert(*head, value);
        return Ok(());
    }
    if !doc.contains_key(*head) {
        doc.insert(*head, Document::new());
    }
    match doc.get_mut(*head) {
        Some(next) => set_in_value(next, rest, value, path),
        None => Err(store_error(&format!("cannot create field in path '{}'", path))),
    }
}

fn set_in_value(target: &mut Bson, parts: &[&str], value: Bson, path: &str) -> RepoResult<()> {
    match target {
        Bson::Document(doc) => set_in_document(doc, parts, value, path),
        Bson::Array(items) => {
            let (head, rest) = match parts.split_first() {
                Some(split) => split,
                None => return Err(store_error("empty field path")),
            };
            let position = head.parse::<usize>().map_err(|_| {
                store_error(&format!(
                    "cannot create field '{}' in array of path '{}'",
                    head, path
                ))
            })?;
            while items.len() <= position {
                items.push(Bson::Null);
            }
            if rest.is_empty() {
                items[position] = value;
                Ok(())
            } else {
                if matches!(items[position], Bson::Null) {
                    items[position] = Bson::Document(Document::new());
                }
                set_in_value(&mut items[position], rest, value, path)
            }
        }
        other => Err(store_error(&format!(
            "cannot create field '{}' in element {}",
            parts.first().copied().unwrap_or_default(),
            other
        ))),
    }
}

/// Removes the value at a dotted `path`, returning it if it existed.
///
/// Array positions are nulled rather than removed, keeping sibling positions.
pub(crate) fn remove_path(doc: &mut Document, path: &str) -> Option<Bson> {
    let parts: Vec<&str> = path.split('.').collect();
    remove_in_document(doc, &parts)
}

fn remove_in_document(doc: &mut Document, parts: &[&str]) -> Option<Bson> {
    let (head, rest) = parts.split_first()?;
    if rest.is_empty() {
        return doc.remove(*head);
    }
    match doc.get_mut(*head)? {
        Bson::Document(inner) => remove_in_document(inner, rest),
        Bson::Array(items) => {
            let position = rest[0].parse::<usize>().ok()?;
            if rest.len() == 1 {
                let slot = items.get_mut(position)?;
                Some(std::mem::replace(slot, Bson::Null))
            } else {
                match items.get_mut(position)? {
                    Bson::Document(inner) => remove_in_document(inner, &rest[1..]),
                    _ => None,
                }
            }
        }
        _ => None,
    }
}
