use bson::{doc, oid::ObjectId, Bson, Document, Timestamp};

use crate::common::{is_operator_document, DOC_ID};
use crate::driver::memory::compare::{as_f64, as_i64, compare, is_numeric, values_equal};
use crate::driver::memory::filter::{matches, operators_match};
use crate::driver::memory::path::{get_path, remove_path, set_path};
use crate::driver::memory::store_error;
use crate::errors::RepoResult;

/// What an update changed, in change-event form.
#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct UpdateOutcome {
    pub modified: bool,
    pub updated_fields: Document,
    pub removed_fields: Vec<String>,
}

/// Applies an operator update in place.
///
/// `inserting` is set while building an upserted document, which enables
/// `$setOnInsert`. The document is left untouched when the update fails.
pub(crate) fn apply_update(doc: &mut Document, update: &Document, inserting: bool) -> RepoResult<UpdateOutcome> {
    if update.is_empty() {
        return Err(store_error("update document must not be empty"));
    }
    if !update.keys().all(|k| k.starts_with('$')) {
        return Err(store_error("update document requires atomic operators"));
    }

    let mut working = doc.clone();
    let mut outcome = UpdateOutcome::default();
    for (operator, fields) in update {
        let fields = match fields {
            Bson::Document(fields) => fields,
            _ => {
                return Err(store_error(&format!(
                    "modifier {} needs a document argument",
                    operator
                )))
            }
        };
        for (path, argument) in fields {
            apply_operator(&mut working, operator, path, argument, inserting, &mut outcome)?;
        }
    }

    if doc.get(DOC_ID).is_some() && working.get(DOC_ID) != doc.get(DOC_ID) {
        return Err(store_error(
            "performing an update on the path '_id' would modify the immutable field '_id'",
        ));
    }

    outcome.modified = working != *doc;
    *doc = working;
    Ok(outcome)
}

fn record_set(doc: &Document, path: &str, outcome: &mut UpdateOutcome) {
    if let Some(value) = get_path(doc, path) {
        outcome.updated_fields.insert(path, value.clone());
    }
    outcome.removed_fields.retain(|removed| removed != path);
}

fn record_unset(path: &str, outcome: &mut UpdateOutcome) {
    outcome.updated_fields.remove(path);
    if !outcome.removed_fields.iter().any(|r| r == path) {
        outcome.removed_fields.push(path.to_string());
    }
}

fn apply_operator(
    doc: &mut Document,
    operator: &str,
    path: &str,
    argument: &Bson,
    inserting: bool,
    outcome: &mut UpdateOutcome,
) -> RepoResult<()> {
    match operator {
        "$set" => {
            set_path(doc, path, argument.clone())?;
            record_set(doc, path, outcome);
        }
        "$setOnInsert" => {
            if inserting {
                set_path(doc, path, argument.clone())?;
                record_set(doc, path, outcome);
            }
        }
        "$unset" => {
            if remove_path(doc, path).is_some() {
                record_unset(path, outcome);
            }
        }
        "$inc" | "$mul" => {
            if !is_numeric(argument) {
                return Err(store_error(&format!("cannot {} with non-numeric argument", operator)));
            }
            let current = get_path(doc, path).cloned();
            let next = match current {
                None => match operator {
                    "$inc" => argument.clone(),
                    _ => zero_like(argument),
                },
                Some(value) if is_numeric(&value) => arithmetic(&value, argument, operator == "$inc"),
                Some(_) => {
                    return Err(store_error(&format!(
                        "cannot apply {} to a value of non-numeric type",
                        operator
                    )))
                }
            };
            set_path(doc, path, next)?;
            record_set(doc, path, outcome);
        }
        "$min" | "$max" => {
            let replace = match get_path(doc, path) {
                None => true,
                Some(current) => {
                    let order = compare(argument, current);
                    if operator == "$min" {
                        order == std::cmp::Ordering::Less
                    } else {
                        order == std::cmp::Ordering::Greater
                    }
                }
            };
            if replace {
                set_path(doc, path, argument.clone())?;
                record_set(doc, path, outcome);
            }
        }
        "$rename" => {
            let target = match argument {
                Bson::String(target) => target,
                _ => return Err(store_error("$rename target must be a string")),
            };
            if let Some(value) = remove_path(doc, path) {
                record_unset(path, outcome);
                set_path(doc, target, value)?;
                record_set(doc, target, outcome);
            }
        }
        "$currentDate" => {
            let value = match argument {
                Bson::Document(spec) if spec.get_str("$type").ok() == Some("timestamp") => {
                    let now = bson::DateTime::now().timestamp_millis();
                    Bson::Timestamp(Timestamp {
                        time: (now / 1000) as u32,
                        increment: 1,
                    })
                }
                _ => Bson::DateTime(bson::DateTime::now()),
            };
            set_path(doc, path, value)?;
            record_set(doc, path, outcome);
        }
        "$push" | "$addToSet" => {
            let (items, position, slice) = match argument {
                Bson::Document(spec) if spec.contains_key("$each") => {
                    let items = match spec.get("$each") {
                        Some(Bson::Array(items)) => items.clone(),
                        _ => return Err(store_error("$each needs an array")),
                    };
                    let position = spec.get("$position").and_then(as_i64);
                    let slice = spec.get("$slice").and_then(as_i64);
                    (items, position, slice)
                }
                value => (vec![value.clone()], None, None),
            };
            let mut array = existing_array(doc, path, operator)?;
            let mut insert_at = match position {
                Some(p) if p < 0 => array.len().saturating_sub(p.unsigned_abs() as usize),
                Some(p) => (p as usize).min(array.len()),
                None => array.len(),
            };
            for item in items {
                if operator == "$addToSet" && array.iter().any(|e| values_equal(e, &item)) {
                    continue;
                }
                array.insert(insert_at, item);
                insert_at += 1;
            }
            if let Some(slice) = slice {
                if slice >= 0 {
                    array.truncate(slice as usize);
                } else {
                    let keep = slice.unsigned_abs() as usize;
                    if array.len() > keep {
                        array.drain(..array.len() - keep);
                    }
                }
            }
            set_path(doc, path, Bson::Array(array))?;
            record_set(doc, path, outcome);
        }
        "$pull" => {
            let mut array = existing_array(doc, path, operator)?;
            let before = array.len();
            let mut kept = Vec::with_capacity(array.len());
            for item in array.drain(..) {
                if !pull_matches(&item, argument)? {
                    kept.push(item);
                }
            }
            if kept.len() != before {
                set_path(doc, path, Bson::Array(kept))?;
                record_set(doc, path, outcome);
            }
        }
        "$pop" => {
            let mut array = existing_array(doc, path, operator)?;
            if !array.is_empty() {
                match as_i64(argument) {
                    Some(-1) => {
                        array.remove(0);
                    }
                    Some(1) => {
                        array.pop();
                    }
                    _ => return Err(store_error("$pop expects 1 or -1")),
                }
                set_path(doc, path, Bson::Array(array))?;
                record_set(doc, path, outcome);
            }
        }
        other => return Err(store_error(&format!("unknown modifier: {}", other))),
    }
    Ok(())
}

fn existing_array(doc: &Document, path: &str, operator: &str) -> RepoResult<Vec<Bson>> {
    match get_path(doc, path) {
        None => Ok(Vec::new()),
        Some(Bson::Array(items)) => Ok(items.clone()),
        Some(_) => Err(store_error(&format!(
            "cannot apply {} to non-array field '{}'",
            operator, path
        ))),
    }
}

fn pull_matches(item: &Bson, condition: &Bson) -> RepoResult<bool> {
    match condition {
        Bson::Document(cond) if is_operator_document(cond) => {
            operators_match(std::slice::from_ref(item), cond)
        }
        Bson::Document(cond) => match item {
            Bson::Document(doc) => matches(doc, cond),
            _ => Ok(false),
        },
        value => Ok(values_equal(item, value)),
    }
}

fn zero_like(value: &Bson) -> Bson {
    match value {
        Bson::Int32(_) => Bson::Int32(0),
        Bson::Int64(_) => Bson::Int64(0),
        _ => Bson::Double(0.0),
    }
}

fn arithmetic(current: &Bson, argument: &Bson, add: bool) -> Bson {
    match (current, argument) {
        (Bson::Int32(a), Bson::Int32(b)) => {
            let result = if add { a.checked_add(*b) } else { a.checked_mul(*b) };
            match result {
                Some(r) => Bson::Int32(r),
                None => wide(*a as i64, *b as i64, add),
            }
        }
        (Bson::Double(_), _) | (_, Bson::Double(_)) => {
            let (a, b) = (as_f64(current).unwrap_or(0.0), as_f64(argument).unwrap_or(0.0));
            Bson::Double(if add { a + b } else { a * b })
        }
        _ => wide(as_i64(current).unwrap_or(0), as_i64(argument).unwrap_or(0), add),
    }
}

fn wide(a: i64, b: i64, add: bool) -> Bson {
    let result = if add { a.checked_add(b) } else { a.checked_mul(b) };
    match result {
        Some(r) => Bson::Int64(r),
        None => Bson::Double(if add { a as f64 + b as f64 } else { a as f64 * b as f64 }),
    }
}

/// Replaces the content of `doc` with `replacement`, keeping its `_id`.
pub(crate) fn apply_replacement(doc: &mut Document, replacement: &Document) -> RepoResult<UpdateOutcome> {
    if is_operator_document(replacement) {
        return Err(store_error("replacement document must not contain update operators"));
    }
    let id = doc.get(DOC_ID).cloned();
    if let (Some(id), Some(new_id)) = (&id, replacement.get(DOC_ID)) {
        if !values_equal(id, new_id) {
            return Err(store_error(
                "the _id field cannot be changed by a replacement",
            ));
        }
    }
    let mut next = Document::new();
    if let Some(id) = id {
        next.insert(DOC_ID, id);
    }
    for (key, value) in replacement {
        if key != DOC_ID {
            next.insert(key.clone(), value.clone());
        }
    }
    let modified = next != *doc;
    *doc = next;
    Ok(UpdateOutcome {
        modified,
        updated_fields: Document::new(),
        removed_fields: Vec::new(),
    })
}

/// Builds the document inserted by an upsert that matched nothing.
///
/// Equality conditions of the filter seed the document, the update is then
/// applied in insert mode and an `_id` is generated when still missing.
pub(crate) fn upsert_document(filter: &Document, update: &Document) -> RepoResult<Document> {
    let mut seed = Document::new();
    seed_from_filter(filter, &mut seed)?;
    if is_operator_document(update) {
        apply_update(&mut seed, update, true)?;
    } else {
        apply_replacement(&mut seed, update)?;
    }
    Ok(with_id_first(seed))
}

fn seed_from_filter(filter: &Document, seed: &mut Document) -> RepoResult<()> {
    for (key, condition) in filter {
        if key == "$and" {
            if let Bson::Array(clauses) = condition {
                for clause in clauses {
                    if let Bson::Document(clause) = clause {
                        seed_from_filter(clause, seed)?;
                    }
                }
            }
            continue;
        }
        if key.starts_with('$') {
            continue;
        }
        match condition {
            Bson::Document(ops) if is_operator_document(ops) => {
                if let Some(value) = ops.get("$eq") {
                    set_path(seed, key, value.clone())?;
                }
            }
            Bson::RegularExpression(_) => {}
            value => set_path(seed, key, value.clone())?,
        }
    }
    Ok(())
}

/// Moves `_id` to the front, generating one when absent.
pub(crate) fn with_id_first(mut doc: Document) -> Document {
    let id = doc.remove(DOC_ID).unwrap_or_else(|| Bson::ObjectId(ObjectId::new()));
    let mut ordered = doc! { DOC_ID: id };
    ordered.extend(doc);
    ordered
}
