use bson::{Bson, Document};

use crate::common::DOC_ID;
use crate::driver::memory::compare::is_truthy;
use crate::driver::memory::expression::{evaluate, Scope};
use crate::driver::memory::path::set_path;
use crate::driver::memory::store_error;
use crate::errors::RepoResult;

enum Field {
    Include,
    Exclude,
    Nested(Document),
    Computed(Bson),
}

fn classify(value: &Bson) -> Field {
    match value {
        Bson::Boolean(_) | Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) => {
            if is_truthy(value) {
                Field::Include
            } else {
                Field::Exclude
            }
        }
        Bson::Document(spec) if !spec.keys().any(|k| k.starts_with('$')) => Field::Nested(spec.clone()),
        other => Field::Computed(other.clone()),
    }
}

/// Shapes `doc` according to a projection.
///
/// A projection either includes fields (with optional computed ones) or
/// excludes them; `_id` is kept unless excluded explicitly and may be
/// excluded in either mode. An empty projection returns the document as is.
pub(crate) fn project(doc: &Document, projection: &Document, vars: Option<&Document>) -> RepoResult<Document> {
    if projection.is_empty() {
        return Ok(doc.clone());
    }
    let expanded = expand(projection);
    let mut inclusive = None;
    for (key, value) in &expanded {
        if key == DOC_ID {
            continue;
        }
        let Some(mode) = mode_of(value) else {
            continue;
        };
        match inclusive {
            None => inclusive = Some(mode),
            Some(current) if current != mode => {
                return Err(store_error(&format!(
                    "cannot do {} on field {} in {} projection",
                    if mode { "inclusion" } else { "exclusion" },
                    key,
                    if current { "inclusion" } else { "exclusion" }
                )))
            }
            _ => {}
        }
    }

    let keep_id = expanded.get(DOC_ID).map(|v| !matches!(classify(v), Field::Exclude)).unwrap_or(true);
    match inclusive {
        // only `_id` was mentioned
        None => {
            let mut out = doc.clone();
            if !keep_id {
                out.remove(DOC_ID);
            } else if let Some(Field::Computed(expression)) = expanded.get(DOC_ID).map(classify) {
                out.insert(DOC_ID, evaluate(&expression, &Scope::new(doc, vars))?);
            }
            Ok(out)
        }
        Some(true) => include(doc, doc, &expanded, keep_id, vars),
        Some(false) => Ok(exclude(doc, &expanded, keep_id)),
    }
}

// Inclusion (`true`) or exclusion (`false`) implied by one projection value.
fn mode_of(value: &Bson) -> Option<bool> {
    match classify(value) {
        Field::Include | Field::Computed(_) => Some(true),
        Field::Exclude => Some(false),
        Field::Nested(spec) => spec.values().find_map(mode_of),
    }
}

// Turns dotted keys into nested specs: `{"a.b": 1}` becomes `{a: {b: 1}}`.
fn expand(projection: &Document) -> Document {
    let mut out = Document::new();
    for (key, value) in projection {
        match key.split_once('.') {
            Some((head, rest)) => {
                let entry = out.entry(head.to_string()).or_insert_with(|| Bson::Document(Document::new()));
                if let Bson::Document(nested) = entry {
                    nested.insert(rest, value.clone());
                    let normalized = expand(nested);
                    *nested = normalized;
                }
            }
            None => {
                out.insert(key.clone(), value.clone());
            }
        }
    }
    out
}

fn include(
    root: &Document,
    doc: &Document,
    spec: &Document,
    keep_id: bool,
    vars: Option<&Document>,
) -> RepoResult<Document> {
    let mut out = Document::new();
    if keep_id {
        if let Some(id) = doc.get(DOC_ID) {
            out.insert(DOC_ID, id.clone());
        }
    }
    for (key, value) in doc {
        if key == DOC_ID {
            continue;
        }
        match spec.get(key).map(classify) {
            Some(Field::Include) => {
                out.insert(key.clone(), value.clone());
            }
            Some(Field::Nested(nested)) => {
                if let Some(shaped) = include_nested(root, value, &nested, vars)? {
                    out.insert(key.clone(), shaped);
                }
            }
            _ => {}
        }
    }
    for (key, value) in spec {
        if let Field::Computed(expression) = classify(value) {
            if key == DOC_ID && !keep_id {
                continue;
            }
            let computed = evaluate(&expression, &Scope::new(root, vars))?;
            set_path(&mut out, key, computed)?;
        }
    }
    Ok(out)
}

fn include_nested(
    root: &Document,
    value: &Bson,
    spec: &Document,
    vars: Option<&Document>,
) -> RepoResult<Option<Bson>> {
    match value {
        Bson::Document(inner) => Ok(Some(Bson::Document(include(root, inner, spec, false, vars)?))),
        Bson::Array(items) => {
            let mut shaped = Vec::new();
            for item in items {
                if let Some(item) = include_nested(root, item, spec, vars)? {
                    shaped.push(item);
                }
            }
            Ok(Some(Bson::Array(shaped)))
        }
        _ => Ok(None),
    }
}

fn exclude(doc: &Document, spec: &Document, keep_id: bool) -> Document {
    let mut out = Document::new();
    for (key, value) in doc {
        if key == DOC_ID {
            if keep_id {
                out.insert(key.clone(), value.clone());
            }
            continue;
        }
        match spec.get(key).map(classify) {
            Some(Field::Exclude) => {}
            Some(Field::Nested(nested)) => {
                out.insert(key.clone(), exclude_nested(value, &nested));
            }
            _ => {
                out.insert(key.clone(), value.clone());
            }
        }
    }
    out
}

fn exclude_nested(value: &Bson, spec: &Document) -> Bson {
    match value {
        Bson::Document(inner) => Bson::Document(exclude(inner, spec, true)),
        Bson::Array(items) => Bson::Array(items.iter().map(|item| exclude_nested(item, spec)).collect()),
        other => other.clone(),
    }
}
