use std::cmp::Ordering;

use bson::{doc, Bson, Document};
use indexmap::IndexMap;

use crate::common::DOC_ID;
use crate::driver::memory::compare::{as_i64, canonical_key, compare, values_equal};
use crate::driver::memory::expression::{describe, evaluate, field_value, reduce, Scope};
use crate::driver::memory::filter::matches;
use crate::driver::memory::path::{get_path, lookup, remove_path, set_path};
use crate::driver::memory::projection::project;
use crate::driver::memory::store_error;
use crate::errors::RepoResult;

/// Runs an aggregation pipeline over `documents`.
///
/// Supported stages: `$match`, `$project`, `$addFields`/`$set`, `$unset`,
/// `$sort`, `$skip`, `$limit`, `$count`, `$group`, `$unwind`,
/// `$replaceRoot`/`$replaceWith` and `$sortByCount`.
pub(crate) fn run_pipeline(
    documents: Vec<Document>,
    pipeline: &[Document],
    vars: Option<&Document>,
) -> RepoResult<Vec<Document>> {
    let mut current = documents;
    for stage in pipeline {
        if stage.len() != 1 {
            return Err(store_error(&format!(
                "a pipeline stage specification object must contain exactly one field: {{{}}}",
                describe(stage)
            )));
        }
        let Some((name, argument)) = stage.iter().next() else {
            continue;
        };
        current = run_stage(current, name, argument, vars)?;
    }
    Ok(current)
}

fn run_stage(
    documents: Vec<Document>,
    name: &str,
    argument: &Bson,
    vars: Option<&Document>,
) -> RepoResult<Vec<Document>> {
    match name {
        "$match" => {
            let filter = stage_document(name, argument)?;
            let mut kept = Vec::with_capacity(documents.len());
            for document in documents {
                if matches(&document, filter)? {
                    kept.push(document);
                }
            }
            Ok(kept)
        }
        "$project" => {
            let projection = stage_document(name, argument)?;
            documents.iter().map(|d| project(d, projection, vars)).collect()
        }
        "$addFields" | "$set" => {
            let fields = stage_document(name, argument)?;
            documents
                .into_iter()
                .map(|document| -> RepoResult<Document> {
                    let mut out = document.clone();
                    for (path, expression) in fields {
                        let value = evaluate(expression, &Scope::new(&document, vars))?;
                        set_path(&mut out, path, value)?;
                    }
                    Ok(out)
                })
                .collect()
        }
        "$unset" => {
            let paths: Vec<String> = match argument {
                Bson::String(path) => vec![path.clone()],
                Bson::Array(items) => items
                    .iter()
                    .map(|item| match item {
                        Bson::String(path) => Ok(path.clone()),
                        _ => Err(store_error("$unset specification must be a string or an array of strings")),
                    })
                    .collect::<RepoResult<_>>()?,
                _ => return Err(store_error("$unset specification must be a string or an array of strings")),
            };
            Ok(documents
                .into_iter()
                .map(|mut document| {
                    for path in &paths {
                        remove_path(&mut document, path);
                    }
                    document
                })
                .collect())
        }
        "$sort" => {
            let mut documents = documents;
            sort_documents(&mut documents, stage_document(name, argument)?)?;
            Ok(documents)
        }
        "$skip" => {
            let skip = stage_count(name, argument)?;
            Ok(documents.into_iter().skip(skip).collect())
        }
        "$limit" => {
            let limit = stage_count(name, argument)?;
            if limit == 0 {
                return Err(store_error("the limit must be positive"));
            }
            Ok(documents.into_iter().take(limit).collect())
        }
        "$count" => {
            let field = match argument {
                Bson::String(field) if !field.is_empty() && !field.starts_with('$') && !field.contains('.') => field,
                _ => return Err(store_error("the count field must be a non-empty string without '$' or '.'")),
            };
            if documents.is_empty() {
                return Ok(Vec::new());
            }
            Ok(vec![doc! { field: documents.len() as i64 }])
        }
        "$group" => group(documents, stage_document(name, argument)?, vars),
        "$sortByCount" => {
            let grouped = group(
                documents,
                &doc! { DOC_ID: argument.clone(), "count": { "$sum": 1 } },
                vars,
            )?;
            let mut grouped = grouped;
            sort_documents(&mut grouped, &doc! { "count": -1 })?;
            Ok(grouped)
        }
        "$unwind" => unwind(documents, argument),
        "$replaceRoot" | "$replaceWith" => {
            let expression = if name == "$replaceRoot" {
                stage_document(name, argument)?
                    .get("newRoot")
                    .ok_or_else(|| store_error("$replaceRoot requires a 'newRoot' field"))?
                    .clone()
            } else {
                argument.clone()
            };
            documents
                .iter()
                .map(|document| -> RepoResult<Document> {
                    match evaluate(&expression, &Scope::new(document, vars))? {
                        Bson::Document(root) => Ok(root),
                        other => Err(store_error(&format!(
                            "'newRoot' expression must evaluate to an object, but resulting value was: {}",
                            other
                        ))),
                    }
                })
                .collect()
        }
        other => Err(store_error(&format!("unrecognized pipeline stage name: '{}'", other))),
    }
}

fn stage_document<'a>(name: &str, argument: &'a Bson) -> RepoResult<&'a Document> {
    match argument {
        Bson::Document(spec) => Ok(spec),
        _ => Err(store_error(&format!("the {} stage specification must be an object", name))),
    }
}

fn stage_count(name: &str, argument: &Bson) -> RepoResult<usize> {
    match as_i64(argument) {
        Some(n) if n >= 0 => Ok(n as usize),
        _ => Err(store_error(&format!("{} must be a non-negative integer", name))),
    }
}

/// Sorts documents by a `{field: 1 | -1}` specification.
///
/// Missing fields sort as null. An array field sorts by its smallest element
/// ascending and its largest descending. The sort is stable.
pub(crate) fn sort_documents(documents: &mut [Document], sort: &Document) -> RepoResult<()> {
    let mut keys = Vec::with_capacity(sort.len());
    for (path, direction) in sort {
        let ascending = match as_i64(direction) {
            Some(1) => true,
            Some(-1) => false,
            _ => return Err(store_error(&format!("invalid sort direction for '{}': {}", path, direction))),
        };
        keys.push((path.as_str(), ascending));
    }
    if keys.is_empty() {
        return Ok(());
    }
    documents.sort_by(|a, b| {
        for (path, ascending) in &keys {
            let order = compare(&sort_key(a, path, *ascending), &sort_key(b, path, *ascending));
            let order = if *ascending { order } else { order.reverse() };
            if order != Ordering::Equal {
                return order;
            }
        }
        Ordering::Equal
    });
    Ok(())
}

fn sort_key(document: &Document, path: &str, ascending: bool) -> Bson {
    let mut values = Vec::new();
    for value in lookup(document, path) {
        match value {
            Bson::Array(items) if !items.is_empty() => values.extend(items),
            other => values.push(other),
        }
    }
    let picked = if ascending {
        values.into_iter().min_by(compare)
    } else {
        values.into_iter().max_by(compare)
    };
    picked.unwrap_or(Bson::Null)
}

fn group(documents: Vec<Document>, spec: &Document, vars: Option<&Document>) -> RepoResult<Vec<Document>> {
    let key_expression = spec
        .get(DOC_ID)
        .ok_or_else(|| store_error("a group specification must include an _id"))?;

    let mut accumulators = Vec::new();
    for (field, accumulator) in spec {
        if field == DOC_ID {
            continue;
        }
        let (operator, expression) = match accumulator {
            Bson::Document(acc) if acc.len() == 1 => match acc.iter().next() {
                Some((operator, expression)) => (operator.as_str(), expression),
                None => continue,
            },
            _ => {
                return Err(store_error(&format!(
                    "the field '{}' must be an accumulator object",
                    field
                )))
            }
        };
        if !matches!(
            operator,
            "$sum" | "$avg" | "$min" | "$max" | "$first" | "$last" | "$push" | "$addToSet" | "$count"
        ) {
            return Err(store_error(&format!("unknown group operator '{}'", operator)));
        }
        accumulators.push((field.as_str(), operator, expression));
    }

    let mut groups: IndexMap<Vec<u8>, (Bson, Vec<Vec<Bson>>)> = IndexMap::new();
    for document in &documents {
        let scope = Scope::new(document, vars);
        let key = evaluate(key_expression, &scope)?;
        let entry = groups
            .entry(canonical_key(&key))
            .or_insert_with(|| (key, vec![Vec::new(); accumulators.len()]));
        for (slot, (_, operator, expression)) in accumulators.iter().enumerate() {
            let value = match *operator {
                "$count" => Bson::Int32(1),
                // $first and $last keep missing fields as missing
                "$first" | "$last" | "$push" | "$addToSet" => match expression {
                    Bson::String(path) if path.starts_with('$') && !path.starts_with("$$") => {
                        match field_value(document, &path[1..]) {
                            Some(value) => value,
                            None if matches!(*operator, "$first" | "$last") => Bson::Null,
                            None => continue,
                        }
                    }
                    other => evaluate(other, &scope)?,
                },
                _ => evaluate(expression, &scope)?,
            };
            entry.1[slot].push(value);
        }
    }

    let mut out = Vec::with_capacity(groups.len());
    for (_, (key, collected)) in groups {
        let mut document = doc! { DOC_ID: key };
        for ((field, operator, _), values) in accumulators.iter().zip(collected) {
            let value = match *operator {
                "$first" => values.into_iter().next().unwrap_or(Bson::Null),
                "$last" => values.into_iter().last().unwrap_or(Bson::Null),
                "$push" => Bson::Array(values),
                "$addToSet" => {
                    let mut unique: Vec<Bson> = Vec::new();
                    for value in values {
                        if !unique.iter().any(|u| values_equal(u, &value)) {
                            unique.push(value);
                        }
                    }
                    Bson::Array(unique)
                }
                "$count" => reduce("$sum", &values),
                _ => reduce(operator, &flatten_for_reduce(values)),
            };
            document.insert(*field, value);
        }
        out.push(document);
    }
    Ok(out)
}

// `$sum: "$field"` over array fields adds nothing, matching the store.
fn flatten_for_reduce(values: Vec<Bson>) -> Vec<Bson> {
    values.into_iter().filter(|v| !matches!(v, Bson::Array(_))).collect()
}

fn unwind(documents: Vec<Document>, argument: &Bson) -> RepoResult<Vec<Document>> {
    let (path, preserve, index_field) = match argument {
        Bson::String(path) => (path.clone(), false, None),
        Bson::Document(spec) => (
            spec.get_str("path")
                .map_err(|_| store_error("$unwind requires a 'path' field"))?
                .to_string(),
            spec.get_bool("preserveNullAndEmptyArrays").unwrap_or(false),
            spec.get_str("includeArrayIndex").ok().map(str::to_string),
        ),
        _ => return Err(store_error("$unwind requires a string or an object")),
    };
    let path = path
        .strip_prefix('$')
        .ok_or_else(|| store_error("$unwind field path must be prefixed by a '$'"))?
        .to_string();

    let mut out = Vec::new();
    for document in documents {
        match get_path(&document, &path).cloned() {
            Some(Bson::Array(items)) if !items.is_empty() => {
                for (position, item) in items.into_iter().enumerate() {
                    let mut unwound = document.clone();
                    set_path(&mut unwound, &path, item)?;
                    if let Some(field) = &index_field {
                        unwound.insert(field.clone(), position as i64);
                    }
                    out.push(unwound);
                }
            }
            Some(Bson::Array(_)) | Some(Bson::Null) | None => {
                if preserve {
                    let mut kept = document;
                    if let Some(field) = &index_field {
                        kept.insert(field.clone(), Bson::Null);
                    }
                    out.push(kept);
                }
            }
            Some(_) => {
                let mut kept = document;
                if let Some(field) = &index_field {
                    kept.insert(field.clone(), Bson::Null);
                }
                out.push(kept);
            }
        }
    }
    Ok(out)
}
