use std::cmp::Ordering;

use bson::{Bson, Document, Regex as BsonRegex};
use regex::RegexBuilder;

use crate::common::is_operator_document;
use crate::driver::memory::compare::{as_f64, as_i64, compare_same_type, is_truthy, values_equal};
use crate::driver::memory::path::lookup;
use crate::driver::memory::store_error;
use crate::errors::RepoResult;

/// Evaluates a query filter against a document.
///
/// Supports implicit equality (including array membership), dotted paths,
/// the logical operators `$and`, `$or`, `$nor` and the field operators
/// `$eq`, `$ne`, `$gt`, `$gte`, `$lt`, `$lte`, `$in`, `$nin`, `$exists`,
/// `$not`, `$regex`, `$size`, `$all`, `$elemMatch`, `$type` and `$mod`.
pub(crate) fn matches(doc: &Document, filter: &Document) -> RepoResult<bool> {
    for (key, condition) in filter {
        let matched = match key.as_str() {
            "$and" => {
                let mut all = true;
                for clause in clauses(key, condition)? {
                    if !matches(doc, clause)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => any_clause(doc, key, condition)?,
            "$nor" => !any_clause(doc, key, condition)?,
            "$comment" => true,
            op if op.starts_with('$') => {
                return Err(store_error(&format!("unknown top level operator: {}", op)))
            }
            path => field_matches(&lookup(doc, path), condition)?,
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn clauses<'a>(operator: &str, condition: &'a Bson) -> RepoResult<Vec<&'a Document>> {
    let invalid = || store_error(&format!("{} must be a nonempty array of documents", operator));
    match condition {
        Bson::Array(items) if !items.is_empty() => items
            .iter()
            .map(|item| match item {
                Bson::Document(doc) => Ok(doc),
                _ => Err(invalid()),
            })
            .collect(),
        _ => Err(invalid()),
    }
}

fn any_clause(doc: &Document, operator: &str, condition: &Bson) -> RepoResult<bool> {
    for clause in clauses(operator, condition)? {
        if matches(doc, clause)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Evaluates the condition of one field against the values found at its path.
pub(crate) fn field_matches(values: &[Bson], condition: &Bson) -> RepoResult<bool> {
    match condition {
        Bson::Document(ops) if is_operator_document(ops) => operators_match(values, ops),
        Bson::RegularExpression(regex) => {
            let compiled = compile(&regex.pattern, &regex.options)?;
            Ok(expand(values).any(|v| matches!(v, Bson::String(s) if compiled.is_match(s))))
        }
        target => Ok(equals_any(values, target)),
    }
}

/// Evaluates an operator document such as `{$gt: 1, $lt: 5}`.
pub(crate) fn operators_match(values: &[Bson], ops: &Document) -> RepoResult<bool> {
    for (op, argument) in ops {
        let matched = match op.as_str() {
            "$eq" => equals_any(values, argument),
            "$ne" => !equals_any(values, argument),
            "$gt" => compare_any(values, argument, |o| o == Ordering::Greater),
            "$gte" => compare_any(values, argument, |o| o != Ordering::Less),
            "$lt" => compare_any(values, argument, |o| o == Ordering::Less),
            "$lte" => compare_any(values, argument, |o| o != Ordering::Greater),
            "$in" => in_list(values, op, argument)?,
            "$nin" => !in_list(values, op, argument)?,
            "$exists" => is_truthy(argument) == !values.is_empty(),
            "$not" => match argument {
                Bson::Document(inner) => !operators_match(values, inner)?,
                Bson::RegularExpression(_) => !field_matches(values, argument)?,
                _ => return Err(store_error("$not needs a regex or a document")),
            },
            "$regex" => {
                let options = ops.get_str("$options").unwrap_or("");
                let compiled = match argument {
                    Bson::String(pattern) => compile(pattern, options)?,
                    Bson::RegularExpression(BsonRegex { pattern, options: inline }) => {
                        compile(pattern, &format!("{}{}", inline, options))?
                    }
                    _ => return Err(store_error("$regex has to be a string")),
                };
                expand(values).any(|v| matches!(v, Bson::String(s) if compiled.is_match(s)))
            }
            "$options" => {
                if !ops.contains_key("$regex") {
                    return Err(store_error("$options needs a $regex"));
                }
                true
            }
            "$size" => {
                let size = as_i64(argument).ok_or_else(|| store_error("$size needs a number"))?;
                values
                    .iter()
                    .any(|v| matches!(v, Bson::Array(items) if items.len() as i64 == size))
            }
            "$all" => match argument {
                Bson::Array(required) => {
                    !required.is_empty() && required.iter().all(|r| equals_any(values, r))
                }
                _ => return Err(store_error("$all needs an array")),
            },
            "$elemMatch" => match argument {
                Bson::Document(condition) => elem_match(values, condition)?,
                _ => return Err(store_error("$elemMatch needs an Object")),
            },
            "$type" => type_matches(values, argument)?,
            "$mod" => mod_matches(values, argument)?,
            other => return Err(store_error(&format!("unknown operator: {}", other))),
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

// Each value followed by its elements when it is an array.
fn expand(values: &[Bson]) -> impl Iterator<Item = &Bson> {
    values.iter().flat_map(|v| {
        let elements: &[Bson] = match v {
            Bson::Array(items) => items.as_slice(),
            _ => &[],
        };
        std::iter::once(v).chain(elements.iter())
    })
}

fn equals_any(values: &[Bson], target: &Bson) -> bool {
    if values.is_empty() {
        return matches!(target, Bson::Null);
    }
    expand(values).any(|v| values_equal(v, target))
}

fn compare_any(values: &[Bson], target: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
    expand(values).any(|v| compare_same_type(v, target).map(&accept).unwrap_or(false))
}

fn in_list(values: &[Bson], op: &str, argument: &Bson) -> RepoResult<bool> {
    let candidates = match argument {
        Bson::Array(items) => items,
        _ => return Err(store_error(&format!("{} needs an array", op))),
    };
    for candidate in candidates {
        let matched = match candidate {
            Bson::RegularExpression(_) => field_matches(values, candidate)?,
            other => equals_any(values, other),
        };
        if matched {
            return Ok(true);
        }
    }
    Ok(false)
}

fn elem_match(values: &[Bson], condition: &Document) -> RepoResult<bool> {
    for value in values {
        if let Bson::Array(items) = value {
            for item in items {
                let matched = if is_operator_document(condition) {
                    operators_match(std::slice::from_ref(item), condition)?
                } else {
                    match item {
                        Bson::Document(doc) => matches(doc, condition)?,
                        _ => false,
                    }
                };
                if matched {
                    return Ok(true);
                }
            }
        }
    }
    Ok(false)
}

fn type_name(value: &Bson) -> &'static str {
    match value {
        Bson::Double(_) => "double",
        Bson::String(_) => "string",
        Bson::Document(_) => "object",
        Bson::Array(_) => "array",
        Bson::Binary(_) => "binData",
        Bson::ObjectId(_) => "objectId",
        Bson::Boolean(_) => "bool",
        Bson::DateTime(_) => "date",
        Bson::Null => "null",
        Bson::RegularExpression(_) => "regex",
        Bson::Int32(_) => "int",
        Bson::Timestamp(_) => "timestamp",
        Bson::Int64(_) => "long",
        Bson::Decimal128(_) => "decimal",
        Bson::MinKey => "minKey",
        Bson::MaxKey => "maxKey",
        _ => "unknown",
    }
}

fn type_code(name: &str) -> Option<i64> {
    Some(match name {
        "double" => 1,
        "string" => 2,
        "object" => 3,
        "array" => 4,
        "binData" => 5,
        "objectId" => 7,
        "bool" => 8,
        "date" => 9,
        "null" => 10,
        "regex" => 11,
        "int" => 16,
        "timestamp" => 17,
        "long" => 18,
        "decimal" => 19,
        "minKey" => -1,
        "maxKey" => 127,
        _ => return None,
    })
}

fn type_matches(values: &[Bson], argument: &Bson) -> RepoResult<bool> {
    let wanted: Vec<&Bson> = match argument {
        Bson::Array(items) => items.iter().collect(),
        other => vec![other],
    };
    for value in expand(values) {
        let name = type_name(value);
        for w in &wanted {
            let hit = match w {
                Bson::String(alias) if alias == "number" => {
                    matches!(value, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_))
                }
                Bson::String(alias) => alias == name,
                code => match as_i64(code) {
                    Some(code) => type_code(name) == Some(code),
                    None => return Err(store_error("$type needs a type name or code")),
                },
            };
            if hit {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

fn mod_matches(values: &[Bson], argument: &Bson) -> RepoResult<bool> {
    let (divisor, remainder) = match argument {
        Bson::Array(items) if items.len() == 2 => match (as_i64(&items[0]), as_i64(&items[1])) {
            (Some(d), Some(r)) if d != 0 => (d, r),
            _ => return Err(store_error("$mod needs a non-zero divisor and a remainder")),
        },
        _ => return Err(store_error("$mod needs an array of two numbers")),
    };
    Ok(expand(values).any(|v| match as_f64(v) {
        Some(n) => (n.trunc() as i64) % divisor == remainder,
        None => false,
    }))
}

pub(crate) fn compile(pattern: &str, options: &str) -> RepoResult<regex::Regex> {
    let mut builder = RegexBuilder::new(pattern);
    for flag in options.chars() {
        match flag {
            'i' => builder.case_insensitive(true),
            'm' => builder.multi_line(true),
            's' => builder.dot_matches_new_line(true),
            'x' => builder.ignore_whitespace(true),
            other => return Err(store_error(&format!("invalid regex flag: {}", other))),
        };
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn person() -> Document {
        doc! {
            "name": "Ada Lovelace",
            "age": 36,
            "tags": ["math", "poetry"],
            "address": { "city": "London", "zip": "W1" },
            "scores": [ { "subject": "math", "value": 98 }, { "subject": "art", "value": 71 } ],
            "nickname": Bson::Null,
        }
    }

    fn check(filter: Document) -> bool {
        matches(&person(), &filter).unwrap()
    }

    #[test]
    fn test_empty_filter_matches_all() {
        assert!(check(doc! {}));
    }

    #[test]
    fn test_implicit_equality() {
        assert!(check(doc! { "name": "Ada Lovelace" }));
        assert!(check(doc! { "age": 36i64 }));
        assert!(!check(doc! { "age": 37 }));
    }

    #[test]
    fn test_array_membership() {
        assert!(check(doc! { "tags": "math" }));
        assert!(check(doc! { "tags": ["math", "poetry"] }));
        assert!(!check(doc! { "tags": "music" }));
    }

    #[test]
    fn test_dotted_paths() {
        assert!(check(doc! { "address.city": "London" }));
        assert!(check(doc! { "scores.subject": "art" }));
        assert!(!check(doc! { "address.city": "Paris" }));
    }

    #[test]
    fn test_null_matches_missing_and_null() {
        assert!(check(doc! { "nickname": Bson::Null }));
        assert!(check(doc! { "missing": Bson::Null }));
        assert!(!check(doc! { "name": Bson::Null }));
    }

    #[test]
    fn test_comparison_operators() {
        assert!(check(doc! { "age": { "$gt": 30, "$lte": 36 } }));
        assert!(!check(doc! { "age": { "$lt": 36 } }));
        assert!(check(doc! { "scores.value": { "$gte": 98 } }));
        // no cross-type comparison
        assert!(!check(doc! { "age": { "$gt": "1" } }));
    }

    #[test]
    fn test_ne_and_nin() {
        assert!(check(doc! { "age": { "$ne": 1 } }));
        assert!(!check(doc! { "tags": { "$ne": "math" } }));
        assert!(check(doc! { "tags": { "$nin": ["music", "sport"] } }));
    }

    #[test]
    fn test_in_with_regex() {
        assert!(check(doc! { "age": { "$in": [1, 36] } }));
        assert!(check(doc! { "name": { "$in": [Bson::RegularExpression(BsonRegex { pattern: "^Ada".into(), options: String::new() })] } }));
    }

    #[test]
    fn test_exists() {
        assert!(check(doc! { "age": { "$exists": true } }));
        assert!(check(doc! { "missing": { "$exists": false } }));
        assert!(check(doc! { "nickname": { "$exists": true } }));
    }

    #[test]
    fn test_logical_operators() {
        assert!(check(doc! { "$or": [ { "age": 1 }, { "name": "Ada Lovelace" } ] }));
        assert!(check(doc! { "$and": [ { "age": 36 }, { "tags": "math" } ] }));
        assert!(check(doc! { "$nor": [ { "age": 1 }, { "name": "x" } ] }));
        assert!(!check(doc! { "$and": [ { "age": 36 }, { "tags": "x" } ] }));
    }

    #[test]
    fn test_not() {
        assert!(check(doc! { "age": { "$not": { "$gt": 40 } } }));
        assert!(!check(doc! { "age": { "$not": { "$gt": 30 } } }));
    }

    #[test]
    fn test_regex() {
        assert!(check(doc! { "name": { "$regex": "lovelace", "$options": "i" } }));
        assert!(!check(doc! { "name": { "$regex": "lovelace" } }));
    }

    #[test]
    fn test_size_all_elem_match() {
        assert!(check(doc! { "tags": { "$size": 2 } }));
        assert!(check(doc! { "tags": { "$all": ["poetry", "math"] } }));
        assert!(check(doc! { "scores": { "$elemMatch": { "subject": "math", "value": { "$gt": 90 } } } }));
        assert!(!check(doc! { "scores": { "$elemMatch": { "subject": "art", "value": { "$gt": 90 } } } }));
    }

    #[test]
    fn test_type_and_mod() {
        assert!(check(doc! { "age": { "$type": "int" } }));
        assert!(check(doc! { "age": { "$type": "number" } }));
        assert!(check(doc! { "name": { "$type": 2 } }));
        assert!(check(doc! { "age": { "$mod": [6, 0] } }));
    }

    #[test]
    fn test_unknown_operator_fails() {
        assert!(matches(&person(), &doc! { "age": { "$near": 1 } }).is_err());
        assert!(matches(&person(), &doc! { "$where": "true" }).is_err());
        assert!(matches(&person(), &doc! { "$or": [] }).is_err());
    }
}
