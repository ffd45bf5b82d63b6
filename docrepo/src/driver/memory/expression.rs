use std::cmp::Ordering;

use bson::{Bson, Document};
use itertools::Itertools;

use crate::driver::memory::compare::{as_f64, as_i64, compare, is_numeric, is_truthy, values_equal};
use crate::driver::memory::store_error;
use crate::errors::RepoResult;

/// Variables visible to an expression: `$$ROOT` plus user `let` bindings.
pub(crate) struct Scope<'a> {
    pub root: &'a Document,
    pub vars: Option<&'a Document>,
}

impl<'a> Scope<'a> {
    pub fn new(root: &'a Document, vars: Option<&'a Document>) -> Scope<'a> {
        Scope { root, vars }
    }
}

/// Evaluates an aggregation expression against the document of `scope`.
///
/// Missing fields evaluate to `Bson::Null`; callers that must tell missing
/// from null use [`field_value`] directly.
pub(crate) fn evaluate(expression: &Bson, scope: &Scope) -> RepoResult<Bson> {
    match expression {
        Bson::String(text) if text.starts_with("$$") => Ok(variable(&text[2..], scope)?.unwrap_or(Bson::Null)),
        Bson::String(text) if text.starts_with('$') => {
            Ok(field_value(scope.root, &text[1..]).unwrap_or(Bson::Null))
        }
        Bson::Array(items) => Ok(Bson::Array(
            items.iter().map(|item| evaluate(item, scope)).collect::<RepoResult<Vec<_>>>()?,
        )),
        Bson::Document(spec) => {
            let operator = spec.keys().next().filter(|k| k.starts_with('$'));
            match operator {
                Some(operator) if spec.len() == 1 => {
                    let argument = spec.get(operator).unwrap_or(&Bson::Null);
                    apply(operator, argument, scope)
                }
                Some(operator) => Err(store_error(&format!(
                    "an expression specification must contain exactly one field, found {} with {}",
                    operator,
                    spec.len()
                ))),
                None => {
                    let mut out = Document::new();
                    for (key, value) in spec {
                        out.insert(key.clone(), evaluate(value, scope)?);
                    }
                    Ok(Bson::Document(out))
                }
            }
        }
        literal => Ok(literal.clone()),
    }
}

/// Value of a dotted field path, mapping over arrays on the way.
pub(crate) fn field_value(doc: &Document, path: &str) -> Option<Bson> {
    let mut parts = path.split('.');
    let first = doc.get(parts.next()?)?.clone();
    let rest: Vec<&str> = parts.collect();
    descend(first, &rest)
}

fn descend(value: Bson, parts: &[&str]) -> Option<Bson> {
    let Some((head, rest)) = parts.split_first() else {
        return Some(value);
    };
    match value {
        Bson::Document(mut doc) => descend(doc.remove(*head)?, rest),
        Bson::Array(items) => Some(Bson::Array(
            items
                .into_iter()
                .filter_map(|item| match item {
                    Bson::Document(_) => descend(item, parts),
                    _ => None,
                })
                .collect(),
        )),
        _ => None,
    }
}

fn variable(name: &str, scope: &Scope) -> RepoResult<Option<Bson>> {
    let (head, path) = match name.split_once('.') {
        Some((head, path)) => (head, Some(path)),
        None => (name, None),
    };
    let value = match head {
        "ROOT" | "CURRENT" => Bson::Document(scope.root.clone()),
        "REMOVE" => return Ok(None),
        other => match scope.vars.and_then(|vars| vars.get(other)) {
            Some(value) => value.clone(),
            None => return Err(store_error(&format!("use of undefined variable: {}", other))),
        },
    };
    match path {
        Some(path) => {
            let rest: Vec<&str> = path.split('.').collect();
            Ok(descend(value, &rest))
        }
        None => Ok(Some(value)),
    }
}

fn arguments(argument: &Bson, scope: &Scope) -> RepoResult<Vec<Bson>> {
    match argument {
        Bson::Array(items) => items.iter().map(|item| evaluate(item, scope)).collect(),
        single => Ok(vec![evaluate(single, scope)?]),
    }
}

fn exactly<const N: usize>(operator: &str, values: Vec<Bson>) -> RepoResult<[Bson; N]> {
    let count = values.len();
    values.try_into().map_err(|_| {
        store_error(&format!(
            "expression {} takes exactly {} arguments, {} were passed in",
            operator, N, count
        ))
    })
}

fn number(operator: &str, value: &Bson) -> RepoResult<Option<f64>> {
    match value {
        Bson::Null | Bson::Undefined => Ok(None),
        other => as_f64(other).map(Some).ok_or_else(|| {
            store_error(&format!("{} only supports numeric types, not {}", operator, other))
        }),
    }
}

// Integer results stay integers as long as every input was one.
fn numeric_result(value: f64, integral: bool) -> Bson {
    if integral && value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        let int = value as i64;
        match i32::try_from(int) {
            Ok(small) => Bson::Int32(small),
            Err(_) => Bson::Int64(int),
        }
    } else {
        Bson::Double(value)
    }
}

fn integral(values: &[Bson]) -> bool {
    values.iter().all(|v| matches!(v, Bson::Int32(_) | Bson::Int64(_)))
}

fn apply(operator: &str, argument: &Bson, scope: &Scope) -> RepoResult<Bson> {
    match operator {
        "$add" | "$multiply" => {
            let values = arguments(argument, scope)?;
            let mut total = if operator == "$add" { 0.0 } else { 1.0 };
            for value in &values {
                match number(operator, value)? {
                    Some(n) if operator == "$add" => total += n,
                    Some(n) => total *= n,
                    None => return Ok(Bson::Null),
                }
            }
            Ok(numeric_result(total, integral(&values)))
        }
        "$subtract" | "$divide" => {
            let [a, b] = exactly::<2>(operator, arguments(argument, scope)?)?;
            let (x, y) = match (number(operator, &a)?, number(operator, &b)?) {
                (Some(x), Some(y)) => (x, y),
                _ => return Ok(Bson::Null),
            };
            match operator {
                "$subtract" => Ok(numeric_result(x - y, integral(&[a, b]))),
                _ if y == 0.0 => Err(store_error("can't divide by zero")),
                _ => Ok(Bson::Double(x / y)),
            }
        }
        "$concat" => {
            let mut out = String::new();
            for value in arguments(argument, scope)? {
                match value {
                    Bson::String(s) => out.push_str(&s),
                    Bson::Null | Bson::Undefined => return Ok(Bson::Null),
                    other => {
                        return Err(store_error(&format!(
                            "$concat only supports strings, not {}",
                            other
                        )))
                    }
                }
            }
            Ok(Bson::String(out))
        }
        "$toLower" | "$toUpper" => {
            let [value] = exactly::<1>(operator, arguments(argument, scope)?)?;
            let text = match value {
                Bson::String(s) => s,
                Bson::Null | Bson::Undefined => String::new(),
                other => other.to_string(),
            };
            Ok(Bson::String(if operator == "$toLower" {
                text.to_lowercase()
            } else {
                text.to_uppercase()
            }))
        }
        "$eq" | "$ne" | "$gt" | "$gte" | "$lt" | "$lte" => {
            let [a, b] = exactly::<2>(operator, arguments(argument, scope)?)?;
            let order = compare(&a, &b);
            Ok(match operator {
                "$eq" => Bson::Boolean(order == Ordering::Equal),
                "$ne" => Bson::Boolean(order != Ordering::Equal),
                "$gt" => Bson::Boolean(order == Ordering::Greater),
                "$gte" => Bson::Boolean(order != Ordering::Less),
                "$lt" => Bson::Boolean(order == Ordering::Less),
                _ => Bson::Boolean(order != Ordering::Greater),
            })
        }
        "$cond" => {
            let (condition, then, otherwise) = match argument {
                Bson::Document(spec) => (
                    spec.get("if").unwrap_or(&Bson::Null),
                    spec.get("then").unwrap_or(&Bson::Null),
                    spec.get("else").unwrap_or(&Bson::Null),
                ),
                Bson::Array(items) if items.len() == 3 => (&items[0], &items[1], &items[2]),
                _ => return Err(store_error("$cond needs if, then and else")),
            };
            if is_truthy(&evaluate(condition, scope)?) {
                evaluate(then, scope)
            } else {
                evaluate(otherwise, scope)
            }
        }
        "$ifNull" => {
            let items = match argument {
                Bson::Array(items) if items.len() >= 2 => items,
                _ => return Err(store_error("$ifNull needs at least two arguments")),
            };
            let (fallback, candidates) = match items.split_last() {
                Some(split) => split,
                None => return Ok(Bson::Null),
            };
            for candidate in candidates {
                let value = evaluate(candidate, scope)?;
                if !matches!(value, Bson::Null | Bson::Undefined) {
                    return Ok(value);
                }
            }
            evaluate(fallback, scope)
        }
        "$size" => {
            let [value] = exactly::<1>(operator, arguments(argument, scope)?)?;
            match value {
                Bson::Array(items) => Ok(Bson::Int32(items.len() as i32)),
                other => Err(store_error(&format!(
                    "the argument to $size must be an array, not {}",
                    other
                ))),
            }
        }
        "$arrayElemAt" => {
            let [array, position] = exactly::<2>(operator, arguments(argument, scope)?)?;
            let (items, position) = match (array, as_i64(&position)) {
                (Bson::Array(items), Some(position)) => (items, position),
                (Bson::Null, _) => return Ok(Bson::Null),
                _ => return Err(store_error("$arrayElemAt needs an array and an integer")),
            };
            let index = if position < 0 {
                items.len() as i64 + position
            } else {
                position
            };
            Ok(usize::try_from(index)
                .ok()
                .and_then(|i| items.get(i).cloned())
                .unwrap_or(Bson::Null))
        }
        "$in" => {
            let [needle, haystack] = exactly::<2>(operator, arguments(argument, scope)?)?;
            match haystack {
                Bson::Array(items) => Ok(Bson::Boolean(items.iter().any(|i| values_equal(i, &needle)))),
                _ => Err(store_error("$in needs an array as its second argument")),
            }
        }
        other => Err(store_error(&format!("unrecognized expression '{}'", other))),
    }
}

/// Reduces numbers the way `$sum`, `$avg`, `$min` and `$max` do.
///
/// Non-numeric values are ignored by `$sum` and `$avg`; `$min` and `$max`
/// ignore nulls and compare everything else in canonical order.
pub(crate) fn reduce(operator: &str, values: &[Bson]) -> Bson {
    match operator {
        "$sum" => {
            let numbers: Vec<&Bson> = values.iter().filter(|v| is_numeric(v)).collect();
            let total: f64 = numbers.iter().filter_map(|v| as_f64(v)).sum();
            let all_integral = numbers.iter().all(|v| matches!(v, Bson::Int32(_) | Bson::Int64(_)));
            numeric_result(total, all_integral)
        }
        "$avg" => {
            let numbers: Vec<f64> = values.iter().filter_map(as_f64).collect();
            if numbers.is_empty() {
                Bson::Null
            } else {
                Bson::Double(numbers.iter().sum::<f64>() / numbers.len() as f64)
            }
        }
        _ => {
            let candidates = values.iter().filter(|v| !matches!(v, Bson::Null | Bson::Undefined));
            let picked = if operator == "$min" {
                candidates.min_by(|a, b| compare(a, b))
            } else {
                candidates.max_by(|a, b| compare(a, b))
            };
            picked.cloned().unwrap_or(Bson::Null)
        }
    }
}

/// Dotted key of a grouping or sort spec rendered for error messages.
pub(crate) fn describe(spec: &Document) -> String {
    spec.iter().map(|(k, v)| format!("{}: {}", k, v)).join(", ")
}
