//! Filter evaluation.
//!
//! Supports field equality on dotted paths, the comparison operators
//! `$eq $ne $gt $gte $lt $lte $in $nin $exists`, and the logical
//! operators `$and $or`. An array field matches an equality condition if
//! any element matches.

use crate::error::{StoreError, StoreResult};
use serde_json::Value;
use std::cmp::Ordering;
use txnframe_protocol::Document;

/// Resolves a dotted path such as `attrs.ip` or `tags.0`.
pub fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Returns true if `doc` satisfies `filter`. An empty filter matches all.
pub fn matches(doc: &Document, filter: &Document) -> StoreResult<bool> {
    for (key, condition) in filter {
        let ok = match key.as_str() {
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
            "$or" => {
                let mut any = false;
                for clause in clauses(key, condition)? {
                    if matches(doc, clause)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            op if op.starts_with('$') => {
                return Err(StoreError::InvalidFilter(format!(
                    "unsupported top-level operator {op}"
                )))
            }
            path => field_matches(lookup(doc, path), condition)?,
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn clauses<'a>(op: &str, value: &'a Value) -> StoreResult<Vec<&'a Document>> {
    let items = value
        .as_array()
        .ok_or_else(|| StoreError::InvalidFilter(format!("{op} expects an array")))?;
    items
        .iter()
        .map(|item| {
            item.as_object()
                .ok_or_else(|| StoreError::InvalidFilter(format!("{op} expects documents")))
        })
        .collect()
}

fn is_operator_doc(value: &Value) -> bool {
    match value {
        Value::Object(map) => map.keys().next().is_some_and(|k| k.starts_with('$')),
        _ => false,
    }
}

fn field_matches(value: Option<&Value>, condition: &Value) -> StoreResult<bool> {
    if !is_operator_doc(condition) {
        return Ok(equals(value, condition));
    }
    let Value::Object(ops) = condition else {
        return Ok(false);
    };
    for (op, arg) in ops {
        if !apply_operator(value, op, arg)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn apply_operator(value: Option<&Value>, op: &str, arg: &Value) -> StoreResult<bool> {
    match op {
        "$eq" => Ok(equals(value, arg)),
        "$ne" => Ok(!equals(value, arg)),
        "$in" => in_list(value, op, arg),
        "$nin" => Ok(!in_list(value, op, arg)?),
        "$exists" => Ok(value.is_some() == arg.as_bool().unwrap_or(true)),
        "$gt" | "$gte" | "$lt" | "$lte" => {
            let Some(ordering) = value.and_then(|v| compare(v, arg)) else {
                return Ok(false);
            };
            Ok(match op {
                "$gt" => ordering == Ordering::Greater,
                "$gte" => ordering != Ordering::Less,
                "$lt" => ordering == Ordering::Less,
                _ => ordering != Ordering::Greater,
            })
        }
        other => Err(StoreError::InvalidFilter(format!(
            "unsupported operator {other}"
        ))),
    }
}

fn in_list(value: Option<&Value>, op: &str, arg: &Value) -> StoreResult<bool> {
    let candidates = arg
        .as_array()
        .ok_or_else(|| StoreError::InvalidFilter(format!("{op} expects an array")))?;
    Ok(candidates.iter().any(|c| equals(value, c)))
}

fn equals(value: Option<&Value>, expected: &Value) -> bool {
    match value {
        None => expected.is_null(),
        Some(Value::Array(items)) if !expected.is_array() => {
            items.iter().any(|item| values_equal(item, expected))
        }
        Some(v) => values_equal(v, expected),
    }
}

pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        },
        _ => a == b,
    }
}

/// Orders two values of the same kind. Mixed kinds are unordered.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Number(_)) => 1,
        Some(Value::String(_)) => 2,
        Some(Value::Object(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Bool(_)) => 5,
    }
}

/// Total order used for sorting: missing and null first, then numbers,
/// strings, documents, arrays and booleans.
pub(crate) fn sort_cmp(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let (ra, rb) = (type_rank(a), type_rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }
    match (a, b) {
        (Some(x), Some(y)) => compare(x, y).unwrap_or(Ordering::Equal),
        _ => Ordering::Equal,
    }
}
