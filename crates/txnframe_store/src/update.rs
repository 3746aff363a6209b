//! Update document application.
//!
//! Operator updates use `$set`, `$unset` and `$inc`. A document without
//! operator keys is applied as `$set`, leaving other fields untouched.

use crate::error::{StoreError, StoreResult};
use serde_json::Value;
use txnframe_protocol::{Document, ID_FIELD};

/// Applies `update` to `doc` in place. Returns whether anything changed.
///
/// On error `doc` may be partially updated; callers apply updates to a
/// copy.
pub fn apply_update(doc: &mut Document, update: &Document) -> StoreResult<bool> {
    let operators = update.keys().filter(|k| k.starts_with('$')).count();
    if operators == 0 {
        return set_fields(doc, update);
    }
    if operators != update.len() {
        return Err(StoreError::InvalidUpdate(
            "cannot mix update operators and plain fields".into(),
        ));
    }

    let mut changed = false;
    for (op, arg) in update {
        let fields = arg
            .as_object()
            .ok_or_else(|| StoreError::InvalidUpdate(format!("{op} expects a document")))?;
        match op.as_str() {
            "$set" => changed |= set_fields(doc, fields)?,
            "$unset" => {
                for path in fields.keys() {
                    reject_id(path)?;
                    changed |= remove_path(doc, path).is_some();
                }
            }
            "$inc" => {
                for (path, delta) in fields {
                    reject_id(path)?;
                    changed |= increment(doc, path, delta)?;
                }
            }
            other => {
                return Err(StoreError::InvalidUpdate(format!(
                    "unsupported operator {other}"
                )))
            }
        }
    }
    Ok(changed)
}

fn reject_id(path: &str) -> StoreResult<()> {
    if path == ID_FIELD {
        return Err(StoreError::ImmutableId);
    }
    Ok(())
}

fn set_fields(doc: &mut Document, fields: &Document) -> StoreResult<bool> {
    let mut changed = false;
    for (path, value) in fields {
        if path == ID_FIELD {
            if doc.get(ID_FIELD) != Some(value) {
                return Err(StoreError::ImmutableId);
            }
            continue;
        }
        changed |= set_path(doc, path, value.clone())?;
    }
    Ok(changed)
}

fn set_path(doc: &mut Document, path: &str, value: Value) -> StoreResult<bool> {
    let (parents, last) = match path.rsplit_once('.') {
        Some((parents, last)) => (Some(parents), last),
        None => (None, path),
    };
    let mut current = doc;
    if let Some(parents) = parents {
        for part in parents.split('.') {
            let entry = current
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Document::new()));
            current = match entry {
                Value::Object(map) => map,
                _ => {
                    return Err(StoreError::InvalidUpdate(format!(
                        "cannot set {path}: {part} is not a document"
                    )))
                }
            };
        }
    }
    if current.get(last) == Some(&value) {
        return Ok(false);
    }
    current.insert(last.to_string(), value);
    Ok(true)
}

fn remove_path(doc: &mut Document, path: &str) -> Option<Value> {
    let (parents, last) = match path.rsplit_once('.') {
        Some((parents, last)) => (Some(parents), last),
        None => (None, path),
    };
    let mut current = doc;
    if let Some(parents) = parents {
        for part in parents.split('.') {
            current = current.get_mut(part)?.as_object_mut()?;
        }
    }
    current.remove(last)
}

fn increment(doc: &mut Document, path: &str, delta: &Value) -> StoreResult<bool> {
    if !delta.is_number() {
        return Err(StoreError::InvalidUpdate(format!(
            "$inc on {path} expects a number"
        )));
    }
    let next = match crate::filter::lookup(doc, path) {
        None | Some(Value::Null) => delta.clone(),
        Some(Value::Number(current)) => {
            match (current.as_i64(), delta.as_i64()) {
                (Some(a), Some(b)) => a
                    .checked_add(b)
                    .map(Value::from)
                    .ok_or_else(|| StoreError::InvalidUpdate(format!("$inc on {path} overflows")))?,
                _ => {
                    let sum = current.as_f64().unwrap_or(0.0) + delta.as_f64().unwrap_or(0.0);
                    serde_json::Number::from_f64(sum)
                        .map(Value::Number)
                        .ok_or_else(|| StoreError::InvalidUpdate(format!("$inc on {path} is not finite")))?
                }
            }
        }
        Some(_) => {
            return Err(StoreError::InvalidUpdate(format!(
                "$inc on {path}: field is not a number"
            )))
        }
    };
    set_path(doc, path, next)
}
