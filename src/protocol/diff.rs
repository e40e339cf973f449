//! Diff streams.
//!
//! Generator endpoints on the v2+ protocols publish their first output in
//! full and subsequent outputs as diffs against the previous one. A diff is a
//! sequence of `[action, path, value]` triples; [`apply_diff`] folds them into
//! the running snapshot the caller sees as each `data` event payload.

use crate::error::{QueueflowError, Result};
use serde_json::Value;

/// One step of a diff descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffOp {
    pub action: DiffAction,
    pub path: Vec<PathSegment>,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffAction {
    /// Set the node at `path` to `value`
    Replace,
    /// Concatenate `value` onto the node at `path` (string or array)
    Append,
    /// Insert `value` at `path` (array index or new map key)
    Add,
    /// Remove the node at `path`
    Delete,
}

/// A step into a recursive output value.
#[derive(Debug, Clone, PartialEq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// Decode the wire shape of a diff descriptor: a list of
/// `[action, [path...], value]` triples.
pub fn parse_diff(value: &Value) -> Result<Vec<DiffOp>> {
    let entries = value
        .as_array()
        .ok_or_else(|| QueueflowError::Frame("diff descriptor is not a list".to_string()))?;

    entries
        .iter()
        .map(|entry| {
            let triple = entry
                .as_array()
                .filter(|t| t.len() == 3)
                .ok_or_else(|| {
                    QueueflowError::Frame("diff entry is not an [action, path, value] triple".to_string())
                })?;

            let action = match triple[0].as_str() {
                Some("replace") => DiffAction::Replace,
                Some("append") => DiffAction::Append,
                Some("add") => DiffAction::Add,
                Some("delete") => DiffAction::Delete,
                other => {
                    return Err(QueueflowError::Frame(format!(
                        "unknown diff action: {other:?}"
                    )))
                }
            };

            let path = triple[1]
                .as_array()
                .ok_or_else(|| QueueflowError::Frame("diff path is not a list".to_string()))?
                .iter()
                .map(|segment| {
                    if let Some(index) = segment.as_u64() {
                        Ok(PathSegment::Index(index as usize))
                    } else if let Some(key) = segment.as_str() {
                        Ok(PathSegment::Key(key.to_string()))
                    } else {
                        Err(QueueflowError::Frame(format!(
                            "diff path segment is neither index nor key: {segment}"
                        )))
                    }
                })
                .collect::<Result<Vec<_>>>()?;

            Ok(DiffOp {
                action,
                path,
                value: triple[2].clone(),
            })
        })
        .collect()
}

/// Fold a diff into the running snapshot, mutating it in place.
pub fn apply_diff(snapshot: &mut Value, ops: &[DiffOp]) -> Result<()> {
    for op in ops {
        apply_one(snapshot, op)?;
    }
    Ok(())
}

fn apply_one(root: &mut Value, op: &DiffOp) -> Result<()> {
    // Root-level edits have no parent to index into.
    let Some((last, parents)) = op.path.split_last() else {
        return match op.action {
            DiffAction::Replace => {
                *root = op.value.clone();
                Ok(())
            }
            DiffAction::Append => append(root, &op.value),
            _ => Err(QueueflowError::Frame(
                "add/delete require a non-empty path".to_string(),
            )),
        };
    };

    let mut node = root;
    for segment in parents {
        node = descend(node, segment)?;
    }

    match op.action {
        DiffAction::Replace => {
            *descend(node, last)? = op.value.clone();
            Ok(())
        }
        DiffAction::Append => append(descend(node, last)?, &op.value),
        DiffAction::Add => match (node, last) {
            (Value::Array(items), PathSegment::Index(index)) => {
                if *index > items.len() {
                    return Err(QueueflowError::Frame(format!(
                        "diff add index {index} out of bounds"
                    )));
                }
                items.insert(*index, op.value.clone());
                Ok(())
            }
            (Value::Object(map), PathSegment::Key(key)) => {
                map.insert(key.clone(), op.value.clone());
                Ok(())
            }
            _ => Err(QueueflowError::Frame(
                "diff add target is neither array nor map".to_string(),
            )),
        },
        DiffAction::Delete => match (node, last) {
            (Value::Array(items), PathSegment::Index(index)) => {
                if *index >= items.len() {
                    return Err(QueueflowError::Frame(format!(
                        "diff delete index {index} out of bounds"
                    )));
                }
                items.remove(*index);
                Ok(())
            }
            (Value::Object(map), PathSegment::Key(key)) => {
                map.remove(key);
                Ok(())
            }
            _ => Err(QueueflowError::Frame(
                "diff delete target is neither array nor map".to_string(),
            )),
        },
    }
}

fn descend<'a>(node: &'a mut Value, segment: &PathSegment) -> Result<&'a mut Value> {
    match (node, segment) {
        (Value::Array(items), PathSegment::Index(index)) => items.get_mut(*index).ok_or_else(|| {
            QueueflowError::Frame(format!("diff path index {index} out of bounds"))
        }),
        (Value::Object(map), PathSegment::Key(key)) => map
            .get_mut(key)
            .ok_or_else(|| QueueflowError::Frame(format!("diff path key {key:?} not found"))),
        _ => Err(QueueflowError::Frame(
            "diff path does not match value shape".to_string(),
        )),
    }
}

fn append(target: &mut Value, value: &Value) -> Result<()> {
    match (target, value) {
        (Value::String(existing), Value::String(suffix)) => {
            existing.push_str(suffix);
            Ok(())
        }
        (Value::Array(items), Value::Array(tail)) => {
            items.extend(tail.iter().cloned());
            Ok(())
        }
        _ => Err(QueueflowError::Frame(
            "diff append only joins strings or arrays".to_string(),
        )),
    }
}
