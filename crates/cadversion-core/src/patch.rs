//! Patch engine: ordered, atomic application of patch operations.
//!
//! The policy is strict where RFC 6902 is lenient:
//!
//! - `add` never overwrites. Adding a map member that already exists, or
//!   adding beneath a scalar, is a [`PatchError::PathConflict`].
//! - `replace` and `remove` require the target to exist
//!   ([`PatchError::PathNotFound`] otherwise).
//! - A changeset applies completely or not at all. The input document is
//!   never modified.

use serde::{Deserialize, Serialize};

use crate::error::PatchError;
use crate::pointer::Pointer;
use crate::value::{Document, Value};

/// One step of a changeset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PatchOp {
    /// Insert a new value. Array targets shift later elements right.
    Add { path: Pointer, value: Value },
    /// Overwrite an existing value.
    Replace { path: Pointer, value: Value },
    /// Delete an existing value.
    Remove { path: Pointer },
    /// Remove the value at `from` and add it at `path`.
    Move { from: Pointer, path: Pointer },
    /// Assert that the value at `path` equals `value`.
    Test { path: Pointer, value: Value },
}

impl PatchOp {
    pub fn add(path: Pointer, value: impl Into<Value>) -> Self {
        PatchOp::Add {
            path,
            value: value.into(),
        }
    }

    pub fn replace(path: Pointer, value: impl Into<Value>) -> Self {
        PatchOp::Replace {
            path,
            value: value.into(),
        }
    }

    pub fn remove(path: Pointer) -> Self {
        PatchOp::Remove { path }
    }

    pub fn move_to(from: Pointer, path: Pointer) -> Self {
        PatchOp::Move { from, path }
    }

    pub fn test(path: Pointer, value: impl Into<Value>) -> Self {
        PatchOp::Test {
            path,
            value: value.into(),
        }
    }

    /// The operation name as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            PatchOp::Add { .. } => "add",
            PatchOp::Replace { .. } => "replace",
            PatchOp::Remove { .. } => "remove",
            PatchOp::Move { .. } => "move",
            PatchOp::Test { .. } => "test",
        }
    }

    /// The target path.
    pub fn path(&self) -> &Pointer {
        match self {
            PatchOp::Add { path, .. }
            | PatchOp::Replace { path, .. }
            | PatchOp::Remove { path }
            | PatchOp::Move { path, .. }
            | PatchOp::Test { path, .. } => path,
        }
    }
}

/// Apply `ops` in order to a copy of `state`.
///
/// On error `state` is unchanged and no partial result is returned.
pub fn apply(state: &Document, ops: &[PatchOp]) -> Result<Document, PatchError> {
    apply_owned(state.clone(), ops)
}

/// Apply `ops` in order, consuming `state`.
///
/// Used by replay, where the intermediate state is never needed again.
pub fn apply_owned(mut state: Document, ops: &[PatchOp]) -> Result<Document, PatchError> {
    for op in ops {
        apply_op(&mut state, op)?;
    }
    Ok(state)
}

fn apply_op(doc: &mut Value, op: &PatchOp) -> Result<(), PatchError> {
    match op {
        PatchOp::Add { path, value } => add(doc, path, value.clone()),
        PatchOp::Replace { path, value } => replace(doc, path, value.clone()),
        PatchOp::Remove { path } => remove(doc, path).map(|_| ()),
        PatchOp::Move { from, path } => {
            if from == path {
                return resolve(doc, from.tokens())
                    .map(|_| ())
                    .ok_or_else(|| PatchError::not_found(from));
            }
            if path.is_descendant_of(from) {
                return Err(PatchError::invalid(
                    path,
                    format!("cannot move {} into its own descendant", from),
                ));
            }
            let value = remove(doc, from)?;
            add(doc, path, value)
        }
        PatchOp::Test { path, value } => {
            let current = resolve(doc, path.tokens()).ok_or_else(|| PatchError::not_found(path))?;
            if current == value {
                Ok(())
            } else {
                Err(PatchError::TestFailed {
                    path: path.to_string(),
                })
            }
        }
    }
}

fn add(doc: &mut Value, path: &Pointer, value: Value) -> Result<(), PatchError> {
    let Some((parent_tokens, last)) = path.split_last() else {
        if doc.is_null() {
            *doc = value;
            return Ok(());
        }
        return Err(PatchError::conflict(path, "document root already exists"));
    };

    let parent = resolve_mut(doc, parent_tokens).ok_or_else(|| PatchError::not_found(path))?;
    match parent {
        Value::Map(map) => {
            if map.contains_key(last) {
                return Err(PatchError::conflict(path, "member already exists"));
            }
            map.insert(last.to_string(), value);
            Ok(())
        }
        Value::Array(items) => {
            let index = if last == "-" {
                items.len()
            } else {
                parse_index(path, last)?
            };
            if index > items.len() {
                return Err(PatchError::not_found(path));
            }
            items.insert(index, value);
            Ok(())
        }
        other => Err(PatchError::conflict(
            path,
            format!("parent is a {}, not a container", other.type_name()),
        )),
    }
}

fn replace(doc: &mut Value, path: &Pointer, value: Value) -> Result<(), PatchError> {
    let target = resolve_mut(doc, path.tokens()).ok_or_else(|| PatchError::not_found(path))?;
    *target = value;
    Ok(())
}

fn remove(doc: &mut Value, path: &Pointer) -> Result<Value, PatchError> {
    let Some((parent_tokens, last)) = path.split_last() else {
        return Err(PatchError::invalid(path, "cannot remove the document root"));
    };

    let parent = resolve_mut(doc, parent_tokens).ok_or_else(|| PatchError::not_found(path))?;
    match parent {
        Value::Map(map) => map.remove(last).ok_or_else(|| PatchError::not_found(path)),
        Value::Array(items) => {
            let index = parse_index(path, last)?;
            if index >= items.len() {
                return Err(PatchError::not_found(path));
            }
            Ok(items.remove(index))
        }
        _ => Err(PatchError::not_found(path)),
    }
}

/// Parse an array index token: decimal digits without leading zeros.
fn parse_index(path: &Pointer, token: &str) -> Result<usize, PatchError> {
    let well_formed = !token.is_empty()
        && token.bytes().all(|b| b.is_ascii_digit())
        && (token == "0" || !token.starts_with('0'));
    if !well_formed {
        return Err(PatchError::invalid(
            path,
            format!("{:?} is not an array index", token),
        ));
    }
    token
        .parse()
        .map_err(|_| PatchError::invalid(path, "array index out of range"))
}

fn array_index(token: &str, len: usize) -> Option<usize> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if token.len() > 1 && token.starts_with('0') {
        return None;
    }
    token.parse().ok().filter(|&i| i < len)
}

pub(crate) fn resolve<'a>(doc: &'a Value, tokens: &[String]) -> Option<&'a Value> {
    tokens.iter().try_fold(doc, |current, token| match current {
        Value::Map(map) => map.get(token),
        Value::Array(items) => array_index(token, items.len()).map(|i| &items[i]),
        _ => None,
    })
}

fn resolve_mut<'a>(doc: &'a mut Value, tokens: &[String]) -> Option<&'a mut Value> {
    tokens.iter().try_fold(doc, |current, token| match current {
        Value::Map(map) => map.get_mut(token),
        Value::Array(items) => {
            let len = items.len();
            array_index(token, len).map(move |i| &mut items[i])
        }
        _ => None,
    })
}
