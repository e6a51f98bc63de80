//! Canonical CBOR encoding for deterministic serialization.
//!
//! This module implements RFC 8949 Core Deterministic Encoding for [`Value`]:
//! - Map keys sorted by encoded byte comparison
//! - Integers use smallest valid encoding
//! - Definite lengths only
//! - Floats always use the 64-bit form
//!
//! The canonical encoding is what node ids are computed over and what
//! changesets are persisted as, so equal inputs must give identical bytes on
//! every platform.

use ciborium::value::Value as Cbor;
use std::collections::BTreeMap;

use crate::error::CoreError;
use crate::patch::PatchOp;
use crate::pointer::Pointer;
use crate::value::Value;

/// Encode a value to canonical CBOR bytes.
pub fn canonical_value_bytes(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_value_to(&mut buf, value);
    buf
}

/// Decode CBOR bytes into a value.
///
/// Accepts any well-formed CBOR whose maps have text keys; trailing bytes
/// are rejected.
pub fn decode_value(bytes: &[u8]) -> Result<Value, CoreError> {
    let mut cursor = std::io::Cursor::new(bytes);
    let cbor: Cbor =
        ciborium::from_reader(&mut cursor).map_err(|e| CoreError::DecodingError(e.to_string()))?;
    if cursor.position() as usize != bytes.len() {
        return Err(CoreError::DecodingError("trailing bytes after value".into()));
    }
    from_cbor(cbor)
}

/// Encode a changeset to its persisted form.
///
/// Each op is a map `{"op", "path", "value"?, "from"?}`, the same shape as
/// the JSON wire format.
pub fn encode_changeset(ops: &[PatchOp]) -> Vec<u8> {
    let array = Value::Array(ops.iter().map(op_to_value).collect());
    canonical_value_bytes(&array)
}

/// Decode a persisted changeset.
pub fn decode_changeset(bytes: &[u8]) -> Result<Vec<PatchOp>, CoreError> {
    match decode_value(bytes)? {
        Value::Array(items) => items.into_iter().map(value_to_op).collect(),
        other => Err(CoreError::MalformedChangeset(format!(
            "expected array, got {}",
            other.type_name()
        ))),
    }
}

fn op_to_value(op: &PatchOp) -> Value {
    let mut map = BTreeMap::new();
    map.insert("op".to_string(), Value::from(op.name()));
    map.insert("path".to_string(), Value::Text(op.path().to_string()));
    match op {
        PatchOp::Add { value, .. } | PatchOp::Replace { value, .. } | PatchOp::Test { value, .. } => {
            map.insert("value".to_string(), value.clone());
        }
        PatchOp::Move { from, .. } => {
            map.insert("from".to_string(), Value::Text(from.to_string()));
        }
        PatchOp::Remove { .. } => {}
    }
    Value::Map(map)
}

fn value_to_op(value: Value) -> Result<PatchOp, CoreError> {
    let Value::Map(mut map) = value else {
        return Err(CoreError::MalformedChangeset("op is not a map".into()));
    };

    let mut pointer_field = |key: &str| -> Result<Pointer, CoreError> {
        match map.remove(key) {
            Some(Value::Text(s)) => Ok(Pointer::parse(&s)?),
            _ => Err(CoreError::MalformedChangeset(format!("missing {key}"))),
        }
    };
    let path = pointer_field("path")?;
    let from = pointer_field("from");

    let op = match map.remove("op") {
        Some(Value::Text(s)) => s,
        _ => return Err(CoreError::MalformedChangeset("missing op".into())),
    };
    let mut take_value = || {
        map.remove("value")
            .ok_or_else(|| CoreError::MalformedChangeset(format!("{op} requires value")))
    };

    match op.as_str() {
        "add" => Ok(PatchOp::Add {
            path,
            value: take_value()?,
        }),
        "replace" => Ok(PatchOp::Replace {
            path,
            value: take_value()?,
        }),
        "test" => Ok(PatchOp::Test {
            path,
            value: take_value()?,
        }),
        "remove" => Ok(PatchOp::Remove { path }),
        "move" => Ok(PatchOp::Move { from: from?, path }),
        other => Err(CoreError::MalformedChangeset(format!("unknown op {other:?}"))),
    }
}

fn from_cbor(cbor: Cbor) -> Result<Value, CoreError> {
    Ok(match cbor {
        Cbor::Null => Value::Null,
        Cbor::Bool(b) => Value::Bool(b),
        Cbor::Integer(i) => {
            let n: i128 = i.into();
            Value::Integer(
                i64::try_from(n)
                    .map_err(|_| CoreError::UnsupportedValue(format!("integer {n} out of range")))?,
            )
        }
        Cbor::Float(f) => Value::Float(f),
        Cbor::Text(s) => Value::Text(s),
        Cbor::Bytes(b) => Value::Bytes(b),
        Cbor::Array(items) => Value::Array(
            items
                .into_iter()
                .map(from_cbor)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Cbor::Map(entries) => {
            let mut map = BTreeMap::new();
            for (k, v) in entries {
                let key = match k {
                    Cbor::Text(s) => s,
                    _ => return Err(CoreError::UnsupportedValue("non-text map key".into())),
                };
                map.insert(key, from_cbor(v)?);
            }
            Value::Map(map)
        }
        Cbor::Tag(tag, _) => {
            return Err(CoreError::UnsupportedValue(format!("CBOR tag {tag}")));
        }
        _ => return Err(CoreError::UnsupportedValue("unknown CBOR item".into())),
    })
}

/// Recursively encode a value.
fn encode_value_to(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Null => buf.push(0xf6),
        Value::Bool(b) => buf.push(if *b { 0xf5 } else { 0xf4 }),
        Value::Integer(i) => encode_integer(buf, *i),
        Value::Float(f) => {
            buf.push(0xfb);
            buf.extend_from_slice(&f.to_bits().to_be_bytes());
        }
        Value::Text(s) => encode_text(buf, s),
        Value::Bytes(b) => {
            encode_uint(buf, 2, b.len() as u64);
            buf.extend_from_slice(b);
        }
        Value::Array(items) => {
            encode_uint(buf, 4, items.len() as u64);
            for item in items {
                encode_value_to(buf, item);
            }
        }
        Value::Map(map) => encode_map_canonical(buf, map),
    }
}

/// Encode a CBOR integer (major types 0 and 1).
fn encode_integer(buf: &mut Vec<u8>, n: i64) {
    if n >= 0 {
        encode_uint(buf, 0, n as u64);
    } else {
        // CBOR encodes -1 as 0, -2 as 1, etc.
        encode_uint(buf, 1, (-1 - n) as u64);
    }
}

/// Encode an unsigned integer with the given major type.
fn encode_uint(buf: &mut Vec<u8>, major: u8, n: u64) {
    let mt = major << 5;
    if n < 24 {
        buf.push(mt | (n as u8));
    } else if n <= 0xff {
        buf.push(mt | 24);
        buf.push(n as u8);
    } else if n <= 0xffff {
        buf.push(mt | 25);
        buf.extend_from_slice(&(n as u16).to_be_bytes());
    } else if n <= 0xffff_ffff {
        buf.push(mt | 26);
        buf.extend_from_slice(&(n as u32).to_be_bytes());
    } else {
        buf.push(mt | 27);
        buf.extend_from_slice(&n.to_be_bytes());
    }
}

/// Encode a text string (major type 3).
fn encode_text(buf: &mut Vec<u8>, s: &str) {
    encode_uint(buf, 3, s.len() as u64);
    buf.extend_from_slice(s.as_bytes());
}

/// Encode a map canonically (major type 5).
///
/// Keys are sorted by their encoded byte comparison, which for text keys
/// means shorter keys first, then bytewise.
fn encode_map_canonical(buf: &mut Vec<u8>, map: &BTreeMap<String, Value>) {
    let mut pairs: Vec<(Vec<u8>, &Value)> = map
        .iter()
        .map(|(k, v)| {
            let mut key_buf = Vec::new();
            encode_text(&mut key_buf, k);
            (key_buf, v)
        })
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    encode_uint(buf, 5, pairs.len() as u64);
    for (key_bytes, value) in pairs {
        buf.extend_from_slice(&key_bytes);
        encode_value_to(buf, value);
    }
}
