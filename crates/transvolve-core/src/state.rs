//! Path addressing into component state.
//!
//! Paths use dots for keys and either brackets or bare digits for array
//! indices: `user.handle`, `items[2].name` and `items.2.name` are all valid.
//! State is a [`serde_json::Value`]; copying a value clones its whole tree,
//! so callers never share structure with a component. Only data survives
//! the trip through `Value`: anything that does not serialize is rejected.

use serde_json::{Map, Value};

use crate::error::{CoreError, CoreResult};

/// One step of a parsed state path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// An object key.
    Key(String),
    /// An array index, or an all-digit object key.
    Index(usize),
}

fn invalid(path: &str, reason: &str) -> CoreError {
    CoreError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

fn push_key(segments: &mut Vec<Segment>, key: &str, path: &str) -> CoreResult<()> {
    if key.is_empty() {
        return Err(invalid(path, "empty segment"));
    }
    if key.bytes().all(|b| b.is_ascii_digit()) {
        let index = key
            .parse()
            .map_err(|_| invalid(path, "index out of range"))?;
        segments.push(Segment::Index(index));
    } else {
        segments.push(Segment::Key(key.to_string()));
    }
    Ok(())
}

/// Parse a path. The empty path addresses the whole state.
pub fn parse_path(path: &str) -> CoreResult<Vec<Segment>> {
    let mut segments = Vec::new();
    if path.is_empty() {
        return Ok(segments);
    }

    let mut key = String::new();
    let mut chars = path.chars().peekable();
    // Set right after `]`: the next char must start a new segment.
    let mut closed = false;

    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if closed {
                    closed = false;
                } else {
                    push_key(&mut segments, &key, path)?;
                    key.clear();
                }
                if chars.peek().is_none() {
                    return Err(invalid(path, "trailing dot"));
                }
            }
            '[' => {
                if !closed {
                    if !key.is_empty() {
                        push_key(&mut segments, &key, path)?;
                        key.clear();
                    } else if !segments.is_empty() {
                        return Err(invalid(path, "empty segment"));
                    }
                }
                let mut digits = String::new();
                loop {
                    match chars.next() {
                        Some(']') => break,
                        Some(d) if d.is_ascii_digit() => digits.push(d),
                        Some(_) => return Err(invalid(path, "non-numeric index")),
                        None => return Err(invalid(path, "unclosed bracket")),
                    }
                }
                if digits.is_empty() {
                    return Err(invalid(path, "empty index"));
                }
                let index = digits
                    .parse()
                    .map_err(|_| invalid(path, "index out of range"))?;
                segments.push(Segment::Index(index));
                closed = true;
            }
            ']' => return Err(invalid(path, "unexpected ']'")),
            other => {
                if closed {
                    return Err(invalid(path, "expected '.' or '[' after ']'"));
                }
                key.push(other);
            }
        }
    }

    if !closed {
        push_key(&mut segments, &key, path)?;
    }
    Ok(segments)
}

/// Look up the value at `segments`, if present.
pub fn get_path<'v>(value: &'v Value, segments: &[Segment]) -> Option<&'v Value> {
    segments
        .iter()
        .try_fold(value, |current, segment| match (current, segment) {
            (Value::Object(map), Segment::Key(key)) => map.get(key),
            (Value::Object(map), Segment::Index(index)) => map.get(&index.to_string()),
            (Value::Array(items), Segment::Index(index)) => items.get(*index),
            _ => None,
        })
}

/// Store `new_value` at `segments`, creating intermediate containers.
///
/// A missing or scalar intermediate becomes an array when the next segment
/// is an index and an object otherwise. Arrays grow with nulls to reach the
/// addressed index.
pub fn set_path(value: &mut Value, segments: &[Segment], new_value: Value) {
    let Some((segment, rest)) = segments.split_first() else {
        *value = new_value;
        return;
    };

    match segment {
        Segment::Index(index) => {
            if let Value::Object(map) = value {
                let slot = map.entry(index.to_string()).or_insert(Value::Null);
                set_path(slot, rest, new_value);
                return;
            }
            if !value.is_array() {
                *value = Value::Array(Vec::new());
            }
            if let Value::Array(items) = value {
                if items.len() <= *index {
                    items.resize(index + 1, Value::Null);
                }
                set_path(&mut items[*index], rest, new_value);
            }
        }
        Segment::Key(key) => {
            if !value.is_object() {
                *value = Value::Object(Map::new());
            }
            if let Value::Object(map) = value {
                let slot = map.entry(key.clone()).or_insert(Value::Null);
                set_path(slot, rest, new_value);
            }
        }
    }
}
