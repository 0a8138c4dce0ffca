//! Reversible edits to cached JSON documents.
//!
//! Every op addresses its target with a JSON pointer (`""` is the whole
//! document). Applying an op yields the ops that undo it, computed from the
//! values it actually displaced; an op whose target is missing changes
//! nothing and yields no inverse.

use serde_json::{Map, Number, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum PatchOp {
  /// Set fields on the object at `path`.
  Merge {
    path: String,
    fields: Map<String, Value>,
  },
  /// Remove fields from the object at `path`.
  Unset { path: String, fields: Vec<String> },
  /// Replace the value at `path`.
  Replace { path: String, value: Value },
  /// Insert into the array at `path`.
  Insert {
    path: String,
    index: usize,
    value: Value,
  },
  /// Remove from the array at `path`.
  Remove { path: String, index: usize },
  /// Add `delta` to the number at `path`.
  Increment { path: String, delta: i64 },
}

impl PatchOp {
  /// Apply to `doc`, returning the ops that restore it.
  pub fn apply(&self, doc: &mut Value) -> Vec<PatchOp> {
    match self {
      PatchOp::Merge { path, fields } => {
        let Some(target) = doc.pointer_mut(path).and_then(Value::as_object_mut) else {
          return Vec::new();
        };
        let mut restore = Map::new();
        let mut added = Vec::new();
        for (name, value) in fields {
          match target.insert(name.clone(), value.clone()) {
            Some(previous) => {
              restore.insert(name.clone(), previous);
            }
            None => added.push(name.clone()),
          }
        }
        let mut inverse = Vec::new();
        if !added.is_empty() {
          inverse.push(PatchOp::Unset {
            path: path.clone(),
            fields: added,
          });
        }
        if !restore.is_empty() {
          inverse.push(PatchOp::Merge {
            path: path.clone(),
            fields: restore,
          });
        }
        inverse
      }
      PatchOp::Unset { path, fields } => {
        let Some(target) = doc.pointer_mut(path).and_then(Value::as_object_mut) else {
          return Vec::new();
        };
        let removed: Map<String, Value> = fields
          .iter()
          .filter_map(|name| target.remove(name).map(|v| (name.clone(), v)))
          .collect();
        if removed.is_empty() {
          return Vec::new();
        }
        vec![PatchOp::Merge {
          path: path.clone(),
          fields: removed,
        }]
      }
      PatchOp::Replace { path, value } => {
        let Some(slot) = doc.pointer_mut(path) else {
          return Vec::new();
        };
        let previous = std::mem::replace(slot, value.clone());
        vec![PatchOp::Replace {
          path: path.clone(),
          value: previous,
        }]
      }
      PatchOp::Insert { path, index, value } => {
        let Some(items) = doc.pointer_mut(path).and_then(Value::as_array_mut) else {
          return Vec::new();
        };
        if *index > items.len() {
          return Vec::new();
        }
        items.insert(*index, value.clone());
        vec![PatchOp::Remove {
          path: path.clone(),
          index: *index,
        }]
      }
      PatchOp::Remove { path, index } => {
        let Some(items) = doc.pointer_mut(path).and_then(Value::as_array_mut) else {
          return Vec::new();
        };
        if *index >= items.len() {
          return Vec::new();
        }
        let removed = items.remove(*index);
        vec![PatchOp::Insert {
          path: path.clone(),
          index: *index,
          value: removed,
        }]
      }
      PatchOp::Increment { path, delta } => {
        let Some(slot) = doc.pointer_mut(path) else {
          return Vec::new();
        };
        let next = if let Some(n) = slot.as_i64() {
          Value::from(n + delta)
        } else if let Some(n) = slot.as_f64() {
          match Number::from_f64(n + *delta as f64) {
            Some(number) => Value::Number(number),
            None => return Vec::new(),
          }
        } else {
          return Vec::new();
        };
        *slot = next;
        vec![PatchOp::Increment {
          path: path.clone(),
          delta: -delta,
        }]
      }
    }
  }
}

/// Apply `ops` in order and return the ops that undo all of them, already in
/// the order they must be applied.
pub fn apply(ops: &[PatchOp], doc: &mut Value) -> Vec<PatchOp> {
  let mut inverse = Vec::new();
  for op in ops {
    let mut undo = op.apply(doc);
    undo.append(&mut inverse);
    inverse = undo;
  }
  inverse
}

/// Pointer to the record with `id` in a cached document.
///
/// Understands list payloads (`{"data": [...]}` or a bare array) and single
/// records; ids compare equal across numbers and strings (`5` and `"5"`).
pub fn locate_record(doc: &Value, id: &Value) -> Option<String> {
  if let Some((path, rows)) = list_rows(doc) {
    if let Some((index, _)) = find_row(rows, id) {
      return Some(format!("{}/{}", path, index));
    }
  }
  match doc.get("id") {
    Some(own) if ids_match(own, id) => Some(String::new()),
    _ => None,
  }
}

/// Ops merging `fields` into every occurrence of record `id` in `doc`.
pub fn merge_record(doc: &Value, id: &Value, fields: &Map<String, Value>) -> Vec<PatchOp> {
  if fields.is_empty() {
    return Vec::new();
  }
  match locate_record(doc, id) {
    Some(path) => vec![PatchOp::Merge {
      path,
      fields: fields.clone(),
    }],
    None => Vec::new(),
  }
}

/// Ops removing record `id` from a list payload, decrementing its `total`.
pub fn remove_record(doc: &Value, id: &Value) -> Vec<PatchOp> {
  let Some((path, rows)) = list_rows(doc) else {
    return Vec::new();
  };
  let Some((index, _)) = find_row(rows, id) else {
    return Vec::new();
  };
  let mut ops = vec![PatchOp::Remove { path, index }];
  if doc.get("total").map(Value::is_number).unwrap_or(false) {
    ops.push(PatchOp::Increment {
      path: "/total".to_string(),
      delta: -1,
    });
  }
  ops
}

fn list_rows(doc: &Value) -> Option<(String, &Vec<Value>)> {
  match doc {
    Value::Array(rows) => Some((String::new(), rows)),
    Value::Object(map) => map
      .get("data")
      .and_then(Value::as_array)
      .map(|rows| ("/data".to_string(), rows)),
    _ => None,
  }
}

fn find_row<'a>(rows: &'a [Value], id: &Value) -> Option<(usize, &'a Value)> {
  rows
    .iter()
    .enumerate()
    .find(|(_, row)| row.get("id").map(|own| ids_match(own, id)).unwrap_or(false))
}

pub(crate) fn ids_match(a: &Value, b: &Value) -> bool {
  match (a, b) {
    (Value::String(x), Value::Number(y)) | (Value::Number(y), Value::String(x)) => {
      *x == y.to_string()
    }
    _ => a == b,
  }
}
