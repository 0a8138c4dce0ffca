//! Cache keys derived from operation name and arguments.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Identity of a cached read.
///
/// Structurally equal arguments produce the same key regardless of object
/// field order, and `null` object fields are treated as absent.
#[derive(Debug, Clone)]
pub struct CacheKey {
  operation: String,
  args: Value,
  fingerprint: String,
}

impl CacheKey {
  pub fn new(operation: impl Into<String>, args: &Value) -> Self {
    let operation = operation.into();
    let args = normalize(args);
    let input = format!("{}:{}", operation, args);

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let fingerprint = hex::encode(hasher.finalize());

    Self {
      operation,
      args,
      fingerprint,
    }
  }

  pub fn operation(&self) -> &str {
    &self.operation
  }

  /// Normalized arguments.
  pub fn args(&self) -> &Value {
    &self.args
  }

  pub fn fingerprint(&self) -> &str {
    &self.fingerprint
  }
}

impl PartialEq for CacheKey {
  fn eq(&self, other: &Self) -> bool {
    self.fingerprint == other.fingerprint
  }
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.fingerprint.hash(state);
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}({})", self.operation, self.args)
  }
}

/// Sort object fields and drop `null` ones, recursively. Array positions are
/// meaningful, so array elements are kept even when `null`.
pub(crate) fn normalize(value: &Value) -> Value {
  match value {
    Value::Object(map) => {
      let sorted: BTreeMap<&String, Value> = map
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k, normalize(v)))
        .collect();
      let mut out = Map::new();
      for (k, v) in sorted {
        out.insert(k.clone(), v);
      }
      Value::Object(out)
    }
    Value::Array(items) => Value::Array(items.iter().map(normalize).collect()),
    other => other.clone(),
  }
}
