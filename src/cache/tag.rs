use std::fmt;

/// Label attached to cached data for coarse-grained invalidation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag {
  kind: String,
  id: Option<String>,
}

impl Tag {
  /// A tag covering every entity of `kind`.
  pub fn kind(kind: impl Into<String>) -> Self {
    Self {
      kind: kind.into(),
      id: None,
    }
  }

  pub fn with_id(kind: impl Into<String>, id: impl fmt::Display) -> Self {
    Self {
      kind: kind.into(),
      id: Some(id.to_string()),
    }
  }

  /// The tag provided by list reads of `kind`.
  pub fn list(kind: impl Into<String>) -> Self {
    Self::with_id(kind, "LIST")
  }

  pub fn kind_name(&self) -> &str {
    &self.kind
  }

  pub fn id(&self) -> Option<&str> {
    self.id.as_deref()
  }

  /// Whether invalidating `self` affects an entry that provided `provided`.
  /// A tag without id covers every id of its kind.
  pub fn matches(&self, provided: &Tag) -> bool {
    self.kind == provided.kind && (self.id.is_none() || self.id == provided.id)
  }
}

impl fmt::Display for Tag {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.id {
      Some(id) => write!(f, "{}:{}", self.kind, id),
      None => f.write_str(&self.kind),
    }
  }
}
