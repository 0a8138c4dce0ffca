//! Error types surfaced by the data layer.

use serde_json::Value;

/// Errors returned by reads and writes.
///
/// The type is `Clone` because a failed background read is stored on its
/// cache entry and handed to every subscriber of that entry.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApiError {
  /// No response was received (offline, DNS failure, timeout).
  #[error("network error: {0}")]
  Network(String),
  /// The server rejected the credential (HTTP 401).
  #[error("unauthorized: {message}")]
  Unauthorized { message: String },
  /// Any other non-success response, usually a validation failure.
  #[error("request failed with status {status}: {message}")]
  Http {
    status: u16,
    message: String,
    body: Value,
  },
  /// The request could not be built locally (bad URL or header); it was
  /// never sent and retrying will not help.
  #[error("invalid request: {0}")]
  InvalidRequest(String),
  #[error("failed to decode response: {0}")]
  Decode(String),
  #[error("invalid arguments for {operation}: {reason}")]
  InvalidArguments { operation: String, reason: String },
  #[error("unknown operation: {0}")]
  UnknownOperation(String),
}

impl ApiError {
  /// Build the error for a non-success HTTP response.
  pub fn from_response(status: u16, body: Value) -> Self {
    let message = extract_message(&body).unwrap_or_else(|| format!("HTTP {}", status));
    if status == 401 {
      ApiError::Unauthorized { message }
    } else {
      ApiError::Http {
        status,
        message,
        body,
      }
    }
  }

  pub fn is_network(&self) -> bool {
    matches!(self, ApiError::Network(_))
  }

  pub fn is_unauthorized(&self) -> bool {
    matches!(self, ApiError::Unauthorized { .. })
  }

  /// HTTP status, when the error came from a response.
  pub fn status(&self) -> Option<u16> {
    match self {
      ApiError::Unauthorized { .. } => Some(401),
      ApiError::Http { status, .. } => Some(*status),
      _ => None,
    }
  }

  /// Structured payload the server sent with the error, if any.
  pub fn body(&self) -> Option<&Value> {
    match self {
      ApiError::Http { body, .. } => Some(body),
      _ => None,
    }
  }
}

/// Servers answer with `{"message": ...}` or `{"error": ...}`; plain strings
/// are used as-is.
fn extract_message(body: &Value) -> Option<String> {
  match body {
    Value::String(s) if !s.is_empty() => Some(s.clone()),
    Value::Object(map) => ["message", "error", "detail"]
      .iter()
      .find_map(|field| map.get(*field))
      .map(|v| match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
      }),
    _ => None,
  }
}
