//! Requests for the authentication endpoints.
//!
//! These bypass the cache: their responses feed the session store.

use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::error::ApiError;
use crate::http::RequestDescriptor;
use crate::session::Identity;

pub const LOGIN_PATH: &str = "/auth/login";
pub const REGISTER_PATH: &str = "/auth/register";
pub const PROFILE_PATH: &str = "/auth/me";

pub fn login_request(email: &str, password: &str) -> RequestDescriptor {
  RequestDescriptor::post(LOGIN_PATH).body(json!({
    "email": email,
    "password": password,
  }))
}

pub fn register_request(fields: Map<String, Value>) -> RequestDescriptor {
  RequestDescriptor::post(REGISTER_PATH).body(Value::Object(fields))
}

pub fn profile_request() -> RequestDescriptor {
  RequestDescriptor::get(PROFILE_PATH)
}

/// Body of a successful login or registration.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
  pub user: Identity,
  pub token: String,
}

impl AuthResponse {
  pub fn parse(body: Value) -> Result<Self, ApiError> {
    let response: AuthResponse =
      serde_json::from_value(body).map_err(|e| ApiError::Decode(e.to_string()))?;
    if response.token.is_empty() {
      return Err(ApiError::Decode("empty token in auth response".to_string()));
    }
    Ok(response)
  }
}

/// `/auth/me` answers either with the bare identity or wrapped in `user`.
pub fn parse_profile(body: Value) -> Result<Identity, ApiError> {
  let body = match body {
    Value::Object(mut map) if map.contains_key("user") => map.remove("user").unwrap_or_default(),
    other => other,
  };
  serde_json::from_value(body).map_err(|e| ApiError::Decode(e.to_string()))
}
