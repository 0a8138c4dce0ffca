use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::config::Config;
use crate::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
  Get,
  Post,
  Put,
  Patch,
  Delete,
}

impl Method {
  fn as_reqwest(self) -> reqwest::Method {
    match self {
      Method::Get => reqwest::Method::GET,
      Method::Post => reqwest::Method::POST,
      Method::Put => reqwest::Method::PUT,
      Method::Patch => reqwest::Method::PATCH,
      Method::Delete => reqwest::Method::DELETE,
    }
  }
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_reqwest().as_str())
  }
}

/// Everything needed to issue one request, relative to the API base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
  pub method: Method,
  pub path: String,
  pub params: Vec<(String, String)>,
  pub headers: Vec<(String, String)>,
  pub body: Option<Value>,
}

impl RequestDescriptor {
  pub fn new(method: Method, path: impl Into<String>) -> Self {
    Self {
      method,
      path: path.into(),
      params: Vec::new(),
      headers: Vec::new(),
      body: None,
    }
  }

  pub fn get(path: impl Into<String>) -> Self {
    Self::new(Method::Get, path)
  }

  pub fn post(path: impl Into<String>) -> Self {
    Self::new(Method::Post, path)
  }

  pub fn patch(path: impl Into<String>) -> Self {
    Self::new(Method::Patch, path)
  }

  pub fn delete(path: impl Into<String>) -> Self {
    Self::new(Method::Delete, path)
  }

  pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.params.push((name.into(), value.into()));
    self
  }

  pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  pub fn body(mut self, body: Value) -> Self {
    self.body = Some(body);
    self
  }

  /// Look up a header by case-insensitive name.
  pub fn header_value(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}

/// A response that made it back from the server, whatever its status.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
  pub status: u16,
  pub body: Value,
}

impl HttpResponse {
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }
}

/// Performs a single HTTP round trip.
///
/// Implementations return `Err` only when no response was received; HTTP
/// error statuses come back as an `HttpResponse`.
pub trait Transport: Send + Sync + 'static {
  fn send(
    &self,
    request: RequestDescriptor,
  ) -> impl Future<Output = Result<HttpResponse, ApiError>> + Send;
}

/// `reqwest`-backed transport talking JSON to the dashboard API.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  base_url: String,
}

impl HttpTransport {
  pub fn new(config: &Config) -> Result<Self> {
    let base_url = config.api_base_url();
    Url::parse(&base_url).map_err(|e| eyre!("Invalid API base URL '{}': {}", base_url, e))?;

    let client = reqwest::Client::builder()
      .timeout(Duration::from_millis(config.api.timeout_ms))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      base_url: base_url.trim_end_matches('/').to_string(),
    })
  }

  /// Join the base URL and the request path, keeping any path prefix of the
  /// base (e.g. `/api`).
  fn url_for(&self, request: &RequestDescriptor) -> Result<Url, ApiError> {
    let path = request.path.trim_start_matches('/');
    let mut url = Url::parse(&format!("{}/{}", self.base_url, path))
      .map_err(|e| ApiError::InvalidRequest(format!("invalid URL: {}", e)))?;
    if !request.params.is_empty() {
      url
        .query_pairs_mut()
        .extend_pairs(request.params.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    }
    Ok(url)
  }
}

impl Transport for HttpTransport {
  async fn send(&self, request: RequestDescriptor) -> Result<HttpResponse, ApiError> {
    let url = self.url_for(&request)?;
    debug!(method = %request.method, %url, "sending request");

    let mut builder = self
      .client
      .request(request.method.as_reqwest(), url)
      .header(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    for (name, value) in &request.headers {
      let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| ApiError::InvalidRequest(format!("invalid header name {}: {}", name, e)))?;
      let value = HeaderValue::from_str(value)
        .map_err(|e| ApiError::InvalidRequest(format!("invalid header value: {}", e)))?;
      builder = builder.header(name, value);
    }

    if let Some(body) = &request.body {
      builder = builder.json(body);
    }

    let response = builder
      .send()
      .await
      .map_err(|e| ApiError::Network(e.to_string()))?;
    let status = response.status().as_u16();
    let bytes = response
      .bytes()
      .await
      .map_err(|e| ApiError::Network(e.to_string()))?;

    Ok(HttpResponse {
      status,
      body: decode_body(&bytes),
    })
  }
}

/// Empty bodies become `null`; bodies that are not JSON are kept as text so
/// error messages from proxies still reach the caller.
fn decode_body(bytes: &[u8]) -> Value {
  if bytes.iter().all(u8::is_ascii_whitespace) {
    return Value::Null;
  }
  serde_json::from_slice(bytes)
    .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}
