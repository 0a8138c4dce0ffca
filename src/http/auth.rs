use serde_json::Value;
use tracing::{debug, warn};

use super::transport::{RequestDescriptor, Transport};
use crate::error::ApiError;
use crate::session::SessionStore;

/// Decorates every request with the session credential and reacts to
/// credential rejection by expiring the session.
pub struct AuthenticatedTransport<T> {
  inner: T,
  session: SessionStore,
}

impl<T: Transport> AuthenticatedTransport<T> {
  pub fn new(inner: T, session: SessionStore) -> Self {
    Self { inner, session }
  }

  pub fn session(&self) -> &SessionStore {
    &self.session
  }

  /// Send the request and return the body of a successful response.
  ///
  /// A 401 expires the session at most once, and only when the credential we
  /// sent is still the current one; the call still fails with
  /// `ApiError::Unauthorized` so the caller can stop its loading state.
  pub async fn execute(&self, request: RequestDescriptor) -> Result<Value, ApiError> {
    let credential = self.session.credential();
    let request = match &credential {
      Some(token) => request.header("Authorization", format!("Bearer {}", token)),
      None => request,
    };
    let method = request.method;
    let path = request.path.clone();

    let response = self.inner.send(request).await.map_err(|e| {
      debug!(%method, %path, error = %e, "request did not reach the server");
      e
    })?;

    if response.is_success() {
      return Ok(response.body);
    }

    let err = ApiError::from_response(response.status, response.body);
    if err.is_unauthorized() {
      if self.session.expire(credential.as_deref()) {
        warn!(%method, %path, "credential rejected, session expired");
      } else {
        debug!(%method, %path, "credential rejected, session already torn down");
      }
    } else {
      debug!(%method, %path, status = response.status, "request failed");
    }
    Err(err)
  }
}
