//! Scripted transport for tests.

use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

use crate::error::ApiError;
use crate::http::{HttpResponse, Method, RequestDescriptor, Transport};

enum Outcome {
  Response(HttpResponse),
  Offline,
}

struct Reply {
  /// Only requests with this method and path consume the reply
  route: Option<(Method, String)>,
  outcome: Outcome,
  gate: Option<oneshot::Receiver<()>>,
}

impl Reply {
  fn accepts(&self, request: &RequestDescriptor) -> bool {
    match &self.route {
      Some((method, path)) => *method == request.method && *path == request.path,
      None => true,
    }
  }
}

#[derive(Default)]
struct MockState {
  replies: VecDeque<Reply>,
  fallback: Option<HttpResponse>,
  calls: Vec<RequestDescriptor>,
}

/// Answers requests from a queue of scripted replies.
///
/// A request takes the first queued reply whose route matches it. With the
/// queue exhausted it gets the fallback response, or a network error.
#[derive(Clone, Default)]
pub struct MockTransport {
  state: Arc<Mutex<MockState>>,
}

impl MockTransport {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, MockState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn push(&self, route: Option<(Method, String)>, outcome: Outcome, gate: Option<oneshot::Receiver<()>>) {
    self.lock().replies.push_back(Reply { route, outcome, gate });
  }

  /// Queue a reply for the next request.
  pub fn respond(&self, status: u16, body: Value) {
    self.push(None, Outcome::Response(HttpResponse { status, body }), None);
  }

  /// Queue a reply for the next request to `method path`.
  pub fn respond_to(&self, method: Method, path: &str, status: u16, body: Value) {
    self.push(
      Some((method, path.to_string())),
      Outcome::Response(HttpResponse { status, body }),
      None,
    );
  }

  /// Queue a reply that is held back until the returned sender fires.
  pub fn respond_when(&self, status: u16, body: Value) -> oneshot::Sender<()> {
    let (tx, rx) = oneshot::channel();
    self.push(None, Outcome::Response(HttpResponse { status, body }), Some(rx));
    tx
  }

  /// Like `respond_when`, for the next request to `method path`.
  pub fn respond_to_when(&self, method: Method, path: &str, status: u16, body: Value) -> oneshot::Sender<()> {
    let (tx, rx) = oneshot::channel();
    self.push(
      Some((method, path.to_string())),
      Outcome::Response(HttpResponse { status, body }),
      Some(rx),
    );
    tx
  }

  /// Queue a network failure for the next request.
  pub fn fail_next(&self) {
    self.push(None, Outcome::Offline, None);
  }

  /// Reply to every unscripted request with `status`/`body`.
  pub fn fallback(&self, status: u16, body: Value) {
    self.lock().fallback = Some(HttpResponse { status, body });
  }

  /// Fail every unscripted request as if the network were down.
  pub fn offline(&self) {
    self.lock().fallback = None;
  }

  pub fn calls(&self) -> Vec<RequestDescriptor> {
    self.lock().calls.clone()
  }

  pub fn call_count(&self, method: Method, path: &str) -> usize {
    self
      .lock()
      .calls
      .iter()
      .filter(|c| c.method == method && c.path == path)
      .count()
  }
}

impl Transport for MockTransport {
  async fn send(&self, request: RequestDescriptor) -> Result<HttpResponse, ApiError> {
    let (outcome, gate) = {
      let mut state = self.lock();
      state.calls.push(request.clone());
      let position = state.replies.iter().position(|r| r.accepts(&request));
      match position.and_then(|i| state.replies.remove(i)) {
        Some(reply) => (reply.outcome, reply.gate),
        None => match &state.fallback {
          Some(response) => (Outcome::Response(response.clone()), None),
          None => (Outcome::Offline, None),
        },
      }
    };

    if let Some(gate) = gate {
      let _ = gate.await;
    }

    match outcome {
      Outcome::Response(response) => Ok(response),
      Outcome::Offline => Err(ApiError::Network(format!(
        "no route to {} {}",
        request.method, request.path
      ))),
    }
  }
}
