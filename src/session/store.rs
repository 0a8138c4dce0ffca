use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::storage::LocalStorage;

/// Storage key holding the serialized identity.
pub const IDENTITY_KEY: &str = "user";
/// Storage key holding the raw credential.
pub const CREDENTIAL_KEY: &str = "token";

/// The signed-in user as returned by the auth endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
  pub id: u64,
  pub email: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub role: Option<String>,
  /// Profile fields this layer does not interpret.
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl Identity {
  pub fn new(id: u64, email: impl Into<String>) -> Self {
    Self {
      id,
      email: email.into(),
      name: None,
      role: None,
      extra: Map::new(),
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
  pub identity: Option<Identity>,
  pub credential: Option<String>,
}

impl Session {
  pub fn is_authenticated(&self) -> bool {
    self.identity.is_some() && self.credential.is_some()
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
  Anonymous,
  Authenticated,
  /// Credential was rejected; teardown side effects are running.
  Expiring,
}

/// Where the user is sent once their session has expired.
pub trait Navigator: Send + Sync {
  fn redirect_to_login(&self);
}

/// Navigator for headless use: it only records the event in the log.
#[derive(Debug, Default)]
pub struct LogNavigator;

impl Navigator for LogNavigator {
  fn redirect_to_login(&self) {
    warn!("session expired, sign in again to continue");
  }
}

type ExpiryHook = Arc<dyn Fn() + Send + Sync>;

struct State {
  session: Session,
  phase: SessionPhase,
}

struct Inner {
  state: Mutex<State>,
  hooks: Mutex<Vec<ExpiryHook>>,
  storage: Box<dyn LocalStorage>,
  tx: watch::Sender<Session>,
}

/// Process-wide session holder. Cloning shares the same session.
#[derive(Clone)]
pub struct SessionStore {
  inner: Arc<Inner>,
}

impl SessionStore {
  /// Build the store from whatever the storage holds.
  ///
  /// A missing, partial or unparsable stored session starts signed out and
  /// the leftover keys are removed.
  pub fn hydrate(storage: impl LocalStorage + 'static) -> Self {
    let session = load_persisted(&storage);
    let phase = if session.is_authenticated() {
      SessionPhase::Authenticated
    } else {
      SessionPhase::Anonymous
    };
    let (tx, _rx) = watch::channel(session.clone());

    Self {
      inner: Arc::new(Inner {
        state: Mutex::new(State { session, phase }),
        hooks: Mutex::new(Vec::new()),
        storage: Box::new(storage),
        tx,
      }),
    }
  }

  /// Synchronous snapshot of the current session.
  pub fn get_session(&self) -> Session {
    self.state().session.clone()
  }

  pub fn credential(&self) -> Option<String> {
    self.state().session.credential.clone()
  }

  pub fn identity(&self) -> Option<Identity> {
    self.state().session.identity.clone()
  }

  pub fn phase(&self) -> SessionPhase {
    self.state().phase
  }

  pub fn is_authenticated(&self) -> bool {
    self.state().session.is_authenticated()
  }

  /// Observe session changes.
  pub fn watch(&self) -> watch::Receiver<Session> {
    self.inner.tx.subscribe()
  }

  /// Register a side effect to run when the session expires.
  pub fn on_expire(&self, hook: impl Fn() + Send + Sync + 'static) {
    self
      .inner
      .hooks
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .push(Arc::new(hook));
  }

  pub fn set_session(&self, identity: Identity, credential: impl Into<String>) {
    let credential = credential.into();
    let mut state = self.state();
    self.persist_identity(&identity);
    self.persist_credential(&credential);
    info!(user_id = identity.id, "session started");
    state.session = Session {
      identity: Some(identity),
      credential: Some(credential),
    };
    state.phase = SessionPhase::Authenticated;
    self.inner.tx.send_replace(state.session.clone());
  }

  /// Replace the identity after a profile refresh. Ignored when signed out.
  pub fn update_identity(&self, identity: Identity) -> bool {
    let mut state = self.state();
    if state.phase != SessionPhase::Authenticated {
      debug!("profile refresh arrived after sign-out, ignoring");
      return false;
    }
    self.persist_identity(&identity);
    state.session.identity = Some(identity);
    self.inner.tx.send_replace(state.session.clone());
    true
  }

  /// Sign out. Calling it when already signed out does nothing.
  pub fn clear_session(&self) {
    let mut state = self.state();
    if state.phase == SessionPhase::Anonymous && state.session == Session::default() {
      return;
    }
    self.clear_persisted();
    state.session = Session::default();
    state.phase = SessionPhase::Anonymous;
    self.inner.tx.send_replace(Session::default());
    info!("session cleared");
  }

  /// React to a rejected credential.
  ///
  /// Only the `Authenticated -> Expiring` transition runs the teardown, and
  /// only when `credential_used` is the current credential. Returns whether
  /// this call performed the teardown.
  pub fn expire(&self, credential_used: Option<&str>) -> bool {
    {
      let mut state = self.state();
      if state.phase != SessionPhase::Authenticated {
        return false;
      }
      if state.session.credential.as_deref() != credential_used {
        return false;
      }
      self.clear_persisted();
      state.session = Session::default();
      state.phase = SessionPhase::Expiring;
      self.inner.tx.send_replace(Session::default());
    }

    // Hooks run without the state lock so they may call back into the store.
    let hooks = self
      .inner
      .hooks
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .clone();
    for hook in hooks {
      hook();
    }

    let mut state = self.state();
    if state.phase == SessionPhase::Expiring {
      state.phase = SessionPhase::Anonymous;
    }
    true
  }

  fn state(&self) -> MutexGuard<'_, State> {
    self
      .inner
      .state
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
  }

  fn persist_identity(&self, identity: &Identity) {
    let result = serde_json::to_string(identity)
      .map_err(color_eyre::eyre::Report::from)
      .and_then(|raw| self.inner.storage.set_item(IDENTITY_KEY, &raw));
    if let Err(e) = result {
      warn!(error = %e, "failed to persist identity");
    }
  }

  fn persist_credential(&self, credential: &str) {
    if let Err(e) = self.inner.storage.set_item(CREDENTIAL_KEY, credential) {
      warn!(error = %e, "failed to persist credential");
    }
  }

  fn clear_persisted(&self) {
    clear_storage(self.inner.storage.as_ref());
  }
}

fn clear_storage(storage: &dyn LocalStorage) {
  for key in [IDENTITY_KEY, CREDENTIAL_KEY] {
    if let Err(e) = storage.remove_item(key) {
      warn!(key, error = %e, "failed to clear stored session");
    }
  }
}

fn load_persisted(storage: &dyn LocalStorage) -> Session {
  let identity = storage.get_item(IDENTITY_KEY);
  let credential = storage.get_item(CREDENTIAL_KEY);

  match (identity, credential) {
    (Ok(None), Ok(None)) => return Session::default(),
    (Ok(Some(raw)), Ok(Some(token))) if !token.is_empty() => {
      match serde_json::from_str::<Identity>(&raw) {
        Ok(identity) => {
          debug!(user_id = identity.id, "restored session from storage");
          return Session {
            identity: Some(identity),
            credential: Some(token),
          };
        }
        Err(e) => warn!(error = %e, "stored identity is corrupt, starting signed out"),
      }
    }
    (Err(e), _) | (_, Err(e)) => warn!(error = %e, "failed to read stored session"),
    _ => debug!("incomplete session in storage, starting signed out"),
  }

  clear_storage(storage);
  Session::default()
}
