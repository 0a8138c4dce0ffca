//! Current identity and credential, mirrored to durable local storage.

mod storage;
mod store;

pub use storage::{LocalStorage, MemoryStorage, SqliteStorage};
pub use store::{
  Identity, LogNavigator, Navigator, Session, SessionPhase, SessionStore, CREDENTIAL_KEY,
  IDENTITY_KEY,
};
