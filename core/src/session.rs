//! Bearer-token session and its durable storage.
//!
//! # Design
//! The session has two states: absent, or present with a token. It is
//! replaced wholesale and never edited in place. `SessionState` keeps the
//! in-memory copy behind one `RwLock` and writes the store while holding
//! the write guard, so a request built after `clear()` returns can never see
//! the old token. The guard is never held across an `.await`.
//!
//! Store I/O, `FileStore`'s blocking file writes included, therefore runs
//! on the calling task. The file is a few hundred bytes and is written only
//! on login, logout and 401.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::User;

/// Minimal identity persisted next to the token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub user_type: String,
}

impl From<&User> for SessionUser {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.user_id.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
            user_type: user.user_type.clone(),
        }
    }
}

/// The authenticated identity attached to outgoing requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    #[serde(default)]
    pub user: Option<SessionUser>,
}

impl Session {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            user: None,
        }
    }

    pub fn with_user(mut self, user: SessionUser) -> Self {
        self.user = Some(user);
        self
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session store I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("session store holds an unreadable session: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Durable key-value storage for the session.
pub trait SessionStore: Send + Sync {
    fn load(&self) -> Result<Option<Session>, StoreError>;
    fn save(&self, session: &Session) -> Result<(), StoreError>;
    fn clear(&self) -> Result<(), StoreError>;
}

/// Lets a caller keep a handle on the store it gave the client.
impl<S: SessionStore + ?Sized> SessionStore for Arc<S> {
    fn load(&self) -> Result<Option<Session>, StoreError> {
        (**self).load()
    }

    fn save(&self, session: &Session) -> Result<(), StoreError> {
        (**self).save(session)
    }

    fn clear(&self) -> Result<(), StoreError> {
        (**self).clear()
    }
}

/// Process-local store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    slot: Mutex<Option<Session>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session: Session) -> Self {
        Self {
            slot: Mutex::new(Some(session)),
        }
    }
}

impl SessionStore for MemoryStore {
    fn load(&self) -> Result<Option<Session>, StoreError> {
        Ok(self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, session: &Session) -> Result<(), StoreError> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

/// Session persisted as a JSON file.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<data dir>/smartwaste/session.json`, falling back to the working
    /// directory when the platform has no data dir.
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("smartwaste")
            .join("session.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStore for FileStore {
    fn load(&self) -> Result<Option<Session>, StoreError> {
        let payload = match fs::read_to_string(&self.path) {
            Ok(payload) => payload,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&payload)?))
    }

    fn save(&self, session: &Session) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_vec_pretty(session)?)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-client session holder.
pub(crate) struct SessionState {
    current: RwLock<Option<Session>>,
    store: Box<dyn SessionStore>,
}

impl SessionState {
    /// Restore from `store`. An unreadable store starts the client logged
    /// out rather than failing construction.
    pub(crate) fn restore(store: Box<dyn SessionStore>) -> Self {
        let current = match store.load() {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(error = %e, "could not restore session, starting logged out");
                None
            }
        };
        Self {
            current: RwLock::new(current),
            store,
        }
    }

    pub(crate) fn token(&self) -> Option<String> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|s| s.token.clone())
    }

    pub(crate) fn snapshot(&self) -> Option<Session> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn replace(&self, session: Session) {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = self.store.save(&session) {
            tracing::warn!(error = %e, "session not persisted");
        }
        *guard = Some(session);
    }

    /// Returns true if a session was present.
    pub(crate) fn clear(&self) -> bool {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = self.store.clear() {
            tracing::warn!(error = %e, "session store not cleared");
        }
        guard.take().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new("T1").with_user(SessionUser {
            user_id: "u1".to_string(),
            name: "A".to_string(),
            email: "a@b.com".to_string(),
            user_type: "citizen".to_string(),
        })
    }

    #[test]
    fn file_store_round_trips_and_clears() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("nested").join("session.json"));

        assert_eq!(store.load().unwrap(), None);
        store.save(&session()).unwrap();
        assert_eq!(store.load().unwrap(), Some(session()));

        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
        // Clearing twice is fine.
        store.clear().unwrap();
    }

    #[test]
    fn file_store_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        fs::write(&path, "not json").unwrap();
        let err = FileStore::new(path).load().unwrap_err();
        assert!(matches!(err, StoreError::Encoding(_)));
    }

    #[test]
    fn state_restores_from_store() {
        let state = SessionState::restore(Box::new(MemoryStore::with_session(session())));
        assert_eq!(state.token().as_deref(), Some("T1"));
    }

    #[test]
    fn state_starts_empty_when_store_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        fs::write(&path, "{").unwrap();
        let state = SessionState::restore(Box::new(FileStore::new(path)));
        assert_eq!(state.token(), None);
    }

    #[test]
    fn clear_drops_memory_and_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let state = SessionState::restore(Box::new(FileStore::new(&path)));

        state.replace(session());
        assert!(path.exists());
        assert!(state.clear());
        assert!(!path.exists());
        assert_eq!(state.token(), None);
        assert!(!state.clear());
    }
}
