//! Mirrors application state into the key/value store.
//!
//! Three values are persisted, each as JSON under its own key: the session
//! list, the signed-in user and the response language. [`StateStore::sync`]
//! writes only the values whose revision moved since the last write.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::db::Database;
use super::models::{LanguageCode, Session, User};
use crate::app::AppState;

/// Storage keys for one namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageKeys {
    pub sessions: String,
    pub user: String,
    pub language: String,
}

impl StorageKeys {
    pub fn new(namespace: &str) -> Self {
        Self {
            sessions: format!("{namespace}_sessions_v1"),
            user: format!("{namespace}_user_v1"),
            language: format!("{namespace}_lang_v1"),
        }
    }
}

/// Everything restored at startup. Absent keys come back as `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersistedState {
    pub user: Option<User>,
    pub sessions: Option<Vec<Session>>,
    pub language: Option<LanguageCode>,
}

/// Revisions last written, per value.
#[derive(Debug, Clone, Copy, Default)]
struct Written {
    sessions: Option<u64>,
    user: Option<u64>,
    language: Option<LanguageCode>,
}

/// Store adapter over a [`Database`].
pub struct StateStore {
    db: Database,
    keys: StorageKeys,
    written: Written,
}

impl StateStore {
    pub fn new(db: Database, namespace: &str) -> Self {
        Self {
            db,
            keys: StorageKeys::new(namespace),
            written: Written::default(),
        }
    }

    /// Reads all persisted values.
    ///
    /// A value that is present but not valid JSON for its type is an error
    /// naming the key; nothing is overwritten.
    pub fn load(&self) -> Result<PersistedState> {
        Ok(PersistedState {
            user: self.read_json(&self.keys.user)?,
            sessions: self.read_json(&self.keys.sessions)?,
            language: self.read_json(&self.keys.language)?,
        })
    }

    /// Marks the freshly loaded state as already written.
    pub fn mark_synced(&mut self, state: &AppState) {
        self.written = Written {
            sessions: Some(state.sessions.revision()),
            user: Some(state.user_revision()),
            language: Some(state.language),
        };
    }

    /// Writes every value that changed since the last sync. Returns the
    /// number of keys written or removed.
    pub fn sync(&mut self, state: &AppState) -> Result<usize> {
        let mut writes = 0;

        let sessions_rev = state.sessions.revision();
        if self.written.sessions != Some(sessions_rev) {
            self.write_json(&self.keys.sessions, state.sessions.sessions())?;
            self.written.sessions = Some(sessions_rev);
            writes += 1;
        }

        let user_rev = state.user_revision();
        if self.written.user != Some(user_rev) {
            match &state.user {
                Some(user) => {
                    self.write_json(&self.keys.user, user)?;
                }
                None => {
                    self.db
                        .remove(&self.keys.user)
                        .with_context(|| format!("Failed to clear '{}'", self.keys.user))?;
                }
            }
            self.written.user = Some(user_rev);
            writes += 1;
        }

        if self.written.language != Some(state.language) {
            self.write_json(&self.keys.language, &state.language)?;
            self.written.language = Some(state.language);
            writes += 1;
        }

        if writes > 0 {
            debug!(writes, "state synced to store");
        }
        Ok(writes)
    }

    fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(raw) = self.db.get(key)? else {
            return Ok(None);
        };
        let value = serde_json::from_str(&raw)
            .with_context(|| format!("Stored value for '{key}' is malformed"))?;
        Ok(Some(value))
    }

    fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)
            .with_context(|| format!("Failed to serialize '{key}'"))?;
        self.db
            .set(key, &json)
            .with_context(|| format!("Failed to write '{key}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{reduce, ChatPolicy, Event};
    use crate::storage::models::{AgentType, AuthProvider};
    use tempfile::tempdir;

    fn create_test_store() -> (StateStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db = Database::open(&dir.path().join("test.db")).unwrap();
        (StateStore::new(db, "metgpt"), dir)
    }

    fn reopen(dir: &tempfile::TempDir) -> StateStore {
        let db = Database::open(&dir.path().join("test.db")).unwrap();
        StateStore::new(db, "metgpt")
    }

    #[test]
    fn test_keys_use_namespace() {
        let keys = StorageKeys::new("metgpt");
        assert_eq!(keys.sessions, "metgpt_sessions_v1");
        assert_eq!(keys.user, "metgpt_user_v1");
        assert_eq!(keys.language, "metgpt_lang_v1");
    }

    #[test]
    fn test_load_empty_store() {
        let (store, _dir) = create_test_store();
        assert_eq!(store.load().unwrap(), PersistedState::default());
    }

    #[test]
    fn test_sync_round_trips_state() {
        let (mut store, dir) = create_test_store();
        let mut state = AppState::new(ChatPolicy::default());
        reduce(
            &mut state,
            Event::Login(User::new("ada@example.com", "Ada", AuthProvider::Email)),
        );
        state.sessions.create_session(AgentType::Core);
        reduce(&mut state, Event::SetLanguage(LanguageCode::Fr));

        assert_eq!(store.sync(&state).unwrap(), 3);

        let loaded = reopen(&dir).load().unwrap();
        assert_eq!(loaded.user.unwrap().email, "ada@example.com");
        assert_eq!(loaded.sessions.unwrap().len(), 1);
        assert_eq!(loaded.language, Some(LanguageCode::Fr));
    }

    #[test]
    fn test_sync_skips_unchanged_values() {
        let (mut store, _dir) = create_test_store();
        let mut state = AppState::new(ChatPolicy::default());
        store.sync(&state).unwrap();
        assert_eq!(store.sync(&state).unwrap(), 0);

        reduce(&mut state, Event::SetLanguage(LanguageCode::De));
        assert_eq!(store.sync(&state).unwrap(), 1);
    }

    #[test]
    fn test_empty_session_list_is_written() {
        let (mut store, dir) = create_test_store();
        let mut state = AppState::new(ChatPolicy::default());
        let id = state.sessions.create_session(AgentType::Core);
        store.sync(&state).unwrap();

        reduce(&mut state, Event::DeleteSession(id));
        store.sync(&state).unwrap();

        let loaded = reopen(&dir).load().unwrap();
        assert_eq!(loaded.sessions, Some(Vec::new()));
    }

    #[test]
    fn test_logout_clears_user_key() {
        let (mut store, dir) = create_test_store();
        let mut state = AppState::new(ChatPolicy::default());
        reduce(
            &mut state,
            Event::Login(User::new("ada@example.com", "Ada", AuthProvider::Google)),
        );
        store.sync(&state).unwrap();

        reduce(&mut state, Event::Logout);
        store.sync(&state).unwrap();

        assert!(reopen(&dir).load().unwrap().user.is_none());
    }

    #[test]
    fn test_malformed_value_names_key() {
        let (store, _dir) = create_test_store();
        store.db.set("metgpt_sessions_v1", "{not json").unwrap();

        let err = store.load().unwrap_err();
        assert!(format!("{err:#}").contains("metgpt_sessions_v1"));
        assert_eq!(
            store.db.get("metgpt_sessions_v1").unwrap().as_deref(),
            Some("{not json")
        );
    }

    #[test]
    fn test_mark_synced_avoids_rewrite() {
        let (mut store, _dir) = create_test_store();
        let state = AppState::new(ChatPolicy::default());
        store.mark_synced(&state);
        assert_eq!(store.sync(&state).unwrap(), 0);
    }
}
