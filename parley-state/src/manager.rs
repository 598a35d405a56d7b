//! In-memory session registry with TTL expiry and background persistence.

use crate::session::SessionState;
use crate::storage::StorageBackend;
use chrono::Duration;
use parley_common::{Error, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

/// Key prefix shared by every persisted session document.
const SESSION_KEY_PREFIX: &str = "session_";

#[derive(Debug, Clone)]
pub struct StateManagerConfig {
    /// Sliding lifetime of a session; `None` disables expiry.
    pub session_ttl: Option<Duration>,
    /// How often the background task flushes sessions to storage.
    pub auto_save_interval: std::time::Duration,
}

impl Default for StateManagerConfig {
    fn default() -> Self {
        Self {
            session_ttl: Some(Duration::hours(1)),
            auto_save_interval: std::time::Duration::from_secs(60),
        }
    }
}

/// Owns the live session map and keeps it synchronized with storage.
///
/// Sessions live in memory; storage is a write-behind copy flushed on
/// mutation and periodically by the auto-save task. The inner lock is never
/// held across storage I/O or an await point.
pub struct StateManager {
    storage: Arc<dyn StorageBackend>,
    sessions: Arc<Mutex<HashMap<String, SessionState>>>,
    config: StateManagerConfig,
    running: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StateManager {
    /// Build a manager over `storage`, eagerly loading every persisted
    /// session. Sessions that expired while offline are deleted, not loaded.
    pub fn new(storage: Arc<dyn StorageBackend>, config: StateManagerConfig) -> Result<Self> {
        let mut sessions = HashMap::new();
        let keys = storage.list_keys(Some(&format!("{SESSION_KEY_PREFIX}*")))?;
        for key in keys {
            let doc = match storage.load(&key) {
                Ok(doc) => doc,
                Err(e) if e.is_not_found() => continue,
                Err(e) => {
                    tracing::warn!(key, error = %e, "Skipping unreadable session document");
                    continue;
                }
            };
            let session: SessionState = match serde_json::from_value(doc) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(key, error = %e, "Skipping malformed session document");
                    continue;
                }
            };
            if session.is_expired() {
                tracing::info!(session_id = %session.session_id, "Dropping expired session");
                if let Err(e) = storage.delete(&key) {
                    tracing::warn!(key, error = %e, "Failed to delete expired session");
                }
                continue;
            }
            sessions.insert(session.session_id.clone(), session);
        }
        tracing::info!(loaded = sessions.len(), "Session manager initialized");

        Ok(Self {
            storage,
            sessions: Arc::new(Mutex::new(sessions)),
            config,
            running: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
        })
    }

    /// Spawn the background task that periodically flushes sessions and
    /// sweeps expired ones. Idempotent.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let storage = Arc::clone(&self.storage);
        let sessions = Arc::clone(&self.sessions);
        let running = Arc::clone(&self.running);
        let interval = self.config.auto_save_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await; // first tick fires immediately
            while running.load(Ordering::SeqCst) {
                ticker.tick().await;
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                sweep_expired(&storage, &sessions);
                persist_all(&storage, &sessions);
            }
            tracing::debug!("Auto-save task stopped");
        });
        *self.task.lock().unwrap() = Some(handle);
        tracing::info!(interval_secs = interval.as_secs(), "Auto-save task started");
    }

    /// Stop the background task, sweep expired sessions, and flush every
    /// remaining session a final time.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.task.lock().unwrap().take() {
            handle.abort();
        }
        sweep_expired(&self.storage, &self.sessions);
        persist_all(&self.storage, &self.sessions);
        tracing::info!("Session manager stopped");
    }

    /// Create and persist a new session. `user_id` of `None` creates an
    /// anonymous session.
    pub fn create_session(&self, user_id: Option<String>) -> SessionState {
        let session = SessionState::new(user_id, self.config.session_ttl);
        self.sessions
            .lock()
            .unwrap()
            .insert(session.session_id.clone(), session.clone());
        self.persist_one(&session);
        tracing::info!(
            session_id = %session.session_id,
            user_id = ?session.user_id,
            "Session created"
        );
        session
    }

    /// Fetch a session by id, extending its expiry on access.
    ///
    /// A session absent from memory is looked up in storage and, if still
    /// live, cached back into the map. An expired session is removed from
    /// both memory and storage and reported as not found.
    pub fn get_session(&self, session_id: &str) -> Result<SessionState> {
        enum Lookup {
            Live(SessionState),
            Expired,
            Miss,
        }

        let hit = {
            let mut sessions = self.sessions.lock().unwrap();
            match sessions.get_mut(session_id) {
                None => Lookup::Miss,
                Some(s) if s.is_expired() => {
                    sessions.remove(session_id);
                    Lookup::Expired
                }
                Some(s) => {
                    match self.config.session_ttl {
                        Some(ttl) => s.extend_expiry(ttl),
                        None => s.touch(),
                    }
                    Lookup::Live(s.clone())
                }
            }
        };

        match hit {
            Lookup::Live(session) => {
                self.persist_one(&session);
                Ok(session)
            }
            Lookup::Expired => {
                self.delete_stored(session_id);
                tracing::info!(session_id, "Session expired on access");
                Err(Error::not_found(format!("session {session_id}")))
            }
            Lookup::Miss => self.load_session(session_id),
        }
    }

    /// Load a session document from storage, expiry-check it, and cache it.
    fn load_session(&self, session_id: &str) -> Result<SessionState> {
        let key = format!("{SESSION_KEY_PREFIX}{session_id}");
        let doc = self.storage.load(&key).map_err(|e| {
            if e.is_not_found() {
                Error::not_found(format!("session {session_id}"))
            } else {
                e
            }
        })?;
        let mut session: SessionState = serde_json::from_value(doc)
            .map_err(|e| Error::validation("session_document", format!("malformed: {e}"), &key))?;

        if session.is_expired() {
            self.delete_stored(session_id);
            tracing::info!(session_id, "Stored session expired");
            return Err(Error::not_found(format!("session {session_id}")));
        }

        match self.config.session_ttl {
            Some(ttl) => session.extend_expiry(ttl),
            None => session.touch(),
        }
        self.sessions
            .lock()
            .unwrap()
            .insert(session.session_id.clone(), session.clone());
        self.persist_one(&session);
        tracing::info!(session_id, "Session loaded from storage");
        Ok(session)
    }

    /// Replace a session's state, refreshing its activity timestamp.
    ///
    /// Fails only when the session is known to neither memory nor storage.
    pub fn update_session(&self, mut session: SessionState) -> Result<()> {
        session.touch();
        let in_memory = self
            .sessions
            .lock()
            .unwrap()
            .contains_key(&session.session_id);
        if !in_memory {
            let key = format!("{SESSION_KEY_PREFIX}{}", session.session_id);
            if !self.storage.exists(&key) {
                return Err(Error::not_found(format!("session {}", session.session_id)));
            }
        }
        self.sessions
            .lock()
            .unwrap()
            .insert(session.session_id.clone(), session.clone());
        self.persist_one(&session);
        Ok(())
    }

    /// Remove a session from memory and storage. Returns whether it existed.
    pub fn delete_session(&self, session_id: &str) -> Result<bool> {
        let existed = self.sessions.lock().unwrap().remove(session_id).is_some();
        let stored = match self.storage.delete(&format!("{SESSION_KEY_PREFIX}{session_id}")) {
            Ok(()) => true,
            Err(e) if e.is_not_found() => false,
            Err(e) => return Err(e),
        };
        if existed || stored {
            tracing::info!(session_id, "Session deleted");
        }
        Ok(existed || stored)
    }

    /// Ids of the sessions currently live in memory, optionally filtered
    /// to a single user.
    pub fn list_sessions(&self, user_id: Option<&str>) -> Vec<String> {
        let mut ids: Vec<String> = self
            .sessions
            .lock()
            .unwrap()
            .values()
            .filter(|s| user_id.map_or(true, |u| s.user_id.as_deref() == Some(u)))
            .map(|s| s.session_id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    /// Remove every expired session now. Returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        sweep_expired(&self.storage, &self.sessions)
    }

    /// Flush every live session to storage.
    pub fn save_all(&self) {
        persist_all(&self.storage, &self.sessions);
    }

    fn persist_one(&self, session: &SessionState) {
        let key = format!("{SESSION_KEY_PREFIX}{}", session.session_id);
        match serde_json::to_value(session) {
            Ok(doc) => {
                if let Err(e) = self.storage.save(&key, &doc) {
                    tracing::warn!(key, error = %e, "Failed to persist session");
                }
            }
            Err(e) => tracing::warn!(key, error = %e, "Failed to serialize session"),
        }
    }

    fn delete_stored(&self, session_id: &str) {
        let key = format!("{SESSION_KEY_PREFIX}{session_id}");
        match self.storage.delete(&key) {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => tracing::warn!(key, error = %e, "Failed to delete stored session"),
        }
    }
}

impl Drop for StateManager {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.task.lock().unwrap().take() {
            handle.abort();
        }
    }
}

/// Snapshot the sessions, release the lock, then write each document.
fn persist_all(
    storage: &Arc<dyn StorageBackend>,
    sessions: &Arc<Mutex<HashMap<String, SessionState>>>,
) {
    let snapshot: Vec<SessionState> = sessions.lock().unwrap().values().cloned().collect();
    let mut failures = 0usize;
    for session in &snapshot {
        let key = format!("{SESSION_KEY_PREFIX}{}", session.session_id);
        let result = serde_json::to_value(session)
            .map_err(Error::from)
            .and_then(|doc| storage.save(&key, &doc));
        if let Err(e) = result {
            failures += 1;
            tracing::warn!(key, error = %e, "Failed to persist session");
        }
    }
    if !snapshot.is_empty() {
        tracing::debug!(saved = snapshot.len() - failures, failures, "Sessions flushed");
    }
}

/// Remove expired sessions from memory, then delete their documents.
fn sweep_expired(
    storage: &Arc<dyn StorageBackend>,
    sessions: &Arc<Mutex<HashMap<String, SessionState>>>,
) -> usize {
    let expired: Vec<String> = {
        let mut map = sessions.lock().unwrap();
        let ids: Vec<String> = map
            .iter()
            .filter(|(_, s)| s.is_expired())
            .map(|(id, _)| id.clone())
            .collect();
        for id in &ids {
            map.remove(id);
        }
        ids
    };

    for id in &expired {
        let key = format!("{SESSION_KEY_PREFIX}{id}");
        match storage.delete(&key) {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => tracing::warn!(key, error = %e, "Failed to delete expired session"),
        }
    }
    if !expired.is_empty() {
        tracing::info!(removed = expired.len(), "Expired sessions swept");
    }
    expired.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::JsonFileStorage;

    fn manager(dir: &std::path::Path, ttl: Option<Duration>) -> StateManager {
        let storage = Arc::new(JsonFileStorage::new(dir).unwrap());
        StateManager::new(
            storage,
            StateManagerConfig {
                session_ttl: ttl,
                auto_save_interval: std::time::Duration::from_secs(60),
            },
        )
        .unwrap()
    }

    #[test]
    fn create_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path(), Some(Duration::hours(1)));

        let session = m.create_session(Some("alice".to_string()));
        let fetched = m.get_session(&session.session_id).unwrap();
        assert_eq!(fetched.user_id.as_deref(), Some("alice"));
        assert_eq!(m.list_sessions(None), vec![session.session_id.clone()]);
        assert_eq!(m.list_sessions(Some("alice")), vec![session.session_id.clone()]);
        assert!(m.list_sessions(Some("bob")).is_empty());

        assert!(m.delete_session(&session.session_id).unwrap());
        assert!(m.get_session(&session.session_id).unwrap_err().is_not_found());
        assert!(!m.delete_session(&session.session_id).unwrap());
    }

    #[test]
    fn get_extends_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path(), Some(Duration::hours(1)));

        let session = m.create_session(Some("alice".to_string()));
        let before = session.expires_at.unwrap();
        let fetched = m.get_session(&session.session_id).unwrap();
        assert!(fetched.expires_at.unwrap() >= before);
    }

    #[test]
    fn expired_session_removed_on_access() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path(), Some(Duration::hours(1)));

        let mut session = m.create_session(Some("alice".to_string()));
        session.expires_at = Some(chrono::Utc::now() - Duration::seconds(1));
        m.update_session(session.clone()).unwrap();

        assert!(m.get_session(&session.session_id).unwrap_err().is_not_found());
        assert_eq!(m.session_count(), 0);
        // Storage copy gone too
        let m2 = manager(dir.path(), Some(Duration::hours(1)));
        assert_eq!(m2.session_count(), 0);
    }

    #[test]
    fn update_unknown_session_fails() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path(), None);
        let orphan = SessionState::new(Some("ghost".to_string()), None);
        assert!(m.update_session(orphan).unwrap_err().is_not_found());
    }

    #[test]
    fn get_falls_back_to_storage() {
        let dir = tempfile::tempdir().unwrap();
        let writer = manager(dir.path(), Some(Duration::hours(1)));
        let session = writer.create_session(Some("alice".to_string()));

        // A second manager over the same directory, emptied of live state.
        let reader = manager(dir.path(), Some(Duration::hours(1)));
        reader.sessions.lock().unwrap().clear();
        assert_eq!(reader.session_count(), 0);

        let fetched = reader.get_session(&session.session_id).unwrap();
        assert_eq!(fetched.user_id.as_deref(), Some("alice"));
        // Cached back into memory
        assert_eq!(reader.session_count(), 1);
    }

    #[test]
    fn get_from_storage_respects_expiry() {
        let dir = tempfile::tempdir().unwrap();
        // Built before the document exists, so the session is only ever
        // reachable through the storage fallback.
        let reader = manager(dir.path(), None);

        let writer = manager(dir.path(), Some(Duration::hours(1)));
        let mut session = writer.create_session(Some("alice".to_string()));
        session.expires_at = Some(chrono::Utc::now() - Duration::seconds(1));
        writer.update_session(session.clone()).unwrap();

        assert!(reader
            .get_session(&session.session_id)
            .unwrap_err()
            .is_not_found());
        // The expired document was deleted on access
        let storage = JsonFileStorage::new(dir.path()).unwrap();
        assert!(!storage.exists(&format!("session_{}", session.session_id)));
    }

    #[test]
    fn update_known_only_to_storage_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let writer = manager(dir.path(), None);
        let mut session = writer.create_session(Some("alice".to_string()));

        let other = manager(dir.path(), None);
        other.sessions.lock().unwrap().clear();

        session.set_preference("lang", serde_json::json!("no"));
        other.update_session(session.clone()).unwrap();
        let fetched = other.get_session(&session.session_id).unwrap();
        assert_eq!(fetched.preference("lang"), Some(&serde_json::json!("no")));
    }

    #[test]
    fn anonymous_sessions_are_supported() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path(), None);
        let session = m.create_session(None);
        assert!(session.user_id.is_none());

        // Survives a reload of the persisted document
        let m2 = manager(dir.path(), None);
        assert_eq!(m2.session_count(), 1);
        assert!(m2.get_session(&session.session_id).unwrap().user_id.is_none());
    }

    #[test]
    fn get_persists_the_extended_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path(), Some(Duration::hours(1)));
        let session = m.create_session(Some("alice".to_string()));
        let before = session.expires_at.unwrap();

        m.get_session(&session.session_id).unwrap();

        let storage = JsonFileStorage::new(dir.path()).unwrap();
        let doc = storage
            .load(&format!("session_{}", session.session_id))
            .unwrap();
        let stored: SessionState = serde_json::from_value(doc).unwrap();
        assert!(stored.expires_at.unwrap() >= before);
    }

    #[test]
    fn cleanup_expired_counts() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path(), Some(Duration::hours(1)));

        let mut a = m.create_session(Some("a".to_string()));
        m.create_session(Some("b".to_string()));
        a.expires_at = Some(chrono::Utc::now() - Duration::seconds(1));
        m.update_session(a).unwrap();

        assert_eq!(m.cleanup_expired(), 1);
        assert_eq!(m.session_count(), 1);
    }

    #[tokio::test]
    async fn start_and_stop_auto_save() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path(), Some(Duration::hours(1)));
        m.start();
        m.start(); // idempotent
        let session = m.create_session(Some("alice".to_string()));
        m.stop();

        // Final flush wrote the document
        let storage = JsonFileStorage::new(dir.path()).unwrap();
        assert!(storage.exists(&format!("session_{}", session.session_id)));
    }

    #[tokio::test]
    async fn stop_sweeps_expired_before_the_final_flush() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path(), Some(Duration::hours(1)));
        let mut stale = m.create_session(Some("a".to_string()));
        let live = m.create_session(Some("b".to_string()));
        stale.expires_at = Some(chrono::Utc::now() - Duration::seconds(1));
        m.update_session(stale.clone()).unwrap();

        m.start();
        m.stop();

        assert_eq!(m.session_count(), 1);
        let storage = JsonFileStorage::new(dir.path()).unwrap();
        assert!(!storage.exists(&format!("session_{}", stale.session_id)));
        assert!(storage.exists(&format!("session_{}", live.session_id)));
    }
}
