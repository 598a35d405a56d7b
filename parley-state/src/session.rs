//! Per-user session document.

use chrono::{DateTime, Duration, Utc};
use parley_context::Conversation;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Everything tracked for one user session.
///
/// Serializes to the document persisted by the storage backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    /// `None` for anonymous sessions.
    #[serde(default)]
    pub user_id: Option<String>,
    pub conversation: Conversation,
    #[serde(default)]
    pub user_preferences: HashMap<String, Value>,
    #[serde(default)]
    pub plugin_data: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// `None` means the session never expires.
    pub expires_at: Option<DateTime<Utc>>,
}

impl SessionState {
    /// Create a fresh session with an optional TTL. `user_id` of `None`
    /// creates an anonymous session.
    pub fn new(user_id: Option<String>, ttl: Option<Duration>) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4().to_string(),
            user_id,
            conversation: Conversation::new(),
            user_preferences: HashMap::new(),
            plugin_data: HashMap::new(),
            created_at: now,
            updated_at: now,
            expires_at: ttl.map(|ttl| now + ttl),
        }
    }

    /// Whether the session's expiry has passed.
    pub fn is_expired(&self) -> bool {
        self.expires_at.map_or(false, |at| Utc::now() >= at)
    }

    /// Record activity and push the expiry forward by `ttl`.
    pub fn extend_expiry(&mut self, ttl: Duration) {
        let now = Utc::now();
        self.updated_at = now;
        self.expires_at = Some(now + ttl);
    }

    /// Record activity without changing the expiry.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn set_preference(&mut self, key: impl Into<String>, value: Value) {
        self.user_preferences.insert(key.into(), value);
        self.touch();
    }

    pub fn preference(&self, key: &str) -> Option<&Value> {
        self.user_preferences.get(key)
    }

    /// Scratch space owned by one plugin, keyed by plugin name.
    pub fn set_plugin_data(&mut self, plugin: impl Into<String>, value: Value) {
        self.plugin_data.insert(plugin.into(), value);
        self.touch();
    }

    pub fn plugin_data(&self, plugin: &str) -> Option<&Value> {
        self.plugin_data.get(plugin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_session_has_future_expiry() {
        let s = SessionState::new(Some("alice".to_string()), Some(Duration::hours(1)));
        assert!(!s.is_expired());
        assert!(s.expires_at.unwrap() > Utc::now());
        assert!(s.conversation.is_empty());
    }

    #[test]
    fn no_ttl_never_expires() {
        let s = SessionState::new(Some("alice".to_string()), None);
        assert!(s.expires_at.is_none());
        assert!(!s.is_expired());
    }

    #[test]
    fn past_expiry_is_expired() {
        let mut s = SessionState::new(Some("alice".to_string()), Some(Duration::hours(1)));
        s.expires_at = Some(Utc::now() - Duration::seconds(1));
        assert!(s.is_expired());

        s.extend_expiry(Duration::hours(1));
        assert!(!s.is_expired());
    }

    #[test]
    fn preferences_and_plugin_data() {
        let mut s = SessionState::new(Some("alice".to_string()), None);
        s.set_preference("lang", json!("en"));
        s.set_plugin_data("weather", json!({"last_city": "Oslo"}));

        assert_eq!(s.preference("lang"), Some(&json!("en")));
        assert_eq!(
            s.plugin_data("weather"),
            Some(&json!({"last_city": "Oslo"}))
        );
        assert!(s.preference("missing").is_none());
    }

    #[test]
    fn serde_roundtrip() {
        let mut s = SessionState::new(Some("bob".to_string()), Some(Duration::minutes(30)));
        s.set_preference("tone", json!("formal"));

        let raw = serde_json::to_string(&s).unwrap();
        let back: SessionState = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.session_id, s.session_id);
        assert_eq!(back.user_id.as_deref(), Some("bob"));
        assert_eq!(back.preference("tone"), Some(&json!("formal")));
    }

    #[test]
    fn anonymous_session_deserializes_from_null_user() {
        let raw = json!({
            "session_id": "abc-123",
            "user_id": null,
            "conversation": Conversation::new(),
            "created_at": Utc::now(),
            "updated_at": Utc::now(),
            "expires_at": null,
        });
        let s: SessionState = serde_json::from_value(raw).unwrap();
        assert!(s.user_id.is_none());
        assert!(!s.is_expired());
    }
}
