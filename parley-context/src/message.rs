//! Core conversation types: roles, messages, and the durable conversation.

use chrono::{DateTime, Utc};
use parley_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Role of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::System => write!(f, "system"),
        }
    }
}

/// A single conversation message.
///
/// Content is validated at construction: empty or whitespace-only content
/// is rejected. Messages are immutable once created; a window only appends
/// or evicts them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message role.
    pub role: Role,
    /// Trimmed message content, never empty.
    pub content: String,
    /// Creation instant.
    pub timestamp: DateTime<Utc>,
    /// Optional string-keyed metadata.
    pub metadata: Option<HashMap<String, String>>,
}

impl Message {
    /// Create a message with the current timestamp.
    ///
    /// Fails with a validation error if `content` is empty after trimming.
    pub fn new(role: Role, content: impl Into<String>) -> Result<Self> {
        let content = content.into();
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Err(Error::validation(
                "content",
                "must not be empty",
                format!("{:?}", content),
            ));
        }

        Ok(Self {
            role,
            content: trimmed.to_string(),
            timestamp: Utc::now(),
            metadata: None,
        })
    }

    /// Attach metadata to the message.
    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Whether this is a system message.
    pub fn is_system(&self) -> bool {
        self.role == Role::System
    }
}

/// The durable full history of a conversation.
///
/// Distinct from [`crate::ContextWindow`]: the window is the bounded live
/// working set sent to the provider; the conversation records everything.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique conversation identifier.
    pub id: Uuid,
    /// Ordered message list, insertion order = chronological order.
    pub messages: Vec<Message>,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
    /// Instant of the last mutation.
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Create an empty conversation with a fresh id.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a validated message, refreshing `updated_at`.
    pub fn add_message(&mut self, role: Role, content: impl Into<String>) -> Result<()> {
        let message = Message::new(role, content)?;
        self.messages.push(message);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// The most recent `limit` messages, or all of them when `limit` is None.
    pub fn history(&self, limit: Option<usize>) -> &[Message] {
        match limit {
            None => &self.messages,
            Some(0) => &[],
            Some(n) => {
                let start = self.messages.len().saturating_sub(n);
                &self.messages[start..]
            }
        }
    }

    /// Remove all messages, refreshing `updated_at`.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.updated_at = Utc::now();
    }

    /// Number of messages recorded.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the conversation has no messages.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}
