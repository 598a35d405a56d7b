//! Token-budgeted sliding window over a conversation.
//!
//! The window holds at most `max_messages` non-system messages; system
//! messages are exempt from the cap and from eviction. Retrieval walks the
//! non-system messages newest-first under a token budget, so the provider
//! always sees the system prompt plus the most recent affordable history.

use crate::message::{Message, Role};
use crate::tokens::{TiktokenCounter, TokenCounter};
use parley_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Prefix marking a summary message produced by [`ContextWindow::summarize`].
pub const SUMMARY_PREFIX: &str = "Summary of earlier conversation: ";

/// Bounded, token-budgeted working set of conversation messages.
///
/// All operations are internally serialized; `&self` methods are safe to
/// call from concurrent tasks.
pub struct ContextWindow {
    model_name: String,
    counter: Arc<dyn TokenCounter>,
    state: Mutex<WindowState>,
}

struct WindowState {
    messages: Vec<Message>,
    max_messages: usize,
}

/// Persisted window document.
#[derive(Serialize, Deserialize)]
struct WindowDoc {
    model_name: String,
    max_messages: usize,
    messages: Vec<Message>,
}

impl ContextWindow {
    /// Create an empty window using the tiktoken counter for `model_name`.
    pub fn new(max_messages: usize, model_name: impl Into<String>) -> Self {
        let model_name = model_name.into();
        let counter = Arc::new(TiktokenCounter::for_model(&model_name));
        Self::with_counter(max_messages, model_name, counter)
    }

    /// Create an empty window with an explicit token counter.
    pub fn with_counter(
        max_messages: usize,
        model_name: impl Into<String>,
        counter: Arc<dyn TokenCounter>,
    ) -> Self {
        Self {
            model_name: model_name.into(),
            counter,
            state: Mutex::new(WindowState {
                messages: Vec::new(),
                max_messages,
            }),
        }
    }

    /// Model identifier this window was created for.
    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Maximum number of non-system messages kept.
    pub fn max_messages(&self) -> usize {
        self.state.lock().unwrap().max_messages
    }

    /// Append a message, evicting the oldest non-system message when the
    /// non-system count would exceed the cap.
    ///
    /// At most one message is evicted per push; system messages are never
    /// evicted by this path.
    pub fn push(&self, message: Message) {
        let mut state = self.state.lock().unwrap();
        state.messages.push(message);

        let non_system = state.messages.iter().filter(|m| !m.is_system()).count();
        if non_system > state.max_messages {
            if let Some(idx) = state.messages.iter().position(|m| !m.is_system()) {
                let evicted = state.messages.remove(idx);
                tracing::info!(
                    evicted_role = %evicted.role,
                    total = state.messages.len(),
                    "Window cap exceeded, evicted oldest message"
                );
            }
        }
    }

    /// Return the messages fitting inside `token_budget`.
    ///
    /// System messages are always included and costed first. Non-system
    /// messages are walked newest to oldest and included greedily; the walk
    /// stops at the first message that would exceed the budget, even if an
    /// older, cheaper one would still fit. The result is chronological with
    /// system messages ordered before everything else.
    pub fn context(&self, token_budget: usize) -> Vec<Message> {
        let state = self.state.lock().unwrap();
        if state.messages.is_empty() {
            return Vec::new();
        }

        let mut result: Vec<Message> = state
            .messages
            .iter()
            .filter(|m| m.is_system())
            .cloned()
            .collect();
        let mut total: usize = result.iter().map(|m| self.counter.message_cost(m)).sum();

        for message in state.messages.iter().rev().filter(|m| !m.is_system()) {
            let cost = self.counter.message_cost(message);
            if total + cost > token_budget {
                tracing::debug!(
                    total_tokens = total,
                    budget = token_budget,
                    included = result.len(),
                    "Token budget reached"
                );
                break;
            }
            result.push(message.clone());
            total += cost;
        }

        // Chronological order, system messages first. Stable sort keeps
        // insertion order among equal timestamps.
        result.sort_by_key(|m| (!m.is_system(), m.timestamp));
        result
    }

    /// Collapse the non-system history into a single summary message.
    ///
    /// Invokes `summarizer` with the ordered non-system messages, then
    /// replaces the window contents with the existing system messages plus
    /// one new system message carrying the summary. Returns the raw summary.
    ///
    /// Fails with a validation error when there is nothing to summarize
    /// (fewer than two messages total, or no non-system messages).
    pub fn summarize<F>(&self, summarizer: F) -> Result<String>
    where
        F: FnOnce(&[Message]) -> String,
    {
        let mut state = self.state.lock().unwrap();

        if state.messages.len() < 2 {
            return Err(Error::validation(
                "window",
                "needs at least 2 messages to summarize",
                state.messages.len(),
            ));
        }

        let to_summarize: Vec<Message> = state
            .messages
            .iter()
            .filter(|m| !m.is_system())
            .cloned()
            .collect();
        if to_summarize.is_empty() {
            return Err(Error::validation(
                "window",
                "needs non-system messages to summarize",
                0,
            ));
        }

        tracing::info!(message_count = to_summarize.len(), "Summarizing window");
        let summary = summarizer(&to_summarize);

        let summary_message =
            Message::new(Role::System, format!("{SUMMARY_PREFIX}{summary}"))?;

        let mut kept: Vec<Message> = state
            .messages
            .iter()
            .filter(|m| m.is_system())
            .cloned()
            .collect();
        kept.push(summary_message);
        state.messages = kept;

        tracing::info!(
            summary_length = summary.len(),
            messages_removed = to_summarize.len(),
            "Window summarized"
        );

        Ok(summary)
    }

    /// Serialize the window to a JSON document at `path`.
    pub fn persist(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let state = self.state.lock().unwrap();

        let doc = WindowDoc {
            model_name: self.model_name.clone(),
            max_messages: state.max_messages,
            messages: state.messages.clone(),
        };
        let json = serde_json::to_string_pretty(&doc)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::storage(format!("creating {}", parent.display()), e))?;
        }
        std::fs::write(path, json)
            .map_err(|e| Error::storage(format!("writing {}", path.display()), e))?;

        tracing::info!(
            path = %path.display(),
            message_count = state.messages.len(),
            "Window persisted"
        );
        Ok(())
    }

    /// Restore a window from a document written by [`persist`](Self::persist).
    ///
    /// Fails with `NotFound` when the file is missing and with a validation
    /// error when the document is malformed.
    pub fn restore(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let doc = Self::read_doc(path)?;
        let counter = Arc::new(TiktokenCounter::for_model(&doc.model_name));
        Ok(Self::from_doc(doc, counter))
    }

    /// Like [`restore`](Self::restore), but with an explicit token counter.
    pub fn restore_with_counter(
        path: impl AsRef<Path>,
        counter: Arc<dyn TokenCounter>,
    ) -> Result<Self> {
        let doc = Self::read_doc(path.as_ref())?;
        Ok(Self::from_doc(doc, counter))
    }

    fn read_doc(path: &Path) -> Result<WindowDoc> {
        if !path.exists() {
            return Err(Error::not_found(format!("window file {}", path.display())));
        }

        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::storage(format!("reading {}", path.display()), e))?;
        serde_json::from_str(&raw).map_err(|e| {
            Error::validation("window_document", format!("malformed: {e}"), path.display())
        })
    }

    fn from_doc(doc: WindowDoc, counter: Arc<dyn TokenCounter>) -> Self {
        tracing::info!(
            model = %doc.model_name,
            message_count = doc.messages.len(),
            "Window restored"
        );
        Self {
            model_name: doc.model_name,
            counter,
            state: Mutex::new(WindowState {
                messages: doc.messages,
                max_messages: doc.max_messages,
            }),
        }
    }

    /// Total messages currently held, system messages included.
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().messages.len()
    }

    /// Whether the window holds no messages.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total token cost of every held message.
    pub fn total_tokens(&self) -> usize {
        let state = self.state.lock().unwrap();
        state
            .messages
            .iter()
            .map(|m| self.counter.message_cost(m))
            .sum()
    }

    /// Remove every message.
    pub fn clear(&self) {
        self.state.lock().unwrap().messages.clear();
        tracing::info!("Window cleared");
    }
}
