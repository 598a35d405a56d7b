//! Message preprocessing, validation, and intent classification.

use once_cell::sync::Lazy;
use parley_common::validation::{sanitize_input, MESSAGE_DEFAULT_MAX_LENGTH};
use parley_common::{Error, Result};
use regex::Regex;
use serde::Serialize;

static QUESTION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\?$",
        r"^(what|when|where|who|why|how|which|can|could|would|should|do|does|did|is|are|was|were)\b",
        r"\b(tell me|explain|describe|wondering)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

static COMMAND_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"^(run|start|stop|create|make|delete|remove|show|open|close|list|add|set|execute)\b",
        r"\b(please|let's)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

/// Coarse classification of what a message is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentKind {
    Question,
    Command,
    Conversation,
}

/// Classified intent with a confidence score in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Intent {
    pub kind: IntentKind,
    pub confidence: f64,
}

/// Preprocesses and validates user messages before they reach the model.
pub struct MessageProcessor {
    max_length: usize,
    min_length: usize,
    forbidden_words: Vec<String>,
}

impl Default for MessageProcessor {
    fn default() -> Self {
        Self::new(MESSAGE_DEFAULT_MAX_LENGTH)
    }
}

impl MessageProcessor {
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length,
            min_length: 1,
            forbidden_words: Vec::new(),
        }
    }

    /// Reject messages containing any of these words (case-insensitive).
    pub fn with_forbidden_words(mut self, words: Vec<String>) -> Self {
        self.forbidden_words = words;
        self
    }

    pub fn with_min_length(mut self, min_length: usize) -> Self {
        self.min_length = min_length;
        self
    }

    /// Sanitize a raw message and truncate it to the maximum length.
    pub fn preprocess(&self, message: &str) -> String {
        let mut processed = sanitize_input(message);

        let length = processed.chars().count();
        if length > self.max_length {
            processed = processed.chars().take(self.max_length).collect();
            tracing::warn!(
                original_length = length,
                truncated_length = self.max_length,
                "Message truncated to maximum length"
            );
        }
        processed
    }

    /// Validate a preprocessed message against length and content rules.
    pub fn validate(&self, message: &str) -> Result<()> {
        if message.trim().is_empty() {
            return Err(Error::validation(
                "message",
                "must not be empty",
                format!("{:?}", message),
            ));
        }

        let length = message.chars().count();
        if length < self.min_length {
            return Err(Error::validation(
                "message",
                format!("must be at least {} characters", self.min_length),
                length,
            ));
        }
        if length > self.max_length {
            return Err(Error::validation(
                "message",
                format!("must be at most {} characters", self.max_length),
                length,
            ));
        }

        let lowered = message.to_lowercase();
        for word in &self.forbidden_words {
            if lowered.contains(&word.to_lowercase()) {
                tracing::warn!(word = %word, "Forbidden word detected");
                return Err(Error::validation(
                    "message",
                    "contains a forbidden word",
                    word,
                ));
            }
        }

        Ok(())
    }

    /// Classify a message as question, command, or plain conversation.
    ///
    /// Keyword heuristics only; each matching pattern adds 0.4 confidence,
    /// capped at 1.0. Anything that matches nothing is conversation at 0.5.
    pub fn extract_intent(&self, message: &str) -> Intent {
        let lowered = message.to_lowercase();

        let question_score = QUESTION_PATTERNS
            .iter()
            .filter(|p| p.is_match(&lowered))
            .count();
        if question_score > 0 {
            return Intent {
                kind: IntentKind::Question,
                confidence: (question_score as f64 * 0.4).min(1.0),
            };
        }

        let command_score = COMMAND_PATTERNS
            .iter()
            .filter(|p| p.is_match(&lowered))
            .count();
        if command_score > 0 {
            return Intent {
                kind: IntentKind::Command,
                confidence: (command_score as f64 * 0.4).min(1.0),
            };
        }

        Intent {
            kind: IntentKind::Conversation,
            confidence: 0.5,
        }
    }
}
