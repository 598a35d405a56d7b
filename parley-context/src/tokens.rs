//! Token counting for context budgeting.
//!
//! The [`TokenCounter`] trait hides the tokenizer; the window only needs a
//! stable `text -> count` function. [`TiktokenCounter`] wraps the tiktoken
//! BPE tables, [`ApproxCounter`] is a deterministic heuristic useful when
//! the real tokenizer is unnecessary (tests, offline sizing).

use crate::message::Message;
use std::sync::Arc;
use tiktoken_rs::CoreBPE;

/// Fixed per-message structural overhead in tokens.
///
/// Accounts for the role/content framing the provider adds around each
/// message, independent of its text.
pub const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// Counts tokens in a piece of text.
pub trait TokenCounter: Send + Sync {
    /// Number of tokens in `text`.
    fn count(&self, text: &str) -> usize;

    /// Token cost of a full message: role + content + structural overhead.
    fn message_cost(&self, message: &Message) -> usize {
        self.count(&message.role.to_string())
            + self.count(&message.content)
            + MESSAGE_OVERHEAD_TOKENS
    }
}

/// Token counter backed by a tiktoken BPE encoding.
#[derive(Clone)]
pub struct TiktokenCounter {
    bpe: Arc<CoreBPE>,
}

impl TiktokenCounter {
    /// Resolve the encoding for `model`, falling back to `cl100k_base`
    /// (with a warning) when the model is unknown.
    pub fn for_model(model: &str) -> Self {
        let bpe = match tiktoken_rs::get_bpe_from_model(model) {
            Ok(bpe) => bpe,
            Err(e) => {
                tracing::warn!(
                    model = %model,
                    error = %e,
                    "No encoder for model, falling back to cl100k_base"
                );
                tiktoken_rs::cl100k_base().expect("cl100k_base tables are bundled")
            }
        };
        Self { bpe: Arc::new(bpe) }
    }
}

impl TokenCounter for TiktokenCounter {
    fn count(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}

/// Whitespace-splitting heuristic counter.
///
/// One token per whitespace-separated word. Deterministic and cheap, which
/// makes budget arithmetic in tests exact.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApproxCounter;

impl TokenCounter for ApproxCounter {
    fn count(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }
}
