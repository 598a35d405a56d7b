//! Parley Context - conversation model and token-budgeted context window.
//!
//! Provides:
//! - [`Role`], [`Message`] and [`Conversation`] conversation primitives
//! - [`TokenCounter`] trait with tiktoken-backed and heuristic implementations
//! - [`ContextWindow`] - bounded, token-budgeted working set of messages

pub mod message;
pub mod tokens;
pub mod window;

pub use message::{Conversation, Message, Role};
pub use tokens::{ApproxCounter, TiktokenCounter, TokenCounter, MESSAGE_OVERHEAD_TOKENS};
pub use window::ContextWindow;
