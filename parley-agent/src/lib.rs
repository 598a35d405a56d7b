//! Conversational agent assembly.
//!
//! Wires message preprocessing, the token-budgeted context window, response
//! generation with retry and caching, and the optional plugin registry into
//! a single `ConversationAgent`.

pub mod agent;
pub mod factory;
pub mod generator;
pub mod processor;
pub mod provider;

pub use agent::{AgentMetrics, ConversationAgent};
pub use factory::ProviderCache;
pub use generator::ResponseGenerator;
pub use processor::{Intent, IntentKind, MessageProcessor};
pub use provider::{ChatProvider, Completion, TokenUsage};
