//! ChatProvider trait for LLM backends.
//!
//! Defines the interface that all chat backends must implement.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use parley_context::Message;
use serde::{Deserialize, Serialize};

/// Token accounting reported by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Fold another usage report into this one.
    pub fn accumulate(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// A completed model response.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub usage: Option<TokenUsage>,
}

/// Chat backend trait.
///
/// Implementations handle authentication, request formatting, and response
/// parsing for a specific LLM API.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Provider name (e.g. "openai", "azure").
    fn name(&self) -> &str;

    /// Produce a completion for an ordered message list.
    async fn complete(&self, messages: &[Message]) -> anyhow::Result<Completion>;

    /// Produce a completion as a token stream.
    ///
    /// The default falls back to [`complete`](Self::complete) and replays
    /// the full text in small chunks, for backends without native
    /// streaming.
    async fn complete_streaming(
        &self,
        messages: &[Message],
    ) -> anyhow::Result<BoxStream<'static, anyhow::Result<String>>> {
        let completion = self.complete(messages).await?;
        let chunks: Vec<anyhow::Result<String>> = completion
            .text
            .chars()
            .collect::<Vec<_>>()
            .chunks(5)
            .map(|c| Ok(c.iter().collect()))
            .collect();
        Ok(futures_util::stream::iter(chunks).boxed())
    }
}
