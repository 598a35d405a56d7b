//! Response generation with retry, caching, and token accounting.

use crate::provider::{ChatProvider, TokenUsage};
use futures_util::stream::BoxStream;
use parley_common::{AgentConfig, Error, Result};
use parley_context::Message;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Generates responses through a [`ChatProvider`], retrying transient
/// failures with exponential backoff and caching completed responses by
/// message-list hash.
pub struct ResponseGenerator {
    provider: Arc<dyn ChatProvider>,
    max_retries: u32,
    base_delay: Duration,
    cache: Mutex<HashMap<String, String>>,
    usage: Mutex<TokenUsage>,
}

impl ResponseGenerator {
    pub fn new(provider: Arc<dyn ChatProvider>, config: &AgentConfig) -> Self {
        tracing::info!(
            provider = provider.name(),
            max_retries = config.max_retries,
            "Response generator initialized"
        );
        Self {
            provider,
            max_retries: config.max_retries.max(1),
            base_delay: DEFAULT_BASE_DELAY,
            cache: Mutex::new(HashMap::new()),
            usage: Mutex::new(TokenUsage::default()),
        }
    }

    /// Override the first backoff delay. Tests use this to avoid sleeping.
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    fn cache_key(messages: &[Message]) -> String {
        let doc: Vec<_> = messages
            .iter()
            .map(|m| json!({"role": m.role.to_string(), "content": m.content}))
            .collect();
        let mut hasher = Sha256::new();
        hasher.update(serde_json::to_string(&doc).unwrap_or_default());
        hex::encode(hasher.finalize())
    }

    /// Generate a response, consulting the cache first.
    pub async fn generate(&self, messages: &[Message]) -> Result<String> {
        let key = Self::cache_key(messages);
        if let Some(cached) = self.cache.lock().unwrap().get(&key).cloned() {
            tracing::info!("Response served from cache");
            return Ok(cached);
        }

        let mut last_error: Option<anyhow::Error> = None;
        for attempt in 0..self.max_retries {
            match self.provider.complete(messages).await {
                Ok(completion) => {
                    if let Some(usage) = &completion.usage {
                        self.usage.lock().unwrap().accumulate(usage);
                    }
                    self.cache
                        .lock()
                        .unwrap()
                        .insert(key, completion.text.clone());
                    tracing::info!(
                        message_count = messages.len(),
                        response_length = completion.text.len(),
                        "Response generated"
                    );
                    return Ok(completion.text);
                }
                Err(e) => {
                    if attempt + 1 < self.max_retries {
                        let wait = self.base_delay * 2u32.pow(attempt);
                        tracing::warn!(
                            attempt = attempt + 1,
                            max_retries = self.max_retries,
                            wait_ms = wait.as_millis() as u64,
                            error = %e,
                            "Generation attempt failed, retrying"
                        );
                        tokio::time::sleep(wait).await;
                    } else {
                        tracing::error!(
                            attempts = self.max_retries,
                            error = %e,
                            "All generation attempts failed"
                        );
                    }
                    last_error = Some(e);
                }
            }
        }

        let source = last_error.unwrap_or_else(|| anyhow::anyhow!("no attempts were made"));
        Err(Error::generation(self.max_retries, source))
    }

    /// Generate a response as a token stream.
    ///
    /// Only acquiring the stream is retried; chunks are not cached since a
    /// stream is consumed as it arrives.
    pub async fn generate_streaming(
        &self,
        messages: &[Message],
    ) -> Result<BoxStream<'static, anyhow::Result<String>>> {
        let mut last_error: Option<anyhow::Error> = None;
        for attempt in 0..self.max_retries {
            match self.provider.complete_streaming(messages).await {
                Ok(stream) => {
                    tracing::info!(message_count = messages.len(), "Streaming response started");
                    return Ok(stream);
                }
                Err(e) => {
                    if attempt + 1 < self.max_retries {
                        let wait = self.base_delay * 2u32.pow(attempt);
                        tracing::warn!(
                            attempt = attempt + 1,
                            error = %e,
                            "Streaming attempt failed, retrying"
                        );
                        tokio::time::sleep(wait).await;
                    }
                    last_error = Some(e);
                }
            }
        }

        let source = last_error.unwrap_or_else(|| anyhow::anyhow!("no attempts were made"));
        Err(Error::generation(self.max_retries, source))
    }

    /// Cumulative token usage across every successful generation.
    pub fn token_usage(&self) -> TokenUsage {
        *self.usage.lock().unwrap()
    }

    pub fn clear_cache(&self) {
        self.cache.lock().unwrap().clear();
        tracing::info!("Response cache cleared");
    }

    pub fn cache_len(&self) -> usize {
        self.cache.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Completion;
    use async_trait::async_trait;
    use parley_context::Role;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyProvider {
        calls: AtomicUsize,
        fail_first: usize,
    }

    #[async_trait]
    impl ChatProvider for FlakyProvider {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn complete(&self, _messages: &[Message]) -> anyhow::Result<Completion> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                anyhow::bail!("transient failure {call}");
            }
            Ok(Completion {
                text: "recovered".to_string(),
                usage: Some(TokenUsage {
                    prompt_tokens: 2,
                    completion_tokens: 3,
                    total_tokens: 5,
                }),
            })
        }
    }

    fn config() -> AgentConfig {
        let mut config = AgentConfig::new("https://example.invalid", "test-key");
        config.max_retries = 3;
        config
    }

    fn generator(fail_first: usize) -> (Arc<FlakyProvider>, ResponseGenerator) {
        let provider = Arc::new(FlakyProvider {
            calls: AtomicUsize::new(0),
            fail_first,
        });
        let gen = ResponseGenerator::new(
            Arc::clone(&provider) as Arc<dyn ChatProvider>,
            &config(),
        )
        .with_base_delay(Duration::from_millis(1));
        (provider, gen)
    }

    fn messages() -> Vec<Message> {
        vec![Message::new(Role::User, "hello").unwrap()]
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let (provider, gen) = generator(2);
        let response = gen.generate(&messages()).await.unwrap();
        assert_eq!(response, "recovered");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        assert_eq!(gen.token_usage().total_tokens, 5);
    }

    #[tokio::test]
    async fn exhausted_retries_fail_typed() {
        let (provider, gen) = generator(10);
        let err = gen.generate(&messages()).await.unwrap_err();
        assert!(err.is_generation());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn identical_requests_hit_the_cache() {
        let (provider, gen) = generator(0);
        let first = gen.generate(&messages()).await.unwrap();
        let second = gen.generate(&messages()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(gen.cache_len(), 1);

        gen.clear_cache();
        assert_eq!(gen.cache_len(), 0);
    }

    #[tokio::test]
    async fn cache_key_distinguishes_content() {
        let a = vec![Message::new(Role::User, "one").unwrap()];
        let b = vec![Message::new(Role::User, "two").unwrap()];
        assert_ne!(
            ResponseGenerator::cache_key(&a),
            ResponseGenerator::cache_key(&b)
        );

        // Timestamps do not affect the key
        let mut later = a.clone();
        later[0].timestamp = later[0].timestamp + chrono::Duration::hours(1);
        assert_eq!(
            ResponseGenerator::cache_key(&a),
            ResponseGenerator::cache_key(&later)
        );
    }

    #[tokio::test]
    async fn streaming_retries_acquisition() {
        use futures_util::StreamExt;

        let (provider, gen) = generator(1);
        let mut stream = gen.generate_streaming(&messages()).await.unwrap();
        let mut text = String::new();
        while let Some(chunk) = stream.next().await {
            text.push_str(&chunk.unwrap());
        }
        assert_eq!(text, "recovered");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }
}
