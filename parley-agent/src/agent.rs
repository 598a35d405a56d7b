//! The conversational agent tying every component together.

use crate::generator::ResponseGenerator;
use crate::processor::MessageProcessor;
use crate::provider::ChatProvider;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use parley_common::{AgentConfig, Error, Result};
use parley_context::{ContextWindow, Conversation, Message, Role};
use parley_plugins::{PluginRegistry, PluginSchema};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Rolled-up performance counters for one agent.
#[derive(Debug, Clone, Serialize)]
pub struct AgentMetrics {
    pub total_messages: u64,
    pub total_tokens: u64,
    pub total_response_time_secs: f64,
    pub average_response_time_secs: f64,
    pub plugin_calls: u64,
}

#[derive(Default)]
struct MetricsState {
    total_messages: u64,
    total_response_time_secs: f64,
    plugin_calls: u64,
}

struct AgentInner {
    config: AgentConfig,
    processor: MessageProcessor,
    generator: ResponseGenerator,
    window: ContextWindow,
    conversation: Mutex<Conversation>,
    plugins: Option<Arc<PluginRegistry>>,
    metrics: Mutex<MetricsState>,
}

impl AgentInner {
    fn record_turn(&self, elapsed_secs: f64) {
        let mut metrics = self.metrics.lock().unwrap();
        metrics.total_messages += 1;
        metrics.total_response_time_secs += elapsed_secs;
    }

    fn record_assistant(&self, response: &str) -> Result<()> {
        self.conversation
            .lock()
            .unwrap()
            .add_message(Role::Assistant, response)?;
        self.window.push(Message::new(Role::Assistant, response)?);
        Ok(())
    }
}

/// Full conversation pipeline: preprocess, validate, window the context,
/// generate, and track metrics.
///
/// Cheap to clone; clones share the same conversation and window.
#[derive(Clone)]
pub struct ConversationAgent {
    inner: Arc<AgentInner>,
}

impl ConversationAgent {
    /// Build an agent without plugins.
    pub fn new(config: AgentConfig, provider: Arc<dyn ChatProvider>) -> Result<Self> {
        Self::build(config, provider, None)
    }

    /// Build an agent with a plugin registry for schema export and direct
    /// plugin execution.
    pub fn with_plugins(
        config: AgentConfig,
        provider: Arc<dyn ChatProvider>,
        plugins: Arc<PluginRegistry>,
    ) -> Result<Self> {
        Self::build(config, provider, Some(plugins))
    }

    fn build(
        config: AgentConfig,
        provider: Arc<dyn ChatProvider>,
        plugins: Option<Arc<PluginRegistry>>,
    ) -> Result<Self> {
        config.validate()?;

        let processor = MessageProcessor::new(config.max_message_length);
        let generator = ResponseGenerator::new(provider, &config);
        let window = ContextWindow::new(config.max_context_messages, &config.model);
        if let Some(system) = &config.system_message {
            window.push(Message::new(Role::System, system)?);
        }

        tracing::info!(
            model = %config.model,
            max_context_messages = config.max_context_messages,
            has_plugins = plugins.is_some(),
            "Conversation agent initialized"
        );

        Ok(Self {
            inner: Arc::new(AgentInner {
                config,
                processor,
                generator,
                window,
                conversation: Mutex::new(Conversation::new()),
                plugins,
                metrics: Mutex::new(MetricsState::default()),
            }),
        })
    }

    /// Process one user message and return the assistant's response.
    pub async fn chat(&self, user_message: &str) -> Result<String> {
        let started = Instant::now();
        let inner = &self.inner;

        let context = self.accept_user_message(user_message)?;
        let response = inner.generator.generate(&context).await?;
        inner.record_assistant(&response)?;
        inner.record_turn(started.elapsed().as_secs_f64());

        tracing::info!(
            response_length = response.len(),
            elapsed_secs = started.elapsed().as_secs_f64(),
            "Chat turn completed"
        );
        Ok(response)
    }

    /// Process one user message, returning the response as a token stream.
    ///
    /// The full response is appended to the conversation once the stream
    /// has been driven to completion.
    pub async fn chat_streaming(
        &self,
        user_message: &str,
    ) -> Result<BoxStream<'static, anyhow::Result<String>>> {
        let started = Instant::now();
        let context = self.accept_user_message(user_message)?;
        let mut upstream = self.inner.generator.generate_streaming(&context).await?;

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut full = String::new();
            while let Some(chunk) = upstream.next().await {
                match chunk {
                    Ok(token) => {
                        full.push_str(&token);
                        if tx.send(Ok(token)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        break;
                    }
                }
            }
            if !full.is_empty() {
                if let Err(e) = inner.record_assistant(&full) {
                    tracing::warn!(error = %e, "Failed to record streamed response");
                }
                inner.record_turn(started.elapsed().as_secs_f64());
            }
        });

        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(stream.boxed())
    }

    fn accept_user_message(&self, user_message: &str) -> Result<Vec<Message>> {
        let inner = &self.inner;
        let processed = inner.processor.preprocess(user_message);
        inner.processor.validate(&processed)?;

        let intent = inner.processor.extract_intent(&processed);
        tracing::debug!(kind = ?intent.kind, confidence = intent.confidence, "Intent classified");

        inner
            .conversation
            .lock()
            .unwrap()
            .add_message(Role::User, &processed)?;
        inner.window.push(Message::new(Role::User, &processed)?);

        Ok(inner.window.context(inner.config.max_tokens as usize))
    }

    /// Run a plugin directly through the configured registry.
    pub async fn execute_plugin(&self, name: &str, context: &Value) -> Result<Value> {
        let registry = self
            .inner
            .plugins
            .as_ref()
            .ok_or_else(|| Error::not_found("plugin registry"))?;
        let result = registry.execute(name, context).await?;
        self.inner.metrics.lock().unwrap().plugin_calls += 1;
        Ok(result)
    }

    /// Function-calling schemas of the enabled plugins, if any.
    pub fn plugin_schemas(&self) -> Vec<PluginSchema> {
        self.inner
            .plugins
            .as_ref()
            .map(|r| r.schemas())
            .unwrap_or_default()
    }

    /// Persist the live context window to a JSON document.
    pub fn save_conversation(&self, path: impl AsRef<Path>) -> Result<()> {
        self.inner.window.persist(path)
    }

    /// Replace the conversation and window with a persisted document.
    pub fn load_conversation(&self, path: impl AsRef<Path>) -> Result<()> {
        let restored = ContextWindow::restore(path)?;
        let messages = restored.context(usize::MAX);

        {
            let mut conversation = self.inner.conversation.lock().unwrap();
            *conversation = Conversation::new();
            for message in &messages {
                conversation.add_message(message.role, &message.content)?;
            }
        }

        self.inner.window.clear();
        for message in messages {
            self.inner.window.push(message);
        }
        tracing::info!("Conversation loaded");
        Ok(())
    }

    /// Clear the conversation, the window, and the counters. The configured
    /// system message is reinstated.
    pub fn reset(&self) -> Result<()> {
        self.inner.conversation.lock().unwrap().clear();
        self.inner.window.clear();
        if let Some(system) = &self.inner.config.system_message {
            self.inner.window.push(Message::new(Role::System, system)?);
        }
        *self.inner.metrics.lock().unwrap() = MetricsState::default();
        self.inner.generator.clear_cache();
        tracing::info!("Conversation reset");
        Ok(())
    }

    /// Current counters, token usage included.
    pub fn metrics(&self) -> AgentMetrics {
        let metrics = self.inner.metrics.lock().unwrap();
        let average = if metrics.total_messages > 0 {
            metrics.total_response_time_secs / metrics.total_messages as f64
        } else {
            0.0
        };
        AgentMetrics {
            total_messages: metrics.total_messages,
            total_tokens: self.inner.generator.token_usage().total_tokens,
            total_response_time_secs: metrics.total_response_time_secs,
            average_response_time_secs: average,
            plugin_calls: metrics.plugin_calls,
        }
    }

    /// Human-readable one-paragraph status of the conversation.
    pub fn summary(&self) -> String {
        let (id, message_count) = {
            let conversation = self.inner.conversation.lock().unwrap();
            (conversation.id, conversation.len())
        };
        let metrics = self.metrics();
        format!(
            "Conversation {id}: {message_count} messages, {} window tokens, \
             {:.2}s average response time",
            self.inner.window.total_tokens(),
            metrics.average_response_time_secs,
        )
    }

    /// The most recent `limit` recorded messages (all when `None`).
    pub fn history(&self, limit: Option<usize>) -> Vec<Message> {
        self.inner.conversation.lock().unwrap().history(limit).to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{Completion, TokenUsage};
    use async_trait::async_trait;
    use parley_plugins::CalculatorPlugin;
    use serde_json::json;

    struct EchoProvider;

    #[async_trait]
    impl ChatProvider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }

        async fn complete(&self, messages: &[Message]) -> anyhow::Result<Completion> {
            let last = messages
                .last()
                .map(|m| m.content.as_str())
                .unwrap_or_default();
            Ok(Completion {
                text: format!("Echo: {last}"),
                usage: Some(TokenUsage {
                    prompt_tokens: 5,
                    completion_tokens: 5,
                    total_tokens: 10,
                }),
            })
        }
    }

    fn config() -> AgentConfig {
        let mut config = AgentConfig::new("https://example.invalid", "test-key");
        config.system_message = Some("You are a test assistant".to_string());
        config
    }

    fn agent() -> ConversationAgent {
        ConversationAgent::new(config(), Arc::new(EchoProvider)).unwrap()
    }

    #[tokio::test]
    async fn chat_runs_the_full_pipeline() {
        let agent = agent();
        let response = agent.chat("  Hello   there  ").await.unwrap();
        assert_eq!(response, "Echo: Hello there");

        let history = agent.history(None);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[0].content, "Hello there");
        assert_eq!(history[1].role, Role::Assistant);

        let metrics = agent.metrics();
        assert_eq!(metrics.total_messages, 1);
        assert_eq!(metrics.total_tokens, 10);
    }

    #[tokio::test]
    async fn empty_message_is_rejected() {
        let agent = agent();
        let err = agent.chat("   ").await.unwrap_err();
        assert!(err.is_validation());
        assert!(agent.history(None).is_empty());
    }

    #[tokio::test]
    async fn streaming_records_the_full_response() {
        let agent = agent();
        let mut stream = agent.chat_streaming("Hi").await.unwrap();

        let mut text = String::new();
        while let Some(chunk) = stream.next().await {
            text.push_str(&chunk.unwrap());
        }
        assert_eq!(text, "Echo: Hi");

        // The recording task runs after the stream is drained
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let history = agent.history(None);
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content, "Echo: Hi");
    }

    #[tokio::test]
    async fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conversation.json");

        let agent = agent();
        agent.chat("Remember this").await.unwrap();
        agent.save_conversation(&path).unwrap();

        let fresh = ConversationAgent::new(config(), Arc::new(EchoProvider)).unwrap();
        fresh.load_conversation(&path).unwrap();
        let history = fresh.history(None);
        assert_eq!(history.len(), 3); // system + user + assistant
        assert!(history.iter().any(|m| m.content == "Remember this"));
    }

    #[tokio::test]
    async fn reset_clears_state_but_keeps_system_message() {
        let agent = agent();
        agent.chat("Hello").await.unwrap();
        agent.reset().unwrap();

        assert!(agent.history(None).is_empty());
        assert_eq!(agent.metrics().total_messages, 0);
        // Window still carries the system prompt
        assert_eq!(agent.inner.window.len(), 1);
    }

    #[tokio::test]
    async fn plugins_are_optional() {
        let agent = agent();
        assert!(agent.plugin_schemas().is_empty());
        let err = agent
            .execute_plugin("calculator", &json!({}))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn plugin_execution_counts_in_metrics() {
        let registry = Arc::new(PluginRegistry::new());
        registry
            .register(Arc::new(CalculatorPlugin::new()))
            .await
            .unwrap();

        let agent =
            ConversationAgent::with_plugins(config(), Arc::new(EchoProvider), registry).unwrap();
        assert_eq!(agent.plugin_schemas().len(), 1);

        let result = agent
            .execute_plugin("calculator", &json!({"expression": "6 * 7"}))
            .await
            .unwrap();
        assert_eq!(result["result"], 42.0);
        assert_eq!(agent.metrics().plugin_calls, 1);
    }
}
