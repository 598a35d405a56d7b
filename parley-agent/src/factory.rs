//! Caller-owned provider cache keyed by configuration fingerprint.
//!
//! Agents sharing equivalent provider settings (endpoint, model,
//! temperature, max_tokens) reuse one provider instance. The cache is an
//! explicit object the caller owns and passes around; there is no global
//! state.

use crate::provider::ChatProvider;
use parley_common::{AgentConfig, Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

type ProviderBuilder =
    dyn Fn(&AgentConfig) -> anyhow::Result<Arc<dyn ChatProvider>> + Send + Sync;

/// Maps configuration fingerprints to live providers.
pub struct ProviderCache {
    builder: Box<ProviderBuilder>,
    providers: Mutex<HashMap<String, Arc<dyn ChatProvider>>>,
}

impl ProviderCache {
    /// Create a cache with the closure used to construct missing providers.
    pub fn new<F>(builder: F) -> Self
    where
        F: Fn(&AgentConfig) -> anyhow::Result<Arc<dyn ChatProvider>> + Send + Sync + 'static,
    {
        Self {
            builder: Box::new(builder),
            providers: Mutex::new(HashMap::new()),
        }
    }

    /// Return the provider for `config`, building it on first use.
    pub fn get_or_create(&self, config: &AgentConfig) -> Result<Arc<dyn ChatProvider>> {
        let fingerprint = config.fingerprint();
        let mut providers = self.providers.lock().unwrap();

        if let Some(provider) = providers.get(&fingerprint) {
            tracing::debug!(%fingerprint, "Provider reused from cache");
            return Ok(Arc::clone(provider));
        }

        let provider = (self.builder)(config).map_err(|e| {
            Error::validation("provider", format!("construction failed: {e}"), &fingerprint)
        })?;
        providers.insert(fingerprint.clone(), Arc::clone(&provider));
        tracing::info!(%fingerprint, provider = provider.name(), "Provider created");
        Ok(provider)
    }

    /// Drop every cached provider.
    pub fn clear(&self) {
        self.providers.lock().unwrap().clear();
        tracing::info!("Provider cache cleared");
    }

    pub fn len(&self) -> usize {
        self.providers.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Completion;
    use async_trait::async_trait;
    use parley_context::Message;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubProvider;

    #[async_trait]
    impl ChatProvider for StubProvider {
        fn name(&self) -> &str {
            "stub"
        }

        async fn complete(&self, _messages: &[Message]) -> anyhow::Result<Completion> {
            Ok(Completion {
                text: "ok".to_string(),
                usage: None,
            })
        }
    }

    fn config(model: &str) -> AgentConfig {
        let mut config = AgentConfig::new("https://example.invalid", "key");
        config.model = model.to_string();
        config
    }

    #[test]
    fn reuses_by_fingerprint() {
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&builds);
        let cache = ProviderCache::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(StubProvider) as Arc<dyn ChatProvider>)
        });

        let a = cache.get_or_create(&config("model-a")).unwrap();
        let b = cache.get_or_create(&config("model-a")).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(builds.load(Ordering::SeqCst), 1);

        cache.get_or_create(&config("model-b")).unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn clear_forces_rebuild() {
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&builds);
        let cache = ProviderCache::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(StubProvider) as Arc<dyn ChatProvider>)
        });

        cache.get_or_create(&config("m")).unwrap();
        cache.clear();
        assert!(cache.is_empty());
        cache.get_or_create(&config("m")).unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn builder_failure_surfaces() {
        let cache = ProviderCache::new(|_| anyhow::bail!("no credentials"));
        let err = match cache.get_or_create(&config("m")) {
            Ok(_) => panic!("builder failure must not produce a provider"),
            Err(e) => e,
        };
        assert!(err.is_validation());
        assert!(cache.is_empty());
    }
}
