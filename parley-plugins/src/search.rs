//! Web search plugin with a pluggable backend and a TTL result cache.
//!
//! The backend abstraction keeps the plugin testable without network
//! access; the bundled backend queries the DuckDuckGo instant-answer API.

use crate::traits::{required_str, Plugin, PluginSchema};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const DEFAULT_BASE_URL: &str = "https://api.duckduckgo.com/";
const CACHE_TTL: Duration = Duration::from_secs(3600);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_SNIPPET_CHARS: usize = 200;
const MAX_RESULTS_LIMIT: usize = 20;

/// One search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// Source of raw search results.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> anyhow::Result<Vec<SearchResult>>;
}

/// Backend querying the DuckDuckGo instant-answer API.
pub struct DuckDuckGoBackend {
    base_url: String,
    client: reqwest::Client,
}

impl DuckDuckGoBackend {
    pub fn new() -> anyhow::Result<Self> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Point the backend at an alternate endpoint (used by tests).
    pub fn with_base_url(base_url: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }
}

#[async_trait]
impl SearchBackend for DuckDuckGoBackend {
    async fn search(&self, query: &str, max_results: usize) -> anyhow::Result<Vec<SearchResult>> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[("q", query), ("format", "json"), ("no_html", "1")])
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("search request failed: {e}"))?;

        if !response.status().is_success() {
            anyhow::bail!("search API returned status {}", response.status().as_u16());
        }

        let data: Value = response.json().await?;
        let mut results = Vec::new();

        // The abstract answer, when present, is the best single hit.
        if let (Some(abstract_text), Some(url)) = (
            data.get("AbstractText").and_then(Value::as_str).filter(|s| !s.is_empty()),
            data.get("AbstractURL").and_then(Value::as_str).filter(|s| !s.is_empty()),
        ) {
            let title = data
                .get("Heading")
                .and_then(Value::as_str)
                .unwrap_or(query);
            results.push(SearchResult {
                title: title.to_string(),
                url: url.to_string(),
                snippet: abstract_text.to_string(),
            });
        }

        let topics = data
            .get("RelatedTopics")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        for topic in topics {
            if results.len() >= max_results {
                break;
            }
            let (Some(text), Some(url)) = (
                topic.get("Text").and_then(Value::as_str),
                topic.get("FirstURL").and_then(Value::as_str),
            ) else {
                continue;
            };
            let title = text.split(" - ").next().unwrap_or(text);
            results.push(SearchResult {
                title: title.to_string(),
                url: url.to_string(),
                snippet: text.to_string(),
            });
        }

        results.truncate(max_results);
        Ok(results)
    }
}

/// TTL cache of formatted search output, keyed by query and result count.
#[derive(Default)]
pub struct SearchCache {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl SearchCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(query: &str, max_results: usize) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!("{}:{max_results}", query.to_lowercase().trim()));
        hex::encode(hasher.finalize())
    }

    fn get(&self, query: &str, max_results: usize) -> Option<String> {
        let key = Self::key(query, max_results);
        let mut entries = self.entries.lock().unwrap();
        match entries.get(&key) {
            Some((value, stored)) if stored.elapsed() < CACHE_TTL => Some(value.clone()),
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    fn put(&self, query: &str, max_results: usize, value: String) {
        let key = Self::key(query, max_results);
        self.entries.lock().unwrap().insert(key, (value, Instant::now()));
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
        tracing::info!("Search cache cleared");
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Plugin exposing web search to the model.
pub struct WebSearchPlugin {
    backend: Arc<dyn SearchBackend>,
    cache: SearchCache,
    default_max_results: usize,
}

impl WebSearchPlugin {
    pub fn new(backend: Arc<dyn SearchBackend>) -> Self {
        Self {
            backend,
            cache: SearchCache::new(),
            default_max_results: 5,
        }
    }

    pub fn cache(&self) -> &SearchCache {
        &self.cache
    }

    fn format_results(results: &[SearchResult]) -> String {
        if results.is_empty() {
            return "No search results found.".to_string();
        }

        let mut lines = Vec::with_capacity(results.len());
        for (i, result) in results.iter().enumerate() {
            let snippet = if result.snippet.chars().count() > MAX_SNIPPET_CHARS {
                let truncated: String =
                    result.snippet.chars().take(MAX_SNIPPET_CHARS - 3).collect();
                format!("{truncated}...")
            } else {
                result.snippet.clone()
            };
            lines.push(format!(
                "{}. **{}**\n   URL: {}\n   {}\n",
                i + 1,
                result.title,
                result.url,
                snippet
            ));
        }
        lines.join("\n")
    }
}

#[async_trait]
impl Plugin for WebSearchPlugin {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Searches the web and returns titles, URLs, and snippets"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    async fn execute(&self, context: &Value) -> anyhow::Result<Value> {
        let query = required_str(context, "query")?.trim().to_string();
        let max_results = context
            .get("max_results")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(self.default_max_results)
            .clamp(1, MAX_RESULTS_LIMIT);

        if let Some(cached) = self.cache.get(&query, max_results) {
            tracing::info!(%query, "Search served from cache");
            return Ok(json!({"query": query, "results": cached, "cached": true}));
        }

        tracing::info!(%query, max_results, "Web search started");
        let results = self.backend.search(&query, max_results).await?;
        let formatted = Self::format_results(&results);
        self.cache.put(&query, max_results, formatted.clone());

        tracing::info!(%query, result_count = results.len(), "Web search completed");
        Ok(json!({
            "query": query,
            "result_count": results.len(),
            "results": formatted,
            "cached": false,
        }))
    }

    async fn cleanup(&self) -> anyhow::Result<()> {
        self.cache.clear();
        Ok(())
    }

    fn schema(&self) -> anyhow::Result<PluginSchema> {
        Ok(PluginSchema {
            name: "search_web".to_string(),
            description: "Searches the web for current information. Returns a \
                          numbered list of results with titles, URLs, and snippets."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Search query"
                    },
                    "max_results": {
                        "type": "integer",
                        "description": "Maximum number of results (1-20, default 5)",
                        "default": 5
                    }
                },
                "required": ["query"]
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedBackend {
        calls: AtomicUsize,
        results: Vec<SearchResult>,
    }

    impl FixedBackend {
        fn new(results: Vec<SearchResult>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                results,
            }
        }
    }

    #[async_trait]
    impl SearchBackend for FixedBackend {
        async fn search(
            &self,
            _query: &str,
            max_results: usize,
        ) -> anyhow::Result<Vec<SearchResult>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.results.iter().take(max_results).cloned().collect())
        }
    }

    fn hit(i: usize) -> SearchResult {
        SearchResult {
            title: format!("Result {i}"),
            url: format!("https://example.com/{i}"),
            snippet: format!("Snippet for result {i}"),
        }
    }

    #[tokio::test]
    async fn formats_numbered_results() {
        let backend = Arc::new(FixedBackend::new(vec![hit(1), hit(2)]));
        let plugin = WebSearchPlugin::new(backend);

        let result = plugin.execute(&json!({"query": "rust"})).await.unwrap();
        let text = result["results"].as_str().unwrap();
        assert!(text.starts_with("1. **Result 1**"));
        assert!(text.contains("2. **Result 2**"));
        assert!(text.contains("URL: https://example.com/1"));
        assert_eq!(result["result_count"], 2);
    }

    #[tokio::test]
    async fn caches_repeated_queries() {
        let backend = Arc::new(FixedBackend::new(vec![hit(1)]));
        let plugin = WebSearchPlugin::new(Arc::clone(&backend) as Arc<dyn SearchBackend>);

        plugin.execute(&json!({"query": "rust"})).await.unwrap();
        let cached = plugin.execute(&json!({"query": "RUST "})).await.unwrap();
        assert_eq!(cached["cached"], true);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);

        // Different result count misses the cache
        plugin
            .execute(&json!({"query": "rust", "max_results": 3}))
            .await
            .unwrap();
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn clamps_max_results() {
        let backend = Arc::new(FixedBackend::new(
            (0..50).map(hit).collect::<Vec<_>>(),
        ));
        let plugin = WebSearchPlugin::new(Arc::clone(&backend) as Arc<dyn SearchBackend>);

        let result = plugin
            .execute(&json!({"query": "rust", "max_results": 100}))
            .await
            .unwrap();
        assert_eq!(result["result_count"], 20);

        let result = plugin
            .execute(&json!({"query": "go", "max_results": 0}))
            .await
            .unwrap();
        assert_eq!(result["result_count"], 1);
    }

    #[tokio::test]
    async fn empty_results_get_a_message() {
        let plugin = WebSearchPlugin::new(Arc::new(FixedBackend::new(vec![])));
        let result = plugin.execute(&json!({"query": "nothing"})).await.unwrap();
        assert_eq!(result["results"], "No search results found.");
    }

    #[test]
    fn long_snippets_are_truncated() {
        let long = SearchResult {
            title: "T".to_string(),
            url: "https://example.com".to_string(),
            snippet: "x".repeat(300),
        };
        let text = WebSearchPlugin::format_results(&[long]);
        assert!(text.contains(&format!("{}...", "x".repeat(197))));
        assert!(!text.contains(&"x".repeat(250)));
    }

    #[tokio::test]
    async fn cleanup_clears_cache() {
        let plugin = WebSearchPlugin::new(Arc::new(FixedBackend::new(vec![hit(1)])));
        plugin.execute(&json!({"query": "rust"})).await.unwrap();
        assert_eq!(plugin.cache().len(), 1);
        plugin.cleanup().await.unwrap();
        assert!(plugin.cache().is_empty());
    }

    #[tokio::test]
    async fn duckduckgo_backend_parses_responses() {
        use wiremock::matchers::{method, query_param};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("q", "rust language"))
            .and(query_param("format", "json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Heading": "Rust",
                "AbstractText": "A systems programming language.",
                "AbstractURL": "https://www.rust-lang.org",
                "RelatedTopics": [
                    {"Text": "Cargo - The Rust package manager", "FirstURL": "https://doc.rust-lang.org/cargo"},
                    {"Name": "category node without text"}
                ]
            })))
            .mount(&server)
            .await;

        let backend = DuckDuckGoBackend::with_base_url(server.uri()).unwrap();
        let results = backend.search("rust language", 5).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].title, "Rust");
        assert_eq!(results[0].url, "https://www.rust-lang.org");
        assert_eq!(results[1].title, "Cargo");
        assert_eq!(results[1].snippet, "Cargo - The Rust package manager");
    }
}
