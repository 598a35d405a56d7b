//! Core Plugin trait and types.
//!
//! All plugins implement the `Plugin` trait, providing a uniform interface
//! for the registry to discover, invoke, and describe capabilities.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Plugin description for LLM function calling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginSchema {
    /// Callable name exposed to the model.
    pub name: String,
    /// Human-readable description for the LLM.
    pub description: String,
    /// JSON Schema for the plugin's parameters.
    pub parameters: Value,
}

/// Trait for agent plugins.
///
/// Each plugin provides:
/// - `name()`: unique identifier
/// - `description()`: what the plugin does
/// - `version()`: semver string
/// - `execute()`: async function to run the plugin
/// - `schema()`: function-calling schema
///
/// `initialize()` runs once at registration, `cleanup()` at unregistration;
/// both default to no-ops for plugins without resources to manage.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Unique plugin name.
    fn name(&self) -> &str;

    /// Description shown when listing plugins.
    fn description(&self) -> &str;

    /// Plugin version, e.g. "1.0.0".
    fn version(&self) -> &str;

    /// Whether the plugin starts enabled when registered.
    fn enabled_by_default(&self) -> bool {
        true
    }

    /// One-time setup at registration.
    async fn initialize(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Execute the plugin against an input context object.
    async fn execute(&self, context: &Value) -> anyhow::Result<Value>;

    /// Release resources at unregistration.
    async fn cleanup(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Function-calling schema describing the plugin's parameters.
    fn schema(&self) -> anyhow::Result<PluginSchema>;
}

/// Pull a required, non-empty string field out of an execution context.
pub(crate) fn required_str<'a>(context: &'a Value, field: &str) -> anyhow::Result<&'a str> {
    let value = context
        .get(field)
        .ok_or_else(|| anyhow::anyhow!("missing required field: {field}"))?;
    let s = value
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("field {field} must be a string"))?;
    if s.trim().is_empty() {
        anyhow::bail!("field {field} must not be empty");
    }
    Ok(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn schema_serializes() {
        let schema = PluginSchema {
            name: "test".to_string(),
            description: "A test plugin".to_string(),
            parameters: json!({"type": "object"}),
        };
        let raw = serde_json::to_string(&schema).unwrap();
        assert!(raw.contains("\"name\":\"test\""));
    }

    #[test]
    fn required_str_validates() {
        let ctx = json!({"query": "rust", "count": 3, "blank": "  "});
        assert_eq!(required_str(&ctx, "query").unwrap(), "rust");
        assert!(required_str(&ctx, "missing").is_err());
        assert!(required_str(&ctx, "count").is_err());
        assert!(required_str(&ctx, "blank").is_err());
    }
}
