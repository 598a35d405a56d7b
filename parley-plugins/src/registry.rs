//! Plugin lifecycle and dispatch.

use crate::traits::{Plugin, PluginSchema};
use parley_common::{Error, PluginOp, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Summary row returned by [`PluginRegistry::list`].
#[derive(Debug, Clone, Serialize)]
pub struct PluginInfo {
    pub name: String,
    pub description: String,
    pub version: String,
    pub enabled: bool,
}

struct PluginEntry {
    plugin: Arc<dyn Plugin>,
    enabled: bool,
}

/// Owns registered plugins and their enabled/disabled state.
///
/// The inner lock is released before any plugin method is awaited, so a
/// slow plugin never blocks registry operations.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: Mutex<HashMap<String, PluginEntry>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate, initialize, and register a plugin.
    ///
    /// Registering a name that already exists replaces the previous plugin
    /// with a warning. A failed `initialize` aborts the registration.
    pub async fn register(&self, plugin: Arc<dyn Plugin>) -> Result<()> {
        let name = plugin.name().to_string();
        Self::validate(plugin.as_ref())
            .map_err(|e| Error::plugin(&name, PluginOp::Register, e))?;

        plugin
            .initialize()
            .await
            .map_err(|e| Error::plugin(&name, PluginOp::Register, e))?;

        let enabled = plugin.enabled_by_default();
        let replaced = self
            .plugins
            .lock()
            .unwrap()
            .insert(name.clone(), PluginEntry { plugin, enabled })
            .is_some();

        if replaced {
            tracing::warn!(plugin = %name, "Plugin already registered, replaced");
        }
        tracing::info!(plugin = %name, enabled, "Plugin registered");
        Ok(())
    }

    /// Remove a plugin after running its cleanup.
    ///
    /// A failed cleanup aborts the unregistration; the plugin stays
    /// registered.
    pub async fn unregister(&self, name: &str) -> Result<()> {
        let plugin = {
            let plugins = self.plugins.lock().unwrap();
            let entry = plugins
                .get(name)
                .ok_or_else(|| Error::not_found(format!("plugin {name}")))?;
            Arc::clone(&entry.plugin)
        };

        plugin
            .cleanup()
            .await
            .map_err(|e| Error::plugin(name, PluginOp::Unregister, e))?;

        self.plugins.lock().unwrap().remove(name);
        tracing::info!(plugin = name, "Plugin unregistered");
        Ok(())
    }

    /// Execute a plugin by name against a context object.
    pub async fn execute(&self, name: &str, context: &Value) -> Result<Value> {
        let plugin = {
            let plugins = self.plugins.lock().unwrap();
            let entry = plugins
                .get(name)
                .ok_or_else(|| Error::not_found(format!("plugin {name}")))?;
            if !entry.enabled {
                return Err(Error::PluginDisabled(name.to_string()));
            }
            Arc::clone(&entry.plugin)
        };

        tracing::debug!(plugin = name, "Plugin execution started");
        let result = plugin
            .execute(context)
            .await
            .map_err(|e| Error::plugin(name, PluginOp::Execute, e))?;
        tracing::debug!(plugin = name, "Plugin execution completed");
        Ok(result)
    }

    pub fn enable(&self, name: &str) -> Result<()> {
        self.set_enabled(name, true)
    }

    pub fn disable(&self, name: &str) -> Result<()> {
        self.set_enabled(name, false)
    }

    fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let mut plugins = self.plugins.lock().unwrap();
        let entry = plugins
            .get_mut(name)
            .ok_or_else(|| Error::not_found(format!("plugin {name}")))?;
        entry.enabled = enabled;
        tracing::info!(plugin = name, enabled, "Plugin state changed");
        Ok(())
    }

    /// Whether a plugin exists and is enabled.
    pub fn is_enabled(&self, name: &str) -> bool {
        self.plugins
            .lock()
            .unwrap()
            .get(name)
            .map_or(false, |e| e.enabled)
    }

    /// Function-calling schemas of every enabled plugin.
    ///
    /// A plugin whose schema fails to build is skipped with a log, not
    /// propagated; one bad plugin must not hide the rest.
    pub fn schemas(&self) -> Vec<PluginSchema> {
        let enabled: Vec<Arc<dyn Plugin>> = {
            let plugins = self.plugins.lock().unwrap();
            plugins
                .values()
                .filter(|e| e.enabled)
                .map(|e| Arc::clone(&e.plugin))
                .collect()
        };

        let mut schemas = Vec::with_capacity(enabled.len());
        for plugin in enabled {
            match plugin.schema() {
                Ok(schema) => schemas.push(schema),
                Err(e) => {
                    tracing::error!(plugin = plugin.name(), error = %e, "Schema build failed")
                }
            }
        }
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Summaries of every registered plugin, enabled or not.
    pub fn list(&self) -> Vec<PluginInfo> {
        let plugins = self.plugins.lock().unwrap();
        let mut infos: Vec<PluginInfo> = plugins
            .values()
            .map(|e| PluginInfo {
                name: e.plugin.name().to_string(),
                description: e.plugin.description().to_string(),
                version: e.plugin.version().to_string(),
                enabled: e.enabled,
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    pub fn len(&self) -> usize {
        self.plugins.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn validate(plugin: &dyn Plugin) -> anyhow::Result<()> {
        if plugin.name().trim().is_empty() {
            anyhow::bail!("plugin name must not be empty");
        }
        if plugin.description().trim().is_empty() {
            anyhow::bail!("plugin description must not be empty");
        }
        if plugin.version().trim().is_empty() {
            anyhow::bail!("plugin version must not be empty");
        }
        let schema = plugin
            .schema()
            .map_err(|e| anyhow::anyhow!("schema validation failed: {e}"))?;
        if schema.name.trim().is_empty() {
            anyhow::bail!("schema name must not be empty");
        }
        Ok(())
    }
}
