//! Plugin Manager — discovers, validates, and registers plugins into the
//! Tool and Workflow registries.
//!
//! Grounded on `registry/manager.rs`'s multi-source coordinator pattern
//! (`RegistryManager` holding a `Vec<Box<dyn RegistrySource>>`), reapplied
//! per spec.md §9's redesign note: process-static registration at startup
//! plus an optional descriptor-file loader, replacing the distilled spec's
//! file-glob `plugin.{ts,js}` discovery (not portable to a compiled,
//! statically-linked binary). The manifest loader imitates
//! `registry/local.rs`'s file-backed registry loading.

use crate::registry::tools::{ToolDefinition, ToolHandler, ToolRegistry};
use crate::registry::workflows::{Workflow, WorkflowEngine};
use crate::{McpError, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

/// A plugin registered directly in process, bypassing file discovery —
/// the primary registration path for a compiled binary.
pub struct StaticPlugin {
    pub name: String,
    pub version: String,
    pub description: String,
    pub tools: Vec<(ToolDefinition, Arc<dyn ToolHandler>)>,
    pub workflows: Vec<Workflow>,
}

impl StaticPlugin {
    fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.version.is_empty() || self.description.is_empty() {
            return Err(McpError::validation("plugin must declare name, version, and description"));
        }
        if self.tools.is_empty() && self.workflows.is_empty() {
            return Err(McpError::validation(
                "plugin must declare at least one tool or workflow",
            ));
        }
        Ok(())
    }
}

/// On-disk descriptor for a subprocess-backed plugin. Subprocess tool
/// invocation itself is out of scope here; the manifest only names what
/// the plugin provides so operators can audit what got registered.
#[derive(Debug, Deserialize)]
struct PluginManifest {
    name: String,
    version: String,
    description: String,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    tool_names: Vec<String>,
    #[serde(default)]
    workflow_names: Vec<String>,
}

pub struct PluginManagerConfig {
    pub allow_list: Option<HashSet<String>>,
    pub block_list: HashSet<String>,
}

impl Default for PluginManagerConfig {
    fn default() -> Self {
        Self { allow_list: None, block_list: HashSet::new() }
    }
}

/// Orchestration only: registers/unregisters named tools and workflows on
/// behalf of a plugin, tracking provenance so unload removes only that
/// plugin's names. Registries themselves stay plugin-agnostic.
pub struct PluginManager {
    tools: Arc<ToolRegistry>,
    workflows: Arc<WorkflowEngine>,
    config: PluginManagerConfig,
    loaded: parking_lot::RwLock<std::collections::HashMap<String, LoadedPlugin>>,
}

struct LoadedPlugin {
    tool_names: Vec<String>,
    workflow_names: Vec<String>,
}

impl PluginManager {
    pub fn new(tools: Arc<ToolRegistry>, workflows: Arc<WorkflowEngine>, config: PluginManagerConfig) -> Self {
        Self { tools, workflows, config, loaded: parking_lot::RwLock::new(std::collections::HashMap::new()) }
    }

    fn is_allowed(&self, name: &str) -> bool {
        if self.config.block_list.contains(name) {
            return false;
        }
        match &self.config.allow_list {
            Some(allowed) => allowed.contains(name),
            None => true,
        }
    }

    /// Register a process-static plugin's tools and workflows.
    pub fn load_static(&self, plugin: StaticPlugin) -> Result<()> {
        if !self.is_allowed(&plugin.name) {
            return Err(McpError::authorization("plugin_blocked"));
        }
        plugin.validate()?;

        let mut tool_names = Vec::new();
        let mut workflow_names = Vec::new();
        for (definition, handler) in plugin.tools {
            tool_names.push(definition.name.clone());
            self.tools.register_tool(definition, handler)?;
        }
        for workflow in plugin.workflows {
            workflow_names.push(workflow.name.clone());
            self.workflows.register(workflow)?;
        }

        self.loaded.write().insert(plugin.name, LoadedPlugin { tool_names, workflow_names });
        Ok(())
    }

    /// Reads a JSON plugin manifest from `path` and records it as loaded
    /// without attempting to register tools/workflows that don't already
    /// exist in-process — a descriptor-file plugin names what a subprocess
    /// would provide, but invoking that subprocess is left to the registry
    /// source the manifest points at via `command`.
    pub async fn load_manifest(&self, path: impl AsRef<Path>) -> Result<()> {
        let raw = tokio::fs::read_to_string(path.as_ref())
            .await
            .map_err(|e| McpError::config(format!("failed to read plugin manifest: {e}")))?;
        let manifest: PluginManifest = serde_json::from_str(&raw)
            .map_err(|e| McpError::config(format!("invalid plugin manifest: {e}")))?;

        if !self.is_allowed(&manifest.name) {
            return Err(McpError::authorization("plugin_blocked"));
        }
        if manifest.name.is_empty() || manifest.version.is_empty() || manifest.description.is_empty() {
            return Err(McpError::validation("plugin manifest must declare name, version, description"));
        }
        if manifest.tool_names.is_empty() && manifest.workflow_names.is_empty() && manifest.command.is_none() {
            return Err(McpError::validation(
                "plugin manifest must declare tools, workflows, or a command",
            ));
        }

        self.loaded.write().insert(
            manifest.name,
            LoadedPlugin { tool_names: manifest.tool_names, workflow_names: manifest.workflow_names },
        );
        Ok(())
    }

    /// Unloads a previously loaded plugin, removing only the tool/workflow
    /// names it registered.
    pub fn unload(&self, plugin_name: &str) {
        if let Some(loaded) = self.loaded.write().remove(plugin_name) {
            for name in &loaded.tool_names {
                self.tools.unregister_tool(name);
            }
            for name in &loaded.workflow_names {
                self.workflows.unregister(name);
            }
        }
    }

    pub fn loaded_plugins(&self) -> Vec<String> {
        self.loaded.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tools::{HandlerMode, ToolInvocationExtra, ToolResult};
    use serde_json::{json, Value};

    fn manager() -> PluginManager {
        PluginManager::new(
            Arc::new(ToolRegistry::new()),
            Arc::new(WorkflowEngine::new()),
            PluginManagerConfig::default(),
        )
    }

    fn sample_plugin() -> StaticPlugin {
        StaticPlugin {
            name: "demo".into(),
            version: "1.0.0".into(),
            description: "demo plugin".into(),
            tools: vec![(
                ToolDefinition {
                    name: "demo_tool".into(),
                    description: "demo".into(),
                    input_schema: json!({"type": "object"}),
                    handler_mode: HandlerMode::Native,
                },
                Arc::new(|_args: Value, _extra: ToolInvocationExtra| async { Ok(ToolResult::ok("ok")) }),
            )],
            workflows: vec![],
        }
    }

    #[test]
    fn load_and_unload_removes_only_its_own_names() {
        let mgr = manager();
        mgr.load_static(sample_plugin()).unwrap();
        assert!(mgr.tools.has_tool("demo_tool"));
        mgr.unload("demo");
        assert!(!mgr.tools.has_tool("demo_tool"));
    }

    #[test]
    fn rejects_plugin_missing_identity_fields() {
        let mgr = manager();
        let mut plugin = sample_plugin();
        plugin.description = String::new();
        assert!(mgr.load_static(plugin).is_err());
    }

    #[test]
    fn block_list_rejects_named_plugin() {
        let mgr = PluginManager::new(
            Arc::new(ToolRegistry::new()),
            Arc::new(WorkflowEngine::new()),
            PluginManagerConfig { allow_list: None, block_list: ["demo".to_string()].into_iter().collect() },
        );
        assert!(mgr.load_static(sample_plugin()).is_err());
    }
}
