//! Tool Registry — schema-validated tool registration and invocation.
//!
//! Grounded on the teacher's `adapter/mod.rs` `Adapter` trait/`DashMap`
//! registration shape, reinterpreted for a runtime `register_tool`/
//! `invoke_tool` API (spec.md §4.9) instead of the teacher's compile-time
//! `beemflow_core_macros`-registered operation set, which has no
//! counterpart here.

use crate::{McpError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerMode {
    /// Args are validated against the tool's input schema before the
    /// handler runs; handler exceptions are wrapped into an error result.
    Managed,
    /// The handler receives raw args and owns its own validation/error
    /// shaping.
    Native,
}

impl Default for HandlerMode {
    fn default() -> Self {
        HandlerMode::Managed
    }
}

#[derive(Debug, Clone, Default)]
pub struct ToolInvocationExtra {
    pub request_id: String,
}

#[derive(Debug, Clone)]
pub struct ToolContent {
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct ToolResult {
    pub content: Vec<ToolContent>,
    pub is_error: bool,
}

impl ToolResult {
    pub fn ok(text: impl Into<String>) -> Self {
        Self { content: vec![ToolContent { text: text.into() }], is_error: false }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self { content: vec![ToolContent { text: text.into() }], is_error: true }
    }
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: Value, extra: ToolInvocationExtra) -> Result<ToolResult>;
}

#[async_trait]
impl<F, Fut> ToolHandler for F
where
    F: Fn(Value, ToolInvocationExtra) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<ToolResult>> + Send,
{
    async fn call(&self, args: Value, extra: ToolInvocationExtra) -> Result<ToolResult> {
        (self)(args, extra).await
    }
}

#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub handler_mode: HandlerMode,
}

#[derive(Default)]
struct ToolStatsInner {
    call_count: AtomicU64,
    last_called_ms: AtomicI64,
    /// Running average execution time in milliseconds, scaled by 1000 for
    /// integer atomic storage.
    avg_exec_ms_x1000: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
pub struct ToolStats {
    pub call_count: u64,
    pub last_called: Option<DateTime<Utc>>,
    pub avg_exec_ms: f64,
}

struct RegisteredTool {
    definition: ToolDefinition,
    handler: Arc<dyn ToolHandler>,
    stats: ToolStatsInner,
}

/// Runtime tool registry backed by a `DashMap`, imitating the teacher's
/// `adapter/mod.rs` read-mostly-after-startup `Adapter` registration shape.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Arc<DashMap<String, RegisteredTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_tool(
        &self,
        definition: ToolDefinition,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<()> {
        if self.tools.contains_key(&definition.name) {
            return Err(McpError::validation(format!(
                "tool '{}' is already registered",
                definition.name
            )));
        }
        self.tools.insert(
            definition.name.clone(),
            RegisteredTool { definition, handler, stats: ToolStatsInner::default() },
        );
        Ok(())
    }

    pub fn unregister_tool(&self, name: &str) {
        self.tools.remove(name);
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn list_tools(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|e| e.value().definition.clone()).collect()
    }

    pub async fn invoke_tool(
        &self,
        name: &str,
        args: Value,
        extra: ToolInvocationExtra,
    ) -> Result<ToolResult> {
        let Some(entry) = self.tools.get(name) else {
            return Err(McpError::not_found("tool", name));
        };

        let validated_args = match entry.definition.handler_mode {
            HandlerMode::Native => args,
            HandlerMode::Managed => match validate_against_schema(&entry.definition.input_schema, &args) {
                Ok(()) => args,
                Err(msg) => return Ok(ToolResult::error(format!("Validation error: {msg}"))),
            },
        };

        let handler = Arc::clone(&entry.handler);
        let start = Utc::now();
        let result = handler.call(validated_args, extra).await;
        let elapsed_ms = (Utc::now() - start).num_milliseconds().max(0) as u64;
        entry.stats.record(elapsed_ms);

        match result {
            Ok(r) => Ok(r),
            Err(e) => Ok(ToolResult::error(e.to_string())),
        }
    }

    pub fn stats(&self, name: &str) -> Option<ToolStats> {
        self.tools.get(name).map(|entry| entry.stats.snapshot())
    }
}

impl ToolStatsInner {
    fn record(&self, elapsed_ms: u64) {
        let count = self.call_count.fetch_add(1, Ordering::Relaxed) + 1;
        self.last_called_ms.store(Utc::now().timestamp_millis(), Ordering::Relaxed);
        let prev_avg_x1000 = self.avg_exec_ms_x1000.load(Ordering::Relaxed);
        let prev_avg = prev_avg_x1000 as f64 / 1000.0;
        let new_avg = prev_avg + (elapsed_ms as f64 - prev_avg) / count as f64;
        self.avg_exec_ms_x1000.store((new_avg * 1000.0) as u64, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ToolStats {
        let last_ms = self.last_called_ms.load(Ordering::Relaxed);
        ToolStats {
            call_count: self.call_count.load(Ordering::Relaxed),
            last_called: if last_ms == 0 {
                None
            } else {
                DateTime::from_timestamp_millis(last_ms)
            },
            avg_exec_ms: self.avg_exec_ms_x1000.load(Ordering::Relaxed) as f64 / 1000.0,
        }
    }
}

/// Minimal presence/type check against a JSON Schema object's top-level
/// `required`/`properties.*.type`. Full schema validation for nested shapes
/// is delegated to `jsonschema` when a definition needs more than this.
fn validate_against_schema(schema: &Value, args: &Value) -> std::result::Result<(), String> {
    let compiled = jsonschema::validator_for(schema)
        .map_err(|e| format!("invalid schema: {e}"))?;
    let errors: Vec<String> = compiled.iter_errors(args).map(|e| e.to_string()).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo_handler() -> Arc<dyn ToolHandler> {
        Arc::new(|args: Value, _extra: ToolInvocationExtra| async move {
            Ok(ToolResult::ok(args.to_string()))
        })
    }

    #[tokio::test]
    async fn managed_mode_rejects_invalid_args() {
        let registry = ToolRegistry::new();
        registry
            .register_tool(
                ToolDefinition {
                    name: "echo".into(),
                    description: "echoes".into(),
                    input_schema: json!({"type": "object", "required": ["msg"], "properties": {"msg": {"type": "string"}}}),
                    handler_mode: HandlerMode::Managed,
                },
                echo_handler(),
            )
            .unwrap();

        let result = registry.invoke_tool("echo", json!({}), ToolInvocationExtra::default()).await.unwrap();
        assert!(result.is_error);
        assert!(result.content[0].text.starts_with("Validation error"));
    }

    #[tokio::test]
    async fn managed_mode_invokes_handler_on_valid_args() {
        let registry = ToolRegistry::new();
        registry
            .register_tool(
                ToolDefinition {
                    name: "echo".into(),
                    description: "echoes".into(),
                    input_schema: json!({"type": "object", "required": ["msg"], "properties": {"msg": {"type": "string"}}}),
                    handler_mode: HandlerMode::Managed,
                },
                echo_handler(),
            )
            .unwrap();

        let result = registry
            .invoke_tool("echo", json!({"msg": "hi"}), ToolInvocationExtra::default())
            .await
            .unwrap();
        assert!(!result.is_error);
    }

    #[tokio::test]
    async fn stats_track_call_count() {
        let registry = ToolRegistry::new();
        registry
            .register_tool(
                ToolDefinition {
                    name: "echo".into(),
                    description: "echoes".into(),
                    input_schema: json!({"type": "object"}),
                    handler_mode: HandlerMode::Native,
                },
                echo_handler(),
            )
            .unwrap();

        registry.invoke_tool("echo", json!({}), ToolInvocationExtra::default()).await.unwrap();
        registry.invoke_tool("echo", json!({}), ToolInvocationExtra::default()).await.unwrap();

        let stats = registry.stats("echo").unwrap();
        assert_eq!(stats.call_count, 2);
        assert!(stats.last_called.is_some());
    }

    #[tokio::test]
    async fn invoking_unknown_tool_errors() {
        let registry = ToolRegistry::new();
        assert!(registry.invoke_tool("missing", json!({}), ToolInvocationExtra::default()).await.is_err());
    }
}
