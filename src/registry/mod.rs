//! Tool, Workflow, and Plugin registries (spec.md §4.9–4.11).

pub mod plugins;
pub mod tools;
pub mod workflows;

pub use plugins::{PluginManager, PluginManagerConfig, StaticPlugin};
pub use tools::{HandlerMode, ToolDefinition, ToolHandler, ToolRegistry, ToolResult};
pub use workflows::{Workflow, WorkflowEngine, WorkflowExecution, WorkflowResult};
