//! STDIO Transport — line-delimited JSON-RPC over stdin/stdout, for
//! process-embedding clients (Claude Desktop, etc.) that spawn this binary
//! directly rather than talking HTTP.
//!
//! Grounded directly on the teacher's `mcp/server.rs::serve_stdio` /
//! `ServerHandler for McpServer`: same `rmcp::transport::io::stdio()` +
//! `ServiceExt::serve` call shape, retargeted from `OperationRegistry` to
//! this crate's `ToolRegistry`. No authentication gate — spec.md §4.6
//! treats STDIO as a local, already-trusted transport.

use crate::registry::tools::{ToolInvocationExtra, ToolRegistry};
use crate::registry::workflows::WorkflowEngine;
use crate::Result;
use rmcp::handler::server::ServerHandler;
use rmcp::model::{
    CallToolRequestParam, CallToolResult, Content, ListToolsResult, PaginatedRequestParam,
    ServerCapabilities, ServerInfo, Tool, ToolsCapability,
};
use rmcp::service::{RequestContext as RmcpRequestContext, RoleServer, ServiceExt};
use rmcp::ErrorData as RmcpError;
use serde_json::{json, Value};
use std::sync::Arc;

/// Reserved tool name routed to the Workflow Engine instead of the tool
/// registry: STDIO has no custom JSON-RPC methods (rmcp's `ServerHandler`
/// only dispatches the official MCP request set), so `call_tool` is the
/// closest equivalent surface to HTTP's `workflows/execute` method.
const WORKFLOW_EXECUTE_TOOL: &str = "workflows/execute";

#[derive(Clone)]
pub struct StdioServer {
    tools: Arc<ToolRegistry>,
    workflows: Arc<WorkflowEngine>,
}

impl StdioServer {
    pub fn new(tools: Arc<ToolRegistry>, workflows: Arc<WorkflowEngine>) -> Self {
        Self { tools, workflows }
    }

    pub async fn serve(&self) -> Result<()> {
        tracing::info!("starting MCP server on stdio");
        let service = self
            .clone()
            .serve(rmcp::transport::io::stdio())
            .await
            .map_err(|e| crate::McpError::mcp(format!("failed to start stdio transport: {e}")))?;

        service
            .waiting()
            .await
            .map_err(|e| crate::McpError::mcp(format!("stdio transport error: {e}")))?;

        tracing::info!("MCP stdio server shut down");
        Ok(())
    }
}

impl StdioServer {
    async fn execute_workflow(&self, arguments: Value) -> CallToolResult {
        let Some(name) = arguments.get("name").and_then(|v| v.as_str()) else {
            return CallToolResult::error(vec![Content::text(
                "workflows/execute requires a name".to_string(),
            )]);
        };
        let params = arguments.get("parameters").cloned().unwrap_or_else(|| json!({}));
        match self.workflows.execute_with_validation(name, params).await {
            Ok(result) => match serde_json::to_string(&result) {
                Ok(text) => {
                    if result.success {
                        CallToolResult::success(vec![Content::text(text)])
                    } else {
                        CallToolResult::error(vec![Content::text(text)])
                    }
                }
                Err(e) => CallToolResult::error(vec![Content::text(e.to_string())]),
            },
            Err(e) => CallToolResult::error(vec![Content::text(e.to_string())]),
        }
    }
}

impl ServerHandler for StdioServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability::default()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RmcpRequestContext<RoleServer>,
    ) -> std::result::Result<ListToolsResult, RmcpError> {
        let tools: Vec<Tool> = self
            .tools
            .list_tools()
            .into_iter()
            .filter_map(|def| {
                let wire = json!({
                    "name": def.name,
                    "description": def.description,
                    "inputSchema": def.input_schema,
                });
                serde_json::from_value(wire).ok()
            })
            .collect();

        Ok(ListToolsResult { tools, next_cursor: None })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RmcpRequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, RmcpError> {
        let tool_name = request.name.as_ref();
        let arguments = Value::Object(request.arguments.clone().unwrap_or_default());

        if tool_name == WORKFLOW_EXECUTE_TOOL {
            return Ok(self.execute_workflow(arguments).await);
        }

        let extra = ToolInvocationExtra { request_id: uuid::Uuid::new_v4().to_string() };
        match self.tools.invoke_tool(tool_name, arguments, extra).await {
            Ok(result) => {
                let content = result.content.into_iter().map(|c| Content::text(c.text)).collect();
                if result.is_error {
                    Ok(CallToolResult::error(content))
                } else {
                    Ok(CallToolResult::success(content))
                }
            }
            Err(e) => Ok(CallToolResult::error(vec![Content::text(e.to_string())])),
        }
    }
}
