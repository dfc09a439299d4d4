//! Workflow Engine — stepwise execution with validation, hooks, and
//! resource/audit accounting.
//!
//! Grounded on the teacher's `engine/mod.rs`/`engine/executor.rs` (step
//! execution loop, `PausedRun` resumption shape) and `error.rs`'s
//! `classify_message` message-substring error taxonomy, generalized from
//! BeemFlow's YAML flow DSL to spec.md §4.10's `(name, version,
//! parameterSchema, executeWorkflow)` registration shape.

use crate::{McpError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Clone, serde::Serialize)]
pub struct WorkflowStep {
    pub op_name: String,
    pub resource_type: String,
    pub duration_ms: i64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct FailedStep {
    pub op_name: String,
    pub error_type: String,
    pub message: String,
    pub recoverable: bool,
    /// Populated when error_type == "validation": one entry per failing field.
    pub field: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct WorkflowResult {
    pub success: bool,
    pub completed_steps: Vec<WorkflowStep>,
    pub failed_steps: Vec<FailedStep>,
    pub resources: Vec<String>,
    pub duration_ms: i64,
    pub output: Option<Value>,
}

/// Handle passed into `executeWorkflow` bodies so they can record steps and
/// run fallible operations through the same classification path the engine
/// uses for top-level failures.
pub struct WorkflowExecution {
    completed_steps: parking_lot::Mutex<Vec<WorkflowStep>>,
    failed_steps: parking_lot::Mutex<Vec<FailedStep>>,
    resources: parking_lot::Mutex<Vec<String>>,
}

impl WorkflowExecution {
    fn new() -> Self {
        Self {
            completed_steps: parking_lot::Mutex::new(Vec::new()),
            failed_steps: parking_lot::Mutex::new(Vec::new()),
            resources: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn track_resource(&self, resource: impl Into<String>) {
        self.resources.lock().push(resource.into());
    }

    /// Runs `op` and records a `WorkflowStep`/`FailedStep` depending on the
    /// outcome, classifying failures via `McpError::classify_message`.
    pub async fn safe_execute<F, Fut, T>(&self, op_name: &str, resource_type: &str, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let start = Utc::now();
        match op().await {
            Ok(value) => {
                let duration_ms = (Utc::now() - start).num_milliseconds();
                self.completed_steps.lock().push(WorkflowStep {
                    op_name: op_name.to_string(),
                    resource_type: resource_type.to_string(),
                    duration_ms,
                });
                Ok(value)
            }
            Err(e) => {
                let message = e.to_string();
                let error_type = McpError::classify_message(&message);
                let recoverable = matches!(error_type, "api_error" | "timeout");
                self.failed_steps.lock().push(FailedStep {
                    op_name: op_name.to_string(),
                    error_type: error_type.to_string(),
                    message: message.clone(),
                    recoverable,
                    field: None,
                });
                Err(e)
            }
        }
    }
}

#[async_trait]
pub trait WorkflowLifecycleHooks: Send + Sync {
    async fn on_before_execute(&self, _params: &Value) {}
    async fn on_after_execute(&self, _result: &WorkflowResult) {}
    async fn on_error(&self, _error: &McpError) {}
}

pub struct NoopHooks;
#[async_trait]
impl WorkflowLifecycleHooks for NoopHooks {}

#[async_trait]
pub trait WorkflowBody: Send + Sync {
    async fn execute(&self, params: Value, ctx: Arc<WorkflowExecution>) -> Result<Value>;
}

#[async_trait]
impl<F, Fut> WorkflowBody for F
where
    F: Fn(Value, Arc<WorkflowExecution>) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Value>> + Send,
{
    async fn execute(&self, params: Value, ctx: Arc<WorkflowExecution>) -> Result<Value> {
        (self)(params, ctx).await
    }
}

pub struct Workflow {
    pub name: String,
    pub version: String,
    pub parameter_schema: Value,
    pub body: Arc<dyn WorkflowBody>,
    pub hooks: Arc<dyn WorkflowLifecycleHooks>,
}

#[derive(Clone, Default)]
pub struct WorkflowEngine {
    workflows: Arc<DashMap<String, Arc<Workflow>>>,
}

impl WorkflowEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, workflow: Workflow) -> Result<()> {
        if self.workflows.contains_key(&workflow.name) {
            return Err(McpError::validation(format!("workflow '{}' is already registered", workflow.name)));
        }
        self.workflows.insert(workflow.name.clone(), Arc::new(workflow));
        Ok(())
    }

    pub fn unregister(&self, name: &str) {
        self.workflows.remove(name);
    }

    pub async fn execute_with_validation(&self, name: &str, params: Value) -> Result<WorkflowResult> {
        let Some(workflow) = self.workflows.get(name).map(|e| Arc::clone(e.value())) else {
            return Err(McpError::not_found("workflow", name));
        };

        let start = Utc::now();
        if let Err(field_errors) = validate_params(&workflow.parameter_schema, &params) {
            return Ok(WorkflowResult {
                success: false,
                completed_steps: vec![],
                failed_steps: field_errors
                    .into_iter()
                    .map(|(field, message)| FailedStep {
                        op_name: name.to_string(),
                        error_type: "validation".to_string(),
                        message,
                        recoverable: false,
                        field: Some(field),
                    })
                    .collect(),
                resources: vec![],
                duration_ms: (Utc::now() - start).num_milliseconds(),
                output: None,
            });
        }

        workflow.hooks.on_before_execute(&params).await;
        let execution = Arc::new(WorkflowExecution::new());
        let outcome = workflow.body.execute(params, Arc::clone(&execution)).await;
        let duration_ms = (Utc::now() - start).num_milliseconds();

        let result = WorkflowResult {
            success: outcome.is_ok(),
            completed_steps: execution.completed_steps.lock().clone(),
            failed_steps: execution.failed_steps.lock().clone(),
            resources: execution.resources.lock().clone(),
            duration_ms,
            output: outcome.as_ref().ok().cloned(),
        };

        match &outcome {
            Ok(_) => workflow.hooks.on_after_execute(&result).await,
            Err(e) => workflow.hooks.on_error(e).await,
        }

        Ok(result)
    }
}

fn validate_params(schema: &Value, params: &Value) -> std::result::Result<(), Vec<(String, String)>> {
    let validator = match jsonschema::validator_for(schema) {
        Ok(v) => v,
        Err(e) => return Err(vec![("$schema".to_string(), e.to_string())]),
    };
    let errors: Vec<(String, String)> = validator
        .iter_errors(params)
        .map(|e| (e.instance_path.to_string(), e.to_string()))
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_workflow() -> Workflow {
        Workflow {
            name: "deploy".into(),
            version: "1.0.0".into(),
            parameter_schema: json!({"type": "object", "required": ["target"], "properties": {"target": {"type": "string"}}}),
            body: Arc::new(|params: Value, ctx: Arc<WorkflowExecution>| async move {
                ctx.safe_execute("deploy_step", "deployment", || async { Ok::<_, McpError>(()) }).await?;
                ctx.track_resource("deployment:prod");
                Ok(params)
            }),
            hooks: Arc::new(NoopHooks),
        }
    }

    #[tokio::test]
    async fn validation_failure_reports_failed_step_per_field() {
        let engine = WorkflowEngine::new();
        engine.register(sample_workflow()).unwrap();
        let result = engine.execute_with_validation("deploy", json!({})).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.failed_steps[0].error_type, "validation");
    }

    #[tokio::test]
    async fn successful_execution_records_completed_step_and_resource() {
        let engine = WorkflowEngine::new();
        engine.register(sample_workflow()).unwrap();
        let result = engine
            .execute_with_validation("deploy", json!({"target": "prod"}))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.completed_steps.len(), 1);
        assert_eq!(result.resources, vec!["deployment:prod".to_string()]);
    }

    #[tokio::test]
    async fn unknown_workflow_errors() {
        let engine = WorkflowEngine::new();
        assert!(engine.execute_with_validation("missing", json!({})).await.is_err());
    }
}
