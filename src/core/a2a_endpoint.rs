//! A2A Endpoint: exposes every agent over a well-known JSON-RPC surface
//! plus a discovery document.
//!
//! This module is the transport-independent counterpart to
//! `tool_adapters::a2a`'s client: it holds the JSON-RPC 2.0 envelope
//! types and the `tasks/send`/`tasks/get`/`tasks/cancel` handler logic,
//! and the discovery-document builder, but has no opinion on how the
//! bytes reach the network — dispatch logic stays free of axum types so
//! it can be swapped across HTTP frameworks and unit-tested without
//! pulling in `axum` or the `server` feature at all. `src/server/routes.rs`
//! is the axum-specific adapter that calls into this module.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::core::errors::{CoreError, ErrorKind};
use crate::core::ids;
use crate::core::model::{AgentSpec, AgentStatus};
use crate::core::persistence::PersistenceGateway;
use crate::core::runner::AgentRunner;

#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    #[allow(dead_code)]
    pub jsonrpc: String,
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcErrorBody>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcErrorBody {
    pub code: i64,
    pub message: String,
}

impl JsonRpcResponse {
    fn ok(id: Value, result: Value) -> Self {
        Self { jsonrpc: "2.0", id, result: Some(result), error: None }
    }

    fn err(id: Value, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcErrorBody { code: jsonrpc_code(kind), message: message.into() }),
        }
    }
}

/// Maps our error taxonomy onto JSON-RPC's reserved code ranges; anything
/// without a closer JSON-RPC analogue falls into the server-error band.
fn jsonrpc_code(kind: ErrorKind) -> i64 {
    match kind {
        ErrorKind::ConfigError | ErrorKind::ProtocolError => -32602,
        ErrorKind::ToolNotAvailable => -32601,
        _ => -32000,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Submitted,
    Working,
    Completed,
    Failed,
    Cancelled,
}

/// A task tracked by this endpoint, one per `tasks/send` call. Polling
/// clients read this back via `tasks/get`.
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: String,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Holds one [`AgentRunner`] per registered agent plus the in-flight
/// task table, and dispatches JSON-RPC methods against them. `targetId`
/// is not part of the envelope itself — one endpoint instance is scoped
/// to a single agent, and callers route to the right `A2aEndpoint` by
/// path before calling `handle`.
pub struct A2aEndpoint {
    runner: Arc<AgentRunner>,
    persistence: Arc<dyn PersistenceGateway>,
    tasks: RwLock<HashMap<String, Task>>,
}

impl A2aEndpoint {
    pub fn new(runner: Arc<AgentRunner>, persistence: Arc<dyn PersistenceGateway>) -> Self {
        Self { runner, persistence, tasks: RwLock::new(HashMap::new()) }
    }

    pub async fn handle(&self, agent: &AgentSpec, request: JsonRpcRequest) -> JsonRpcResponse {
        if agent.status != AgentStatus::Active {
            return JsonRpcResponse::err(request.id, ErrorKind::ToolNotAvailable, "AgentUnavailable");
        }
        let id = request.id.clone();
        let result = match request.method.as_str() {
            "tasks/send" => self.tasks_send(agent, request.params).await,
            "tasks/get" => self.tasks_get(request.params).await,
            "tasks/cancel" => self.tasks_cancel(request.params).await,
            other => Err(CoreError::new(ErrorKind::ProtocolError, format!("unknown method '{}'", other))),
        };
        match result {
            Ok(value) => JsonRpcResponse::ok(id, value),
            Err(e) => JsonRpcResponse::err(id, e.kind, e.redacted_message()),
        }
    }

    /// Idempotent by `taskId` when the caller supplies one: a
    /// duplicate `tasks/send` with the same id returns the existing
    /// task's current state instead of starting a second run.
    async fn tasks_send(&self, agent: &AgentSpec, params: Value) -> Result<Value, CoreError> {
        let message = params
            .get("message")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::new(ErrorKind::ProtocolError, "tasks/send requires 'message'"))?
            .to_string();
        let parent_run_id = params.get("parentRunId").and_then(Value::as_str).map(str::to_string);
        let thread_id = params
            .get("threadContext")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(ids::thread_id);
        let task_id = params.get("taskId").and_then(Value::as_str).map(str::to_string);

        if let Some(ref existing_id) = task_id {
            if let Some(existing) = self.tasks.read().await.get(existing_id) {
                return Ok(task_envelope(existing));
            }
        }
        let task_id = task_id.unwrap_or_else(ids::new_id);

        {
            let mut tasks = self.tasks.write().await;
            tasks.insert(
                task_id.clone(),
                Task { id: task_id.clone(), status: TaskStatus::Working, result: None, error: None },
            );
        }

        let cancel = crate::core::tool_protocol::tokio_util::CancellationToken::new();
        let outcome = self.runner.run(agent, &thread_id, &message, parent_run_id, cancel).await;

        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(&task_id).expect("just inserted");
        match outcome {
            Ok(output) if output.error_kind.is_none() => {
                task.status = TaskStatus::Completed;
                task.result = Some(json!({
                    "runId": output.run_id,
                    "message": output.final_message,
                    "tokensIn": output.input_tokens,
                    "tokensOut": output.output_tokens,
                    "costUsd": output.cost_usd,
                }));
            }
            Ok(output) => {
                task.status = TaskStatus::Failed;
                task.error = Some(
                    output
                        .final_message
                        .unwrap_or_else(|| format!("{:?}", output.error_kind.unwrap_or(ErrorKind::ProtocolError))),
                );
            }
            Err(e) => {
                task.status = TaskStatus::Failed;
                task.error = Some(e.redacted_message());
            }
        }
        Ok(task_envelope(task))
    }

    async fn tasks_get(&self, params: Value) -> Result<Value, CoreError> {
        let task_id = params
            .get("taskId")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::new(ErrorKind::ProtocolError, "tasks/get requires 'taskId'"))?;
        let tasks = self.tasks.read().await;
        let task = tasks
            .get(task_id)
            .ok_or_else(|| CoreError::new(ErrorKind::ProtocolError, "unknown taskId"))?;
        Ok(task_envelope(task))
    }

    /// This endpoint runs tasks synchronously to completion inside
    /// `tasks/send`, returned directly for short-lived tasks, so by the
    /// time a client could call `tasks/cancel` the task has
    /// already reached a terminal state; cancelling an in-flight run
    /// that spans a `tasks/send` call requires wiring a live
    /// `CancellationToken` through — left for the Streaming Facade's
    /// async path, which does carry one per run.
    async fn tasks_cancel(&self, params: Value) -> Result<Value, CoreError> {
        let task_id = params
            .get("taskId")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::new(ErrorKind::ProtocolError, "tasks/cancel requires 'taskId'"))?;
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| CoreError::new(ErrorKind::ProtocolError, "unknown taskId"))?;
        if !matches!(task.status, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled) {
            task.status = TaskStatus::Cancelled;
        }
        Ok(task_envelope(task))
    }

    /// Lists every currently-tracked task, for diagnostics/tests only —
    /// not part of the JSON-RPC wire surface.
    #[cfg(test)]
    async fn task_count(&self) -> usize {
        self.tasks.read().await.len()
    }
}

fn task_envelope(task: &Task) -> Value {
    json!({
        "taskId": task.id,
        "status": task.status,
        "result": task.result,
        "error": task.error,
    })
}

/// `GET /.well-known/agent-card.json`: discovery document derived
/// from the live `AgentSpec` plus its resolved tool list. Skills are
/// tool names; capabilities come from `capability_tags` plus any
/// operator-declared extras passed by the caller (the server binds
/// `extra_capabilities` to a config knob, not part of this crate).
pub fn agent_card(agent: &AgentSpec, base_url: &str, extra_capabilities: &[String]) -> Value {
    let mut capabilities: Vec<String> = agent.capability_tags.clone();
    capabilities.extend(extra_capabilities.iter().cloned());
    let skills: Vec<String> = agent.tools.iter().filter(|t| t.enabled).map(|t| t.name.clone()).collect();
    json!({
        "id": agent.id,
        "name": agent.name,
        "description": agent.description,
        "version": "1",
        "capabilities": capabilities,
        "skills": skills,
        "endpoint": format!("{}/a2a", base_url.trim_end_matches('/')),
    })
}

/// `GET /.well-known/agents.json`: directory of every active
/// agent's discovery document.
pub async fn agents_directory(
    persistence: &dyn PersistenceGateway,
    base_url: &str,
) -> Result<Value, CoreError> {
    let specs = persistence.list_agent_specs().await?;
    let cards: Vec<Value> = specs
        .iter()
        .filter(|a| a.status == AgentStatus::Active)
        .map(|a| agent_card(a, base_url, &[]))
        .collect();
    Ok(json!({ "agents": cards }))
}
