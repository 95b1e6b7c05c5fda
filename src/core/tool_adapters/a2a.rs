//! A2A client adapter: calls a peer agent's JSON-RPC endpoint as a tool.
//!
//! This adapter borrows its `reqwest::Client` + bearer-token idiom
//! (same pattern as
//! `clients/openai.rs`'s `Authorization: Bearer {api_key}` header) and
//! adapts the `tasks/send`-oriented shape from the peer A2A transport
//! reference, but plays the client role: send a task, then poll
//! `tasks/get` until the peer reports a terminal state.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::core::errors::ErrorKind;
use crate::core::model::{ToolConfig, ToolType};
use crate::core::tool_protocol::{Tool, ToolContext, ToolError, ToolFactory, ToolMetadata, ToolOutput};

const POLL_INTERVAL: Duration = Duration::from_millis(300);

#[derive(Debug, Deserialize)]
struct JsonRpcEnvelope<T> {
    result: Option<T>,
    error: Option<JsonRpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct TaskEnvelope {
    #[serde(rename = "taskId")]
    id: String,
    status: TaskStatus,
    #[serde(default, rename = "result")]
    output: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum TaskStatus {
    Submitted,
    Working,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled)
    }
}

struct A2aTool {
    name: String,
    peer_agent_id: String,
    endpoint: String,
    client: reqwest::Client,
    bearer_token: Option<String>,
}

#[async_trait]
impl Tool for A2aTool {
    async fn invoke(&self, ctx: &ToolContext, input: Value) -> Result<ToolOutput, ToolError> {
        // `tasks/send` takes a plain-text `message`; the caller's tool
        // arguments are a JSON object, so pull out a `message` field if
        // the schema has one, otherwise fall back to the whole object's
        // textual rendering rather than sending a non-string value the
        // peer endpoint would reject outright.
        let message_text = input
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| input.to_string());
        let params = json!({
            "agentId": self.peer_agent_id,
            "message": message_text,
            "parentRunId": ctx.run_id,
        });
        let task = self.rpc::<TaskEnvelope>("tasks/send", params).await?;

        let mut task = task;
        loop {
            if task.status.is_terminal() {
                break;
            }
            if ctx.cancel.is_cancelled() {
                let _ = self.rpc::<Value>("tasks/cancel", json!({"taskId": task.id})).await;
                return Err(ToolError::new(ErrorKind::Cancelled, "cancelled while awaiting peer agent"));
            }
            let remaining = ctx.deadline.remaining(&crate::core::ids::SystemClock);
            if remaining.is_zero() {
                return Err(ToolError::new(ErrorKind::Timeout, "deadline exceeded awaiting peer agent"));
            }
            tokio::time::sleep(POLL_INTERVAL.min(remaining)).await;
            task = self.rpc("tasks/get", json!({"taskId": task.id})).await?;
        }

        match task.status {
            TaskStatus::Completed => Ok(ToolOutput::json(task.output.unwrap_or(Value::Null))),
            TaskStatus::Failed => Err(ToolError::new(
                ErrorKind::A2AError,
                task.error.unwrap_or_else(|| "peer agent task failed".to_string()),
            )),
            TaskStatus::Cancelled => Err(ToolError::new(ErrorKind::Cancelled, "peer agent cancelled the task")),
            _ => unreachable!("loop only exits on a terminal status"),
        }
    }

    fn describe(&self) -> ToolMetadata {
        ToolMetadata {
            name: self.name.clone(),
            description: format!("delegates to peer agent '{}'", self.peer_agent_id),
            parameters_schema: json!({"type": "object"}),
        }
    }

    fn tool_type(&self) -> ToolType {
        ToolType::A2a
    }
}

impl A2aTool {
    async fn rpc<T: for<'de> Deserialize<'de>>(&self, method: &str, params: Value) -> Result<T, ToolError> {
        let request = json!({"jsonrpc": "2.0", "id": 1, "method": method, "params": params});
        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(token) = &self.bearer_token {
            builder = builder.bearer_auth(token);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| ToolError::new(ErrorKind::A2AError, format!("A2A request to peer failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(ToolError::new(
                ErrorKind::A2AError,
                format!("peer A2A endpoint returned status {}", response.status()),
            ));
        }
        let envelope: JsonRpcEnvelope<T> = response
            .json()
            .await
            .map_err(|e| ToolError::new(ErrorKind::A2AError, format!("invalid A2A JSON-RPC envelope: {}", e)))?;
        if let Some(error) = envelope.error {
            return Err(ToolError::new(ErrorKind::A2AError, format!("peer error {}: {}", error.code, error.message)));
        }
        envelope.result.ok_or_else(|| ToolError::new(ErrorKind::A2AError, "peer response had neither result nor error"))
    }
}

/// [`ToolFactory`] for `ToolConfig { kind: A2a, .. }`. `target` is the
/// peer's `agentId`; `static_config` carries `{endpoint, bearerToken?}`.
pub struct A2aAdapterFactory {
    client: reqwest::Client,
    default_endpoint: Option<String>,
}

impl A2aAdapterFactory {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            default_endpoint: None,
        }
    }

    pub fn with_default_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.default_endpoint = Some(endpoint.into());
        self
    }
}

impl Default for A2aAdapterFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolFactory for A2aAdapterFactory {
    async fn build(&self, config: &ToolConfig) -> Result<Arc<dyn Tool>, ToolError> {
        let endpoint = config
            .static_config
            .get("endpoint")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| self.default_endpoint.clone())
            .ok_or_else(|| ToolError::new(ErrorKind::ConfigError, "A2A tool config missing 'endpoint'"))?;
        let bearer_token = config
            .static_config
            .get("bearerToken")
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(Arc::new(A2aTool {
            name: config.name.clone(),
            peer_agent_id: config.target.clone(),
            endpoint,
            client: self.client.clone(),
            bearer_token,
        }))
    }
}
