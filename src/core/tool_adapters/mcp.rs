//! MCP (Model Context Protocol) adapter.
//!
//! Caches the peer's tool list behind a `RwLock<Option<Vec<...>>>` plus
//! a `last_cache_refresh` timestamp and a `cache_ttl_secs` TTL, refreshed
//! lazily on first use and thereafter once the TTL elapses. Speaks
//! actual MCP JSON-RPC (`tools/list`, `tools/call`) rather than a bespoke
//! REST pair, since that's the protocol this crate advertises.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::core::errors::ErrorKind;
use crate::core::model::{ToolConfig, ToolType};
use crate::core::tool_protocol::{Tool, ToolContext, ToolError, ToolFactory, ToolMetadata, ToolOutput};

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Clone, Deserialize)]
struct McpToolList {
    tools: Vec<McpToolDescriptor>,
}

#[derive(Debug, Clone, Deserialize)]
struct McpToolDescriptor {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(rename = "inputSchema", default)]
    input_schema: Value,
}

#[derive(Debug, Clone, Deserialize)]
struct McpCallResult {
    #[serde(default)]
    content: Value,
    #[serde(rename = "isError", default)]
    is_error: bool,
}

static REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// One MCP server endpoint, shared across every `McpTool` derived from
/// it so they pay for a single cache.
pub struct McpServerClient {
    endpoint: String,
    client: reqwest::Client,
    tools_cache: Arc<RwLock<Option<Vec<McpToolDescriptor>>>>,
    cache_ttl: Duration,
    last_cache_refresh: Arc<RwLock<Option<Instant>>>,
}

impl McpServerClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
            tools_cache: Arc::new(RwLock::new(None)),
            cache_ttl: Duration::from_secs(300),
            last_cache_refresh: Arc::new(RwLock::new(None)),
        }
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    async fn should_refresh_cache(&self) -> bool {
        match *self.last_cache_refresh.read().await {
            None => true,
            Some(instant) => instant.elapsed() > self.cache_ttl,
        }
    }

    async fn refresh_cache(&self) -> Result<(), ToolError> {
        let body = self.rpc_call("tools/list", json!({})).await?;
        let list: McpToolList = serde_json::from_value(body)
            .map_err(|e| ToolError::new(ErrorKind::A2AError, format!("malformed tools/list response: {}", e)))?;
        *self.tools_cache.write().await = Some(list.tools);
        *self.last_cache_refresh.write().await = Some(Instant::now());
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<McpToolDescriptor>, ToolError> {
        if self.should_refresh_cache().await {
            self.refresh_cache().await?;
        }
        self.tools_cache
            .read()
            .await
            .clone()
            .ok_or_else(|| ToolError::new(ErrorKind::A2AError, "MCP tool cache not initialized"))
    }

    async fn describe_tool(&self, name: &str) -> Result<McpToolDescriptor, ToolError> {
        self.list_tools()
            .await?
            .into_iter()
            .find(|t| t.name == name)
            .ok_or_else(|| ToolError::new(ErrorKind::ToolNotAvailable, format!("MCP server has no tool '{}'", name)))
    }

    async fn call_tool(&self, name: &str, arguments: Value, timeout: Duration) -> Result<Value, ToolError> {
        let body = tokio::time::timeout(timeout, self.rpc_call("tools/call", json!({"name": name, "arguments": arguments})))
            .await
            .map_err(|_| ToolError::new(ErrorKind::Timeout, "MCP tools/call timed out"))??;
        let result: McpCallResult = serde_json::from_value(body)
            .map_err(|e| ToolError::new(ErrorKind::A2AError, format!("malformed tools/call response: {}", e)))?;
        if result.is_error {
            return Err(ToolError::new(ErrorKind::ToolInvocationError, result.content.to_string()));
        }
        Ok(result.content)
    }

    async fn rpc_call(&self, method: &str, params: Value) -> Result<Value, ToolError> {
        let id = REQUEST_ID.fetch_add(1, Ordering::Relaxed);
        let request = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| ToolError::new(ErrorKind::A2AError, format!("MCP request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(ToolError::new(
                ErrorKind::A2AError,
                format!("MCP server returned status {}", response.status()),
            ));
        }
        let parsed: JsonRpcResponse<Value> = response
            .json()
            .await
            .map_err(|e| ToolError::new(ErrorKind::A2AError, format!("invalid MCP JSON-RPC envelope: {}", e)))?;
        if let Some(error) = parsed.error {
            return Err(ToolError::new(
                ErrorKind::A2AError,
                format!("MCP error {}: {}", error.code, error.message),
            ));
        }
        parsed.result.ok_or_else(|| ToolError::new(ErrorKind::A2AError, "MCP response had neither result nor error"))
    }
}

struct McpTool {
    name: String,
    mcp_name: String,
    description: String,
    parameters_schema: Value,
    client: Arc<McpServerClient>,
    tool_deadline: Duration,
}

#[async_trait]
impl Tool for McpTool {
    async fn invoke(&self, ctx: &ToolContext, input: Value) -> Result<ToolOutput, ToolError> {
        if ctx.cancel.is_cancelled() {
            return Err(ToolError::new(ErrorKind::Cancelled, "cancelled before MCP call"));
        }
        let remaining = ctx.deadline.remaining(&crate::core::ids::SystemClock).min(self.tool_deadline);
        let value = self.client.call_tool(&self.mcp_name, input, remaining).await?;
        Ok(ToolOutput::json(value))
    }

    fn describe(&self) -> ToolMetadata {
        ToolMetadata {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters_schema: self.parameters_schema.clone(),
        }
    }

    fn tool_type(&self) -> ToolType {
        ToolType::Mcp
    }
}

/// [`ToolFactory`] for `ToolConfig { kind: Mcp, .. }`. `target` is the
/// MCP server's JSON-RPC endpoint URL; `name` must match a tool name the
/// server exposes via `tools/list`.
pub struct McpAdapterFactory {
    clients: RwLock<std::collections::HashMap<String, Arc<McpServerClient>>>,
    tool_deadline: Duration,
}

impl McpAdapterFactory {
    pub fn new(tool_deadline: Duration) -> Self {
        Self {
            clients: RwLock::new(std::collections::HashMap::new()),
            tool_deadline,
        }
    }

    async fn client_for(&self, endpoint: &str) -> Arc<McpServerClient> {
        if let Some(c) = self.clients.read().await.get(endpoint) {
            return c.clone();
        }
        let mut guard = self.clients.write().await;
        guard
            .entry(endpoint.to_string())
            .or_insert_with(|| Arc::new(McpServerClient::new(endpoint.to_string())))
            .clone()
    }
}

#[async_trait]
impl ToolFactory for McpAdapterFactory {
    async fn build(&self, config: &ToolConfig) -> Result<Arc<dyn Tool>, ToolError> {
        let client = self.client_for(&config.target).await;
        let descriptor = client.describe_tool(&config.name).await?;
        Ok(Arc::new(McpTool {
            name: config.name.clone(),
            mcp_name: descriptor.name,
            description: descriptor.description,
            parameters_schema: descriptor.input_schema,
            client,
            tool_deadline: self.tool_deadline,
        }))
    }
}
