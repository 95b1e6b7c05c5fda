//! In-process Function adapter.
//!
//! Sync and async functions registered by name behind
//! `Arc<RwLock<HashMap<...>>>`, async tried first then sync, `ToolError`
//! on an unregistered name. Cancellation is cooperative — a registered
//! closure receives the [`ToolContext`] and is expected to check
//! `ctx.cancel.is_cancelled()` itself for long-running work.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::core::errors::ErrorKind;
use crate::core::model::{ToolConfig, ToolType};
use crate::core::tool_protocol::{Tool, ToolContext, ToolError, ToolFactory, ToolMetadata, ToolOutput};

pub type SyncFunction = Arc<dyn Fn(ToolContext, Value) -> Result<Value, ToolError> + Send + Sync>;
pub type AsyncFunction = Arc<
    dyn Fn(ToolContext, Value) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Value, ToolError>> + Send>>
        + Send
        + Sync,
>;

/// A registry of in-process callables keyed by function name
/// (`ToolConfig::target`). Construct once at startup, register the
/// application's functions, then hand an `Arc<FunctionRegistry>` to as
/// many `FunctionAdapterFactory`s as there are function-typed
/// `ToolConfig`s.
#[derive(Default)]
pub struct FunctionRegistry {
    sync_functions: RwLock<HashMap<String, SyncFunction>>,
    async_functions: RwLock<HashMap<String, AsyncFunction>>,
}

impl FunctionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn register_sync(&self, key: impl Into<String>, f: SyncFunction) {
        self.sync_functions.write().await.insert(key.into(), f);
    }

    pub async fn register_async(&self, key: impl Into<String>, f: AsyncFunction) {
        self.async_functions.write().await.insert(key.into(), f);
    }

    async fn call(&self, key: &str, ctx: ToolContext, input: Value) -> Result<Value, ToolError> {
        if let Some(f) = self.async_functions.read().await.get(key).cloned() {
            return f(ctx, input).await;
        }
        if let Some(f) = self.sync_functions.read().await.get(key).cloned() {
            return f(ctx, input);
        }
        Err(ToolError::new(
            ErrorKind::ToolNotAvailable,
            format!("no function registered under key '{}'", key),
        ))
    }
}

struct FunctionTool {
    name: String,
    description: String,
    key: String,
    registry: Arc<FunctionRegistry>,
}

#[async_trait]
impl Tool for FunctionTool {
    async fn invoke(&self, ctx: &ToolContext, input: Value) -> Result<ToolOutput, ToolError> {
        if ctx.cancel.is_cancelled() {
            return Err(ToolError::new(ErrorKind::Cancelled, "cancelled before dispatch"));
        }
        let value = self.registry.call(&self.key, ctx.clone(), input).await?;
        Ok(ToolOutput::json(value))
    }

    fn describe(&self) -> ToolMetadata {
        ToolMetadata {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters_schema: serde_json::json!({"type": "object"}),
        }
    }

    fn tool_type(&self) -> ToolType {
        ToolType::Function
    }
}

/// [`ToolFactory`] for `ToolConfig { kind: Function, .. }`. `target` is
/// the function key previously registered on the shared
/// [`FunctionRegistry`]; `static_config.description` (optional) overrides
/// the tool's LLM-facing description.
pub struct FunctionAdapterFactory {
    registry: Arc<FunctionRegistry>,
}

impl FunctionAdapterFactory {
    pub fn new(registry: Arc<FunctionRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ToolFactory for FunctionAdapterFactory {
    async fn build(&self, config: &ToolConfig) -> Result<Arc<dyn Tool>, ToolError> {
        let description = config
            .static_config
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("in-process function tool")
            .to_string();
        Ok(Arc::new(FunctionTool {
            name: config.name.clone(),
            description,
            key: config.target.clone(),
            registry: self.registry.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tool_protocol::fresh_context;
    use std::time::Duration;

    #[tokio::test]
    async fn sync_function_executes() {
        let registry = FunctionRegistry::new();
        registry
            .register_sync(
                "add",
                Arc::new(|_ctx: ToolContext, v: Value| {
                    let a = v["a"].as_i64().unwrap_or(0);
                    let b = v["b"].as_i64().unwrap_or(0);
                    Ok(serde_json::json!({"sum": a + b}))
                }),
            )
            .await;
        let factory = FunctionAdapterFactory::new(registry);
        let config = ToolConfig {
            kind: ToolType::Function,
            name: "add".into(),
            target: "add".into(),
            static_config: serde_json::json!({}),
            enabled: true,
        };
        let tool = factory.build(&config).await.unwrap();
        let ctx = fresh_context("run_1", Duration::from_secs(5));
        let out = tool.invoke(&ctx, serde_json::json!({"a": 2, "b": 3})).await.unwrap();
        assert_eq!(out.value["sum"], 5);
    }

    #[tokio::test]
    async fn async_function_preferred_over_sync_for_same_key() {
        let registry = FunctionRegistry::new();
        registry
            .register_sync("dual", Arc::new(|_ctx: ToolContext, _v: Value| Ok(serde_json::json!({"via": "sync"}))))
            .await;
        registry
            .register_async(
                "dual",
                Arc::new(|_ctx: ToolContext, _v: Value| Box::pin(async { Ok(serde_json::json!({"via": "async"})) })),
            )
            .await;
        let factory = FunctionAdapterFactory::new(registry);
        let config = ToolConfig {
            kind: ToolType::Function,
            name: "dual".into(),
            target: "dual".into(),
            static_config: serde_json::json!({}),
            enabled: true,
        };
        let tool = factory.build(&config).await.unwrap();
        let ctx = fresh_context("run_1", Duration::from_secs(5));
        let out = tool.invoke(&ctx, serde_json::json!({})).await.unwrap();
        assert_eq!(out.value["via"], "async");
    }

    #[tokio::test]
    async fn unregistered_key_is_tool_not_available() {
        let registry = FunctionRegistry::new();
        let factory = FunctionAdapterFactory::new(registry);
        let config = ToolConfig {
            kind: ToolType::Function,
            name: "missing".into(),
            target: "missing".into(),
            static_config: serde_json::json!({}),
            enabled: true,
        };
        let tool = factory.build(&config).await.unwrap();
        let ctx = fresh_context("run_1", Duration::from_secs(5));
        let err = tool.invoke(&ctx, serde_json::json!({})).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ToolNotAvailable);
    }

    #[tokio::test]
    async fn async_function_observes_cancellation() {
        let registry = FunctionRegistry::new();
        registry
            .register_async(
                "wait_for_cancel",
                Arc::new(|ctx: ToolContext, _v: Value| {
                    Box::pin(async move {
                        ctx.cancel.cancelled().await;
                        Err(ToolError::new(ErrorKind::Cancelled, "observed cancellation"))
                    })
                }),
            )
            .await;
        let factory = FunctionAdapterFactory::new(registry);
        let config = ToolConfig {
            kind: ToolType::Function,
            name: "wait_for_cancel".into(),
            target: "wait_for_cancel".into(),
            static_config: serde_json::json!({}),
            enabled: true,
        };
        let tool = factory.build(&config).await.unwrap();
        let ctx = fresh_context("run_1", Duration::from_secs(5));
        let cancel = ctx.cancel.clone();
        let invocation = tokio::spawn({
            let ctx = ctx.clone();
            async move { tool.invoke(&ctx, serde_json::json!({})).await }
        });
        tokio::task::yield_now().await;
        cancel.cancel();
        let err = invocation.await.unwrap().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);
    }
}
