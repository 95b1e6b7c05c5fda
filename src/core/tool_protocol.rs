//! The Tool Registry and the `Tool` contract.
//!
//! Earlier tool-dispatch designs here routed through a string
//! `protocol_name` looked up in a `HashMap<String, Arc<dyn
//! ToolProtocol>>`; this module replaces that with a tagged variant
//! (`ToolConfig::kind: ToolType`) resolved through one
//! `invoke`/`describe` dispatch behind the `Tool` trait, keeping the
//! same `ToolResult`/`ToolMetadata`/`ToolParameter` shapes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::core::errors::ErrorKind;
use crate::core::ids::Deadline;
use crate::core::model::{ToolConfig, ToolType};

/// Cooperative cancellation + deadline context threaded through every
/// tool invocation. Cancellation is honoured cooperatively via this
/// context value, not by forcibly aborting the tool's task.
#[derive(Clone)]
pub struct ToolContext {
    pub deadline: Deadline,
    pub cancel: tokio_util::CancellationToken,
    pub run_id: String,
    pub parent_run_id: Option<String>,
}

/// Minimal re-implementation of a cancellation token so this crate does
/// not pull in `tokio-util` solely for one type; kept in its own small
/// module below for readability.
pub mod tokio_util {
    use std::sync::Arc;
    use tokio::sync::Notify;

    /// A cooperative, clonable cancellation flag. Cloned handles share
    /// the same underlying state; `cancel()` wakes every `cancelled()`
    /// waiter.
    #[derive(Clone)]
    pub struct CancellationToken {
        notify: Arc<Notify>,
        flag: Arc<std::sync::atomic::AtomicBool>,
    }

    impl Default for CancellationToken {
        fn default() -> Self {
            Self {
                notify: Arc::new(Notify::new()),
                flag: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            }
        }
    }

    impl CancellationToken {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn is_cancelled(&self) -> bool {
            self.flag.load(std::sync::atomic::Ordering::SeqCst)
        }

        pub fn cancel(&self) {
            self.flag.store(true, std::sync::atomic::Ordering::SeqCst);
            self.notify.notify_waiters();
        }

        pub async fn cancelled(&self) {
            if self.is_cancelled() {
                return;
            }
            self.notify.notified().await;
        }
    }
}

/// A tool's output on success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub value: serde_json::Value,
    /// Tokens consumed producing this output, if the adapter can report
    /// them (A2A may propagate child-run usage).
    pub tokens: Option<u64>,
}

impl ToolOutput {
    pub fn json(value: serde_json::Value) -> Self {
        Self { value, tokens: None }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ToolError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ToolError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }
}

/// JSON-Schema-shaped parameter description, matching the
/// function-calling shape the LLM Driver expects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
}

/// Every tool, regardless of adapter, implements this one contract.
#[async_trait]
pub trait Tool: Send + Sync {
    async fn invoke(&self, ctx: &ToolContext, input: serde_json::Value) -> Result<ToolOutput, ToolError>;
    fn describe(&self) -> ToolMetadata;
    fn tool_type(&self) -> ToolType;
}

/// `(type, name) -> factory` catalog of tool *definitions*; `build()`
/// resolves an [`AgentSpec`](crate::core::model::AgentSpec)'s
/// [`ToolConfig`]s into concrete, invocable [`Tool`]s.
///
/// Registration order is irrelevant (lookup is by `(type, name)`);
/// building is pure over the current snapshot.
pub struct ToolRegistry {
    factories: HashMap<(ToolType, String), Arc<dyn ToolFactory>>,
}

/// A factory resolves a [`ToolConfig`] into a concrete [`Tool`]. Kept as
/// its own trait rather than a closure type alias (the way in-process
/// functions are registered in `tool_adapters::function`) since each
/// adapter needs its own constructor state (an HTTP client, an MCP
/// cache, ...), not just a plain function pointer.
#[async_trait]
pub trait ToolFactory: Send + Sync {
    async fn build(&self, config: &ToolConfig) -> Result<Arc<dyn Tool>, ToolError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("duplicate tool definition for ({0:?}, {1})")]
    DuplicateName(ToolType, String),
    #[error("no factory registered for ({0:?}, {1})")]
    Unknown(ToolType, String),
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { factories: HashMap::new() }
    }

    pub fn register(
        &mut self,
        tool_type: ToolType,
        name: impl Into<String>,
        factory: Arc<dyn ToolFactory>,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        let key = (tool_type, name.clone());
        if self.factories.contains_key(&key) {
            return Err(RegistryError::DuplicateName(tool_type, name));
        }
        self.factories.insert(key, factory);
        Ok(())
    }

    /// Resolves a concrete list of [`Tool`]s from `agentTools[]`.
    /// Missing or disabled configs are skipped (caller logs the
    /// warning trace, see [`crate::core::runner`]).
    pub async fn build(&self, agent_tools: &[ToolConfig]) -> Vec<(ToolConfig, Result<Arc<dyn Tool>, ToolError>)> {
        let mut out = Vec::with_capacity(agent_tools.len());
        for cfg in agent_tools {
            if !cfg.enabled {
                continue;
            }
            let key = (cfg.kind, cfg.name.clone());
            let result = match self.factories.get(&key) {
                Some(factory) => factory.build(cfg).await,
                None => Err(ToolError::new(
                    ErrorKind::ConfigError,
                    format!("unknown tool ({:?}, {})", cfg.kind, cfg.name),
                )),
            };
            out.push((cfg.clone(), result));
        }
        out
    }
}

/// A fresh, unstarted context for a top-level Run (no cancellation
/// observed yet), convenient for adapters and tests.
pub fn fresh_context(run_id: impl Into<String>, deadline_budget: Duration) -> ToolContext {
    let clock = crate::core::ids::SystemClock;
    ToolContext {
        deadline: Deadline::after(&clock, deadline_budget),
        cancel: tokio_util::CancellationToken::new(),
        run_id: run_id.into(),
        parent_run_id: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoFactory;

    struct EchoTool {
        name: String,
    }

    #[async_trait]
    impl Tool for EchoTool {
        async fn invoke(&self, _ctx: &ToolContext, input: serde_json::Value) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput::json(input))
        }
        fn describe(&self) -> ToolMetadata {
            ToolMetadata {
                name: self.name.clone(),
                description: "echoes its input".into(),
                parameters_schema: serde_json::json!({"type": "object"}),
            }
        }
        fn tool_type(&self) -> ToolType {
            ToolType::Function
        }
    }

    #[async_trait]
    impl ToolFactory for EchoFactory {
        async fn build(&self, config: &ToolConfig) -> Result<Arc<dyn Tool>, ToolError> {
            Ok(Arc::new(EchoTool { name: config.name.clone() }))
        }
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let mut registry = ToolRegistry::new();
        registry.register(ToolType::Function, "echo", Arc::new(EchoFactory)).unwrap();
        let err = registry.register(ToolType::Function, "echo", Arc::new(EchoFactory)).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateName(ToolType::Function, _)));
    }

    #[tokio::test]
    async fn disabled_tools_are_skipped() {
        let mut registry = ToolRegistry::new();
        registry.register(ToolType::Function, "echo", Arc::new(EchoFactory)).unwrap();
        let cfg = ToolConfig {
            kind: ToolType::Function,
            name: "echo".into(),
            target: "echo".into(),
            static_config: serde_json::json!({}),
            enabled: false,
        };
        let built = registry.build(&[cfg]).await;
        assert!(built.is_empty());
    }

    #[tokio::test]
    async fn unknown_tool_fails_config_error() {
        let registry = ToolRegistry::new();
        let cfg = ToolConfig {
            kind: ToolType::Http,
            name: "nope".into(),
            target: "https://example.com".into(),
            static_config: serde_json::json!({}),
            enabled: true,
        };
        let built = registry.build(&[cfg]).await;
        assert_eq!(built.len(), 1);
        assert_eq!(built[0].1.as_ref().err().unwrap().kind, ErrorKind::ConfigError);
    }

    #[tokio::test]
    async fn cancellation_token_wakes_waiters() {
        let token = tokio_util::CancellationToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
        });
        token.cancel();
        tokio::time::timeout(Duration::from_millis(100), handle).await.unwrap().unwrap();
    }
}
