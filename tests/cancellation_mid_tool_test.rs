//! End-to-end: dropping a [`StreamHandle`] mid-tool-call cooperatively
//! cancels the tool and the run terminates as cancelled, rather than
//! hanging or silently completing.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::stream;
use serde_json::json;

use agentcore::core::config::RuntimeConfig;
use agentcore::core::errors::{CoreError, ErrorKind};
use agentcore::core::event::RunEvent;
use agentcore::core::llm_driver::{DriverMessage, LlmDriver, LlmEvent, LlmEventStream, ToolRequest};
use agentcore::core::model::{AgentSpec, AgentStatus, RunStatus, ToolConfig, ToolType};
use agentcore::core::persistence::{InMemoryPersistence, PersistenceGateway};
use agentcore::core::streaming::{InMemoryTraceSink, StreamingFacade};
use agentcore::core::tool_adapters::function::{FunctionAdapterFactory, FunctionRegistry};
use agentcore::core::tool_protocol::{ToolContext, ToolError, ToolMetadata, ToolRegistry};

/// One tool request that never resolves on its own; it only returns once
/// its `ToolContext::cancel` fires.
struct SingleSlowToolDriver;

#[async_trait]
impl LlmDriver for SingleSlowToolDriver {
    async fn stream(&self, _messages: &[DriverMessage], _tools: &[ToolMetadata]) -> Result<LlmEventStream, CoreError> {
        let events: Vec<Result<LlmEvent, CoreError>> = vec![Ok(LlmEvent::ToolRequest(ToolRequest {
            call_id: "call_wait".into(),
            tool_name: "wait_forever".into(),
            arguments: json!({}),
        }))];
        Ok(Box::pin(stream::iter(events)))
    }

    fn model_name(&self) -> &str {
        "slow-tool-test-model"
    }
}

fn waiting_agent() -> AgentSpec {
    AgentSpec {
        id: "waiting-agent".into(),
        name: "Waiting Agent".into(),
        description: "runs a tool that blocks until cancelled".into(),
        status: AgentStatus::Active,
        system_prompt: "be patient".into(),
        model: "slow-tool-test-model".into(),
        temperature: 0.0,
        max_tokens: 64,
        max_messages: None,
        tools: vec![ToolConfig {
            kind: ToolType::Function,
            name: "wait_forever".into(),
            target: "wait_forever".into(),
            static_config: json!({}),
            enabled: true,
        }],
        capability_tags: vec![],
        is_coordinator: false,
        created_by: "test".into(),
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn dropping_the_stream_handle_cancels_a_run_blocked_in_a_tool_call() {
    let persistence = InMemoryPersistence::new();
    let function_registry = FunctionRegistry::new();
    function_registry
        .register_async(
            "wait_forever",
            Arc::new(|ctx: ToolContext, _v: serde_json::Value| {
                Box::pin(async move {
                    ctx.cancel.cancelled().await;
                    Err(ToolError::new(ErrorKind::Cancelled, "observed cancellation"))
                })
            }),
        )
        .await;

    let mut tool_registry = ToolRegistry::new();
    tool_registry
        .register(ToolType::Function, "wait_forever", Arc::new(FunctionAdapterFactory::new(function_registry)))
        .unwrap();

    let trace_sink = InMemoryTraceSink::new(16);
    let facade = StreamingFacade::new(
        Arc::new(SingleSlowToolDriver),
        Arc::new(tool_registry),
        persistence.clone(),
        trace_sink,
        RuntimeConfig::default(),
    );

    let mut handle = facade.stream(waiting_agent(), "thread-cancel-1".into(), "go".into(), None);

    // Drain a frame or two so we know the run has actually started and
    // dispatched the tool before we cancel it.
    let _ = tokio::time::timeout(std::time::Duration::from_millis(500), handle.receiver.recv()).await;

    assert!(!handle.is_finished(), "run finished before the tool ever blocked on cancellation");
    handle.cancel();

    // drain until the terminal frame or the channel closes
    loop {
        match tokio::time::timeout(std::time::Duration::from_secs(2), handle.receiver.recv()).await {
            Ok(Some(event)) => {
                if let RunEvent::Error { kind, .. } = &event {
                    assert_eq!(*kind, ErrorKind::Cancelled);
                }
                if event.is_terminal_frame() {
                    break;
                }
            }
            Ok(None) => break,
            Err(_) => panic!("run did not reach a terminal frame after cancellation"),
        }
    }

    // give the background writer a moment to persist the Run's final state
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let runs = persistence.list_runs("thread-cancel-1").await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Cancelled);
}

#[tokio::test]
async fn explicit_cancel_without_dropping_the_handle_also_stops_the_run() {
    let persistence = InMemoryPersistence::new();
    let function_registry = FunctionRegistry::new();
    function_registry
        .register_async(
            "wait_forever",
            Arc::new(|ctx: ToolContext, _v: serde_json::Value| {
                Box::pin(async move {
                    ctx.cancel.cancelled().await;
                    Err(ToolError::new(ErrorKind::Cancelled, "observed cancellation"))
                })
            }),
        )
        .await;

    let mut tool_registry = ToolRegistry::new();
    tool_registry
        .register(ToolType::Function, "wait_forever", Arc::new(FunctionAdapterFactory::new(function_registry)))
        .unwrap();

    let trace_sink = InMemoryTraceSink::new(16);
    let facade = StreamingFacade::new(
        Arc::new(SingleSlowToolDriver),
        Arc::new(tool_registry),
        persistence.clone(),
        trace_sink,
        RuntimeConfig::default(),
    );

    let handle = facade.stream(waiting_agent(), "thread-cancel-2".into(), "go".into(), None);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    handle.cancel();

    for _ in 0..100 {
        if handle.is_finished() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert!(handle.is_finished(), "run never observed the explicit cancel");
}
