//! End-to-end: a single turn requesting two tool calls at once must
//! dispatch them concurrently, not one after another.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use futures_util::stream;
use serde_json::json;

use agentcore::core::config::RuntimeConfig;
use agentcore::core::errors::CoreError;
use agentcore::core::event::NoopEventHandler;
use agentcore::core::llm_driver::{DriverMessage, LlmDriver, LlmEvent, LlmEventStream, ToolRequest, Usage};
use agentcore::core::model::{AgentSpec, AgentStatus, Role, RunStatus, ToolConfig, ToolType};
use agentcore::core::persistence::InMemoryPersistence;
use agentcore::core::runner::AgentRunner;
use agentcore::core::tool_adapters::function::{FunctionAdapterFactory, FunctionRegistry};
use agentcore::core::tool_protocol::{tokio_util::CancellationToken, ToolRegistry};

const SLOW_TOOL_SLEEP: Duration = Duration::from_millis(150);

/// One turn requesting both `slow_a` and `slow_b`, then a final answer.
struct FanOutDriver {
    cursor: AtomicUsize,
}

#[async_trait]
impl LlmDriver for FanOutDriver {
    async fn stream(&self, _messages: &[DriverMessage], _tools: &[agentcore::core::tool_protocol::ToolMetadata]) -> Result<LlmEventStream, CoreError> {
        let turn = self.cursor.fetch_add(1, Ordering::SeqCst);
        let events: Vec<Result<LlmEvent, CoreError>> = if turn == 0 {
            vec![
                Ok(LlmEvent::ToolRequest(ToolRequest { call_id: "call_a".into(), tool_name: "slow_a".into(), arguments: json!({}) })),
                Ok(LlmEvent::ToolRequest(ToolRequest { call_id: "call_b".into(), tool_name: "slow_b".into(), arguments: json!({}) })),
                Ok(LlmEvent::Finish { reason: "tool_calls".into() }),
            ]
        } else {
            vec![
                Ok(LlmEvent::TextDelta("both done".into())),
                Ok(LlmEvent::Usage(Usage { input_tokens: 5, output_tokens: 2 })),
                Ok(LlmEvent::Finish { reason: "stop".into() }),
            ]
        };
        Ok(Box::pin(stream::iter(events)))
    }

    fn model_name(&self) -> &str {
        "fan-out-test-model"
    }
}

fn fan_out_agent() -> AgentSpec {
    AgentSpec {
        id: "fan-out-agent".into(),
        name: "Fan Out Agent".into(),
        description: "runs two slow tools at once".into(),
        status: AgentStatus::Active,
        system_prompt: "be helpful".into(),
        model: "fan-out-test-model".into(),
        temperature: 0.0,
        max_tokens: 256,
        max_messages: None,
        tools: vec![
            ToolConfig { kind: ToolType::Function, name: "slow_a".into(), target: "slow_a".into(), static_config: json!({}), enabled: true },
            ToolConfig { kind: ToolType::Function, name: "slow_b".into(), target: "slow_b".into(), static_config: json!({}), enabled: true },
        ],
        capability_tags: vec![],
        is_coordinator: false,
        created_by: "test".into(),
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn two_tool_calls_in_one_turn_run_concurrently() {
    let persistence = InMemoryPersistence::new();
    let function_registry = FunctionRegistry::new();
    for key in ["slow_a", "slow_b"] {
        function_registry
            .register_async(
                key,
                Arc::new(|_ctx, _v: serde_json::Value| {
                    Box::pin(async move {
                        tokio::time::sleep(SLOW_TOOL_SLEEP).await;
                        Ok(json!({"done": true}))
                    })
                }),
            )
            .await;
    }

    let mut tool_registry = ToolRegistry::new();
    let factory = Arc::new(FunctionAdapterFactory::new(function_registry));
    tool_registry.register(ToolType::Function, "slow_a", factory.clone()).unwrap();
    tool_registry.register(ToolType::Function, "slow_b", factory).unwrap();

    let runner = AgentRunner::new(
        Arc::new(FanOutDriver { cursor: AtomicUsize::new(0) }),
        Arc::new(tool_registry),
        persistence.clone(),
        Arc::new(NoopEventHandler),
        RuntimeConfig::default(),
    );

    let started = Instant::now();
    let output = runner.run(&fan_out_agent(), "thread-fanout-1", "go", None, CancellationToken::new()).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(output.status, RunStatus::Succeeded);
    assert_eq!(output.final_message.as_deref(), Some("both done"));
    // Sequential dispatch would take at least 2x SLOW_TOOL_SLEEP; concurrent
    // dispatch should finish well under that even with scheduling slack.
    assert!(elapsed < SLOW_TOOL_SLEEP * 2, "tool calls did not run concurrently: took {:?}", elapsed);

    let messages = persistence.list_messages("thread-fanout-1").await.unwrap();
    let tool_messages: Vec<_> = messages.iter().filter(|m| m.role == Role::Tool).collect();
    assert_eq!(tool_messages.len(), 2);

    let steps = persistence.list_steps(&output.run_id).await.unwrap();
    assert_eq!(steps.len(), 2);
    // steps from one turn are assigned consecutive ordinals, sorted on insert
    assert_eq!(steps[0].ordinal + 1, steps[1].ordinal);
}
