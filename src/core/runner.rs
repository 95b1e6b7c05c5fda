//! The Agent Runner — the heart of the crate.
//!
//! A bounded tool-execution loop around one or more LLM round-trips,
//! emitting lifecycle events and accumulating token usage across
//! iterations. Three things set it apart from a simple single-call
//! chat loop: tool calls within one turn run concurrently rather than
//! one at a time, every event is the wire-shaped [`RunEvent`] rather
//! than a side-channel callback, and the whole run is persisted as it
//! proceeds rather than only returning a final response.

use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use crate::core::config::RuntimeConfig;
use crate::core::errors::{CoreError, ErrorKind};
use crate::core::event::{EventHandler, RunEvent, TraceEndStatus};
use crate::core::ids::{self, Clock, Deadline, SystemClock};
use crate::core::llm_driver::{DriverMessage, LlmDriver, LlmEvent};
use crate::core::model::{
    AgentSpec, Message, Metric, Role, Run, RunStatus, Step, StepKind, StepStatus, ToolCall, ToolCallStatus,
};
use crate::core::persistence::PersistenceGateway;
use crate::core::pricing;
use crate::core::tool_adapters::redact_for_trace;
use crate::core::tool_protocol::{tokio_util::CancellationToken, Tool, ToolContext, ToolRegistry};

/// Outcome of one top-level [`AgentRunner::run`] call, projected to
/// what the caller of the Runner itself needs — the full `Run` record
/// lives in the Persistence Gateway.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub run_id: String,
    pub status: RunStatus,
    pub final_message: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub error_kind: Option<ErrorKind>,
}

pub struct AgentRunner {
    llm: Arc<dyn LlmDriver>,
    tool_registry: Arc<ToolRegistry>,
    persistence: Arc<dyn PersistenceGateway>,
    events: Arc<dyn EventHandler>,
    config: RuntimeConfig,
}

impl AgentRunner {
    pub fn new(
        llm: Arc<dyn LlmDriver>,
        tool_registry: Arc<ToolRegistry>,
        persistence: Arc<dyn PersistenceGateway>,
        events: Arc<dyn EventHandler>,
        config: RuntimeConfig,
    ) -> Self {
        Self { llm, tool_registry, persistence, events, config }
    }

    /// Runs `agent` against `thread_id` with `user_input`, looping
    /// reasoning/tool-use turns until the model stops requesting tools,
    /// the per-run deadline expires, `max_tool_turns` is exhausted, or
    /// `cancel` fires. `parent_run_id` links child runs spawned by A2A
    /// delegation or workflow composition.
    pub async fn run(
        &self,
        agent: &AgentSpec,
        thread_id: &str,
        user_input: &str,
        parent_run_id: Option<String>,
        cancel: CancellationToken,
    ) -> Result<RunOutput, CoreError> {
        agent.validate().map_err(|kind| CoreError::new(kind, "invalid agent spec"))?;

        let clock = SystemClock;
        let run_id = ids::run_id();
        let mut run = Run::new_queued(run_id.clone(), thread_id.to_string(), agent.id.clone(), clock.now(), parent_run_id);
        run.status = RunStatus::Running;
        self.persistence.put_run(run.clone()).await?;

        let run_deadline = Deadline::after(&clock, self.config.agent_run_deadline);

        let built = self.tool_registry.build(&agent.tools).await;
        let mut tools: HashMap<String, Arc<dyn Tool>> = HashMap::new();
        for (cfg, result) in built {
            match result {
                Ok(tool) => {
                    tools.insert(cfg.name.clone(), tool);
                }
                Err(err) => {
                    log::warn!("agent '{}': tool '{}' unavailable: {}", agent.id, cfg.name, err);
                }
            }
        }
        let tool_metadata: Vec<_> = tools.values().map(|t| t.describe()).collect();

        let history = self.persistence.list_messages(thread_id).await?;
        let window = agent.max_messages.unwrap_or(self.config.max_messages);
        let mut next_ordinal = history.last().map(|m| m.ordinal + 1).unwrap_or(1);
        let mut next_step_ordinal = 1u64;

        let user_message = Message {
            id: ids::message_id(),
            thread_id: thread_id.to_string(),
            role: Role::User,
            content: user_input.to_string(),
            tool_call_id: None,
            created_at: clock.now(),
            ordinal: next_ordinal,
        };
        next_ordinal += 1;
        self.persistence.put_message(user_message.clone()).await?;

        let mut conversation: Vec<Message> = history;
        conversation.push(user_message);
        if conversation.len() > window {
            let cut = conversation.len() - window;
            conversation.drain(0..cut);
        }

        let mut total_input_tokens = 0u64;
        let mut total_output_tokens = 0u64;
        let mut outcome: Result<String, CoreError> = Err(CoreError::new(ErrorKind::MaxIterations, "max tool turns exceeded"));

        'turns: for _turn in 0..self.config.max_tool_turns {
            if cancel.is_cancelled() {
                outcome = Err(CoreError::new(ErrorKind::Cancelled, "run cancelled"));
                break;
            }
            if run_deadline.is_expired(&clock) {
                outcome = Err(CoreError::new(ErrorKind::Timeout, "agent run deadline exceeded"));
                break;
            }
            if total_input_tokens + total_output_tokens >= agent.max_tokens as u64 {
                outcome = Err(CoreError::new(ErrorKind::BudgetExceeded, "agent max_tokens budget exceeded"));
                break;
            }
            match self.persistence.tokens_for_user_on(&agent.created_by, crate::core::persistence::today()).await {
                Ok(used) if used >= self.config.user_daily_token_limit => {
                    outcome = Err(CoreError::new(ErrorKind::BudgetExceeded, "daily token budget exhausted"));
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }

            let driver_messages: Vec<DriverMessage> = conversation
                .iter()
                .map(|m| DriverMessage {
                    role: m.role,
                    content: m.content.clone(),
                    tool_call_id: m.tool_call_id.clone(),
                })
                .collect();

            let mut stream = match self.llm.stream(&driver_messages, &tool_metadata).await {
                Ok(s) => s,
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            };

            let mut text = String::new();
            let mut tool_requests = Vec::new();
            {
                use futures_util::StreamExt;
                loop {
                    match stream.next().await {
                        Some(Ok(LlmEvent::TextDelta(delta))) => {
                            self.events.on_run_event(&run_id, &RunEvent::Token { content: delta.clone() }).await;
                            text.push_str(&delta);
                        }
                        Some(Ok(LlmEvent::ToolRequest(req))) => tool_requests.push(req),
                        Some(Ok(LlmEvent::Usage(usage))) => {
                            total_input_tokens += usage.input_tokens;
                            total_output_tokens += usage.output_tokens;
                        }
                        Some(Ok(LlmEvent::Finish { .. })) => break,
                        Some(Err(e)) => {
                            outcome = Err(e);
                            break 'turns;
                        }
                        None => break,
                    }
                }
            }

            if tool_requests.is_empty() {
                let assistant_message = Message {
                    id: ids::message_id(),
                    thread_id: thread_id.to_string(),
                    role: Role::Assistant,
                    content: text.clone(),
                    tool_call_id: None,
                    created_at: clock.now(),
                    ordinal: next_ordinal,
                };
                next_ordinal += 1;
                self.persistence.put_message(assistant_message.clone()).await?;
                self.events
                    .on_run_event(
                        &run_id,
                        &RunEvent::MessageEnd { message_id: assistant_message.id.clone(), role: Role::Assistant, tokens: total_output_tokens },
                    )
                    .await;
                outcome = Ok(text);
                break;
            }

            let mut seen_call_ids = HashSet::new();
            for req in &tool_requests {
                if !seen_call_ids.insert(req.call_id.clone()) {
                    outcome = Err(CoreError::new(ErrorKind::ProtocolError, "duplicate tool call id in one turn"));
                    break 'turns;
                }
            }

            let first_step_ordinal = next_step_ordinal;
            next_step_ordinal += tool_requests.len() as u64;
            let dispatch_futures = tool_requests.into_iter().enumerate().map(|(idx, req)| {
                let step_ordinal = first_step_ordinal + idx as u64;
                let tool = tools.get(&req.tool_name).cloned();
                let persistence = self.persistence.clone();
                let events = self.events.clone();
                let run_id = run_id.clone();
                let parent_run_id_for_tools = Some(run_id.clone());
                let cancel = cancel.clone();
                let tool_deadline = self.config.tool_deadline;
                let truncate_at = self.config.tool_output_truncate_bytes;
                let run_deadline = run_deadline;
                async move {
                    dispatch_one_tool(
                        tool,
                        req,
                        step_ordinal,
                        &run_id,
                        parent_run_id_for_tools,
                        cancel,
                        tool_deadline,
                        run_deadline,
                        truncate_at,
                        persistence.as_ref(),
                        events.as_ref(),
                    )
                    .await
                }
            });
            let results = join_all(dispatch_futures).await;

            for tool_message in results {
                let tool_message = Message { thread_id: thread_id.to_string(), ordinal: next_ordinal, ..tool_message };
                next_ordinal += 1;
                self.persistence.put_message(tool_message.clone()).await?;
                conversation.push(tool_message);
            }
        }

        let (status, final_message, error_kind) = match outcome {
            Ok(text) => (RunStatus::Succeeded, Some(text), None),
            Err(e) if e.kind == ErrorKind::Cancelled => (RunStatus::Cancelled, None, Some(e.kind)),
            Err(e) => (RunStatus::Failed, None, Some(e.kind)),
        };

        let cost = pricing::cost_usd(&self.config, &agent.model, total_input_tokens, total_output_tokens);
        let mut run = self.persistence.get_run(&run_id).await?.unwrap_or(run);
        run.bump_tokens(total_input_tokens, total_output_tokens);
        run.cost_usd = cost;
        run.finish(status, clock.now(), error_kind);
        self.persistence.put_run(run.clone()).await?;
        self.persistence
            .put_metric(Metric {
                id: ids::metric_id(),
                date: crate::core::persistence::today(),
                user_id: agent.created_by.clone(),
                agent_id: agent.id.clone(),
                run_id: run_id.clone(),
                model: agent.model.clone(),
                tokens_in: total_input_tokens,
                tokens_out: total_output_tokens,
                cost_usd: cost,
                latency_ms: 0,
            })
            .await?;

        self.events
            .on_run_event(&run_id, &RunEvent::RunEnd { run_id: run_id.clone(), status, tokens: total_input_tokens + total_output_tokens, cost_usd: cost })
            .await;
        match error_kind {
            Some(kind) => {
                self.events.on_run_event(&run_id, &RunEvent::Error { kind, message: format!("run ended with {}", kind) }).await;
            }
            None => self.events.on_run_event(&run_id, &RunEvent::Done).await,
        }

        Ok(RunOutput {
            run_id,
            status,
            final_message,
            input_tokens: total_input_tokens,
            output_tokens: total_output_tokens,
            cost_usd: cost,
            error_kind,
        })
    }
}

#[allow(clippy::too_many_arguments)]
async fn dispatch_one_tool(
    tool: Option<Arc<dyn Tool>>,
    req: crate::core::llm_driver::ToolRequest,
    step_ordinal: u64,
    run_id: &str,
    parent_run_id: Option<String>,
    cancel: CancellationToken,
    tool_deadline: Duration,
    run_deadline: Deadline,
    truncate_at: usize,
    persistence: &dyn PersistenceGateway,
    events: &dyn EventHandler,
) -> Message {
    let clock = SystemClock;
    let step_id = ids::step_id();
    let trace_id = ids::trace_id();
    let started = clock.now();

    let step = Step {
        id: step_id.clone(),
        run_id: run_id.to_string(),
        ordinal: step_ordinal,
        kind: StepKind::ToolCall,
        started_at: started,
        ended_at: None,
        status: StepStatus::InProgress,
        parent_step_id: None,
    };
    let _ = persistence.put_step(step.clone()).await;

    let tool = match tool {
        Some(t) => t,
        None => {
            let error = CoreError::new(ErrorKind::ToolNotAvailable, format!("no tool registered under '{}'", req.tool_name));
            return finish_failed_tool_call(
                persistence, events, step, trace_id, run_id, &req, started, clock.now(), error,
            )
            .await;
        }
    };

    let ctx = ToolContext {
        deadline: Deadline::after(&clock, tool_deadline).min(run_deadline),
        cancel,
        run_id: run_id.to_string(),
        parent_run_id,
    };

    let input_preview = redact_for_trace(&req.arguments.to_string());
    events
        .on_run_event(
            run_id,
            &RunEvent::TraceStart {
                trace_id: trace_id.clone(),
                parent_trace_id: None,
                tool: req.tool_name.clone(),
                tool_type: tool.tool_type(),
                target: req.tool_name.clone(),
                input_preview,
                ts: started,
            },
        )
        .await;

    match tool.invoke(&ctx, req.arguments.clone()).await {
        Ok(output) => {
            let ended = clock.now();
            let latency_ms = (ended - started).num_milliseconds().max(0) as u64;
            let (content, truncated) = truncate_for_history(&output.value, truncate_at);
            events
                .on_run_event(
                    run_id,
                    &RunEvent::TraceEnd {
                        trace_id,
                        status: TraceEndStatus::Succeeded,
                        latency_ms,
                        tokens: output.tokens,
                        output_preview: Some(redact_for_trace(&content)),
                        error_kind: None,
                    },
                )
                .await;
            let call = ToolCall {
                id: ids::tool_call_id(),
                step_id: step_id.clone(),
                tool_type: tool.tool_type(),
                tool_name: req.tool_name.clone(),
                target: req.tool_name.clone(),
                input: req.arguments.clone(),
                input_hash: crate::core::model::canonical_hash(&req.arguments),
                output: Some(output.value.clone()),
                output_hash: Some(crate::core::model::canonical_hash(&output.value)),
                status: ToolCallStatus::Succeeded,
                latency_ms: Some(latency_ms),
                error_kind: None,
                cached: false,
                truncated,
            };
            let _ = persistence.put_tool_call(call).await;
            let mut step = step;
            step.ended_at = Some(ended);
            step.status = StepStatus::Succeeded;
            let _ = persistence.put_step(step).await;

            Message {
                id: ids::message_id(),
                thread_id: String::new(),
                role: Role::Tool,
                content,
                tool_call_id: Some(req.call_id),
                created_at: ended,
                ordinal: 0,
            }
        }
        Err(tool_error) => {
            finish_failed_tool_call(
                persistence,
                events,
                step,
                trace_id,
                run_id,
                &req,
                started,
                clock.now(),
                CoreError::new(tool_error.kind, tool_error.message),
            )
            .await
        }
    }
}

async fn finish_failed_tool_call(
    persistence: &dyn PersistenceGateway,
    events: &dyn EventHandler,
    mut step: Step,
    trace_id: String,
    run_id: &str,
    req: &crate::core::llm_driver::ToolRequest,
    started: chrono::DateTime<chrono::Utc>,
    ended: chrono::DateTime<chrono::Utc>,
    error: CoreError,
) -> Message {
    let latency_ms = (ended - started).num_milliseconds().max(0) as u64;
    events
        .on_run_event(
            run_id,
            &RunEvent::TraceEnd {
                trace_id,
                status: TraceEndStatus::Failed,
                latency_ms,
                tokens: None,
                output_preview: None,
                error_kind: Some(error.kind),
            },
        )
        .await;
    let call = ToolCall {
        id: ids::tool_call_id(),
        step_id: step.id.clone(),
        tool_type: crate::core::model::ToolType::Function,
        tool_name: req.tool_name.clone(),
        target: req.tool_name.clone(),
        input: req.arguments.clone(),
        input_hash: crate::core::model::canonical_hash(&req.arguments),
        output: None,
        output_hash: None,
        status: ToolCallStatus::Failed,
        latency_ms: Some(latency_ms),
        error_kind: Some(error.kind),
        cached: false,
        truncated: false,
    };
    let _ = persistence.put_tool_call(call).await;
    step.ended_at = Some(ended);
    step.status = StepStatus::Failed;
    let _ = persistence.put_step(step).await;

    Message {
        id: ids::message_id(),
        thread_id: String::new(),
        role: Role::Tool,
        content: format!("tool '{}' failed: {}", req.tool_name, error.redacted_message()),
        tool_call_id: Some(req.call_id.clone()),
        created_at: ended,
        ordinal: 0,
    }
}

/// Truncates a tool output's textual rendering to `max_bytes`, marking
/// it so the Runner and downstream records know it is incomplete.
fn truncate_for_history(value: &Value, max_bytes: usize) -> (String, bool) {
    let rendered = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if rendered.len() <= max_bytes {
        (rendered, false)
    } else {
        let mut cut = max_bytes;
        while !rendered.is_char_boundary(cut) {
            cut -= 1;
        }
        (format!("{}...[truncated]", &rendered[..cut]), true)
    }
}

/// Agent-as-tool composition primitive (`asTool()`): wraps an
/// [`AgentRunner`] + [`AgentSpec`] pair as an in-process [`Tool`] so a
/// coordinator agent — or the Workflow Orchestrator's sequential
/// handoff — can invoke it exactly like any other tool, with the child
/// run linked to the caller via `parentRunId`.
pub struct AgentAsTool {
    runner: Arc<AgentRunner>,
    agent: AgentSpec,
    persistence: Arc<dyn PersistenceGateway>,
}

impl AgentAsTool {
    pub fn new(runner: Arc<AgentRunner>, agent: AgentSpec, persistence: Arc<dyn PersistenceGateway>) -> Self {
        Self { runner, agent, persistence }
    }
}

#[async_trait]
impl Tool for AgentAsTool {
    async fn invoke(&self, ctx: &ToolContext, input: Value) -> Result<crate::core::tool_protocol::ToolOutput, crate::core::tool_protocol::ToolError> {
        let text = input.get("message").and_then(Value::as_str).map(str::to_string).unwrap_or_else(|| input.to_string());
        let thread_id = ids::thread_id();
        let thread = crate::core::model::Thread {
            id: thread_id.clone(),
            owner_id: self.agent.created_by.clone(),
            target: crate::core::model::ThreadOwner::Agent { agent_id: self.agent.id.clone() },
            title: "agent-as-tool delegation".to_string(),
            created_at: SystemClock.now(),
            last_message_at: SystemClock.now(),
            message_count: 0,
            status: crate::core::model::ThreadStatus::Active,
        };
        self.persistence
            .put_thread(thread)
            .await
            .map_err(|e| crate::core::tool_protocol::ToolError::new(e.kind, e.message))?;

        let output = self
            .runner
            .run(&self.agent, &thread_id, &text, Some(ctx.run_id.clone()), ctx.cancel.clone())
            .await
            .map_err(|e| crate::core::tool_protocol::ToolError::new(e.kind, e.message))?;

        match output.final_message {
            Some(text) => Ok(crate::core::tool_protocol::ToolOutput {
                value: Value::String(text),
                tokens: Some(output.input_tokens + output.output_tokens),
            }),
            None => Err(crate::core::tool_protocol::ToolError::new(
                output.error_kind.unwrap_or(ErrorKind::ToolInvocationError),
                "delegated agent run did not produce a final message",
            )),
        }
    }

    fn describe(&self) -> crate::core::tool_protocol::ToolMetadata {
        crate::core::tool_protocol::ToolMetadata {
            name: self.agent.name.clone(),
            description: self.agent.description.clone(),
            parameters_schema: serde_json::json!({"type": "object", "properties": {"message": {"type": "string"}}}),
        }
    }

    fn tool_type(&self) -> crate::core::model::ToolType {
        crate::core::model::ToolType::Function
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::llm_driver::test_double::{ScriptedDriver, ScriptedTurn};
    use crate::core::model::{AgentStatus, ToolConfig, ToolType};
    use crate::core::persistence::InMemoryPersistence;
    use crate::core::tool_adapters::function::{FunctionAdapterFactory, FunctionRegistry};

    fn sample_agent() -> AgentSpec {
        AgentSpec {
            id: "agent_1".into(),
            name: "assistant".into(),
            description: "test agent".into(),
            status: AgentStatus::Active,
            system_prompt: "be helpful".into(),
            model: "test-model".into(),
            temperature: 0.7,
            max_tokens: 1024,
            max_messages: Some(20),
            tools: vec![],
            capability_tags: vec![],
            is_coordinator: false,
            created_by: "user_1".into(),
            created_at: SystemClock.now(),
        }
    }

    #[tokio::test]
    async fn single_turn_run_with_no_tools_succeeds() {
        let driver = Arc::new(ScriptedDriver::new("test-model", vec![ScriptedTurn::FinalAnswer("hello there".into())]));
        let registry = Arc::new(ToolRegistry::new());
        let persistence = InMemoryPersistence::new();
        let runner = AgentRunner::new(driver, registry, persistence.clone(), Arc::new(crate::core::event::NoopEventHandler), RuntimeConfig::default());

        let output = runner
            .run(&sample_agent(), "thread_1", "hi", None, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(output.status, RunStatus::Succeeded);
        assert_eq!(output.final_message.as_deref(), Some("hello there"));
        let messages = persistence.list_messages("thread_1").await.unwrap();
        assert_eq!(messages.len(), 2);
    }

    #[tokio::test]
    async fn tool_request_then_final_answer_dispatches_and_continues() {
        let driver = Arc::new(ScriptedDriver::new(
            "test-model",
            vec![
                ScriptedTurn::RequestTool { call_id: "call_1".into(), tool_name: "add".into(), arguments: serde_json::json!({"a": 2, "b": 3}) },
                ScriptedTurn::FinalAnswer("the sum is 5".into()),
            ],
        ));
        let function_registry = FunctionRegistry::new();
        function_registry
            .register_sync(
                "add",
                Arc::new(|v: Value| {
                    let a = v["a"].as_i64().unwrap_or(0);
                    let b = v["b"].as_i64().unwrap_or(0);
                    Ok(serde_json::json!({"sum": a + b}))
                }),
            )
            .await;
        let mut registry = ToolRegistry::new();
        registry.register(ToolType::Function, "add", Arc::new(FunctionAdapterFactory::new(function_registry))).unwrap();
        let registry = Arc::new(registry);

        let mut agent = sample_agent();
        agent.tools.push(ToolConfig {
            kind: ToolType::Function,
            name: "add".into(),
            target: "add".into(),
            static_config: serde_json::json!({}),
            enabled: true,
        });

        let persistence = InMemoryPersistence::new();
        let runner = AgentRunner::new(driver, registry, persistence, Arc::new(crate::core::event::NoopEventHandler), RuntimeConfig::default());

        let output = runner.run(&agent, "thread_2", "what is 2+3?", None, CancellationToken::new()).await.unwrap();
        assert_eq!(output.status, RunStatus::Succeeded);
        assert_eq!(output.final_message.as_deref(), Some("the sum is 5"));
    }

    #[tokio::test]
    async fn unknown_tool_name_produces_failed_step_but_run_continues() {
        let driver = Arc::new(ScriptedDriver::new(
            "test-model",
            vec![
                ScriptedTurn::RequestTool { call_id: "call_1".into(), tool_name: "missing".into(), arguments: serde_json::json!({}) },
                ScriptedTurn::FinalAnswer("handled the failure".into()),
            ],
        ));
        let registry = Arc::new(ToolRegistry::new());
        let persistence = InMemoryPersistence::new();
        let runner = AgentRunner::new(driver, registry, persistence, Arc::new(crate::core::event::NoopEventHandler), RuntimeConfig::default());

        let output = runner.run(&sample_agent(), "thread_3", "hi", None, CancellationToken::new()).await.unwrap();
        assert_eq!(output.status, RunStatus::Succeeded);
        assert_eq!(output.final_message.as_deref(), Some("handled the failure"));
    }

    #[test]
    fn truncation_marks_long_output() {
        let long = Value::String("x".repeat(100));
        let (content, truncated) = truncate_for_history(&long, 10);
        assert!(truncated);
        assert!(content.ends_with("...[truncated]"));
    }

    #[tokio::test]
    async fn per_run_max_tokens_budget_exceeded_stops_the_loop() {
        let driver = Arc::new(ScriptedDriver::new(
            "test-model",
            vec![
                ScriptedTurn::RequestTool { call_id: "call_1".into(), tool_name: "missing".into(), arguments: serde_json::json!({}) },
                ScriptedTurn::FinalAnswer("should never be reached".into()),
            ],
        ));
        let registry = Arc::new(ToolRegistry::new());
        let persistence = InMemoryPersistence::new();
        let mut agent = sample_agent();
        agent.max_tokens = 10;
        let runner = AgentRunner::new(driver, registry, persistence, Arc::new(crate::core::event::NoopEventHandler), RuntimeConfig::default());

        let output = runner.run(&agent, "thread_budget_1", "hi", None, CancellationToken::new()).await.unwrap();
        assert_eq!(output.status, RunStatus::Failed);
        assert_eq!(output.error_kind, Some(ErrorKind::BudgetExceeded));
    }

    #[tokio::test]
    async fn daily_user_token_budget_exceeded_stops_before_the_first_llm_call() {
        let driver = Arc::new(ScriptedDriver::new("test-model", vec![ScriptedTurn::FinalAnswer("should never be reached".into())]));
        let registry = Arc::new(ToolRegistry::new());
        let persistence = InMemoryPersistence::new();
        persistence
            .put_metric(crate::core::model::Metric {
                id: "metric_1".into(),
                date: crate::core::persistence::today(),
                user_id: "user_1".into(),
                agent_id: "agent_1".into(),
                run_id: "prior_run".into(),
                model: "test-model".into(),
                tokens_in: 2_000_000,
                tokens_out: 0,
                cost_usd: 0.0,
                latency_ms: 0,
            })
            .await
            .unwrap();

        let mut config = RuntimeConfig::default();
        config.user_daily_token_limit = 1_000_000;
        let runner = AgentRunner::new(driver, registry, persistence, Arc::new(crate::core::event::NoopEventHandler), config);

        let output = runner.run(&sample_agent(), "thread_budget_2", "hi", None, CancellationToken::new()).await.unwrap();
        assert_eq!(output.status, RunStatus::Failed);
        assert_eq!(output.error_kind, Some(ErrorKind::BudgetExceeded));
    }
}
