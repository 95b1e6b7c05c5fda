//! Sequential handoff: a coordinator agent is granted specialist
//! agents as tools and routes between them via ordinary tool requests.
//!
//! Constraint hooks ("if tool X was used, the next tool must be Y")
//! could be enforced by re-injecting a tool-availability filter before
//! each turn, but this Runner's reasoning loop doesn't expose a
//! per-turn filter hook — it runs a turn to completion once started —
//! so the equivalent guarantee is enforced one layer down instead: each
//! specialist handoff tool checks the constraint against the handoff
//! history *at invocation time* and rejects the call with a
//! `ToolError` if it would violate a constraint, which the Runner
//! turns into a tool-result message the coordinator sees on its very
//! next turn, a re-prompt delivered as a rejected call instead of a
//! filtered menu.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::core::errors::ErrorKind;
use crate::core::model::{AgentSpec, ToolType};
use crate::core::runner::{AgentAsTool, RunOutput};
use crate::core::tool_protocol::{Tool, ToolContext, ToolError, ToolMetadata, ToolOutput};

use super::WorkflowContext;

/// "if `after` was the last specialist handed off to, the next handoff
/// must be `must_be`".
#[derive(Debug, Clone)]
pub struct HandoffConstraint {
    pub after: String,
    pub must_be: String,
}

struct ConstrainedHandoff {
    specialist_name: String,
    inner: AgentAsTool,
    history: Arc<Mutex<Vec<String>>>,
    constraints: Arc<Vec<HandoffConstraint>>,
    max_handoffs: usize,
}

#[async_trait]
impl Tool for ConstrainedHandoff {
    async fn invoke(&self, ctx: &ToolContext, input: Value) -> Result<ToolOutput, ToolError> {
        {
            let mut history = self.history.lock().await;
            if history.len() >= self.max_handoffs {
                return Err(ToolError::new(
                    ErrorKind::MaxIterations,
                    format!("maxHandoffs ({}) reached; no further specialist handoffs permitted", self.max_handoffs),
                ));
            }
            if let Some(last) = history.last() {
                for constraint in self.constraints.iter() {
                    if &constraint.after == last && constraint.must_be != self.specialist_name {
                        return Err(ToolError::new(
                            ErrorKind::ProtocolError,
                            format!(
                                "handoff constraint violated: after '{}' the next handoff must be '{}', not '{}'",
                                constraint.after, constraint.must_be, self.specialist_name
                            ),
                        ));
                    }
                }
            }
            history.push(self.specialist_name.clone());
        }
        self.inner.invoke(ctx, input).await
    }

    fn describe(&self) -> ToolMetadata {
        self.inner.describe()
    }

    fn tool_type(&self) -> ToolType {
        ToolType::Function
    }
}

/// Outcome of a completed sequential-handoff workflow run.
#[derive(Debug, Clone)]
pub struct SequentialOutcome {
    pub coordinator_output: RunOutput,
    pub handoff_history: Vec<String>,
}

pub struct SequentialWorkflow {
    ctx: WorkflowContext,
    coordinator: AgentSpec,
    specialists: Vec<AgentSpec>,
    constraints: Vec<HandoffConstraint>,
    max_handoffs: usize,
}

impl SequentialWorkflow {
    pub fn new(
        ctx: WorkflowContext,
        coordinator: AgentSpec,
        specialists: Vec<AgentSpec>,
        constraints: Vec<HandoffConstraint>,
        max_handoffs: usize,
    ) -> Self {
        Self { ctx, coordinator, specialists, constraints, max_handoffs }
    }

    /// Runs the coordinator with every specialist wired in as an
    /// agent-as-tool, sharing one handoff-history log across all
    /// of them so constraints and `maxHandoffs` are enforced across the
    /// whole run rather than per-specialist.
    pub async fn run(
        &self,
        thread_id: &str,
        user_input: &str,
        parent_run_id: Option<String>,
    ) -> Result<SequentialOutcome, crate::core::errors::CoreError> {
        let history = Arc::new(Mutex::new(Vec::new()));
        let constraints = Arc::new(self.constraints.clone());

        let mut registry = crate::core::tool_protocol::ToolRegistry::new();
        for specialist in &self.specialists {
            let specialist_runner = self.ctx.runner_for(specialist);
            let handoff = ConstrainedHandoff {
                specialist_name: specialist.id.clone(),
                inner: AgentAsTool::new(specialist_runner, specialist.clone(), self.ctx.persistence.clone()),
                history: history.clone(),
                constraints: constraints.clone(),
                max_handoffs: self.max_handoffs,
            };
            let factory = Arc::new(PrebuiltToolFactory(Arc::new(handoff)));
            registry
                .register(ToolType::Function, specialist.id.clone(), factory)
                .map_err(|e| crate::core::errors::CoreError::new(ErrorKind::ConfigError, e.to_string()))?;
        }

        let mut coordinator = self.coordinator.clone();
        for specialist in &self.specialists {
            coordinator.tools.push(crate::core::model::ToolConfig {
                kind: ToolType::Function,
                name: specialist.id.clone(),
                target: specialist.id.clone(),
                static_config: serde_json::json!({}),
                enabled: true,
            });
        }

        let runner_with_handoffs = Arc::new(crate::core::runner::AgentRunner::new(
            self.ctx.llm.clone(),
            Arc::new(registry),
            self.ctx.persistence.clone(),
            self.ctx.events.clone(),
            self.ctx.config.clone(),
        ));
        let cancel = crate::core::tool_protocol::tokio_util::CancellationToken::new();
        let coordinator_output = runner_with_handoffs.run(&coordinator, thread_id, user_input, parent_run_id, cancel).await?;

        let handoff_history = history.lock().await.clone();
        Ok(SequentialOutcome { coordinator_output, handoff_history })
    }
}

/// Adapts an already-constructed `Arc<dyn Tool>` to the [`ToolFactory`]
/// interface the registry expects, since handoff tools are built ahead
/// of time here (they close over this run's shared history/constraints)
/// rather than from a bare [`crate::core::model::ToolConfig`].
struct PrebuiltToolFactory(Arc<dyn Tool>);

#[async_trait]
impl crate::core::tool_protocol::ToolFactory for PrebuiltToolFactory {
    async fn build(&self, _config: &crate::core::model::ToolConfig) -> Result<Arc<dyn Tool>, ToolError> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event::NoopEventHandler;
    use crate::core::llm_driver::test_double::{ScriptedDriver, ScriptedTurn};
    use crate::core::model::AgentStatus;
    use crate::core::persistence::InMemoryPersistence;
    use chrono::Utc;

    fn agent(id: &str, is_coordinator: bool) -> AgentSpec {
        AgentSpec {
            id: id.to_string(),
            name: id.to_string(),
            description: String::new(),
            status: AgentStatus::Active,
            system_prompt: "be helpful".into(),
            model: "test-model".into(),
            temperature: 0.0,
            max_tokens: 256,
            max_messages: None,
            tools: vec![],
            capability_tags: vec![],
            is_coordinator,
            created_by: "system".into(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn coordinator_with_no_handoffs_returns_final_answer() {
        let persistence = InMemoryPersistence::new();
        let driver = Arc::new(ScriptedDriver::new("test-model", vec![ScriptedTurn::FinalAnswer("done".into())]));
        let ctx = WorkflowContext {
            llm: driver,
            tool_registry: Arc::new(crate::core::tool_protocol::ToolRegistry::new()),
            persistence,
            events: Arc::new(NoopEventHandler),
            config: crate::core::config::RuntimeConfig::default(),
        };
        let workflow = SequentialWorkflow::new(ctx, agent("coordinator", true), vec![], vec![], 5);
        let outcome = workflow.run("thread-1", "hello", None).await.unwrap();
        assert!(outcome.handoff_history.is_empty());
        assert_eq!(outcome.coordinator_output.final_message.as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn handoff_beyond_max_is_rejected_by_the_tool() {
        let history = Arc::new(Mutex::new(vec!["spec-a".to_string()]));
        let persistence = InMemoryPersistence::new();
        let runner = Arc::new(crate::core::runner::AgentRunner::new(
            Arc::new(ScriptedDriver::new("test-model", vec![])),
            Arc::new(crate::core::tool_protocol::ToolRegistry::new()),
            persistence.clone(),
            Arc::new(NoopEventHandler),
            crate::core::config::RuntimeConfig::default(),
        ));
        let handoff = ConstrainedHandoff {
            specialist_name: "spec-a".into(),
            inner: AgentAsTool::new(runner, agent("spec-a", false), persistence),
            history: history.clone(),
            constraints: Arc::new(vec![]),
            max_handoffs: 1,
        };
        let ctx = crate::core::tool_protocol::fresh_context("run-1", std::time::Duration::from_secs(30));
        let err = handoff.invoke(&ctx, serde_json::json!({"message": "hi"})).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::MaxIterations);
    }
}
