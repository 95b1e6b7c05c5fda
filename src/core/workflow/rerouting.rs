//! Re-routing: an evaluator agent is inserted after a specialist handoff;
//! an unsatisfied verdict sends control back to the coordinator for
//! another attempt, bounded by `maxHandoffs`. Exhausting the budget
//! returns the last specialist output with a `max_attempts_reached`
//! marker rather than looping forever.
//!
//! Reuses the sequential pattern's `AgentAsTool` handoff wiring
//! (`sequential.rs`) for the coordinator/specialist leg, adding a
//! capture so the evaluator judges the specialist's own output rather
//! than the coordinator's summary of it.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::core::errors::{CoreError, ErrorKind};
use crate::core::model::{AgentSpec, ToolConfig, ToolType};
use crate::core::runner::{AgentAsTool, RunOutput};
use crate::core::tool_protocol::{tokio_util::CancellationToken, Tool, ToolContext, ToolError, ToolFactory, ToolMetadata, ToolOutput, ToolRegistry};

use super::WorkflowContext;

struct CapturingSpecialist {
    inner: AgentAsTool,
    last_output: Arc<Mutex<Option<String>>>,
}

#[async_trait]
impl Tool for CapturingSpecialist {
    async fn invoke(&self, ctx: &ToolContext, input: Value) -> Result<ToolOutput, ToolError> {
        let output = self.inner.invoke(ctx, input).await?;
        if let Value::String(ref text) = output.value {
            *self.last_output.lock().await = Some(text.clone());
        }
        Ok(output)
    }

    fn describe(&self) -> ToolMetadata {
        self.inner.describe()
    }

    fn tool_type(&self) -> ToolType {
        self.inner.tool_type()
    }
}

struct PrebuiltToolFactory(Arc<dyn Tool>);

#[async_trait]
impl ToolFactory for PrebuiltToolFactory {
    async fn build(&self, _config: &ToolConfig) -> Result<Arc<dyn Tool>, ToolError> {
        Ok(self.0.clone())
    }
}

/// Marker prefixed onto the final message once `maxHandoffs` attempts
/// have all come back unsatisfied.
pub const MAX_ATTEMPTS_REACHED: &str = "max_attempts_reached";

#[derive(Debug, Clone)]
pub struct RerouteOutcome {
    pub final_output: RunOutput,
    pub attempts: usize,
    pub max_attempts_reached: bool,
}

pub struct RerouteWorkflow {
    ctx: WorkflowContext,
    coordinator: AgentSpec,
    specialist: AgentSpec,
    evaluator: AgentSpec,
    max_handoffs: usize,
}

impl RerouteWorkflow {
    pub fn new(ctx: WorkflowContext, coordinator: AgentSpec, specialist: AgentSpec, evaluator: AgentSpec, max_handoffs: usize) -> Self {
        Self { ctx, coordinator, specialist, evaluator, max_handoffs }
    }

    /// Runs the coordinator/specialist handoff, has the evaluator judge
    /// the specialist's output, and retries from the coordinator on an
    /// unsatisfied verdict until either a satisfied verdict or
    /// `maxHandoffs` attempts have run.
    pub async fn run(&self, thread_id: &str, user_input: &str, parent_run_id: Option<String>) -> Result<RerouteOutcome, CoreError> {
        if self.max_handoffs == 0 {
            return Err(CoreError::new(ErrorKind::ConfigError, "maxHandoffs must be at least 1"));
        }

        let last_specialist_text = Arc::new(Mutex::new(None::<String>));
        let specialist_runner = self.ctx.runner_for(&self.specialist);
        let evaluator_runner = self.ctx.runner_for(&self.evaluator);

        let capturing = CapturingSpecialist {
            inner: AgentAsTool::new(specialist_runner, self.specialist.clone(), self.ctx.persistence.clone()),
            last_output: last_specialist_text.clone(),
        };
        let mut registry = ToolRegistry::new();
        registry
            .register(ToolType::Function, self.specialist.id.clone(), Arc::new(PrebuiltToolFactory(Arc::new(capturing))))
            .map_err(|e| CoreError::new(ErrorKind::ConfigError, e.to_string()))?;

        let mut coordinator = self.coordinator.clone();
        coordinator.tools.push(ToolConfig {
            kind: ToolType::Function,
            name: self.specialist.id.clone(),
            target: self.specialist.id.clone(),
            static_config: serde_json::json!({}),
            enabled: true,
        });

        let coordinator_runner = Arc::new(crate::core::runner::AgentRunner::new(
            self.ctx.llm.clone(),
            Arc::new(registry),
            self.ctx.persistence.clone(),
            self.ctx.events.clone(),
            self.ctx.config.clone(),
        ));

        let mut feedback: Option<String> = None;
        let mut last_output: Option<RunOutput> = None;

        for attempt in 1..=self.max_handoffs {
            let cancel = CancellationToken::new();
            let input = match &feedback {
                Some(fb) => format!("{}\n\nEvaluator feedback from the previous attempt: {}", user_input, fb),
                None => user_input.to_string(),
            };
            // Cleared before each attempt so a coordinator that answers
            // without re-invoking the specialist this time around falls
            // back to its own final message, rather than the evaluator
            // re-judging a previous attempt's captured output.
            *last_specialist_text.lock().await = None;
            let coordinator_output = coordinator_runner.run(&coordinator, thread_id, &input, parent_run_id.clone(), cancel.clone()).await?;

            let specialist_text = last_specialist_text
                .lock()
                .await
                .clone()
                .or_else(|| coordinator_output.final_message.clone())
                .unwrap_or_default();

            let evaluator_input = format!(
                "Task: {}\n\nSpecialist output: {}\n\nRespond with exactly \"satisfied\" or \"unsatisfied\" followed by a one-line reason.",
                user_input, specialist_text
            );
            let evaluator_output = evaluator_runner
                .run(&self.evaluator, thread_id, &evaluator_input, Some(coordinator_output.run_id.clone()), cancel)
                .await?;
            let verdict = evaluator_output.final_message.clone().unwrap_or_default();
            let satisfied = verdict.trim_start().to_lowercase().starts_with("satisfied");

            last_output = Some(coordinator_output.clone());
            if satisfied {
                return Ok(RerouteOutcome { final_output: coordinator_output, attempts: attempt, max_attempts_reached: false });
            }
            feedback = Some(verdict);
        }

        let mut output = last_output.expect("loop runs at least once since max_handoffs >= 1");
        output.final_message = Some(format!("{}: {}", MAX_ATTEMPTS_REACHED, output.final_message.clone().unwrap_or_default()));
        Ok(RerouteOutcome { final_output: output, attempts: self.max_handoffs, max_attempts_reached: true })
    }
}
