//! Parallel fan-out / fan-in: N specialists run concurrently on
//! the same input; once all are terminal (or their own deadline has
//! passed), a merger agent synthesizes their outputs — but only if at
//! least `k` of `N` succeeded.
//!
//! Grounded on `runner.rs`'s within-turn concurrent tool dispatch
//! (`futures_util::future::join_all`) — the same fan-out-then-join shape,
//! one level up: specialists here are whole Runs instead of tool calls,
//! each with its own per-run deadline via `tokio::time::timeout` rather
//! than the shared `ToolContext::deadline`.

use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;

use crate::core::errors::{CoreError, ErrorKind};
use crate::core::model::AgentSpec;
use crate::core::runner::RunOutput;
use crate::core::tool_protocol::tokio_util::CancellationToken;

use super::WorkflowContext;

/// One specialist's outcome: either it finished (successfully or not)
/// within its deadline, or it was cancelled for running past it.
#[derive(Debug, Clone)]
pub enum SpecialistOutcome {
    Finished(RunOutput),
    TimedOut,
}

pub struct ParallelWorkflow {
    ctx: WorkflowContext,
    specialists: Vec<AgentSpec>,
    merger: AgentSpec,
    specialist_deadline: Duration,
}

impl ParallelWorkflow {
    pub fn new(ctx: WorkflowContext, specialists: Vec<AgentSpec>, merger: AgentSpec, specialist_deadline: Duration) -> Self {
        Self { ctx, specialists, merger, specialist_deadline }
    }

    pub async fn run(&self, thread_id: &str, user_input: &str, parent_run_id: Option<String>) -> Result<RunOutput, CoreError> {
        let futures = self.specialists.iter().map(|specialist| {
            let runner = self.ctx.runner_for(specialist);
            let specialist = specialist.clone();
            let thread_id = thread_id.to_string();
            let user_input = user_input.to_string();
            let parent_run_id = parent_run_id.clone();
            let deadline = self.specialist_deadline;
            async move {
                let cancel = CancellationToken::new();
                let run_cancel = cancel.clone();
                match tokio::time::timeout(
                    deadline,
                    runner.run(&specialist, &thread_id, &user_input, parent_run_id, run_cancel),
                )
                .await
                {
                    Ok(Ok(output)) => SpecialistOutcome::Finished(output),
                    Ok(Err(e)) => SpecialistOutcome::Finished(RunOutput {
                        run_id: String::new(),
                        status: crate::core::model::RunStatus::Failed,
                        final_message: Some(e.redacted_message()),
                        input_tokens: 0,
                        output_tokens: 0,
                        cost_usd: 0.0,
                        error_kind: Some(e.kind),
                    }),
                    Err(_) => {
                        cancel.cancel();
                        SpecialistOutcome::TimedOut
                    }
                }
            }
        });

        let outcomes: Vec<SpecialistOutcome> = join_all(futures).await;
        let n = outcomes.len();
        let succeeded: Vec<&RunOutput> = outcomes
            .iter()
            .filter_map(|o| match o {
                SpecialistOutcome::Finished(output) if output.error_kind.is_none() => Some(output),
                _ => None,
            })
            .collect();

        let k = self.ctx.config.quorum_k(n);
        if succeeded.len() < k {
            return Err(CoreError::new(
                ErrorKind::QuorumFailed,
                format!("only {} of {} specialists succeeded, need at least {}", succeeded.len(), n, k),
            ));
        }

        let merged_input = succeeded
            .iter()
            .enumerate()
            .map(|(i, output)| format!("specialist {}: {}", i + 1, output.final_message.as_deref().unwrap_or("")))
            .collect::<Vec<_>>()
            .join("\n");

        let merger_runner = self.ctx.runner_for(&self.merger);
        let cancel = CancellationToken::new();
        merger_runner.run(&self.merger, thread_id, &merged_input, parent_run_id, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::RuntimeConfig;
    use crate::core::event::NoopEventHandler;
    use crate::core::llm_driver::test_double::{ScriptedDriver, ScriptedTurn};
    use crate::core::model::AgentStatus;
    use crate::core::persistence::InMemoryPersistence;
    use chrono::Utc;

    fn agent(id: &str) -> AgentSpec {
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
            is_coordinator: false,
            created_by: "system".into(),
            created_at: Utc::now(),
        }
    }

    fn ctx_with(driver: Arc<ScriptedDriver>) -> WorkflowContext {
        WorkflowContext {
            llm: driver,
            tool_registry: Arc::new(crate::core::tool_protocol::ToolRegistry::new()),
            persistence: InMemoryPersistence::new(),
            events: Arc::new(NoopEventHandler),
            config: RuntimeConfig::default(),
        }
    }

    #[tokio::test]
    async fn quorum_met_runs_merger() {
        // Every specialist and the merger draw from the same scripted
        // driver; three final answers are consumed: two specialists then
        // the merger.
        let driver = Arc::new(ScriptedDriver::new(
            "test-model",
            vec![
                ScriptedTurn::FinalAnswer("alpha".into()),
                ScriptedTurn::FinalAnswer("beta".into()),
                ScriptedTurn::FinalAnswer("merged".into()),
            ],
        ));
        let ctx = ctx_with(driver);
        let workflow = ParallelWorkflow::new(ctx, vec![agent("s1"), agent("s2")], agent("merger"), Duration::from_secs(5));
        let output = workflow.run("thread-1", "question", None).await.unwrap();
        assert_eq!(output.final_message.as_deref(), Some("merged"));
    }

    #[tokio::test]
    async fn quorum_not_met_fails_with_quorum_failed() {
        let driver = Arc::new(ScriptedDriver::new("test-model", vec![]));
        let mut ctx = ctx_with(driver);
        ctx.config.parallel_quorum_k = Some(2);
        let workflow = ParallelWorkflow::new(ctx, vec![agent("s1")], agent("merger"), Duration::from_millis(1));
        let err = workflow.run("thread-1", "question", None).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::QuorumFailed);
    }
}
