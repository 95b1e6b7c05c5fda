//! Human gate: drives a [`HumanGateStore`] through an actual workflow
//! Run rather than leaving it as a bare primitive a caller has to wire
//! up by hand.
//!
//! A proposer agent runs to completion and its final message becomes
//! the recommendation payload; the Run is then held open while a
//! `trace_update` of kind gate carries the recommendation and a
//! callback token out to the caller, the same `Step`-per-phase shape
//! `AgentRunner::run` already uses for reasoning/tool-call/message
//! steps, just with `StepKind::Gate` instead. Resolution is consumed
//! from the store and mapped onto the resume semantics: `reject`
//! finalizes the Run `succeeded` with a reject payload, `approve`/`edit`
//! finalize it `succeeded` with the (possibly merged) recommendation.
//!
//! Split into `open` (runs the proposer, opens the gate, returns the
//! token) and `resume` (awaits resolution and finalizes the Run) so a
//! caller — the HTTP surface or a test — can hand the token to whoever
//! resolves it before the suspend actually completes.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};

use crate::core::errors::{CoreError, ErrorKind};
use crate::core::event::RunEvent;
use crate::core::model::{AgentSpec, RunStatus, Step, StepKind, StepStatus};
use crate::core::runner::RunOutput;
use crate::core::tool_protocol::tokio_util::CancellationToken;

use super::human_gate::{GateOutcome, HumanGateStore};
use super::WorkflowContext;

/// What the human decided, carried back to the caller alongside the
/// finalized [`RunOutput`].
#[derive(Debug, Clone)]
pub enum GateResolution {
    Approved(Value),
    Rejected,
}

#[derive(Debug, Clone)]
pub struct GateWorkflowOutcome {
    pub run_output: RunOutput,
    pub gate_token: String,
    pub resolution: GateResolution,
}

/// A Run that has reached its gate and is awaiting a decision.
#[derive(Debug, Clone)]
pub struct OpenGate {
    pub run_output: RunOutput,
    pub token: String,
    pub recommendation: Value,
}

/// Runs `proposer` to produce a recommendation, then suspends the Run
/// at a gate until `gates` resolves it.
pub struct GateWorkflow {
    ctx: WorkflowContext,
    proposer: AgentSpec,
    gates: Arc<HumanGateStore>,
}

impl GateWorkflow {
    pub fn new(ctx: WorkflowContext, proposer: AgentSpec, gates: Arc<HumanGateStore>) -> Self {
        Self { ctx, proposer, gates }
    }

    /// Runs the proposer, opens a gate on its recommendation, and
    /// leaves the Run at `running` pending a decision.
    pub async fn open(
        &self,
        thread_id: &str,
        user_input: &str,
        parent_run_id: Option<String>,
    ) -> Result<OpenGate, CoreError> {
        let runner = self.ctx.runner_for(&self.proposer);
        let cancel = CancellationToken::new();
        let proposer_output = runner.run(&self.proposer, thread_id, user_input, parent_run_id, cancel).await?;
        let run_id = proposer_output.run_id.clone();

        let recommendation = match &proposer_output.final_message {
            Some(text) => serde_json::from_str(text).unwrap_or_else(|_| json!({"message": text})),
            None => json!({"message": Value::Null}),
        };

        let token = self.gates.open(recommendation.clone()).await;

        // The proposer's own run already reached a terminal status;
        // hold it back open at `running` while the gate is outstanding
        // so a caller inspecting the Run mid-gate sees it as in flight,
        // not as already finished.
        let mut run = self
            .ctx
            .persistence
            .get_run(&run_id)
            .await?
            .ok_or_else(|| CoreError::new(ErrorKind::ProtocolError, "run vanished before its gate could open"))?;
        run.status = RunStatus::Running;
        run.ended_at = None;
        self.ctx.persistence.put_run(run.clone()).await?;

        let steps = self.ctx.persistence.list_steps(&run_id).await?;
        let ordinal = steps.last().map(|s| s.ordinal + 1).unwrap_or(1);
        let now = Utc::now();
        let gate_step = Step {
            id: crate::core::ids::step_id(),
            run_id: run_id.clone(),
            ordinal,
            kind: StepKind::Gate,
            started_at: now,
            ended_at: None,
            status: StepStatus::InProgress,
            parent_step_id: None,
        };
        self.ctx.persistence.put_step(gate_step).await?;

        self.ctx
            .events
            .on_run_event(
                &run_id,
                &RunEvent::TraceUpdate {
                    trace_id: run_id.clone(),
                    message: Some("awaiting_human".into()),
                    gate_token: Some(token.clone()),
                    payload: Some(recommendation.clone()),
                },
            )
            .await;

        Ok(OpenGate { run_output: proposer_output, token, recommendation })
    }

    /// Awaits `opened.token`'s resolution and finalizes the Run.
    pub async fn resume(&self, opened: &OpenGate) -> Result<GateWorkflowOutcome, CoreError> {
        let run_id = opened.run_output.run_id.clone();
        let outcome = self.gates.await_resolution(&opened.token).await?;

        let mut steps = self.ctx.persistence.list_steps(&run_id).await?;
        if let Some(gate_step) = steps.iter_mut().find(|s| s.kind == StepKind::Gate && s.status == StepStatus::InProgress) {
            gate_step.ended_at = Some(Utc::now());
            gate_step.status = StepStatus::Succeeded;
            self.ctx.persistence.put_step(gate_step.clone()).await?;
        }

        let (final_payload, resolution) = match outcome {
            GateOutcome::Rejected => (json!({"rejected": true}), GateResolution::Rejected),
            GateOutcome::Proceed(value) => (value.clone(), GateResolution::Approved(value)),
        };

        let mut run = self
            .ctx
            .persistence
            .get_run(&run_id)
            .await?
            .ok_or_else(|| CoreError::new(ErrorKind::ProtocolError, "run vanished while awaiting its gate"))?;
        run.status = RunStatus::Succeeded;
        run.error_kind = None;
        run.ended_at = Some(Utc::now());
        self.ctx.persistence.put_run(run.clone()).await?;

        self.ctx
            .events
            .on_run_event(
                &run_id,
                &RunEvent::RunEnd {
                    run_id: run_id.clone(),
                    status: RunStatus::Succeeded,
                    tokens: opened.run_output.input_tokens + opened.run_output.output_tokens,
                    cost_usd: opened.run_output.cost_usd,
                },
            )
            .await;
        self.ctx.events.on_run_event(&run_id, &RunEvent::Done).await;

        let mut run_output = opened.run_output.clone();
        run_output.status = RunStatus::Succeeded;
        run_output.error_kind = None;
        run_output.final_message = Some(final_payload.to_string());

        Ok(GateWorkflowOutcome { run_output, gate_token: opened.token.clone(), resolution })
    }

    /// Runs a gate workflow end to end: opens the gate, then blocks
    /// until it resolves. Most callers want [`GateWorkflow::open`] and
    /// [`GateWorkflow::resume`] separately so the token can reach
    /// whoever decides it before the suspend completes.
    pub async fn run(
        &self,
        thread_id: &str,
        user_input: &str,
        parent_run_id: Option<String>,
    ) -> Result<GateWorkflowOutcome, CoreError> {
        let opened = self.open(thread_id, user_input, parent_run_id).await?;
        self.resume(&opened).await
    }
}
