//! The Workflow Orchestrator: composes [`AgentRunner`]s into
//! higher-order runs that share the same event protocol as a single
//! agent. One sub-module per composition pattern: sequential handoff,
//! parallel fan-out/fan-in, human gate, and evaluator re-routing.
//!
//! Grounded on this crate's own `runner::AgentAsTool` (the sequential
//! pattern is literally "grant the coordinator its specialists as
//! tools") plus `config::RuntimeConfig::quorum_k` (already built for
//! exactly the parallel fan-in threshold below).

pub mod gate;
pub mod human_gate;
pub mod parallel;
pub mod rerouting;
pub mod sequential;

use crate::core::model::AgentSpec;
use std::sync::Arc;

/// Shared ingredients every workflow pattern needs to build its own
/// per-participant [`crate::core::runner::AgentRunner`]s. Cheap to
/// clone — everything here is an `Arc` or small `Clone` config,
/// mirroring `runner::AgentRunner`'s own constructor arguments.
#[derive(Clone)]
pub struct WorkflowContext {
    pub llm: Arc<dyn crate::core::llm_driver::LlmDriver>,
    pub tool_registry: Arc<crate::core::tool_protocol::ToolRegistry>,
    pub persistence: Arc<dyn crate::core::persistence::PersistenceGateway>,
    pub events: Arc<dyn crate::core::event::EventHandler>,
    pub config: crate::core::config::RuntimeConfig,
}

impl WorkflowContext {
    pub fn runner_for(&self, _agent: &AgentSpec) -> Arc<crate::core::runner::AgentRunner> {
        Arc::new(crate::core::runner::AgentRunner::new(
            self.llm.clone(),
            self.tool_registry.clone(),
            self.persistence.clone(),
            self.events.clone(),
            self.config.clone(),
        ))
    }
}
