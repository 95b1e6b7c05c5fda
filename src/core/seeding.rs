//! Seeding & Registry: loads default `AgentSpec`s into the
//! Persistence Gateway on startup, so a freshly started server has at
//! least one usable agent instead of an empty registry.
//!
//! Mirrors `RuntimeConfig::default()`'s own "reasonable defaults, no
//! file format imposed" stance, applied to `AgentSpec`s instead of
//! config knobs: a small, hardcoded catalog an operator is expected to
//! replace via the `GET|POST|PUT|DELETE /agents/{id}` admin surface
//! once real specs exist.

use chrono::Utc;

use crate::core::errors::CoreError;
use crate::core::ids;
use crate::core::model::{AgentSpec, AgentStatus};
use crate::core::persistence::PersistenceGateway;

/// One default agent: a generalist with no tools, so it's usable
/// out of the box without any adapter configuration.
fn default_catalog() -> Vec<AgentSpec> {
    vec![AgentSpec {
        id: "default-assistant".to_string(),
        name: "Default Assistant".to_string(),
        description: "General-purpose assistant with no tools configured.".to_string(),
        status: AgentStatus::Active,
        system_prompt: "You are a helpful assistant.".to_string(),
        model: "gpt-4.1".to_string(),
        temperature: 0.7,
        max_tokens: 2048,
        max_messages: None,
        tools: vec![],
        capability_tags: vec!["chat".to_string()],
        is_coordinator: false,
        created_by: "system".to_string(),
        created_at: Utc::now(),
    }]
}

/// Inserts the default catalog, skipping any id that already exists so
/// re-running seeding on a warm store (e.g. server restart against a
/// durable backing store) never clobbers an operator's edits.
pub async fn seed_default_agents(persistence: &dyn PersistenceGateway) -> Result<usize, CoreError> {
    let mut inserted = 0;
    for spec in default_catalog() {
        if persistence.get_agent_spec(&spec.id).await?.is_none() {
            persistence.put_agent_spec(spec).await?;
            inserted += 1;
        }
    }
    Ok(inserted)
}

/// Allocates a fresh id for an operator-authored `AgentSpec` before its
/// first `put_agent_spec`, for the `POST /agents/{id}` admin route.
pub fn new_agent_id() -> String {
    ids::new_id("agent")
}
