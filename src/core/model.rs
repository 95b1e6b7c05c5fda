//! The Thread/Run/Step/ToolCall/Message/Metric data model.
//!
//! Every entity carries an opaque string ID, a creator ID, a creation
//! timestamp, and an optional TTL, the same shape an append-only
//! thought log would use for its own entries — generalized here across
//! six entity kinds, plus `AgentSpec` and `ToolConfig`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::core::errors::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolType {
    Http,
    Mcp,
    A2a,
    Function,
}

/// A tool configuration attached to an [`AgentSpec`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    #[serde(rename = "type")]
    pub kind: ToolType,
    pub name: String,
    /// URL for `http`/`mcp`, peer agent id for `a2a`, function key for
    /// `function`.
    pub target: String,
    #[serde(default)]
    pub static_config: serde_json::Value,
    pub enabled: bool,
}

/// A named, versioned agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    pub id: String,
    pub name: String,
    pub description: String,
    pub status: AgentStatus,
    pub system_prompt: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Sliding memory window size, defaults enforced by
    /// `RuntimeConfig::max_messages` when unset here.
    pub max_messages: Option<usize>,
    pub tools: Vec<ToolConfig>,
    pub capability_tags: Vec<String>,
    pub is_coordinator: bool,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl AgentSpec {
    /// Requires a non-empty `system_prompt` and tool names unique within
    /// this spec's `ToolConfig`s. Does not resolve `model` or A2A
    /// targets — that is the Tool Registry / Seeding step's job, since it
    /// requires the live registry and directory.
    pub fn validate(&self) -> Result<(), ErrorKind> {
        if self.system_prompt.trim().is_empty() {
            return Err(ErrorKind::ConfigError);
        }
        let mut seen = std::collections::HashSet::new();
        for tool in &self.tools {
            if !seen.insert(tool.name.as_str()) {
                return Err(ErrorKind::ConfigError);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    Active,
    Deleted,
}

/// Either an `AgentSpec` id or a workflow id, never both.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ThreadOwner {
    Agent { agent_id: String },
    Workflow { workflow_id: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: String,
    pub owner_id: String,
    pub target: ThreadOwner,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub last_message_at: DateTime<Utc>,
    pub message_count: u64,
    pub status: ThreadStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    Tool,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub thread_id: String,
    pub role: Role,
    pub content: String,
    /// Present on `Role::Tool` messages, correlating with the
    /// originating `tool_request`'s `callId`.
    pub tool_call_id: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Strictly increasing within `thread_id`; immutable once persisted.
    pub ordinal: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub thread_id: String,
    pub agent_id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub error_kind: Option<ErrorKind>,
    pub parent_run_id: Option<String>,
}

impl Run {
    pub fn new_queued(id: String, thread_id: String, agent_id: String, now: DateTime<Utc>, parent_run_id: Option<String>) -> Self {
        Self {
            id,
            thread_id,
            agent_id,
            status: RunStatus::Queued,
            started_at: now,
            ended_at: None,
            input_tokens: 0,
            output_tokens: 0,
            cost_usd: 0.0,
            error_kind: None,
            parent_run_id,
        }
    }

    /// Terminal states are final, token counters are non-decreasing,
    /// and `ended_at` is set iff terminal. Returns `false` (no-op) if
    /// already terminal, enforcing "terminal once".
    pub fn finish(&mut self, status: RunStatus, ended_at: DateTime<Utc>, error_kind: Option<ErrorKind>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        debug_assert!(status.is_terminal());
        self.status = status;
        self.ended_at = Some(ended_at);
        self.error_kind = error_kind;
        true
    }

    /// Monotone-counter protection: never lets token counts go
    /// backwards even under a racing duplicate upsert.
    pub fn bump_tokens(&mut self, input_tokens: u64, output_tokens: u64) {
        self.input_tokens = self.input_tokens.max(input_tokens);
        self.output_tokens = self.output_tokens.max(output_tokens);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Reasoning,
    ToolCall,
    Message,
    Handoff,
    Gate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    InProgress,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub run_id: String,
    pub ordinal: u64,
    pub kind: StepKind,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: StepStatus,
    pub parent_step_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    InProgress,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub step_id: String,
    pub tool_type: ToolType,
    pub tool_name: String,
    pub target: String,
    pub input: serde_json::Value,
    pub input_hash: String,
    pub output: Option<serde_json::Value>,
    pub output_hash: Option<String>,
    pub status: ToolCallStatus,
    pub latency_ms: Option<u64>,
    pub error_kind: Option<ErrorKind>,
    pub cached: bool,
    /// Set when the persisted LLM-context message for this call was
    /// truncated.
    pub truncated: bool,
}

/// Append-only token/cost accounting row, partitioned by date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metric {
    pub id: String,
    pub date: chrono::NaiveDate,
    pub user_id: String,
    pub agent_id: String,
    pub run_id: String,
    pub model: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost_usd: f64,
    pub latency_ms: u64,
}

/// Canonical SHA-256 hash of a JSON value, used for `ToolCall::input_hash`
/// / `output_hash` and the `(toolName, inputHash)` repeated-failure check.
/// Canonicalizes by serializing `serde_json::Value`, whose map
/// keys serialize in insertion order — callers should build inputs
/// through `serde_json::json!` with stable key order, as every adapter
/// here does.
pub fn canonical_hash(value: &serde_json::Value) -> String {
    use sha2::{Digest, Sha256};
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_finishes_exactly_once() {
        let mut run = Run::new_queued("run_1".into(), "thread_1".into(), "agent_1".into(), Utc::now(), None);
        run.status = RunStatus::Running;
        let now = Utc::now();
        assert!(run.finish(RunStatus::Succeeded, now, None));
        assert!(!run.finish(RunStatus::Failed, now, Some(ErrorKind::Timeout)));
        assert_eq!(run.status, RunStatus::Succeeded);
    }

    #[test]
    fn token_bumps_never_decrease() {
        let mut run = Run::new_queued("run_1".into(), "thread_1".into(), "agent_1".into(), Utc::now(), None);
        run.bump_tokens(100, 50);
        run.bump_tokens(10, 10);
        assert_eq!(run.input_tokens, 100);
        assert_eq!(run.output_tokens, 50);
    }

    #[test]
    fn agent_spec_rejects_duplicate_tool_names() {
        let spec = AgentSpec {
            id: "a".into(),
            name: "A".into(),
            description: "".into(),
            status: AgentStatus::Active,
            system_prompt: "be helpful".into(),
            model: "gpt-4o".into(),
            temperature: 0.7,
            max_tokens: 1024,
            max_messages: None,
            tools: vec![
                ToolConfig {
                    kind: ToolType::Function,
                    name: "dup".into(),
                    target: "dup".into(),
                    static_config: serde_json::json!({}),
                    enabled: true,
                },
                ToolConfig {
                    kind: ToolType::Http,
                    name: "dup".into(),
                    target: "https://x".into(),
                    static_config: serde_json::json!({}),
                    enabled: true,
                },
            ],
            capability_tags: vec![],
            is_coordinator: false,
            created_by: "seed".into(),
            created_at: Utc::now(),
        };
        assert_eq!(spec.validate(), Err(ErrorKind::ConfigError));
    }

    #[test]
    fn canonical_hash_is_stable() {
        let v = serde_json::json!({"query": "reset password"});
        assert_eq!(canonical_hash(&v), canonical_hash(&v));
    }
}
