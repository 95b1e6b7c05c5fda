//! Runtime configuration.
//!
//! Deliberately plain: a struct with a `Default` impl, no config-file
//! parser pulled in. Operators override individual fields from the
//! environment via [`RuntimeConfig::from_env`].

use std::collections::HashMap;
use std::env;
use std::time::Duration;

/// Retry policy for the HTTP/OpenAPI adapter.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base: Duration,
    pub factor: f64,
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base: Duration::from_millis(250),
            factor: 2.0,
            jitter: 0.2,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SamplingRate {
    pub dev: f64,
    pub prod: f64,
}

impl Default for SamplingRate {
    fn default() -> Self {
        Self { dev: 0.9, prod: 0.1 }
    }
}

/// Every tunable knob the runtime reads at startup.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub max_messages: usize,
    pub max_tool_turns: usize,
    pub agent_run_deadline: Duration,
    pub tool_deadline: Duration,
    pub http_retry: RetryConfig,
    pub tool_output_truncate_bytes: usize,
    pub token_buffer_bytes: usize,
    pub user_daily_token_limit: u64,
    pub per_request_token_limit: u64,
    pub sampling_rate: SamplingRate,
    pub parallel_quorum_k: Option<usize>,
    pub price_table: HashMap<String, ModelPrice>,
}

#[derive(Debug, Clone, Copy)]
pub struct ModelPrice {
    pub in_per_1k: f64,
    pub out_per_1k: f64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_messages: 20,
            max_tool_turns: 8,
            agent_run_deadline: Duration::from_secs(120),
            tool_deadline: Duration::from_secs(30),
            http_retry: RetryConfig::default(),
            tool_output_truncate_bytes: 5 * 1024,
            token_buffer_bytes: 64 * 1024,
            user_daily_token_limit: 1_000_000,
            per_request_token_limit: 10_000,
            sampling_rate: SamplingRate::default(),
            parallel_quorum_k: None,
            // Unknown models cost 0 — an explicit design choice;
            // the operator must register prices.
            price_table: HashMap::new(),
        }
    }
}

impl RuntimeConfig {
    /// Reads overrides from the environment, falling back to
    /// [`RuntimeConfig::default`] for anything unset. Plain
    /// `std::env::var` reads, the same idiom used elsewhere in this
    /// crate for API keys.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(v) = env_usize("AGENTCORE_MAX_MESSAGES") {
            cfg.max_messages = v;
        }
        if let Some(v) = env_usize("AGENTCORE_MAX_TOOL_TURNS") {
            cfg.max_tool_turns = v;
        }
        if let Some(v) = env_u64("AGENTCORE_AGENT_RUN_DEADLINE_MS") {
            cfg.agent_run_deadline = Duration::from_millis(v);
        }
        if let Some(v) = env_u64("AGENTCORE_TOOL_DEADLINE_MS") {
            cfg.tool_deadline = Duration::from_millis(v);
        }
        if let Some(v) = env_u64("AGENTCORE_USER_DAILY_TOKEN_LIMIT") {
            cfg.user_daily_token_limit = v;
        }
        if let Some(v) = env_u64("AGENTCORE_PER_REQUEST_TOKEN_LIMIT") {
            cfg.per_request_token_limit = v;
        }
        cfg
    }

    pub fn quorum_k(&self, n: usize) -> usize {
        self.parallel_quorum_k.unwrap_or_else(|| n.div_ceil(2))
    }
}

fn env_usize(key: &str) -> Option<usize> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_u64(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}
