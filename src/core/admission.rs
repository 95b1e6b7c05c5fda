//! The Admission Layer: the caller's first stop before the
//! Streaming Facade. Validates identity, enforces per-user token
//! budgets and message size limits, and rate-limits.
//!
//! No teacher file implements anything like this — grounded instead on
//! the same axum-middleware idiom `mcp_http_adapter.rs` uses for its
//! `ConnectInfo`-based IP filter (check caller state, reject before the
//! handler runs), generalized into a transport-independent decision
//! function a `tower` layer in `src/server` can wrap. CORS itself is
//! pure `tower_http` config with no domain logic, so it lives only in
//! `src/server`, not here.

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::errors::{CoreError, ErrorKind};
use crate::core::persistence::PersistenceGateway;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

#[derive(Debug, Clone)]
pub struct CallerIdentity {
    pub user_id: String,
    pub roles: Vec<Role>,
}

impl CallerIdentity {
    pub fn is_admin(&self) -> bool {
        self.roles.contains(&Role::Admin)
    }
}

/// Resolves a bearer token to a caller identity. A real identity
/// provider (verifying against a database or external auth service) is
/// explicitly out of scope; this crate only defines the seam. The
/// static provider below is this crate's test/seeding-time stand-in,
/// not a production implementation.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn authenticate(&self, token: &str) -> Result<CallerIdentity, CoreError>;
}

/// Fixed token → identity table, for tests and for operators who seed a
/// small number of service tokens without standing up a real identity
/// provider.
pub struct StaticTokenIdentityProvider {
    tokens: std::collections::HashMap<String, CallerIdentity>,
}

impl StaticTokenIdentityProvider {
    pub fn new() -> Self {
        Self { tokens: std::collections::HashMap::new() }
    }

    pub fn with_token(mut self, token: impl Into<String>, identity: CallerIdentity) -> Self {
        self.tokens.insert(token.into(), identity);
        self
    }
}

impl Default for StaticTokenIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityProvider for StaticTokenIdentityProvider {
    async fn authenticate(&self, token: &str) -> Result<CallerIdentity, CoreError> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or_else(|| CoreError::new(ErrorKind::AdmissionError, "unrecognized bearer token"))
    }
}

/// The outcome of an admission check: admit outright, admit with a
/// soft-budget warning the caller-facing layer should surface as a
/// response header, or reject.
#[derive(Debug, Clone)]
pub enum AdmissionDecision {
    Admit { identity: CallerIdentity },
    AdmitWithWarning { identity: CallerIdentity, warning: String },
    Rejected { kind: ErrorKind, message: String },
}

impl AdmissionDecision {
    pub fn identity(&self) -> Option<&CallerIdentity> {
        match self {
            AdmissionDecision::Admit { identity } | AdmissionDecision::AdmitWithWarning { identity, .. } => Some(identity),
            AdmissionDecision::Rejected { .. } => None,
        }
    }
}

struct RateWindow {
    window_start: Instant,
    count: u32,
}

/// Fraction of `userDailyTokenLimit` at which callers get a soft
/// warning (response header) instead of a hard 429 rejection.
const SOFT_BUDGET_FRACTION: f64 = 0.8;

pub struct AdmissionLayer {
    identity_provider: Arc<dyn IdentityProvider>,
    persistence: Arc<dyn PersistenceGateway>,
    config: crate::core::config::RuntimeConfig,
    rate_limit_per_minute: u32,
    rate_windows: DashMap<String, RateWindow>,
}

impl AdmissionLayer {
    pub fn new(
        identity_provider: Arc<dyn IdentityProvider>,
        persistence: Arc<dyn PersistenceGateway>,
        config: crate::core::config::RuntimeConfig,
        rate_limit_per_minute: u32,
    ) -> Self {
        Self { identity_provider, persistence, config, rate_limit_per_minute, rate_windows: DashMap::new() }
    }

    /// Runs every admission check in order: authenticate, rate limit,
    /// message size, daily token budget. The first failure short-circuits.
    pub async fn admit(&self, token: &str, message_bytes: usize, today: NaiveDate) -> AdmissionDecision {
        let identity = match self.identity_provider.authenticate(token).await {
            Ok(identity) => identity,
            Err(e) => return AdmissionDecision::Rejected { kind: e.kind, message: e.redacted_message() },
        };

        if !self.check_rate_limit(&identity.user_id) {
            return AdmissionDecision::Rejected {
                kind: ErrorKind::AdmissionError,
                message: format!("rate limit exceeded ({} requests/min)", self.rate_limit_per_minute),
            };
        }

        if message_bytes as u64 > self.config.per_request_token_limit {
            return AdmissionDecision::Rejected {
                kind: ErrorKind::AdmissionError,
                message: format!(
                    "message of {} bytes exceeds the per-request limit of {}",
                    message_bytes, self.config.per_request_token_limit
                ),
            };
        }

        let used = match self.persistence.tokens_for_user_on(&identity.user_id, today).await {
            Ok(used) => used,
            Err(e) => return AdmissionDecision::Rejected { kind: e.kind, message: e.redacted_message() },
        };
        let limit = self.config.user_daily_token_limit;
        if used >= limit {
            return AdmissionDecision::Rejected {
                kind: ErrorKind::BudgetExceeded,
                message: format!("daily token budget of {} exhausted ({} used)", limit, used),
            };
        }
        if (used as f64) >= (limit as f64 * SOFT_BUDGET_FRACTION) {
            return AdmissionDecision::AdmitWithWarning {
                identity,
                warning: format!("{} of {} daily tokens used", used, limit),
            };
        }

        AdmissionDecision::Admit { identity }
    }

    fn check_rate_limit(&self, user_id: &str) -> bool {
        let window = Duration::from_secs(60);
        let now = Instant::now();
        let mut entry = self.rate_windows.entry(user_id.to_string()).or_insert_with(|| RateWindow { window_start: now, count: 0 });
        if now.duration_since(entry.window_start) >= window {
            entry.window_start = now;
            entry.count = 0;
        }
        entry.count += 1;
        entry.count <= self.rate_limit_per_minute
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::RuntimeConfig;
    use crate::core::persistence::InMemoryPersistence;
    use chrono::Utc;

    fn layer_with(config: RuntimeConfig, rate_limit: u32) -> AdmissionLayer {
        let identity_provider = Arc::new(
            StaticTokenIdentityProvider::new()
                .with_token("tok-user", CallerIdentity { user_id: "user-1".into(), roles: vec![Role::User] }),
        );
        AdmissionLayer::new(identity_provider, InMemoryPersistence::new(), config, rate_limit)
    }

    #[tokio::test]
    async fn unknown_token_is_rejected() {
        let layer = layer_with(RuntimeConfig::default(), 100);
        let decision = layer.admit("bogus", 10, Utc::now().date_naive()).await;
        assert!(matches!(decision, AdmissionDecision::Rejected { kind: ErrorKind::AdmissionError, .. }));
    }

    #[tokio::test]
    async fn valid_token_under_limits_is_admitted() {
        let layer = layer_with(RuntimeConfig::default(), 100);
        let decision = layer.admit("tok-user", 10, Utc::now().date_naive()).await;
        assert!(matches!(decision, AdmissionDecision::Admit { .. }));
    }

    #[tokio::test]
    async fn oversized_message_is_rejected() {
        let mut config = RuntimeConfig::default();
        config.per_request_token_limit = 5;
        let layer = layer_with(config, 100);
        let decision = layer.admit("tok-user", 1000, Utc::now().date_naive()).await;
        assert!(matches!(decision, AdmissionDecision::Rejected { .. }));
    }

    #[tokio::test]
    async fn rate_limit_of_one_rejects_second_request_in_window() {
        let layer = layer_with(RuntimeConfig::default(), 1);
        let first = layer.admit("tok-user", 10, Utc::now().date_naive()).await;
        let second = layer.admit("tok-user", 10, Utc::now().date_naive()).await;
        assert!(matches!(first, AdmissionDecision::Admit { .. }));
        assert!(matches!(second, AdmissionDecision::Rejected { .. }));
    }
}
