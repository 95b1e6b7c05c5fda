//! Human gate: the orchestrator suspends a workflow Run at a
//! designated step, emits a recommendation + callback token, and idles
//! until `POST /human-gate/action` resolves it. Resume is idempotent
//! keyed by `token`: a duplicate decision for an already-resolved gate
//! returns the first resolution rather than applying a second one.
//!
//! The queue/await shape is grounded on `tokio::sync::Notify`, the same
//! primitive already used for cooperative cancellation in
//! `tool_protocol::tokio_util::CancellationToken` — the same
//! "flag + waiter list" pattern, just resolving to a value instead of a
//! boolean.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

use crate::core::errors::{CoreError, ErrorKind};
use crate::core::ids;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateDecision {
    Approve,
    Edit,
    Reject,
}

/// What a resolved gate produces for the orchestrator to continue with.
#[derive(Debug)]
pub enum GateOutcome {
    /// `approve`, or `edit` with the recommendation merged with
    /// `overrides`.
    Proceed(Value),
    /// `reject`: "the workflow Run terminates as `succeeded` with a
    /// terminal reject payload".
    Rejected,
}

struct PendingGate {
    recommendation: Value,
    resolution: Mutex<Option<GateOutcome>>,
    notify: Notify,
}

/// Holds every gate currently awaiting (or having just received) a
/// human decision, across all in-flight workflow runs. One instance is
/// shared application-wide, the same way `InMemoryPersistence` is.
#[derive(Default)]
pub struct HumanGateStore {
    gates: Mutex<HashMap<String, Arc<PendingGate>>>,
}

impl HumanGateStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a new gate and returns its token. Called by the
    /// orchestrator when it reaches a designated human-gate step.
    pub async fn open(&self, recommendation: Value) -> String {
        let token = ids::gate_token();
        let gate = Arc::new(PendingGate { recommendation, resolution: Mutex::new(None), notify: Notify::new() });
        self.gates.lock().await.insert(token.clone(), gate);
        token
    }

    /// Blocks (with keep-alive-friendly `await`, not a busy loop) until
    /// `token` is resolved, then returns the outcome. Deliberately
    /// unbounded — the caller's wire layer is responsible for emitting
    /// keep-alive frames while this awaits.
    pub async fn await_resolution(&self, token: &str) -> Result<GateOutcome, CoreError> {
        let gate = self
            .gates
            .lock()
            .await
            .get(token)
            .cloned()
            .ok_or_else(|| CoreError::new(ErrorKind::ProtocolError, "unknown gate token"))?;
        loop {
            // Registering interest before checking, not after, is what
            // keeps this race-free: `Notify::notified()` records the
            // waiter as soon as it's created, so a `resolve()` landing
            // between the check below and the `.await` still wakes it,
            // instead of being missed the way checking-then-subscribing
            // would allow.
            let notified = gate.notify.notified();
            if let Some(outcome) = gate.resolution.lock().await.clone() {
                return Ok(outcome);
            }
            notified.await;
        }
    }

    /// Resolves `token` with `decision`/`overrides`. Idempotent: a
    /// second call for an already-resolved token is a no-op that
    /// returns the first resolution rather than applying a second one.
    pub async fn resolve(
        &self,
        token: &str,
        decision: GateDecision,
        overrides: Option<Value>,
    ) -> Result<GateOutcome, CoreError> {
        let gate = self
            .gates
            .lock()
            .await
            .get(token)
            .cloned()
            .ok_or_else(|| CoreError::new(ErrorKind::ProtocolError, "unknown gate token"))?;

        let mut resolution = gate.resolution.lock().await;
        if let Some(existing) = resolution.clone() {
            return Ok(existing);
        }
        let outcome = match decision {
            GateDecision::Approve => GateOutcome::Proceed(gate.recommendation.clone()),
            GateDecision::Edit => {
                let mut merged = gate.recommendation.clone();
                if let (Some(merged_obj), Some(Value::Object(overrides_obj))) = (merged.as_object_mut(), overrides) {
                    for (k, v) in overrides_obj {
                        merged_obj.insert(k, v);
                    }
                }
                GateOutcome::Proceed(merged)
            }
            GateDecision::Reject => GateOutcome::Rejected,
        };
        *resolution = Some(outcome.clone());
        gate.notify.notify_waiters();
        Ok(outcome)
    }
}

impl Clone for GateOutcome {
    fn clone(&self) -> Self {
        match self {
            GateOutcome::Proceed(value) => GateOutcome::Proceed(value.clone()),
            GateOutcome::Rejected => GateOutcome::Rejected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn approve_proceeds_with_original_recommendation() {
        let store = HumanGateStore::new();
        let token = store.open(json!({"action": "refund"})).await;
        let outcome = store.resolve(&token, GateDecision::Approve, None).await.unwrap();
        assert!(matches!(outcome, GateOutcome::Proceed(v) if v == json!({"action": "refund"})));
    }

    #[tokio::test]
    async fn edit_merges_overrides_into_recommendation() {
        let store = HumanGateStore::new();
        let token = store.open(json!({"action": "refund", "amount": 10})).await;
        let outcome = store.resolve(&token, GateDecision::Edit, Some(json!({"amount": 20}))).await.unwrap();
        assert!(matches!(outcome, GateOutcome::Proceed(v) if v == json!({"action": "refund", "amount": 20})));
    }

    #[tokio::test]
    async fn duplicate_resolution_returns_first_result() {
        let store = HumanGateStore::new();
        let token = store.open(json!({"action": "refund"})).await;
        let first = store.resolve(&token, GateDecision::Reject, None).await.unwrap();
        let second = store.resolve(&token, GateDecision::Approve, None).await.unwrap();
        assert!(matches!(first, GateOutcome::Rejected));
        assert!(matches!(second, GateOutcome::Rejected));
    }

    #[tokio::test]
    async fn await_resolution_unblocks_once_resolved() {
        let store = HumanGateStore::new();
        let token = store.open(json!({"action": "refund"})).await;
        let waiter_store = store.clone();
        let waiter_token = token.clone();
        let waiting = tokio::spawn(async move { waiter_store.await_resolution(&waiter_token).await });
        tokio::task::yield_now().await;
        store.resolve(&token, GateDecision::Approve, None).await.unwrap();
        let outcome = waiting.await.unwrap().unwrap();
        assert!(matches!(outcome, GateOutcome::Proceed(_)));
    }
}
