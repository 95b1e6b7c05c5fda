//! The streaming event protocol: every state change worth telling a
//! caller about, wire-shaped so it can go straight onto the transport.
//!
//! Keeps a familiar `EventHandler` shape (default no-op async methods,
//! `Arc<dyn EventHandler>` shared across agents), but the event enum
//! itself is the wire-shaped [`RunEvent`] rather than a pure
//! side-channel callback — here, an event *is* the thing that gets
//! serialized to the caller and persisted to the
//! [`crate::core::persistence::PersistenceGateway`], not just an
//! observability hook.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::errors::ErrorKind;
use crate::core::model::ToolType;

/// One line of the wire protocol. `#[serde(tag = "type")]` gives
/// exactly the `{"type": ..., ...}` shape callers parse off the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    Token {
        content: String,
    },
    TraceStart {
        trace_id: String,
        parent_trace_id: Option<String>,
        tool: String,
        tool_type: ToolType,
        target: String,
        input_preview: String,
        ts: chrono::DateTime<chrono::Utc>,
    },
    TraceUpdate {
        trace_id: String,
        message: Option<String>,
        gate_token: Option<String>,
        payload: Option<serde_json::Value>,
    },
    TraceEnd {
        trace_id: String,
        status: TraceEndStatus,
        latency_ms: u64,
        tokens: Option<u64>,
        output_preview: Option<String>,
        error_kind: Option<ErrorKind>,
    },
    MessageEnd {
        message_id: String,
        role: crate::core::model::Role,
        tokens: u64,
    },
    RunEnd {
        run_id: String,
        status: crate::core::model::RunStatus,
        tokens: u64,
        cost_usd: f64,
    },
    Done,
    Error {
        kind: ErrorKind,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceEndStatus {
    Succeeded,
    Failed,
}

impl RunEvent {
    /// The final frame of any run is always `done` or `error`.
    pub fn is_terminal_frame(&self) -> bool {
        matches!(self, RunEvent::Done | RunEvent::Error { .. })
    }

    /// On a full buffer, token events are coalesced by concatenation,
    /// trace events never are. Used by the Streaming Facade's
    /// backpressure handling.
    pub fn is_coalescible(&self) -> bool {
        matches!(self, RunEvent::Token { .. })
    }
}

/// Receives [`RunEvent`]s as an agent or workflow run produces them.
/// Defaults to a no-op so callers that don't care about events can ignore it.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn on_run_event(&self, _run_id: &str, _event: &RunEvent) {}
}

/// An [`EventHandler`] that does nothing, used when no caller-supplied
/// handler is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventHandler;

#[async_trait]
impl EventHandler for NoopEventHandler {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn done_and_error_are_terminal() {
        assert!(RunEvent::Done.is_terminal_frame());
        assert!(RunEvent::Error {
            kind: ErrorKind::Timeout,
            message: "x".into()
        }
        .is_terminal_frame());
        assert!(!RunEvent::Token { content: "x".into() }.is_terminal_frame());
    }

    #[test]
    fn only_tokens_are_coalescible() {
        assert!(RunEvent::Token { content: "hi".into() }.is_coalescible());
        assert!(!RunEvent::TraceEnd {
            trace_id: "t".into(),
            status: TraceEndStatus::Succeeded,
            latency_ms: 1,
            tokens: None,
            output_preview: None,
            error_kind: None,
        }
        .is_coalescible());
    }

    #[test]
    fn wire_frame_serializes_with_type_tag() {
        let frame = RunEvent::Token { content: "hi".into() };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "token");
        assert_eq!(json["content"], "hi");
    }
}
