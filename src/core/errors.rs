//! The error taxonomy shared by every module.
//!
//! Each subsystem gets its own `thiserror`-derived error type (see
//! `tool_adapters`, `runner`, `persistence`, `admission`, `workflow`) but
//! they all reduce to one [`ErrorKind`] for wire frames and persisted
//! records, keeping a small internal enum separate from its `Display`
//! message.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The error taxonomy, kinds not type names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    Cancelled,
    Timeout,
    BudgetExceeded,
    MaxIterations,
    ConfigError,
    ToolNotAvailable,
    ToolInvocationError,
    A2AError,
    ProtocolError,
    PersistenceError,
    AdmissionError,
    QuorumFailed,
}

impl ErrorKind {
    /// Errors a caller may safely retry without operator intervention.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout
                | ErrorKind::Cancelled
                | ErrorKind::PersistenceError
                | ErrorKind::A2AError
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Timeout => "timeout",
            ErrorKind::BudgetExceeded => "budget_exceeded",
            ErrorKind::MaxIterations => "max_iterations",
            ErrorKind::ConfigError => "config_error",
            ErrorKind::ToolNotAvailable => "tool_not_available",
            ErrorKind::ToolInvocationError => "tool_invocation_error",
            ErrorKind::A2AError => "a2a_error",
            ErrorKind::ProtocolError => "protocol_error",
            ErrorKind::PersistenceError => "persistence_error",
            ErrorKind::AdmissionError => "admission_error",
            ErrorKind::QuorumFailed => "quorum_failed",
        };
        f.write_str(s)
    }
}

/// A crate-wide error value. Every module-specific error type
/// (`AdapterError`, `RunnerError`, ...) converts into this for anything
/// that crosses a module boundary (wire frames, Run/ToolCall records).
#[derive(Debug, thiserror::Error, Clone)]
#[error("{kind}: {message}")]
pub struct CoreError {
    pub kind: ErrorKind,
    pub message: String,
}

impl CoreError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// A short, human-safe rendering suitable for the wire `error`
    /// frame — no secrets, no internal paths.
    pub fn redacted_message(&self) -> String {
        self.message.clone()
    }
}
