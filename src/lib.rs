//! agentcore: a bounded reasoning/tool-use loop, multi-protocol tool
//! adapters, streaming run traces, and composable multi-agent workflows.
//!
//! A single `core` module tree holds the data model, the
//! registry/adapters, the runner, and the orchestrator, with an
//! optional `server` module (feature `server`) exposing it over HTTP.

pub mod core;

#[cfg(feature = "server")]
pub mod server;

pub use core::admission::{AdmissionDecision, AdmissionLayer};
pub use core::errors::{CoreError, ErrorKind};
pub use core::event::{EventHandler, RunEvent};
pub use core::model::{AgentSpec, Message, Role, Run, RunStatus, Step, Thread, ToolCall};
pub use core::runner::{AgentRunner, RunOutput};
