//! The Streaming Facade: turns one [`AgentRunner::run`] call into
//! a wire-bound event stream while concurrently, and independently,
//! persisting the same events.
//!
//! Fans every event out to two independent bounded sinks, one feeding
//! the caller's wire, one feeding a background persistence writer,
//! following a drop-oldest-on-overflow idiom for slow consumers.
//! Keep-alive framing (sent periodically if otherwise idle) is left to
//! the transport layer in `src/server` — it is a framing detail of the
//! line-delimited JSON wire, not a `RunEvent` the Runner or a trace
//! consumer would ever care about persisting.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::core::config::RuntimeConfig;
use crate::core::event::{EventHandler, RunEvent};
use crate::core::llm_driver::LlmDriver;
use crate::core::model::AgentSpec;
use crate::core::persistence::PersistenceGateway;
use crate::core::runner::AgentRunner;
use crate::core::tool_protocol::{tokio_util::CancellationToken, ToolRegistry};

/// Depth of the wire channel, in frames. `tokenBufferBytes` bounds
/// *coalesced token bytes*, not frame count — this is just enough slack
/// that a momentarily slow consumer doesn't force every trace frame
/// through the blocking path described below.
const WIRE_CHANNEL_DEPTH: usize = 64;

/// Where trace frames go once they leave the wire path. Default is
/// in-memory (see [`InMemoryTraceSink`]); an operator backing this with
/// the real Persistence Gateway would implement this against a durable
/// store instead. Deliberately separate from [`PersistenceGateway`]
/// — that trait owns the domain model (Run/Step/ToolCall/...),
/// which the Runner itself already writes synchronously; this sink owns
/// only the wire-shaped `RunEvent` trace log used for replay/audit.
#[async_trait]
pub trait TraceSink: Send + Sync {
    async fn record(&self, run_id: &str, event: RunEvent);
}

/// `dashmap`-backed [`TraceSink`] fed by a bounded channel and a
/// background writer task, so `record` never blocks on a slow backing
/// store. `trace_update` frames are dropped at the channel's
/// discretion on overflow; every other frame type waits for room.
pub struct InMemoryTraceSink {
    tx: mpsc::Sender<(String, RunEvent)>,
    log: Arc<DashMap<String, Vec<RunEvent>>>,
}

impl InMemoryTraceSink {
    pub fn new(channel_capacity: usize) -> Arc<Self> {
        let (tx, mut rx) = mpsc::channel::<(String, RunEvent)>(channel_capacity);
        let log: Arc<DashMap<String, Vec<RunEvent>>> = Arc::new(DashMap::new());
        let writer_log = log.clone();
        tokio::spawn(async move {
            while let Some((run_id, event)) = rx.recv().await {
                writer_log.entry(run_id).or_default().push(event);
            }
        });
        Arc::new(Self { tx, log })
    }

    /// Frames recorded for `run_id` so far, for tests and reconciliation
    /// — retained long enough to be replayed by a background
    /// reconciler.
    pub fn events_for(&self, run_id: &str) -> Vec<RunEvent> {
        self.log.get(run_id).map(|entry| entry.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl TraceSink for InMemoryTraceSink {
    async fn record(&self, run_id: &str, event: RunEvent) {
        if matches!(event, RunEvent::TraceUpdate { .. }) {
            if self.tx.try_send((run_id.to_string(), event)).is_err() {
                log::warn!("trace_update dropped for run {}: persistence queue full", run_id);
            }
        } else if self.tx.send((run_id.to_string(), event)).await.is_err() {
            log::error!("trace persistence writer gone; frame for run {} lost", run_id);
        }
    }
}

/// [`EventHandler`] that fans every frame out to a wire channel and a
/// [`TraceSink`], built fresh per streamed run (not shared across runs)
/// so each stream gets its own wire channel without needing to demux by
/// `run_id`.
struct FacadeEventHandler {
    wire_tx: mpsc::Sender<RunEvent>,
    trace_sink: Arc<dyn TraceSink>,
    /// Token text that lost its race for wire channel capacity, held
    /// here until the next event gives it a chance to drain — token
    /// events are coalesced by concatenation on overflow.
    pending_token: Mutex<Option<String>>,
}

impl FacadeEventHandler {
    fn new(wire_tx: mpsc::Sender<RunEvent>, trace_sink: Arc<dyn TraceSink>) -> Self {
        Self { wire_tx, trace_sink, pending_token: Mutex::new(None) }
    }

    /// Best-effort, non-blocking: tries to push any coalesced token text
    /// onto the wire without making the caller wait for capacity.
    async fn try_flush_pending(&self) {
        let mut guard = self.pending_token.lock().await;
        if let Some(text) = guard.take() {
            if let Err(TrySendError::Full(RunEvent::Token { content })) =
                self.wire_tx.try_send(RunEvent::Token { content: text })
            {
                *guard = Some(content);
            }
        }
    }

    /// Blocking flush used before a frame that must never be dropped,
    /// so buffered token text keeps its place ahead of it on the wire.
    async fn flush_pending_blocking(&self) {
        let text = self.pending_token.lock().await.take();
        if let Some(text) = text {
            let _ = self.wire_tx.send(RunEvent::Token { content: text }).await;
        }
    }
}

#[async_trait]
impl EventHandler for FacadeEventHandler {
    async fn on_run_event(&self, run_id: &str, event: &RunEvent) {
        self.trace_sink.record(run_id, event.clone()).await;

        match event {
            RunEvent::Token { content } => {
                self.try_flush_pending().await;
                if let Err(TrySendError::Full(_)) = self.wire_tx.try_send(event.clone()) {
                    let mut guard = self.pending_token.lock().await;
                    guard.get_or_insert_with(String::new).push_str(content);
                }
            }
            _ => {
                self.flush_pending_blocking().await;
                let _ = self.wire_tx.send(event.clone()).await;
            }
        }
    }
}

/// A streamed run in progress. Dropping this before the run finishes is
/// the wire-disconnect signal: it flips `cancel`, which the
/// Runner and its tool adapters observe cooperatively, and detaches the
/// background task (it still runs to completion so persistence stays
/// consistent, but nothing is listening to its wire output anymore).
pub struct StreamHandle {
    pub receiver: mpsc::Receiver<RunEvent>,
    cancel: CancellationToken,
    #[allow(dead_code)]
    join: JoinHandle<()>,
    finished: Arc<AtomicBool>,
}

impl StreamHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        if !self.finished.load(Ordering::SeqCst) {
            self.cancel.cancel();
        }
    }
}

/// Builds one [`AgentRunner`] per streamed call (cheap — every
/// constructor argument is an `Arc` or a small `Clone` config) wired to
/// a fresh [`FacadeEventHandler`], and drives it in a background task.
pub struct StreamingFacade {
    llm: Arc<dyn LlmDriver>,
    tool_registry: Arc<ToolRegistry>,
    persistence: Arc<dyn PersistenceGateway>,
    trace_sink: Arc<dyn TraceSink>,
    config: RuntimeConfig,
}

impl StreamingFacade {
    pub fn new(
        llm: Arc<dyn LlmDriver>,
        tool_registry: Arc<ToolRegistry>,
        persistence: Arc<dyn PersistenceGateway>,
        trace_sink: Arc<dyn TraceSink>,
        config: RuntimeConfig,
    ) -> Self {
        Self { llm, tool_registry, persistence, trace_sink, config }
    }

    /// `stream(agentId|workflowId, threadId?, userMessage)`. The
    /// agent-vs-workflow choice lives one layer up (`src/server`); this
    /// method streams a single [`AgentSpec`] run — the Workflow
    /// Orchestrator streams by composing several of these.
    pub fn stream(
        &self,
        agent: AgentSpec,
        thread_id: String,
        user_input: String,
        parent_run_id: Option<String>,
    ) -> StreamHandle {
        let (wire_tx, wire_rx) = mpsc::channel(WIRE_CHANNEL_DEPTH);
        let cancel = CancellationToken::new();
        let handler = Arc::new(FacadeEventHandler::new(wire_tx, self.trace_sink.clone()));
        let runner = Arc::new(AgentRunner::new(
            self.llm.clone(),
            self.tool_registry.clone(),
            self.persistence.clone(),
            handler,
            self.config.clone(),
        ));
        let run_cancel = cancel.clone();
        let finished = Arc::new(AtomicBool::new(false));
        let finished_writer = finished.clone();
        let join = tokio::spawn(async move {
            if let Err(e) = runner.run(&agent, &thread_id, &user_input, parent_run_id, run_cancel).await {
                log::error!("streamed run for agent {} ended in error: {}", agent.id, e);
            }
            finished_writer.store(true, Ordering::SeqCst);
        });
        StreamHandle { receiver: wire_rx, cancel, join, finished }
    }
}
