//! Persistence Gateway.
//!
//! A thin write-behind interface over a partitioned key/value store with
//! TTL — the generic database layer itself is out of scope.
//! [`PersistenceGateway`] is the seam; [`InMemoryPersistence`] is the one
//! concrete implementation this crate ships: a narrow, swappable
//! persistence backend behind a handful of methods, backed by `dashmap`
//! for the same write-mostly, per-entity-keyed access pattern a real
//! durable store would serve.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use std::sync::Arc;

use crate::core::errors::{CoreError, ErrorKind};
use crate::core::model::{AgentSpec, Message, Metric, Run, Step, Thread, ThreadOwner, ToolCall};

pub type PersistResult<T> = Result<T, CoreError>;

/// Page of thread listings, as returned by the threads-list admin route.
pub struct ThreadPage {
    pub threads: Vec<Thread>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}

/// The Persistence Gateway contract. Every upsert is idempotent keyed by
/// `(entity, id)`; last-writer-wins with monotone-counter protection for
/// fields that must not decrease (token counters, ordinals).
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    async fn put_agent_spec(&self, spec: AgentSpec) -> PersistResult<()>;
    async fn get_agent_spec(&self, id: &str) -> PersistResult<Option<AgentSpec>>;
    async fn list_agent_specs(&self) -> PersistResult<Vec<AgentSpec>>;
    async fn delete_agent_spec(&self, id: &str) -> PersistResult<()>;

    async fn put_thread(&self, thread: Thread) -> PersistResult<()>;
    async fn get_thread(&self, id: &str) -> PersistResult<Option<Thread>>;
    /// Soft-delete (see DESIGN.md) — a
    /// `Thread` is marked `ThreadStatus::Deleted` rather than removed, so
    /// subsequent `get_thread` calls return `None` but the row remains
    /// for audit/TTL purposes.
    async fn delete_thread(&self, id: &str) -> PersistResult<()>;
    async fn list_threads(
        &self,
        owner_id: &str,
        agent_id: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> PersistResult<ThreadPage>;

    async fn put_message(&self, message: Message) -> PersistResult<()>;
    async fn list_messages(&self, thread_id: &str) -> PersistResult<Vec<Message>>;

    async fn put_run(&self, run: Run) -> PersistResult<()>;
    async fn get_run(&self, id: &str) -> PersistResult<Option<Run>>;
    async fn list_runs(&self, thread_id: &str) -> PersistResult<Vec<Run>>;

    async fn put_step(&self, step: Step) -> PersistResult<()>;
    async fn list_steps(&self, run_id: &str) -> PersistResult<Vec<Step>>;

    async fn put_tool_call(&self, call: ToolCall) -> PersistResult<()>;
    async fn get_tool_call(&self, id: &str) -> PersistResult<Option<ToolCall>>;

    async fn put_metric(&self, metric: Metric) -> PersistResult<()>;
    /// Sum of tokens for `(userId, date)`.
    async fn tokens_for_user_on(&self, user_id: &str, date: NaiveDate) -> PersistResult<u64>;
}

/// `dashmap`-backed implementation of [`PersistenceGateway`]. TTLs are
/// recorded but not actively swept here — a reconciler/sweeper is left
/// as an operator concern for a real backing store.
#[derive(Default)]
pub struct InMemoryPersistence {
    agent_specs: DashMap<String, AgentSpec>,
    threads: DashMap<String, Thread>,
    messages: DashMap<String, Vec<Message>>,
    runs: DashMap<String, Run>,
    runs_by_thread: DashMap<String, Vec<String>>,
    steps: DashMap<String, Vec<Step>>,
    tool_calls: DashMap<String, ToolCall>,
    metrics_by_user_date: DashMap<(String, NaiveDate), u64>,
}

impl InMemoryPersistence {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl PersistenceGateway for InMemoryPersistence {
    async fn put_agent_spec(&self, spec: AgentSpec) -> PersistResult<()> {
        self.agent_specs.insert(spec.id.clone(), spec);
        Ok(())
    }

    async fn get_agent_spec(&self, id: &str) -> PersistResult<Option<AgentSpec>> {
        Ok(self.agent_specs.get(id).map(|e| e.clone()))
    }

    async fn list_agent_specs(&self) -> PersistResult<Vec<AgentSpec>> {
        Ok(self.agent_specs.iter().map(|e| e.value().clone()).collect())
    }

    async fn delete_agent_spec(&self, id: &str) -> PersistResult<()> {
        self.agent_specs.remove(id);
        Ok(())
    }

    async fn put_thread(&self, thread: Thread) -> PersistResult<()> {
        self.threads.insert(thread.id.clone(), thread);
        Ok(())
    }

    async fn get_thread(&self, id: &str) -> PersistResult<Option<Thread>> {
        Ok(self.threads.get(id).and_then(|e| {
            let thread = e.value().clone();
            (thread.status != crate::core::model::ThreadStatus::Deleted).then_some(thread)
        }))
    }

    async fn delete_thread(&self, id: &str) -> PersistResult<()> {
        if let Some(mut entry) = self.threads.get_mut(id) {
            entry.status = crate::core::model::ThreadStatus::Deleted;
            Ok(())
        } else {
            Err(CoreError::new(ErrorKind::PersistenceError, "thread not found"))
        }
    }

    async fn list_threads(
        &self,
        owner_id: &str,
        agent_id: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> PersistResult<ThreadPage> {
        let mut matching: Vec<Thread> = self
            .threads
            .iter()
            .map(|e| e.value().clone())
            .filter(|t| t.owner_id == owner_id && t.status != crate::core::model::ThreadStatus::Deleted)
            .filter(|t| match (&t.target, agent_id) {
                (ThreadOwner::Agent { agent_id: a }, Some(id)) => a == id,
                (_, None) => true,
                _ => false,
            })
            .collect();
        matching.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
        let total = matching.len();
        let page = matching.into_iter().skip(offset).take(limit).collect();
        Ok(ThreadPage {
            threads: page,
            total,
            page: offset / limit.max(1),
            page_size: limit,
        })
    }

    async fn put_message(&self, message: Message) -> PersistResult<()> {
        let mut entry = self.messages.entry(message.thread_id.clone()).or_default();
        if let Some(last) = entry.last() {
            if message.ordinal <= last.ordinal {
                return Err(CoreError::new(
                    ErrorKind::PersistenceError,
                    "message ordinal must strictly increase",
                ));
            }
        }
        entry.push(message);
        Ok(())
    }

    async fn list_messages(&self, thread_id: &str) -> PersistResult<Vec<Message>> {
        Ok(self.messages.get(thread_id).map(|e| e.clone()).unwrap_or_default())
    }

    async fn put_run(&self, run: Run) -> PersistResult<()> {
        let mut index = self.runs_by_thread.entry(run.thread_id.clone()).or_default();
        if !index.iter().any(|id| *id == run.id) {
            index.push(run.id.clone());
        }
        drop(index);
        self.runs.insert(run.id.clone(), run);
        Ok(())
    }

    async fn get_run(&self, id: &str) -> PersistResult<Option<Run>> {
        Ok(self.runs.get(id).map(|e| e.clone()))
    }

    async fn list_runs(&self, thread_id: &str) -> PersistResult<Vec<Run>> {
        let ids = self.runs_by_thread.get(thread_id).map(|e| e.clone()).unwrap_or_default();
        Ok(ids.into_iter().filter_map(|id| self.runs.get(&id).map(|e| e.clone())).collect())
    }

    async fn put_step(&self, step: Step) -> PersistResult<()> {
        // Steps from one turn's concurrently-dispatched tool calls are
        // persisted out of completion order even though their ordinals
        // were assigned up front, so this keeps the list sorted by
        // ordinal on insert rather than requiring strictly-increasing
        // *arrival* order (unlike `put_message`, where the Runner writes
        // one message at a time and can enforce arrival order).
        let mut entry = self.steps.entry(step.run_id.clone()).or_default();
        if let Some(existing) = entry.iter_mut().find(|s| s.id == step.id) {
            *existing = step;
            return Ok(());
        }
        if entry.iter().any(|s| s.ordinal == step.ordinal) {
            return Err(CoreError::new(
                ErrorKind::PersistenceError,
                "duplicate step ordinal within run",
            ));
        }
        let insert_at = entry.iter().position(|s| s.ordinal > step.ordinal).unwrap_or(entry.len());
        entry.insert(insert_at, step);
        Ok(())
    }

    async fn list_steps(&self, run_id: &str) -> PersistResult<Vec<Step>> {
        Ok(self.steps.get(run_id).map(|e| e.clone()).unwrap_or_default())
    }

    async fn put_tool_call(&self, call: ToolCall) -> PersistResult<()> {
        self.tool_calls.insert(call.id.clone(), call);
        Ok(())
    }

    async fn get_tool_call(&self, id: &str) -> PersistResult<Option<ToolCall>> {
        Ok(self.tool_calls.get(id).map(|e| e.clone()))
    }

    async fn put_metric(&self, metric: Metric) -> PersistResult<()> {
        let key = (metric.user_id.clone(), metric.date);
        let total = metric.tokens_in + metric.tokens_out;
        self.metrics_by_user_date
            .entry(key)
            .and_modify(|existing| *existing += total)
            .or_insert(total);
        Ok(())
    }

    async fn tokens_for_user_on(&self, user_id: &str, date: NaiveDate) -> PersistResult<u64> {
        Ok(self
            .metrics_by_user_date
            .get(&(user_id.to_string(), date))
            .map(|e| *e.value())
            .unwrap_or(0))
    }
}

/// Convenience used by the Seeding step and tests: today's date in the
/// gateway's clock, used for `Metric` partitioning.
pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}
