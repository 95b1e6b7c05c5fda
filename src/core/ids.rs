//! Clock & Identifier Service.
//!
//! The smallest leaf in the system: opaque IDs for every entity and a
//! thin clock abstraction so the Runner never calls `chrono::Utc::now()`
//! directly (making deadline/timeout logic deterministically testable).

use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Generates an opaque, prefixed ID, e.g. `run_3c1f...`. The prefix
/// keeps IDs from different entity kinds visually distinct once they
/// flow through generic `String` parameters.
pub fn new_id(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4().simple())
}

pub fn thread_id() -> String {
    new_id("thread")
}
pub fn run_id() -> String {
    new_id("run")
}
pub fn step_id() -> String {
    new_id("step")
}
pub fn tool_call_id() -> String {
    new_id("call")
}
pub fn message_id() -> String {
    new_id("msg")
}
pub fn trace_id() -> String {
    new_id("trace")
}
pub fn metric_id() -> String {
    new_id("metric")
}
pub fn gate_token() -> String {
    new_id("gate")
}

/// Wall-clock access, abstracted so tests can substitute a fixed clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    fn monotonic_now(&self) -> Instant;
}

/// The real clock, backed by `chrono::Utc` and `std::time::Instant`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
    fn monotonic_now(&self) -> Instant {
        Instant::now()
    }
}

/// A deadline computed from a clock and a duration budget.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn after(clock: &dyn Clock, budget: Duration) -> Self {
        Self {
            at: clock.monotonic_now() + budget,
        }
    }

    pub fn remaining(&self, clock: &dyn Clock) -> Duration {
        self.at.saturating_duration_since(clock.monotonic_now())
    }

    pub fn is_expired(&self, clock: &dyn Clock) -> bool {
        clock.monotonic_now() >= self.at
    }

    /// The smaller of this deadline and `other`, used when composing
    /// agent-run / per-tool / per-retry deadlines.
    pub fn min(&self, other: Deadline) -> Deadline {
        if other.at < self.at {
            other
        } else {
            *self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_prefixed_and_unique() {
        let a = run_id();
        let b = run_id();
        assert!(a.starts_with("run_"));
        assert_ne!(a, b);
    }

    #[test]
    fn deadline_min_picks_the_sooner_one() {
        let clock = SystemClock;
        let short = Deadline::after(&clock, Duration::from_millis(10));
        let long = Deadline::after(&clock, Duration::from_secs(30));
        assert!(short.min(long).remaining(&clock) <= short.remaining(&clock));
    }
}
