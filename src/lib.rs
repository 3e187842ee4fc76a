//! Activity-invocation lifecycle core for a replay-deterministic workflow
//! client: invocation state machine, retry evaluation, deadline monitoring,
//! hierarchical cancellation, and replay correlation.
//!
//! The transport that executes activities and the environment that hosts
//! workflows are external collaborators; they talk to this core through
//! emitted [`Command`]s and delivered [`Event`]s only.

use serde::{Deserialize, Serialize};

pub mod clock;
pub mod errors;
pub mod futures;
pub mod invocation;
pub mod monitor;
pub mod options;
pub mod retry;
pub mod runtime;
pub mod scope;

pub use crate::errors::{ActivityError, ActivityFailure, NondeterminismError, TimeoutKind};
pub use crate::futures::ActivityHandle;
pub use crate::invocation::{ActivityState, InvocationInfo};
pub use crate::options::{ActivityOptions, CancellationType};
pub use crate::retry::{RetryDecision, RetryPolicy};
pub use crate::runtime::replay::ReplayCorrelator;
pub use crate::runtime::{CommandSink, ExecutionMode, WorkflowCore};
pub use crate::scope::{ScopeId, ROOT_SCOPE};

/// History events: the recorded facts that drive both live and replay
/// execution. Every event carries the invocation identity (`seq`) it targets
/// and the logical timestamp (`at_ms`) at which it was applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    /// An activity attempt was scheduled. Appended by the core itself when it
    /// emits the corresponding [`Command::ScheduleActivity`].
    ActivityScheduled {
        seq: u64,
        at_ms: u64,
        activity_type: String,
        task_queue: String,
        input: String,
        attempt: u32,
    },
    /// A worker picked up the attempt and started executing it.
    ActivityStarted { seq: u64, at_ms: u64 },
    /// The attempt finished with a success result.
    ActivityCompleted { seq: u64, at_ms: u64, result: String },
    /// The attempt finished with an application failure.
    ActivityFailed {
        seq: u64,
        at_ms: u64,
        failure: ActivityFailure,
    },
    /// One of the four deadline kinds fired before a terminal result.
    ActivityTimedOut {
        seq: u64,
        at_ms: u64,
        kind: TimeoutKind,
    },
    /// Liveness signal from in-progress remote work; resets the heartbeat
    /// deadline.
    ActivityHeartbeat { seq: u64, at_ms: u64 },
    /// Cancellation was signaled by the owning scope.
    ActivityCancelRequested {
        seq: u64,
        at_ms: u64,
        reason: String,
    },
    /// The remote side acknowledged the cancel request.
    ActivityCancelAcknowledged { seq: u64, at_ms: u64 },
}

impl Event {
    /// Identity of the invocation this event targets.
    pub fn seq(&self) -> u64 {
        match self {
            Event::ActivityScheduled { seq, .. }
            | Event::ActivityStarted { seq, .. }
            | Event::ActivityCompleted { seq, .. }
            | Event::ActivityFailed { seq, .. }
            | Event::ActivityTimedOut { seq, .. }
            | Event::ActivityHeartbeat { seq, .. }
            | Event::ActivityCancelRequested { seq, .. }
            | Event::ActivityCancelAcknowledged { seq, .. } => *seq,
        }
    }

    /// Logical timestamp the event was applied at.
    pub fn at_ms(&self) -> u64 {
        match self {
            Event::ActivityScheduled { at_ms, .. }
            | Event::ActivityStarted { at_ms, .. }
            | Event::ActivityCompleted { at_ms, .. }
            | Event::ActivityFailed { at_ms, .. }
            | Event::ActivityTimedOut { at_ms, .. }
            | Event::ActivityHeartbeat { at_ms, .. }
            | Event::ActivityCancelRequested { at_ms, .. }
            | Event::ActivityCancelAcknowledged { at_ms, .. } => *at_ms,
        }
    }

    /// Re-stamp the event with a new logical timestamp.
    pub fn with_timestamp(mut self, new_at_ms: u64) -> Event {
        match &mut self {
            Event::ActivityScheduled { at_ms, .. }
            | Event::ActivityStarted { at_ms, .. }
            | Event::ActivityCompleted { at_ms, .. }
            | Event::ActivityFailed { at_ms, .. }
            | Event::ActivityTimedOut { at_ms, .. }
            | Event::ActivityHeartbeat { at_ms, .. }
            | Event::ActivityCancelRequested { at_ms, .. }
            | Event::ActivityCancelAcknowledged { at_ms, .. } => *at_ms = new_at_ms,
        }
        self
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Event::ActivityScheduled { .. } => "ActivityScheduled",
            Event::ActivityStarted { .. } => "ActivityStarted",
            Event::ActivityCompleted { .. } => "ActivityCompleted",
            Event::ActivityFailed { .. } => "ActivityFailed",
            Event::ActivityTimedOut { .. } => "ActivityTimedOut",
            Event::ActivityHeartbeat { .. } => "ActivityHeartbeat",
            Event::ActivityCancelRequested { .. } => "ActivityCancelRequested",
            Event::ActivityCancelAcknowledged { .. } => "ActivityCancelAcknowledged",
        }
    }
}

/// Commands emitted to the external scheduling interface. Fire-and-forget
/// from the core's perspective; the encompassing runtime persists and
/// dispatches them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    ScheduleActivity {
        seq: u64,
        activity_type: String,
        task_queue: String,
        input: String,
        attempt: u32,
    },
    /// Best-effort request to cancel the remote attempt.
    CancelActivity { seq: u64 },
}

impl Command {
    pub fn seq(&self) -> u64 {
        match self {
            Command::ScheduleActivity { seq, .. } | Command::CancelActivity { seq } => *seq,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Command::ScheduleActivity { .. } => "ScheduleActivity",
            Command::CancelActivity { .. } => "CancelActivity",
        }
    }
}

/// Serialize a history to the line-delimited JSON form used at the
/// persistence seam (one event per line).
pub fn history_to_json(events: &[Event]) -> Result<String, serde_json::Error> {
    let mut out = String::new();
    for event in events {
        out.push_str(&serde_json::to_string(event)?);
        out.push('\n');
    }
    Ok(out)
}

/// Parse a history back from its line-delimited JSON form.
pub fn history_from_json(data: &str) -> Result<Vec<Event>, serde_json::Error> {
    data.lines()
        .filter(|line| !line.trim().is_empty())
        .map(serde_json::from_str)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_json_round_trips() {
        let history = vec![
            Event::ActivityScheduled {
                seq: 1,
                at_ms: 0,
                activity_type: "Fetch".into(),
                task_queue: "default".into(),
                input: "in".into(),
                attempt: 1,
            },
            Event::ActivityStarted { seq: 1, at_ms: 5 },
            Event::ActivityCompleted {
                seq: 1,
                at_ms: 9,
                result: "ok".into(),
            },
        ];
        let encoded = history_to_json(&history).unwrap();
        assert_eq!(encoded.lines().count(), 3);
        let decoded = history_from_json(&encoded).unwrap();
        assert_eq!(decoded, history);
    }

    #[test]
    fn event_accessors_cover_all_variants() {
        let ev = Event::ActivityTimedOut {
            seq: 7,
            at_ms: 42,
            kind: TimeoutKind::StartToClose,
        };
        assert_eq!(ev.seq(), 7);
        assert_eq!(ev.at_ms(), 42);
        assert_eq!(ev.kind_name(), "ActivityTimedOut");
        let restamped = ev.with_timestamp(100);
        assert_eq!(restamped.at_ms(), 100);
    }
}
