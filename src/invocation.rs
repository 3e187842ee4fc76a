//! Per-invocation lifecycle record.

use std::task::Waker;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ActivityError;
use crate::options::ActivityOptions;
use crate::scope::ScopeId;

/// Lifecycle states of one activity invocation.
///
/// `Created` is initial; `Completed`, `Canceled`, and terminal `Failed` /
/// `TimedOut` end the lifecycle. A retryable failure moves the invocation
/// back to `Scheduled` with the attempt counter bumped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityState {
    Created,
    Scheduled,
    Started,
    Completed,
    Failed,
    TimedOut,
    CancelRequested,
    Canceled,
}

impl ActivityState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ActivityState::Completed
                | ActivityState::Failed
                | ActivityState::TimedOut
                | ActivityState::Canceled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityState::Created => "Created",
            ActivityState::Scheduled => "Scheduled",
            ActivityState::Started => "Started",
            ActivityState::Completed => "Completed",
            ActivityState::Failed => "Failed",
            ActivityState::TimedOut => "TimedOut",
            ActivityState::CancelRequested => "CancelRequested",
            ActivityState::Canceled => "Canceled",
        }
    }
}

impl std::fmt::Display for ActivityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only snapshot of an invocation for the query interface.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationInfo {
    pub seq: u64,
    pub activity_type: String,
    pub state: ActivityState,
    pub attempt: u32,
    pub cancellation_requested: bool,
    pub last_heartbeat_at_ms: Option<u64>,
}

/// One invocation's mutable lifecycle record. Mutated only by the owning
/// workflow's single logical thread of control via delivered events.
#[derive(Debug)]
pub(crate) struct Invocation {
    pub seq: u64,
    pub activity_type: String,
    pub input: String,
    pub options: ActivityOptions,
    pub scope: ScopeId,
    pub state: ActivityState,
    /// Starts at 1; strictly increases by one per retry.
    pub attempt: u32,
    pub first_scheduled_at_ms: u64,
    pub last_heartbeat_at_ms: Option<u64>,
    pub cancellation_requested: bool,
    /// Reason carried by the cancel request, surfaced in the canceled
    /// failure.
    pub cancel_reason: Option<String>,
    /// A retry delay is pending; the next schedule command fires when the
    /// backoff deadline elapses.
    pub backoff_pending: bool,
    /// Caller-visible terminal result, once resolved.
    pub result: Option<Result<String, ActivityError>>,
    pub waker: Option<Waker>,
}

impl Invocation {
    pub fn new(
        seq: u64,
        activity_type: String,
        input: String,
        options: ActivityOptions,
        scope: ScopeId,
        now_ms: u64,
    ) -> Self {
        Self {
            seq,
            activity_type,
            input,
            options,
            scope,
            state: ActivityState::Created,
            attempt: 1,
            first_scheduled_at_ms: now_ms,
            last_heartbeat_at_ms: None,
            cancellation_requested: false,
            cancel_reason: None,
            backoff_pending: false,
            result: None,
            waker: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.result.is_some()
    }

    /// Deliver the caller-visible result and wake any pending poll. The
    /// first resolution wins; later calls are ignored.
    pub fn resolve(&mut self, result: Result<String, ActivityError>) {
        if self.result.is_some() {
            return;
        }
        self.result = Some(result);
        if let Some(waker) = self.waker.take() {
            waker.wake();
        }
    }

    pub fn elapsed_since_first_schedule(&self, now_ms: u64) -> Duration {
        Duration::from_millis(now_ms.saturating_sub(self.first_scheduled_at_ms))
    }

    pub fn info(&self) -> InvocationInfo {
        InvocationInfo {
            seq: self.seq,
            activity_type: self.activity_type.clone(),
            state: self.state,
            attempt: self.attempt,
            cancellation_requested: self.cancellation_requested,
            last_heartbeat_at_ms: self.last_heartbeat_at_ms,
        }
    }
}
