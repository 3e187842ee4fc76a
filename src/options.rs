//! Per-invocation configuration, captured once at scheduling time.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// How cancellation of the owning scope resolves the caller-visible result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CancellationType {
    /// Resolve immediately with a cancellation failure and send a
    /// best-effort cancel request without waiting for acknowledgment.
    #[default]
    TryCancel,
    /// Stay pending until the remote side acknowledges the cancel (or any
    /// other terminal event arrives).
    WaitCancellationCompleted,
    /// Send the cancel request but stop tracking it; the invocation keeps
    /// running toward its own timeout or result.
    Abandon,
}

/// Options governing one activity invocation. Immutable once the invocation
/// is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityOptions {
    pub task_queue: String,
    pub start_to_close_timeout: Duration,
    pub schedule_to_close_timeout: Option<Duration>,
    pub schedule_to_start_timeout: Option<Duration>,
    pub heartbeat_timeout: Option<Duration>,
    pub cancellation_type: CancellationType,
    pub retry_policy: Option<RetryPolicy>,
}

impl ActivityOptions {
    /// `start_to_close_timeout` is the only required deadline.
    pub fn new(task_queue: impl Into<String>, start_to_close_timeout: Duration) -> Self {
        Self {
            task_queue: task_queue.into(),
            start_to_close_timeout,
            schedule_to_close_timeout: None,
            schedule_to_start_timeout: None,
            heartbeat_timeout: None,
            cancellation_type: CancellationType::default(),
            retry_policy: None,
        }
    }

    pub fn with_schedule_to_close_timeout(mut self, timeout: Duration) -> Self {
        self.schedule_to_close_timeout = Some(timeout);
        self
    }

    pub fn with_schedule_to_start_timeout(mut self, timeout: Duration) -> Self {
        self.schedule_to_start_timeout = Some(timeout);
        self
    }

    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = Some(timeout);
        self
    }

    pub fn with_cancellation_type(mut self, cancellation_type: CancellationType) -> Self {
        self.cancellation_type = cancellation_type;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }
}
