//! Failure taxonomy for activity invocations.

use serde::{Deserialize, Serialize};

/// The four independent deadline kinds tracked per invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TimeoutKind {
    /// Attempt was not picked up by a worker in time.
    ScheduleToStart,
    /// Overall deadline spanning all attempts; never retried.
    ScheduleToClose,
    /// A single attempt ran too long.
    StartToClose,
    /// The worker stopped heartbeating.
    Heartbeat,
}

impl TimeoutKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeoutKind::ScheduleToStart => "schedule_to_start",
            TimeoutKind::ScheduleToClose => "schedule_to_close",
            TimeoutKind::StartToClose => "start_to_close",
            TimeoutKind::Heartbeat => "heartbeat",
        }
    }
}

impl std::fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of why an activity attempt did not succeed.
///
/// `Application` failures carry a nameable type so the retry policy can match
/// them against its non-retryable set and so callers can recover the original
/// error identity after retries are exhausted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ActivityFailure {
    /// Business-logic error raised by the remote work.
    Application {
        error_type: String,
        message: String,
        non_retryable: bool,
    },
    /// A deadline fired before the attempt reached a terminal result.
    Timeout { kind: TimeoutKind },
    /// Produced by cancellation resolution paths; never retried.
    Canceled { reason: String },
}

impl ActivityFailure {
    /// Retryable application failure.
    pub fn application(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        ActivityFailure::Application {
            error_type: error_type.into(),
            message: message.into(),
            non_retryable: false,
        }
    }

    /// Application failure flagged non-retryable at the source.
    pub fn non_retryable(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        ActivityFailure::Application {
            error_type: error_type.into(),
            message: message.into(),
            non_retryable: true,
        }
    }

    pub fn timeout(kind: TimeoutKind) -> Self {
        ActivityFailure::Timeout { kind }
    }

    pub fn canceled(reason: impl Into<String>) -> Self {
        ActivityFailure::Canceled {
            reason: reason.into(),
        }
    }

    /// The nameable type of this failure, as matched against a retry policy's
    /// non-retryable set and preserved through the caller-facing wrapper.
    pub fn error_type(&self) -> &str {
        match self {
            ActivityFailure::Application { error_type, .. } => error_type,
            ActivityFailure::Timeout { .. } => "TimeoutFailure",
            ActivityFailure::Canceled { .. } => "CanceledFailure",
        }
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, ActivityFailure::Canceled { .. })
    }

    pub fn timeout_kind(&self) -> Option<TimeoutKind> {
        match self {
            ActivityFailure::Timeout { kind } => Some(*kind),
            _ => None,
        }
    }
}

impl std::fmt::Display for ActivityFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActivityFailure::Application {
                error_type,
                message,
                ..
            } => write!(f, "{error_type}: {message}"),
            ActivityFailure::Timeout { kind } => write!(f, "activity timed out: {kind}"),
            ActivityFailure::Canceled { reason } => write!(f, "activity canceled: {reason}"),
        }
    }
}

impl std::error::Error for ActivityFailure {}

/// Caller-facing terminal error: the failure that ended the invocation,
/// wrapped with the attempt count it surfaced on. The original failure type
/// is preserved via [`ActivityFailure::error_type`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityError {
    pub cause: ActivityFailure,
    pub attempts: u32,
}

impl ActivityError {
    pub fn new(cause: ActivityFailure, attempts: u32) -> Self {
        Self { cause, attempts }
    }

    pub fn error_type(&self) -> &str {
        self.cause.error_type()
    }
}

impl std::fmt::Display for ActivityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "activity failed after {} attempt(s): {}",
            self.attempts, self.cause
        )
    }
}

impl std::error::Error for ActivityError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}

/// A replay event did not match the expected next state-machine input.
/// Fatal to the replay operation: the correlator aborts rather than risk
/// silently diverging from recorded history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NondeterminismError {
    pub message: String,
}

impl NondeterminismError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for NondeterminismError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "nondeterministic: {}", self.message)
    }
}

impl std::error::Error for NondeterminismError {}
