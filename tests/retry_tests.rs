//! Retry behavior of the invocation state machine: exhausted attempt
//! budgets, backoff spacing, non-retryable classification, and the overall
//! schedule-to-close cap.

use std::time::Duration;

use actoxide::{
    ActivityFailure, ActivityState, Event, RetryPolicy, WorkflowCore,
};

mod common;
use common::{basic_options, io_failure, io_retry_policy, schedule_command_count};

// ============================================================================
// Attempt budget
// ============================================================================

/// Always-failing retryable IOException with maximumAttempts = 3: exactly
/// three schedule commands, and the surfaced failure preserves the original
/// error type wrapped with the final attempt count.
#[test]
fn always_failing_activity_stops_after_three_attempts() {
    common::init_tracing();
    let core = WorkflowCore::new();
    let options = basic_options().with_retry_policy(io_retry_policy());
    let handle = core.schedule_activity("HeartbeatAndThrowIO", "", options);
    let seq = handle.seq();

    for attempt in 1..=3u32 {
        assert_eq!(core.invocation(seq).unwrap().attempt, attempt);
        core.start_activity(seq);
        core.fail_activity(seq, io_failure());
        // Backoff for the next attempt, if one is coming.
        core.advance(Duration::from_secs(2));
    }

    let err = handle.try_result().expect("terminal").unwrap_err();
    assert_eq!(err.error_type(), "IOException");
    assert_eq!(err.attempts, 3);
    assert_eq!(core.invocation(seq).unwrap().state, ActivityState::Failed);
    assert_eq!(
        schedule_command_count(&core),
        3,
        "exactly one schedule command per attempt"
    );
}

#[test]
fn failure_without_policy_is_terminal_on_first_attempt() {
    let core = WorkflowCore::new();
    let handle = core.schedule_activity("NoRetries", "", basic_options());
    core.start_activity(handle.seq());
    core.fail_activity(handle.seq(), io_failure());

    let err = handle.try_result().unwrap().unwrap_err();
    assert_eq!(err.attempts, 1);
    assert_eq!(schedule_command_count(&core), 1);
}

// ============================================================================
// Backoff spacing
// ============================================================================

/// Schedule events for consecutive attempts are spaced by
/// min(initial * coefficient^(k-1), maximum).
#[test]
fn backoff_between_attempts_follows_the_policy_formula() {
    let core = WorkflowCore::new();
    let policy = RetryPolicy::new(4)
        .with_initial_interval(Duration::from_millis(100))
        .with_maximum_interval(Duration::from_secs(60))
        .with_backoff_coefficient(2.0);
    let options = basic_options().with_retry_policy(policy);
    let handle = core.schedule_activity("Flaky", "", options);
    let seq = handle.seq();

    // Fail each attempt the instant it is scheduled, then advance exactly
    // the expected delay, so the schedule gaps are the computed backoffs.
    for expected_delay_ms in [100u64, 200, 400] {
        core.start_activity(seq);
        core.fail_activity(seq, io_failure());
        core.advance(Duration::from_millis(expected_delay_ms));
    }

    let schedule_times: Vec<u64> = core
        .history()
        .iter()
        .filter_map(|e| match e {
            Event::ActivityScheduled { at_ms, .. } => Some(*at_ms),
            _ => None,
        })
        .collect();
    assert_eq!(schedule_times.len(), 4);
    assert_eq!(schedule_times[1] - schedule_times[0], 100);
    assert_eq!(schedule_times[2] - schedule_times[1], 200);
    assert_eq!(schedule_times[3] - schedule_times[2], 400);
}

#[test]
fn backoff_delay_is_capped_by_maximum_interval() {
    let core = WorkflowCore::new();
    let policy = RetryPolicy::new(0)
        .with_initial_interval(Duration::from_secs(1))
        .with_maximum_interval(Duration::from_secs(1));
    let options = basic_options().with_retry_policy(policy);
    let handle = core.schedule_activity("Flaky", "", options);
    let seq = handle.seq();

    for _ in 0..4 {
        core.start_activity(seq);
        core.fail_activity(seq, io_failure());
        core.advance(Duration::from_secs(1));
    }
    let schedule_times: Vec<u64> = core
        .history()
        .iter()
        .filter_map(|e| match e {
            Event::ActivityScheduled { at_ms, .. } => Some(*at_ms),
            _ => None,
        })
        .collect();
    assert_eq!(schedule_times, vec![0, 1000, 2000, 3000, 4000]);
    assert!(handle.try_result().is_none(), "unlimited attempts keep going");
}

/// No schedule command is produced until the computed delay has elapsed.
#[test]
fn next_schedule_command_waits_for_the_backoff_delay() {
    let core = WorkflowCore::new();
    let policy = RetryPolicy::new(3).with_initial_interval(Duration::from_millis(500));
    let options = basic_options().with_retry_policy(policy);
    let handle = core.schedule_activity("Flaky", "", options);
    let seq = handle.seq();

    core.start_activity(seq);
    core.fail_activity(seq, io_failure());
    assert_eq!(core.invocation(seq).unwrap().state, ActivityState::Scheduled);
    assert_eq!(core.invocation(seq).unwrap().attempt, 2);
    assert_eq!(schedule_command_count(&core), 1, "still waiting out the delay");

    core.advance(Duration::from_millis(499));
    assert_eq!(schedule_command_count(&core), 1);
    core.advance(Duration::from_millis(1));
    assert_eq!(schedule_command_count(&core), 2);
    let _ = handle;
}

// ============================================================================
// Failure classification
// ============================================================================

#[test]
fn non_retryable_type_in_policy_stops_immediately() {
    let core = WorkflowCore::new();
    let policy = RetryPolicy::new(10).with_non_retryable("IOException");
    let options = basic_options().with_retry_policy(policy);
    let handle = core.schedule_activity("Flaky", "", options);

    core.start_activity(handle.seq());
    core.fail_activity(handle.seq(), io_failure());

    let err = handle.try_result().unwrap().unwrap_err();
    assert_eq!(err.error_type(), "IOException");
    assert_eq!(err.attempts, 1);
    assert_eq!(schedule_command_count(&core), 1);
}

#[test]
fn source_flagged_non_retryable_failure_stops_immediately() {
    let core = WorkflowCore::new();
    let options = basic_options().with_retry_policy(RetryPolicy::new(10));
    let handle = core.schedule_activity("Validate", "", options);

    core.start_activity(handle.seq());
    core.fail_activity(
        handle.seq(),
        ActivityFailure::non_retryable("ValidationError", "bad payload"),
    );

    let err = handle.try_result().unwrap().unwrap_err();
    assert_eq!(err.error_type(), "ValidationError");
    assert_eq!(err.attempts, 1);
}

// ============================================================================
// Schedule-to-close interaction
// ============================================================================

/// Unlimited attempts are still bounded by the overall schedule-to-close
/// budget: retrying stops once the next delay cannot fit.
#[test]
fn retries_stop_when_delay_would_overrun_schedule_to_close() {
    let core = WorkflowCore::new();
    let policy = RetryPolicy::new(0)
        .with_initial_interval(Duration::from_secs(2))
        .with_maximum_interval(Duration::from_secs(2));
    let options = basic_options()
        .with_schedule_to_close_timeout(Duration::from_secs(5))
        .with_retry_policy(policy);
    let handle = core.schedule_activity("Flaky", "", options);
    let seq = handle.seq();

    // t=0: fail -> elapsed 0 + 2s delay fits in 5s, retry scheduled at 2s.
    core.start_activity(seq);
    core.fail_activity(seq, io_failure());
    core.advance(Duration::from_secs(2));
    // t=2s: fail -> 2s + 2s = 4s fits, retry at 4s.
    core.start_activity(seq);
    core.fail_activity(seq, io_failure());
    core.advance(Duration::from_secs(2));
    // t=4s: fail -> 4s + 2s = 6s exceeds the 5s budget; stop.
    core.start_activity(seq);
    core.fail_activity(seq, io_failure());

    let err = handle.try_result().expect("terminal").unwrap_err();
    assert_eq!(err.error_type(), "IOException");
    assert_eq!(err.attempts, 3);
    assert_eq!(schedule_command_count(&core), 3);
}
