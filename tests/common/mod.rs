#![allow(dead_code)]

use std::time::Duration;

use actoxide::{ActivityFailure, ActivityOptions, Command, RetryPolicy, WorkflowCore};

/// Initialize test logging once; controlled via RUST_LOG.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Options with a generous start-to-close and nothing else configured.
pub fn basic_options() -> ActivityOptions {
    ActivityOptions::new("default", Duration::from_secs(3600))
}

/// The retry setup used by the always-failing IO scenario: 1s initial, 1s
/// maximum, doubling coefficient, three attempts.
pub fn io_retry_policy() -> RetryPolicy {
    RetryPolicy::new(3)
        .with_initial_interval(Duration::from_secs(1))
        .with_maximum_interval(Duration::from_secs(1))
        .with_backoff_coefficient(2.0)
}

pub fn io_failure() -> ActivityFailure {
    ActivityFailure::application("IOException", "simulated connection failure")
}

pub fn schedule_command_count(core: &WorkflowCore) -> usize {
    core.commands()
        .iter()
        .filter(|c| matches!(c, Command::ScheduleActivity { .. }))
        .count()
}

pub fn cancel_command_seqs(core: &WorkflowCore) -> Vec<u64> {
    core.commands()
        .iter()
        .filter_map(|c| match c {
            Command::CancelActivity { seq } => Some(*seq),
            _ => None,
        })
        .collect()
}
