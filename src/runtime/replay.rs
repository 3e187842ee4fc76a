//! Replay determinism correlator.
//!
//! Feeds a recorded history, in its original order, to the same state
//! machine used for live execution. No branch consults a live clock or live
//! transport: the monitor stays inert and no command reaches a sink. Any
//! event that does not match the expected next state-machine input raises a
//! [`NondeterminismError`] and replay halts — code changes that alter
//! historical decision order become detectable divergence instead of silent
//! corruption.

use tracing::debug;

use crate::errors::NondeterminismError;
use crate::runtime::WorkflowCore;
use crate::Event;

/// Drives a replay-mode [`WorkflowCore`] through its recorded history, one
/// event at a time.
pub struct ReplayCorrelator {
    core: WorkflowCore,
}

impl ReplayCorrelator {
    /// The core must have been built with [`WorkflowCore::for_replay`].
    pub fn new(core: WorkflowCore) -> Self {
        Self { core }
    }

    /// Apply the next recorded event. Returns `Ok(None)` once the history is
    /// exhausted. Recorded first-attempt schedule events must already have
    /// been claimed by the re-executed caller's schedule requests; retry
    /// schedules are correlated here against a pending backoff.
    pub fn step(&mut self) -> Result<Option<Event>, NondeterminismError> {
        let mut inner = self.core.lock();
        if let Some(err) = inner.nondeterminism() {
            return Err(err);
        }
        loop {
            let cursor = inner.replay_cursor;
            if cursor >= inner.recorded.len() {
                return Ok(None);
            }
            let event = inner.recorded[cursor].clone();
            match &event {
                Event::ActivityScheduled {
                    seq,
                    at_ms,
                    activity_type,
                    attempt,
                    ..
                } => {
                    if inner.claimed_schedules.contains(&cursor) {
                        // Claimed by a re-executed schedule request; already
                        // applied at claim time.
                        inner.replay_cursor += 1;
                        continue;
                    }
                    // Unclaimed schedule: only valid as the machine's own
                    // retry re-schedule for a pending backoff.
                    let matches_backoff = inner.invocations.get(seq).map(|inv| {
                        (
                            inv.backoff_pending,
                            inv.attempt,
                            inv.activity_type.clone(),
                        )
                    });
                    match matches_backoff {
                        Some((true, inv_attempt, inv_type))
                            if inv_attempt == *attempt && inv_type == *activity_type =>
                        {
                            let (seq, at_ms) = (*seq, *at_ms);
                            inner.claimed_schedules.insert(cursor);
                            inner.replay_cursor += 1;
                            inner.advance_to(at_ms);
                            inner.start_attempt(seq);
                            debug!(seq, attempt, "correlated retry schedule");
                            return Ok(Some(event));
                        }
                        Some((_, inv_attempt, _)) => {
                            let err = NondeterminismError::new(format!(
                                "recorded ActivityScheduled('{activity_type}', attempt {attempt}) for seq={seq} \
                                 does not match a pending retry (current attempt {inv_attempt})"
                            ));
                            inner.fail_nondeterminism(err.message.clone());
                            return Err(err);
                        }
                        None => {
                            let err = NondeterminismError::new(format!(
                                "recorded ActivityScheduled('{activity_type}') for seq={seq} \
                                 has no matching schedule request"
                            ));
                            inner.fail_nondeterminism(err.message.clone());
                            return Err(err);
                        }
                    }
                }
                _ => {
                    inner.replay_cursor += 1;
                    inner.apply_event(event.clone());
                    if let Some(err) = inner.nondeterminism() {
                        return Err(err);
                    }
                    return Ok(Some(event));
                }
            }
        }
    }

    /// Run the whole recorded history to its end.
    pub fn run_to_end(&mut self) -> Result<(), NondeterminismError> {
        while self.step()?.is_some() {}
        self.finish()
    }

    /// Final consistency check: every recorded schedule event must have been
    /// claimed by the time the history is exhausted.
    pub fn finish(&self) -> Result<(), NondeterminismError> {
        let inner = self.core.lock();
        if let Some(err) = inner.nondeterminism() {
            return Err(err);
        }
        for (idx, event) in inner.recorded.iter().enumerate() {
            if matches!(event, Event::ActivityScheduled { .. })
                && !inner.claimed_schedules.contains(&idx)
            {
                return Err(NondeterminismError::new(format!(
                    "recorded {} at index {idx} was never claimed by a schedule request",
                    event.kind_name()
                )));
            }
        }
        Ok(())
    }
}
