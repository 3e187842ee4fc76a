//! The single-threaded invocation core: owns every invocation's state
//! machine, the cancellation scope tree, the deadline monitor, the command
//! log, and the replay log.
//!
//! All mutation is confined to one logical thread of control: events are
//! applied one at a time, in delivery order, and that order is exactly what
//! replay reproduces. Cancellation is cooperative; it arrives as an ordinary
//! event and never preempts in-flight transitions.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, warn};

use crate::clock::LogicalClock;
use crate::errors::{ActivityError, ActivityFailure, NondeterminismError, TimeoutKind};
use crate::futures::ActivityHandle;
use crate::invocation::{ActivityState, Invocation, InvocationInfo};
use crate::monitor::{DeadlineKind, DeadlineMonitor};
use crate::options::{ActivityOptions, CancellationType};
use crate::retry::RetryDecision;
use crate::scope::{ScopeId, ScopeTree, ROOT_SCOPE};
use crate::{Command, Event};

pub mod driver;
pub mod replay;

/// Receiver for commands bound for the external scheduling interface.
/// Fire-and-forget from the core's perspective.
pub trait CommandSink: Send {
    fn emit(&mut self, command: &Command);
}

impl<F> CommandSink for F
where
    F: FnMut(&Command) + Send,
{
    fn emit(&mut self, command: &Command) {
        self(command)
    }
}

/// Whether the core is driven by live events or by a recorded history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Live,
    Replay,
}

pub(crate) struct CoreInner {
    mode: ExecutionMode,
    clock: LogicalClock,
    next_seq: u64,
    pub(crate) invocations: BTreeMap<u64, Invocation>,
    scopes: ScopeTree,
    monitor: DeadlineMonitor,
    /// Replay log: every applied event, in application order.
    history: Vec<Event>,
    /// Every produced command, in production order (the query interface the
    /// encompassing runtime persists from).
    commands: Vec<Command>,
    /// Commands handed to the live transport. Stays zero during replay.
    emitted_live: usize,
    sink: Option<Box<dyn CommandSink>>,
    /// Replay only: the recorded history being correlated.
    pub(crate) recorded: Vec<Event>,
    /// Replay only: indices of recorded schedule events already claimed.
    pub(crate) claimed_schedules: HashSet<usize>,
    /// Replay only: next recorded index the correlator will apply.
    pub(crate) replay_cursor: usize,
    nondeterminism: Option<NondeterminismError>,
}

impl CoreInner {
    fn new(mode: ExecutionMode, recorded: Vec<Event>, sink: Option<Box<dyn CommandSink>>) -> Self {
        Self {
            mode,
            clock: LogicalClock::new(),
            next_seq: 1,
            invocations: BTreeMap::new(),
            scopes: ScopeTree::new(),
            monitor: DeadlineMonitor::new(),
            history: Vec::new(),
            commands: Vec::new(),
            emitted_live: 0,
            sink,
            recorded,
            claimed_schedules: HashSet::new(),
            replay_cursor: 0,
            nondeterminism: None,
        }
    }

    pub(crate) fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub(crate) fn fail_nondeterminism(&mut self, message: String) {
        warn!(%message, "replay divergence");
        if self.nondeterminism.is_none() {
            self.nondeterminism = Some(NondeterminismError::new(message));
        }
    }

    pub(crate) fn nondeterminism(&self) -> Option<NondeterminismError> {
        self.nondeterminism.clone()
    }

    fn record_event(&mut self, event: Event) {
        self.history.push(event);
    }

    fn push_command(&mut self, command: Command) {
        if self.mode == ExecutionMode::Live {
            self.emitted_live += 1;
            if let Some(sink) = self.sink.as_mut() {
                sink.emit(&command);
            }
        }
        self.commands.push(command);
    }

    /// Arm a monitor deadline. Inert during replay: recorded timeout events
    /// drive the same transitions instead.
    fn arm(&mut self, seq: u64, kind: DeadlineKind, fire_at_ms: u64) {
        if self.mode == ExecutionMode::Live {
            self.monitor.arm(seq, kind, fire_at_ms);
        }
    }

    /// A delivered event did not fit the target's current state. Live
    /// execution drops it; replay treats it as fatal divergence.
    fn reject_event(&mut self, event: &Event, why: &str) {
        match self.mode {
            ExecutionMode::Live => {
                warn!(seq = event.seq(), event = event.kind_name(), why, "ignoring event");
            }
            ExecutionMode::Replay => {
                self.fail_nondeterminism(format!(
                    "recorded {} for invocation seq={} does not match expected input: {why}",
                    event.kind_name(),
                    event.seq()
                ));
            }
        }
    }

    // ------------------------------------------------------------------
    // Scheduling
    // ------------------------------------------------------------------

    pub(crate) fn schedule_activity(
        &mut self,
        scope: ScopeId,
        activity_type: &str,
        input: &str,
        options: ActivityOptions,
    ) -> u64 {
        match self.mode {
            ExecutionMode::Live => self.live_schedule(scope, activity_type, input, options),
            ExecutionMode::Replay => self.replay_claim_schedule(scope, activity_type, input, options),
        }
    }

    fn live_schedule(
        &mut self,
        scope: ScopeId,
        activity_type: &str,
        input: &str,
        options: ActivityOptions,
    ) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        let now = self.now_ms();
        let invocation = Invocation::new(
            seq,
            activity_type.to_string(),
            input.to_string(),
            options,
            scope,
            now,
        );
        self.scopes.register(scope, seq);
        let scope_already_cancelled = self.scopes.is_cancel_requested(scope);
        self.invocations.insert(seq, invocation);
        self.start_attempt(seq);
        if scope_already_cancelled {
            self.apply_event(Event::ActivityCancelRequested {
                seq,
                at_ms: now,
                reason: "scope already canceled".to_string(),
            });
        }
        seq
    }

    /// During replay, a schedule request claims the next unclaimed recorded
    /// first-attempt schedule event; a mismatch is fatal divergence. Retry
    /// re-schedules (attempt > 1) belong to the state machine and are
    /// correlated by the replay cursor instead.
    fn replay_claim_schedule(
        &mut self,
        scope: ScopeId,
        activity_type: &str,
        input: &str,
        options: ActivityOptions,
    ) -> u64 {
        let mut found: Option<(usize, u64, u64)> = None;
        let mut mismatch: Option<String> = None;
        for (idx, event) in self.recorded.iter().enumerate() {
            if self.claimed_schedules.contains(&idx) {
                continue;
            }
            if let Event::ActivityScheduled {
                seq,
                at_ms,
                activity_type: recorded_type,
                task_queue: recorded_queue,
                input: recorded_input,
                attempt: 1,
            } = event
            {
                if recorded_type != activity_type
                    || recorded_input != input
                    || *recorded_queue != options.task_queue
                {
                    mismatch = Some(format!(
                        "schedule order mismatch: next is ActivityScheduled('{recorded_type}','{recorded_input}') \
                         but expected ActivityScheduled('{activity_type}','{input}')"
                    ));
                } else {
                    found = Some((idx, *seq, *at_ms));
                }
                break;
            }
        }
        if let Some(message) = mismatch {
            self.fail_nondeterminism(message);
            let seq = self.next_seq;
            self.next_seq += 1;
            return seq;
        }
        let (idx, seq, at_ms) = match found {
            Some(claim) => claim,
            None => {
                self.fail_nondeterminism(format!(
                    "schedule request for '{activity_type}' has no matching recorded ActivityScheduled"
                ));
                let seq = self.next_seq;
                self.next_seq += 1;
                return seq;
            }
        };
        self.claimed_schedules.insert(idx);
        self.clock.advance_to(at_ms);
        let invocation = Invocation::new(
            seq,
            activity_type.to_string(),
            input.to_string(),
            options,
            scope,
            at_ms,
        );
        self.scopes.register(scope, seq);
        self.invocations.insert(seq, invocation);
        self.next_seq = self.next_seq.max(seq + 1);
        self.start_attempt(seq);
        seq
    }

    /// Emit the schedule command for the invocation's current attempt and arm
    /// the attempt's deadlines. Used by the first schedule, by backoff expiry
    /// in live mode, and by retry-schedule correlation during replay.
    pub(crate) fn start_attempt(&mut self, seq: u64) {
        let now = self.now_ms();
        let (activity_type, task_queue, input, attempt, schedule_to_start, schedule_to_close, first_scheduled) =
            match self.invocations.get(&seq) {
                Some(inv) => (
                    inv.activity_type.clone(),
                    inv.options.task_queue.clone(),
                    inv.input.clone(),
                    inv.attempt,
                    inv.options.schedule_to_start_timeout,
                    inv.options.schedule_to_close_timeout,
                    inv.first_scheduled_at_ms,
                ),
                None => {
                    warn!(seq, "start_attempt for unknown invocation");
                    return;
                }
            };
        self.record_event(Event::ActivityScheduled {
            seq,
            at_ms: now,
            activity_type: activity_type.clone(),
            task_queue: task_queue.clone(),
            input: input.clone(),
            attempt,
        });
        self.push_command(Command::ScheduleActivity {
            seq,
            activity_type,
            task_queue,
            input,
            attempt,
        });
        if let Some(d) = schedule_to_start {
            self.arm(
                seq,
                DeadlineKind::Timeout(TimeoutKind::ScheduleToStart),
                now + d.as_millis() as u64,
            );
        }
        if attempt == 1 {
            if let Some(d) = schedule_to_close {
                self.arm(
                    seq,
                    DeadlineKind::Timeout(TimeoutKind::ScheduleToClose),
                    first_scheduled + d.as_millis() as u64,
                );
            }
        }
        if let Some(inv) = self.invocations.get_mut(&seq) {
            inv.state = ActivityState::Scheduled;
            inv.backoff_pending = false;
        }
        debug!(seq, attempt, "activity scheduled");
    }

    // ------------------------------------------------------------------
    // Event application (the state machine)
    // ------------------------------------------------------------------

    pub(crate) fn apply_event(&mut self, event: Event) {
        self.clock.advance_to(event.at_ms());
        let seq = event.seq();
        if !self.invocations.contains_key(&seq) {
            self.reject_event(&event, "unknown invocation");
            return;
        }
        match event {
            Event::ActivityScheduled { .. } => {
                // Schedule events are produced by the core itself, never
                // delivered from outside.
                self.reject_event(&event, "schedule events are core-produced");
            }
            Event::ActivityStarted { seq, at_ms } => self.on_started(seq, at_ms),
            Event::ActivityCompleted { seq, at_ms, result } => self.on_completed(seq, at_ms, result),
            Event::ActivityFailed { seq, at_ms, failure } => self.on_failed(seq, at_ms, failure),
            Event::ActivityTimedOut { seq, at_ms, kind } => self.on_timed_out(seq, at_ms, kind),
            Event::ActivityHeartbeat { seq, at_ms } => self.on_heartbeat(seq, at_ms),
            Event::ActivityCancelRequested { seq, at_ms, reason } => {
                self.on_cancel_requested(seq, at_ms, reason)
            }
            Event::ActivityCancelAcknowledged { seq, at_ms } => {
                self.on_cancel_acknowledged(seq, at_ms)
            }
        }
    }

    fn on_started(&mut self, seq: u64, at_ms: u64) {
        let (state, backoff_pending, start_to_close) = match self.invocations.get(&seq) {
            Some(inv) => (inv.state, inv.backoff_pending, inv.options.start_to_close_timeout),
            None => return,
        };
        if state != ActivityState::Scheduled || backoff_pending {
            self.reject_event(
                &Event::ActivityStarted { seq, at_ms },
                "only a scheduled attempt can start",
            );
            return;
        }
        self.record_event(Event::ActivityStarted { seq, at_ms });
        self.monitor
            .disarm(seq, DeadlineKind::Timeout(TimeoutKind::ScheduleToStart));
        self.arm(
            seq,
            DeadlineKind::Timeout(TimeoutKind::StartToClose),
            at_ms + start_to_close.as_millis() as u64,
        );
        if let Some(inv) = self.invocations.get_mut(&seq) {
            inv.state = ActivityState::Started;
        }
        debug!(seq, "activity started");
    }

    fn on_completed(&mut self, seq: u64, at_ms: u64, result: String) {
        let (state, resolved, attempt) = match self.invocations.get(&seq) {
            Some(inv) => (inv.state, inv.is_resolved(), inv.attempt),
            None => return,
        };
        let acceptable = !resolved
            && matches!(state, ActivityState::Started | ActivityState::CancelRequested);
        if !acceptable {
            self.reject_event(
                &Event::ActivityCompleted { seq, at_ms, result },
                "no running attempt to complete",
            );
            return;
        }
        self.record_event(Event::ActivityCompleted {
            seq,
            at_ms,
            result: result.clone(),
        });
        self.monitor.disarm_all(seq);
        if let Some(inv) = self.invocations.get_mut(&seq) {
            inv.state = ActivityState::Completed;
            inv.resolve(Ok(result));
        }
        debug!(seq, attempt, "activity completed");
    }

    fn on_failed(&mut self, seq: u64, at_ms: u64, failure: ActivityFailure) {
        let (state, resolved) = match self.invocations.get(&seq) {
            Some(inv) => (inv.state, inv.is_resolved()),
            None => return,
        };
        let acceptable = !resolved
            && matches!(state, ActivityState::Started | ActivityState::CancelRequested);
        if !acceptable {
            self.reject_event(
                &Event::ActivityFailed { seq, at_ms, failure },
                "no running attempt to fail",
            );
            return;
        }
        self.record_event(Event::ActivityFailed {
            seq,
            at_ms,
            failure: failure.clone(),
        });
        self.resolve_attempt_failure(seq, at_ms, failure, false);
    }

    fn on_timed_out(&mut self, seq: u64, at_ms: u64, kind: TimeoutKind) {
        let (state, resolved) = match self.invocations.get(&seq) {
            Some(inv) => (inv.state, inv.is_resolved()),
            None => return,
        };
        if resolved || state.is_terminal() || state == ActivityState::Created {
            self.reject_event(
                &Event::ActivityTimedOut { seq, at_ms, kind },
                "no outstanding attempt to time out",
            );
            return;
        }
        self.record_event(Event::ActivityTimedOut { seq, at_ms, kind });
        let forced_stop = kind == TimeoutKind::ScheduleToClose;
        self.resolve_attempt_failure(seq, at_ms, ActivityFailure::timeout(kind), forced_stop);
    }

    /// Shared failure path for application failures and retryable timeouts:
    /// consult the policy evaluator, then either arm a retry backoff or reach
    /// the terminal state.
    fn resolve_attempt_failure(
        &mut self,
        seq: u64,
        at_ms: u64,
        failure: ActivityFailure,
        forced_stop: bool,
    ) {
        let (state, attempt, elapsed, schedule_to_close, policy) = match self.invocations.get(&seq) {
            Some(inv) => (
                inv.state,
                inv.attempt,
                inv.elapsed_since_first_schedule(at_ms),
                inv.options.schedule_to_close_timeout,
                inv.options.retry_policy.clone(),
            ),
            None => return,
        };
        // Once cancellation is being tracked, failures are final.
        let cancel_tracked = state == ActivityState::CancelRequested;
        let decision = if forced_stop || cancel_tracked {
            RetryDecision {
                retry: false,
                delay: Duration::ZERO,
            }
        } else {
            match &policy {
                Some(policy) => policy.decide(attempt, elapsed, schedule_to_close, &failure),
                None => RetryDecision {
                    retry: false,
                    delay: Duration::ZERO,
                },
            }
        };
        if decision.retry {
            self.monitor.disarm_attempt(seq);
            self.arm(
                seq,
                DeadlineKind::RetryBackoff,
                at_ms + decision.delay.as_millis() as u64,
            );
            if let Some(inv) = self.invocations.get_mut(&seq) {
                inv.attempt += 1;
                inv.state = ActivityState::Scheduled;
                inv.backoff_pending = true;
            }
            debug!(
                seq,
                next_attempt = attempt + 1,
                delay_ms = decision.delay.as_millis() as u64,
                "retrying after backoff"
            );
        } else {
            self.monitor.disarm_all(seq);
            let terminal = match &failure {
                ActivityFailure::Timeout { .. } => ActivityState::TimedOut,
                _ => ActivityState::Failed,
            };
            if let Some(inv) = self.invocations.get_mut(&seq) {
                inv.state = terminal;
                inv.resolve(Err(ActivityError::new(failure, attempt)));
            }
            debug!(seq, attempt, state = %terminal, "activity reached terminal failure");
        }
    }

    fn on_heartbeat(&mut self, seq: u64, at_ms: u64) {
        let (state, resolved, heartbeat_timeout) = match self.invocations.get(&seq) {
            Some(inv) => (inv.state, inv.is_resolved(), inv.options.heartbeat_timeout),
            None => return,
        };
        let acceptable = !resolved
            && matches!(state, ActivityState::Started | ActivityState::CancelRequested);
        if !acceptable {
            self.reject_event(
                &Event::ActivityHeartbeat { seq, at_ms },
                "no running attempt to heartbeat",
            );
            return;
        }
        self.record_event(Event::ActivityHeartbeat { seq, at_ms });
        if let Some(inv) = self.invocations.get_mut(&seq) {
            inv.last_heartbeat_at_ms = Some(at_ms);
        }
        // The heartbeat deadline arms on the first heartbeat-carrying event
        // and re-arms on every one after it.
        if let Some(d) = heartbeat_timeout {
            self.arm(
                seq,
                DeadlineKind::Timeout(TimeoutKind::Heartbeat),
                at_ms + d.as_millis() as u64,
            );
        }
    }

    fn on_cancel_requested(&mut self, seq: u64, at_ms: u64, reason: String) {
        let (state, resolved, already_requested, cancellation_type, attempt) =
            match self.invocations.get(&seq) {
                Some(inv) => (
                    inv.state,
                    inv.is_resolved(),
                    inv.cancellation_requested,
                    inv.options.cancellation_type,
                    inv.attempt,
                ),
                None => return,
            };
        if state.is_terminal() || resolved || already_requested {
            self.reject_event(
                &Event::ActivityCancelRequested { seq, at_ms, reason },
                "invocation already terminal or cancel already requested",
            );
            return;
        }
        self.record_event(Event::ActivityCancelRequested {
            seq,
            at_ms,
            reason: reason.clone(),
        });
        self.push_command(Command::CancelActivity { seq });
        match cancellation_type {
            CancellationType::TryCancel => {
                // Resolve immediately; the cancel request stays best-effort.
                self.monitor.disarm_all(seq);
                if let Some(inv) = self.invocations.get_mut(&seq) {
                    inv.cancellation_requested = true;
                    inv.cancel_reason = Some(reason.clone());
                    inv.state = ActivityState::CancelRequested;
                    inv.resolve(Err(ActivityError::new(
                        ActivityFailure::canceled(reason),
                        attempt,
                    )));
                }
                debug!(seq, "cancel requested (try-cancel), result resolved");
            }
            CancellationType::WaitCancellationCompleted => {
                // Stay pending; timeouts still apply, retries do not.
                self.monitor.disarm(seq, DeadlineKind::RetryBackoff);
                if let Some(inv) = self.invocations.get_mut(&seq) {
                    inv.cancellation_requested = true;
                    inv.cancel_reason = Some(reason);
                    inv.state = ActivityState::CancelRequested;
                    inv.backoff_pending = false;
                }
                debug!(seq, "cancel requested, awaiting acknowledgment");
            }
            CancellationType::Abandon => {
                // Request sent, nothing else tracked: the invocation keeps
                // running toward its own timeout or result.
                if let Some(inv) = self.invocations.get_mut(&seq) {
                    inv.cancellation_requested = true;
                    inv.cancel_reason = Some(reason);
                }
                debug!(seq, "cancel requested (abandon), tracking suppressed");
            }
        }
    }

    fn on_cancel_acknowledged(&mut self, seq: u64, at_ms: u64) {
        let (state, resolved, cancellation_type, attempt, reason) = match self.invocations.get(&seq)
        {
            Some(inv) => (
                inv.state,
                inv.is_resolved(),
                inv.options.cancellation_type,
                inv.attempt,
                inv.cancel_reason.clone(),
            ),
            None => return,
        };
        let acceptable = !resolved
            && state == ActivityState::CancelRequested
            && cancellation_type == CancellationType::WaitCancellationCompleted;
        if !acceptable {
            self.reject_event(
                &Event::ActivityCancelAcknowledged { seq, at_ms },
                "no cancel awaiting acknowledgment",
            );
            return;
        }
        self.record_event(Event::ActivityCancelAcknowledged { seq, at_ms });
        self.monitor.disarm_all(seq);
        if let Some(inv) = self.invocations.get_mut(&seq) {
            inv.state = ActivityState::Canceled;
            inv.resolve(Err(ActivityError::new(
                ActivityFailure::canceled(reason.unwrap_or_else(|| "canceled".to_string())),
                attempt,
            )));
        }
        debug!(seq, "cancellation acknowledged");
    }

    // ------------------------------------------------------------------
    // Virtual time
    // ------------------------------------------------------------------

    /// Advance logical time, firing every armed deadline due on the way, one
    /// at a time in deterministic order. Replay advances the clock only; the
    /// recorded history carries the timeout events.
    pub(crate) fn advance_to(&mut self, at_ms: u64) {
        if self.mode == ExecutionMode::Replay {
            self.clock.advance_to(at_ms);
            return;
        }
        while let Some(deadline) = self.monitor.pop_next_due(at_ms) {
            match deadline.kind {
                DeadlineKind::Timeout(kind) => {
                    self.apply_event(Event::ActivityTimedOut {
                        seq: deadline.seq,
                        at_ms: deadline.fire_at_ms,
                        kind,
                    });
                }
                DeadlineKind::RetryBackoff => {
                    self.clock.advance_to(deadline.fire_at_ms);
                    self.start_attempt(deadline.seq);
                }
            }
        }
        self.clock.advance_to(at_ms);
    }

    pub(crate) fn next_deadline(&mut self) -> Option<u64> {
        self.monitor.next_fire_at()
    }

    // ------------------------------------------------------------------
    // Cancellation propagation
    // ------------------------------------------------------------------

    pub(crate) fn cancel_scope(&mut self, scope: ScopeId, reason: &str) {
        if self.mode == ExecutionMode::Replay {
            // Recorded cancel-request events drive replay; marking the tree
            // keeps scope queries consistent.
            self.scopes.cancel(scope);
            return;
        }
        let order = self.scopes.cancel(scope);
        let now = self.now_ms();
        for seq in order {
            let skip = match self.invocations.get(&seq) {
                Some(inv) => {
                    inv.state.is_terminal() || inv.is_resolved() || inv.cancellation_requested
                }
                None => true,
            };
            if skip {
                continue;
            }
            self.apply_event(Event::ActivityCancelRequested {
                seq,
                at_ms: now,
                reason: reason.to_string(),
            });
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub(crate) fn invocation_info(&self, seq: u64) -> Option<InvocationInfo> {
        self.invocations.get(&seq).map(|inv| inv.info())
    }

    pub(crate) fn history(&self) -> Vec<Event> {
        self.history.clone()
    }

    pub(crate) fn commands(&self) -> Vec<Command> {
        self.commands.clone()
    }
}

/// Handle to one workflow execution's invocation core. Clones share the same
/// underlying single-threaded state.
#[derive(Clone)]
pub struct WorkflowCore {
    inner: Arc<Mutex<CoreInner>>,
}

impl Default for WorkflowCore {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowCore {
    /// Live core with no transport attached; commands accumulate in the
    /// queryable log only.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(CoreInner::new(ExecutionMode::Live, Vec::new(), None))),
        }
    }

    /// Live core forwarding every command to `sink`.
    pub fn with_sink(sink: Box<dyn CommandSink>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CoreInner::new(
                ExecutionMode::Live,
                Vec::new(),
                Some(sink),
            ))),
        }
    }

    /// Replay core correlating against `recorded` history. Use a
    /// [`ReplayCorrelator`](crate::ReplayCorrelator) to drive it.
    pub fn for_replay(recorded: Vec<Event>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CoreInner::new(
                ExecutionMode::Replay,
                recorded,
                None,
            ))),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, CoreInner> {
        self.inner.lock().unwrap()
    }

    pub fn mode(&self) -> ExecutionMode {
        self.lock().mode
    }

    /// Schedule an activity in the root scope.
    pub fn schedule_activity(
        &self,
        activity_type: &str,
        input: &str,
        options: ActivityOptions,
    ) -> ActivityHandle {
        self.schedule_activity_in(ROOT_SCOPE, activity_type, input, options)
    }

    /// Schedule an activity registered with `scope`.
    pub fn schedule_activity_in(
        &self,
        scope: ScopeId,
        activity_type: &str,
        input: &str,
        options: ActivityOptions,
    ) -> ActivityHandle {
        let seq = self
            .lock()
            .schedule_activity(scope, activity_type, input, options);
        ActivityHandle::new(self.clone(), seq)
    }

    pub fn open_scope(&self) -> ScopeId {
        self.open_child_scope(ROOT_SCOPE)
    }

    pub fn open_child_scope(&self, parent: ScopeId) -> ScopeId {
        self.lock().scopes.open(parent)
    }

    /// Cancel a scope: recursively marks descendants and signals every
    /// registered invocation, parent before children, registration order
    /// among siblings.
    pub fn cancel_scope(&self, scope: ScopeId, reason: &str) {
        self.lock().cancel_scope(scope, reason)
    }

    /// Deliver one inbound event. Logical time first advances to the event's
    /// timestamp, firing any deadline due before it.
    pub fn deliver(&self, event: Event) {
        let mut inner = self.lock();
        if inner.mode == ExecutionMode::Replay {
            warn!(event = event.kind_name(), "deliver ignored during replay");
            return;
        }
        inner.advance_to(event.at_ms());
        inner.apply_event(event);
    }

    /// Deliver a start event stamped at the current logical time.
    pub fn start_activity(&self, seq: u64) {
        let mut inner = self.lock();
        let at_ms = inner.now_ms();
        inner.apply_event(Event::ActivityStarted { seq, at_ms });
    }

    /// Deliver a success result stamped at the current logical time.
    pub fn complete_activity(&self, seq: u64, result: impl Into<String>) {
        let mut inner = self.lock();
        let at_ms = inner.now_ms();
        inner.apply_event(Event::ActivityCompleted {
            seq,
            at_ms,
            result: result.into(),
        });
    }

    /// Deliver an application failure stamped at the current logical time.
    pub fn fail_activity(&self, seq: u64, failure: ActivityFailure) {
        let mut inner = self.lock();
        let at_ms = inner.now_ms();
        inner.apply_event(Event::ActivityFailed { seq, at_ms, failure });
    }

    /// Deliver a heartbeat stamped at the current logical time.
    pub fn heartbeat_activity(&self, seq: u64) {
        let mut inner = self.lock();
        let at_ms = inner.now_ms();
        inner.apply_event(Event::ActivityHeartbeat { seq, at_ms });
    }

    /// Deliver a cancel acknowledgment stamped at the current logical time.
    pub fn acknowledge_cancel(&self, seq: u64) {
        let mut inner = self.lock();
        let at_ms = inner.now_ms();
        inner.apply_event(Event::ActivityCancelAcknowledged { seq, at_ms });
    }

    pub fn advance(&self, delta: Duration) {
        let mut inner = self.lock();
        let target = inner.now_ms() + delta.as_millis() as u64;
        inner.advance_to(target);
    }

    pub fn advance_to(&self, at_ms: u64) {
        self.lock().advance_to(at_ms)
    }

    pub fn now_ms(&self) -> u64 {
        self.lock().now_ms()
    }

    /// Earliest armed deadline, if any (live mode).
    pub fn next_deadline(&self) -> Option<u64> {
        self.lock().next_deadline()
    }

    pub fn invocation(&self, seq: u64) -> Option<InvocationInfo> {
        self.lock().invocation_info(seq)
    }

    pub fn scope_cancel_requested(&self, scope: ScopeId) -> bool {
        self.lock().scopes.is_cancel_requested(scope)
    }

    /// The replay log: every applied event in application order.
    pub fn history(&self) -> Vec<Event> {
        self.lock().history()
    }

    /// Every produced command in production order.
    pub fn commands(&self) -> Vec<Command> {
        self.lock().commands()
    }

    /// Commands handed to the live transport. Always zero during replay.
    pub fn live_commands_emitted(&self) -> usize {
        self.lock().emitted_live
    }

    pub fn take_nondeterminism(&self) -> Option<NondeterminismError> {
        self.lock().nondeterminism.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;

    fn options() -> ActivityOptions {
        ActivityOptions::new("default", Duration::from_secs(10))
    }

    #[test]
    fn test_schedule_start_complete_happy_path() {
        let core = WorkflowCore::new();
        let handle = core.schedule_activity("Fetch", "in", options());
        let seq = handle.seq();

        assert_eq!(core.mode(), ExecutionMode::Live);
        assert_eq!(core.invocation(seq).unwrap().state, ActivityState::Scheduled);
        assert_eq!(core.invocation(seq).unwrap().activity_type, "Fetch");
        core.start_activity(seq);
        assert_eq!(core.invocation(seq).unwrap().state, ActivityState::Started);
        core.complete_activity(seq, "out");
        assert_eq!(core.invocation(seq).unwrap().state, ActivityState::Completed);
        assert_eq!(handle.try_result(), Some(Ok("out".to_string())));

        let commands = core.commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].kind_name(), "ScheduleActivity");
        assert_eq!(core.live_commands_emitted(), 1);
    }

    #[test]
    fn test_out_of_order_events_are_dropped_live() {
        let core = WorkflowCore::new();
        let handle = core.schedule_activity("Fetch", "in", options());
        let seq = handle.seq();

        // Completion before a start event does not apply.
        core.complete_activity(seq, "early");
        assert_eq!(core.invocation(seq).unwrap().state, ActivityState::Scheduled);
        assert!(handle.try_result().is_none());

        // Events for unknown invocations do not apply either.
        core.start_activity(999);
        assert_eq!(core.history().len(), 1, "only the schedule event is recorded");
    }

    #[test]
    fn test_duplicate_terminal_events_are_ignored() {
        let core = WorkflowCore::new();
        let handle = core.schedule_activity("Fetch", "in", options());
        let seq = handle.seq();
        core.start_activity(seq);
        core.complete_activity(seq, "first");
        core.complete_activity(seq, "second");
        assert_eq!(handle.try_result(), Some(Ok("first".to_string())));
    }

    #[test]
    fn test_commands_forwarded_to_sink() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let seen = Arc::new(AtomicUsize::new(0));
        let seen_in_sink = seen.clone();
        let core = WorkflowCore::with_sink(Box::new(move |_cmd: &Command| {
            seen_in_sink.fetch_add(1, Ordering::SeqCst);
        }));
        let handle = core.schedule_activity("Fetch", "in", options());
        core.start_activity(handle.seq());
        core.complete_activity(handle.seq(), "ok");
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_attempt_counter_increases_by_one_per_retry() {
        let core = WorkflowCore::new();
        let opts = options().with_retry_policy(
            RetryPolicy::new(5).with_initial_interval(Duration::from_millis(10)),
        );
        let handle = core.schedule_activity("Flaky", "in", opts);
        let seq = handle.seq();
        for expected_attempt in 2..=4u32 {
            core.start_activity(seq);
            core.fail_activity(seq, ActivityFailure::application("E", "boom"));
            assert_eq!(core.invocation(seq).unwrap().attempt, expected_attempt);
            core.advance(Duration::from_secs(1));
        }
    }

    #[test]
    fn test_deliver_fires_due_deadlines_before_the_event() {
        let core = WorkflowCore::new();
        let opts = options().with_schedule_to_start_timeout(Duration::from_millis(100));
        let handle = core.schedule_activity("Late", "in", opts);
        let seq = handle.seq();
        // Start arrives stamped after the schedule-to-start deadline: the
        // timeout wins and the late start is dropped.
        core.deliver(Event::ActivityStarted { seq, at_ms: 200 });
        assert_eq!(core.invocation(seq).unwrap().state, ActivityState::TimedOut);
        let err = handle.try_result().unwrap().unwrap_err();
        assert_eq!(
            err.cause,
            ActivityFailure::timeout(TimeoutKind::ScheduleToStart)
        );
    }
}
