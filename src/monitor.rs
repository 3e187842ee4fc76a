//! Virtual-time deadline monitor.
//!
//! Tracks the four timeout deadlines plus the retry-backoff timer per
//! invocation as scheduled virtual-time entries, never as blocking waits.
//! Deadlines due at the same instant pop in a fixed order (kind rank, then
//! invocation identity) so firing order is reproducible.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use crate::errors::TimeoutKind;

/// What a monitor entry fires as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeadlineKind {
    Timeout(TimeoutKind),
    /// Retry delay computed by the policy evaluator; fires the next attempt's
    /// schedule command.
    RetryBackoff,
}

impl DeadlineKind {
    /// Tie-break rank for deadlines due at the same instant. ScheduleToClose
    /// outranks the rest: when the overall deadline and an attempt deadline
    /// coincide, the invocation times out terminally.
    fn rank(&self) -> u8 {
        match self {
            DeadlineKind::Timeout(TimeoutKind::ScheduleToClose) => 0,
            DeadlineKind::Timeout(TimeoutKind::StartToClose) => 1,
            DeadlineKind::Timeout(TimeoutKind::ScheduleToStart) => 2,
            DeadlineKind::Timeout(TimeoutKind::Heartbeat) => 3,
            DeadlineKind::RetryBackoff => 4,
        }
    }

    fn from_rank(rank: u8) -> DeadlineKind {
        match rank {
            0 => DeadlineKind::Timeout(TimeoutKind::ScheduleToClose),
            1 => DeadlineKind::Timeout(TimeoutKind::StartToClose),
            2 => DeadlineKind::Timeout(TimeoutKind::ScheduleToStart),
            3 => DeadlineKind::Timeout(TimeoutKind::Heartbeat),
            _ => DeadlineKind::RetryBackoff,
        }
    }
}

/// A due deadline popped from the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    pub seq: u64,
    pub kind: DeadlineKind,
    pub fire_at_ms: u64,
}

/// Min-ordered deadline queue with lazy removal: `armed` is the source of
/// truth, heap entries that no longer match it are skipped on pop.
#[derive(Debug, Default)]
pub struct DeadlineMonitor {
    armed: HashMap<(u64, DeadlineKind), u64>,
    heap: BinaryHeap<Reverse<(u64, u8, u64)>>,
}

impl DeadlineMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm (or re-arm) a deadline. Re-arming replaces the previous fire time.
    pub fn arm(&mut self, seq: u64, kind: DeadlineKind, fire_at_ms: u64) {
        self.armed.insert((seq, kind), fire_at_ms);
        self.heap.push(Reverse((fire_at_ms, kind.rank(), seq)));
    }

    pub fn disarm(&mut self, seq: u64, kind: DeadlineKind) {
        self.armed.remove(&(seq, kind));
    }

    /// Disarm the per-attempt deadlines (everything except the overall
    /// schedule-to-close deadline, which spans all attempts).
    pub fn disarm_attempt(&mut self, seq: u64) {
        self.disarm(seq, DeadlineKind::Timeout(TimeoutKind::ScheduleToStart));
        self.disarm(seq, DeadlineKind::Timeout(TimeoutKind::StartToClose));
        self.disarm(seq, DeadlineKind::Timeout(TimeoutKind::Heartbeat));
        self.disarm(seq, DeadlineKind::RetryBackoff);
    }

    pub fn disarm_all(&mut self, seq: u64) {
        self.disarm_attempt(seq);
        self.disarm(seq, DeadlineKind::Timeout(TimeoutKind::ScheduleToClose));
    }

    pub fn is_armed(&self, seq: u64, kind: DeadlineKind) -> bool {
        self.armed.contains_key(&(seq, kind))
    }

    /// Earliest armed fire time, if any. Drops stale heap entries as a side
    /// effect.
    pub fn next_fire_at(&mut self) -> Option<u64> {
        while let Some(Reverse((fire_at, rank, seq))) = self.heap.peek().copied() {
            let kind = DeadlineKind::from_rank(rank);
            if self.armed.get(&(seq, kind)) == Some(&fire_at) {
                return Some(fire_at);
            }
            self.heap.pop();
        }
        None
    }

    /// Pop the single earliest deadline due at or before `now_ms`, disarming
    /// it. Callers pop one at a time because handling a deadline may disarm
    /// others still sitting in the queue.
    pub fn pop_next_due(&mut self, now_ms: u64) -> Option<Deadline> {
        while let Some(Reverse((fire_at, rank, seq))) = self.heap.peek().copied() {
            if fire_at > now_ms {
                return None;
            }
            self.heap.pop();
            let kind = DeadlineKind::from_rank(rank);
            if self.armed.get(&(seq, kind)) == Some(&fire_at) {
                self.armed.remove(&(seq, kind));
                return Some(Deadline {
                    seq,
                    kind,
                    fire_at_ms: fire_at,
                });
            }
        }
        None
    }
}
