//! Wall-clock bridge for live execution.
//!
//! The core itself only understands virtual time. During a live run the
//! encompassing runtime needs deadlines to fire as real time passes and
//! inbound events to be stamped with the current logical time; this driver
//! does both, sleeping until the next armed deadline and re-stamping events
//! posted through its sender. Replay never uses it.

use std::time::Duration;

use tracing::debug;

use crate::runtime::WorkflowCore;
use crate::Event;

/// Drives a live [`WorkflowCore`]'s virtual clock from wall-clock time.
pub struct DeadlineDriver {
    core: WorkflowCore,
    rx: tokio::sync::mpsc::UnboundedReceiver<Event>,
    started: tokio::time::Instant,
}

impl DeadlineDriver {
    /// Spawn the driver task. Events sent through the returned sender are
    /// re-stamped at the driver's current logical time and delivered in
    /// arrival order; dropping the sender stops the driver.
    pub fn start(
        core: WorkflowCore,
    ) -> (
        tokio::task::JoinHandle<()>,
        tokio::sync::mpsc::UnboundedSender<Event>,
    ) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Event>();
        let driver = DeadlineDriver {
            core,
            rx,
            started: tokio::time::Instant::now(),
        };
        let handle = tokio::spawn(driver.run());
        (handle, tx)
    }

    fn wall_now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    async fn run(mut self) {
        loop {
            // Catch the clock up to wall time, firing anything already due.
            let now = self.wall_now_ms();
            self.core.advance_to(now);

            match self.core.next_deadline() {
                Some(fire_at) => {
                    let sleep_ms = fire_at.saturating_sub(now).max(1);
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(sleep_ms)) => {
                            self.core.advance_to(fire_at);
                        }
                        maybe = self.rx.recv() => match maybe {
                            Some(event) => self.deliver_now(event),
                            None => break,
                        },
                    }
                }
                None => match self.rx.recv().await {
                    Some(event) => self.deliver_now(event),
                    None => break,
                },
            }
        }
        debug!("deadline driver stopped");
    }

    fn deliver_now(&self, event: Event) {
        let now = self.wall_now_ms();
        self.core.advance_to(now);
        self.core.deliver(event.with_timestamp(now));
    }
}
