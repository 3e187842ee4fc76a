//! Caller-visible invocation handle.
//!
//! The handle is a real `Future` resolved by the single-threaded core at
//! event-delivery points, never a blocking wait on a worker thread. Awaiting
//! it suspends the caller until the invocation reaches a terminal state.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::errors::ActivityError;
use crate::invocation::ActivityState;
use crate::runtime::WorkflowCore;

/// Future-like handle to one activity invocation. Resolves with the success
/// result or the wrapped terminal failure; cancellation of the enclosing
/// scope resolves it according to the invocation's cancellation type.
pub struct ActivityHandle {
    core: WorkflowCore,
    seq: u64,
}

impl ActivityHandle {
    pub(crate) fn new(core: WorkflowCore, seq: u64) -> Self {
        Self { core, seq }
    }

    /// Identity of the invocation this handle tracks.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Current lifecycle state, if the invocation exists.
    pub fn state(&self) -> Option<ActivityState> {
        self.core.invocation(self.seq).map(|info| info.state)
    }

    /// Non-suspending result probe: `Some` once the invocation reached a
    /// terminal result.
    pub fn try_result(&self) -> Option<Result<String, ActivityError>> {
        self.core
            .lock()
            .invocations
            .get(&self.seq)
            .and_then(|inv| inv.result.clone())
    }

    /// Suspend until the terminal result is available.
    pub async fn get(self) -> Result<String, ActivityError> {
        self.await
    }
}

impl Future for ActivityHandle {
    type Output = Result<String, ActivityError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut inner = self.core.lock();
        match inner.invocations.get_mut(&self.seq) {
            Some(inv) => match &inv.result {
                Some(result) => Poll::Ready(result.clone()),
                None => {
                    inv.waker = Some(cx.waker().clone());
                    Poll::Pending
                }
            },
            // Unknown invocation (e.g. a diverged replay): stays pending;
            // the divergence surfaces through the correlator.
            None => Poll::Pending,
        }
    }
}
