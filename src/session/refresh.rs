#[cfg(test)]
#[path = "refresh_test.rs"]
mod tests;

use std::{collections::VecDeque, future::Future};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::RefreshError;

pub type RefreshOutcome = Result<String, RefreshError>;

/// Single-flight latch around the token refresh call.
///
/// The first caller runs the refresh; callers arriving while it is in flight
/// are queued and released in FIFO order with the same outcome. The latch is
/// released on every exit path, including the refresh future being dropped.
#[derive(Default)]
pub struct RefreshGate {
    state: Mutex<GateState>,
}

#[derive(Default)]
struct GateState {
    in_flight: bool,
    waiters: VecDeque<oneshot::Sender<RefreshOutcome>>,
}

impl RefreshGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_in_flight(&self) -> bool {
        self.state.lock().in_flight
    }

    pub fn queued(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Runs `refresh` unless another refresh is already in flight, in which
    /// case `refresh` is dropped unpolled and the in-flight outcome is
    /// returned instead.
    pub async fn run<F>(&self, refresh: F) -> RefreshOutcome
    where
        F: Future<Output = RefreshOutcome>,
    {
        let waiter = {
            let mut state = self.state.lock();
            if state.in_flight {
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                log::debug!(
                    "Refresh in flight, queued waiter at position {}",
                    state.waiters.len()
                );
                Some(rx)
            } else {
                state.in_flight = true;
                None
            }
        };

        if let Some(rx) = waiter {
            return rx.await.unwrap_or(Err(RefreshError::Abandoned));
        }

        let latch = Latch {
            gate: self,
            released: false,
        };
        let outcome = refresh.await;
        latch.release(outcome.clone());
        outcome
    }

    fn release(&self, outcome: RefreshOutcome) {
        let waiters = {
            let mut state = self.state.lock();
            state.in_flight = false;
            std::mem::take(&mut state.waiters)
        };

        log::debug!(
            "Refresh settled ({}), releasing {} waiters",
            if outcome.is_ok() { "ok" } else { "failed" },
            waiters.len()
        );
        for waiter in waiters {
            // A waiter whose request was dropped has nobody left to notify
            let _ = waiter.send(outcome.clone());
        }
    }
}

struct Latch<'a> {
    gate: &'a RefreshGate,
    released: bool,
}

impl Latch<'_> {
    fn release(mut self, outcome: RefreshOutcome) {
        self.released = true;
        self.gate.release(outcome);
    }
}

impl Drop for Latch<'_> {
    fn drop(&mut self) {
        if !self.released {
            self.gate.release(Err(RefreshError::Abandoned));
        }
    }
}
