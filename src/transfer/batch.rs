//! Batch completion
//!
//! Tracks a bounded set of outstanding operations belonging to one logical
//! transfer and wakes a waiter once the batch reaches a terminal outcome:
//!
//! - **Success**: input exhausted and no operation outstanding, no failure
//! - **Failure**: the first failing status; later ones are ignored
//!
//! The outcome is settled once. After a failure no new slot is handed out,
//! but operations already in flight are still counted back in.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::protocol::Status;

/// Outstanding-counter plus one-shot completion signal
pub struct BatchCompletion {
    state: Mutex<BatchState>,
    settled: Condvar,

    /// Maximum operations outstanding at once
    window: usize,
}

#[derive(Debug, Default)]
struct BatchState {
    outstanding: usize,
    peak: usize,
    completed: usize,
    exhausted: bool,
    first_error: Option<Status>,
    outcome: Option<Status>,
}

impl BatchState {
    fn settle(&mut self, status: Status, signal: &Condvar) {
        if self.outcome.is_none() {
            self.outcome = Some(status);
            signal.notify_all();
        }
    }

    fn settle_if_drained(&mut self, signal: &Condvar) {
        if self.exhausted && self.outstanding == 0 && self.first_error.is_none() {
            self.settle(Status::Success, signal);
        }
    }

    fn record_failure(&mut self, status: Status, signal: &Condvar) {
        if self.first_error.is_none() {
            self.first_error = Some(status);
            self.settle(status, signal);
        }
    }
}

impl BatchCompletion {
    pub fn new(window: usize) -> Self {
        Self {
            state: Mutex::new(BatchState::default()),
            settled: Condvar::new(),
            window,
        }
    }

    /// Reserve a slot for one more operation
    ///
    /// Returns `false` when the window is full, input is exhausted, a failure
    /// has been recorded, or the batch is already settled.
    pub fn try_begin(&self) -> bool {
        let mut state = self.state.lock();
        if state.outcome.is_some()
            || state.first_error.is_some()
            || state.exhausted
            || state.outstanding >= self.window
        {
            return false;
        }
        state.outstanding += 1;
        state.peak = state.peak.max(state.outstanding);
        true
    }

    /// Release a slot whose operation completed with `status`
    pub fn finish(&self, status: Status) {
        let mut state = self.state.lock();
        state.outstanding = state.outstanding.saturating_sub(1);
        state.completed += 1;
        if status.is_success() {
            state.settle_if_drained(&self.settled);
        } else {
            state.record_failure(status, &self.settled);
        }
        self.notify_if_idle(&state);
    }

    /// Release a slot that found no more input
    pub fn release_exhausted(&self) {
        let mut state = self.state.lock();
        state.outstanding = state.outstanding.saturating_sub(1);
        state.exhausted = true;
        state.settle_if_drained(&self.settled);
        self.notify_if_idle(&state);
    }

    /// Release a slot whose operation could not be started
    pub fn release_failed(&self, status: Status) {
        let mut state = self.state.lock();
        state.outstanding = state.outstanding.saturating_sub(1);
        state.record_failure(status, &self.settled);
        self.notify_if_idle(&state);
    }

    /// Block until the batch settles
    pub fn wait(&self) -> Status {
        let mut state = self.state.lock();
        loop {
            if let Some(outcome) = state.outcome {
                return outcome;
            }
            self.settled.wait(&mut state);
        }
    }

    /// Block until the batch settles or `timeout` elapses
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Status> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(outcome) = state.outcome {
                return Some(outcome);
            }
            if self.settled.wait_until(&mut state, deadline).timed_out() {
                return state.outcome;
            }
        }
    }

    /// Block until nothing is outstanding after settling, or `timeout` elapses
    ///
    /// Returns whether the batch fully drained.
    pub fn wait_drained(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if state.outcome.is_some() && state.outstanding == 0 {
                return true;
            }
            if self.settled.wait_until(&mut state, deadline).timed_out() {
                return state.outcome.is_some() && state.outstanding == 0;
            }
        }
    }

    /// Settled outcome, if any
    pub fn outcome(&self) -> Option<Status> {
        self.state.lock().outcome
    }

    pub fn outstanding(&self) -> usize {
        self.state.lock().outstanding
    }

    /// Highest number of operations ever outstanding at once
    pub fn peak_outstanding(&self) -> usize {
        self.state.lock().peak
    }

    /// Operations that completed (successfully or not)
    pub fn completed(&self) -> usize {
        self.state.lock().completed
    }

    pub fn first_error(&self) -> Option<Status> {
        self.state.lock().first_error
    }

    pub fn window(&self) -> usize {
        self.window
    }

    // Wakes `wait_drained` callers once a settled batch has nothing in flight
    fn notify_if_idle(&self, state: &BatchState) {
        if state.outcome.is_some() && state.outstanding == 0 {
            self.settled.notify_all();
        }
    }
}
