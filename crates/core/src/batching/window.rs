//! Single-use batch window
//!
//! One mutex and one condition variable guard the whole window:
//!
//! ```text
//! Open ──close_for_assembly()──> Closing ──deliver()──> Closed
//! ```
//!
//! Callers `add` while the window is `Open`. The leader closes it, runs the
//! model and delivers one outcome for every slot. Waiters block on the
//! condition variable until `Closed`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::tensor::{NDArray, SerializedNDArray};
use crate::{Error, Result};

/// One caller's contribution to a batch
#[derive(Debug, Clone)]
pub struct Submission {
    /// Named inputs in pivot form
    pub inputs: HashMap<String, SerializedNDArray>,
    /// Leading dimension shared by every input
    pub rows: usize,
}

/// One caller's share of the model outputs
pub type SlotOutputs = HashMap<String, NDArray>;

type Outcome = std::result::Result<Vec<Option<SlotOutputs>>, Arc<Error>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Open,
    Closing,
    Closed,
}

struct WindowState {
    phase: Phase,
    slots: Vec<Submission>,
    outcome: Option<Outcome>,
}

/// Window collecting submissions for one model call
pub struct BatchWindow {
    id: u64,
    capacity: usize,
    opened_at: Instant,
    state: Mutex<WindowState>,
    cond: Condvar,
}

impl BatchWindow {
    pub fn new(id: u64, capacity: usize) -> Self {
        Self {
            id,
            capacity: capacity.max(1),
            opened_at: Instant::now(),
            state: Mutex::new(WindowState {
                phase: Phase::Open,
                slots: Vec::with_capacity(capacity.max(1)),
                outcome: None,
            }),
            cond: Condvar::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of submissions so far
    pub fn len(&self) -> usize {
        self.state.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Join the window; hands the submission back when closed or full
    pub fn add(&self, submission: Submission) -> std::result::Result<usize, Submission> {
        let mut state = self.state.lock();
        if state.phase != Phase::Open || state.slots.len() >= self.capacity {
            return Err(submission);
        }
        state.slots.push(submission);
        let slot = state.slots.len() - 1;
        if state.slots.len() == self.capacity {
            self.cond.notify_all();
        }
        Ok(slot)
    }

    /// Block until the window is full or `deadline` passes
    pub fn wait_until_full(&self, deadline: Instant) {
        let mut state = self.state.lock();
        while state.phase == Phase::Open && state.slots.len() < self.capacity {
            if self.cond.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
    }

    /// Stop accepting submissions and take them; `None` after the first call
    pub fn close_for_assembly(&self) -> Option<Vec<Submission>> {
        let mut state = self.state.lock();
        if state.phase != Phase::Open {
            return None;
        }
        state.phase = Phase::Closing;
        Some(std::mem::take(&mut state.slots))
    }

    /// Publish the outcome and wake every waiter; later calls are ignored
    pub fn deliver(&self, outcome: std::result::Result<Vec<SlotOutputs>, Arc<Error>>) {
        let mut state = self.state.lock();
        if state.phase == Phase::Closed {
            return;
        }
        state.phase = Phase::Closed;
        state.outcome = Some(outcome.map(|outputs| outputs.into_iter().map(Some).collect()));
        self.cond.notify_all();
    }

    pub fn is_delivered(&self) -> bool {
        self.state.lock().phase == Phase::Closed
    }

    /// Block until the outcome for `slot` is delivered
    pub fn wait(&self, slot: usize) -> Result<SlotOutputs> {
        let mut state = self.state.lock();
        loop {
            if let Some(result) = take_result(&mut state, slot) {
                return result;
            }
            self.cond.wait(&mut state);
        }
    }

    /// Like [`BatchWindow::wait`], giving up with [`Error::BatchTimeout`]
    ///
    /// Giving up leaves the window untouched; the slot's result is simply
    /// never collected.
    pub fn wait_timeout(&self, slot: usize, timeout: Duration) -> Result<SlotOutputs> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(result) = take_result(&mut state, slot) {
                return result;
            }
            if self.cond.wait_until(&mut state, deadline).timed_out() {
                return take_result(&mut state, slot).unwrap_or(Err(Error::BatchTimeout));
            }
        }
    }
}

fn take_result(state: &mut WindowState, slot: usize) -> Option<Result<SlotOutputs>> {
    match state.outcome.as_mut()? {
        Ok(results) => Some(
            results
                .get_mut(slot)
                .and_then(Option::take)
                .ok_or_else(|| Error::Execution(format!("no batch result for slot {}", slot))),
        ),
        Err(shared) => Some(Err(Error::BatchFailed(Arc::clone(shared)))),
    }
}
