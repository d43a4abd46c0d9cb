//! Request batching
//!
//! Many threads each submit a small set of named tensors; the [`Batcher`]
//! coalesces concurrent submissions into one [`BatchModel`] call and hands
//! every caller back its own rows of the outputs.
//!
//! The first caller into an open window becomes its leader. The leader waits
//! until the window is full or `max_wait` has passed, closes it, concatenates
//! every input along axis 0, calls the model once, splits the outputs by each
//! caller's row range and wakes everyone. Followers just wait.
//!
//! A failed model call reaches every caller of the window as
//! [`Error::BatchFailed`] sharing one `Arc`, so no caller can miss it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

pub mod tensor_ops;
pub mod window;

pub use window::{BatchWindow, SlotOutputs, Submission};

use crate::config::BatchingConfig;
use crate::tensor::{NDArray, SerializedNDArray};
use crate::{Error, Result};

/// A model that accepts batched inputs
///
/// Inputs and outputs are keyed by name; every tensor's leading dimension is
/// the batch dimension, and every output must have as many rows as the
/// inputs.
pub trait BatchModel: Send + Sync {
    fn batch(&self, inputs: HashMap<String, NDArray>) -> Result<HashMap<String, NDArray>>;
}

impl<F> BatchModel for F
where
    F: Fn(HashMap<String, NDArray>) -> Result<HashMap<String, NDArray>> + Send + Sync,
{
    fn batch(&self, inputs: HashMap<String, NDArray>) -> Result<HashMap<String, NDArray>> {
        self(inputs)
    }
}

/// Coalesces concurrent submissions into batched model calls
pub struct Batcher {
    model: Arc<dyn BatchModel>,
    config: BatchingConfig,
    current: Mutex<Arc<BatchWindow>>,
    next_window: AtomicU64,
}

impl Batcher {
    pub fn new(model: Arc<dyn BatchModel>, config: BatchingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            current: Mutex::new(Arc::new(BatchWindow::new(0, config.max_batch_size))),
            next_window: AtomicU64::new(1),
            model,
            config,
        })
    }

    pub fn config(&self) -> &BatchingConfig {
        &self.config
    }

    /// Submit one request and block until its share of the batch is ready
    pub fn submit(&self, inputs: HashMap<String, NDArray>) -> Result<SlotOutputs> {
        self.submit_inner(inputs, None)
    }

    /// Like [`Batcher::submit`], giving up with [`Error::BatchTimeout`]
    ///
    /// Only a follower can time out; a caller that leads its window runs
    /// the model itself.
    pub fn submit_timeout(
        &self,
        inputs: HashMap<String, NDArray>,
        timeout: Duration,
    ) -> Result<SlotOutputs> {
        self.submit_inner(inputs, Some(timeout))
    }

    fn submit_inner(
        &self,
        inputs: HashMap<String, NDArray>,
        timeout: Option<Duration>,
    ) -> Result<SlotOutputs> {
        let submission = prepare(inputs)?;
        let (window, slot) = self.join(submission);

        if slot == 0 {
            self.lead(&window);
            return window.wait(slot);
        }
        match timeout {
            Some(timeout) => window.wait_timeout(slot, timeout),
            None => window.wait(slot),
        }
    }

    /// Add the submission to the current window, opening a new one if needed
    fn join(&self, submission: Submission) -> (Arc<BatchWindow>, usize) {
        let mut current = self.current.lock();
        let submission = match current.add(submission) {
            Ok(slot) => return (Arc::clone(&current), slot),
            Err(rejected) => rejected,
        };
        let id = self.next_window.fetch_add(1, Ordering::Relaxed);
        let fresh = Arc::new(BatchWindow::new(id, self.config.max_batch_size));
        *current = Arc::clone(&fresh);
        drop(current);
        match fresh.add(submission) {
            Ok(slot) => (fresh, slot),
            // Unreachable for a fresh window of capacity >= 1; treat it as a
            // window of its own so the caller never blocks forever
            Err(submission) => {
                let solo = Arc::new(BatchWindow::new(id, 1));
                let slot = solo.add(submission).unwrap_or(0);
                (solo, slot)
            }
        }
    }

    /// Stop routing new callers to `window`
    fn retire(&self, window: &Arc<BatchWindow>) {
        let mut current = self.current.lock();
        if Arc::ptr_eq(&current, window) {
            let id = self.next_window.fetch_add(1, Ordering::Relaxed);
            *current = Arc::new(BatchWindow::new(id, self.config.max_batch_size));
        }
    }

    fn lead(&self, window: &Arc<BatchWindow>) {
        window.wait_until_full(Instant::now() + self.config.max_wait());
        self.retire(window);
        let Some(slots) = window.close_for_assembly() else {
            return;
        };

        let guard = DeliveryGuard { window };
        let outcome = self.run(window.id(), slots).map_err(Arc::new);
        if let Err(e) = &outcome {
            tracing::warn!(window = window.id(), error = %e, "Batched model call failed");
        }
        window.deliver(outcome);
        std::mem::forget(guard);
    }

    fn run(&self, window_id: u64, slots: Vec<Submission>) -> Result<Vec<SlotOutputs>> {
        let names = check_same_names(&slots)?;
        let rows: Vec<usize> = slots.iter().map(|s| s.rows).collect();
        let total_rows: usize = rows.iter().sum();

        let mut batched = HashMap::with_capacity(names.len());
        for name in &names {
            let parts: Vec<&SerializedNDArray> = slots
                .iter()
                .filter_map(|s| s.inputs.get(name.as_str()))
                .collect();
            let joined = tensor_ops::concat_rows(&parts)
                .map_err(|e| Error::InvalidData(format!("input '{}': {}", name, e)))?;
            batched.insert(name.clone(), NDArray::from_serialized(joined));
        }

        let started = Instant::now();
        let outputs = self.model.batch(batched)?;
        tracing::debug!(
            window = window_id,
            slots = slots.len(),
            rows = total_rows,
            elapsed_us = started.elapsed().as_micros() as u64,
            "Batched model call"
        );

        let mut per_slot: Vec<SlotOutputs> = (0..slots.len()).map(|_| HashMap::new()).collect();
        for (name, output) in outputs {
            let pivot = output.to_serialized()?;
            let output_rows = pivot.rows().map_err(Error::from)?;
            if output_rows != total_rows {
                return Err(Error::Execution(format!(
                    "model output '{}' has {} rows, expected {}",
                    name, output_rows, total_rows
                )));
            }
            let parts = tensor_ops::split_rows(&pivot, &rows)?;
            for (slot, part) in per_slot.iter_mut().zip(parts) {
                slot.insert(name.clone(), NDArray::from_serialized(part));
            }
        }
        Ok(per_slot)
    }
}

/// Fails the window if the leader unwinds before delivering
struct DeliveryGuard<'a> {
    window: &'a BatchWindow,
}

impl Drop for DeliveryGuard<'_> {
    fn drop(&mut self) {
        self.window.deliver(Err(Arc::new(Error::Execution(
            "batch leader aborted before delivering results".to_string(),
        ))));
    }
}

/// Project inputs to pivot form and check they share a leading dimension
fn prepare(inputs: HashMap<String, NDArray>) -> Result<Submission> {
    if inputs.is_empty() {
        return Err(Error::InvalidData("batch submission has no inputs".to_string()));
    }
    let mut rows = None;
    let mut pivots = HashMap::with_capacity(inputs.len());
    for (name, nd) in inputs {
        let pivot = nd.to_serialized()?;
        let r = pivot
            .rows()
            .map_err(|e| Error::InvalidData(format!("input '{}': {}", name, e)))?;
        match rows {
            None => rows = Some(r),
            Some(expected) if expected != r => {
                return Err(Error::InvalidData(format!(
                    "input '{}' has {} rows, other inputs have {}",
                    name, r, expected
                )))
            }
            Some(_) => {}
        }
        pivots.insert(name, pivot);
    }
    Ok(Submission {
        inputs: pivots,
        rows: rows.unwrap_or(0),
    })
}

fn check_same_names(slots: &[Submission]) -> Result<Vec<String>> {
    let mut names: Vec<String> = match slots.first() {
        Some(first) => first.inputs.keys().cloned().collect(),
        None => return Ok(Vec::new()),
    };
    names.sort();
    for slot in &slots[1..] {
        if slot.inputs.len() != names.len() || !names.iter().all(|n| slot.inputs.contains_key(n)) {
            return Err(Error::InvalidData(
                "batched submissions must provide the same input names".to_string(),
            ));
        }
    }
    Ok(names)
}
