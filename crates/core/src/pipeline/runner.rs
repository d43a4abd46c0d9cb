//! Step runners: the executable side of a [`PipelineStep`]

use std::sync::atomic::{AtomicBool, Ordering};

use uuid::Uuid;

use super::PipelineStep;
use crate::data::Data;
use crate::{Error, Result};

/// Per-request execution context
#[derive(Debug, Clone)]
pub struct Context {
    request_id: Uuid,
    pipeline: Option<String>,
}

impl Context {
    /// Context for a new request with a fresh id
    pub fn new(pipeline: Option<&str>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            pipeline: pipeline.map(str::to_string),
        }
    }

    /// Unique id of this request
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Name of the pipeline being executed, if configured
    pub fn pipeline(&self) -> Option<&str> {
        self.pipeline.as_deref()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Executes one configured step
///
/// Runners are created by a factory at resolution time and owned by exactly
/// one executor. `exec` may be called concurrently from many request threads.
pub trait PipelineStepRunner: Send + Sync {
    /// Configuration this runner was created from
    fn step(&self) -> &PipelineStep;

    /// Transform one Data
    fn exec(&self, ctx: &Context, data: Data) -> Result<Data>;

    /// Release resources; idempotent and valid without a prior `exec`
    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Closed flag shared by runner implementations
///
/// ```
/// use pipeserve_core::pipeline::{PipelineStep, RunnerState};
///
/// let state = RunnerState::new(&PipelineStep::new("MyStep"));
/// assert!(state.check_open().is_ok());
/// assert!(state.mark_closed());
/// assert!(!state.mark_closed());
/// assert!(state.check_open().is_err());
/// ```
#[derive(Debug)]
pub struct RunnerState {
    name: String,
    closed: AtomicBool,
}

impl RunnerState {
    pub fn new(step: &PipelineStep) -> Self {
        Self {
            name: step.display_name().to_string(),
            closed: AtomicBool::new(false),
        }
    }

    /// Fail with [`Error::RunnerClosed`] once closed
    pub fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(Error::RunnerClosed(self.name.clone()))
        } else {
            Ok(())
        }
    }

    /// Mark closed; returns `true` only for the first caller
    pub fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
