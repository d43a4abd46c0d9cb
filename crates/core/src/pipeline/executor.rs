//! Pipeline executor
//!
//! An executor owns the runners of one pipeline and moves through three
//! states:
//!
//! ```text
//! Unresolved ──resolve()──> Resolved ──close()──> Closed
//!      └───────────────────close()──────────────────┘
//! ```
//!
//! Runners are created once, on `resolve()` (eagerly at construction when
//! [`ExecutorConfig::eager_resolve`] is set, otherwise on the first `exec`),
//! and reused for every request until `close()`.

use std::sync::Arc;

use parking_lot::Mutex;

use super::graph::GraphPlan;
use super::{
    Context, GraphPipeline, Pipeline, PipelineStep, PipelineStepRunner, RunnerFactoryRegistry,
    SequencePipeline,
};
use crate::config::ExecutorConfig;
use crate::data::Data;
use crate::{Error, Result};

type Runners = Arc<[Arc<dyn PipelineStepRunner>]>;

enum State {
    Unresolved,
    Resolved(Runners),
    Closed,
}

enum Plan {
    Sequence(SequencePipeline),
    Graph(GraphPipeline, GraphPlan),
}

/// Executes one pipeline; `Send + Sync`, so requests may run concurrently
pub struct PipelineExecutor {
    pipeline: Pipeline,
    plan: Plan,
    registry: Arc<RunnerFactoryRegistry>,
    config: ExecutorConfig,
    state: Mutex<State>,
}

impl PipelineExecutor {
    /// Validate `pipeline` and build an executor over it
    pub fn new(
        pipeline: Pipeline,
        registry: Arc<RunnerFactoryRegistry>,
        config: ExecutorConfig,
    ) -> Result<Self> {
        let plan = match &pipeline {
            Pipeline::Sequence(seq) => Plan::Sequence(seq.clone()),
            Pipeline::Graph(graph) => Plan::Graph(graph.clone(), graph.plan()?),
        };
        let executor = Self {
            pipeline,
            plan,
            registry,
            config,
            state: Mutex::new(State::Unresolved),
        };
        if executor.config.eager_resolve {
            executor.resolve()?;
        }
        Ok(executor)
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Steps in runner order
    fn steps(&self) -> Vec<(&str, &PipelineStep)> {
        match &self.plan {
            Plan::Sequence(seq) => seq
                .steps()
                .iter()
                .map(|step| (step.display_name(), step))
                .collect(),
            Plan::Graph(graph, plan) => graph.steps_in(plan),
        }
    }

    /// Instantiate every runner; no-op when already resolved
    pub fn resolve(&self) -> Result<()> {
        let mut state = self.state.lock();
        self.resolve_locked(&mut state).map(|_| ())
    }

    fn resolve_locked(&self, state: &mut State) -> Result<Runners> {
        match state {
            State::Resolved(runners) => return Ok(Arc::clone(runners)),
            State::Closed => return Err(Error::ExecutorClosed),
            State::Unresolved => {}
        }

        let steps = self.steps();
        let mut runners: Vec<Arc<dyn PipelineStepRunner>> = Vec::with_capacity(steps.len());
        for (name, step) in steps {
            match self.registry.create_runner(step) {
                Ok(runner) => runners.push(runner),
                Err(e) => {
                    // Release what was already acquired before reporting
                    for runner in &runners {
                        if let Err(close_err) = runner.close() {
                            tracing::warn!(
                                step = runner.step().display_name(),
                                error = %close_err,
                                "Failed to close runner after resolution error"
                            );
                        }
                    }
                    return Err(e.in_step(name, step.step_type()));
                }
            }
        }

        tracing::info!(
            pipeline = self.config.name.as_deref().unwrap_or("unnamed"),
            runners = runners.len(),
            "Pipeline resolved"
        );
        let runners: Runners = runners.into();
        *state = State::Resolved(Arc::clone(&runners));
        Ok(runners)
    }

    pub fn is_resolved(&self) -> bool {
        matches!(*self.state.lock(), State::Resolved(_))
    }

    pub fn is_closed(&self) -> bool {
        matches!(*self.state.lock(), State::Closed)
    }

    /// Run one request through the pipeline
    pub fn exec(&self, data: Data) -> Result<Data> {
        let runners = {
            let mut state = self.state.lock();
            self.resolve_locked(&mut state)?
        };
        let ctx = Context::new(self.config.name.as_deref());
        tracing::debug!(request_id = %ctx.request_id(), "Executing pipeline");

        match &self.plan {
            Plan::Sequence(seq) => seq.run(&runners, &ctx, data),
            Plan::Graph(graph, plan) => graph.run(plan, &runners, &ctx, data),
        }
    }

    /// Run one request on tokio's blocking pool
    pub async fn exec_async(self: Arc<Self>, data: Data) -> Result<Data> {
        tokio::task::spawn_blocking(move || self.exec(data))
            .await
            .map_err(|e| Error::Execution(format!("pipeline task failed: {}", e)))?
    }

    /// Close every runner; idempotent
    ///
    /// All runners are closed even if some fail; the first failure is
    /// returned.
    pub fn close(&self) -> Result<()> {
        let previous = std::mem::replace(&mut *self.state.lock(), State::Closed);
        let runners = match previous {
            State::Resolved(runners) => runners,
            State::Unresolved | State::Closed => return Ok(()),
        };

        let mut first_error = None;
        for runner in runners.iter() {
            if let Err(e) = runner.close() {
                tracing::warn!(
                    step = runner.step().display_name(),
                    error = %e,
                    "Runner failed to close"
                );
                first_error.get_or_insert(e);
            }
        }
        tracing::info!(
            pipeline = self.config.name.as_deref().unwrap_or("unnamed"),
            "Pipeline closed"
        );
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for PipelineExecutor {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "Error closing pipeline executor on drop");
        }
    }
}
