//! BatchedModelStep - runs a named model through a shared [`Batcher`]
//!
//! The runner reads `input_names` as NDArrays, submits them as one request,
//! and writes the model's `output_names` back into the Data. Concurrent
//! requests through the same executor share the runner's batcher, so they
//! are coalesced into batched model calls.
//!
//! Models are supplied by the embedding runtime through a [`ModelRegistry`];
//! the factory only claims steps naming a model it knows.
//!
//! ```yaml
//! "@type": BatchedModelStep
//! model: detector
//! input_names: [pixels]
//! output_names: [boxes, scores]
//! batching:
//!   max_batch_size: 16
//!   max_wait_ms: 4
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::batching::{BatchModel, Batcher};
use crate::config::BatchingConfig;
use crate::data::Data;
use crate::pipeline::{
    Context, PipelineStep, PipelineStepRunner, PipelineStepRunnerFactory, RunnerState, StepConfig,
};
use crate::{Error, Result};

/// Configuration for BatchedModelStep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchedModelStep {
    /// Name of the model in the [`ModelRegistry`]
    pub model: String,
    pub input_names: Vec<String>,
    pub output_names: Vec<String>,
    /// Overrides the factory's default batching settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batching: Option<BatchingConfig>,
    /// Give up waiting on a batch after this long
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl StepConfig for BatchedModelStep {
    const STEP_TYPE: &'static str = "BatchedModelStep";
}

/// Models available to [`BatchedModelStep`], keyed by name
#[derive(Default, Clone)]
pub struct ModelRegistry {
    models: Arc<RwLock<HashMap<String, Arc<dyn BatchModel>>>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `model` under `name`, replacing any previous model
    pub fn register(&self, name: impl Into<String>, model: Arc<dyn BatchModel>) -> &Self {
        let name = name.into();
        tracing::debug!(model = %name, "Registered batch model");
        self.models.write().insert(name, model);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn BatchModel>> {
        self.models.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.models.read().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.models.read().keys().cloned().collect();
        names.sort();
        names
    }
}

/// Runner factory for [`BatchedModelStep`]
pub struct BatchedModelRunnerFactory {
    models: ModelRegistry,
    defaults: BatchingConfig,
}

impl BatchedModelRunnerFactory {
    pub fn new(models: ModelRegistry) -> Self {
        Self {
            models,
            defaults: BatchingConfig::default(),
        }
    }

    /// Batching settings for steps that do not set their own
    pub fn with_defaults(mut self, defaults: BatchingConfig) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn models(&self) -> &ModelRegistry {
        &self.models
    }
}

impl PipelineStepRunnerFactory for BatchedModelRunnerFactory {
    fn name(&self) -> &str {
        "batched-model"
    }

    fn can_run(&self, step: &PipelineStep) -> bool {
        step.step_type() == BatchedModelStep::STEP_TYPE
            && step
                .param("model")
                .and_then(|m| m.as_str())
                .map_or(false, |m| self.models.contains(m))
    }

    fn create(&self, step: &PipelineStep) -> Result<Arc<dyn PipelineStepRunner>> {
        let config: BatchedModelStep = step.config()?;
        if config.input_names.is_empty() || config.output_names.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "{} '{}' needs at least one input and one output",
                BatchedModelStep::STEP_TYPE,
                step.display_name()
            )));
        }
        let model = self.models.get(&config.model).ok_or_else(|| {
            Error::Resource(format!("model '{}' is not registered", config.model))
        })?;
        let batching = config.batching.clone().unwrap_or_else(|| self.defaults.clone());
        let batcher = Batcher::new(model, batching)?;
        tracing::info!(
            step = step.display_name(),
            model = %config.model,
            max_batch_size = batcher.config().max_batch_size,
            "Created batched model runner"
        );
        Ok(Arc::new(BatchedModelRunner {
            step: step.clone(),
            state: RunnerState::new(step),
            batcher,
            config,
        }))
    }
}

struct BatchedModelRunner {
    step: PipelineStep,
    config: BatchedModelStep,
    batcher: Batcher,
    state: RunnerState,
}

impl PipelineStepRunner for BatchedModelRunner {
    fn step(&self) -> &PipelineStep {
        &self.step
    }

    fn exec(&self, _ctx: &Context, mut data: Data) -> Result<Data> {
        self.state.check_open()?;

        let mut inputs = HashMap::with_capacity(self.config.input_names.len());
        for name in &self.config.input_names {
            inputs.insert(name.clone(), data.get_ndarray(name)?.clone());
        }

        let mut outputs = match self.config.timeout_ms {
            Some(ms) => self.batcher.submit_timeout(inputs, Duration::from_millis(ms))?,
            None => self.batcher.submit(inputs)?,
        };

        for name in &self.config.output_names {
            let output = outputs.remove(name).ok_or_else(|| {
                Error::Execution(format!(
                    "model '{}' produced no output named '{}'",
                    self.config.model, name
                ))
            })?;
            data.put(name.as_str(), output)?;
        }
        Ok(data)
    }

    fn close(&self) -> Result<()> {
        if self.state.mark_closed() {
            tracing::debug!(step = self.step.display_name(), "Closed batched model runner");
        }
        Ok(())
    }
}
