//! BoundingBoxFilterStep - keeps the detections a downstream consumer cares about
//!
//! Reads a list of bounding boxes, drops every box whose label is not in
//! `class_names_to_keep` or whose probability is below `min_probability`,
//! and writes the survivors to `output_name` (the input key when unset).
//! Boxes without a label or probability fail the corresponding filter.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::data::{BoundingBox, Data, List};
use crate::pipeline::{
    ConfigRunnerFactory, Context, PipelineStep, PipelineStepRunner, RunnerState, StepConfig,
};
use crate::{Error, Result};

/// Configuration for BoundingBoxFilterStep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBoxFilterStep {
    #[serde(default = "default_input_name")]
    pub input_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_name: Option<String>,
    /// Empty keeps every class
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub class_names_to_keep: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_probability: Option<f64>,
}

fn default_input_name() -> String {
    "bounding_boxes".to_string()
}

impl Default for BoundingBoxFilterStep {
    fn default() -> Self {
        Self {
            input_name: default_input_name(),
            output_name: None,
            class_names_to_keep: Vec::new(),
            min_probability: None,
        }
    }
}

impl StepConfig for BoundingBoxFilterStep {
    const STEP_TYPE: &'static str = "BoundingBoxFilterStep";
}

pub(crate) fn factory() -> ConfigRunnerFactory<BoundingBoxFilterStep> {
    ConfigRunnerFactory::new("bbox-filter", |step, config: BoundingBoxFilterStep| {
        Ok(Arc::new(BoundingBoxFilterRunner::new(step, config)?) as Arc<dyn PipelineStepRunner>)
    })
}

struct BoundingBoxFilterRunner {
    step: PipelineStep,
    input_name: String,
    output_name: String,
    classes: HashSet<String>,
    min_probability: Option<f64>,
    state: RunnerState,
}

impl BoundingBoxFilterRunner {
    fn new(step: &PipelineStep, config: BoundingBoxFilterStep) -> Result<Self> {
        if let Some(p) = config.min_probability {
            if !(0.0..=1.0).contains(&p) {
                return Err(Error::InvalidConfig(format!(
                    "min_probability must be within [0, 1], got {}",
                    p
                )));
            }
        }
        Ok(Self {
            step: step.clone(),
            state: RunnerState::new(step),
            output_name: config
                .output_name
                .unwrap_or_else(|| config.input_name.clone()),
            input_name: config.input_name,
            classes: config.class_names_to_keep.into_iter().collect(),
            min_probability: config.min_probability,
        })
    }

    fn keep(&self, bbox: &BoundingBox) -> bool {
        let class_ok = self.classes.is_empty()
            || bbox.label().map_or(false, |label| self.classes.contains(label));
        let probability_ok = match self.min_probability {
            None => true,
            Some(min) => bbox.probability().map_or(false, |p| p >= min),
        };
        class_ok && probability_ok
    }
}

impl PipelineStepRunner for BoundingBoxFilterRunner {
    fn step(&self) -> &PipelineStep {
        &self.step
    }

    fn exec(&self, _ctx: &Context, mut data: Data) -> Result<Data> {
        self.state.check_open()?;
        let boxes = data.get_list_of::<BoundingBox>(&self.input_name)?;
        let total = boxes.len();
        let kept: Vec<BoundingBox> = boxes.into_iter().filter(|b| self.keep(b)).collect();
        tracing::trace!(
            step = self.step.display_name(),
            kept = kept.len(),
            dropped = total - kept.len(),
            "Filtered bounding boxes"
        );
        data.put(self.output_name.as_str(), List::from_vec(kept))?;
        Ok(data)
    }

    fn close(&self) -> Result<()> {
        self.state.mark_closed();
        Ok(())
    }
}
