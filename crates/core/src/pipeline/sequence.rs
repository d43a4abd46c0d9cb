//! Linear pipelines

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{Context, PipelineStep, PipelineStepRunner};
use crate::data::Data;
use crate::{Error, Result};

/// Ordered list of steps; each step's output is the next step's input
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SequencePipeline {
    steps: Vec<PipelineStep>,
}

impl SequencePipeline {
    pub fn new(steps: Vec<PipelineStep>) -> Self {
        Self { steps }
    }

    /// Append a step
    pub fn add(mut self, step: PipelineStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn steps(&self) -> &[PipelineStep] {
        &self.steps
    }

    /// Drive `data` through `runners`, which line up with `steps()`
    pub(crate) fn run(
        &self,
        runners: &[Arc<dyn PipelineStepRunner>],
        ctx: &Context,
        mut data: Data,
    ) -> Result<Data> {
        if runners.len() != self.steps.len() {
            return Err(Error::Execution(format!(
                "sequence has {} steps but {} runners",
                self.steps.len(),
                runners.len()
            )));
        }
        for (step, runner) in self.steps.iter().zip(runners) {
            tracing::trace!(
                request_id = %ctx.request_id(),
                step = step.display_name(),
                "Executing step"
            );
            data = runner
                .exec(ctx, data)
                .map_err(|e| e.in_step(step.display_name(), step.step_type()))?;
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_shape() {
        let seq = SequencePipeline::new(vec![PipelineStep::new("A")]).add(PipelineStep::new("B"));
        let json = serde_json::to_string(&seq).unwrap();
        assert_eq!(json, r#"{"steps":[{"@type":"A"},{"@type":"B"}]}"#);
    }

    #[test]
    fn test_runner_count_must_match() {
        let seq = SequencePipeline::new(vec![PipelineStep::new("A")]);
        assert!(seq.run(&[], &Context::default(), Data::new()).is_err());
    }
}
