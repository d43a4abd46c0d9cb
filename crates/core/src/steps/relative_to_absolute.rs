//! RelativeToAbsoluteStep - scales relative `[0, 1]` geometry to pixels
//!
//! Each key in `to_convert` may hold a bounding box, a point, or a list of
//! either; values are replaced in place using the size of the image stored
//! under `image_name`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::data::{BoundingBox, Data, List, Point, Value, ValueType};
use crate::pipeline::{
    ConfigRunnerFactory, Context, PipelineStep, PipelineStepRunner, RunnerState, StepConfig,
};
use crate::{Error, Result};

/// Configuration for RelativeToAbsoluteStep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelativeToAbsoluteStep {
    #[serde(default = "default_image_name")]
    pub image_name: String,
    pub to_convert: Vec<String>,
}

fn default_image_name() -> String {
    "image".to_string()
}

impl StepConfig for RelativeToAbsoluteStep {
    const STEP_TYPE: &'static str = "RelativeToAbsoluteStep";
}

pub(crate) fn factory() -> ConfigRunnerFactory<RelativeToAbsoluteStep> {
    ConfigRunnerFactory::new("relative-to-absolute", |step, config: RelativeToAbsoluteStep| {
        Ok(Arc::new(RelativeToAbsoluteRunner {
            step: step.clone(),
            state: RunnerState::new(step),
            config,
        }) as Arc<dyn PipelineStepRunner>)
    })
}

struct RelativeToAbsoluteRunner {
    step: PipelineStep,
    config: RelativeToAbsoluteStep,
    state: RunnerState,
}

fn convert(key: &str, value: &Value, width: u32, height: u32) -> Result<Value> {
    match value {
        Value::BoundingBox(b) => Ok(Value::BoundingBox(b.to_absolute(width, height))),
        Value::Point(p) => Ok(Value::Point(p.to_absolute(width, height))),
        Value::List(list) => match list.element_type() {
            ValueType::BoundingBox => Ok(Value::List(List::from_vec(
                list.to_vec::<BoundingBox>()?
                    .iter()
                    .map(|b| b.to_absolute(width, height))
                    .collect(),
            ))),
            ValueType::Point => Ok(Value::List(List::from_vec(
                list.to_vec::<Point>()?
                    .iter()
                    .map(|p| p.to_absolute(width, height))
                    .collect(),
            ))),
            other => Err(Error::InvalidData(format!(
                "'{}' is a list of {}, expected bounding boxes or points",
                key, other
            ))),
        },
        other => Err(Error::InvalidData(format!(
            "'{}' holds a {}, expected a bounding box, a point or a list of them",
            key,
            other.value_type()
        ))),
    }
}

impl PipelineStepRunner for RelativeToAbsoluteRunner {
    fn step(&self) -> &PipelineStep {
        &self.step
    }

    fn exec(&self, _ctx: &Context, mut data: Data) -> Result<Data> {
        self.state.check_open()?;
        let image = data.get_image(&self.config.image_name)?;
        let (width, height) = (image.width(), image.height());
        for key in &self.config.to_convert {
            let converted = convert(key, data.get(key)?, width, height)?;
            data.put(key.as_str(), converted)?;
        }
        Ok(data)
    }

    fn close(&self) -> Result<()> {
        self.state.mark_closed();
        Ok(())
    }
}
