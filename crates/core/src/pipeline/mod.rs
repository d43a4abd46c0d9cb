//! Pipeline definitions and execution
//!
//! - [`PipelineStep`]: declarative configuration of one step
//! - [`PipelineStepRunner`]: the executable side, created by a
//!   [`PipelineStepRunnerFactory`] chosen from a [`RunnerFactoryRegistry`]
//! - [`Pipeline`]: a [`SequencePipeline`] or a [`GraphPipeline`]
//! - [`PipelineExecutor`]: resolves runners and drives Data through them
//!
//! ```json
//! {
//!   "@type": "SequencePipeline",
//!   "steps": [
//!     {"@type": "LoggingStep", "level": "debug"},
//!     {"@type": "BoundingBoxFilterStep", "class_names_to_keep": ["person"]}
//!   ]
//! }
//! ```

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

mod executor;
mod graph;
mod registry;
mod runner;
mod sequence;
mod step;
mod switch;

pub use executor::PipelineExecutor;
pub use graph::{GraphBuilder, GraphNode, GraphPipeline, MergePolicy, NodeRef};
pub use registry::{
    ConfigRunnerFactory, PipelineStepRunnerFactory, RegisteredRunnerFactory, RunnerFactoryRegistry,
};
pub use runner::{Context, PipelineStepRunner, RunnerState};
pub use sequence::SequencePipeline;
pub use step::{PipelineStep, StepConfig};
pub use switch::SwitchFn;

use crate::config::{ConfigFormat, ExecutorConfig};
use crate::Result;

/// A complete pipeline definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "@type")]
pub enum Pipeline {
    #[serde(rename = "SequencePipeline")]
    Sequence(SequencePipeline),
    #[serde(rename = "GraphPipeline")]
    Graph(GraphPipeline),
}

impl Pipeline {
    /// Parse and validate a JSON definition
    pub fn from_json(json: &str) -> Result<Self> {
        Self::parse(json, ConfigFormat::Json)
    }

    /// Parse and validate a YAML definition
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Self::parse(yaml, ConfigFormat::Yaml)
    }

    /// Load a JSON or YAML definition, choosing the format by extension
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let format = ConfigFormat::from_path(path)?;
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text, format)
    }

    fn parse(text: &str, format: ConfigFormat) -> Result<Self> {
        let pipeline: Self = format.parse(text)?;
        pipeline.validate()?;
        Ok(pipeline)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Structural validation; sequences are always valid
    pub fn validate(&self) -> Result<()> {
        match self {
            Pipeline::Sequence(_) => Ok(()),
            Pipeline::Graph(graph) => graph.validate(),
        }
    }

    /// Build an executor with the default [`ExecutorConfig`]
    pub fn executor(&self, registry: Arc<RunnerFactoryRegistry>) -> Result<PipelineExecutor> {
        self.executor_with_config(registry, ExecutorConfig::default())
    }

    pub fn executor_with_config(
        &self,
        registry: Arc<RunnerFactoryRegistry>,
        config: ExecutorConfig,
    ) -> Result<PipelineExecutor> {
        PipelineExecutor::new(self.clone(), registry, config)
    }
}

impl From<SequencePipeline> for Pipeline {
    fn from(p: SequencePipeline) -> Self {
        Pipeline::Sequence(p)
    }
}

impl From<GraphPipeline> for Pipeline {
    fn from(p: GraphPipeline) -> Self {
        Pipeline::Graph(p)
    }
}
