//! Built-in pipeline steps
//!
//! | Step type                | Purpose                                        |
//! |--------------------------|------------------------------------------------|
//! | `LoggingStep`            | log keys (and values) of the Data via tracing  |
//! | `BoundingBoxFilterStep`  | keep boxes by class and minimum probability    |
//! | `RelativeToAbsoluteStep` | scale `[0, 1]` geometry to image pixels        |
//! | `BatchedModelStep`       | run a registered model through a batcher       |
//!
//! The first three are registered by [`register_builtins`]. `BatchedModelStep`
//! needs models, so its [`BatchedModelRunnerFactory`] is registered by the
//! embedding runtime.

mod bbox_filter;
mod logging;
mod model;
mod relative_to_absolute;

pub use bbox_filter::BoundingBoxFilterStep;
pub use logging::{LogContent, LogLevel, LoggingStep};
pub use model::{BatchedModelRunnerFactory, BatchedModelStep, ModelRegistry};
pub use relative_to_absolute::RelativeToAbsoluteStep;

use crate::pipeline::RunnerFactoryRegistry;

/// Register the factories of every model-free built-in step
pub fn register_builtins(registry: &mut RunnerFactoryRegistry) {
    registry
        .register(logging::factory())
        .register(bbox_filter::factory())
        .register(relative_to_absolute::factory());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineStep;

    #[test]
    fn test_builtins_resolve() {
        let registry = RunnerFactoryRegistry::with_builtins();
        assert_eq!(registry.len(), 3);
        for step_type in [
            "LoggingStep",
            "BoundingBoxFilterStep",
            "RelativeToAbsoluteStep",
        ] {
            assert!(registry.resolve(&PipelineStep::new(step_type)).is_ok());
        }
        assert!(registry
            .resolve(&PipelineStep::new("BatchedModelStep"))
            .is_err());
    }
}
