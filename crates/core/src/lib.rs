//! pipeserve core - typed Data envelope, pipeline dispatch and request batching
//!
//! This crate is the transport-agnostic heart of a model-serving runtime:
//!
//! - [`data`]: the schema-free [`Data`] container, its [`Value`] variants and
//!   their JSON and binary wire forms
//! - [`tensor`]: [`NDArray`], an opaque native tensor that converts to other
//!   representations through the [`SerializedNDArray`] pivot
//! - [`pipeline`]: declarative steps resolved to runners at runtime, driven
//!   through sequence or graph pipelines
//! - [`batching`]: coalescing concurrent single-request model calls into one
//!   batched invocation
//! - [`steps`]: built-in steps
//!
//! Transports (HTTP, gRPC, queues) are callers of [`PipelineExecutor`] and
//! live outside this crate.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use pipeserve_core::{Data, Pipeline, RunnerFactoryRegistry};
//!
//! let pipeline = Pipeline::from_json(
//!     r#"{"@type": "SequencePipeline", "steps": [{"@type": "LoggingStep"}]}"#,
//! )?;
//! let executor = pipeline.executor(Arc::new(RunnerFactoryRegistry::with_builtins()))?;
//!
//! let mut input = Data::new();
//! input.put("greeting", "hello")?;
//! let output = executor.exec(input)?;
//! assert_eq!(output.get_string("greeting")?, "hello");
//! executor.close()?;
//! # Ok::<(), pipeserve_core::Error>(())
//! ```

#![warn(clippy::all)]

pub mod batching;
pub mod config;
pub mod data;
pub mod pipeline;
pub mod steps;
pub mod tensor;

mod error;
pub use error::{Error, Result};

pub use batching::{BatchModel, Batcher};
pub use config::{BatchingConfig, ExecutorConfig, LoggingConfig, RuntimeConfig};
pub use data::{Data, Value, ValueType};
pub use pipeline::{
    Pipeline, PipelineExecutor, PipelineStep, PipelineStepRunner, PipelineStepRunnerFactory,
    RunnerFactoryRegistry,
};
pub use tensor::{ConverterRegistry, ElementType, NDArray, SerializedNDArray};

/// Initialize logging with the default settings
///
/// Honors `RUST_LOG`, falling back to `info`. Fails if a global subscriber
/// is already installed.
pub fn init() -> Result<()> {
    init_with_config(&LoggingConfig::default())
}

/// Initialize logging from a [`LoggingConfig`]
///
/// `RUST_LOG` takes precedence over `config.level`.
pub fn init_with_config(config: &LoggingConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.level));

    let installed = if config.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };
    installed.map_err(|e| Error::Other(format!("failed to install tracing subscriber: {}", e)))?;

    tracing::info!("pipeserve core initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init() {
        // Should not panic, even when another test installed a subscriber
        init().ok();
        init().ok();
    }
}
