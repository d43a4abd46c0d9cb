//! Error types for pipeserve core

use std::sync::Arc;

use thiserror::Error;

use crate::data::ValueType;
use crate::tensor::TensorError;

/// Result type alias for pipeserve core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in pipeserve core
#[derive(Debug, Error)]
pub enum Error {
    // =========================================================================
    // Configuration errors
    // =========================================================================
    /// No registered factory is able to run the step
    #[error("No runner factory can run step of type '{step_type}'")]
    NoRunnerFactory {
        /// The `@type` of the unresolvable step
        step_type: String,
    },

    /// Pipeline definition is structurally invalid
    #[error("Invalid pipeline: {0}")]
    InvalidPipeline(String),

    /// Step or runtime configuration is invalid
    #[error("Configuration error: {0}")]
    InvalidConfig(String),

    // =========================================================================
    // Type errors
    // =========================================================================
    /// Key is not present in the Data instance
    #[error("Key not found: '{0}'")]
    KeyNotFound(String),

    /// Key is present but holds a value of another type
    #[error("Type mismatch for key '{key}': expected {expected}, found {actual}")]
    TypeMismatch {
        /// Offending key
        key: String,
        /// Type the accessor asked for
        expected: ValueType,
        /// Type actually stored
        actual: ValueType,
    },

    /// No converter path between two tensor representations
    #[error("No NDArray converter from {from} to {to}")]
    NoConverter {
        /// Native type of the source NDArray
        from: String,
        /// Requested target type
        to: String,
    },

    /// Invalid input data (reserved keys, malformed lists, bad values)
    #[error("Invalid data: {0}")]
    InvalidData(String),

    // =========================================================================
    // Runtime errors
    // =========================================================================
    /// A pipeline step failed while executing
    #[error("Step '{step}' ({step_type}) failed: {source}")]
    StepFailed {
        /// Step or graph node name
        step: String,
        /// Step `@type`
        step_type: String,
        /// Underlying failure
        #[source]
        source: Box<Error>,
    },

    /// General execution error
    #[error("Execution error: {0}")]
    Execution(String),

    /// Shared batched model call failed; every coalesced caller receives the same error
    #[error("Batched inference failed: {0}")]
    BatchFailed(Arc<Error>),

    /// Caller stopped waiting for its batch slot
    #[error("Timed out waiting for batched result")]
    BatchTimeout,

    /// Runner could not acquire a resource at construction
    #[error("Resource error: {0}")]
    Resource(String),

    /// Executor was used after close()
    #[error("Pipeline executor is closed")]
    ExecutorClosed,

    /// Runner was used after close()
    #[error("Runner for step '{0}' is closed")]
    RunnerClosed(String),

    // =========================================================================
    // Codec errors
    // =========================================================================
    /// Wire-format encode/decode error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Tensor error
    #[error("Tensor error: {0}")]
    Tensor(#[from] TensorError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// TOML error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a type mismatch error for `key`
    pub fn type_mismatch(key: impl Into<String>, expected: ValueType, actual: ValueType) -> Self {
        Error::TypeMismatch {
            key: key.into(),
            expected,
            actual,
        }
    }

    /// Wrap this error with the name and type of the step that produced it
    pub fn in_step(self, step: impl Into<String>, step_type: impl Into<String>) -> Self {
        Error::StepFailed {
            step: step.into(),
            step_type: step_type.into(),
            source: Box::new(self),
        }
    }

    /// Innermost error, skipping step context wrappers
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::StepFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(err.to_string())
    }
}
