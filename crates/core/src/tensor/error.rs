//! Error types for tensor representations and conversions

use thiserror::Error;

use super::ElementType;

/// Tensor layout and conversion errors
#[derive(Debug, Error)]
pub enum TensorError {
    /// Invalid tensor shape (negative dimension or unusable rank)
    #[error("Invalid tensor shape: {0:?}")]
    InvalidShape(Vec<i64>),

    /// Buffer length does not match shape and element type
    #[error("Tensor size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        /// Expected size in bytes
        expected: usize,
        /// Actual size in bytes
        actual: usize,
    },

    /// Element type of the pivot does not match the requested native type
    #[error("Element type mismatch: expected {expected}, found {actual}")]
    ElementTypeMismatch {
        /// Element type required by the target
        expected: ElementType,
        /// Element type carried by the source
        actual: ElementType,
    },

    /// Unknown element type name or tag
    #[error("Unknown element type: {0}")]
    UnknownElementType(String),

    /// Tensor cannot be split or concatenated along the batch axis
    #[error("Incompatible batch: {0}")]
    IncompatibleBatch(String),

    /// Tensor lives in device memory that cannot be read from the host
    #[error("Device memory not host-accessible: {0}")]
    DeviceMemory(String),

    /// Other error
    #[error("Tensor error: {0}")]
    Other(String),
}
