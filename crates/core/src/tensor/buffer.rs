//! Heap tensor buffer backend
//!
//! `TensorBuffer` is a minimal native tensor: a contiguous little-endian byte
//! buffer with shape, element type, strides and device placement. Runtime
//! adapters that do not want an `ndarray` dependency can hand this type to
//! an [`NDArray`](super::NDArray) directly.

use ndarray::ArrayD;

use super::convert::{ConverterRegistry, TypedConverter};
use super::{ElementType, SerializedNDArray, TensorError};
use crate::Result;

/// Device types for tensor placement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    /// CPU device
    Cpu,
    /// CUDA GPU with device index
    Cuda(u32),
    /// Metal GPU with device index
    Metal(u32),
}

/// Contiguous tensor buffer with explicit layout metadata
#[derive(Debug, Clone, PartialEq)]
pub struct TensorBuffer {
    /// Little-endian element bytes
    data: Vec<u8>,
    /// Tensor shape
    shape: Vec<usize>,
    /// Element type
    dtype: ElementType,
    /// Strides in elements
    strides: Vec<usize>,
    /// Device placement
    device: DeviceType,
}

impl TensorBuffer {
    /// Create from heap-allocated data
    pub fn from_vec(
        data: Vec<u8>,
        shape: Vec<usize>,
        dtype: ElementType,
    ) -> std::result::Result<Self, TensorError> {
        let expected = shape.iter().product::<usize>() * dtype.size_bytes();
        if data.len() != expected {
            return Err(TensorError::SizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        let strides = Self::compute_strides(&shape);
        Ok(Self {
            data,
            shape,
            dtype,
            strides,
            device: DeviceType::Cpu,
        })
    }

    /// Mark the buffer as resident on another device
    pub fn on_device(mut self, device: DeviceType) -> Self {
        self.device = device;
        self
    }

    /// Get shape
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Get element type
    pub fn dtype(&self) -> ElementType {
        self.dtype
    }

    /// Get strides in elements
    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    /// Get device
    pub fn device(&self) -> DeviceType {
        self.device
    }

    /// Get raw bytes; fails for buffers that are not host-resident
    pub fn as_bytes(&self) -> std::result::Result<&[u8], TensorError> {
        match self.device {
            DeviceType::Cpu => Ok(&self.data),
            other => Err(TensorError::DeviceMemory(format!("{:?}", other))),
        }
    }

    /// Check if tensor is contiguous
    pub fn is_contiguous(&self) -> bool {
        self.strides == Self::compute_strides(&self.shape)
    }

    /// Compute strides for contiguous tensor
    fn compute_strides(shape: &[usize]) -> Vec<usize> {
        let mut strides = vec![1; shape.len()];
        for i in (0..shape.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * shape[i + 1];
        }
        strides
    }
}

fn buffer_to_pivot(buffer: &TensorBuffer) -> Result<SerializedNDArray> {
    if !buffer.is_contiguous() {
        return Err(TensorError::Other("non-contiguous TensorBuffer".to_string()).into());
    }
    let shape = buffer.shape.iter().map(|&d| d as i64).collect();
    Ok(SerializedNDArray::new(
        buffer.dtype,
        shape,
        buffer.as_bytes()?.to_vec(),
    )?)
}

fn pivot_to_buffer(pivot: &SerializedNDArray) -> Result<TensorBuffer> {
    let shape = pivot.shape().iter().map(|&d| d as usize).collect();
    Ok(TensorBuffer::from_vec(
        pivot.buffer().to_vec(),
        shape,
        pivot.element_type(),
    )?)
}

fn f32_array_to_buffer(array: &ArrayD<f32>) -> Result<TensorBuffer> {
    let mut data = Vec::with_capacity(array.len() * 4);
    for v in array.iter() {
        data.extend_from_slice(&v.to_le_bytes());
    }
    Ok(TensorBuffer::from_vec(
        data,
        array.shape().to_vec(),
        ElementType::Float,
    )?)
}

/// Register the `TensorBuffer` converters
pub fn register(registry: &mut ConverterRegistry) {
    registry.register(TypedConverter::new("tensor_buffer->pivot", buffer_to_pivot));
    registry.register(TypedConverter::new("pivot->tensor_buffer", pivot_to_buffer));
    registry.register(TypedConverter::new(
        "ndarray<float>->tensor_buffer",
        f32_array_to_buffer,
    ));
}
