//! Tensor module: opaque native tensors and their canonical pivot form
//!
//! An [`NDArray`] wraps exactly one native tensor object whose concrete type
//! the pipeline layer never needs to know. Every backend moves data through
//! [`SerializedNDArray`], a little-endian `{element type, shape, buffer}`
//! triple, so a new backend only needs a to-pivot and a from-pivot
//! converter (see [`convert`]).

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::Result;

pub mod buffer;
pub mod convert;
pub mod error;
pub mod ndarray_backend;

pub use buffer::{DeviceType, TensorBuffer};
pub use convert::{ConverterRegistry, NDArrayConverter, TargetFormat, TypedConverter};
pub use error::TensorError;

/// Element types supported by the pivot representation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ElementType {
    /// 64-bit floating point
    Double,
    /// 32-bit floating point
    Float,
    /// IEEE 16-bit floating point
    Float16,
    /// bfloat16
    BFloat16,
    /// 64-bit signed integer
    Int64,
    /// 32-bit signed integer
    Int32,
    /// 16-bit signed integer
    Int16,
    /// 8-bit signed integer
    Int8,
    /// 64-bit unsigned integer
    UInt64,
    /// 32-bit unsigned integer
    UInt32,
    /// 16-bit unsigned integer
    UInt16,
    /// 8-bit unsigned integer
    UInt8,
    /// Boolean, one byte per element
    Bool,
}

impl ElementType {
    const ALL: [ElementType; 13] = [
        ElementType::Double,
        ElementType::Float,
        ElementType::Float16,
        ElementType::BFloat16,
        ElementType::Int64,
        ElementType::Int32,
        ElementType::Int16,
        ElementType::Int8,
        ElementType::UInt64,
        ElementType::UInt32,
        ElementType::UInt16,
        ElementType::UInt8,
        ElementType::Bool,
    ];

    /// Get size in bytes for this element type
    pub fn size_bytes(&self) -> usize {
        match self {
            ElementType::Double | ElementType::Int64 | ElementType::UInt64 => 8,
            ElementType::Float | ElementType::Int32 | ElementType::UInt32 => 4,
            ElementType::Float16
            | ElementType::BFloat16
            | ElementType::Int16
            | ElementType::UInt16 => 2,
            ElementType::Int8 | ElementType::UInt8 | ElementType::Bool => 1,
        }
    }

    /// Canonical upper-case name used by the JSON encoding
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementType::Double => "DOUBLE",
            ElementType::Float => "FLOAT",
            ElementType::Float16 => "FLOAT16",
            ElementType::BFloat16 => "BFLOAT16",
            ElementType::Int64 => "INT64",
            ElementType::Int32 => "INT32",
            ElementType::Int16 => "INT16",
            ElementType::Int8 => "INT8",
            ElementType::UInt64 => "UINT64",
            ElementType::UInt32 => "UINT32",
            ElementType::UInt16 => "UINT16",
            ElementType::UInt8 => "UINT8",
            ElementType::Bool => "BOOL",
        }
    }

    /// Parse a canonical name
    pub fn parse(name: &str) -> std::result::Result<Self, TensorError> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == name)
            .ok_or_else(|| TensorError::UnknownElementType(name.to_string()))
    }

    /// One-byte tag used by the binary encoding
    pub fn tag(&self) -> u8 {
        // Position in ALL, stable across versions; append new types at the end.
        Self::ALL.iter().position(|t| t == self).unwrap_or(0) as u8
    }

    /// Inverse of [`ElementType::tag`]
    pub fn from_tag(tag: u8) -> std::result::Result<Self, TensorError> {
        Self::ALL
            .get(tag as usize)
            .copied()
            .ok_or_else(|| TensorError::UnknownElementType(format!("tag {}", tag)))
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rust scalar types with a fixed little-endian pivot encoding
pub trait Element: Copy + Send + Sync + 'static {
    /// Pivot element type of this scalar
    const ELEMENT_TYPE: ElementType;

    /// Append the little-endian bytes of `self`
    fn write_le(self, out: &mut Vec<u8>);

    /// Read one element; `bytes` is exactly `ELEMENT_TYPE.size_bytes()` long
    fn read_le(bytes: &[u8]) -> Self;
}

macro_rules! impl_element {
    ($($t:ty => $et:expr),* $(,)?) => {
        $(
            impl Element for $t {
                const ELEMENT_TYPE: ElementType = $et;

                fn write_le(self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }

                fn read_le(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$t>()];
                    raw.copy_from_slice(bytes);
                    <$t>::from_le_bytes(raw)
                }
            }
        )*
    };
}

impl_element!(
    f64 => ElementType::Double,
    f32 => ElementType::Float,
    i64 => ElementType::Int64,
    i32 => ElementType::Int32,
    i16 => ElementType::Int16,
    i8 => ElementType::Int8,
    u64 => ElementType::UInt64,
    u32 => ElementType::UInt32,
    u16 => ElementType::UInt16,
    u8 => ElementType::UInt8,
);

impl Element for bool {
    const ELEMENT_TYPE: ElementType = ElementType::Bool;

    fn write_le(self, out: &mut Vec<u8>) {
        out.push(self as u8);
    }

    fn read_le(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
}

/// Canonical interchange form of a tensor
///
/// The buffer is row-major and little-endian regardless of host platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SerializedNDArray {
    element_type: ElementType,
    shape: Vec<i64>,
    buffer: Vec<u8>,
}

impl SerializedNDArray {
    /// Create a validated pivot tensor
    pub fn new(
        element_type: ElementType,
        shape: Vec<i64>,
        buffer: Vec<u8>,
    ) -> std::result::Result<Self, TensorError> {
        let count = element_count(&shape)?;
        let expected = count * element_type.size_bytes();
        if buffer.len() != expected {
            return Err(TensorError::SizeMismatch {
                expected,
                actual: buffer.len(),
            });
        }
        Ok(Self {
            element_type,
            shape,
            buffer,
        })
    }

    /// Build a pivot tensor from typed values
    pub fn from_elements<T: Element>(
        shape: Vec<i64>,
        values: &[T],
    ) -> std::result::Result<Self, TensorError> {
        let mut buffer = Vec::with_capacity(values.len() * T::ELEMENT_TYPE.size_bytes());
        for v in values {
            v.write_le(&mut buffer);
        }
        Self::new(T::ELEMENT_TYPE, shape, buffer)
    }

    /// Decode the buffer as typed values
    pub fn to_elements<T: Element>(&self) -> std::result::Result<Vec<T>, TensorError> {
        if self.element_type != T::ELEMENT_TYPE {
            return Err(TensorError::ElementTypeMismatch {
                expected: T::ELEMENT_TYPE,
                actual: self.element_type,
            });
        }
        Ok(self
            .buffer
            .chunks_exact(self.element_type.size_bytes())
            .map(T::read_le)
            .collect())
    }

    /// Element type
    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    /// Shape
    pub fn shape(&self) -> &[i64] {
        &self.shape
    }

    /// Raw little-endian buffer
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Consume into `(element_type, shape, buffer)`
    pub fn into_parts(self) -> (ElementType, Vec<i64>, Vec<u8>) {
        (self.element_type, self.shape, self.buffer)
    }

    /// Number of elements (1 for a scalar)
    pub fn element_count(&self) -> usize {
        self.buffer.len() / self.element_type.size_bytes()
    }

    /// Size of the leading (batch) dimension
    pub fn rows(&self) -> std::result::Result<usize, TensorError> {
        match self.shape.first() {
            Some(&d) => Ok(d as usize),
            None => Err(TensorError::IncompatibleBatch(
                "scalar tensor has no batch dimension".to_string(),
            )),
        }
    }

    /// Bytes occupied by one slice along the leading dimension
    pub fn row_bytes(&self) -> std::result::Result<usize, TensorError> {
        let rows = self.rows()?;
        Ok(if rows == 0 { 0 } else { self.buffer.len() / rows })
    }
}

fn element_count(shape: &[i64]) -> std::result::Result<usize, TensorError> {
    shape.iter().try_fold(1usize, |acc, &d| {
        if d < 0 {
            Err(TensorError::InvalidShape(shape.to_vec()))
        } else {
            acc.checked_mul(d as usize)
                .ok_or_else(|| TensorError::InvalidShape(shape.to_vec()))
        }
    })
}

/// Opaque wrapper around one native tensor object
///
/// Conversions go through the [`ConverterRegistry`] attached at construction.
/// Two NDArrays are equal when their pivot projections are byte-for-byte
/// equal, whatever their native types.
#[derive(Clone)]
pub struct NDArray {
    native: Arc<dyn Any + Send + Sync>,
    native_type: &'static str,
    converters: Arc<ConverterRegistry>,
}

impl NDArray {
    /// Wrap a native tensor using the standard converter registry
    pub fn new<T: Any + Send + Sync>(native: T) -> Self {
        Self::with_registry(native, ConverterRegistry::standard())
    }

    /// Wrap a native tensor with an explicit converter registry
    pub fn with_registry<T: Any + Send + Sync>(
        native: T,
        converters: Arc<ConverterRegistry>,
    ) -> Self {
        Self {
            native: Arc::new(native),
            native_type: std::any::type_name::<T>(),
            converters,
        }
    }

    /// Wrap a pivot tensor
    pub fn from_serialized(serialized: SerializedNDArray) -> Self {
        Self::new(serialized)
    }

    /// Convenience: build a pivot-backed NDArray from typed values
    pub fn from_elements<T: Element>(shape: Vec<i64>, values: &[T]) -> Result<Self> {
        Ok(Self::from_serialized(SerializedNDArray::from_elements(
            shape, values,
        )?))
    }

    /// Re-attach this tensor to another converter registry
    pub fn attach(mut self, converters: Arc<ConverterRegistry>) -> Self {
        self.converters = converters;
        self
    }

    /// Converter registry attached to this tensor
    pub fn registry(&self) -> &Arc<ConverterRegistry> {
        &self.converters
    }

    /// Fully-qualified name of the native type
    pub fn native_type_name(&self) -> &'static str {
        self.native_type
    }

    /// `TypeId` of the native object
    pub fn native_type_id(&self) -> TypeId {
        Any::type_id(self.native.as_ref())
    }

    /// Check whether the native object is a `T`
    pub fn is<T: Any>(&self) -> bool {
        self.native.is::<T>()
    }

    /// Borrow the native object as `T`
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.native.downcast_ref::<T>()
    }

    /// Convert to `T` using the attached registry
    pub fn get<T: Any + Clone + Send + Sync>(&self) -> Result<T> {
        self.converters.convert::<T>(self)
    }

    /// Convert to `T` using an explicit registry
    pub fn convert_with<T: Any + Clone + Send + Sync>(
        &self,
        registry: &ConverterRegistry,
    ) -> Result<T> {
        registry.convert::<T>(self)
    }

    /// Project to the canonical pivot form
    pub fn to_serialized(&self) -> Result<SerializedNDArray> {
        self.get::<SerializedNDArray>()
    }

    /// Shape, via the pivot projection unless the native is already a pivot
    pub fn shape(&self) -> Result<Vec<i64>> {
        match self.downcast_ref::<SerializedNDArray>() {
            Some(s) => Ok(s.shape().to_vec()),
            None => Ok(self.to_serialized()?.shape().to_vec()),
        }
    }

    /// Element type, via the pivot projection unless the native is already a pivot
    pub fn element_type(&self) -> Result<ElementType> {
        match self.downcast_ref::<SerializedNDArray>() {
            Some(s) => Ok(s.element_type()),
            None => Ok(self.to_serialized()?.element_type()),
        }
    }
}

impl PartialEq for NDArray {
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.native, &other.native) {
            return true;
        }
        match (self.to_serialized(), other.to_serialized()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for NDArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("NDArray");
        s.field("native_type", &self.native_type);
        if let Some(pivot) = self.downcast_ref::<SerializedNDArray>() {
            s.field("element_type", &pivot.element_type())
                .field("shape", &pivot.shape());
        }
        s.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr2, ArrayD};

    #[test]
    fn test_element_type_names_roundtrip() {
        for t in ElementType::ALL {
            assert_eq!(ElementType::parse(t.as_str()).unwrap(), t);
            assert_eq!(ElementType::from_tag(t.tag()).unwrap(), t);
        }
        assert!(ElementType::parse("COMPLEX64").is_err());
    }

    #[test]
    fn test_serialized_rejects_bad_sizes() {
        assert!(matches!(
            SerializedNDArray::new(ElementType::Float, vec![2, 2], vec![0u8; 15]),
            Err(TensorError::SizeMismatch { expected: 16, actual: 15 })
        ));
        assert!(matches!(
            SerializedNDArray::new(ElementType::Float, vec![-1], vec![]),
            Err(TensorError::InvalidShape(_))
        ));
    }

    #[test]
    fn test_buffer_is_little_endian() {
        let s = SerializedNDArray::from_elements(vec![1], &[1.0f32]).unwrap();
        assert_eq!(s.buffer(), &[0x00, 0x00, 0x80, 0x3f]);
    }

    #[test]
    fn test_scalar_has_one_element() {
        let s = SerializedNDArray::from_elements(vec![], &[7i64]).unwrap();
        assert_eq!(s.element_count(), 1);
        assert!(s.rows().is_err());
    }

    #[test]
    fn test_equality_across_native_types() {
        let native: ArrayD<f32> = arr2(&[[1.0f32, 2.0], [3.0, 4.0]]).into_dyn();
        let a = NDArray::new(native);
        let b = NDArray::from_elements(vec![2, 2], &[1.0f32, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(a, b);

        let c = NDArray::from_elements(vec![4], &[1.0f32, 2.0, 3.0, 4.0]).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_unconvertible_native_is_never_equal() {
        let a = NDArray::new(String::from("not a tensor"));
        let b = a.clone();
        // Same Arc compares equal without a pivot projection
        assert_eq!(a, b);
        let c = NDArray::new(String::from("not a tensor"));
        assert_ne!(a, c);
    }
}
