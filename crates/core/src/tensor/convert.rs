//! NDArray converter registry
//!
//! Converters move a tensor between native representations, or between a
//! native representation and the [`SerializedNDArray`] pivot. Resolution
//! order for a requested target `T`:
//!
//! 1. identity - the native object already is a `T`
//! 2. the first registered converter whose `can_convert` matches
//! 3. the pivot route `native -> SerializedNDArray -> T`
//!
//! Anything else is a [`Error::NoConverter`] configuration error.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::{Arc, OnceLock};

use super::{buffer, ndarray_backend, NDArray, SerializedNDArray};
use crate::{Error, Result};

/// Identifies the concrete type a conversion should produce
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct TargetFormat {
    type_id: TypeId,
    name: &'static str,
}

impl TargetFormat {
    /// Target format for native type `T`
    pub fn of<T: Any>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// `TypeId` of the target type
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Fully-qualified name of the target type
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Check whether this target is `T`
    pub fn is<T: Any>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }
}

impl fmt::Debug for TargetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// A pluggable tensor converter
pub trait NDArrayConverter: Send + Sync {
    /// Converter name, used in logs
    fn name(&self) -> &str;

    /// Whether this converter can turn `from` into `target`
    fn can_convert(&self, from: &NDArray, target: &TargetFormat) -> bool;

    /// Perform the conversion; must not mutate the source
    fn convert(&self, from: &NDArray, target: &TargetFormat)
        -> Result<Box<dyn Any + Send + Sync>>;
}

/// Converter built from a typed function `&F -> Result<T>`
pub struct TypedConverter<F, T> {
    name: String,
    func: Box<dyn Fn(&F) -> Result<T> + Send + Sync>,
}

impl<F, T> TypedConverter<F, T> {
    /// Create a converter from `F` to `T`
    pub fn new(
        name: impl Into<String>,
        func: impl Fn(&F) -> Result<T> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            func: Box::new(func),
        }
    }
}

impl<F, T> NDArrayConverter for TypedConverter<F, T>
where
    F: Any + Send + Sync,
    T: Any + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn can_convert(&self, from: &NDArray, target: &TargetFormat) -> bool {
        from.is::<F>() && target.is::<T>()
    }

    fn convert(
        &self,
        from: &NDArray,
        target: &TargetFormat,
    ) -> Result<Box<dyn Any + Send + Sync>> {
        let source = from.downcast_ref::<F>().ok_or_else(|| Error::NoConverter {
            from: from.native_type_name().to_string(),
            to: target.name().to_string(),
        })?;
        Ok(Box::new((self.func)(source)?))
    }
}

/// Ordered collection of tensor converters
///
/// Populated at startup, read-only afterwards.
#[derive(Default)]
pub struct ConverterRegistry {
    converters: Vec<Arc<dyn NDArrayConverter>>,
}

impl ConverterRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the built-in backends
    ///
    /// - `ndarray::ArrayD<{f64, f32, i64, i32, u8}>` to and from the pivot
    /// - [`super::TensorBuffer`] to and from the pivot
    /// - direct `ArrayD<f32>` to `TensorBuffer`
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        ndarray_backend::register(&mut registry);
        buffer::register(&mut registry);
        registry
    }

    /// Shared immutable registry with the built-in backends
    pub fn standard() -> Arc<ConverterRegistry> {
        static STANDARD: OnceLock<Arc<ConverterRegistry>> = OnceLock::new();
        Arc::clone(STANDARD.get_or_init(|| Arc::new(ConverterRegistry::with_builtins())))
    }

    /// Register a converter
    pub fn register(&mut self, converter: impl NDArrayConverter + 'static) -> &mut Self {
        self.register_arc(Arc::new(converter))
    }

    /// Register a shared converter
    pub fn register_arc(&mut self, converter: Arc<dyn NDArrayConverter>) -> &mut Self {
        tracing::debug!(converter = converter.name(), "Registered NDArray converter");
        self.converters.push(converter);
        self
    }

    /// Number of registered converters
    pub fn len(&self) -> usize {
        self.converters.len()
    }

    /// Whether no converter is registered
    pub fn is_empty(&self) -> bool {
        self.converters.is_empty()
    }

    /// Names of registered converters, in registration order
    pub fn converter_names(&self) -> Vec<String> {
        self.converters.iter().map(|c| c.name().to_string()).collect()
    }

    /// First converter able to turn `from` into `target`
    pub fn converter_for(
        &self,
        from: &NDArray,
        target: &TargetFormat,
    ) -> Result<Arc<dyn NDArrayConverter>> {
        self.find(from, target)
            .cloned()
            .ok_or_else(|| Error::NoConverter {
                from: from.native_type_name().to_string(),
                to: target.name().to_string(),
            })
    }

    /// Convert `from` into a `T`
    pub fn convert<T: Any + Clone + Send + Sync>(&self, from: &NDArray) -> Result<T> {
        if let Some(native) = from.downcast_ref::<T>() {
            return Ok(native.clone());
        }

        let target = TargetFormat::of::<T>();
        if let Some(converter) = self.find(from, &target) {
            return downcast::<T>(converter.convert(from, &target)?, &target);
        }

        if !target.is::<SerializedNDArray>() {
            if let Some(pivot) = self.to_pivot(from)? {
                if let Some(native) = pivot.downcast_ref::<T>() {
                    return Ok(native.clone());
                }
                if let Some(converter) = self.find(&pivot, &target) {
                    tracing::trace!(
                        from = from.native_type_name(),
                        to = target.name(),
                        "Converting through SerializedNDArray pivot"
                    );
                    return downcast::<T>(converter.convert(&pivot, &target)?, &target);
                }
            }
        }

        Err(Error::NoConverter {
            from: from.native_type_name().to_string(),
            to: target.name().to_string(),
        })
    }

    fn to_pivot(&self, from: &NDArray) -> Result<Option<NDArray>> {
        if from.is::<SerializedNDArray>() {
            return Ok(Some(from.clone()));
        }
        let pivot = TargetFormat::of::<SerializedNDArray>();
        match self.find(from, &pivot) {
            Some(converter) => {
                let serialized = downcast::<SerializedNDArray>(converter.convert(from, &pivot)?, &pivot)?;
                Ok(Some(NDArray::from_serialized(serialized)))
            }
            None => Ok(None),
        }
    }

    fn find(&self, from: &NDArray, target: &TargetFormat) -> Option<&Arc<dyn NDArrayConverter>> {
        self.converters
            .iter()
            .find(|c| c.can_convert(from, target))
    }
}

fn downcast<T: Any>(value: Box<dyn Any + Send + Sync>, target: &TargetFormat) -> Result<T> {
    value.downcast::<T>().map(|b| *b).map_err(|_| {
        Error::Execution(format!(
            "Converter returned a value that is not a {}",
            target.name()
        ))
    })
}
