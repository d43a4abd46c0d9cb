//! `ndarray` crate backend
//!
//! Registers `ArrayD<T> <-> SerializedNDArray` converters for the element
//! types model adapters most commonly hand over.

use ndarray::{ArrayD, IxDyn};

use super::convert::{ConverterRegistry, TypedConverter};
use super::{Element, SerializedNDArray, TensorError};
use crate::Result;

/// Project an `ArrayD` to the pivot in logical row-major order
pub fn to_pivot<T: Element>(array: &ArrayD<T>) -> Result<SerializedNDArray> {
    let shape: Vec<i64> = array.shape().iter().map(|&d| d as i64).collect();
    // iter() walks logical order, so non-standard layouts are normalized here
    let values: Vec<T> = array.iter().copied().collect();
    Ok(SerializedNDArray::from_elements(shape, &values)?)
}

/// Rebuild an `ArrayD` from the pivot
pub fn from_pivot<T: Element>(pivot: &SerializedNDArray) -> Result<ArrayD<T>> {
    let values = pivot.to_elements::<T>()?;
    let shape: Vec<usize> = pivot.shape().iter().map(|&d| d as usize).collect();
    ArrayD::from_shape_vec(IxDyn(&shape), values)
        .map_err(|_| TensorError::InvalidShape(pivot.shape().to_vec()).into())
}

fn register_element<T: Element>(registry: &mut ConverterRegistry) {
    let name = T::ELEMENT_TYPE.as_str().to_lowercase();
    registry.register(TypedConverter::new(
        format!("ndarray<{}>->pivot", name),
        to_pivot::<T>,
    ));
    registry.register(TypedConverter::new(
        format!("pivot->ndarray<{}>", name),
        from_pivot::<T>,
    ));
}

/// Register the `ndarray` converters
pub fn register(registry: &mut ConverterRegistry) {
    register_element::<f64>(registry);
    register_element::<f32>(registry);
    register_element::<i64>(registry);
    register_element::<i32>(registry);
    register_element::<u8>(registry);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::ElementType;
    use ndarray::{arr2, Array2};

    #[test]
    fn test_transposed_view_is_normalized() {
        let a: Array2<i32> = arr2(&[[1, 2], [3, 4]]);
        let t = a.t().to_owned().into_dyn();
        let pivot = to_pivot(&t).unwrap();
        assert_eq!(pivot.to_elements::<i32>().unwrap(), vec![1, 3, 2, 4]);
    }

    #[test]
    fn test_from_pivot_checks_element_type() {
        let pivot = SerializedNDArray::from_elements(vec![2], &[1.0f64, 2.0]).unwrap();
        assert!(from_pivot::<f32>(&pivot).is_err());
        let back = from_pivot::<f64>(&pivot).unwrap();
        assert_eq!(back.shape(), &[2]);
    }

    #[test]
    fn test_u8_roundtrip() {
        let a = arr2(&[[0u8, 255], [7, 9]]).into_dyn();
        let pivot = to_pivot(&a).unwrap();
        assert_eq!(pivot.element_type(), ElementType::UInt8);
        assert_eq!(from_pivot::<u8>(&pivot).unwrap(), a);
    }
}
