//! Row-wise concatenation and splitting of pivot tensors

use crate::tensor::{SerializedNDArray, TensorError};

type TensorResult<T> = std::result::Result<T, TensorError>;

/// Concatenate along the leading dimension
///
/// Every part must share the element type and the trailing shape.
pub fn concat_rows(parts: &[&SerializedNDArray]) -> TensorResult<SerializedNDArray> {
    let first = parts
        .first()
        .ok_or_else(|| TensorError::IncompatibleBatch("nothing to concatenate".to_string()))?;
    let element_type = first.element_type();
    let trailing = trailing_shape(first)?;

    let mut rows: i64 = 0;
    let mut buffer = Vec::with_capacity(parts.iter().map(|p| p.buffer().len()).sum());
    for part in parts {
        if part.element_type() != element_type {
            return Err(TensorError::ElementTypeMismatch {
                expected: element_type,
                actual: part.element_type(),
            });
        }
        if trailing_shape(part)? != trailing {
            return Err(TensorError::IncompatibleBatch(format!(
                "trailing shape {:?} does not match {:?}",
                &part.shape()[1..],
                trailing
            )));
        }
        rows += part.shape()[0];
        buffer.extend_from_slice(part.buffer());
    }

    let mut shape = Vec::with_capacity(trailing.len() + 1);
    shape.push(rows);
    shape.extend_from_slice(trailing);
    SerializedNDArray::new(element_type, shape, buffer)
}

/// Split along the leading dimension into consecutive chunks of `rows`
pub fn split_rows(array: &SerializedNDArray, rows: &[usize]) -> TensorResult<Vec<SerializedNDArray>> {
    let trailing = trailing_shape(array)?;
    let total = array.rows()?;
    let wanted: usize = rows.iter().sum();
    if wanted != total {
        return Err(TensorError::IncompatibleBatch(format!(
            "cannot split {} rows into chunks totalling {}",
            total, wanted
        )));
    }

    let row_bytes = array.row_bytes()?;
    let mut offset = 0;
    rows.iter()
        .map(|&n| {
            let bytes = &array.buffer()[offset..offset + n * row_bytes];
            offset += n * row_bytes;
            let mut shape = Vec::with_capacity(trailing.len() + 1);
            shape.push(n as i64);
            shape.extend_from_slice(trailing);
            SerializedNDArray::new(array.element_type(), shape, bytes.to_vec())
        })
        .collect()
}

fn trailing_shape(array: &SerializedNDArray) -> TensorResult<&[i64]> {
    match array.shape().split_first() {
        Some((_, rest)) => Ok(rest),
        None => Err(TensorError::IncompatibleBatch(
            "scalar tensors cannot be batched".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows_f32(values: &[f32], cols: i64) -> SerializedNDArray {
        SerializedNDArray::from_elements(vec![values.len() as i64 / cols, cols], values).unwrap()
    }

    #[test]
    fn test_concat_then_split() {
        let a = rows_f32(&[1.0, 2.0], 2);
        let b = rows_f32(&[3.0, 4.0, 5.0, 6.0], 2);
        let joined = concat_rows(&[&a, &b]).unwrap();
        assert_eq!(joined.shape(), &[3, 2]);
        assert_eq!(
            joined.to_elements::<f32>().unwrap(),
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]
        );

        let parts = split_rows(&joined, &[1, 2]).unwrap();
        assert_eq!(parts[0], a);
        assert_eq!(parts[1], b);
    }

    #[test]
    fn test_mismatches() {
        let a = rows_f32(&[1.0, 2.0], 2);
        let b = rows_f32(&[1.0, 2.0, 3.0], 3);
        assert!(concat_rows(&[&a, &b]).is_err());

        let c = SerializedNDArray::from_elements(vec![1, 2], &[1i32, 2]).unwrap();
        assert!(matches!(
            concat_rows(&[&a, &c]),
            Err(TensorError::ElementTypeMismatch { .. })
        ));

        let scalar = SerializedNDArray::from_elements(vec![], &[1.0f32]).unwrap();
        assert!(concat_rows(&[&scalar]).is_err());
        assert!(split_rows(&a, &[2]).is_err());
    }
}
