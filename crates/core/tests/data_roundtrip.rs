//! Integration tests for the Data envelope and its wire forms

use ndarray::{arr2, ArrayD};
use pipeserve_core::data::{BoundingBox, Image, ImageFormat, List, Point};
use pipeserve_core::tensor::TensorBuffer;
use pipeserve_core::{Data, ElementType, Error, NDArray, SerializedNDArray, ValueType};

fn sample() -> Data {
    let mut inner = Data::new();
    inner.put("depth", 2i64).unwrap();
    inner.put_list("tags", vec!["a".to_string(), "b".to_string()]).unwrap();

    let mut data = Data::new();
    data.put("name", "frame-17").unwrap();
    data.put("count", 3i64).unwrap();
    data.put("score", 0.25f64).unwrap();
    data.put("flag", true).unwrap();
    data.put("raw", vec![0u8, 1, 255]).unwrap();
    data.put(
        "tensor",
        NDArray::from_elements(vec![2, 3], &[1.5f32, -2.0, 0.0, 4.0, 5.5, 6.0]).unwrap(),
    )
    .unwrap();
    data.put(
        "image",
        Image::new(ImageFormat::Gray8, 2, 2, vec![0, 64, 128, 255]).unwrap(),
    )
    .unwrap();
    data.put(
        "box",
        BoundingBox::from_corners(0.1, 0.9, 0.2, 0.8)
            .with_label("person")
            .with_probability(0.75),
    )
    .unwrap();
    data.put("point", Point::new_3d(1.0, 2.0, 3.0).with_label("nose"))
        .unwrap();
    data.put("inner", inner).unwrap();
    data.put_list("nested", vec![Data::singleton("k", 1i64).unwrap()])
        .unwrap();
    data.put("no_points", List::empty(ValueType::Point)).unwrap();
    data.metadata_mut().put("source", "camera-2").unwrap();
    data
}

#[test]
fn test_json_roundtrip() {
    let data = sample();
    let json = data.to_json().unwrap();
    let back = Data::from_json(&json).unwrap();
    assert_eq!(back, data);
    assert_eq!(back.list_type("no_points").unwrap(), ValueType::Point);
    assert_eq!(
        back.metadata().unwrap().get_string("source").unwrap(),
        "camera-2"
    );
}

#[test]
fn test_binary_roundtrip() {
    let data = sample();
    let bytes = data.as_bytes().unwrap();
    let back = Data::from_bytes(&bytes).unwrap();
    assert_eq!(back, data);
    assert_eq!(back.keys().collect::<Vec<_>>(), data.keys().collect::<Vec<_>>());
}

#[test]
fn test_json_and_binary_agree() {
    let data = sample();
    let via_json = Data::from_json(&data.to_json().unwrap()).unwrap();
    let via_both = Data::from_bytes(&via_json.as_bytes().unwrap()).unwrap();
    assert_eq!(via_both, data);
}

#[test]
fn test_type_discipline() {
    let data = sample();
    assert!(matches!(
        data.get_string("count"),
        Err(Error::TypeMismatch {
            expected: ValueType::String,
            actual: ValueType::Int64,
            ..
        })
    ));
    assert!(matches!(data.get_int64("missing"), Err(Error::KeyNotFound(_))));
    assert!(matches!(data.list_type("count"), Err(Error::TypeMismatch { .. })));
}

#[test]
fn test_native_tensor_pivot() {
    let native: ArrayD<f32> = arr2(&[[1.0f32, 2.0], [3.0, 4.0]]).into_dyn();
    let nd = NDArray::new(native.clone());

    let pivot: SerializedNDArray = nd.to_serialized().unwrap();
    assert_eq!(pivot.element_type(), ElementType::Float);
    assert_eq!(pivot.shape(), &[2, 2]);
    assert_eq!(pivot.to_elements::<f32>().unwrap(), vec![1.0, 2.0, 3.0, 4.0]);

    let buffer: TensorBuffer = nd.get().unwrap();
    assert_eq!(buffer.shape(), &[2, 2]);

    let back: ArrayD<f32> = NDArray::from_serialized(pivot).get().unwrap();
    assert_eq!(back, native);

    assert!(matches!(
        nd.get::<String>(),
        Err(Error::NoConverter { .. })
    ));
}

#[test]
fn test_native_tensor_survives_json() {
    let native: ArrayD<f32> = arr2(&[[1.0f32, 2.0], [3.0, 4.0]]).into_dyn();
    let data = Data::singleton("x", NDArray::new(native.clone())).unwrap();

    let back = Data::from_json(&data.to_json().unwrap()).unwrap();
    let restored: ArrayD<f32> = back.get_ndarray("x").unwrap().get().unwrap();
    assert_eq!(restored, native);
}
