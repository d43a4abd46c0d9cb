//! JSON form of [`Data`]
//!
//! Plain JSON scalars map to STRING, INT64, DOUBLE and BOOLEAN. Every other
//! value type is a JSON object tagged with `@`-prefixed marker keys:
//!
//! ```json
//! {
//!   "name": "resnet",
//!   "count": 3,
//!   "score": 0.5,
//!   "raw": {"@BytesBase64": "AAEC"},
//!   "input": {"@NDArrayType": "FLOAT", "@NDArrayShape": [1, 2], "@NDArrayDataBase64": "AACAPwAAAEA="},
//!   "box": {"@x1": 0.1, "@x2": 0.5, "@y1": 0.2, "@y2": 0.6, "@label": "cat"},
//!   "labels": ["a", "b"],
//!   "none": {"@ListType": "STRING", "@List": []},
//!   "@Metadata": {"trace": "abc"}
//! }
//! ```
//!
//! Doubles are always written with a fractional part so they never read back
//! as INT64. NaN and infinities use `{"@Double": "NaN"}` since JSON numbers
//! cannot hold them.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde_json::{Map, Number, Value as JsonValue};

use super::{BoundingBox, Data, Image, ImageFormat, List, Point, Value, ValueType};
use crate::tensor::{ElementType, NDArray, SerializedNDArray};
use crate::{Error, Result};

pub const METADATA: &str = "@Metadata";
pub const NDARRAY_TYPE: &str = "@NDArrayType";
pub const NDARRAY_SHAPE: &str = "@NDArrayShape";
pub const NDARRAY_DATA: &str = "@NDArrayDataBase64";
pub const BYTES_BASE64: &str = "@BytesBase64";
pub const IMAGE_FORMAT: &str = "@ImageFormat";
pub const IMAGE_WIDTH: &str = "@ImageWidth";
pub const IMAGE_HEIGHT: &str = "@ImageHeight";
pub const IMAGE_DATA: &str = "@ImageData";
pub const BBOX_X1: &str = "@x1";
pub const BBOX_X2: &str = "@x2";
pub const BBOX_Y1: &str = "@y1";
pub const BBOX_Y2: &str = "@y2";
pub const POINT_COORDS: &str = "@coords";
pub const LABEL: &str = "@label";
pub const PROBABILITY: &str = "@probability";
pub const DOUBLE: &str = "@Double";
pub const LIST_TYPE: &str = "@ListType";
pub const LIST: &str = "@List";

impl Data {
    /// Compact JSON string
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.to_json_value()?)?)
    }

    /// Indented JSON string
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_json_value()?)?)
    }

    /// Parse the JSON form
    pub fn from_json(json: &str) -> Result<Self> {
        let value: JsonValue = serde_json::from_str(json)?;
        Self::from_json_value(&value)
    }

    /// Encode as a `serde_json::Value` object
    pub fn to_json_value(&self) -> Result<JsonValue> {
        encode_data(self).map(JsonValue::Object)
    }

    /// Decode from a `serde_json::Value` object
    pub fn from_json_value(value: &JsonValue) -> Result<Self> {
        match value {
            JsonValue::Object(obj) => decode_data(obj),
            other => Err(invalid(format!(
                "Data JSON must be an object, got {}",
                json_kind(other)
            ))),
        }
    }
}

fn invalid(msg: impl Into<String>) -> Error {
    Error::InvalidData(msg.into())
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

fn encode_data(data: &Data) -> Result<Map<String, JsonValue>> {
    let mut obj = Map::with_capacity(data.len() + 1);
    for (key, value) in data.iter() {
        obj.insert(key.to_string(), encode_value(value)?);
    }
    if let Some(meta) = data.metadata() {
        obj.insert(METADATA.to_string(), JsonValue::Object(encode_data(meta)?));
    }
    Ok(obj)
}

fn encode_value(value: &Value) -> Result<JsonValue> {
    let json = match value {
        Value::String(s) => JsonValue::String(s.clone()),
        Value::Int64(i) => JsonValue::from(*i),
        Value::Double(d) => encode_double(*d),
        Value::Boolean(b) => JsonValue::Bool(*b),
        Value::Bytes(b) => single(BYTES_BASE64, JsonValue::String(BASE64.encode(b))),
        Value::NDArray(nd) => encode_ndarray(nd)?,
        Value::Image(img) => {
            let mut obj = Map::new();
            obj.insert(IMAGE_FORMAT.into(), img.format().as_str().into());
            obj.insert(IMAGE_WIDTH.into(), img.width().into());
            obj.insert(IMAGE_HEIGHT.into(), img.height().into());
            obj.insert(IMAGE_DATA.into(), BASE64.encode(img.data()).into());
            JsonValue::Object(obj)
        }
        Value::BoundingBox(bb) => {
            let mut obj = Map::new();
            obj.insert(BBOX_X1.into(), encode_double(bb.x1()));
            obj.insert(BBOX_X2.into(), encode_double(bb.x2()));
            obj.insert(BBOX_Y1.into(), encode_double(bb.y1()));
            obj.insert(BBOX_Y2.into(), encode_double(bb.y2()));
            encode_annotations(&mut obj, bb.label(), bb.probability());
            JsonValue::Object(obj)
        }
        Value::Point(p) => {
            let mut obj = Map::new();
            let coords = p.coords().iter().map(|c| encode_double(*c)).collect();
            obj.insert(POINT_COORDS.into(), JsonValue::Array(coords));
            encode_annotations(&mut obj, p.label(), p.probability());
            JsonValue::Object(obj)
        }
        Value::Data(d) => JsonValue::Object(encode_data(d)?),
        Value::List(list) => encode_list(list)?,
    };
    Ok(json)
}

fn single(key: &str, value: JsonValue) -> JsonValue {
    let mut obj = Map::with_capacity(1);
    obj.insert(key.to_string(), value);
    JsonValue::Object(obj)
}

fn encode_double(d: f64) -> JsonValue {
    match Number::from_f64(d) {
        Some(n) => JsonValue::Number(n),
        None => {
            let name = if d.is_nan() {
                "NaN"
            } else if d > 0.0 {
                "Infinity"
            } else {
                "-Infinity"
            };
            single(DOUBLE, name.into())
        }
    }
}

fn encode_annotations(obj: &mut Map<String, JsonValue>, label: Option<&str>, probability: Option<f64>) {
    if let Some(label) = label {
        obj.insert(LABEL.into(), label.into());
    }
    if let Some(p) = probability {
        obj.insert(PROBABILITY.into(), encode_double(p));
    }
}

fn encode_ndarray(nd: &NDArray) -> Result<JsonValue> {
    let pivot = nd.to_serialized()?;
    let mut obj = Map::new();
    obj.insert(NDARRAY_TYPE.into(), pivot.element_type().as_str().into());
    obj.insert(
        NDARRAY_SHAPE.into(),
        JsonValue::Array(pivot.shape().iter().map(|&d| d.into()).collect()),
    );
    obj.insert(NDARRAY_DATA.into(), BASE64.encode(pivot.buffer()).into());
    Ok(JsonValue::Object(obj))
}

fn encode_list(list: &List) -> Result<JsonValue> {
    if list.is_empty() {
        let mut obj = Map::new();
        obj.insert(LIST_TYPE.into(), list.element_type().as_str().into());
        obj.insert(LIST.into(), JsonValue::Array(Vec::new()));
        return Ok(JsonValue::Object(obj));
    }
    let items = list
        .iter()
        .map(encode_value)
        .collect::<Result<Vec<_>>>()?;
    Ok(JsonValue::Array(items))
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

fn decode_data(obj: &Map<String, JsonValue>) -> Result<Data> {
    let mut data = Data::new();
    for (key, value) in obj {
        if key == METADATA {
            match value {
                JsonValue::Object(meta) => data.set_metadata(decode_data(meta)?),
                other => {
                    return Err(invalid(format!(
                        "{} must be an object, got {}",
                        METADATA,
                        json_kind(other)
                    )))
                }
            }
            continue;
        }
        if key.starts_with(super::RESERVED_PREFIX) {
            return Err(invalid(format!("Unexpected reserved key '{}' in Data", key)));
        }
        let decoded = decode_value(value).map_err(|e| match e {
            Error::InvalidData(msg) => invalid(format!("key '{}': {}", key, msg)),
            other => other,
        })?;
        data.put(key.as_str(), decoded)?;
    }
    Ok(data)
}

fn decode_value(json: &JsonValue) -> Result<Value> {
    match json {
        JsonValue::Null => Err(invalid("null is not a valid value")),
        JsonValue::Bool(b) => Ok(Value::Boolean(*b)),
        JsonValue::String(s) => Ok(Value::String(s.clone())),
        JsonValue::Number(n) => decode_number(n),
        JsonValue::Array(items) => decode_array(items).map(Value::List),
        JsonValue::Object(obj) => decode_object(obj),
    }
}

fn decode_number(n: &Number) -> Result<Value> {
    if let Some(i) = n.as_i64() {
        return Ok(Value::Int64(i));
    }
    if n.is_u64() {
        return Err(invalid(format!("integer {} is out of INT64 range", n)));
    }
    n.as_f64()
        .map(Value::Double)
        .ok_or_else(|| invalid(format!("unsupported number {}", n)))
}

fn decode_object(obj: &Map<String, JsonValue>) -> Result<Value> {
    if obj.contains_key(NDARRAY_TYPE) {
        return decode_ndarray(obj).map(Value::NDArray);
    }
    if obj.contains_key(BYTES_BASE64) {
        expect_keys(obj, &[BYTES_BASE64])?;
        return decode_base64(obj, BYTES_BASE64).map(Value::Bytes);
    }
    if obj.contains_key(IMAGE_FORMAT) {
        return decode_image(obj).map(Value::Image);
    }
    if obj.contains_key(BBOX_X1) {
        return decode_bounding_box(obj).map(Value::BoundingBox);
    }
    if obj.contains_key(POINT_COORDS) {
        return decode_point(obj).map(Value::Point);
    }
    if obj.contains_key(DOUBLE) {
        expect_keys(obj, &[DOUBLE])?;
        return decode_double(&obj[DOUBLE]).map(Value::Double);
    }
    if obj.contains_key(LIST_TYPE) {
        return decode_typed_list(obj).map(Value::List);
    }
    decode_data(obj).map(Value::Data)
}

/// Reject marker objects carrying keys outside `allowed`
fn expect_keys(obj: &Map<String, JsonValue>, allowed: &[&str]) -> Result<()> {
    match obj.keys().find(|k| !allowed.contains(&k.as_str())) {
        Some(extra) => Err(invalid(format!(
            "unexpected key '{}' in {} object",
            extra, allowed[0]
        ))),
        None => Ok(()),
    }
}

fn field<'a>(obj: &'a Map<String, JsonValue>, key: &str) -> Result<&'a JsonValue> {
    obj.get(key)
        .ok_or_else(|| invalid(format!("missing field '{}'", key)))
}

fn str_field<'a>(obj: &'a Map<String, JsonValue>, key: &str) -> Result<&'a str> {
    field(obj, key)?
        .as_str()
        .ok_or_else(|| invalid(format!("field '{}' must be a string", key)))
}

fn u32_field(obj: &Map<String, JsonValue>, key: &str) -> Result<u32> {
    field(obj, key)?
        .as_u64()
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| invalid(format!("field '{}' must be a non-negative 32-bit integer", key)))
}

fn f64_field(obj: &Map<String, JsonValue>, key: &str) -> Result<f64> {
    decode_double(field(obj, key)?).map_err(|_| invalid(format!("field '{}' must be a number", key)))
}

fn decode_double(json: &JsonValue) -> Result<f64> {
    match json {
        JsonValue::Number(n) => n
            .as_f64()
            .ok_or_else(|| invalid(format!("unsupported number {}", n))),
        JsonValue::String(s) => match s.as_str() {
            "NaN" => Ok(f64::NAN),
            "Infinity" => Ok(f64::INFINITY),
            "-Infinity" => Ok(f64::NEG_INFINITY),
            other => Err(invalid(format!("unknown {} value '{}'", DOUBLE, other))),
        },
        JsonValue::Object(obj) if obj.contains_key(DOUBLE) => {
            expect_keys(obj, &[DOUBLE])?;
            decode_double(&obj[DOUBLE])
        }
        other => Err(invalid(format!("expected a number, got {}", json_kind(other)))),
    }
}

fn decode_base64(obj: &Map<String, JsonValue>, key: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(str_field(obj, key)?)
        .map_err(|e| invalid(format!("field '{}' is not valid base64: {}", key, e)))
}

fn decode_annotations(obj: &Map<String, JsonValue>) -> Result<(Option<String>, Option<f64>)> {
    let label = match obj.get(LABEL) {
        Some(_) => Some(str_field(obj, LABEL)?.to_string()),
        None => None,
    };
    let probability = match obj.get(PROBABILITY) {
        Some(_) => Some(f64_field(obj, PROBABILITY)?),
        None => None,
    };
    Ok((label, probability))
}

fn decode_ndarray(obj: &Map<String, JsonValue>) -> Result<NDArray> {
    expect_keys(obj, &[NDARRAY_TYPE, NDARRAY_SHAPE, NDARRAY_DATA])?;
    let element_type = ElementType::parse(str_field(obj, NDARRAY_TYPE)?)?;
    let shape = field(obj, NDARRAY_SHAPE)?
        .as_array()
        .ok_or_else(|| invalid(format!("field '{}' must be an array", NDARRAY_SHAPE)))?
        .iter()
        .map(|d| {
            d.as_i64()
                .ok_or_else(|| invalid(format!("{} entries must be integers", NDARRAY_SHAPE)))
        })
        .collect::<Result<Vec<i64>>>()?;
    let buffer = decode_base64(obj, NDARRAY_DATA)?;
    Ok(NDArray::from_serialized(SerializedNDArray::new(
        element_type,
        shape,
        buffer,
    )?))
}

fn decode_image(obj: &Map<String, JsonValue>) -> Result<Image> {
    expect_keys(obj, &[IMAGE_FORMAT, IMAGE_WIDTH, IMAGE_HEIGHT, IMAGE_DATA])?;
    Image::new(
        ImageFormat::parse(str_field(obj, IMAGE_FORMAT)?)?,
        u32_field(obj, IMAGE_WIDTH)?,
        u32_field(obj, IMAGE_HEIGHT)?,
        decode_base64(obj, IMAGE_DATA)?,
    )
}

fn decode_bounding_box(obj: &Map<String, JsonValue>) -> Result<BoundingBox> {
    expect_keys(obj, &[BBOX_X1, BBOX_X2, BBOX_Y1, BBOX_Y2, LABEL, PROBABILITY])?;
    let mut bb = BoundingBox::from_corners(
        f64_field(obj, BBOX_X1)?,
        f64_field(obj, BBOX_X2)?,
        f64_field(obj, BBOX_Y1)?,
        f64_field(obj, BBOX_Y2)?,
    );
    let (label, probability) = decode_annotations(obj)?;
    if let Some(label) = label {
        bb = bb.with_label(label);
    }
    if let Some(p) = probability {
        bb = bb.with_probability(p);
    }
    Ok(bb)
}

fn decode_point(obj: &Map<String, JsonValue>) -> Result<Point> {
    expect_keys(obj, &[POINT_COORDS, LABEL, PROBABILITY])?;
    let coords = field(obj, POINT_COORDS)?
        .as_array()
        .ok_or_else(|| invalid(format!("field '{}' must be an array", POINT_COORDS)))?
        .iter()
        .map(decode_double)
        .collect::<Result<Vec<f64>>>()?;
    let mut point = Point::from_coords(coords)?;
    let (label, probability) = decode_annotations(obj)?;
    if let Some(label) = label {
        point = point.with_label(label);
    }
    if let Some(p) = probability {
        point = point.with_probability(p);
    }
    Ok(point)
}

fn decode_typed_list(obj: &Map<String, JsonValue>) -> Result<List> {
    expect_keys(obj, &[LIST_TYPE, LIST])?;
    let element_type = ValueType::parse(str_field(obj, LIST_TYPE)?)?;
    let items = match obj.get(LIST) {
        None => Vec::new(),
        Some(JsonValue::Array(items)) => items
            .iter()
            .map(decode_value)
            .collect::<Result<Vec<_>>>()?,
        Some(other) => {
            return Err(invalid(format!(
                "field '{}' must be an array, got {}",
                LIST,
                json_kind(other)
            )))
        }
    };
    List::new(element_type, items)
}

/// Decode a plain JSON array, inferring the element type
///
/// Mixed INT64/DOUBLE arrays are read as DOUBLE. Any other mix fails, as does
/// an empty array (its element type is unknowable).
fn decode_array(items: &[JsonValue]) -> Result<List> {
    if items.is_empty() {
        return Err(invalid(format!(
            "empty JSON array has no element type; use {{\"{}\": ..., \"{}\": []}}",
            LIST_TYPE, LIST
        )));
    }
    let values = items
        .iter()
        .map(decode_value)
        .collect::<Result<Vec<_>>>()?;

    let first = values[0].value_type();
    let homogeneous = values.iter().all(|v| v.value_type() == first);
    if homogeneous {
        return List::new(first, values);
    }

    let numeric = values
        .iter()
        .all(|v| matches!(v, Value::Int64(_) | Value::Double(_)));
    if numeric {
        let promoted = values
            .into_iter()
            .map(|v| match v {
                Value::Int64(i) => Value::Double(i as f64),
                other => other,
            })
            .collect();
        return List::new(ValueType::Double, promoted);
    }

    Err(invalid(format!(
        "list mixes {} with other value types",
        first
    )))
}
