//! Tagged value union carried by [`Data`](super::Data)

use std::fmt;

use super::{BoundingBox, Data, Image, Point};
use crate::tensor::NDArray;
use crate::{Error, Result};

/// Type tag of a [`Value`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// Opaque native tensor
    NDArray,
    /// UTF-8 string
    String,
    /// Raw bytes
    Bytes,
    /// Encoded or raw image
    Image,
    /// Axis-aligned bounding box
    BoundingBox,
    /// N-dimensional point
    Point,
    /// 64-bit signed integer
    Int64,
    /// 64-bit float
    Double,
    /// Boolean
    Boolean,
    /// Nested Data
    Data,
    /// Homogeneous list
    List,
}

impl ValueType {
    const ALL: [ValueType; 11] = [
        ValueType::NDArray,
        ValueType::String,
        ValueType::Bytes,
        ValueType::Image,
        ValueType::BoundingBox,
        ValueType::Point,
        ValueType::Int64,
        ValueType::Double,
        ValueType::Boolean,
        ValueType::Data,
        ValueType::List,
    ];

    /// Canonical upper-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::NDArray => "NDARRAY",
            ValueType::String => "STRING",
            ValueType::Bytes => "BYTES",
            ValueType::Image => "IMAGE",
            ValueType::BoundingBox => "BOUNDING_BOX",
            ValueType::Point => "POINT",
            ValueType::Int64 => "INT64",
            ValueType::Double => "DOUBLE",
            ValueType::Boolean => "BOOLEAN",
            ValueType::Data => "DATA",
            ValueType::List => "LIST",
        }
    }

    /// Parse a canonical name
    pub fn parse(name: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == name)
            .ok_or_else(|| Error::InvalidData(format!("Unknown value type: {}", name)))
    }

    /// One-byte wire tag (1-based; 0 is never a valid tag)
    pub fn tag(&self) -> u8 {
        match self {
            ValueType::NDArray => 1,
            ValueType::String => 2,
            ValueType::Bytes => 3,
            ValueType::Image => 4,
            ValueType::BoundingBox => 5,
            ValueType::Point => 6,
            ValueType::Int64 => 7,
            ValueType::Double => 8,
            ValueType::Boolean => 9,
            ValueType::Data => 10,
            ValueType::List => 11,
        }
    }

    /// Inverse of [`ValueType::tag`]
    pub fn from_tag(tag: u8) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.tag() == tag)
            .ok_or_else(|| Error::Serialization(format!("Unknown value type tag: {}", tag)))
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single typed value
///
/// The variant is authoritative: accessors never coerce between variants.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Opaque native tensor
    NDArray(NDArray),
    /// UTF-8 string
    String(String),
    /// Raw bytes
    Bytes(Vec<u8>),
    /// Image payload
    Image(Image),
    /// Bounding box
    BoundingBox(BoundingBox),
    /// Point
    Point(Point),
    /// 64-bit signed integer
    Int64(i64),
    /// 64-bit float
    Double(f64),
    /// Boolean
    Boolean(bool),
    /// Nested Data
    Data(Data),
    /// Homogeneous list
    List(List),
}

impl Value {
    /// Type tag of this value
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::NDArray(_) => ValueType::NDArray,
            Value::String(_) => ValueType::String,
            Value::Bytes(_) => ValueType::Bytes,
            Value::Image(_) => ValueType::Image,
            Value::BoundingBox(_) => ValueType::BoundingBox,
            Value::Point(_) => ValueType::Point,
            Value::Int64(_) => ValueType::Int64,
            Value::Double(_) => ValueType::Double,
            Value::Boolean(_) => ValueType::Boolean,
            Value::Data(_) => ValueType::Data,
            Value::List(_) => ValueType::List,
        }
    }

    /// Build a list value from typed items
    pub fn list<T: TypedValue>(items: Vec<T>) -> Self {
        Value::List(List::from_vec(items))
    }
}

/// Homogeneous list; every item has the list's element type
#[derive(Debug, Clone, PartialEq)]
pub struct List {
    element_type: ValueType,
    items: Vec<Value>,
}

impl List {
    /// Create a list, checking that every item has `element_type`
    pub fn new(element_type: ValueType, items: Vec<Value>) -> Result<Self> {
        if let Some(bad) = items.iter().find(|v| v.value_type() != element_type) {
            return Err(Error::InvalidData(format!(
                "List of {} cannot hold a {}",
                element_type,
                bad.value_type()
            )));
        }
        Ok(Self {
            element_type,
            items,
        })
    }

    /// Create an empty list
    pub fn empty(element_type: ValueType) -> Self {
        Self {
            element_type,
            items: Vec::new(),
        }
    }

    /// Create a list from typed items
    pub fn from_vec<T: TypedValue>(items: Vec<T>) -> Self {
        Self {
            element_type: T::VALUE_TYPE,
            items: items.into_iter().map(TypedValue::into_value).collect(),
        }
    }

    /// Clone the items out as `T`
    pub fn to_vec<T: TypedValue + Clone>(&self) -> Result<Vec<T>> {
        if self.element_type != T::VALUE_TYPE {
            return Err(Error::InvalidData(format!(
                "List of {} read as list of {}",
                self.element_type,
                T::VALUE_TYPE
            )));
        }
        self.items
            .iter()
            .map(|v| {
                T::from_value(v)
                    .cloned()
                    .ok_or_else(|| Error::InvalidData("List item has wrong type".to_string()))
            })
            .collect()
    }

    /// Append an item of the list's element type
    pub fn push(&mut self, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        if value.value_type() != self.element_type {
            return Err(Error::InvalidData(format!(
                "List of {} cannot hold a {}",
                self.element_type,
                value.value_type()
            )));
        }
        self.items.push(value);
        Ok(())
    }

    /// Element type
    pub fn element_type(&self) -> ValueType {
        self.element_type
    }

    /// Items
    pub fn items(&self) -> &[Value] {
        &self.items
    }

    /// Consume into items
    pub fn into_items(self) -> Vec<Value> {
        self.items
    }

    /// Number of items
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the list is empty
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterate over items
    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.items.iter()
    }
}

/// Rust types with a fixed [`ValueType`]
pub trait TypedValue: Sized {
    /// Tag of the corresponding [`Value`] variant
    const VALUE_TYPE: ValueType;

    /// Wrap into a [`Value`]
    fn into_value(self) -> Value;

    /// Borrow out of a [`Value`] of the matching variant
    fn from_value(value: &Value) -> Option<&Self>;
}

macro_rules! typed_value {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl TypedValue for $t {
                const VALUE_TYPE: ValueType = ValueType::$variant;

                fn into_value(self) -> Value {
                    Value::$variant(self)
                }

                fn from_value(value: &Value) -> Option<&Self> {
                    match value {
                        Value::$variant(v) => Some(v),
                        _ => None,
                    }
                }
            }

            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

typed_value!(
    NDArray => NDArray,
    String => String,
    Vec<u8> => Bytes,
    Image => Image,
    BoundingBox => BoundingBox,
    Point => Point,
    i64 => Int64,
    f64 => Double,
    bool => Boolean,
    Data => Data,
    List => List,
);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int64(v as i64)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Double(v as f64)
    }
}
