//! Data model for pipeline payloads
//!
//! [`Data`] is the envelope every pipeline step consumes and produces: an
//! insertion-ordered map from string keys to typed [`Value`]s, plus an
//! optional nested `Data` used as metadata.
//!
//! - Keys are case-sensitive and unique. Keys starting with `@` are reserved
//!   for the JSON encoding.
//! - Typed getters fail with [`Error::KeyNotFound`] or
//!   [`Error::TypeMismatch`]. Values are never coerced.
//! - `Data` is not internally synchronized. Hand it across threads by move.
//!
//! Wire forms live in [`json`] (`to_json` / `from_json`) and [`binary`]
//! (`as_bytes` / `from_bytes`).

pub mod binary;
pub mod geometry;
pub mod image;
pub mod json;
pub mod value;

pub use geometry::{BoundingBox, Point};
pub use image::{Image, ImageFormat};
pub use value::{List, TypedValue, Value, ValueType};

use crate::tensor::NDArray;
use crate::{Error, Result};

/// Prefix reserved for typed-value markers in the JSON form
pub const RESERVED_PREFIX: char = '@';

/// Typed key/value envelope passed between pipeline steps
#[derive(Debug, Clone, Default)]
pub struct Data {
    entries: Vec<(String, Value)>,
    metadata: Option<Box<Data>>,
}

impl Data {
    /// Create an empty Data
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a Data holding a single key
    pub fn singleton(key: impl Into<String>, value: impl Into<Value>) -> Result<Self> {
        let mut data = Self::new();
        data.put(key, value)?;
        Ok(data)
    }

    fn validate_key(key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(Error::InvalidData("Data keys cannot be empty".to_string()));
        }
        if key.starts_with(RESERVED_PREFIX) {
            return Err(Error::InvalidData(format!(
                "Data key '{}' uses the reserved prefix '{}'",
                key, RESERVED_PREFIX
            )));
        }
        Ok(())
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|(k, _)| k == key)
    }

    /// Insert or replace a value; a replaced key keeps its position
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Result<&mut Self> {
        let key = key.into();
        Self::validate_key(&key)?;
        let value = value.into();
        match self.position(&key) {
            Some(i) => self.entries[i].1 = value,
            None => self.entries.push((key, value)),
        }
        Ok(self)
    }

    /// Insert a list built from typed items
    pub fn put_list<T: TypedValue>(
        &mut self,
        key: impl Into<String>,
        items: Vec<T>,
    ) -> Result<&mut Self> {
        self.put(key, List::from_vec(items))
    }

    /// Value stored under `key`
    pub fn get(&self, key: &str) -> Result<&Value> {
        self.get_opt(key)
            .ok_or_else(|| Error::KeyNotFound(key.to_string()))
    }

    /// Value stored under `key`, if any
    pub fn get_opt(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Type of the value stored under `key`
    pub fn value_type(&self, key: &str) -> Result<ValueType> {
        Ok(self.get(key)?.value_type())
    }

    /// Element type of the list stored under `key`
    pub fn list_type(&self, key: &str) -> Result<ValueType> {
        Ok(self.get_list(key)?.element_type())
    }

    /// Borrow the value under `key` as `T`
    pub fn get_as<T: TypedValue>(&self, key: &str) -> Result<&T> {
        let value = self.get(key)?;
        T::from_value(value)
            .ok_or_else(|| Error::type_mismatch(key, T::VALUE_TYPE, value.value_type()))
    }

    pub fn get_string(&self, key: &str) -> Result<&str> {
        self.get_as::<String>(key).map(String::as_str)
    }

    pub fn get_int64(&self, key: &str) -> Result<i64> {
        self.get_as::<i64>(key).copied()
    }

    pub fn get_double(&self, key: &str) -> Result<f64> {
        self.get_as::<f64>(key).copied()
    }

    pub fn get_boolean(&self, key: &str) -> Result<bool> {
        self.get_as::<bool>(key).copied()
    }

    pub fn get_bytes(&self, key: &str) -> Result<&[u8]> {
        self.get_as::<Vec<u8>>(key).map(Vec::as_slice)
    }

    pub fn get_ndarray(&self, key: &str) -> Result<&NDArray> {
        self.get_as::<NDArray>(key)
    }

    pub fn get_image(&self, key: &str) -> Result<&Image> {
        self.get_as::<Image>(key)
    }

    pub fn get_bounding_box(&self, key: &str) -> Result<&BoundingBox> {
        self.get_as::<BoundingBox>(key)
    }

    pub fn get_point(&self, key: &str) -> Result<&Point> {
        self.get_as::<Point>(key)
    }

    pub fn get_data(&self, key: &str) -> Result<&Data> {
        self.get_as::<Data>(key)
    }

    pub fn get_list(&self, key: &str) -> Result<&List> {
        self.get_as::<List>(key)
    }

    /// Clone the list under `key` out as `Vec<T>`
    pub fn get_list_of<T: TypedValue + Clone>(&self, key: &str) -> Result<Vec<T>> {
        let list = self.get_list(key)?;
        if list.element_type() != T::VALUE_TYPE {
            return Err(Error::type_mismatch(key, T::VALUE_TYPE, list.element_type()));
        }
        list.to_vec()
    }

    /// Whether `key` is present
    pub fn has(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    /// Keys in insertion order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of keys (metadata excluded)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no keys (metadata excluded)
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove `key`, returning its value
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.position(key).map(|i| self.entries.remove(i).1)
    }

    /// Metadata, if set
    pub fn metadata(&self) -> Option<&Data> {
        self.metadata.as_deref()
    }

    /// Mutable metadata, created empty on first access
    pub fn metadata_mut(&mut self) -> &mut Data {
        self.metadata.get_or_insert_with(Default::default)
    }

    /// Replace the metadata
    pub fn set_metadata(&mut self, metadata: Data) {
        self.metadata = Some(Box::new(metadata));
    }

    /// Whether metadata is set
    pub fn has_metadata(&self) -> bool {
        self.metadata.is_some()
    }

    /// Remove and return the metadata
    pub fn take_metadata(&mut self) -> Option<Data> {
        self.metadata.take().map(|m| *m)
    }

    /// Move every entry of `other` into `self`
    ///
    /// A key present on both sides is replaced when `overwrite` is set;
    /// otherwise it must carry an equal value or the merge fails. Metadata is
    /// merged with the same rule. On failure `self` is left unchanged.
    pub fn merge(&mut self, other: Data, overwrite: bool) -> Result<()> {
        let mut merged = self.clone();
        merged.merge_into(other, overwrite)?;
        *self = merged;
        Ok(())
    }

    fn merge_into(&mut self, other: Data, overwrite: bool) -> Result<()> {
        let Data { entries, metadata } = other;
        for (key, value) in entries {
            if !overwrite {
                if let Some(existing) = self.get_opt(&key) {
                    if *existing != value {
                        return Err(Error::InvalidData(format!(
                            "Cannot merge Data: key '{}' present on both sides with different values",
                            key
                        )));
                    }
                    continue;
                }
            }
            self.put(key, value)?;
        }
        if let Some(meta) = metadata {
            self.metadata_mut().merge_into(*meta, overwrite)?;
        }
        Ok(())
    }

    /// Copy the named keys from `other`
    pub fn copy_from(&mut self, other: &Data, keys: &[&str]) -> Result<()> {
        for key in keys {
            let value = other.get(key)?.clone();
            self.put(*key, value)?;
        }
        Ok(())
    }
}

/// Structural equality: same keys with equal values (order-insensitive) and equal metadata
impl PartialEq for Data {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .entries
                .iter()
                .all(|(k, v)| other.get_opt(k).is_some_and(|o| o == v))
            && self.metadata == other.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Data {
        let mut d = Data::new();
        d.put("name", "resnet")
            .unwrap()
            .put("count", 3i64)
            .unwrap()
            .put("score", 0.5f64)
            .unwrap()
            .put("ok", true)
            .unwrap();
        d
    }

    #[test]
    fn test_typed_getters() {
        let d = sample();
        assert_eq!(d.get_string("name").unwrap(), "resnet");
        assert_eq!(d.get_int64("count").unwrap(), 3);
        assert_eq!(d.get_double("score").unwrap(), 0.5);
        assert!(d.get_boolean("ok").unwrap());
    }

    #[test]
    fn test_wrong_accessor_is_type_error() {
        let d = sample();
        match d.get_double("count") {
            Err(Error::TypeMismatch {
                key,
                expected,
                actual,
            }) => {
                assert_eq!(key, "count");
                assert_eq!(expected, ValueType::Double);
                assert_eq!(actual, ValueType::Int64);
            }
            other => panic!("expected type mismatch, got {:?}", other),
        }
        assert!(matches!(d.get_string("ok"), Err(Error::TypeMismatch { .. })));
        assert!(matches!(d.get_int64("missing"), Err(Error::KeyNotFound(_))));
    }

    #[test]
    fn test_keys_are_case_sensitive_and_ordered() {
        let mut d = Data::new();
        d.put("b", 1i64).unwrap();
        d.put("B", 2i64).unwrap();
        d.put("a", 3i64).unwrap();
        d.put("b", 4i64).unwrap();
        assert_eq!(d.keys().collect::<Vec<_>>(), vec!["b", "B", "a"]);
        assert_eq!(d.get_int64("b").unwrap(), 4);
    }

    #[test]
    fn test_reserved_keys_rejected() {
        let mut d = Data::new();
        assert!(d.put("@Metadata", 1i64).is_err());
        assert!(d.put("", 1i64).is_err());
    }

    #[test]
    fn test_list_type_only_for_lists() {
        let mut d = Data::new();
        d.put_list("labels", vec!["a".to_string(), "b".to_string()])
            .unwrap();
        d.put("n", 1i64).unwrap();
        assert_eq!(d.list_type("labels").unwrap(), ValueType::String);
        assert!(matches!(d.list_type("n"), Err(Error::TypeMismatch { .. })));
        assert_eq!(
            d.get_list_of::<String>("labels").unwrap(),
            vec!["a".to_string(), "b".to_string()]
        );
        assert!(d.get_list_of::<i64>("labels").is_err());
    }

    #[test]
    fn test_merge_conflicts() {
        let mut a = Data::singleton("x", 1i64).unwrap();
        let b = Data::singleton("x", 2i64).unwrap();
        assert!(a.clone().merge(b.clone(), false).is_err());
        a.merge(b, true).unwrap();
        assert_eq!(a.get_int64("x").unwrap(), 2);

        let mut c = Data::singleton("x", 2i64).unwrap();
        c.merge(Data::singleton("x", 2i64).unwrap(), false).unwrap();
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn test_failed_merge_leaves_target_untouched() {
        let mut target = Data::singleton("b", 1i64).unwrap();
        target.metadata_mut().put("origin", "left").unwrap();
        let before = target.clone();

        let mut other = Data::new();
        other.put("a", "fresh").unwrap().put("b", 2i64).unwrap();
        assert!(target.merge(other, false).is_err());
        assert_eq!(target, before);
        assert!(!target.has("a"));

        let mut other = Data::singleton("c", true).unwrap();
        other.metadata_mut().put("origin", "right").unwrap();
        assert!(target.merge(other, false).is_err());
        assert_eq!(target, before);
        assert!(!target.has("c"));
    }

    #[test]
    fn test_metadata_participates_in_equality() {
        let mut a = sample();
        let b = sample();
        assert_eq!(a, b);
        a.metadata_mut().put("trace", "abc").unwrap();
        assert_ne!(a, b);
        assert_eq!(a.metadata().unwrap().get_string("trace").unwrap(), "abc");
    }

    #[test]
    fn test_copy_from_and_remove() {
        let src = sample();
        let mut dst = Data::new();
        dst.copy_from(&src, &["name", "ok"]).unwrap();
        assert_eq!(dst.len(), 2);
        assert!(dst.copy_from(&src, &["nope"]).is_err());
        assert_eq!(dst.remove("name"), Some(Value::String("resnet".into())));
        assert!(!dst.has("name"));
    }
}
