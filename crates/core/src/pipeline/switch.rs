//! Branch selection for graph switch nodes

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::data::Data;
use crate::{Error, Result};

/// Chooses which output of a switch node receives the Data
///
/// Selection is a pure function of the Data: the same input always picks the
/// same branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "@type")]
pub enum SwitchFn {
    /// Branch index read from an INT64 field
    #[serde(rename = "DataIntSwitchFn")]
    DataInt { num_outputs: usize, field: String },

    /// Branch index looked up from a STRING field
    #[serde(rename = "DataStringSwitchFn")]
    DataString {
        num_outputs: usize,
        field: String,
        map: BTreeMap<String, usize>,
    },
}

impl SwitchFn {
    pub fn data_int(num_outputs: usize, field: impl Into<String>) -> Self {
        SwitchFn::DataInt {
            num_outputs,
            field: field.into(),
        }
    }

    pub fn data_string<K: Into<String>>(
        num_outputs: usize,
        field: impl Into<String>,
        map: impl IntoIterator<Item = (K, usize)>,
    ) -> Self {
        SwitchFn::DataString {
            num_outputs,
            field: field.into(),
            map: map.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Number of branches
    pub fn num_outputs(&self) -> usize {
        match self {
            SwitchFn::DataInt { num_outputs, .. } | SwitchFn::DataString { num_outputs, .. } => {
                *num_outputs
            }
        }
    }

    /// Check the function is usable before any Data arrives
    pub fn validate(&self) -> Result<()> {
        if self.num_outputs() == 0 {
            return Err(Error::InvalidPipeline(
                "switch function needs at least one output".to_string(),
            ));
        }
        if let SwitchFn::DataString {
            num_outputs, map, ..
        } = self
        {
            if let Some((key, index)) = map.iter().find(|&(_, &i)| i >= *num_outputs) {
                return Err(Error::InvalidPipeline(format!(
                    "switch maps '{}' to output {} but has only {} outputs",
                    key, index, num_outputs
                )));
            }
        }
        Ok(())
    }

    /// Index of the branch that receives `data`
    pub fn select_output(&self, data: &Data) -> Result<usize> {
        let index = match self {
            SwitchFn::DataInt { field, .. } => {
                let value = data.get_int64(field)?;
                usize::try_from(value).map_err(|_| {
                    Error::InvalidData(format!("switch field '{}' is negative: {}", field, value))
                })?
            }
            SwitchFn::DataString { field, map, .. } => {
                let value = data.get_string(field)?;
                *map.get(value).ok_or_else(|| {
                    Error::InvalidData(format!(
                        "switch field '{}' has unmapped value '{}'",
                        field, value
                    ))
                })?
            }
        };
        if index >= self.num_outputs() {
            return Err(Error::InvalidData(format!(
                "switch selected output {} but has only {} outputs",
                index,
                self.num_outputs()
            )));
        }
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_switch() {
        let f = SwitchFn::data_int(3, "route");
        let d = Data::singleton("route", 1i64).unwrap();
        assert_eq!(f.select_output(&d).unwrap(), 1);
        assert!(f.select_output(&Data::singleton("route", 3i64).unwrap()).is_err());
        assert!(f.select_output(&Data::singleton("route", -1i64).unwrap()).is_err());
        assert!(matches!(
            f.select_output(&Data::singleton("route", "1").unwrap()),
            Err(Error::TypeMismatch { .. })
        ));
        assert!(matches!(
            f.select_output(&Data::new()),
            Err(Error::KeyNotFound(_))
        ));
    }

    #[test]
    fn test_string_switch() {
        let f = SwitchFn::data_string(2, "kind", [("cat", 0), ("dog", 1)]);
        assert_eq!(
            f.select_output(&Data::singleton("kind", "dog").unwrap()).unwrap(),
            1
        );
        assert!(f.select_output(&Data::singleton("kind", "bird").unwrap()).is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range_map() {
        assert!(SwitchFn::data_string(1, "k", [("a", 1)]).validate().is_err());
        assert!(SwitchFn::data_int(0, "k").validate().is_err());
        assert!(SwitchFn::data_int(2, "k").validate().is_ok());
    }

    #[test]
    fn test_serde_tag() {
        let json = serde_json::to_string(&SwitchFn::data_int(3, "route")).unwrap();
        assert_eq!(json, r#"{"@type":"DataIntSwitchFn","num_outputs":3,"field":"route"}"#);
    }
}
