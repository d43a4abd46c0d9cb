//! Declarative step configuration
//!
//! A [`PipelineStep`] is plain data: the step's `@type`, an optional name and
//! whatever parameters that type understands. It says nothing about how the
//! step runs; a runner factory decides that at resolution time.
//!
//! ```json
//! {"@type": "BoundingBoxFilterStep", "name": "keep-people", "min_probability": 0.5}
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Error, Result};

/// Serializable step configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStep {
    /// Step type, matched by runner factories
    #[serde(rename = "@type")]
    step_type: String,

    /// Optional instance name used in logs and errors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,

    /// Type-specific parameters
    #[serde(flatten)]
    params: Map<String, Value>,
}

/// Typed configuration for one step type
///
/// Implementors are ordinary serde structs; the step type string ties the
/// struct to the `@type` it is stored under.
pub trait StepConfig: Serialize + DeserializeOwned {
    /// `@type` this configuration is stored under
    const STEP_TYPE: &'static str;
}

impl PipelineStep {
    /// Create a step with no parameters
    pub fn new(step_type: impl Into<String>) -> Self {
        Self {
            step_type: step_type.into(),
            name: None,
            params: Map::new(),
        }
    }

    /// Build from a typed configuration
    pub fn from_config<C: StepConfig>(config: &C) -> Result<Self> {
        let params = match serde_json::to_value(config)? {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(Error::InvalidConfig(format!(
                    "{} must serialize to an object, got {}",
                    C::STEP_TYPE,
                    other
                )))
            }
        };
        let mut step = Self::new(C::STEP_TYPE);
        for (key, value) in params {
            step = step.with_param(key, value)?;
        }
        Ok(step)
    }

    /// Set the instance name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set one parameter
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Result<Self> {
        let key = key.into();
        if key == "@type" || key == "name" {
            return Err(Error::InvalidConfig(format!(
                "'{}' is not a valid parameter name for {}",
                key, self.step_type
            )));
        }
        self.params.insert(key, value.into());
        Ok(self)
    }

    /// Decode the parameters as `C`
    pub fn config<C: StepConfig>(&self) -> Result<C> {
        if self.step_type != C::STEP_TYPE {
            return Err(Error::InvalidConfig(format!(
                "step of type '{}' cannot be read as {}",
                self.step_type,
                C::STEP_TYPE
            )));
        }
        serde_json::from_value(Value::Object(self.params.clone())).map_err(|e| {
            Error::InvalidConfig(format!("{} '{}': {}", self.step_type, self.display_name(), e))
        })
    }

    /// Step type
    pub fn step_type(&self) -> &str {
        &self.step_type
    }

    /// Instance name, if set
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Instance name, falling back to the step type
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.step_type)
    }

    /// All parameters
    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    /// One parameter
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Threshold {
        min: f64,
        #[serde(default)]
        labels: Vec<String>,
    }

    impl StepConfig for Threshold {
        const STEP_TYPE: &'static str = "ThresholdStep";
    }

    #[test]
    fn test_json_shape() {
        let step = PipelineStep::new("ThresholdStep")
            .with_name("t1")
            .with_param("min", 0.5)
            .unwrap();
        let json = serde_json::to_string(&step).unwrap();
        assert_eq!(json, r#"{"@type":"ThresholdStep","name":"t1","min":0.5}"#);
        let back: PipelineStep = serde_json::from_str(&json).unwrap();
        assert_eq!(back, step);
    }

    #[test]
    fn test_yaml_roundtrip() {
        let step = PipelineStep::from_config(&Threshold {
            min: 0.25,
            labels: vec!["cat".into()],
        })
        .unwrap();
        let yaml = serde_yaml::to_string(&step).unwrap();
        let back: PipelineStep = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, step);
    }

    #[test]
    fn test_typed_config() {
        let step: PipelineStep =
            serde_json::from_str(r#"{"@type":"ThresholdStep","min":0.1}"#).unwrap();
        let cfg: Threshold = step.config().unwrap();
        assert_eq!(cfg, Threshold { min: 0.1, labels: vec![] });
        assert_eq!(step.display_name(), "ThresholdStep");
    }

    #[test]
    fn test_typed_config_errors() {
        let wrong_type = PipelineStep::new("OtherStep");
        assert!(matches!(
            wrong_type.config::<Threshold>(),
            Err(Error::InvalidConfig(_))
        ));
        let missing_field = PipelineStep::new("ThresholdStep");
        assert!(matches!(
            missing_field.config::<Threshold>(),
            Err(Error::InvalidConfig(_))
        ));
        assert!(PipelineStep::new("X").with_param("@type", 1).is_err());
    }
}
