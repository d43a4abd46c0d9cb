//! LoggingStep - logs the Data passing through and forwards it unchanged
//!
//! # Example
//!
//! ```yaml
//! "@type": LoggingStep
//! level: debug
//! log: keys_and_values
//! key_filter_regex: "^(boxes|labels)$"
//! ```

use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::data::{Data, Value};
use crate::pipeline::{
    ConfigRunnerFactory, Context, PipelineStep, PipelineStepRunner, RunnerState, StepConfig,
};
use crate::{Error, Result};

/// Log level for [`LoggingStep`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

/// What to log for each key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogContent {
    #[default]
    Keys,
    KeysAndValues,
}

/// Configuration for LoggingStep
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingStep {
    pub level: LogLevel,
    pub log: LogContent,
    /// Only keys matching this pattern are logged
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_filter_regex: Option<String>,
}

impl StepConfig for LoggingStep {
    const STEP_TYPE: &'static str = "LoggingStep";
}

pub(crate) fn factory() -> ConfigRunnerFactory<LoggingStep> {
    ConfigRunnerFactory::new("logging", |step, config: LoggingStep| {
        Ok(Arc::new(LoggingRunner::new(step, config)?) as Arc<dyn PipelineStepRunner>)
    })
}

struct LoggingRunner {
    step: PipelineStep,
    config: LoggingStep,
    filter: Option<Regex>,
    state: RunnerState,
}

impl LoggingRunner {
    fn new(step: &PipelineStep, config: LoggingStep) -> Result<Self> {
        let filter = config
            .key_filter_regex
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| Error::InvalidConfig(format!("key_filter_regex: {}", e)))?;
        Ok(Self {
            step: step.clone(),
            state: RunnerState::new(step),
            config,
            filter,
        })
    }

    fn render(&self, data: &Data) -> String {
        let entries = data
            .iter()
            .filter(|(key, _)| self.filter.as_ref().map_or(true, |re| re.is_match(key)));
        let parts: Vec<String> = match self.config.log {
            LogContent::Keys => entries.map(|(key, _)| key.to_string()).collect(),
            LogContent::KeysAndValues => entries
                .map(|(key, value)| format!("{}={}", key, summarize(value)))
                .collect(),
        };
        format!("{{{}}}", parts.join(", "))
    }
}

/// Short form of a value; tensors and payloads are not dumped
fn summarize(value: &Value) -> String {
    match value {
        Value::NDArray(nd) => match nd.shape() {
            Ok(shape) => format!("NDARRAY{:?}", shape),
            Err(_) => format!("NDARRAY<{}>", nd.native_type_name()),
        },
        Value::String(s) => format!("{:?}", s),
        Value::Bytes(b) => format!("BYTES[{}]", b.len()),
        Value::Image(img) => format!("IMAGE({} {}x{})", img.format().as_str(), img.width(), img.height()),
        Value::BoundingBox(b) => format!(
            "BBOX({}, {}, {}, {}{})",
            b.x1(),
            b.y1(),
            b.x2(),
            b.y2(),
            b.label().map(|l| format!(", {}", l)).unwrap_or_default()
        ),
        Value::Point(p) => format!("POINT{:?}", p.coords()),
        Value::Int64(v) => v.to_string(),
        Value::Double(v) => v.to_string(),
        Value::Boolean(v) => v.to_string(),
        Value::Data(d) => format!("DATA[{}]", d.len()),
        Value::List(l) => format!("LIST<{}>[{}]", l.element_type(), l.len()),
    }
}

impl PipelineStepRunner for LoggingRunner {
    fn step(&self) -> &PipelineStep {
        &self.step
    }

    fn exec(&self, ctx: &Context, data: Data) -> Result<Data> {
        self.state.check_open()?;
        let step = self.step.display_name();
        let request_id = ctx.request_id();
        let rendered = self.render(&data);
        match self.config.level {
            LogLevel::Trace => tracing::trace!(step, %request_id, data = %rendered),
            LogLevel::Debug => tracing::debug!(step, %request_id, data = %rendered),
            LogLevel::Info => tracing::info!(step, %request_id, data = %rendered),
            LogLevel::Warn => tracing::warn!(step, %request_id, data = %rendered),
            LogLevel::Error => tracing::error!(step, %request_id, data = %rendered),
        }
        Ok(data)
    }

    fn close(&self) -> Result<()> {
        self.state.mark_closed();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner(config: LoggingStep) -> LoggingRunner {
        let step = PipelineStep::from_config(&config).unwrap();
        LoggingRunner::new(&step, config).unwrap()
    }

    #[test]
    fn test_passes_data_through() {
        let r = runner(LoggingStep::default());
        let mut data = Data::new();
        data.put("a", 1i64).unwrap();
        let out = r.exec(&Context::default(), data.clone()).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_filter_and_values() {
        let r = runner(LoggingStep {
            log: LogContent::KeysAndValues,
            key_filter_regex: Some("^keep".to_string()),
            ..Default::default()
        });
        let mut data = Data::new();
        data.put("keep_me", "yes").unwrap();
        data.put("drop_me", 2i64).unwrap();
        assert_eq!(r.render(&data), r#"{keep_me="yes"}"#);
    }

    #[test]
    fn test_bad_regex_is_config_error() {
        let config = LoggingStep {
            key_filter_regex: Some("(".to_string()),
            ..Default::default()
        };
        let step = PipelineStep::from_config(&config).unwrap();
        assert!(matches!(
            LoggingRunner::new(&step, config),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_closed_runner_rejects_exec() {
        let r = runner(LoggingStep::default());
        r.close().unwrap();
        r.close().unwrap();
        assert!(matches!(
            r.exec(&Context::default(), Data::new()),
            Err(Error::RunnerClosed(_))
        ));
    }
}
