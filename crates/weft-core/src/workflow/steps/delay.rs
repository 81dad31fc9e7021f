//! `delay`: sleep for `ms` milliseconds on the run's clock.

use std::time::Duration;

use serde_json::{json, Map, Value};
use weft_types::config::EngineConfig;

use crate::workflow::registry::{StepContext, StepExecutionError, StepExecutor, StepFuture, StepOutput};

#[derive(Debug, Clone)]
pub struct DelayStep {
    max_delay_ms: u64,
}

impl DelayStep {
    pub const TYPE: &'static str = "delay";

    pub fn new(max_delay_ms: u64) -> Self {
        Self { max_delay_ms }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.max_delay_ms)
    }

    fn parse_ms(&self, value: Option<&Value>) -> Result<u64, String> {
        let ms = value
            .and_then(Value::as_u64)
            .ok_or_else(|| "delay requires a non-negative integer 'ms'".to_string())?;
        if ms > self.max_delay_ms {
            return Err(format!(
                "delay of {ms} ms exceeds the maximum of {} ms",
                self.max_delay_ms
            ));
        }
        Ok(ms)
    }
}

impl StepExecutor for DelayStep {
    fn execute<'a>(&'a self, params: Value, ctx: &'a StepContext) -> StepFuture<'a> {
        Box::pin(async move {
            let ms = self
                .parse_ms(params.get("ms"))
                .map_err(StepExecutionError::fatal)?;

            tokio::select! {
                _ = ctx.clock.sleep(Duration::from_millis(ms)) => {
                    Ok(StepOutput::value(json!({ "sleptMs": ms })))
                }
                _ = ctx.cancellation.cancelled() => {
                    Err(StepExecutionError::fatal("delay interrupted by cancellation"))
                }
            }
        })
    }

    fn validate_params(&self, params: &Map<String, Value>) -> Result<(), String> {
        match params.get("ms") {
            Some(Value::String(s)) if s.contains("{{") => Ok(()),
            other => self.parse_ms(other).map(|_| ()),
        }
    }

    fn description(&self) -> &'static str {
        "Wait for `ms` milliseconds"
    }
}
