//! Example experiments
//!
//! They sleep instead of touching the network, which makes them useful for
//! exercising the task runner end to end.

use super::{ExperimentCallbacks, ExperimentMeasurer, ExperimentSession};
use crate::model::Measurement;
use async_trait::async_trait;
use probe_foundation::{Error, OptionValue, Result};
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const VERSION: &str = "0.1.0";
const DEFAULT_SLEEP_TIME_MS: i64 = 1000;
const DEFAULT_MESSAGE: &str = "Good day from the example experiment!";

/// Sleeps, then reports success or a mocked failure
#[derive(Debug, Clone)]
pub struct ExampleMeasurer {
    name: String,
    interruptible: bool,
    sleep_time: Duration,
    return_error: bool,
    message: String,
}

impl ExampleMeasurer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            interruptible: true,
            sleep_time: Duration::from_millis(DEFAULT_SLEEP_TIME_MS as u64),
            return_error: false,
            message: DEFAULT_MESSAGE.to_string(),
        }
    }

    pub fn from_options(
        name: &str,
        interruptible: bool,
        options: &BTreeMap<String, OptionValue>,
    ) -> Self {
        let mut measurer = Self::new(name).with_interruptible(interruptible);
        if let Some(ms) = options.get("sleep_time_ms").and_then(OptionValue::as_int) {
            measurer.sleep_time = Duration::from_millis(ms.max(0) as u64);
        }
        if let Some(flag) = options.get("return_error").and_then(OptionValue::as_bool) {
            measurer.return_error = flag;
        }
        if let Some(message) = options.get("message").and_then(OptionValue::as_str) {
            measurer.message = message.to_string();
        }
        measurer
    }

    pub fn with_interruptible(mut self, interruptible: bool) -> Self {
        self.interruptible = interruptible;
        self
    }

    pub fn with_sleep_time(mut self, sleep_time: Duration) -> Self {
        self.sleep_time = sleep_time;
        self
    }

    pub fn with_return_error(mut self, return_error: bool) -> Self {
        self.return_error = return_error;
        self
    }
}

#[async_trait]
impl ExperimentMeasurer for ExampleMeasurer {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        VERSION
    }

    async fn run(
        &self,
        cancel: &CancellationToken,
        session: &dyn ExperimentSession,
        measurement: &mut Measurement,
        callbacks: &dyn ExperimentCallbacks,
    ) -> Result<()> {
        session.logger().info(&format!("{}: {}", self.name, self.message));
        callbacks.on_progress(0.0, &format!("{}: starting", self.name));

        let mut interrupted = false;
        if self.interruptible {
            tokio::select! {
                _ = tokio::time::sleep(self.sleep_time) => {}
                _ = cancel.cancelled() => interrupted = true,
            }
        } else {
            tokio::time::sleep(self.sleep_time).await;
        }

        measurement.test_keys = json!({
            "success": !self.return_error && !interrupted,
            "interrupted": interrupted,
        });
        callbacks.on_progress(1.0, &format!("{}: done", self.name));

        if self.return_error {
            return Err(Error::Experiment("mocked error".into()));
        }
        if interrupted {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}
