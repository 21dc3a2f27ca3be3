//! Experiments
//!
//! An experiment is a named measurement procedure. The engine knows them
//! through a static registry; each entry declares its input policy, whether it
//! honours cancellation mid-measurement, and the options it accepts.
//!
//! ```text
//! Session ──new_experiment_builder(name)──▶ ExperimentBuilder
//!                                              │ set_option(..)
//!                                              ▼
//!                                           Experiment ──measure(input)──▶ Measurement
//!                                              │
//!                                              └─▶ ExperimentMeasurer::run
//! ```

mod builder;
mod example;
mod measure;
mod registry;

pub use builder::ExperimentBuilder;
pub use example::ExampleMeasurer;
pub use measure::Experiment;
pub use registry::{canonical_name, lookup, ExperimentSpec};

use crate::bytecounter::ByteCounter;
use crate::model::{Location, Measurement};
use async_trait::async_trait;
use probe_foundation::{Logger, OptionValue, Result};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Policies
// ============================================================================

/// What an experiment expects as input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputPolicy {
    /// At least one input
    Required,
    /// Runs once with an empty input when none is given
    Optional,
    /// Never takes input; runs once with an empty input
    None,
}

/// Declared type of an experiment option
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    Bool,
    Int,
    Str,
}

impl OptionKind {
    pub fn name(&self) -> &'static str {
        match self {
            OptionKind::Bool => "bool",
            OptionKind::Int => "int",
            OptionKind::Str => "string",
        }
    }

    /// Value converted to this kind, if compatible
    ///
    /// String options also accept integers, since `"42"` sniffs as one.
    pub fn coerce(&self, value: OptionValue) -> Option<OptionValue> {
        match (self, value) {
            (OptionKind::Bool, v @ OptionValue::Bool(_)) => Some(v),
            (OptionKind::Int, v @ OptionValue::Int(_)) => Some(v),
            (OptionKind::Str, v @ OptionValue::Str(_)) => Some(v),
            (OptionKind::Str, OptionValue::Int(i)) => Some(OptionValue::Str(i.to_string())),
            _ => None,
        }
    }
}

/// One accepted option
#[derive(Debug, Clone, Copy)]
pub struct OptionSpec {
    pub name: &'static str,
    pub kind: OptionKind,
    pub doc: &'static str,
}

// ============================================================================
// Traits
// ============================================================================

/// Progress sink for a running measurement
pub trait ExperimentCallbacks: Send + Sync {
    /// `percentage` is in `[0, 1]` relative to the current measurement
    fn on_progress(&self, percentage: f64, message: &str);
}

/// Callbacks that only log
pub struct LoggingCallbacks<'a> {
    logger: &'a dyn Logger,
}

impl<'a> LoggingCallbacks<'a> {
    pub fn new(logger: &'a dyn Logger) -> Self {
        Self { logger }
    }
}

impl ExperimentCallbacks for LoggingCallbacks<'_> {
    fn on_progress(&self, percentage: f64, message: &str) {
        self.logger
            .debug(&format!("[{:5.1}%] {}", percentage * 100.0, message));
    }
}

/// Session view handed to a running experiment
pub trait ExperimentSession: Send + Sync {
    fn logger(&self) -> &dyn Logger;

    /// Counter for this experiment's traffic
    fn byte_counter(&self) -> &ByteCounter;

    fn location(&self) -> Location;

    fn software_name(&self) -> &str;

    fn software_version(&self) -> &str;
}

/// A measurement procedure
#[async_trait]
pub trait ExperimentMeasurer: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    /// Run one measurement, filling `measurement.test_keys`
    ///
    /// An error marks the measurement as failed; it is still returned to the
    /// caller.
    async fn run(
        &self,
        cancel: &CancellationToken,
        session: &dyn ExperimentSession,
        measurement: &mut Measurement,
        callbacks: &dyn ExperimentCallbacks,
    ) -> Result<()>;
}
