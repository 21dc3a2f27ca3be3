use super::measure::Experiment;
use super::registry::ExperimentSpec;
use super::InputPolicy;
use crate::session::Session;
use probe_foundation::{Error, OptionValue, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Configures an experiment before it runs
pub struct ExperimentBuilder {
    session: Arc<Session>,
    spec: &'static ExperimentSpec,
    options: BTreeMap<String, OptionValue>,
}

impl ExperimentBuilder {
    pub(crate) fn new(session: Arc<Session>, spec: &'static ExperimentSpec) -> Self {
        Self {
            session,
            spec,
            options: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.spec.name
    }

    pub fn input_policy(&self) -> InputPolicy {
        self.spec.input_policy
    }

    pub fn interruptible(&self) -> bool {
        self.spec.interruptible
    }

    /// Set an option, checking it against the declared type
    pub fn set_option(&mut self, name: &str, value: OptionValue) -> Result<()> {
        let option = self
            .spec
            .option(name)
            .ok_or_else(|| Error::invalid_option(name, "no such option"))?;
        let found = value.type_name();
        let value = option.kind.coerce(value).ok_or_else(|| {
            Error::invalid_option(
                name,
                format!("expected {}, found {}", option.kind.name(), found),
            )
        })?;
        self.options.insert(name.to_string(), value);
        Ok(())
    }

    /// Set an option from its textual form
    pub fn set_option_text(&mut self, name: &str, text: &str) -> Result<()> {
        self.set_option(name, OptionValue::parse(text))
    }

    pub fn options(&self) -> &BTreeMap<String, OptionValue> {
        &self.options
    }

    pub fn new_experiment(&self) -> Experiment {
        let measurer = self.spec.build(&self.options);
        let options = self
            .options
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        Experiment::new(Arc::clone(&self.session), measurer, options)
    }
}
