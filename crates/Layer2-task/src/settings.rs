//! Task settings
//!
//! `Settings` is the JSON document a host passes to `start_task`. Decoding is
//! the only synchronous failure; everything else is checked by `validate`,
//! which turns the settings into an immutable `Config` or a startup failure
//! reported through the event stream.
//!
//! ```json
//! {
//!   "name": "ExampleWithInput",
//!   "inputs": ["https://www.example.com"],
//!   "assets_dir": "/data/assets",
//!   "state_dir": "/data/state",
//!   "log_level": "INFO",
//!   "annotations": {"network_type": "wifi"},
//!   "options": {
//!     "software_name": "probe-mobile",
//!     "software_version": "0.1.0",
//!     "max_runtime": 30,
//!     "experiment_options": {"sleep_time_ms": "250"}
//!   }
//! }
//! ```

use probe_engine::experiment::{self, InputPolicy};
use probe_engine::PrivacySettings;
use probe_foundation::{Error, LogLevel, OptionValue, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Default report file name under the state directory
pub const DEFAULT_REPORT_FILE: &str = "report.jsonl";

// ============================================================================
// Settings (wire form)
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub assets_dir: String,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub input_filepaths: Vec<String>,
    #[serde(default)]
    pub log_level: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub options: SettingsOptions,
    #[serde(default)]
    pub state_dir: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsOptions {
    /// Per-experiment options; strings are sniffed into bool/int/string
    #[serde(default)]
    pub experiment_options: BTreeMap<String, serde_json::Value>,
    /// Seconds; zero or negative means unbounded
    #[serde(default)]
    pub max_runtime: f64,
    #[serde(default)]
    pub no_bouncer: bool,
    #[serde(default)]
    pub no_collector: bool,
    #[serde(default)]
    pub no_geoip: bool,
    #[serde(default)]
    pub no_json: bool,
    #[serde(default)]
    pub no_resolver_lookup: bool,
    #[serde(default)]
    pub report_file: Option<String>,
    #[serde(default)]
    pub save_real_probe_asn: bool,
    #[serde(default)]
    pub save_real_probe_cc: bool,
    #[serde(default)]
    pub save_real_probe_ip: bool,
    #[serde(default)]
    pub software_name: String,
    #[serde(default)]
    pub software_version: String,
}

impl Settings {
    /// Decode a settings document
    pub fn decode(payload: &str) -> Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }
}

// ============================================================================
// Config (validated form)
// ============================================================================

/// Validated, immutable task configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Canonical experiment name
    pub name: String,
    /// Never empty; `[""]` for experiments run without input
    pub inputs: Vec<String>,
    pub input_policy: InputPolicy,
    pub assets_dir: PathBuf,
    pub state_dir: PathBuf,
    pub software_name: String,
    pub software_version: String,
    pub log_level: LogLevel,
    pub annotations: BTreeMap<String, String>,
    pub experiment_options: BTreeMap<String, OptionValue>,
    pub max_runtime: Option<Duration>,
    pub no_bouncer: bool,
    pub no_collector: bool,
    pub no_geoip: bool,
    pub no_json: bool,
    pub no_resolver_lookup: bool,
    pub report_file: PathBuf,
    /// Applied to everything that leaves the process
    pub privacy: PrivacySettings,
}

/// Validate settings into a `Config`
///
/// Checks run in a fixed order and the first failure wins. Input files are
/// read here.
pub fn validate(settings: &Settings) -> Result<Config> {
    let spec = experiment::lookup(&settings.name)
        .ok_or_else(|| Error::UnknownExperiment(settings.name.clone()))?;

    if settings.assets_dir.is_empty() {
        return Err(Error::Validation("assets_dir is empty".into()));
    }
    if settings.state_dir.is_empty() {
        return Err(Error::Validation("state_dir is empty".into()));
    }

    let options = &settings.options;
    if options.no_geoip && !options.no_resolver_lookup {
        return Err(Error::Validation(
            "no_geoip requires no_resolver_lookup".into(),
        ));
    }

    let log_level = match settings.log_level.as_deref() {
        None | Some("") => LogLevel::default(),
        Some(text) => text.parse()?,
    };

    if !settings.inputs.is_empty() && !settings.input_filepaths.is_empty() {
        return Err(Error::Validation(
            "inputs and input_filepaths are mutually exclusive".into(),
        ));
    }
    let mut inputs = settings.inputs.clone();
    for path in &settings.input_filepaths {
        inputs.extend(load_input_file(path)?);
    }

    let mut experiment_options = BTreeMap::new();
    for (name, raw) in &options.experiment_options {
        let option = spec
            .option(name)
            .ok_or_else(|| Error::invalid_option(name, "no such option"))?;
        let value = OptionValue::from_json(raw);
        let found = value.type_name();
        let value = option.kind.coerce(value).ok_or_else(|| {
            Error::invalid_option(
                name,
                format!("expected {}, found {}", option.kind.name(), found),
            )
        })?;
        experiment_options.insert(name.clone(), value);
    }

    match spec.input_policy {
        InputPolicy::Required if inputs.is_empty() => {
            return Err(Error::Validation(format!(
                "{} requires at least one input",
                spec.name
            )));
        }
        InputPolicy::None if !inputs.is_empty() => {
            return Err(Error::Validation(format!(
                "{} does not accept input",
                spec.name
            )));
        }
        _ => {}
    }
    if inputs.is_empty() {
        inputs.push(String::new());
    }

    let max_runtime = (options.max_runtime.is_finite() && options.max_runtime > 0.0)
        .then(|| Duration::from_secs_f64(options.max_runtime));

    let state_dir = PathBuf::from(&settings.state_dir);
    let report_file = match options.report_file.as_deref() {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => state_dir.join(DEFAULT_REPORT_FILE),
    };

    Ok(Config {
        name: spec.name.to_string(),
        inputs,
        input_policy: spec.input_policy,
        assets_dir: PathBuf::from(&settings.assets_dir),
        state_dir,
        software_name: options.software_name.clone(),
        software_version: options.software_version.clone(),
        log_level,
        annotations: settings.annotations.clone(),
        experiment_options,
        max_runtime,
        no_bouncer: options.no_bouncer,
        no_collector: options.no_collector,
        no_geoip: options.no_geoip,
        no_json: options.no_json,
        no_resolver_lookup: options.no_resolver_lookup,
        report_file,
        privacy: PrivacySettings {
            include_asn: options.save_real_probe_asn,
            include_country: options.save_real_probe_cc,
            include_ip: options.save_real_probe_ip,
        },
    })
}

/// One input per non-empty line
fn load_input_file(path: &str) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Validation(format!("cannot read input file {}: {}", path, e)))?;
    Ok(content
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}
