//! Event Types - the task event vocabulary
//!
//! Every event serializes as `{"key": <string>, "value": <object>}`. The key set
//! is closed; hosts must ignore keys they do not know.

use crate::log::LogLevel;
use serde::{Deserialize, Serialize};

// ============================================================================
// Payloads
// ============================================================================

/// Payload of events that carry no fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Empty {}

/// `status.progress`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub percentage: f64,
    pub message: String,
}

/// `log`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub level: String,
    pub message: String,
}

/// `failure.*`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub failure: String,
}

/// `status.geoip_lookup`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoipLookup {
    pub probe_ip: String,
    pub probe_asn: String,
    pub probe_cc: String,
    pub probe_network_name: String,
}

/// `status.resolver_lookup`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolverLookup {
    pub ip: String,
}

/// `status.report_create`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportCreate {
    pub report_id: String,
}

/// Per-input status events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementStatus {
    pub idx: usize,
    pub input: String,
}

/// `measurement`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementPayload {
    /// Compact JSON encoding of the (privacy-scrubbed) measurement
    pub json_str: String,
    pub idx: usize,
}

/// `status.end`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct End {
    pub downloaded_kb: f64,
    pub uploaded_kb: f64,
    pub failure: String,
}

// ============================================================================
// Event
// ============================================================================

/// A task event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "key", content = "value")]
pub enum Event {
    #[serde(rename = "status.queued")]
    Queued(Empty),

    #[serde(rename = "status.started")]
    Started(Empty),

    #[serde(rename = "status.progress")]
    Progress(Progress),

    #[serde(rename = "status.geoip_lookup")]
    GeoipLookup(GeoipLookup),

    #[serde(rename = "status.resolver_lookup")]
    ResolverLookup(ResolverLookup),

    #[serde(rename = "status.report_create")]
    ReportCreate(ReportCreate),

    #[serde(rename = "status.measurement_start")]
    MeasurementStart(MeasurementStatus),

    #[serde(rename = "log")]
    Log(LogRecord),

    #[serde(rename = "measurement")]
    Measurement(MeasurementPayload),

    #[serde(rename = "status.measurement_submission")]
    MeasurementSubmission(MeasurementStatus),

    #[serde(rename = "status.measurement_done")]
    MeasurementDone(MeasurementStatus),

    #[serde(rename = "status.end")]
    End(End),

    #[serde(rename = "failure.startup")]
    FailureStartup(Failure),

    #[serde(rename = "failure.ip_lookup")]
    FailureIpLookup(Failure),

    #[serde(rename = "failure.report_create")]
    FailureReportCreate(Failure),

    #[serde(rename = "task_terminated")]
    TaskTerminated(Empty),
}

impl Event {
    pub fn queued() -> Self {
        Event::Queued(Empty {})
    }

    pub fn started() -> Self {
        Event::Started(Empty {})
    }

    pub fn terminated() -> Self {
        Event::TaskTerminated(Empty {})
    }

    pub fn progress(percentage: f64, message: impl Into<String>) -> Self {
        Event::Progress(Progress {
            percentage,
            message: message.into(),
        })
    }

    pub fn log(level: LogLevel, message: impl Into<String>) -> Self {
        Event::Log(LogRecord {
            level: level.as_str().to_string(),
            message: message.into(),
        })
    }

    pub fn failure_startup(failure: impl Into<String>) -> Self {
        Event::FailureStartup(Failure {
            failure: failure.into(),
        })
    }

    /// The wire key
    pub fn key(&self) -> &'static str {
        match self {
            Event::Queued(_) => "status.queued",
            Event::Started(_) => "status.started",
            Event::Progress(_) => "status.progress",
            Event::GeoipLookup(_) => "status.geoip_lookup",
            Event::ResolverLookup(_) => "status.resolver_lookup",
            Event::ReportCreate(_) => "status.report_create",
            Event::MeasurementStart(_) => "status.measurement_start",
            Event::Log(_) => "log",
            Event::Measurement(_) => "measurement",
            Event::MeasurementSubmission(_) => "status.measurement_submission",
            Event::MeasurementDone(_) => "status.measurement_done",
            Event::End(_) => "status.end",
            Event::FailureStartup(_) => "failure.startup",
            Event::FailureIpLookup(_) => "failure.ip_lookup",
            Event::FailureReportCreate(_) => "failure.report_create",
            Event::TaskTerminated(_) => "task_terminated",
        }
    }

    /// Whether this is the last event a task ever produces
    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::TaskTerminated(_))
    }

    /// Compact `{key, value}` JSON form
    pub fn to_json(&self) -> String {
        // Every payload is a plain struct of strings and numbers; encoding
        // only fails on non-finite floats, which `null` stands in for.
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"key":"{}","value":null}}"#, self.key())
        })
    }
}
