use super::{ExperimentCallbacks, ExperimentMeasurer, ExperimentSession};
use crate::bytecounter::ByteCounter;
use crate::model::{format_timestamp, Location, Measurement, DATA_FORMAT_VERSION};
use crate::services::ReportTemplate;
use crate::session::Session;
use chrono::Utc;
use probe_foundation::{Error, Logger, Result};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A configured experiment, ready to measure
pub struct Experiment {
    session: Arc<Session>,
    measurer: Box<dyn ExperimentMeasurer>,
    byte_counter: ByteCounter,
    options: Vec<String>,
    report_id: Option<String>,
    test_start_time: String,
}

impl Experiment {
    pub(crate) fn new(
        session: Arc<Session>,
        measurer: Box<dyn ExperimentMeasurer>,
        options: Vec<String>,
    ) -> Self {
        let byte_counter = ByteCounter::child_of(Arc::clone(session.byte_counter()));
        Self {
            session,
            measurer,
            byte_counter,
            options,
            report_id: None,
            test_start_time: format_timestamp(Utc::now()),
        }
    }

    pub fn name(&self) -> &str {
        self.measurer.name()
    }

    pub fn version(&self) -> &str {
        self.measurer.version()
    }

    pub fn report_id(&self) -> Option<&str> {
        self.report_id.as_deref()
    }

    pub fn kibibytes_received(&self) -> f64 {
        self.byte_counter.kibibytes_received()
    }

    pub fn kibibytes_sent(&self) -> f64 {
        self.byte_counter.kibibytes_sent()
    }

    // ========================================================================
    // Report
    // ========================================================================

    /// Open a collector report unless one is already open
    pub async fn open_report(&mut self) -> Result<()> {
        if self.report_id.is_some() {
            return Ok(());
        }
        let location = self.session.location();
        let privacy = self.session.privacy();
        let template = ReportTemplate {
            data_format_version: DATA_FORMAT_VERSION.to_string(),
            format: "json".to_string(),
            probe_asn: if privacy.include_asn {
                location.probe_asn_string()
            } else {
                Location::unknown().probe_asn_string()
            },
            probe_cc: if privacy.include_country {
                location.probe_cc.clone()
            } else {
                Location::unknown().probe_cc
            },
            software_name: self.session.software_name().to_string(),
            software_version: self.session.software_version().to_string(),
            test_name: self.name().to_string(),
            test_start_time: self.test_start_time.clone(),
            test_version: self.version().to_string(),
        };
        let report_id = self
            .session
            .services()
            .open_report(&template, &self.byte_counter)
            .await
            .map_err(|e| Error::Collector(e.to_string()))?;
        debug!(report_id = %report_id, "Report opened");
        self.report_id = Some(report_id);
        Ok(())
    }

    /// Close the report, if any
    pub async fn close_report(&mut self) -> Result<()> {
        let Some(report_id) = self.report_id.take() else {
            return Ok(());
        };
        self.session
            .services()
            .close_report(&report_id, &self.byte_counter)
            .await
            .map_err(|e| Error::Collector(e.to_string()))
    }

    // ========================================================================
    // Measurement
    // ========================================================================

    fn new_measurement(&self, input: &str) -> Measurement {
        let location = self.session.location();
        Measurement {
            annotations: Default::default(),
            data_format_version: DATA_FORMAT_VERSION.to_string(),
            failure: None,
            input: (!input.is_empty()).then(|| input.to_string()),
            measurement_start_time: format_timestamp(Utc::now()),
            options: self.options.clone(),
            probe_asn: location.probe_asn_string(),
            probe_cc: location.probe_cc.clone(),
            probe_ip: location.probe_ip.clone(),
            probe_network_name: location.probe_network_name.clone(),
            report_id: self.report_id.clone().unwrap_or_default(),
            resolver_asn: location.resolver_asn_string(),
            resolver_ip: location.resolver_ip.clone(),
            resolver_network_name: location.resolver_network_name.clone(),
            software_name: self.session.software_name().to_string(),
            software_version: self.session.software_version().to_string(),
            test_keys: serde_json::Value::Null,
            test_name: self.name().to_string(),
            test_runtime: 0.0,
            test_start_time: self.test_start_time.clone(),
            test_version: self.version().to_string(),
        }
    }

    /// Measure one input
    ///
    /// Always yields a measurement; when the experiment fails, its error is
    /// recorded in `failure`.
    pub async fn measure(
        &self,
        cancel: &CancellationToken,
        input: &str,
        callbacks: &dyn ExperimentCallbacks,
    ) -> Measurement {
        let mut measurement = self.new_measurement(input);
        measurement
            .annotations
            .insert("engine_name".into(), env!("CARGO_PKG_NAME").into());
        measurement
            .annotations
            .insert("engine_version".into(), env!("CARGO_PKG_VERSION").into());
        measurement
            .annotations
            .insert("platform".into(), std::env::consts::OS.into());

        let view = MeasurementSession {
            session: &self.session,
            counter: &self.byte_counter,
        };
        let start = Instant::now();
        let result = self
            .measurer
            .run(cancel, &view, &mut measurement, callbacks)
            .await;
        measurement.test_runtime = start.elapsed().as_secs_f64();

        if let Err(e) = result {
            self.session
                .logger()
                .warn(&format!("measurement failed: {}", e));
            measurement.failure = Some(e.to_string());
        }
        measurement
    }

    /// Submit to the open report and record the report id
    pub async fn submit_and_update_measurement(&self, measurement: &mut Measurement) -> Result<()> {
        let report_id = self
            .report_id
            .as_deref()
            .ok_or_else(|| Error::Collector("report is not open".into()))?;
        let mut outgoing = measurement.clone();
        outgoing.report_id = report_id.to_string();
        self.session.privacy().apply(&mut outgoing);
        self.session
            .services()
            .submit(report_id, &outgoing, &self.byte_counter)
            .await?;
        measurement.report_id = report_id.to_string();
        Ok(())
    }

    /// Append the measurement as one JSON line
    pub fn save_measurement(&self, measurement: &Measurement, path: &Path) -> Result<()> {
        let mut outgoing = measurement.clone();
        self.session.privacy().apply(&mut outgoing);
        let mut line = serde_json::to_vec(&outgoing)?;
        line.push(b'\n');

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        file.write_all(&line)?;
        Ok(())
    }
}

/// What a running measurer sees of the session
struct MeasurementSession<'a> {
    session: &'a Session,
    counter: &'a ByteCounter,
}

impl ExperimentSession for MeasurementSession<'_> {
    fn logger(&self) -> &dyn Logger {
        self.session.logger().as_ref()
    }

    fn byte_counter(&self) -> &ByteCounter {
        self.counter
    }

    fn location(&self) -> Location {
        self.session.location()
    }

    fn software_name(&self) -> &str {
        self.session.software_name()
    }

    fn software_version(&self) -> &str {
        self.session.software_version()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::LoggingCallbacks;
    use crate::model::PrivacySettings;
    use crate::services::LocalProbeServices;
    use crate::session::SessionConfig;
    use probe_foundation::{OptionValue, TracingLogger};

    fn session(dir: &Path, services: Arc<LocalProbeServices>) -> Arc<Session> {
        Arc::new(
            Session::new(
                SessionConfig::new(dir.join("assets"), dir.join("state"), "probe-test", "0.1.0")
                    .with_services(services),
            )
            .unwrap(),
        )
    }

    fn fast_experiment(session: &Arc<Session>, name: &str) -> Experiment {
        let mut builder = session.new_experiment_builder(name).unwrap();
        builder
            .set_option("sleep_time_ms", OptionValue::Int(10))
            .unwrap();
        builder.new_experiment()
    }

    #[tokio::test]
    async fn test_measure_success() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(dir.path(), Arc::new(LocalProbeServices::new()));
        session.maybe_lookup_location().await.unwrap();
        let experiment = fast_experiment(&session, "example_with_input");

        let logger = TracingLogger;
        let m = experiment
            .measure(
                &CancellationToken::new(),
                "https://example.com",
                &LoggingCallbacks::new(&logger),
            )
            .await;
        assert!(m.failure.is_none());
        assert_eq!(m.input.as_deref(), Some("https://example.com"));
        assert_eq!(m.test_name, "example_with_input");
        assert_eq!(m.probe_cc, "IT");
        assert_eq!(m.test_keys["success"], true);
        assert_eq!(m.options, vec!["sleep_time_ms=10".to_string()]);
        assert_eq!(m.annotations["engine_name"], "probe-engine");
    }

    #[tokio::test]
    async fn test_measure_failure_still_yields_measurement() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(dir.path(), Arc::new(LocalProbeServices::new()));
        let experiment = fast_experiment(&session, "example_with_failure");

        let logger = TracingLogger;
        let m = experiment
            .measure(&CancellationToken::new(), "", &LoggingCallbacks::new(&logger))
            .await;
        assert!(m.failure.as_deref().unwrap().contains("mocked error"));
        assert!(m.input.is_none());
    }

    #[tokio::test]
    async fn test_cancel_interruptible() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(dir.path(), Arc::new(LocalProbeServices::new()));
        let mut builder = session.new_experiment_builder("example").unwrap();
        builder
            .set_option("sleep_time_ms", OptionValue::Int(60_000))
            .unwrap();
        let experiment = builder.new_experiment();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let logger = TracingLogger;
        let m = experiment
            .measure(&cancel, "", &LoggingCallbacks::new(&logger))
            .await;
        assert_eq!(m.test_keys["interrupted"], true);
        assert!(m.failure.is_some());
    }

    #[tokio::test]
    async fn test_submit_requires_open_report() {
        let dir = tempfile::tempdir().unwrap();
        let services = Arc::new(LocalProbeServices::new());
        let session = session(dir.path(), Arc::clone(&services));
        session.maybe_lookup_location().await.unwrap();
        let mut experiment = fast_experiment(&session, "example");

        let logger = TracingLogger;
        let mut m = experiment
            .measure(&CancellationToken::new(), "", &LoggingCallbacks::new(&logger))
            .await;
        assert!(experiment.submit_and_update_measurement(&mut m).await.is_err());

        experiment.open_report().await.unwrap();
        let report_id = experiment.report_id().unwrap().to_string();
        experiment.submit_and_update_measurement(&mut m).await.unwrap();
        assert_eq!(m.report_id, report_id);

        // The default privacy policy withholds location on the wire
        let submitted = services.measurements(&report_id);
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].probe_ip, "127.0.0.1");
        assert_eq!(submitted[0].probe_asn, "AS0");
        assert_eq!(submitted[0].probe_cc, "ZZ");

        experiment.close_report().await.unwrap();
        assert!(services.is_closed(&report_id));
        assert!(experiment.kibibytes_sent() > 0.0);
        assert!(session.kibibytes_sent() >= experiment.kibibytes_sent());
    }

    #[tokio::test]
    async fn test_save_measurement_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let session = Arc::new(
            Session::new(
                SessionConfig::new(
                    dir.path().join("assets"),
                    dir.path().join("state"),
                    "probe-test",
                    "0.1.0",
                )
                .with_privacy(PrivacySettings {
                    include_asn: true,
                    include_country: true,
                    include_ip: false,
                }),
            )
            .unwrap(),
        );
        session.maybe_lookup_location().await.unwrap();
        let experiment = fast_experiment(&session, "example");
        let logger = TracingLogger;
        let m = experiment
            .measure(&CancellationToken::new(), "", &LoggingCallbacks::new(&logger))
            .await;

        let path = dir.path().join("out").join("report.jsonl");
        experiment.save_measurement(&m, &path).unwrap();
        experiment.save_measurement(&m, &path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let saved: Measurement = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(saved.probe_cc, "IT");
        assert_eq!(saved.probe_ip, "127.0.0.1");
    }
}
