//! Task runner
//!
//! Drives one task from `status.queued` to `task_terminated`:
//!
//! ```text
//! queued ─▶ started ─▶ validate ─▶ session ─▶ backends ─▶ location
//!                         │                      │           │
//!                         ▼                      ▼           ▼
//!                  failure.startup        failure.startup  failure.ip_lookup
//!
//! location ─▶ geoip/resolver ─▶ open report ─▶ per input: start, measure,
//!                                   │          measurement, submit, save, done
//!                                   ▼
//!                          failure.report_create
//!
//! every path ─▶ status.end ─▶ task_terminated
//! ```
//!
//! Between inputs the runner checks the interrupt flag and the runtime
//! deadline; the measurement in flight is never dropped.

use crate::emitter::Emitter;
use crate::log::TaskLogger;
use crate::settings::{self, Config, Settings};
use crate::state::TaskState;
use crate::task::TaskEnvironment;
use probe_engine::experiment::{Experiment, ExperimentCallbacks};
use probe_engine::{Measurement, Session, SessionConfig};
use probe_foundation::event::{
    End, Failure, GeoipLookup, MeasurementPayload, MeasurementStatus, ReportCreate,
    ResolverLookup,
};
use probe_foundation::{Error, Event, Logger};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Share of the progress bar reserved for setup
const SETUP_PROGRESS: f64 = 0.4;

/// Why a task stopped before measuring
#[derive(Debug)]
enum Abort {
    Startup(String),
    IpLookup(String),
    ReportCreate(String),
}

impl Abort {
    fn startup(error: Error) -> Self {
        if error.is_startup() {
            debug!(error = %error, "Settings rejected");
        } else {
            warn!(error = %error, "Task setup failed");
        }
        Abort::Startup(error.to_string())
    }

    fn event(&self) -> Event {
        match self {
            Abort::Startup(failure) => Event::failure_startup(failure.clone()),
            Abort::IpLookup(failure) => Event::FailureIpLookup(Failure {
                failure: failure.clone(),
            }),
            Abort::ReportCreate(failure) => Event::FailureReportCreate(Failure {
                failure: failure.clone(),
            }),
        }
    }

    fn message(&self) -> &str {
        match self {
            Abort::Startup(m) | Abort::IpLookup(m) | Abort::ReportCreate(m) => m,
        }
    }
}

pub(crate) struct TaskRunner {
    settings: Settings,
    environment: TaskEnvironment,
    emitter: Emitter,
    state: Arc<TaskState>,
    cancel: CancellationToken,
}

impl TaskRunner {
    pub(crate) fn new(
        settings: Settings,
        environment: TaskEnvironment,
        emitter: Emitter,
        state: Arc<TaskState>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            settings,
            environment,
            emitter,
            state,
            cancel,
        }
    }

    /// Emit the full sequence for a task that could not even start
    pub(crate) fn abort_before_start(emitter: &Emitter, failure: &str) {
        emitter.emit(Event::queued());
        emitter.emit(Event::started());
        emitter.emit(Event::failure_startup(failure));
        emitter.emit(Event::End(End {
            downloaded_kb: 0.0,
            uploaded_kb: 0.0,
            failure: failure.to_string(),
        }));
        emitter.emit(Event::terminated());
    }

    pub(crate) async fn run(self) {
        let started = Instant::now();
        let task_id = self.emitter.task_id();
        info!(%task_id, experiment = %self.settings.name, "Task started");

        self.emitter.emit(Event::queued());
        self.emitter.emit(Event::started());

        let mut session = None;
        let failure = match self.execute(started, &mut session).await {
            Ok(()) => String::new(),
            Err(abort) => {
                debug!(%task_id, failure = abort.message(), "Task aborted");
                self.emitter.emit(abort.event());
                abort.message().to_string()
            }
        };

        let (downloaded_kb, uploaded_kb) = session
            .as_ref()
            .map(|s| (s.kibibytes_received(), s.kibibytes_sent()))
            .unwrap_or((0.0, 0.0));
        self.emitter.emit(Event::End(End {
            downloaded_kb,
            uploaded_kb,
            failure,
        }));
        drop(session);

        info!(
            %task_id,
            elapsed = started.elapsed().as_secs_f64(),
            downloaded_kb,
            uploaded_kb,
            "Task finished"
        );
        self.emitter.emit(Event::terminated());
    }

    async fn execute(
        &self,
        started: Instant,
        session_slot: &mut Option<Arc<Session>>,
    ) -> Result<(), Abort> {
        let config = settings::validate(&self.settings).map_err(Abort::startup)?;
        let logger: Arc<dyn Logger> = Arc::new(TaskLogger::new(
            config.log_level,
            self.emitter.clone(),
            started,
        ));
        let deadline = config.max_runtime.map(|limit| started + limit);

        let session_config = SessionConfig::new(
            config.assets_dir.clone(),
            config.state_dir.clone(),
            config.software_name.clone(),
            config.software_version.clone(),
        )
        .with_privacy(config.privacy)
        .with_no_geoip(config.no_geoip)
        .with_no_resolver_lookup(config.no_resolver_lookup)
        .with_logger(Arc::clone(&logger))
        .with_services(Arc::clone(&self.environment.services))
        .with_location_provider(Arc::clone(&self.environment.location_provider));
        let session =
            Arc::new(Session::new(session_config).map_err(Abort::startup)?);
        *session_slot = Some(Arc::clone(&session));

        if !config.no_bouncer {
            self.emitter.emit(Event::progress(0.0, "contacting bouncer"));
            session
                .maybe_lookup_backends()
                .await
                .map_err(Abort::startup)?;
        }

        self.emitter
            .emit(Event::progress(0.1, "looking up your location"));
        session
            .maybe_lookup_location()
            .await
            .map_err(|e| Abort::IpLookup(e.to_string()))?;
        let location = session.location();
        self.emitter.emit(Event::GeoipLookup(GeoipLookup {
            probe_ip: location.probe_ip.clone(),
            probe_asn: location.probe_asn_string(),
            probe_cc: location.probe_cc.clone(),
            probe_network_name: location.probe_network_name.clone(),
        }));
        self.emitter.emit(Event::ResolverLookup(ResolverLookup {
            ip: location.resolver_ip.clone(),
        }));

        let mut builder = session
            .new_experiment_builder(&config.name)
            .map_err(Abort::startup)?;
        for (name, value) in &config.experiment_options {
            builder
                .set_option(name, value.clone())
                .map_err(Abort::startup)?;
        }
        let mut experiment = builder.new_experiment();

        if !config.no_collector {
            self.emitter.emit(Event::progress(0.3, "opening report"));
            experiment
                .open_report()
                .await
                .map_err(|e| Abort::ReportCreate(e.to_string()))?;
            self.emitter.emit(Event::ReportCreate(ReportCreate {
                report_id: experiment.report_id().unwrap_or_default().to_string(),
            }));
        }

        self.measure_inputs(&config, &experiment, logger.as_ref(), deadline)
            .await;

        if let Err(e) = experiment.close_report().await {
            logger.warn(&format!("closing report failed: {}", e));
        }
        Ok(())
    }

    /// Whether to stop before the next input
    fn stop_reason(&self, deadline: Option<Instant>) -> Option<&'static str> {
        if self.state.is_interrupted() {
            return Some("interrupted");
        }
        match deadline {
            Some(deadline) if Instant::now() >= deadline => Some("max_runtime exceeded"),
            _ => None,
        }
    }

    /// Run `measure`, cancelling it once the deadline passes
    ///
    /// Cancellation asks the experiment to stop; its measurement is still
    /// awaited and returned.
    async fn measure_before<F>(
        &self,
        deadline: Option<Instant>,
        measure: F,
        logger: &dyn Logger,
    ) -> Measurement
    where
        F: Future<Output = Measurement>,
    {
        let Some(deadline) = deadline else {
            return measure.await;
        };
        tokio::pin!(measure);
        tokio::select! {
            measurement = &mut measure => measurement,
            _ = tokio::time::sleep_until(deadline.into()) => {
                logger.debug("max_runtime exceeded, cancelling the measurement in flight");
                self.cancel.cancel();
                measure.await
            }
        }
    }

    async fn measure_inputs(
        &self,
        config: &Config,
        experiment: &Experiment,
        logger: &dyn Logger,
        deadline: Option<Instant>,
    ) {
        let total = config.inputs.len();
        for (idx, input) in config.inputs.iter().enumerate() {
            if let Some(reason) = self.stop_reason(deadline) {
                logger.debug(&format!("stopping after {} of {} inputs: {}", idx, total, reason));
                break;
            }

            self.emitter.emit(Event::MeasurementStart(MeasurementStatus {
                idx,
                input: input.clone(),
            }));
            if !input.is_empty() {
                logger.info(&format!("[{}/{}] running with input: {}", idx + 1, total, input));
            }

            let callbacks = ProgressCallbacks {
                emitter: &self.emitter,
                idx,
                total,
            };
            let measure = experiment.measure(&self.cancel, input, &callbacks);
            let mut measurement = self.measure_before(deadline, measure, logger).await;
            measurement.add_annotations(&config.annotations);

            let mut scrubbed = measurement.clone();
            config.privacy.apply(&mut scrubbed);
            match serde_json::to_string(&scrubbed) {
                Ok(json_str) => self
                    .emitter
                    .emit(Event::Measurement(MeasurementPayload { json_str, idx })),
                Err(e) => logger.warn(&format!("cannot serialize measurement: {}", e)),
            }

            if !config.no_collector {
                match experiment.submit_and_update_measurement(&mut measurement).await {
                    Ok(()) => self.emitter.emit(Event::MeasurementSubmission(MeasurementStatus {
                        idx,
                        input: input.clone(),
                    })),
                    Err(e) => logger.warn(&format!("submitting measurement failed: {}", e)),
                }
            }

            if !config.no_json {
                match experiment.save_measurement(&measurement, &config.report_file) {
                    Ok(()) => logger.debug(&format!(
                        "measurement saved to {}",
                        config.report_file.display()
                    )),
                    Err(e) => logger.warn(&format!("saving measurement failed: {}", e)),
                }
            }

            self.emitter.emit(Event::MeasurementDone(MeasurementStatus {
                idx,
                input: input.clone(),
            }));
        }
    }
}

/// Maps per-measurement progress onto the task's progress bar
struct ProgressCallbacks<'a> {
    emitter: &'a Emitter,
    idx: usize,
    total: usize,
}

impl ExperimentCallbacks for ProgressCallbacks<'_> {
    fn on_progress(&self, percentage: f64, message: &str) {
        let slice = (1.0 - SETUP_PROGRESS) / self.total.max(1) as f64;
        let overall = SETUP_PROGRESS + slice * (self.idx as f64 + percentage.clamp(0.0, 1.0));
        self.emitter.emit(Event::progress(overall.min(1.0), message));
    }
}
