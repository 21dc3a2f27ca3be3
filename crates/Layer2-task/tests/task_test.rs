//! End-to-end task tests
//!
//! `cargo test -p probe-task --test task_test`

use async_trait::async_trait;
use probe_engine::model::{Location, Measurement};
use probe_engine::services::{ReportTemplate, ResolverInfo, Service};
use probe_engine::{ByteCounter, LocalProbeServices, LocationProvider, ProbeServices};
use probe_foundation::event::End;
use probe_foundation::{Error, Event, Result};
use probe_task::{start_task, start_task_with, TaskEnvironment, TaskHandle};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

// ============================================================================
// Helpers
// ============================================================================

fn settings(dir: &Path, name: &str) -> Value {
    json!({
        "name": name,
        "assets_dir": dir.join("assets").to_str().unwrap(),
        "state_dir": dir.join("state").to_str().unwrap(),
        "log_level": "INFO",
        "options": {
            "software_name": "probe-task-test",
            "software_version": "0.1.0",
            "experiment_options": {"sleep_time_ms": "10"}
        }
    })
}

fn start(value: &Value) -> TaskHandle {
    start_task(&value.to_string()).unwrap()
}

fn drain(handle: &TaskHandle) -> Vec<Event> {
    let mut events = Vec::new();
    while let Some(event) = handle.wait_for_next_event() {
        events.push(event);
    }
    events
}

fn keys(events: &[Event]) -> Vec<&'static str> {
    events.iter().map(Event::key).collect()
}

/// Collapse runs of the same key
fn compress(keys: &[&'static str]) -> Vec<&'static str> {
    let mut out: Vec<&'static str> = Vec::new();
    for key in keys {
        if out.last() != Some(key) {
            out.push(key);
        }
    }
    out
}

fn measurements(events: &[Event]) -> Vec<Value> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::Measurement(payload) => Some(serde_json::from_str(&payload.json_str).unwrap()),
            _ => None,
        })
        .collect()
}

fn end(events: &[Event]) -> End {
    events
        .iter()
        .find_map(|event| match event {
            Event::End(end) => Some(end.clone()),
            _ => None,
        })
        .expect("status.end is always emitted")
}

fn assert_startup_failure(value: &Value) {
    let handle = start(value);
    let events = drain(&handle);
    assert_eq!(
        keys(&events),
        vec![
            "status.queued",
            "status.started",
            "failure.startup",
            "status.end",
            "task_terminated"
        ]
    );
    assert!(handle.is_done());
    assert!(!handle.is_running());
}

// ============================================================================
// Failing backends
// ============================================================================

#[derive(Default)]
struct FlakyServices {
    inner: LocalProbeServices,
    fail_open: bool,
    fail_submit: bool,
}

#[async_trait]
impl ProbeServices for FlakyServices {
    async fn lookup_backends(&self, counter: &ByteCounter) -> Result<Vec<Service>> {
        self.inner.lookup_backends(counter).await
    }

    async fn open_report(&self, template: &ReportTemplate, counter: &ByteCounter) -> Result<String> {
        if self.fail_open {
            return Err(Error::Collector("mocked error".into()));
        }
        self.inner.open_report(template, counter).await
    }

    async fn submit(
        &self,
        report_id: &str,
        measurement: &Measurement,
        counter: &ByteCounter,
    ) -> Result<()> {
        if self.fail_submit {
            return Err(Error::Collector("mocked error".into()));
        }
        self.inner.submit(report_id, measurement, counter).await
    }

    async fn close_report(&self, report_id: &str, counter: &ByteCounter) -> Result<()> {
        self.inner.close_report(report_id, counter).await
    }
}

struct BrokenLocation;

#[async_trait]
impl LocationProvider for BrokenLocation {
    async fn lookup_probe(&self, _counter: &ByteCounter) -> Result<Location> {
        Err(Error::Location("mocked error".into()))
    }

    async fn lookup_resolver(&self, _counter: &ByteCounter) -> Result<ResolverInfo> {
        Err(Error::Location("mocked error".into()))
    }
}

// ============================================================================
// Successful runs
// ============================================================================

#[test]
fn test_good_run() {
    let dir = tempfile::tempdir().unwrap();
    let handle = start(&settings(dir.path(), "Example"));
    let events = drain(&handle);

    assert_eq!(
        compress(&keys(&events)),
        vec![
            "status.queued",
            "status.started",
            "status.progress",
            "status.geoip_lookup",
            "status.resolver_lookup",
            "status.progress",
            "status.report_create",
            "status.measurement_start",
            "log",
            "status.progress",
            "measurement",
            "status.measurement_submission",
            "status.measurement_done",
            "status.end",
            "task_terminated"
        ]
    );
    assert_eq!(measurements(&events).len(), 1);
    assert!(end(&events).failure.is_empty());
    assert!(handle.is_done());
    assert!(handle.wait_for_next_event().is_none());
}

#[test]
fn test_multiple_inputs() {
    let dir = tempfile::tempdir().unwrap();
    let mut value = settings(dir.path(), "ExampleWithInput");
    value["inputs"] = json!(["https://a.example", "https://b.example", "https://c.example"]);
    let handle = start(&value);
    let events = drain(&handle);

    let measured = measurements(&events);
    assert_eq!(measured.len(), 3);
    assert_eq!(measured[2]["input"], "https://c.example");

    let done: Vec<usize> = events
        .iter()
        .filter_map(|event| match event {
            Event::MeasurementDone(status) => Some(status.idx),
            _ => None,
        })
        .collect();
    assert_eq!(done, vec![0, 1, 2]);

    let saved = std::fs::read_to_string(dir.path().join("state").join("report.jsonl")).unwrap();
    assert_eq!(saved.lines().count(), 3);
}

#[test]
fn test_progress_is_monotonic() {
    let dir = tempfile::tempdir().unwrap();
    let mut value = settings(dir.path(), "ExampleWithInput");
    value["inputs"] = json!(["a", "b"]);
    let events = drain(&start(&value));

    let progress: Vec<f64> = events
        .iter()
        .filter_map(|event| match event {
            Event::Progress(p) => Some(p.percentage),
            _ => None,
        })
        .collect();
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert!(progress.iter().all(|p| (0.0..=1.0).contains(p)));
    assert!((progress.last().unwrap() - 1.0).abs() < 1e-9);
}

#[test]
fn test_without_geoip_lookup() {
    let dir = tempfile::tempdir().unwrap();
    let mut value = settings(dir.path(), "Example");
    value["options"]["no_geoip"] = json!(true);
    value["options"]["no_resolver_lookup"] = json!(true);
    let events = drain(&start(&value));

    let geoip = events
        .iter()
        .find_map(|event| match event {
            Event::GeoipLookup(g) => Some(g.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(geoip.probe_asn, "AS0");
    assert_eq!(geoip.probe_cc, "ZZ");
    assert_eq!(geoip.probe_ip, "127.0.0.1");

    let resolver = events
        .iter()
        .find_map(|event| match event {
            Event::ResolverLookup(r) => Some(r.ip.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(resolver, "127.0.0.2");
    assert_eq!(measurements(&events).len(), 1);
}

#[test]
fn test_measurement_failure() {
    let dir = tempfile::tempdir().unwrap();
    let events = drain(&start(&settings(dir.path(), "ExampleWithFailure")));

    let measured = measurements(&events);
    assert_eq!(measured.len(), 1);
    assert!(measured[0]["failure"]
        .as_str()
        .unwrap()
        .contains("mocked error"));
    assert!(events.iter().any(|event| matches!(
        event,
        Event::Log(record) if record.level == "WARNING"
    )));
    assert_eq!(keys(&events).last(), Some(&"task_terminated"));
}

#[test]
fn test_no_collector_and_no_json() {
    let dir = tempfile::tempdir().unwrap();
    let mut value = settings(dir.path(), "Example");
    value["options"]["no_collector"] = json!(true);
    value["options"]["no_json"] = json!(true);
    let events = drain(&start(&value));

    let keys = keys(&events);
    assert!(!keys.contains(&"status.report_create"));
    assert!(!keys.contains(&"status.measurement_submission"));
    assert!(keys.contains(&"status.measurement_done"));
    assert!(!dir.path().join("state").join("report.jsonl").exists());
}

#[test]
fn test_annotations_and_report_file() {
    let dir = tempfile::tempdir().unwrap();
    let report = dir.path().join("custom").join("out.jsonl");
    let mut value = settings(dir.path(), "Example");
    value["annotations"] = json!({"network_type": "wifi"});
    value["options"]["report_file"] = json!(report.to_str().unwrap());
    let events = drain(&start(&value));

    assert_eq!(measurements(&events)[0]["annotations"]["network_type"], "wifi");
    let saved: Value =
        serde_json::from_str(std::fs::read_to_string(&report).unwrap().trim()).unwrap();
    assert_eq!(saved["annotations"]["network_type"], "wifi");
    assert!(!saved["report_id"].as_str().unwrap().is_empty());
}

#[test]
fn test_log_level_threshold() {
    let dir = tempfile::tempdir().unwrap();
    let mut value = settings(dir.path(), "ExampleWithInput");
    value["inputs"] = json!(["a"]);
    value["log_level"] = json!("WARNING");
    let events = drain(&start(&value));
    assert!(!keys(&events).contains(&"log"));
}

// ============================================================================
// Startup failures
// ============================================================================

#[test]
fn test_invalid_json() {
    assert!(matches!(start_task("{"), Err(Error::Json(_))));
    assert!(matches!(start_task("[]"), Err(Error::Json(_))));
    assert!(start_task_with("17", TaskEnvironment::default()).is_err());
}

#[test]
fn test_unknown_experiment() {
    let dir = tempfile::tempdir().unwrap();
    assert_startup_failure(&settings(dir.path(), "Antani"));
}

#[test]
fn test_empty_state_dir() {
    let dir = tempfile::tempdir().unwrap();
    let mut value = settings(dir.path(), "Example");
    value["state_dir"] = json!("");
    assert_startup_failure(&value);
}

#[test]
fn test_empty_assets_dir() {
    let dir = tempfile::tempdir().unwrap();
    let mut value = settings(dir.path(), "Example");
    value["assets_dir"] = json!("");
    assert_startup_failure(&value);
}

#[test]
fn test_inconsistent_geoip_settings() {
    let dir = tempfile::tempdir().unwrap();
    let mut value = settings(dir.path(), "Example");
    value["options"]["no_geoip"] = json!(true);
    assert_startup_failure(&value);
}

#[test]
fn test_input_required() {
    let dir = tempfile::tempdir().unwrap();
    assert_startup_failure(&settings(dir.path(), "ExampleWithInput"));
}

#[test]
fn test_input_not_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let mut value = settings(dir.path(), "Example");
    value["inputs"] = json!(["https://a.example"]);
    assert_startup_failure(&value);
}

#[test]
fn test_input_file_nonexistent() {
    let dir = tempfile::tempdir().unwrap();
    let mut value = settings(dir.path(), "ExampleWithInput");
    value["input_filepaths"] = json!([dir.path().join("missing.txt").to_str().unwrap()]);
    assert_startup_failure(&value);
}

#[test]
fn test_input_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("inputs.txt");
    std::fs::write(&path, "https://a.example\n\nhttps://b.example\n").unwrap();

    let mut value = settings(dir.path(), "ExampleWithInput");
    value["input_filepaths"] = json!([path.to_str().unwrap()]);
    let events = drain(&start(&value));
    assert_eq!(measurements(&events).len(), 2);
}

#[test]
fn test_bad_experiment_option() {
    let dir = tempfile::tempdir().unwrap();
    let mut value = settings(dir.path(), "Example");
    value["options"]["experiment_options"] = json!({"sleep_time_ms": "soon"});
    assert_startup_failure(&value);
}

#[test]
fn test_empty_software_name() {
    let dir = tempfile::tempdir().unwrap();
    let mut value = settings(dir.path(), "Example");
    value["options"]["software_name"] = json!("");
    assert_startup_failure(&value);
}

// ============================================================================
// Backend failures
// ============================================================================

#[test]
fn test_ip_lookup_failure() {
    let dir = tempfile::tempdir().unwrap();
    let environment = TaskEnvironment::default().with_location_provider(Arc::new(BrokenLocation));
    let handle =
        start_task_with(&settings(dir.path(), "Example").to_string(), environment).unwrap();
    let events = drain(&handle);

    assert_eq!(
        compress(&keys(&events)),
        vec![
            "status.queued",
            "status.started",
            "status.progress",
            "failure.ip_lookup",
            "status.end",
            "task_terminated"
        ]
    );
    assert!(!end(&events).failure.is_empty());
}

#[test]
fn test_report_create_failure() {
    let dir = tempfile::tempdir().unwrap();
    let services = FlakyServices {
        fail_open: true,
        ..Default::default()
    };
    let environment = TaskEnvironment::default().with_services(Arc::new(services));
    let handle =
        start_task_with(&settings(dir.path(), "Example").to_string(), environment).unwrap();
    let events = drain(&handle);

    let keys = keys(&events);
    let n = keys.len();
    assert_eq!(
        &keys[n - 3..],
        &["failure.report_create", "status.end", "task_terminated"]
    );
    assert!(!keys.contains(&"status.measurement_start"));
}

#[test]
fn test_submission_failure_is_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let services = FlakyServices {
        fail_submit: true,
        ..Default::default()
    };
    let environment = TaskEnvironment::default().with_services(Arc::new(services));
    let handle =
        start_task_with(&settings(dir.path(), "Example").to_string(), environment).unwrap();
    let events = drain(&handle);

    let keys = keys(&events);
    assert!(!keys.contains(&"status.measurement_submission"));
    assert!(keys.contains(&"status.measurement_done"));
    assert!(events.iter().any(|event| matches!(
        event,
        Event::Log(record) if record.level == "WARNING" && record.message.contains("submitting")
    )));
    assert!(end(&events).failure.is_empty());
}

#[test]
fn test_save_failure_is_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"not a directory").unwrap();

    let mut value = settings(dir.path(), "ExampleWithInput");
    value["inputs"] = json!(["a", "b"]);
    value["options"]["report_file"] = json!(blocker.join("report.jsonl").to_str().unwrap());
    let events = drain(&start(&value));

    let keys = keys(&events);
    assert_eq!(measurements(&events).len(), 2);
    assert_eq!(
        keys.iter()
            .filter(|key| **key == "status.measurement_done")
            .count(),
        2
    );
    assert!(events.iter().any(|event| matches!(
        event,
        Event::Log(record) if record.level == "WARNING" && record.message.contains("saving")
    )));
    assert!(end(&events).failure.is_empty());
    assert_eq!(keys.last(), Some(&"task_terminated"));
}

// ============================================================================
// Interruption and runtime limits
// ============================================================================

#[test]
fn test_max_runtime() {
    let dir = tempfile::tempdir().unwrap();
    let mut value = settings(dir.path(), "ExampleWithInput");
    value["inputs"] = json!(["a", "b", "c"]);
    value["options"]["max_runtime"] = json!(1);
    value["options"]["experiment_options"] = json!({"sleep_time_ms": "1000"});

    let begin = Instant::now();
    let events = drain(&start(&value));
    assert!(begin.elapsed() < Duration::from_secs(10));

    let count = measurements(&events).len();
    assert!((1..3).contains(&count), "measured {} inputs", count);
    assert_eq!(keys(&events).last(), Some(&"task_terminated"));
}

#[test]
fn test_max_runtime_cancels_measurement_in_flight() {
    let dir = tempfile::tempdir().unwrap();
    let mut value = settings(dir.path(), "ExampleWithInput");
    value["inputs"] = json!(["a", "b", "c"]);
    value["options"]["max_runtime"] = json!(1);
    value["options"]["experiment_options"] = json!({"sleep_time_ms": "8000"});

    let begin = Instant::now();
    let events = drain(&start(&value));
    assert!(
        begin.elapsed() < Duration::from_secs(5),
        "took {:?}",
        begin.elapsed()
    );

    assert_eq!(measurements(&events).len(), 1);
    assert!(end(&events).failure.is_empty());
    assert_eq!(keys(&events).last(), Some(&"task_terminated"));
}

#[test]
fn test_interrupt_non_interruptible() {
    let dir = tempfile::tempdir().unwrap();
    let mut value = settings(dir.path(), "ExampleWithInputNonInterruptible");
    value["inputs"] = json!([
        "http://www.kernel.org/",
        "http://www.x.org/",
        "http://www.microsoft.com/",
        "http://www.slashdot.org/",
        "http://www.repubblica.it/",
        "http://www.google.it/",
        "http://ooni.org/"
    ]);
    value["options"]["experiment_options"] = json!({"sleep_time_ms": "500"});
    let handle = start(&value);

    let mut events = Vec::new();
    while let Some(event) = handle.wait_for_next_event() {
        if matches!(event, Event::MeasurementStart(_)) {
            handle.interrupt();
        }
        events.push(event);
    }

    assert_eq!(
        compress(&keys(&events)),
        vec![
            "status.queued",
            "status.started",
            "status.progress",
            "status.geoip_lookup",
            "status.resolver_lookup",
            "status.progress",
            "status.report_create",
            "status.measurement_start",
            "log",
            "status.progress",
            "measurement",
            "status.measurement_submission",
            "status.measurement_done",
            "status.end",
            "task_terminated"
        ]
    );
    assert_eq!(measurements(&events).len(), 1);
}

#[test]
fn test_interrupt_interruptible_still_yields_measurement() {
    let dir = tempfile::tempdir().unwrap();
    let mut value = settings(dir.path(), "ExampleWithInput");
    value["inputs"] = json!(["a", "b"]);
    value["options"]["experiment_options"] = json!({"sleep_time_ms": "60000"});
    let handle = start(&value);

    let begin = Instant::now();
    let mut events = Vec::new();
    while let Some(event) = handle.wait_for_next_event() {
        if matches!(event, Event::MeasurementStart(_)) {
            handle.interrupt();
            handle.interrupt();
        }
        events.push(event);
    }
    assert!(begin.elapsed() < Duration::from_secs(30));
    assert_eq!(measurements(&events).len(), 1);

    // Interrupting a finished task does nothing
    handle.interrupt();
    assert!(handle.is_done());
}

// ============================================================================
// Accounting, privacy, host interaction
// ============================================================================

#[test]
fn test_byte_counts() {
    let dir = tempfile::tempdir().unwrap();
    let events = drain(&start(&settings(dir.path(), "Example")));
    let end = end(&events);
    assert!(end.downloaded_kb > 0.0);
    assert!(end.uploaded_kb > 0.0);
}

#[test]
fn test_privacy_settings() {
    for mask in 0..8u8 {
        let save_asn = mask & 1 != 0;
        let save_cc = mask & 2 != 0;
        let save_ip = mask & 4 != 0;

        let dir = tempfile::tempdir().unwrap();
        let mut value = settings(dir.path(), "Example");
        value["options"]["save_real_probe_asn"] = json!(save_asn);
        value["options"]["save_real_probe_cc"] = json!(save_cc);
        value["options"]["save_real_probe_ip"] = json!(save_ip);
        let events = drain(&start(&value));

        let measured = measurements(&events);
        assert_eq!(measured.len(), 1);
        let m = &measured[0];
        assert_eq!(m["probe_asn"], if save_asn { "AS64496" } else { "AS0" });
        assert_eq!(m["probe_cc"], if save_cc { "IT" } else { "ZZ" });
        assert_eq!(m["probe_ip"], if save_ip { "203.0.113.17" } else { "127.0.0.1" });
    }
}

#[test]
fn test_nonblocking_producer() {
    let dir = tempfile::tempdir().unwrap();
    let handle = start(&settings(dir.path(), "Example"));

    // The runner finishes on its own while nobody consumes
    while handle.is_running() {
        std::thread::sleep(Duration::from_millis(50));
    }
    assert!(!handle.is_done());

    let events = drain(&handle);
    assert_eq!(keys(&events).last(), Some(&"task_terminated"));
    assert!(handle.is_done());
}

#[test]
fn test_dropped_handle_releases_runner() {
    let dir = tempfile::tempdir().unwrap();
    let mut value = settings(dir.path(), "ExampleWithInput");
    value["inputs"] = json!((0..200).map(|i| format!("input-{}", i)).collect::<Vec<_>>());
    value["options"]["experiment_options"] = json!({"sleep_time_ms": "1"});
    value["options"]["no_json"] = json!(true);

    let handle = start(&value);
    assert!(handle.wait_for_next_event().is_some());
    // Let the runner fill the queue and block on it
    std::thread::sleep(Duration::from_millis(500));
    drop(handle);

    // The session removes its temp dir once the runner winds down
    let tmp = dir.path().join("state").join("tmp");
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let released = std::fs::read_dir(&tmp)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(false);
        if released {
            break;
        }
        assert!(Instant::now() < deadline, "runner still holds its session");
        std::thread::sleep(Duration::from_millis(50));
    }
}

#[test]
fn test_event_json_shape() {
    let dir = tempfile::tempdir().unwrap();
    let handle = start(&settings(dir.path(), "Example"));

    let first: Value = serde_json::from_str(&handle.wait_for_next_event_json().unwrap()).unwrap();
    assert_eq!(first, json!({"key": "status.queued", "value": {}}));

    let mut last = None;
    while let Some(json) = handle.wait_for_next_event_json() {
        last = Some(json);
    }
    let last: Value = serde_json::from_str(&last.unwrap()).unwrap();
    assert_eq!(last["key"], "task_terminated");
}
