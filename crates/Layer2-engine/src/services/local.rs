//! In-process backends
//!
//! `LocalProbeServices` keeps reports in memory and `StaticLocationProvider`
//! answers with a fixed location. Traffic is simulated by charging the
//! encoded size of each exchange.

use super::{charge_exchange, LocationProvider, ProbeServices, ReportTemplate, ResolverInfo, Service};
use crate::bytecounter::ByteCounter;
use crate::model::{asn_string, Location, Measurement};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use probe_foundation::{Error, Result};
use serde_json::json;
use std::collections::HashMap;

// ============================================================================
// Probe services
// ============================================================================

#[derive(Debug, Default)]
struct LocalReport {
    closed: bool,
    measurements: Vec<Measurement>,
}

/// Bouncer and collector living in memory
#[derive(Debug)]
pub struct LocalProbeServices {
    address: String,
    reports: RwLock<HashMap<String, LocalReport>>,
}

impl LocalProbeServices {
    pub fn new() -> Self {
        Self {
            address: "local://collector".to_string(),
            reports: RwLock::new(HashMap::new()),
        }
    }

    /// Measurements submitted to a report
    pub fn measurements(&self, report_id: &str) -> Vec<Measurement> {
        self.reports
            .read()
            .get(report_id)
            .map(|r| r.measurements.clone())
            .unwrap_or_default()
    }

    pub fn is_closed(&self, report_id: &str) -> bool {
        self.reports.read().get(report_id).is_some_and(|r| r.closed)
    }

    pub fn report_count(&self) -> usize {
        self.reports.read().len()
    }
}

impl Default for LocalProbeServices {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProbeServices for LocalProbeServices {
    async fn lookup_backends(&self, counter: &ByteCounter) -> Result<Vec<Service>> {
        let services = vec![Service {
            address: self.address.clone(),
            kind: "https".to_string(),
        }];
        charge_exchange(counter, &json!({"net-tests": []}), &services);
        Ok(services)
    }

    async fn open_report(&self, template: &ReportTemplate, counter: &ByteCounter) -> Result<String> {
        let asn = template.probe_asn.trim_start_matches("AS");
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let report_id = format!(
            "{}_{}_{}_{}_n1_{}",
            Utc::now().format("%Y%m%dT%H%M%SZ"),
            template.test_name,
            template.probe_cc,
            asn,
            &nonce[..16]
        );
        self.reports
            .write()
            .insert(report_id.clone(), LocalReport::default());
        charge_exchange(counter, template, &json!({ "report_id": report_id }));
        Ok(report_id)
    }

    async fn submit(
        &self,
        report_id: &str,
        measurement: &Measurement,
        counter: &ByteCounter,
    ) -> Result<()> {
        let mut reports = self.reports.write();
        let report = reports
            .get_mut(report_id)
            .ok_or_else(|| Error::Collector(format!("unknown report: {}", report_id)))?;
        if report.closed {
            return Err(Error::Collector(format!("report is closed: {}", report_id)));
        }
        report.measurements.push(measurement.clone());
        charge_exchange(
            counter,
            &json!({ "format": "json", "content": measurement }),
            &json!({ "measurement_id": report.measurements.len() }),
        );
        Ok(())
    }

    async fn close_report(&self, report_id: &str, counter: &ByteCounter) -> Result<()> {
        let mut reports = self.reports.write();
        let report = reports
            .get_mut(report_id)
            .ok_or_else(|| Error::Collector(format!("unknown report: {}", report_id)))?;
        report.closed = true;
        charge_exchange(counter, &json!({ "report_id": report_id }), &json!({}));
        Ok(())
    }
}

// ============================================================================
// Location
// ============================================================================

/// Fixed location
#[derive(Debug, Clone)]
pub struct StaticLocationProvider {
    location: Location,
}

impl StaticLocationProvider {
    pub fn new(location: Location) -> Self {
        Self { location }
    }
}

impl Default for StaticLocationProvider {
    fn default() -> Self {
        Self::new(Location {
            probe_ip: "203.0.113.17".to_string(),
            probe_asn: 64496,
            probe_cc: "IT".to_string(),
            probe_network_name: "Example Network".to_string(),
            resolver_ip: "198.51.100.53".to_string(),
            resolver_asn: 64497,
            resolver_network_name: "Example Resolver Network".to_string(),
        })
    }
}

#[async_trait]
impl LocationProvider for StaticLocationProvider {
    async fn lookup_probe(&self, counter: &ByteCounter) -> Result<Location> {
        charge_exchange(
            counter,
            &json!({ "lookup": "probe" }),
            &json!({
                "ip": self.location.probe_ip,
                "asn": asn_string(self.location.probe_asn),
                "cc": self.location.probe_cc,
                "network_name": self.location.probe_network_name,
            }),
        );
        Ok(self.location.clone())
    }

    async fn lookup_resolver(&self, counter: &ByteCounter) -> Result<ResolverInfo> {
        let info = ResolverInfo {
            ip: self.location.resolver_ip.clone(),
            asn: self.location.resolver_asn,
            network_name: self.location.resolver_network_name.clone(),
        };
        charge_exchange(counter, &json!({ "lookup": "resolver" }), &info);
        Ok(info)
    }
}
