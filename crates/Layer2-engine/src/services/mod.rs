//! Backend services
//!
//! The engine talks to two collaborators: the probe services (bouncer and
//! collector) and a location provider. Both are traits so hosts can plug in
//! real network clients; `local` has in-process implementations.

mod local;

pub use local::{LocalProbeServices, StaticLocationProvider};

use crate::bytecounter::ByteCounter;
use crate::model::{Location, Measurement};
use async_trait::async_trait;
use probe_foundation::Result;
use serde::{Deserialize, Serialize};

/// A backend endpoint returned by the bouncer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub address: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Fields that identify a report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportTemplate {
    pub data_format_version: String,
    pub format: String,
    pub probe_asn: String,
    pub probe_cc: String,
    pub software_name: String,
    pub software_version: String,
    pub test_name: String,
    pub test_start_time: String,
    pub test_version: String,
}

/// Where the resolver appears to be
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverInfo {
    pub ip: String,
    pub asn: u32,
    pub network_name: String,
}

/// Bouncer and collector
///
/// Every call charges the bytes it moves to `counter`.
#[async_trait]
pub trait ProbeServices: Send + Sync {
    async fn lookup_backends(&self, counter: &ByteCounter) -> Result<Vec<Service>>;

    /// Open a report and return its id
    async fn open_report(&self, template: &ReportTemplate, counter: &ByteCounter) -> Result<String>;

    async fn submit(
        &self,
        report_id: &str,
        measurement: &Measurement,
        counter: &ByteCounter,
    ) -> Result<()>;

    async fn close_report(&self, report_id: &str, counter: &ByteCounter) -> Result<()>;
}

/// Geolocation
#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// Probe IP, ASN, country and network; resolver fields are ignored
    async fn lookup_probe(&self, counter: &ByteCounter) -> Result<Location>;

    async fn lookup_resolver(&self, counter: &ByteCounter) -> Result<ResolverInfo>;
}

/// Charge the encoded size of a request/response exchange
pub(crate) fn charge_exchange<Req: Serialize, Resp: Serialize>(
    counter: &ByteCounter,
    request: &Req,
    response: &Resp,
) {
    let sent = serde_json::to_vec(request).map(|v| v.len()).unwrap_or(0);
    let received = serde_json::to_vec(response).map(|v| v.len()).unwrap_or(0);
    counter.count_sent(sent as u64);
    counter.count_received(received as u64);
}
