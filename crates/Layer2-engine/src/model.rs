//! Measurement data model
//!
//! `Measurement` follows the probe data format (version 0.2.0). Location
//! fields are filled from the session; `PrivacySettings` replaces them with
//! sentinel values before a measurement leaves the process.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// Constants
// ============================================================================

/// Data format version written into every measurement
pub const DATA_FORMAT_VERSION: &str = "0.2.0";

/// Timestamp layout used by measurement time fields (UTC)
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Probe IP when unknown or withheld
pub const DEFAULT_PROBE_IP: &str = "127.0.0.1";

/// Probe ASN when unknown or withheld
pub const DEFAULT_PROBE_ASN: u32 = 0;

/// Probe country when unknown or withheld
pub const DEFAULT_PROBE_CC: &str = "ZZ";

/// Resolver IP when the lookup is skipped
pub const DEFAULT_RESOLVER_IP: &str = "127.0.0.2";

/// Replacement for the probe IP inside measurement bodies
pub const SCRUBBED: &str = "[scrubbed]";

/// Format a time the way measurement fields expect it
pub fn format_timestamp(time: DateTime<Utc>) -> String {
    time.format(TIMESTAMP_FORMAT).to_string()
}

/// `AS<number>` notation
pub fn asn_string(asn: u32) -> String {
    format!("AS{}", asn)
}

// ============================================================================
// Location
// ============================================================================

/// Where the probe (and its DNS resolver) appear to be
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub probe_ip: String,
    pub probe_asn: u32,
    pub probe_cc: String,
    pub probe_network_name: String,
    pub resolver_ip: String,
    pub resolver_asn: u32,
    pub resolver_network_name: String,
}

impl Location {
    /// Location with every field set to its sentinel
    pub fn unknown() -> Self {
        Self {
            probe_ip: DEFAULT_PROBE_IP.to_string(),
            probe_asn: DEFAULT_PROBE_ASN,
            probe_cc: DEFAULT_PROBE_CC.to_string(),
            probe_network_name: String::new(),
            resolver_ip: DEFAULT_RESOLVER_IP.to_string(),
            resolver_asn: 0,
            resolver_network_name: String::new(),
        }
    }

    pub fn probe_asn_string(&self) -> String {
        asn_string(self.probe_asn)
    }

    pub fn resolver_asn_string(&self) -> String {
        asn_string(self.resolver_asn)
    }
}

impl Default for Location {
    fn default() -> Self {
        Self::unknown()
    }
}

// ============================================================================
// Measurement
// ============================================================================

/// One measurement record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    pub data_format_version: String,

    /// Set when the experiment itself failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,

    pub input: Option<String>,

    pub measurement_start_time: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,

    pub probe_asn: String,
    pub probe_cc: String,
    pub probe_ip: String,
    pub probe_network_name: String,

    pub report_id: String,

    pub resolver_asn: String,
    pub resolver_ip: String,
    pub resolver_network_name: String,

    pub software_name: String,
    pub software_version: String,

    pub test_keys: serde_json::Value,
    pub test_name: String,
    pub test_runtime: f64,
    pub test_start_time: String,
    pub test_version: String,
}

impl Measurement {
    pub fn add_annotation(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.annotations.insert(key.into(), value.into());
    }

    pub fn add_annotations(&mut self, annotations: &BTreeMap<String, String>) {
        for (key, value) in annotations {
            self.annotations.insert(key.clone(), value.clone());
        }
    }
}

// ============================================================================
// Privacy
// ============================================================================

/// Which location fields may leave the process unmodified
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivacySettings {
    pub include_asn: bool,
    pub include_country: bool,
    pub include_ip: bool,
}

impl PrivacySettings {
    /// Replace withheld fields with their sentinels
    ///
    /// A withheld probe IP is also scrubbed from the test keys.
    pub fn apply(&self, measurement: &mut Measurement) {
        if !self.include_asn {
            measurement.probe_asn = asn_string(DEFAULT_PROBE_ASN);
        }
        if !self.include_country {
            measurement.probe_cc = DEFAULT_PROBE_CC.to_string();
        }
        if !self.include_ip {
            let real_ip = std::mem::replace(&mut measurement.probe_ip, DEFAULT_PROBE_IP.to_string());
            if !real_ip.is_empty() && real_ip != DEFAULT_PROBE_IP {
                scrub_value(&mut measurement.test_keys, &real_ip);
            }
        }
    }
}

fn scrub_value(value: &mut serde_json::Value, needle: &str) {
    match value {
        serde_json::Value::String(s) => {
            if s.contains(needle) {
                *s = s.replace(needle, SCRUBBED);
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                scrub_value(item, needle);
            }
        }
        serde_json::Value::Object(map) => {
            for item in map.values_mut() {
                scrub_value(item, needle);
            }
        }
        _ => {}
    }
}
