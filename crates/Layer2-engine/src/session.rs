//! Measurement session
//!
//! A session owns the state shared by every experiment of a task: directories,
//! the key/value store, the byte counter, the backend list and the probe
//! location. Lookups are idempotent; once they succeed, later calls are free.

use crate::bytecounter::ByteCounter;
use crate::experiment::{self, ExperimentBuilder};
use crate::model::{Location, PrivacySettings, DEFAULT_RESOLVER_IP};
use crate::orchestra::{OrchestraApi, OrchestraClient};
use crate::services::{
    LocalProbeServices, LocationProvider, ProbeServices, Service, StaticLocationProvider,
};
use parking_lot::RwLock;
use probe_foundation::{Error, FileSystemKvStore, KvStore, Logger, Result, TracingLogger};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Everything needed to open a session
pub struct SessionConfig {
    pub assets_dir: PathBuf,
    pub state_dir: PathBuf,
    pub software_name: String,
    pub software_version: String,
    /// Policy applied to submitted and saved measurements
    pub privacy: PrivacySettings,
    /// Skip the probe geolocation; location stays at its sentinels
    pub no_geoip: bool,
    /// Skip the resolver lookup
    pub no_resolver_lookup: bool,
    pub logger: Arc<dyn Logger>,
    pub services: Arc<dyn ProbeServices>,
    pub location_provider: Arc<dyn LocationProvider>,
}

impl SessionConfig {
    pub fn new(
        assets_dir: impl Into<PathBuf>,
        state_dir: impl Into<PathBuf>,
        software_name: impl Into<String>,
        software_version: impl Into<String>,
    ) -> Self {
        Self {
            assets_dir: assets_dir.into(),
            state_dir: state_dir.into(),
            software_name: software_name.into(),
            software_version: software_version.into(),
            privacy: PrivacySettings::default(),
            no_geoip: false,
            no_resolver_lookup: false,
            logger: Arc::new(TracingLogger),
            services: Arc::new(LocalProbeServices::new()),
            location_provider: Arc::new(StaticLocationProvider::default()),
        }
    }

    pub fn with_privacy(mut self, privacy: PrivacySettings) -> Self {
        self.privacy = privacy;
        self
    }

    pub fn with_no_geoip(mut self, no_geoip: bool) -> Self {
        self.no_geoip = no_geoip;
        self
    }

    pub fn with_no_resolver_lookup(mut self, no_resolver_lookup: bool) -> Self {
        self.no_resolver_lookup = no_resolver_lookup;
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_services(mut self, services: Arc<dyn ProbeServices>) -> Self {
        self.services = services;
        self
    }

    pub fn with_location_provider(mut self, provider: Arc<dyn LocationProvider>) -> Self {
        self.location_provider = provider;
        self
    }
}

/// Shared measurement state
pub struct Session {
    assets_dir: PathBuf,
    state_dir: PathBuf,
    temp_dir: PathBuf,
    software_name: String,
    software_version: String,
    privacy: PrivacySettings,
    no_geoip: bool,
    no_resolver_lookup: bool,
    logger: Arc<dyn Logger>,
    services: Arc<dyn ProbeServices>,
    location_provider: Arc<dyn LocationProvider>,
    kvstore: Arc<dyn KvStore>,
    byte_counter: Arc<ByteCounter>,
    backends: RwLock<Option<Vec<Service>>>,
    location: RwLock<Option<Location>>,
}

impl Session {
    /// Validate the configuration and prepare the state directories
    pub fn new(config: SessionConfig) -> Result<Self> {
        if config.software_name.is_empty() {
            return Err(Error::Session("software name is empty".into()));
        }
        if config.software_version.is_empty() {
            return Err(Error::Session("software version is empty".into()));
        }
        if config.assets_dir.as_os_str().is_empty() {
            return Err(Error::Session("assets directory is empty".into()));
        }
        if config.state_dir.as_os_str().is_empty() {
            return Err(Error::Session("state directory is empty".into()));
        }

        std::fs::create_dir_all(&config.assets_dir).map_err(|e| {
            Error::Session(format!(
                "cannot create {}: {}",
                config.assets_dir.display(),
                e
            ))
        })?;

        let kvstore: Arc<dyn KvStore> =
            Arc::new(FileSystemKvStore::new(config.state_dir.join("kvstore2"))?);

        let temp_dir = config
            .state_dir
            .join("tmp")
            .join(uuid::Uuid::new_v4().simple().to_string());
        std::fs::create_dir_all(&temp_dir).map_err(|e| {
            Error::Session(format!("cannot create {}: {}", temp_dir.display(), e))
        })?;

        debug!(
            software = %config.software_name,
            version = %config.software_version,
            state_dir = %config.state_dir.display(),
            "Session created"
        );

        Ok(Self {
            assets_dir: config.assets_dir,
            state_dir: config.state_dir,
            temp_dir,
            software_name: config.software_name,
            software_version: config.software_version,
            privacy: config.privacy,
            no_geoip: config.no_geoip,
            no_resolver_lookup: config.no_resolver_lookup,
            logger: config.logger,
            services: config.services,
            location_provider: config.location_provider,
            kvstore,
            byte_counter: Arc::new(ByteCounter::new()),
            backends: RwLock::new(None),
            location: RwLock::new(None),
        })
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    /// Discover backends unless already known
    pub async fn maybe_lookup_backends(&self) -> Result<()> {
        if self.backends.read().is_some() {
            return Ok(());
        }
        self.logger.debug("looking up backends");
        let services = self
            .services
            .lookup_backends(&self.byte_counter)
            .await
            .map_err(|e| Error::Backend(e.to_string()))?;
        if services.is_empty() {
            return Err(Error::Backend("no available backends".into()));
        }
        *self.backends.write() = Some(services);
        Ok(())
    }

    /// Geolocate the probe and its resolver unless already done
    pub async fn maybe_lookup_location(&self) -> Result<()> {
        if self.location.read().is_some() {
            return Ok(());
        }

        let mut location = Location::unknown();
        if !self.no_geoip {
            self.logger.debug("looking up probe location");
            let probe = self
                .location_provider
                .lookup_probe(&self.byte_counter)
                .await
                .map_err(|e| Error::Location(e.to_string()))?;
            location.probe_ip = probe.probe_ip;
            location.probe_asn = probe.probe_asn;
            location.probe_cc = probe.probe_cc;
            location.probe_network_name = probe.probe_network_name;
        }

        if self.no_resolver_lookup {
            location.resolver_ip = DEFAULT_RESOLVER_IP.to_string();
            location.resolver_asn = 0;
        } else {
            self.logger.debug("looking up resolver");
            let resolver = self
                .location_provider
                .lookup_resolver(&self.byte_counter)
                .await
                .map_err(|e| Error::Location(e.to_string()))?;
            location.resolver_ip = resolver.ip;
            location.resolver_asn = resolver.asn;
            location.resolver_network_name = resolver.network_name;
        }

        *self.location.write() = Some(location);
        Ok(())
    }

    /// Current location; sentinels until a lookup succeeded
    pub fn location(&self) -> Location {
        self.location.read().clone().unwrap_or_default()
    }

    pub fn backends(&self) -> Vec<Service> {
        self.backends.read().clone().unwrap_or_default()
    }

    // ========================================================================
    // Experiments
    // ========================================================================

    pub fn new_experiment_builder(self: &Arc<Self>, name: &str) -> Result<ExperimentBuilder> {
        let spec = experiment::lookup(name)
            .ok_or_else(|| Error::UnknownExperiment(name.to_string()))?;
        Ok(ExperimentBuilder::new(Arc::clone(self), spec))
    }

    pub fn new_orchestra_client(&self, api: Arc<dyn OrchestraApi>) -> OrchestraClient {
        OrchestraClient::new(api, Arc::clone(&self.kvstore))
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn assets_dir(&self) -> &Path {
        &self.assets_dir
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// Per-session scratch directory, removed when the session is dropped
    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    pub fn software_name(&self) -> &str {
        &self.software_name
    }

    pub fn software_version(&self) -> &str {
        &self.software_version
    }

    pub fn privacy(&self) -> PrivacySettings {
        self.privacy
    }

    pub fn logger(&self) -> &Arc<dyn Logger> {
        &self.logger
    }

    pub fn services(&self) -> &Arc<dyn ProbeServices> {
        &self.services
    }

    pub fn byte_counter(&self) -> &Arc<ByteCounter> {
        &self.byte_counter
    }

    pub fn kibibytes_received(&self) -> f64 {
        self.byte_counter.kibibytes_received()
    }

    pub fn kibibytes_sent(&self) -> f64 {
        self.byte_counter.kibibytes_sent()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.temp_dir) {
            debug!(path = %self.temp_dir.display(), error = %e, "Failed to remove temp dir");
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("software_name", &self.software_name)
            .field("software_version", &self.software_version)
            .field("state_dir", &self.state_dir)
            .finish_non_exhaustive()
    }
}
