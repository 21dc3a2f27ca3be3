//! Task identity and collaborators

use probe_engine::{LocalProbeServices, LocationProvider, ProbeServices, StaticLocationProvider};
use std::sync::Arc;
use uuid::Uuid;

/// Unique identifier for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Generate a new random TaskId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// External services a task talks to
#[derive(Clone)]
pub struct TaskEnvironment {
    pub services: Arc<dyn ProbeServices>,
    pub location_provider: Arc<dyn LocationProvider>,
}

impl TaskEnvironment {
    pub fn new(
        services: Arc<dyn ProbeServices>,
        location_provider: Arc<dyn LocationProvider>,
    ) -> Self {
        Self {
            services,
            location_provider,
        }
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

/// In-process backends
impl Default for TaskEnvironment {
    fn default() -> Self {
        Self::new(
            Arc::new(LocalProbeServices::new()),
            Arc::new(StaticLocationProvider::default()),
        )
    }
}
