//! # probe-engine
//!
//! Measurement engine used by probe tasks:
//! - `Session`: directories, key/value store, byte accounting, lookups
//! - `experiment`: registry, builder and the running `Experiment`
//! - `services`: bouncer/collector and geolocation seams
//! - `orchestra`: probe registration and login
//! - `model`: the measurement record and privacy scrubbing

pub mod bytecounter;
pub mod experiment;
pub mod model;
pub mod orchestra;
pub mod services;
pub mod session;

pub use bytecounter::ByteCounter;
pub use experiment::{
    Experiment, ExperimentBuilder, ExperimentCallbacks, ExperimentMeasurer, ExperimentSession,
    InputPolicy, OptionKind,
};
pub use model::{Location, Measurement, PrivacySettings};
pub use orchestra::{HttpOrchestraApi, Metadata, OrchestraApi, OrchestraClient};
pub use services::{
    LocalProbeServices, LocationProvider, ProbeServices, StaticLocationProvider,
};
pub use session::{Session, SessionConfig};
