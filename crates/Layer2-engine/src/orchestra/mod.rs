//! Orchestra - probe registration and login
//!
//! Credentials and the login token live in the session key/value store under
//! `orchestra.state`, so a probe registers once and reuses its identity across
//! sessions.

mod http;

pub use http::HttpOrchestraApi;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use probe_foundation::storage::{get_json, set_json};
use probe_foundation::{Error, KvStore, Result};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Key/value store key holding `State`
pub const STATE_KEY: &str = "orchestra.state";

// ============================================================================
// Wire types
// ============================================================================

/// Probe description sent at registration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_bandwidth: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_type: Option<String>,
    pub platform: String,
    pub probe_asn: String,
    pub probe_cc: String,
    pub software_name: String,
    pub software_version: String,
    pub supported_tests: Vec<String>,
}

impl Metadata {
    /// Whether the metadata is complete enough to register
    ///
    /// Mobile platforms must also carry a device token.
    pub fn is_valid(&self) -> bool {
        if self.probe_cc.is_empty()
            || self.probe_asn.is_empty()
            || self.platform.is_empty()
            || self.software_name.is_empty()
            || self.software_version.is_empty()
            || self.supported_tests.is_empty()
        {
            return false;
        }
        match self.platform.as_str() {
            "ios" | "android" => self.device_token.as_deref().is_some_and(|t| !t.is_empty()),
            _ => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterRequest {
    #[serde(flatten)]
    pub metadata: Metadata,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub client_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginAuth {
    pub expire: DateTime<Utc>,
    pub token: String,
}

/// Orchestra endpoints
#[async_trait]
pub trait OrchestraApi: Send + Sync {
    async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse>;

    async fn login(&self, request: &LoginRequest) -> Result<LoginAuth>;
}

// ============================================================================
// State
// ============================================================================

/// Persisted orchestra state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub expire: Option<DateTime<Utc>>,
    #[serde(default)]
    pub token: String,
}

impl State {
    /// Login credentials, once registered
    pub fn credentials(&self) -> Option<LoginRequest> {
        if self.client_id.is_empty() || self.password.is_empty() {
            return None;
        }
        Some(LoginRequest {
            username: self.client_id.clone(),
            password: self.password.clone(),
        })
    }

    /// The token, while it is still valid
    pub fn auth(&self) -> Option<&str> {
        match self.expire {
            Some(expire) if !self.token.is_empty() && expire > Utc::now() => Some(&self.token),
            _ => None,
        }
    }
}

// ============================================================================
// Client
// ============================================================================

/// Registers and logs in at most as often as needed
pub struct OrchestraClient {
    api: Arc<dyn OrchestraApi>,
    store: Arc<dyn KvStore>,
    register_calls: AtomicU64,
    login_calls: AtomicU64,
}

impl OrchestraClient {
    pub fn new(api: Arc<dyn OrchestraApi>, store: Arc<dyn KvStore>) -> Self {
        Self {
            api,
            store,
            register_calls: AtomicU64::new(0),
            login_calls: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> Result<State> {
        Ok(get_json(self.store.as_ref(), STATE_KEY)?.unwrap_or_default())
    }

    fn save_state(&self, state: &State) -> Result<()> {
        set_json(self.store.as_ref(), STATE_KEY, state)
    }

    /// Register unless credentials are already stored
    pub async fn maybe_register(&self, metadata: &Metadata) -> Result<()> {
        if !metadata.is_valid() {
            return Err(Error::Orchestra("invalid metadata".into()));
        }
        let mut state = self.state()?;
        if state.credentials().is_some() {
            return Ok(());
        }

        let request = RegisterRequest {
            metadata: metadata.clone(),
            password: uuid::Uuid::new_v4().simple().to_string(),
        };
        self.register_calls.fetch_add(1, Ordering::Relaxed);
        let response = self.api.register(&request).await?;
        debug!(client_id = %response.client_id, "Registered with orchestra");

        state.client_id = response.client_id;
        state.password = request.password;
        self.save_state(&state)
    }

    /// Log in unless a valid token is already stored
    pub async fn maybe_login(&self) -> Result<()> {
        let mut state = self.state()?;
        if state.auth().is_some() {
            return Ok(());
        }
        let credentials = state
            .credentials()
            .ok_or_else(|| Error::Orchestra("not registered".into()))?;

        self.login_calls.fetch_add(1, Ordering::Relaxed);
        let auth = self.api.login(&credentials).await?;
        state.expire = Some(auth.expire);
        state.token = auth.token;
        self.save_state(&state)
    }

    /// Current token, if logged in
    pub fn token(&self) -> Result<Option<String>> {
        Ok(self.state()?.auth().map(str::to_string))
    }

    pub fn register_calls(&self) -> u64 {
        self.register_calls.load(Ordering::Relaxed)
    }

    pub fn login_calls(&self) -> u64 {
        self.login_calls.load(Ordering::Relaxed)
    }
}
