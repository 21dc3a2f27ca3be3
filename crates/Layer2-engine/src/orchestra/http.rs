//! Orchestra over HTTP

use super::{LoginAuth, LoginRequest, OrchestraApi, RegisterRequest, RegisterResponse};
use async_trait::async_trait;
use probe_foundation::Result;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// JSON client for `/api/v1/register` and `/api/v1/login`
#[derive(Debug, Clone)]
pub struct HttpOrchestraApi {
    base_url: String,
    client: reqwest::Client,
}

impl HttpOrchestraApi {
    pub fn new(base_url: impl Into<String>, user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post<Req: Serialize + Sync, Resp: DeserializeOwned + Send>(
        &self,
        path: &str,
        body: &Req,
    ) -> Result<Resp> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl OrchestraApi for HttpOrchestraApi {
    async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse> {
        self.post("/api/v1/register", request).await
    }

    async fn login(&self, request: &LoginRequest) -> Result<LoginAuth> {
        self.post("/api/v1/login", request).await
    }
}
