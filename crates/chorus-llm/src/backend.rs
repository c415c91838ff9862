use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, instrument};

use chorus_core::errors::GatewayError;
use chorus_core::ids::ParticipantId;
use chorus_core::provider::{
    ByteStream, PersonaClient, PersonaRequest, ScheduleRequest, ScheduleResponse, Scheduler,
};

const SCHEDULER_PATH: &str = "/api/scheduler";
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection settings for the chat backend.
#[derive(Clone, Debug)]
pub struct BackendConfig {
    pub base_url: String,
    pub api_token: Option<SecretString>,
    pub connect_timeout: Duration,
}

impl BackendConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_token: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// HTTP client for the chat backend. Serves both the persona stream routes and
/// the scheduler route.
///
/// No total request timeout is set: persona streams may legitimately run for
/// minutes. Silence is bounded per read by the turn executor instead.
#[derive(Clone, Debug)]
pub struct ChatBackend {
    client: Client,
    base_url: String,
    api_token: Option<SecretString>,
}

impl ChatBackend {
    pub fn new(config: BackendConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| GatewayError::InvalidRequest(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_token: config.api_token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn post(&self, path: &str) -> RequestBuilder {
        let mut req = self.client.post(format!("{}{}", self.base_url, path));
        if let Some(token) = &self.api_token {
            req = req.bearer_auth(token.expose_secret());
        }
        req.header("content-type", "application/json")
    }

    async fn send(req: RequestBuilder) -> Result<Response, GatewayError> {
        let resp = req
            .send()
            .await
            .map_err(|e| GatewayError::NetworkError(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::from_status(status, body));
        }
        Ok(resp)
    }
}

#[async_trait]
impl PersonaClient for ChatBackend {
    #[instrument(skip(self, request), fields(persona = %request.ai_name, index = request.index))]
    async fn open(&self, request: &PersonaRequest) -> Result<ByteStream, GatewayError> {
        let path = request.endpoint().path();
        debug!(path, history = request.history.len(), "opening persona stream");

        let resp = Self::send(self.post(path).json(request)).await?;
        let stream = resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| GatewayError::StreamInterrupted(e.to_string())));
        Ok(Box::pin(stream))
    }
}

#[async_trait]
impl Scheduler for ChatBackend {
    #[instrument(skip(self, request), fields(available = request.available.len()))]
    async fn select(&self, request: &ScheduleRequest) -> Result<Vec<ParticipantId>, GatewayError> {
        let resp = Self::send(self.post(SCHEDULER_PATH).json(request)).await?;
        let body: ScheduleResponse = resp
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        debug!(selected = body.selected.len(), "scheduler answered");
        Ok(body.selected)
    }
}
