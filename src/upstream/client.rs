//! HTTP client for the vendor API.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::payload::ChatPayload;
use crate::config::{ConfigError, UpstreamConfig};
use crate::error::{Error, Result};
use crate::proxy::types::ModelObject;

const MODEL_LIST_PATH: &str = "/api/ide/v1/model_list?type=llm_raw_chat";
const CHAT_PATH: &str = "/api/ide/v1/chat";

/// IDE token relayed from the client's bearer header.
///
/// Redacted in Debug/Display; only [`expose_secret`](Self::expose_secret)
/// reveals it.
#[derive(Clone)]
pub struct IdeToken(SecretString);

impl IdeToken {
    /// Take the token from an `Authorization` header value.
    ///
    /// The `Bearer ` prefix is stripped when present; anything else is relayed as-is.
    pub fn from_authorization(value: &str) -> Self {
        let token = value.strip_prefix("Bearer ").unwrap_or(value);
        IdeToken(SecretString::from(token))
    }

    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for IdeToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl std::fmt::Display for IdeToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

#[derive(Debug, Deserialize)]
struct ModelListResponse {
    #[serde(default)]
    model_configs: Vec<ModelConfig>,
}

#[derive(Debug, Deserialize)]
struct ModelConfig {
    name: String,
}

/// Vendor API client. Cheap to clone; clones share one connection pool.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    config: UpstreamConfig,
}

impl UpstreamClient {
    /// Build a client with a pooled transport.
    ///
    /// Only connecting is timed out: streamed answers may stay open for
    /// as long as the caller keeps the request alive.
    pub fn new(config: UpstreamConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(30))
            .build()?;

        Ok(Self { http, config })
    }

    /// Use an existing reqwest client.
    pub fn with_http_client(http: reqwest::Client, config: UpstreamConfig) -> Self {
        Self { http, config }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Headers the vendor requires on every call.
    ///
    /// A bad identity value is an operator error and maps to a config error;
    /// a bad token is the caller's.
    pub fn headers(&self, token: &IdeToken) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        for (name, value) in self.config.identity_headers() {
            let value = HeaderValue::from_str(value).map_err(|_| {
                ConfigError::Validation(format!("Value for header '{}' is not valid", name))
            })?;
            headers.insert(HeaderName::from_static(name), value);
        }

        let token = HeaderValue::from_str(token.expose_secret()).map_err(|_| {
            Error::InvalidRequest("Authorization token is not a valid header value".to_string())
        })?;
        headers.insert(HeaderName::from_static("x-ide-token"), token);

        Ok(headers)
    }

    /// Fetch the vendor's model list.
    pub async fn list_models(&self, token: &IdeToken) -> Result<Vec<ModelObject>> {
        let response = self
            .http
            .get(self.url(MODEL_LIST_PATH))
            .headers(self.headers(token)?)
            .send()
            .await
            .inspect_err(|e| tracing::error!(error = %e, "Failed to reach upstream"))?;

        let response = ensure_success(response).await?;
        let list: ModelListResponse = response.json().await?;

        Ok(list
            .model_configs
            .into_iter()
            .map(|m| ModelObject::new(m.name, self.config.owned_by.clone()))
            .collect())
    }

    /// Start a chat call. The returned response has a 2xx status and an unread body.
    pub async fn chat(&self, token: &IdeToken, payload: &ChatPayload) -> Result<reqwest::Response> {
        tracing::debug!(
            conversation_id = %payload.conversation_id,
            current_turn = payload.current_turn,
            history = payload.chat_history.len(),
            "Sending chat request upstream"
        );

        let response = self
            .http
            .post(self.url(CHAT_PATH))
            .headers(self.headers(token)?)
            .json(payload)
            .send()
            .await
            .inspect_err(|e| tracing::error!(error = %e, "Failed to reach upstream"))?;

        ensure_success(response).await
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    tracing::error!(status = %status, body = %body, "Upstream returned error");
    Err(Error::UpstreamRejected {
        status: status.as_u16(),
        body: if body.is_empty() {
            status.to_string()
        } else {
            body
        },
    })
}
