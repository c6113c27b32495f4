//! HTTP responder client
//!
//! Posts a JSON invocation to the responder's endpoint, or to
//! `{base_url}/responders/{key}/invoke` when the descriptor has none, and maps
//! HTTP failures onto [`ResponderError`].

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::conversation::{SessionContext, Turn};
use crate::error::{Result, SwitchboardError};
use crate::registry::ResponderRegistry;

use super::client::{ResponderClient, ResponderError};

/// HTTP client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpClientConfig {
    /// Base URL for responders without an explicit endpoint
    pub base_url: String,

    /// Timeout for one HTTP round trip
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Server error statuses treated as transient transport failures
    pub retryable_status_codes: Vec<u16>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            request_timeout: Duration::from_secs(25),
            retryable_status_codes: vec![500, 502, 503, 504],
        }
    }
}

#[derive(Serialize)]
struct InvokeRequest<'a> {
    responder_key: &'a str,
    session_id: &'a str,
    message: &'a str,
    /// Rendered conversation preamble, empty for a fresh session
    context: String,
    history: &'a [Turn],
}

#[derive(Deserialize)]
struct InvokeResponse {
    #[serde(alias = "response", alias = "text")]
    content: String,
}

/// [`ResponderClient`] speaking JSON over HTTP
#[derive(Debug, Clone)]
pub struct HttpResponderClient {
    client: reqwest::Client,
    config: HttpClientConfig,
    endpoints: HashMap<String, String>,
}

impl HttpResponderClient {
    /// Create a client.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(config: HttpClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| {
                SwitchboardError::Configuration(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            config,
            endpoints: HashMap::new(),
        })
    }

    /// Create a client using the endpoints declared in the registry
    pub fn from_registry(config: HttpClientConfig, registry: &ResponderRegistry) -> Result<Self> {
        let mut client = Self::new(config)?;
        for descriptor in registry.iter() {
            if let Some(endpoint) = &descriptor.endpoint {
                client = client.with_endpoint(&descriptor.key, endpoint);
            }
        }
        Ok(client)
    }

    /// Builder: explicit endpoint for one responder
    pub fn with_endpoint(mut self, key: impl Into<String>, url: impl Into<String>) -> Self {
        self.endpoints.insert(key.into(), url.into());
        self
    }

    /// URL invoked for `responder_key`
    pub fn endpoint_for(&self, responder_key: &str) -> String {
        match self.endpoints.get(responder_key) {
            Some(url) => url.clone(),
            None => format!(
                "{}/responders/{}/invoke",
                self.config.base_url.trim_end_matches('/'),
                responder_key
            ),
        }
    }

    fn classify_status(
        &self,
        status: u16,
        retry_after: Option<Duration>,
        body: String,
    ) -> ResponderError {
        if status == 429 {
            ResponderError::RateLimited { retry_after }
        } else if self.config.retryable_status_codes.contains(&status) {
            ResponderError::Transport(format!("HTTP {}", status))
        } else {
            ResponderError::Rejected(format!("HTTP {}: {}", status, body))
        }
    }
}

/// Parse a `Retry-After` header given in delta-seconds
fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[async_trait]
impl ResponderClient for HttpResponderClient {
    async fn invoke(
        &self,
        responder_key: &str,
        context: &SessionContext,
        message: &str,
    ) -> std::result::Result<String, ResponderError> {
        let url = self.endpoint_for(responder_key);
        let body = InvokeRequest {
            responder_key,
            session_id: &context.session_id,
            message,
            context: context.render(),
            history: &context.turns,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ResponderError::Timeout
                } else {
                    ResponderError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(parse_retry_after);
            let text = response.text().await.unwrap_or_default();
            return Err(self.classify_status(status.as_u16(), retry_after, text));
        }

        let parsed: InvokeResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                ResponderError::Timeout
            } else {
                ResponderError::Rejected(format!("Undecodable response body: {}", e))
            }
        })?;

        Ok(parsed.content)
    }
}
