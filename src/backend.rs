//! Generation/scoring backend protocol.
//!
//! Both the rephrase client and the evaluator speak the same wire shape to
//! the same backend: a POST whose body carries the model id, a prompt,
//! `stream: false`, an optional structured-output flag, and the sampling
//! options. The response envelope holds the payload in its `response` field
//! — free text for a rewrite, a JSON-encoded object for a scoring request.
//!
//! The [`Generator`] trait is the seam between the pipeline and the network:
//! production code uses [`HttpBackend`], tests script arbitrary response
//! sequences without a server. Retry policy deliberately does NOT live here
//! — one call is one request; the rephrase client and the evaluator each own
//! their transport-retry loop.

use crate::config::RunConfig;
use crate::error::{BackendError, PipelineError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Environment variable consulted for the endpoint when the config does not
/// set one.
pub const ENDPOINT_ENV: &str = "REPHRASE_API_URL";

/// Sampling options forwarded with every request.
#[derive(Debug, Clone, Serialize)]
pub struct GenerateOptions {
    pub temperature: f32,
    pub max_tokens: usize,
}

/// One generation request, as serialised onto the wire.
#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest<'a> {
    pub model: &'a str,
    pub prompt: &'a str,
    pub stream: bool,
    /// `Some("json")` for scoring requests; omitted entirely otherwise.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<&'a str>,
    pub options: GenerateOptions,
}

/// The backend's response envelope. Fields other than the payload are
/// ignored.
#[derive(Debug, Deserialize)]
pub struct GenerateResponse {
    pub response: String,
}

/// A text-generation backend capable of answering one prompt.
///
/// `structured` asks the backend to constrain its output to JSON; the
/// returned string is the raw envelope payload either way.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str, structured: bool) -> Result<String, BackendError>;
}

/// HTTP implementation of [`Generator`] over the documented protocol.
#[derive(Debug)]
pub struct HttpBackend {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    options: GenerateOptions,
}

impl HttpBackend {
    /// Build a backend from the run configuration.
    ///
    /// Endpoint resolution: the `endpoint` config key wins; otherwise the
    /// `REPHRASE_API_URL` environment variable. Neither set is a fatal
    /// configuration error — it aborts the run before any chunk work.
    pub fn new(config: &RunConfig) -> Result<Self, PipelineError> {
        let endpoint = match config.endpoint.clone() {
            Some(url) if !url.is_empty() => url,
            _ => std::env::var(ENDPOINT_ENV)
                .ok()
                .filter(|v| !v.is_empty())
                .ok_or(PipelineError::EndpointMissing { var: ENDPOINT_ENV })?,
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| PipelineError::Internal(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            model: config.model_name.clone(),
            options: GenerateOptions {
                temperature: config.temperature,
                max_tokens: config.max_tokens,
            },
        })
    }
}

#[async_trait]
impl Generator for HttpBackend {
    async fn generate(&self, prompt: &str, structured: bool) -> Result<String, BackendError> {
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            format: structured.then_some("json"),
            options: self.options.clone(),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| BackendError::Unreachable {
                detail: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
            });
        }

        let envelope: GenerateResponse =
            response.json().await.map_err(|e| BackendError::Envelope {
                detail: e.to_string(),
            })?;

        debug!(
            payload_len = envelope.response.len(),
            structured, "backend responded"
        );

        Ok(envelope.response)
    }
}
