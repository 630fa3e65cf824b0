//! Client for the queue-based AI generation provider.
//!
//! Generations are submitted to a queue and polled until complete:
//!
//! ```text
//! POST {base}/queue/{model}                        -> {"request_id": "..."}
//! GET  {base}/queue/{model}/requests/{id}/status   -> {"status": "IN_QUEUE", "queue_position": 2}
//! GET  {base}/queue/{model}/requests/{id}          -> model output
//! POST {base}/run/{model}                          -> model output (synchronous)
//! ```
//!
//! Every request carries `Authorization: Key <api key>`.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::retry::Retryable;

/// Errors that can occur when talking to the generation provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider base URL provided by configuration is invalid.
    #[error("invalid provider URL: {0}")]
    InvalidUrl(String),
    /// HTTP layer failed (connection, timeout, etc.).
    #[error("provider HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The provider answered with a 5xx status.
    #[error("provider server error {status}: {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Response body.
        message: String,
    },
    /// The API key was missing or rejected.
    #[error("provider rejected credentials: {0}")]
    Unauthorized(String),
    /// The provider refused the input.
    #[error("provider rejected request: {0}")]
    InvalidRequest(String),
    /// Too many requests.
    #[error("provider rate limit exceeded")]
    RateLimited {
        /// Seconds to wait, when the provider says.
        retry_after: Option<u64>,
    },
    /// The generation itself failed at the provider.
    #[error("generation failed: {0}")]
    GenerationFailed(String),
    /// The response did not match the expected structure.
    #[error("unexpected provider response: {0}")]
    UnexpectedResponse(String),
    /// The generation did not finish in time.
    #[error("generation timed out after {0}s")]
    Timeout(u64),
}

impl ProviderError {
    /// Message suitable for showing to the user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::RateLimited { retry_after } => {
                let wait = retry_after.map_or_else(
                    || "a minute".to_string(),
                    |secs| format!("{secs} seconds"),
                );
                format!(
                    "The generation service is receiving too many requests. Please wait {wait} and try again."
                )
            }
            Self::Unauthorized(_) => {
                "The generation service rejected our credentials. Please contact support.".into()
            }
            Self::InvalidRequest(message) => format!("The request was rejected: {message}"),
            Self::GenerationFailed(message) => format!("Generation failed: {message}"),
            Self::Timeout(_) => "Generation took too long and was cancelled.".into(),
            Self::InvalidUrl(_)
            | Self::Http(_)
            | Self::Server { .. }
            | Self::UnexpectedResponse(_) => {
                "The generation service is unavailable right now. Please try again later.".into()
            }
        }
    }
}

impl Retryable for ProviderError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Server { .. })
    }
}

/// Queue state of a submitted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueStatus {
    /// Waiting in the provider queue.
    InQueue {
        /// Position, when reported.
        #[serde(default)]
        queue_position: Option<u32>,
    },
    /// Being processed.
    InProgress,
    /// Output is ready.
    Completed,
}

/// One generated media file from a provider response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedMedia {
    /// Download URL.
    pub url: String,
    /// Pixel width, when reported.
    #[serde(default)]
    pub width: Option<u32>,
    /// Pixel height, when reported.
    #[serde(default)]
    pub height: Option<u32>,
    /// MIME type, when reported.
    #[serde(default)]
    pub content_type: Option<String>,
    /// Size in bytes, when reported.
    #[serde(default)]
    pub file_size: Option<u64>,
    /// Clip length in seconds (videos).
    #[serde(default)]
    pub duration: Option<f64>,
}

/// Extract the images from an image model result (`{"images": [...]}`).
///
/// # Errors
///
/// Returns [`ProviderError::UnexpectedResponse`] if no image is present.
pub fn parse_images(output: &Value) -> Result<Vec<GeneratedMedia>, ProviderError> {
    let images = output
        .get("images")
        .cloned()
        .ok_or_else(|| ProviderError::UnexpectedResponse("missing images".into()))?;
    let images: Vec<GeneratedMedia> = serde_json::from_value(images)
        .map_err(|e| ProviderError::UnexpectedResponse(e.to_string()))?;
    if images.is_empty() {
        return Err(ProviderError::UnexpectedResponse("empty images".into()));
    }
    Ok(images)
}

/// Extract the clip from a video model result (`{"video": {...}}`).
///
/// # Errors
///
/// Returns [`ProviderError::UnexpectedResponse`] if no video is present.
pub fn parse_video(output: &Value) -> Result<GeneratedMedia, ProviderError> {
    let video = output
        .get("video")
        .cloned()
        .ok_or_else(|| ProviderError::UnexpectedResponse("missing video".into()))?;
    serde_json::from_value(video).map_err(|e| ProviderError::UnexpectedResponse(e.to_string()))
}

/// Extract the text of a structured-prompt analysis (`{"output": "..."}`).
///
/// # Errors
///
/// Returns [`ProviderError::UnexpectedResponse`] if no text is present.
pub fn parse_text(output: &Value) -> Result<String, ProviderError> {
    output
        .get("output")
        .or_else(|| output.get("prompt"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ProviderError::UnexpectedResponse("missing output text".into()))
}

/// Operations the orchestrator needs from a generation provider.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Queue a request, returning its request ID.
    async fn submit(&self, model: &str, input: &Value) -> Result<String, ProviderError>;
    /// Current queue state of a request.
    async fn status(&self, model: &str, request_id: &str) -> Result<QueueStatus, ProviderError>;
    /// Output of a completed request.
    async fn result(&self, model: &str, request_id: &str) -> Result<Value, ProviderError>;
    /// Run a model synchronously.
    async fn run(&self, model: &str, input: &Value) -> Result<Value, ProviderError>;
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    request_id: String,
}

/// HTTP client for the provider queue API.
#[derive(Debug, Clone)]
pub struct ProviderClient {
    http: Client,
    base: Url,
    api_key: Option<String>,
}

impl ProviderClient {
    /// Create a client for `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::InvalidUrl`] if the URL is malformed.
    /// Returns [`ProviderError::Http`] if the HTTP client fails to build.
    pub fn new(base_url: impl AsRef<str>, api_key: Option<String>) -> Result<Self, ProviderError> {
        let base = Url::parse(base_url.as_ref())
            .map_err(|e| ProviderError::InvalidUrl(e.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(ProviderError::InvalidUrl(base.to_string()));
        }
        let http = Client::builder()
            .user_agent(concat!("kanvas/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base,
            api_key,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ProviderError> {
        let mut url = self.base.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|()| ProviderError::InvalidUrl(self.base.to_string()))?;
            path.pop_if_empty();
            for segment in segments {
                // Model IDs such as "vendor/model/variant" span several segments.
                path.extend(segment.split('/').filter(|s| !s.is_empty()));
            }
        }
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header(reqwest::header::AUTHORIZATION, format!("Key {key}")),
            None => request,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, ProviderError> {
        let response = self.authorize(request).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        let body = response.text().await.unwrap_or_default();
        Err(map_status(status, body, retry_after))
    }
}

/// Map a non-success HTTP status to a provider error.
fn map_status(status: StatusCode, body: String, retry_after: Option<u64>) -> ProviderError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Unauthorized(body),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            ProviderError::InvalidRequest(body)
        }
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited { retry_after },
        s if s.is_server_error() => ProviderError::Server {
            status: s.as_u16(),
            message: body,
        },
        s => ProviderError::UnexpectedResponse(format!("HTTP {}: {body}", s.as_u16())),
    }
}

#[async_trait]
impl GenerationProvider for ProviderClient {
    async fn submit(&self, model: &str, input: &Value) -> Result<String, ProviderError> {
        let url = self.endpoint(&["queue", model])?;
        let value = self.send(self.http.post(url).json(input)).await?;
        let response: SubmitResponse = serde_json::from_value(value)
            .map_err(|e| ProviderError::UnexpectedResponse(e.to_string()))?;
        tracing::debug!(model, request_id = %response.request_id, "Submitted generation");
        Ok(response.request_id)
    }

    async fn status(&self, model: &str, request_id: &str) -> Result<QueueStatus, ProviderError> {
        let url = self.endpoint(&["queue", model, "requests", request_id, "status"])?;
        let value = self.send(self.http.get(url)).await?;
        if let Some(error) = value.get("error").and_then(Value::as_str) {
            return Err(ProviderError::GenerationFailed(error.to_string()));
        }
        serde_json::from_value(value).map_err(|e| ProviderError::UnexpectedResponse(e.to_string()))
    }

    async fn result(&self, model: &str, request_id: &str) -> Result<Value, ProviderError> {
        let url = self.endpoint(&["queue", model, "requests", request_id])?;
        self.send(self.http.get(url)).await
    }

    async fn run(&self, model: &str, input: &Value) -> Result<Value, ProviderError> {
        let url = self.endpoint(&["run", model])?;
        self.send(self.http.post(url).json(input)).await
    }
}
