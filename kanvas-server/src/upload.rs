//! Media storage client.
//!
//! Uploads use a two-step flow against the storage backend:
//!
//! ```text
//! POST {base}/api/storage/upload-url   -> {"upload_url": "..."}
//! POST {upload_url}  (raw bytes)       -> {"storage_id": "..."}
//! ```
//!
//! Stored files are served from `{base}/api/storage/{storage_id}`. Every
//! network step goes through [`retry`] so transient failures are retried
//! with exponential backoff. A 429 is final and surfaces as
//! [`UploadError::RateLimited`].

use kanvas_core::store::current_timestamp_ms;
use kanvas_core::{Asset, AssetId, MediaKind};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

use crate::provider::GeneratedMedia;
use crate::retry::{retry, RetryConfig, Retryable};

/// Errors that can occur while storing media.
#[derive(Debug, Error)]
pub enum UploadError {
    /// The storage base URL provided by configuration is invalid.
    #[error("invalid storage URL: {0}")]
    InvalidUrl(String),
    /// HTTP layer failed (connection, timeout, etc.).
    #[error("storage HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The storage backend answered with a 5xx status.
    #[error("storage server error {status}: {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Response body.
        message: String,
    },
    /// The storage backend is throttling us (429).
    #[error("storage rate limited (retry after {retry_after:?}s)")]
    RateLimited {
        /// Seconds from the `Retry-After` header, when present.
        retry_after: Option<u64>,
    },
    /// The storage backend refused the request (4xx).
    #[error("storage rejected request ({status}): {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body.
        message: String,
    },
    /// The response did not match the expected structure.
    #[error("unexpected storage response: {0}")]
    UnexpectedResponse(String),
}

impl UploadError {
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
                    "The media storage is receiving too many requests. Please wait {wait} and try again."
                )
            }
            _ => "Could not store the generated media. Please try again.".into(),
        }
    }
}

impl Retryable for UploadError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Server { .. })
    }
}

#[derive(Debug, Deserialize)]
struct UploadUrlResponse {
    upload_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    #[serde(alias = "storage_id")]
    storage_id: String,
}

/// Downloaded media bytes.
#[derive(Debug, Clone)]
pub struct Download {
    /// File contents.
    pub bytes: Vec<u8>,
    /// MIME type from the response headers.
    pub content_type: Option<String>,
}

/// HTTP client for the media storage backend.
#[derive(Debug, Clone)]
pub struct StorageClient {
    http: Client,
    base: Url,
    retry: RetryConfig,
}

impl StorageClient {
    /// Create a client for `base_url` using `retry` for every network step.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError::InvalidUrl`] if the URL is malformed.
    /// Returns [`UploadError::Http`] if the HTTP client fails to build.
    pub fn new(base_url: impl AsRef<str>, retry: RetryConfig) -> Result<Self, UploadError> {
        let base =
            Url::parse(base_url.as_ref()).map_err(|e| UploadError::InvalidUrl(e.to_string()))?;
        let http = Client::builder()
            .user_agent(concat!("kanvas/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, base, retry })
    }

    /// Public URL for a stored file.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError::InvalidUrl`] if the URL cannot be built.
    pub fn public_url(&self, storage_id: &str) -> Result<String, UploadError> {
        self.base
            .join(&format!("api/storage/{storage_id}"))
            .map(String::from)
            .map_err(|e| UploadError::InvalidUrl(e.to_string()))
    }

    /// Upload `bytes` and return the storage ID.
    ///
    /// # Errors
    ///
    /// Returns the last error once retries are exhausted, or the first
    /// non-retryable error.
    pub async fn upload(&self, bytes: &[u8], content_type: &str) -> Result<String, UploadError> {
        let storage_id = retry(&self.retry, "storage.upload", || {
            self.upload_once(bytes, content_type)
        })
        .await?;
        tracing::debug!(%storage_id, size = bytes.len(), content_type, "Uploaded media");
        Ok(storage_id)
    }

    async fn upload_once(&self, bytes: &[u8], content_type: &str) -> Result<String, UploadError> {
        let endpoint = self
            .base
            .join("api/storage/upload-url")
            .map_err(|e| UploadError::InvalidUrl(e.to_string()))?;
        let response = check(self.http.post(endpoint).send().await?).await?;
        let UploadUrlResponse { upload_url } = response
            .json()
            .await
            .map_err(|e| UploadError::UnexpectedResponse(e.to_string()))?;

        // The backend may hand out an absolute or a base-relative URL.
        let upload_url = self
            .base
            .join(&upload_url)
            .map_err(|e| UploadError::InvalidUrl(e.to_string()))?;
        let response = self
            .http
            .post(upload_url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes.to_vec())
            .send()
            .await?;
        let UploadResponse { storage_id } = check(response)
            .await?
            .json()
            .await
            .map_err(|e| UploadError::UnexpectedResponse(e.to_string()))?;
        Ok(storage_id)
    }

    /// Download a file.
    ///
    /// # Errors
    ///
    /// Returns the last error once retries are exhausted.
    pub async fn fetch(&self, url: &str) -> Result<Download, UploadError> {
        let url = Url::parse(url).map_err(|e| UploadError::InvalidUrl(e.to_string()))?;
        let url = &url;
        retry(&self.retry, "storage.fetch", move || async move {
            let response = check(self.http.get(url.clone()).send().await?).await?;
            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let bytes = response.bytes().await?.to_vec();
            Ok(Download {
                bytes,
                content_type,
            })
        })
        .await
    }

    /// Copy provider output into storage and describe it as an [`Asset`].
    ///
    /// # Errors
    ///
    /// Returns an error if the download or upload fails.
    pub async fn persist_media(
        &self,
        media: &GeneratedMedia,
        kind: MediaKind,
        owner_id: &str,
    ) -> Result<Asset, UploadError> {
        let download = self.fetch(&media.url).await?;
        let content_type = media
            .content_type
            .clone()
            .or(download.content_type)
            .unwrap_or_else(|| default_content_type(kind).to_string());
        let storage_id = self.upload(&download.bytes, &content_type).await?;
        let url = self.public_url(&storage_id)?;

        Ok(Asset {
            id: AssetId::new(Uuid::new_v4().to_string()),
            owner_id: owner_id.to_string(),
            kind,
            url,
            storage_id,
            width: media.width.unwrap_or(0),
            height: media.height.unwrap_or(0),
            mime_type: Some(content_type),
            size_bytes: Some(download.bytes.len() as u64),
            duration: media.duration,
            created_at: current_timestamp_ms(),
        })
    }
}

fn default_content_type(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Image => "image/png",
        MediaKind::Video => "video/mp4",
    }
}

/// Turn non-success responses into errors.
async fn check(response: reqwest::Response) -> Result<reqwest::Response, UploadError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        return Err(UploadError::RateLimited { retry_after });
    }
    let message = response.text().await.unwrap_or_default();
    if status.is_server_error() {
        Err(UploadError::Server {
            status: status.as_u16(),
            message,
        })
    } else {
        Err(UploadError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_bytes, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_retry() -> RetryConfig {
        RetryConfig::new(3, 1, 5, 2.0).without_jitter()
    }

    #[test]
    fn test_upload_error_is_retryable() {
        assert!(UploadError::Server {
            status: 500,
            message: String::new()
        }
        .is_retryable());
        assert!(!UploadError::RateLimited {
            retry_after: Some(5)
        }
        .is_retryable());
        assert!(!UploadError::Rejected {
            status: 401,
            message: String::new()
        }
        .is_retryable());
        assert!(!UploadError::UnexpectedResponse(String::new()).is_retryable());
    }

    #[test]
    fn test_rate_limit_user_message() {
        let message = UploadError::RateLimited {
            retry_after: Some(15),
        }
        .user_message();
        assert!(message.contains("too many requests"));
        assert!(message.contains("15 seconds"));
        assert!(UploadError::RateLimited { retry_after: None }
            .user_message()
            .contains("a minute"));
    }

    #[test]
    fn test_public_url() {
        let client = StorageClient::new("https://store.example/", fast_retry()).expect("client");
        assert_eq!(
            client.public_url("st_1").expect("url"),
            "https://store.example/api/storage/st_1"
        );
    }

    async fn mount_upload_url(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/api/storage/upload-url"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"upload_url": format!("{}/upload/abc", server.uri())})),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    #[cfg_attr(
        target_os = "macos",
        ignore = "wiremock/reqwest system-configuration issue on macOS"
    )]
    async fn test_upload_uses_two_step_flow() {
        let server = MockServer::start().await;
        mount_upload_url(&server).await;
        Mock::given(method("POST"))
            .and(path("/upload/abc"))
            .and(header("content-type", "image/png"))
            .and(body_bytes(vec![1_u8, 2, 3]))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"storageId": "st_9"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = StorageClient::new(server.uri(), fast_retry()).expect("client");
        let id = client.upload(&[1, 2, 3], "image/png").await.expect("upload");
        assert_eq!(id, "st_9");
    }

    #[tokio::test]
    #[cfg_attr(
        target_os = "macos",
        ignore = "wiremock/reqwest system-configuration issue on macOS"
    )]
    async fn test_upload_retries_transient_failures() {
        let server = MockServer::start().await;
        mount_upload_url(&server).await;
        Mock::given(method("POST"))
            .and(path("/upload/abc"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/upload/abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"storage_id": "st_1"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = StorageClient::new(server.uri(), fast_retry()).expect("client");
        let id = client.upload(b"png", "image/png").await.expect("upload");
        assert_eq!(id, "st_1");
    }

    #[tokio::test]
    #[cfg_attr(
        target_os = "macos",
        ignore = "wiremock/reqwest system-configuration issue on macOS"
    )]
    async fn test_upload_gives_up_after_max_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/storage/upload-url"))
            .respond_with(ResponseTemplate::new(500).set_body_string("down"))
            .expect(3)
            .mount(&server)
            .await;

        let client = StorageClient::new(server.uri(), fast_retry()).expect("client");
        let err = client
            .upload(b"png", "image/png")
            .await
            .expect_err("should fail");
        assert!(matches!(err, UploadError::Server { status: 500, .. }));
    }

    #[tokio::test]
    #[cfg_attr(
        target_os = "macos",
        ignore = "wiremock/reqwest system-configuration issue on macOS"
    )]
    async fn test_upload_does_not_retry_rejections() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/storage/upload-url"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let client = StorageClient::new(server.uri(), fast_retry()).expect("client");
        let err = client
            .upload(b"png", "image/png")
            .await
            .expect_err("should fail");
        assert!(matches!(err, UploadError::Rejected { status: 401, .. }));
    }

    #[tokio::test]
    #[cfg_attr(
        target_os = "macos",
        ignore = "wiremock/reqwest system-configuration issue on macOS"
    )]
    async fn test_upload_rate_limit_is_final() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/storage/upload-url"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "30"))
            .expect(1)
            .mount(&server)
            .await;

        let client = StorageClient::new(server.uri(), fast_retry()).expect("client");
        let err = client
            .upload(b"png", "image/png")
            .await
            .expect_err("should fail");
        assert!(matches!(
            err,
            UploadError::RateLimited {
                retry_after: Some(30)
            }
        ));
    }

    #[tokio::test]
    #[cfg_attr(
        target_os = "macos",
        ignore = "wiremock/reqwest system-configuration issue on macOS"
    )]
    async fn test_persist_media_builds_owned_asset() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cdn/out.png"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/png")
                    .set_body_bytes(vec![0_u8; 16]),
            )
            .mount(&server)
            .await;
        mount_upload_url(&server).await;
        Mock::given(method("POST"))
            .and(path("/upload/abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"storageId": "st_2"})))
            .mount(&server)
            .await;

        let client = StorageClient::new(server.uri(), fast_retry()).expect("client");
        let media = GeneratedMedia {
            url: format!("{}/cdn/out.png", server.uri()),
            width: Some(512),
            height: Some(256),
            content_type: None,
            file_size: None,
            duration: None,
        };
        let asset = client
            .persist_media(&media, MediaKind::Image, "user_1")
            .await
            .expect("persist");

        assert_eq!(asset.owner_id, "user_1");
        assert_eq!(asset.kind, MediaKind::Image);
        assert_eq!(asset.storage_id, "st_2");
        assert_eq!(asset.width, 512);
        assert_eq!(asset.size_bytes, Some(16));
        assert_eq!(asset.mime_type.as_deref(), Some("image/png"));
        assert!(asset.url.ends_with("/api/storage/st_2"));
    }
}
