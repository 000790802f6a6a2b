//! CameraClient - Camera Service Command Adapter
//!
//! ## Responsibilities
//!
//! - Typed requests against one controller's camera service
//! - Bearer token authentication
//! - Error body / status code translation
//! - MJPEG stream access
//!
//! Every write is fire-and-forget: success means the service accepted the
//! command. The physical effect shows up in the next `/status` poll, so the
//! `*_and_refresh` helpers wait out the service's stream restart before
//! polling again.
//!
//! Observatory controllers run with self-signed certificates; certificate
//! verification is disabled on purpose.

pub mod exposure;
pub mod stream;
pub mod types;

pub use exposure::{micros_to_seconds, seconds_to_micros};
pub use stream::MjpegStream;
pub use types::*;

use crate::controller_registry::ControllerEndpoint;
use crate::error::{Error, Result};
use reqwest::{Method, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Default request timeout (a batch capture blocks until the remote is done)
const DEFAULT_TIMEOUT_SECS: u64 = 300;
/// Default connect timeout
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
/// Time the service needs to restart its camera stream after a command
const DEFAULT_SETTLE_DELAY_MS: u64 = 2000;

/// HTTP tuning for a CameraClient
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub settle_delay: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            settle_delay: Duration::from_millis(DEFAULT_SETTLE_DELAY_MS),
        }
    }
}

/// Client for one camera service endpoint
#[derive(Clone)]
pub struct CameraClient {
    /// Client for request/response calls (total timeout applies)
    client: reqwest::Client,
    /// Client for the unbounded MJPEG stream (connect timeout only)
    stream_client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    settle_delay: Duration,
}

impl CameraClient {
    /// Create a client with default options
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
        Self::with_options(base_url, token, ClientOptions::default())
    }

    /// Create a client with explicit options
    pub fn with_options(
        base_url: &str,
        token: Option<String>,
        options: ClientOptions,
    ) -> Result<Self> {
        let base_url = normalize_base_url(base_url)?;

        let client = reqwest::Client::builder()
            .timeout(options.timeout)
            .connect_timeout(options.connect_timeout)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        let stream_client = reqwest::Client::builder()
            .connect_timeout(options.connect_timeout)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            stream_client,
            base_url,
            token: token.filter(|t| !t.trim().is_empty()),
            settle_delay: options.settle_delay,
        })
    }

    /// Create a client for a registered controller
    pub fn for_endpoint(endpoint: &ControllerEndpoint, options: ClientOptions) -> Result<Self> {
        Self::with_options(&endpoint.base_url, endpoint.token.clone(), options)
    }

    /// Normalized base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, client: &reqwest::Client, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let builder = client.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Send and turn non-2xx answers into errors
    async fn send(&self, builder: RequestBuilder, action: &str) -> Result<Response> {
        let response = builder.send().await.map_err(|e| {
            tracing::debug!(action = %action, error = %e, "Camera request failed");
            Error::from(e)
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.bytes().await.unwrap_or_default();
        let error = error_from_body(status.as_u16(), &body);
        tracing::warn!(
            action = %action,
            status = %status,
            error = %error,
            "Camera service rejected request"
        );
        Err(error)
    }

    async fn read_json<T: DeserializeOwned>(response: Response, action: &str) -> Result<T> {
        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| {
            Error::InvalidResponse(format!("{}: malformed JSON body: {}", action, e))
        })
    }

    /// Accept an empty body, any non-JSON body, or JSON without `success: false`
    async fn ensure_accepted(response: Response, action: &str) -> Result<()> {
        let status = response.status().as_u16();
        let body = response.bytes().await?;
        if let Some(message) = rejection_message(&body) {
            return Err(Error::HttpErrorWithMessage { status, message });
        }
        tracing::debug!(action = %action, "Camera command accepted");
        Ok(())
    }

    // ========================================
    // Status
    // ========================================

    /// `GET /status`
    pub async fn fetch_status(&self) -> Result<StatusSnapshot> {
        let builder = self.request(&self.client, Method::GET, "/status");
        let response = self.send(builder, "fetch_status").await?;
        Self::read_json(response, "fetch_status").await
    }

    /// Wait for the service to settle, then poll `/status`
    pub async fn refresh_after_settle(&self) -> Result<StatusSnapshot> {
        tokio::time::sleep(self.settle_delay).await;
        self.fetch_status().await
    }

    // ========================================
    // Connection / Stream
    // ========================================

    /// `POST /camera/connect`
    pub async fn connect(&self) -> Result<CommandAck> {
        self.command_ack("/camera/connect", "connect").await
    }

    /// `POST /camera/disconnect`
    pub async fn disconnect(&self) -> Result<CommandAck> {
        self.command_ack("/camera/disconnect", "disconnect").await
    }

    async fn command_ack(&self, path: &str, action: &str) -> Result<CommandAck> {
        let builder = self.request(&self.client, Method::POST, path);
        let response = self.send(builder, action).await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;

        let ack = if body.iter().all(u8::is_ascii_whitespace) {
            CommandAck {
                success: true,
                message: None,
            }
        } else {
            serde_json::from_slice::<CommandAck>(&body).map_err(|e| {
                Error::InvalidResponse(format!("{}: malformed JSON body: {}", action, e))
            })?
        };

        if !ack.success {
            return Err(Error::HttpErrorWithMessage {
                status,
                message: ack
                    .message
                    .unwrap_or_else(|| format!("{} rejected", action)),
            });
        }
        Ok(ack)
    }

    /// `POST /camera/stream/start`
    pub async fn start_stream(&self) -> Result<()> {
        let builder = self.request(&self.client, Method::POST, "/camera/stream/start");
        let response = self.send(builder, "start_stream").await?;
        Self::ensure_accepted(response, "start_stream").await
    }

    /// `POST /camera/stream/stop`
    pub async fn stop_stream(&self) -> Result<()> {
        let builder = self.request(&self.client, Method::POST, "/camera/stream/stop");
        let response = self.send(builder, "stop_stream").await?;
        Self::ensure_accepted(response, "stop_stream").await
    }

    /// Start streaming and return the status observed after the settle delay
    pub async fn start_stream_and_refresh(&self) -> Result<StatusSnapshot> {
        self.start_stream().await?;
        self.refresh_after_settle().await
    }

    /// Stop streaming and return the status observed after the settle delay
    pub async fn stop_stream_and_refresh(&self) -> Result<StatusSnapshot> {
        self.stop_stream().await?;
        self.refresh_after_settle().await
    }

    /// `GET /camera/stream` as a frame reader
    pub async fn open_stream(&self) -> Result<MjpegStream> {
        let builder = self.request(&self.stream_client, Method::GET, "/camera/stream");
        let response = self.send(builder, "open_stream").await?;
        tracing::info!(base_url = %self.base_url, "MJPEG stream opened");
        Ok(MjpegStream::new(response))
    }

    // ========================================
    // Settings / Snapshot
    // ========================================

    /// `POST /camera/settings`
    pub async fn update_settings(&self, settings: &CameraSettings) -> Result<SettingsAck> {
        if settings.is_empty() {
            return Err(Error::Validation("no settings to update".to_string()));
        }

        let builder = self
            .request(&self.client, Method::POST, "/camera/settings")
            .json(&settings.to_wire());
        let response = self.send(builder, "update_settings").await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;

        if let Some(message) = rejection_message(&body) {
            return Err(Error::HttpErrorWithMessage { status, message });
        }
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(SettingsAck::default());
        }

        let ack: SettingsAckWire = serde_json::from_slice(&body).map_err(|e| {
            Error::InvalidResponse(format!("update_settings: malformed JSON body: {}", e))
        })?;
        tracing::info!(
            gain = ?ack.gain,
            exposure_us = ?ack.exposure,
            "Camera settings applied"
        );
        Ok(ack.into())
    }

    /// Apply settings, then poll status after the settle delay.
    ///
    /// Photo-exposure-only changes do not restart the stream and skip the wait.
    pub async fn update_settings_and_refresh(
        &self,
        settings: &CameraSettings,
    ) -> Result<(SettingsAck, StatusSnapshot)> {
        let ack = self.update_settings(settings).await?;
        let status = if settings.affects_stream() {
            self.refresh_after_settle().await?
        } else {
            self.fetch_status().await?
        };
        Ok((ack, status))
    }

    /// `GET /camera/snapshot` - raw image bytes
    pub async fn capture_snapshot(&self) -> Result<Vec<u8>> {
        let builder = self.request(&self.client, Method::GET, "/camera/snapshot");
        let response = self.send(builder, "capture_snapshot").await?;
        let status = response.status().as_u16();
        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.contains("json"))
            .unwrap_or(false);

        let body = response.bytes().await?;

        if is_json {
            return Err(match error_message(&body) {
                Some(message) => Error::HttpErrorWithMessage { status, message },
                None => Error::InvalidResponse(
                    "capture_snapshot: JSON body where image was expected".to_string(),
                ),
            });
        }
        if body.is_empty() {
            return Err(Error::InvalidResponse(
                "capture_snapshot: empty body".to_string(),
            ));
        }

        tracing::debug!(size = body.len(), "Snapshot received");
        Ok(body.to_vec())
    }

    // ========================================
    // Sequence
    // ========================================

    /// `POST /camera/sequence/start`
    pub async fn start_sequence(&self, request: &SequenceStartRequest) -> Result<SequenceStartAck> {
        let builder = self
            .request(&self.client, Method::POST, "/camera/sequence/start")
            .json(request);
        let response = self.send(builder, "start_sequence").await?;
        let status = response.status().as_u16();
        let ack: SequenceStartAck = Self::read_json(response, "start_sequence").await?;
        if !ack.success {
            return Err(Error::HttpErrorWithMessage {
                status,
                message: ack
                    .message
                    .unwrap_or_else(|| "sequence start rejected".to_string()),
            });
        }
        Ok(ack)
    }

    /// `POST /camera/sequence/stop`
    pub async fn stop_sequence(&self) -> Result<()> {
        let builder = self.request(&self.client, Method::POST, "/camera/sequence/stop");
        let response = self.send(builder, "stop_sequence").await?;
        Self::ensure_accepted(response, "stop_sequence").await
    }

    /// `GET /camera/sequence/status`
    pub async fn sequence_status(&self) -> Result<RemoteSequenceStatus> {
        let builder = self.request(&self.client, Method::GET, "/camera/sequence/status");
        let response = self.send(builder, "sequence_status").await?;
        Self::read_json(response, "sequence_status").await
    }

    /// `POST /camera/sequence/capture` - one base64 payload per requested
    /// photo; `None` marks a photo the service could not deliver
    pub async fn capture_sequence_batch(&self, count: u32) -> Result<Vec<Option<String>>> {
        let builder = self
            .request(&self.client, Method::POST, "/camera/sequence/capture")
            .json(&BatchCaptureRequest { count });
        let response = self.send(builder, "capture_sequence_batch").await?;
        let status = response.status().as_u16();
        let batch: BatchCaptureResponse =
            Self::read_json(response, "capture_sequence_batch").await?;

        if !batch.success {
            return Err(Error::HttpErrorWithMessage {
                status,
                message: batch
                    .message
                    .unwrap_or_else(|| "batch capture rejected".to_string()),
            });
        }

        tracing::info!(
            requested = count,
            reported = ?batch.count,
            received = batch.photos.len(),
            missing = batch.photos.iter().filter(|p| p.is_none()).count(),
            "Batch capture returned"
        );
        Ok(batch.photos)
    }
}

/// Normalize a user-entered base URL: default the scheme to `http://` and
/// strip trailing slashes.
pub fn normalize_base_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidUrl("empty base URL".to_string()));
    }

    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    };
    let normalized = with_scheme.trim_end_matches('/').to_string();

    let url = Url::parse(&normalized)
        .map_err(|e| Error::InvalidUrl(format!("{}: {}", raw, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::InvalidUrl(format!(
            "{}: unsupported scheme {}",
            raw,
            url.scheme()
        )));
    }
    if url.host_str().map(str::is_empty).unwrap_or(true) {
        return Err(Error::InvalidUrl(format!("{}: missing host", raw)));
    }

    Ok(normalized)
}

/// Map a non-2xx answer onto the error taxonomy
fn error_from_body(status: u16, body: &[u8]) -> Error {
    match error_message(body) {
        Some(message) => Error::HttpErrorWithMessage { status, message },
        None => Error::HttpError { status },
    }
}

/// Server message from `{"error": ...}` or `{"success": false, "message": ...}`
fn error_message(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    if let Some(error) = value.get("error").and_then(|v| v.as_str()) {
        return Some(error.to_string());
    }
    rejection_message(body)
}

/// Message of a 2xx body that nevertheless says `success: false`
fn rejection_message(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    if value.get("success").and_then(|v| v.as_bool()) == Some(false) {
        let message = value
            .get("message")
            .or_else(|| value.get("error"))
            .and_then(|v| v.as_str())
            .unwrap_or("request rejected");
        return Some(message.to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_adds_scheme_and_strips_slash() {
        assert_eq!(
            normalize_base_url("192.168.1.20:8080/").unwrap(),
            "http://192.168.1.20:8080"
        );
        assert_eq!(
            normalize_base_url(" https://obs.example.org// ").unwrap(),
            "https://obs.example.org"
        );
    }

    #[test]
    fn test_normalize_rejects_garbage() {
        assert!(matches!(normalize_base_url(""), Err(Error::InvalidUrl(_))));
        assert!(matches!(
            normalize_base_url("ftp://host"),
            Err(Error::InvalidUrl(_))
        ));
        assert!(matches!(
            normalize_base_url("http://"),
            Err(Error::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_error_from_body() {
        assert!(matches!(
            error_from_body(500, br#"{"error": "Failed to capture snapshot"}"#),
            Error::HttpErrorWithMessage { status: 500, ref message } if message == "Failed to capture snapshot"
        ));
        assert!(matches!(
            error_from_body(500, br#"{"success": false, "message": "No cameras found"}"#),
            Error::HttpErrorWithMessage { status: 500, ref message } if message == "No cameras found"
        ));
        assert!(matches!(
            error_from_body(404, b"<html>not found</html>"),
            Error::HttpError { status: 404 }
        ));
    }

    #[test]
    fn test_rejection_message_ignores_success() {
        assert!(rejection_message(br#"{"success": true, "message": "Stream started"}"#).is_none());
        assert!(rejection_message(b"").is_none());
        assert_eq!(
            rejection_message(br#"{"success": false}"#).as_deref(),
            Some("request rejected")
        );
    }

    #[test]
    fn test_token_blank_is_dropped() {
        let client = CameraClient::new("localhost:1", Some("  ".to_string())).unwrap();
        assert!(client.token.is_none());
        assert_eq!(client.base_url(), "http://localhost:1");
    }
}
