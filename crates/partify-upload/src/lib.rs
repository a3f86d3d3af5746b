#![warn(missing_docs)]
//! # partify-upload
//!
//! ## Purpose
//! Builds analysis uploads and carries them to the remote analysis service.
//!
//! ## Responsibilities
//! - Validate the service base address and derive endpoint URLs.
//! - Package the selected image into an [`UploadEnvelope`] with a stable
//!   idempotency key.
//! - Define the [`AnalysisTransport`] seam and its HTTP implementation.
//! - Classify raw responses and extract textual diagnostics from error bodies.
//!
//! ## Data flow
//! [`partify_core::Selection`] -> [`UploadEnvelope`] ->
//! [`AnalysisTransport::analyze`] -> [`RawResponse`] -> [`classify_response`].
//!
//! ## Ownership and lifetimes
//! Envelopes own a copy of the image bytes so a worker thread can send them
//! while the control thread keeps mutating the selection.
//!
//! ## Error model
//! Transport failures (no response obtained) are [`UploadError::Network`].
//! Non-success statuses are not errors at this layer; they are classified by
//! [`classify_response`] so callers can keep the status code.

use std::net::IpAddr;
use std::time::Duration;

use log::{debug, info};
use partify_core::Selection;
use reqwest::blocking::Client as HttpClient;
use reqwest::blocking::multipart::{Form as MultipartForm, Part as MultipartPart};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;
use url::{Host, Url};

/// Path of the analysis endpoint relative to the service base.
pub const PREDICT_PATH: &str = "predict";

/// Path of the hand-off lookup endpoint relative to the service base.
pub const HANDOFF_PATH: &str = "whatsapp";

/// Multipart field carrying the image.
pub const UPLOAD_FIELD_NAME: &str = "file";

/// Maximum characters kept from an error body diagnostic.
pub const DIAGNOSTIC_MAX_CHARS: usize = 200;

/// Validated service base address with derived endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoints {
    base: Url,
}

impl ServiceEndpoints {
    /// Creates endpoints from a base address.
    ///
    /// # Errors
    /// Returns [`UploadError::InvalidEndpoint`] when the base is not a valid
    /// URL, or uses plain HTTP towards a non-loopback host.
    pub fn new(base: &str) -> Result<Self, UploadError> {
        let mut base = validate_service_base(base)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self { base })
    }

    /// Returns the normalized base address.
    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Returns the analysis endpoint.
    pub fn predict_url(&self) -> Result<Url, UploadError> {
        self.base
            .join(PREDICT_PATH)
            .map_err(|error| UploadError::InvalidEndpoint(error.to_string()))
    }

    /// Returns the hand-off lookup endpoint for `part`.
    pub fn handoff_url(&self, part: &str) -> Result<Url, UploadError> {
        let mut url = self
            .base
            .join(HANDOFF_PATH)
            .map_err(|error| UploadError::InvalidEndpoint(error.to_string()))?;
        url.query_pairs_mut().append_pair("part", part);
        Ok(url)
    }
}

/// Validates the service base address policy.
///
/// HTTPS is required except for loopback hosts, which may use HTTP for local
/// development.
///
/// # Errors
/// See [`ServiceEndpoints::new`].
pub fn validate_service_base(endpoint: &str) -> Result<Url, UploadError> {
    let parsed = Url::parse(endpoint)
        .map_err(|error| UploadError::InvalidEndpoint(format!("invalid service url: {error}")))?;

    match parsed.scheme() {
        "https" => Ok(parsed),
        "http" if is_loopback(&parsed) => Ok(parsed),
        "http" => Err(UploadError::InvalidEndpoint(
            "service endpoint must use https".to_string(),
        )),
        other => Err(UploadError::InvalidEndpoint(format!(
            "unsupported service scheme: {other}"
        ))),
    }
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(address)) => IpAddr::V4(address).is_loopback(),
        Some(Host::Ipv6(address)) => IpAddr::V6(address).is_loopback(),
        None => false,
    }
}

/// Multipart upload carrying one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadEnvelope {
    /// Multipart field name.
    pub field_name: String,
    /// File name sent with the part.
    pub file_name: String,
    /// MIME type of the part.
    pub mime_type: String,
    /// Raw image bytes.
    pub bytes: Vec<u8>,
    /// Content-derived key for traceability.
    pub idempotency_key: String,
}

impl UploadEnvelope {
    /// Builds an envelope from the active selection.
    pub fn from_selection(selection: &Selection) -> Self {
        Self {
            field_name: UPLOAD_FIELD_NAME.to_string(),
            file_name: selection.file_name.clone(),
            mime_type: selection.mime_type.clone(),
            bytes: selection.bytes.clone(),
            idempotency_key: idempotency_key_for_upload(&selection.bytes, &selection.mime_type),
        }
    }
}

/// Computes a stable SHA-256 key over the MIME type and image bytes.
pub fn idempotency_key_for_upload(bytes: &[u8], mime_type: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(mime_type.as_bytes());
    hasher.update([0_u8]);
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Hand-off lookup parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffRequest {
    /// Damaged part name the deep link should mention.
    pub part: String,
}

/// Status and body of a service response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    /// HTTP status code.
    pub status: u16,
    /// Raw body bytes.
    pub body: Vec<u8>,
}

impl RawResponse {
    /// Returns `true` for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Abstract transport to the analysis service.
pub trait AnalysisTransport: Send + Sync {
    /// Uploads one image for analysis.
    ///
    /// # Errors
    /// Returns [`UploadError::Network`] when no response was obtained.
    fn analyze(&self, envelope: &UploadEnvelope) -> Result<RawResponse, UploadError>;

    /// Requests a hand-off deep link for a damaged part.
    ///
    /// # Errors
    /// Returns [`UploadError::Network`] when no response was obtained.
    fn request_handoff(&self, request: &HandoffRequest) -> Result<RawResponse, UploadError>;
}

/// Blocking HTTP transport.
///
/// The client timeout is the only timeout in the pipeline; expiry surfaces as
/// [`UploadError::Network`].
#[derive(Debug, Clone)]
pub struct HttpTransport {
    endpoints: ServiceEndpoints,
    http: HttpClient,
}

impl HttpTransport {
    /// Creates a transport with the given request timeout.
    ///
    /// # Errors
    /// Returns [`UploadError::Client`] when the HTTP client cannot be built.
    pub fn new(endpoints: ServiceEndpoints, timeout: Duration) -> Result<Self, UploadError> {
        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| UploadError::Client(error.to_string()))?;
        Ok(Self { endpoints, http })
    }

    /// Returns configured endpoints.
    pub fn endpoints(&self) -> &ServiceEndpoints {
        &self.endpoints
    }

    fn read_response(
        response: reqwest::blocking::Response,
    ) -> Result<RawResponse, UploadError> {
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .map_err(|error| UploadError::Network(format!("failed reading response body: {error}")))?
            .to_vec();
        Ok(RawResponse { status, body })
    }
}

impl AnalysisTransport for HttpTransport {
    fn analyze(&self, envelope: &UploadEnvelope) -> Result<RawResponse, UploadError> {
        let endpoint = self.endpoints.predict_url()?;
        let part = MultipartPart::bytes(envelope.bytes.clone())
            .file_name(envelope.file_name.clone())
            .mime_str(&envelope.mime_type)
            .map_err(|error| UploadError::Client(format!("invalid part type: {error}")))?;
        let form = MultipartForm::new().part(envelope.field_name.clone(), part);

        info!(
            target: "analysis",
            "request_sent: endpoint={endpoint} bytes={} key={}",
            envelope.bytes.len(),
            envelope.idempotency_key
        );
        let response = self
            .http
            .post(endpoint.as_str())
            .header("Idempotency-Key", &envelope.idempotency_key)
            .multipart(form)
            .send()
            .map_err(|error| UploadError::Network(error.to_string()))?;

        let raw = Self::read_response(response)?;
        info!(target: "analysis", "response_status: status={}", raw.status);
        Ok(raw)
    }

    fn request_handoff(&self, request: &HandoffRequest) -> Result<RawResponse, UploadError> {
        let endpoint = self.endpoints.handoff_url(&request.part)?;
        debug!(target: "handoff", "lookup_sent: part={}", request.part);
        let response = self
            .http
            .get(endpoint.as_str())
            .header("Accept", "application/json")
            .send()
            .map_err(|error| UploadError::Network(error.to_string()))?;

        let raw = Self::read_response(response)?;
        info!(target: "handoff", "lookup_status: status={}", raw.status);
        Ok(raw)
    }
}

/// Classified service response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseClass<'a> {
    /// 2xx response; body goes to the normalizer.
    Success(&'a [u8]),
    /// Non-success status with an optional diagnostic.
    ServiceError {
        /// HTTP status code.
        status: u16,
        /// Text extracted from the body, if any.
        diagnostic: Option<String>,
    },
}

/// Splits a raw response into success or service error.
pub fn classify_response(response: &RawResponse) -> ResponseClass<'_> {
    if response.is_success() {
        ResponseClass::Success(&response.body)
    } else {
        ResponseClass::ServiceError {
            status: response.status,
            diagnostic: extract_diagnostic(&response.body),
        }
    }
}

/// Extracts a short diagnostic from an error body.
///
/// JSON bodies contribute their `detail`, `error` or `message` string field;
/// other bodies contribute their trimmed text. Empty or binary bodies yield
/// `None`.
pub fn extract_diagnostic(body: &[u8]) -> Option<String> {
    if let Ok(json) = serde_json::from_slice::<Value>(body) {
        return ["detail", "error", "message"]
            .iter()
            .find_map(|key| json.get(key).and_then(Value::as_str))
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(truncate_diagnostic);
    }

    let text = std::str::from_utf8(body).ok()?.trim();
    (!text.is_empty()).then(|| truncate_diagnostic(text))
}

fn truncate_diagnostic(text: &str) -> String {
    if text.chars().count() <= DIAGNOSTIC_MAX_CHARS {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(DIAGNOSTIC_MAX_CHARS).collect();
    truncated.push_str("...");
    truncated
}

/// Upload layer error type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadError {
    /// Endpoint violates URL policy.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
    /// No response was obtained.
    #[error("{0}")]
    Network(String),
    /// Request could not be built.
    #[error("http client failure: {0}")]
    Client(String),
}
