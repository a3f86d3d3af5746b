#![warn(missing_docs)]
//! # partify-core
//!
//! ## Purpose
//! Defines the pure data model shared across the `partify` workspace.
//!
//! ## Responsibilities
//! - Represent the active image selection and its revocable preview handle.
//! - Represent the request lifecycle ([`RequestState`]) and the hand-off
//!   lifecycle ([`HandoffState`]) keyed by monotonic [`RequestId`] tokens.
//! - Represent the canonical analysis outcome ([`CanonicalResult`]) and the
//!   typed error taxonomy ([`ErrorInfo`]).
//! - Derive deterministic artifact file names from damaged-part labels.
//!
//! ## Data flow
//! The selection manager builds a [`Selection`]; the workflow moves
//! [`RequestState`] from `Idle` to `InFlight` and then to `Succeeded` with a
//! [`CanonicalResult`] produced by the normalizer, or to `Failed` with an
//! [`ErrorInfo`].
//!
//! ## Ownership and lifetimes
//! Every value owns its buffers (`Vec<u8>`, `String`) so results can outlive
//! the transient network buffers they were decoded from.
//!
//! ## Error model
//! Selection validation failures return [`CoreError`]. Workflow failures are
//! data ([`ErrorInfo`]) because they are rendered to the user rather than
//! propagated.
//!
//! ## Example
//! ```rust
//! use partify_core::{artifact_file_name, RequestId, RequestState};
//!
//! let state = RequestState::InFlight(RequestId::new(1));
//! assert!(state.is_in_flight());
//! assert_eq!(artifact_file_name(Some("Front Bumper"), "image/jpeg"), "front-bumper-damage.jpg");
//! ```

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Number of damage items shown in the display view.
pub const DISPLAY_ITEM_LIMIT: usize = 3;

/// Context prefix for analysis failure messages.
pub const ANALYSIS_ERROR_CONTEXT: &str = "Failed to analyze image";

/// Context prefix for hand-off failure messages.
pub const HANDOFF_ERROR_CONTEXT: &str = "Failed to get quote link";

/// File stem used when no damaged-part label is available.
pub const FALLBACK_ARTIFACT_STEM: &str = "car-damage-analysis";

/// Monotonic token identifying one outbound call.
///
/// Tokens are never reused within a workflow instance, including across
/// resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestId(u64);

impl RequestId {
    /// Wraps a raw token value.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw token value.
    pub fn value(self) -> u64 {
        self.0
    }

    /// Returns the token following `self`.
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a candidate file reached the selection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectionSource {
    /// Explicit file picker.
    Picker,
    /// Drag-and-drop onto the upload area.
    Drop,
}

/// Opaque, revocable reference to a locally renderable preview.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PreviewHandle {
    /// Store-assigned identifier, unique per store.
    pub id: u64,
    /// Local file backing the preview, when the store materializes one.
    pub path: Option<PathBuf>,
}

/// The image currently selected for analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// Raw encoded image bytes as provided by the user.
    pub bytes: Vec<u8>,
    /// Declared MIME type (always `image/*`).
    pub mime_type: String,
    /// Original file name, used for the multipart upload.
    pub file_name: String,
    /// Preview handle owned by this selection.
    pub preview: PreviewHandle,
}

impl Selection {
    /// Constructs a validated selection.
    ///
    /// # Errors
    /// Returns [`CoreError::EmptyImage`] for an empty buffer and
    /// [`CoreError::NotAnImage`] when `mime_type` is not `image/*`.
    pub fn new(
        bytes: Vec<u8>,
        mime_type: impl Into<String>,
        file_name: impl Into<String>,
        preview: PreviewHandle,
    ) -> Result<Self, CoreError> {
        let mime_type = mime_type.into();
        validate_image_candidate(&bytes, &mime_type)?;

        Ok(Self {
            bytes,
            mime_type,
            file_name: file_name.into(),
            preview,
        })
    }
}

/// Returns `true` when the declared MIME type names an image.
pub fn is_image_mime(mime_type: &str) -> bool {
    mime_type
        .trim()
        .get(..6)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("image/"))
}

/// Validates raw candidate bytes and declared type before a selection is made.
///
/// # Errors
/// See [`Selection::new`].
pub fn validate_image_candidate(bytes: &[u8], mime_type: &str) -> Result<(), CoreError> {
    if !is_image_mime(mime_type) {
        return Err(CoreError::NotAnImage(mime_type.to_string()));
    }
    if bytes.is_empty() {
        return Err(CoreError::EmptyImage);
    }
    Ok(())
}

/// Binary image artifact with its MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageArtifact {
    /// Encoded image bytes.
    pub bytes: Vec<u8>,
    /// MIME type of `bytes`.
    pub mime_type: String,
}

/// One reported defect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DamageItem {
    /// Defect type such as `dent` or `scratch`.
    pub kind: String,
    /// Confidence in [0.0, 1.0], when the service gave a usable one.
    pub confidence: Option<f32>,
}

/// Where the messaging deep link comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandoffTarget {
    /// The service already embedded a full URI.
    Precomputed(Url),
    /// The service named a garage contact; the URI is built locally from the
    /// part name.
    GarageContact {
        /// Contact phone number as reported by the service.
        phone: String,
    },
    /// The URI must be requested from the service with the part name.
    ServiceLookup,
}

/// Payload family the canonical result was decoded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayloadFamily {
    /// `{prediction, confidence}` responses.
    FlatPrediction,
    /// `{success: true, analysis: {...}}` responses.
    StructuredAnalysis,
}

/// Ordering policy for the truncated damage-item display view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisplayOrder {
    /// Keep the order the service reported.
    #[default]
    SourceOrder,
    /// Re-sort by confidence, highest first, before truncating.
    ConfidenceDescending,
}

/// Normalized analysis outcome, independent of the backend schema.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalResult {
    /// Damaged part classification label.
    pub damaged_part: String,
    /// Overall confidence in [0.0, 1.0], when reported.
    pub confidence: Option<f32>,
    /// Whether any damage was detected.
    pub damage_detected: bool,
    /// Free-form summary from the service.
    pub summary: Option<String>,
    /// Full defect list in source order.
    pub damage_items: Vec<DamageItem>,
    /// Total reported defect count (service-provided or list length).
    pub total_damages: usize,
    /// Highest item confidence (service-provided or derived).
    pub highest_confidence: Option<f32>,
    /// Annotated image returned by the service.
    pub annotated_image: Option<ImageArtifact>,
    /// Deep-link source for the garage hand-off.
    pub handoff: HandoffTarget,
    /// Schema family that produced this result.
    pub source_family: PayloadFamily,
}

impl CanonicalResult {
    /// Returns at most [`DISPLAY_ITEM_LIMIT`] items for display.
    ///
    /// The underlying list is never modified.
    pub fn top_damage_items(&self, order: DisplayOrder) -> Vec<&DamageItem> {
        let mut items: Vec<&DamageItem> = self.damage_items.iter().collect();
        if order == DisplayOrder::ConfidenceDescending {
            // Stable sort keeps source order between equal confidences;
            // items without a confidence go last.
            items.sort_by(|left, right| {
                let rank = |item: &DamageItem| item.confidence.unwrap_or(f32::NEG_INFINITY);
                rank(right).total_cmp(&rank(left))
            });
        }
        items.truncate(DISPLAY_ITEM_LIMIT);
        items
    }

    /// Returns the label used for artifact names and hand-off messages, or
    /// `None` when the part name is blank.
    pub fn part_label(&self) -> Option<&str> {
        let trimmed = self.damaged_part.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    }
}

/// Error category surfaced to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum ErrorKind {
    /// Transport failed before a response arrived.
    #[error("network error")]
    Network,
    /// Service answered with a non-success status.
    #[error("service error (status {status})")]
    Service {
        /// HTTP status code.
        status: u16,
    },
    /// Response or input did not satisfy the client contract.
    #[error("protocol error: {reason}")]
    Protocol {
        /// Machine-oriented reason.
        reason: String,
    },
    /// Service explicitly reported an analysis failure.
    #[error("service reported failure: {message}")]
    ServiceReportedFailure {
        /// Message reported by the service.
        message: String,
    },
}

/// User-facing error with its category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Error category.
    pub kind: ErrorKind,
    /// Message shown to the user.
    pub message: String,
}

impl ErrorInfo {
    /// Builds an error from an explicit kind and message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Transport failure under `context`.
    pub fn network(context: &str, detail: impl fmt::Display) -> Self {
        Self::new(ErrorKind::Network, format!("{context}: {detail}"))
    }

    /// Non-success status under `context`, with an optional diagnostic.
    pub fn service(context: &str, status: u16, diagnostic: Option<&str>) -> Self {
        let message = match diagnostic {
            Some(diagnostic) => format!("{context}: Server error: {status} ({diagnostic})"),
            None => format!("{context}: Server error: {status}"),
        };
        Self::new(ErrorKind::Service { status }, message)
    }

    /// Contract violation under `context`.
    pub fn protocol(context: &str, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        let message = format!("{context}: {reason}");
        Self::new(ErrorKind::Protocol { reason }, message)
    }

    /// Rejected selection. The reason is kept for logs; the message is fixed.
    pub fn invalid_selection(reason: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Protocol {
                reason: reason.into(),
            },
            "Please choose an image file",
        )
    }

    /// Failure reported by the service, surfaced verbatim.
    pub fn service_reported(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(
            ErrorKind::ServiceReportedFailure {
                message: message.clone(),
            },
            message,
        )
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Lifecycle of the analysis request.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RequestState {
    /// Nothing requested since the last selection or reset.
    #[default]
    Idle,
    /// A request with this token is outstanding.
    InFlight(RequestId),
    /// The current request produced a canonical result.
    Succeeded(CanonicalResult),
    /// The current request failed.
    Failed(ErrorInfo),
}

impl RequestState {
    /// Returns `true` while a request is outstanding.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::InFlight(_))
    }

    /// Returns the outstanding token, if any.
    pub fn in_flight_id(&self) -> Option<RequestId> {
        match self {
            Self::InFlight(id) => Some(*id),
            _ => None,
        }
    }

    /// Returns the canonical result when the request succeeded.
    pub fn result(&self) -> Option<&CanonicalResult> {
        match self {
            Self::Succeeded(result) => Some(result),
            _ => None,
        }
    }

    /// Returns the error when the request failed.
    pub fn error(&self) -> Option<&ErrorInfo> {
        match self {
            Self::Failed(error) => Some(error),
            _ => None,
        }
    }
}

/// Lifecycle of the deep-link hand-off.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum HandoffState {
    /// No hand-off requested.
    #[default]
    Idle,
    /// A lookup with this token is outstanding.
    Pending(RequestId),
    /// URI available to open.
    Ready(Url),
    /// Lookup failed; the analysis result is unaffected.
    Failed(ErrorInfo),
}

/// Derives a deterministic download file name.
///
/// `label` is lower-cased with whitespace runs replaced by hyphens; other
/// characters outside `[a-z0-9-]` are dropped. Blank labels fall back to
/// [`FALLBACK_ARTIFACT_STEM`].
pub fn artifact_file_name(label: Option<&str>, mime_type: &str) -> String {
    let extension = extension_for_mime(mime_type);
    match label.map(slugify_label).filter(|slug| !slug.is_empty()) {
        Some(slug) => format!("{slug}-damage.{extension}"),
        None => format!("{FALLBACK_ARTIFACT_STEM}.{extension}"),
    }
}

/// Lower-cases `label` and joins its words with hyphens.
pub fn slugify_label(label: &str) -> String {
    label
        .split_whitespace()
        .map(|word| {
            word.chars()
                .flat_map(char::to_lowercase)
                .filter(|ch| ch.is_ascii_alphanumeric() || *ch == '-')
                .collect::<String>()
        })
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Maps an image MIME type to a file extension.
pub fn extension_for_mime(mime_type: &str) -> &'static str {
    let essence = mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match essence.as_str() {
        "image/jpeg" | "image/jpg" | "image/pjpeg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "image/bmp" => "bmp",
        "image/heic" => "heic",
        _ => "bin",
    }
}

/// Error type for core validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Candidate buffer is empty.
    #[error("image buffer is empty")]
    EmptyImage,
    /// Declared type is not an image type.
    #[error("declared type is not an image: {0:?}")]
    NotAnImage(String),
}

#[cfg(test)]
mod tests {
    //! Unit tests for model helpers.

    use super::*;

    fn result_with_items(items: &[(&str, Option<f32>)]) -> CanonicalResult {
        CanonicalResult {
            damaged_part: "door".to_string(),
            confidence: None,
            damage_detected: true,
            summary: None,
            damage_items: items
                .iter()
                .map(|(kind, confidence)| DamageItem {
                    kind: kind.to_string(),
                    confidence: *confidence,
                })
                .collect(),
            total_damages: items.len(),
            highest_confidence: None,
            annotated_image: None,
            handoff: HandoffTarget::ServiceLookup,
            source_family: PayloadFamily::StructuredAnalysis,
        }
    }

    #[test]
    fn top_items_keep_source_order_by_default() {
        let result = result_with_items(&[("a", Some(0.1)), ("b", Some(0.9)), ("c", Some(0.5)), ("d", Some(0.7))]);
        let kinds: Vec<_> = result
            .top_damage_items(DisplayOrder::SourceOrder)
            .iter()
            .map(|item| item.kind.as_str())
            .collect();
        assert_eq!(kinds, vec!["a", "b", "c"]);
        assert_eq!(result.damage_items.len(), 4);
    }

    #[test]
    fn top_items_resort_when_policy_requests_it() {
        let result = result_with_items(&[("a", Some(0.1)), ("b", Some(0.9)), ("c", Some(0.5)), ("d", Some(0.7))]);
        let kinds: Vec<_> = result
            .top_damage_items(DisplayOrder::ConfidenceDescending)
            .iter()
            .map(|item| item.kind.as_str())
            .collect();
        assert_eq!(kinds, vec!["b", "d", "c"]);
    }

    #[test]
    fn image_mime_check_is_case_insensitive() {
        assert!(is_image_mime("IMAGE/PNG"));
        assert!(is_image_mime(" image/jpeg"));
        assert!(!is_image_mime("application/pdf"));
        assert!(!is_image_mime("img"));
    }

    #[test]
    fn request_ids_are_monotonic() {
        let first = RequestId::new(1);
        assert!(first.next() > first);
        assert_eq!(first.next().value(), 2);
    }
}
