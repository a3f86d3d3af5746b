#![warn(missing_docs)]
//! # partify-analysis-contract
//!
//! ## Purpose
//! Normalizes the analysis service's response payloads into one
//! [`CanonicalResult`].
//!
//! ## Responsibilities
//! - Keep an explicit registry of known payload families.
//! - Try each family in fixed priority order; the first structural match wins.
//! - Tolerate partial data (missing confidences, unusable items, bad
//!   artifacts) without inventing values.
//! - Parse hand-off lookup responses into a URI.
//!
//! ## Data flow
//! Raw body -> JSON object -> [`RESPONSE_FAMILIES`] -> [`CanonicalResult`] or
//! [`NormalizeError`] -> workflow state.
//!
//! ## Ownership and lifetimes
//! Results own all decoded data, including the annotated image bytes.
//!
//! ## Error model
//! A payload that matches no family fails closed with
//! [`NormalizeError::Protocol`]. A family that matches structurally but holds
//! ill-typed fields also fails with a protocol reason naming the family.
//! An explicit service failure becomes
//! [`NormalizeError::ServiceReportedFailure`].

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use log::{debug, info, warn};
use partify_core::{
    CanonicalResult, DamageItem, ErrorInfo, HandoffTarget, ImageArtifact, PayloadFamily,
};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;
use url::Url;

/// Reason reported when no payload family matches.
pub const UNRECOGNIZED_SHAPE: &str = "unrecognized response shape";

/// MIME type assumed for annotated images sent as bare base64.
pub const DEFAULT_ARTIFACT_MIME: &str = "image/jpeg";

/// Part label used when a structured payload reports no damage.
pub const NO_DAMAGE_LABEL: &str = "No damage detected";

/// Part label used when damage is reported without any part name.
pub const UNKNOWN_PART_LABEL: &str = "Unknown part";

/// Outcome of a family that recognized the payload.
#[derive(Debug, Clone, PartialEq)]
pub enum FamilyMatch {
    /// The payload decoded into a result.
    Result(CanonicalResult),
    /// The payload is an explicit failure report.
    Failure(String),
}

/// One known response schema.
pub trait ResponseFamily: Send + Sync {
    /// Family name used in logs and error reasons.
    fn name(&self) -> &'static str;

    /// Decodes `payload` when it structurally belongs to this family.
    ///
    /// # Returns
    /// - `None` when the payload does not have this family's shape.
    /// - `Some(Err(_))` when the shape matches but fields are ill-typed.
    fn decode(&self, payload: &Value) -> Option<Result<FamilyMatch, NormalizeError>>;
}

/// Known families in priority order.
pub const RESPONSE_FAMILIES: &[&dyn ResponseFamily] = &[
    &FlatPredictionFamily,
    &StructuredAnalysisFamily,
    &ExplicitFailureFamily,
];

/// Normalizes a raw response body.
///
/// # Errors
/// Returns [`NormalizeError::Protocol`] for non-JSON bodies, unknown shapes
/// and ill-typed family fields; [`NormalizeError::ServiceReportedFailure`]
/// for explicit failure payloads.
pub fn normalize(raw: &[u8]) -> Result<CanonicalResult, NormalizeError> {
    let payload: Value = serde_json::from_slice(raw)
        .map_err(|_| NormalizeError::Protocol("response is not valid JSON".to_string()))?;
    normalize_value(&payload)
}

/// Normalizes an already-parsed payload. See [`normalize`].
///
/// # Errors
/// See [`normalize`].
pub fn normalize_value(payload: &Value) -> Result<CanonicalResult, NormalizeError> {
    if !payload.is_object() {
        return Err(NormalizeError::Protocol(UNRECOGNIZED_SHAPE.to_string()));
    }

    for family in RESPONSE_FAMILIES {
        let Some(decoded) = family.decode(payload) else {
            continue;
        };
        info!(target: "normalizer", "matched: family={}", family.name());
        return match decoded? {
            FamilyMatch::Result(result) => Ok(result),
            FamilyMatch::Failure(message) => {
                Err(NormalizeError::ServiceReportedFailure(message))
            }
        };
    }

    warn!(target: "normalizer", "unrecognized: keys={:?}", object_keys(payload));
    Err(NormalizeError::Protocol(UNRECOGNIZED_SHAPE.to_string()))
}

/// Parses a hand-off lookup response into a URI.
///
/// Accepts `whatsapp_url`, `url` or `uri` string fields.
///
/// # Errors
/// Returns [`NormalizeError::Protocol`] when the body is not JSON, carries no
/// URI field, or the URI does not parse.
pub fn parse_handoff_response(raw: &[u8]) -> Result<Url, NormalizeError> {
    let payload: Value = serde_json::from_slice(raw)
        .map_err(|_| NormalizeError::Protocol("response is not valid JSON".to_string()))?;
    let uri = ["whatsapp_url", "url", "uri"]
        .iter()
        .find_map(|key| payload.get(key).and_then(Value::as_str))
        .ok_or_else(|| NormalizeError::Protocol("hand-off response has no uri".to_string()))?;
    Url::parse(uri.trim())
        .map_err(|error| NormalizeError::Protocol(format!("hand-off uri is invalid: {error}")))
}

/// Maps a raw confidence onto [0.0, 1.0].
///
/// - [0, 1] is a fraction and kept as is.
/// - (1, 2) is a fraction with rounding overshoot and clamps to 1.0.
/// - [2, 100] is a percentage and divided by 100.
/// - Negative, non-finite, or larger values are unusable.
pub fn normalize_confidence(raw: f64) -> Option<f32> {
    if !raw.is_finite() || raw < 0.0 {
        return None;
    }
    if raw <= 1.0 {
        return Some(raw as f32);
    }
    if raw < 2.0 {
        return Some(1.0);
    }
    if raw <= 100.0 {
        return Some((raw / 100.0) as f32);
    }
    None
}

/// Decodes a base64 or `data:` URI image artifact.
///
/// Returns `None` for blank or undecodable input.
pub fn decode_artifact(encoded: &str) -> Option<ImageArtifact> {
    let encoded = encoded.trim();
    let (mime_type, data) = match encoded.strip_prefix("data:") {
        Some(rest) => {
            let (header, data) = rest.split_once(',')?;
            let mime = header.split(';').next().unwrap_or_default().trim();
            let mime = if mime.is_empty() {
                DEFAULT_ARTIFACT_MIME
            } else {
                mime
            };
            (mime.to_string(), data)
        }
        None => (DEFAULT_ARTIFACT_MIME.to_string(), encoded),
    };

    let bytes = BASE64.decode(data.trim()).ok()?;
    (!bytes.is_empty()).then_some(ImageArtifact { bytes, mime_type })
}

/// `{prediction, confidence?, whatsapp_url?}` with no success flag.
#[derive(Debug, Clone, Copy)]
pub struct FlatPredictionFamily;

#[derive(Debug, Deserialize)]
struct FlatPredictionWire {
    prediction: String,
    #[serde(default, deserialize_with = "lenient_number")]
    confidence: Option<f64>,
    #[serde(default, deserialize_with = "lenient_string")]
    whatsapp_url: Option<String>,
}

impl ResponseFamily for FlatPredictionFamily {
    fn name(&self) -> &'static str {
        "flat prediction"
    }

    fn decode(&self, payload: &Value) -> Option<Result<FamilyMatch, NormalizeError>> {
        let shaped = payload.get("success").is_none()
            && payload.get("prediction").is_some_and(Value::is_string);
        if !shaped {
            return None;
        }

        Some(decode_wire::<FlatPredictionWire>(self.name(), payload).map(|wire| {
            let handoff = wire
                .whatsapp_url
                .as_deref()
                .and_then(parse_precomputed_uri)
                .map(HandoffTarget::Precomputed)
                .unwrap_or(HandoffTarget::ServiceLookup);
            let confidence = wire.confidence.and_then(normalize_confidence);

            FamilyMatch::Result(CanonicalResult {
                damaged_part: wire.prediction.trim().to_string(),
                confidence,
                damage_detected: true,
                summary: None,
                damage_items: Vec::new(),
                total_damages: 0,
                highest_confidence: confidence,
                annotated_image: None,
                handoff,
                source_family: PayloadFamily::FlatPrediction,
            })
        }))
    }
}

/// `{success: true, analysis: {...}, annotated_image?, garage_number?}`.
#[derive(Debug, Clone, Copy)]
pub struct StructuredAnalysisFamily;

#[derive(Debug, Deserialize)]
struct StructuredWire {
    analysis: AnalysisWire,
    #[serde(default, deserialize_with = "lenient_string")]
    annotated_image: Option<String>,
    #[serde(default, deserialize_with = "lenient_string", alias = "whatsapp_number")]
    garage_number: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    whatsapp_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnalysisWire {
    #[serde(default)]
    damage_detected: Option<bool>,
    #[serde(default, deserialize_with = "lenient_string")]
    summary: Option<String>,
    #[serde(default, alias = "damages", deserialize_with = "lenient_list")]
    damage_parts: Vec<Value>,
    #[serde(default, deserialize_with = "lenient_number")]
    total_damages: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    highest_confidence: Option<f64>,
    #[serde(default, deserialize_with = "lenient_string")]
    damaged_part: Option<String>,
}

impl ResponseFamily for StructuredAnalysisFamily {
    fn name(&self) -> &'static str {
        "structured analysis"
    }

    fn decode(&self, payload: &Value) -> Option<Result<FamilyMatch, NormalizeError>> {
        let shaped = payload.get("success") == Some(&Value::Bool(true))
            && payload.get("analysis").is_some_and(Value::is_object);
        if !shaped {
            return None;
        }

        Some(
            decode_wire::<StructuredWire>(self.name(), payload)
                .map(|wire| FamilyMatch::Result(structured_to_canonical(wire))),
        )
    }
}

fn structured_to_canonical(wire: StructuredWire) -> CanonicalResult {
    let analysis = wire.analysis;
    let damage_items: Vec<DamageItem> = analysis
        .damage_parts
        .iter()
        .enumerate()
        .filter_map(|(index, raw)| {
            let item = damage_item_from_value(raw);
            if item.is_none() {
                warn!(target: "normalizer", "item_dropped: index={index}");
            }
            item
        })
        .collect();

    let damage_detected = analysis
        .damage_detected
        .unwrap_or(!damage_items.is_empty());
    let highest_confidence = analysis
        .highest_confidence
        .and_then(normalize_confidence)
        .or_else(|| {
            damage_items
                .iter()
                .filter_map(|item| item.confidence)
                .max_by(f32::total_cmp)
        });
    let total_damages = analysis
        .total_damages
        .filter(|total| total.is_finite() && *total >= 0.0)
        .map(|total| total as usize)
        .unwrap_or(damage_items.len());

    let damaged_part = analysis
        .damaged_part
        .filter(|part| !part.trim().is_empty())
        .or_else(|| damage_items.first().map(|item| item.kind.clone()))
        .unwrap_or_else(|| {
            if damage_detected {
                UNKNOWN_PART_LABEL.to_string()
            } else {
                NO_DAMAGE_LABEL.to_string()
            }
        });

    let annotated_image = wire.annotated_image.as_deref().and_then(|encoded| {
        let artifact = decode_artifact(encoded);
        if artifact.is_none() {
            warn!(target: "normalizer", "artifact_dropped: annotated image is not decodable");
        }
        artifact
    });

    let handoff = wire
        .whatsapp_url
        .as_deref()
        .and_then(parse_precomputed_uri)
        .map(HandoffTarget::Precomputed)
        .or_else(|| {
            wire.garage_number
                .filter(|phone| phone.chars().any(|ch| ch.is_ascii_digit()))
                .map(|phone| HandoffTarget::GarageContact { phone })
        })
        .unwrap_or(HandoffTarget::ServiceLookup);

    CanonicalResult {
        damaged_part: damaged_part.trim().to_string(),
        confidence: highest_confidence,
        damage_detected,
        summary: analysis.summary.filter(|summary| !summary.trim().is_empty()),
        damage_items,
        total_damages,
        highest_confidence,
        annotated_image,
        handoff,
        source_family: PayloadFamily::StructuredAnalysis,
    }
}

fn damage_item_from_value(raw: &Value) -> Option<DamageItem> {
    let kind = ["type", "kind", "label"]
        .iter()
        .find_map(|key| raw.get(key).and_then(Value::as_str))
        .map(str::trim)
        .filter(|kind| !kind.is_empty())?;
    let confidence = raw
        .get("confidence")
        .and_then(number_from_value)
        .and_then(normalize_confidence);
    if confidence.is_none() {
        debug!(target: "normalizer", "item_confidence_missing: kind={kind}");
    }
    Some(DamageItem {
        kind: kind.to_string(),
        confidence,
    })
}

/// `{success: false, error | message}`.
#[derive(Debug, Clone, Copy)]
pub struct ExplicitFailureFamily;

impl ResponseFamily for ExplicitFailureFamily {
    fn name(&self) -> &'static str {
        "explicit failure"
    }

    fn decode(&self, payload: &Value) -> Option<Result<FamilyMatch, NormalizeError>> {
        if payload.get("success") != Some(&Value::Bool(false)) {
            return None;
        }
        let message = ["error", "message"]
            .iter()
            .find_map(|key| payload.get(key).and_then(Value::as_str))?;
        Some(Ok(FamilyMatch::Failure(message.to_string())))
    }
}

fn decode_wire<T: for<'de> Deserialize<'de>>(
    family: &str,
    payload: &Value,
) -> Result<T, NormalizeError> {
    T::deserialize(payload)
        .map_err(|error| NormalizeError::Protocol(format!("{family} payload: {error}")))
}

fn parse_precomputed_uri(raw: &str) -> Option<Url> {
    match Url::parse(raw.trim()) {
        Ok(url) => Some(url),
        Err(error) => {
            debug!(target: "normalizer", "handoff_uri_ignored: {error}");
            None
        }
    }
}

fn number_from_value(value: &Value) -> Option<f64> {
    value.as_f64().or_else(|| {
        value
            .as_str()
            .and_then(|text| text.trim().trim_end_matches('%').trim().parse().ok())
    })
}

fn lenient_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(number_from_value))
}

fn lenient_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Value>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    })
}

fn lenient_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(text)) => Some(text),
        Some(Value::Number(number)) => Some(number.to_string()),
        _ => None,
    })
}

fn object_keys(payload: &Value) -> Vec<&str> {
    payload
        .as_object()
        .map(|object| object.keys().map(String::as_str).collect())
        .unwrap_or_default()
}

/// Normalization errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    /// The service explicitly reported a failure.
    #[error("service reported failure: {0}")]
    ServiceReportedFailure(String),
    /// The payload violates every known contract.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl NormalizeError {
    /// Projects the error into the user-facing taxonomy under `context`.
    pub fn to_error_info(&self, context: &str) -> ErrorInfo {
        match self {
            Self::ServiceReportedFailure(message) => ErrorInfo::service_reported(message.clone()),
            Self::Protocol(reason) => ErrorInfo::protocol(context, reason.clone()),
        }
    }
}
