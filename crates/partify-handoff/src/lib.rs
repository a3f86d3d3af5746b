#![warn(missing_docs)]
//! # partify-handoff
//!
//! ## Purpose
//! Turns a canonical result into a messaging deep link for a repair garage.
//!
//! ## Responsibilities
//! - Resolve a [`HandoffTarget`] into a ready URI or a pending service lookup.
//! - Build `wa.me` deep links from a garage contact and a damaged part.
//! - Enforce the allowed deep-link schemes.
//! - Hand URIs to the platform through an injectable [`LinkOpener`].
//! - Redact contact numbers before URIs reach logs.
//!
//! ## Data flow
//! [`CanonicalResult`] -> [`resolve_target`] -> ready URI, or a lookup whose
//! response the workflow parses -> [`LinkOpener::open`].
//!
//! ## Error model
//! Unusable contacts, blank part names, disallowed schemes, and launcher
//! failures are [`HandoffError`] values. None of them touch the analysis
//! request state.
//!
//! ## Security and privacy notes
//! Deep links carry phone numbers; log them only through [`redact_contact`].
//!
//! ## Example
//! ```rust
//! use partify_handoff::build_whatsapp_uri;
//!
//! let uri = build_whatsapp_uri("+1 (555) 0100", "bumper").unwrap();
//! assert_eq!(uri.path(), "/15550100");
//! ```

use std::process::{Command, Stdio};

use log::info;
use partify_core::{CanonicalResult, HandoffTarget};
use thiserror::Error;
use url::Url;

/// Base of locally built WhatsApp deep links.
pub const WHATSAPP_BASE: &str = "https://wa.me/";

/// URI schemes a hand-off may open.
pub const ALLOWED_SCHEMES: &[&str] = &["https", "whatsapp"];

/// Resolved next step for a hand-off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandoffResolution {
    /// URI available without a network call.
    Ready(Url),
    /// The service must be asked for a URI for this part.
    NeedsLookup {
        /// Damaged part name sent to the service.
        part: String,
    },
}

/// Resolves the hand-off target embedded in `result`.
///
/// # Errors
/// Returns [`HandoffError::MissingPart`] when a URI has to be built or looked
/// up but the result carries no part name, and [`HandoffError::InvalidContact`]
/// when the garage contact has no digits.
pub fn resolve_target(result: &CanonicalResult) -> Result<HandoffResolution, HandoffError> {
    match &result.handoff {
        HandoffTarget::Precomputed(uri) => {
            validate_handoff_uri(uri)?;
            Ok(HandoffResolution::Ready(uri.clone()))
        }
        HandoffTarget::GarageContact { phone } => {
            let part = result.part_label().ok_or(HandoffError::MissingPart)?;
            build_whatsapp_uri(phone, part).map(HandoffResolution::Ready)
        }
        HandoffTarget::ServiceLookup => {
            let part = result.part_label().ok_or(HandoffError::MissingPart)?;
            Ok(HandoffResolution::NeedsLookup {
                part: part.to_string(),
            })
        }
    }
}

/// Builds a `wa.me` deep link asking `phone` for a quote on `part`.
///
/// # Errors
/// Returns [`HandoffError::InvalidContact`] when `phone` has no digits.
pub fn build_whatsapp_uri(phone: &str, part: &str) -> Result<Url, HandoffError> {
    let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return Err(HandoffError::InvalidContact);
    }

    let mut uri = Url::parse(WHATSAPP_BASE)
        .and_then(|base| base.join(&digits))
        .map_err(|error| HandoffError::InvalidUri(error.to_string()))?;
    uri.query_pairs_mut()
        .append_pair("text", &quote_message(part));
    Ok(uri)
}

/// Message pre-filled in the garage chat.
pub fn quote_message(part: &str) -> String {
    format!("Hi, I would like a repair quote. Damaged part: {}", part.trim())
}

/// Validates that a hand-off URI uses an allowed scheme.
///
/// # Errors
/// Returns [`HandoffError::DisallowedScheme`] otherwise.
pub fn validate_handoff_uri(uri: &Url) -> Result<(), HandoffError> {
    if ALLOWED_SCHEMES.contains(&uri.scheme()) {
        Ok(())
    } else {
        Err(HandoffError::DisallowedScheme(uri.scheme().to_string()))
    }
}

/// Replaces digit runs in the path and query with `<redacted>`.
pub fn redact_contact(uri: &Url) -> String {
    let mut redacted = uri[..url::Position::BeforePath].to_string();
    let mut in_digits = false;

    for ch in uri[url::Position::BeforePath..].chars() {
        if ch.is_ascii_digit() {
            if !in_digits {
                redacted.push_str("<redacted>");
                in_digits = true;
            }
        } else {
            in_digits = false;
            redacted.push(ch);
        }
    }
    redacted
}

/// Platform mechanism that opens a URI outside the application.
pub trait LinkOpener {
    /// Opens `uri`; fire-and-forget.
    ///
    /// # Errors
    /// Returns [`HandoffError::Launch`] when the platform refuses.
    fn open(&self, uri: &Url) -> Result<(), HandoffError>;
}

/// Opens URIs with the desktop's default handler.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLinkOpener;

impl LinkOpener for SystemLinkOpener {
    fn open(&self, uri: &Url) -> Result<(), HandoffError> {
        validate_handoff_uri(uri)?;

        let (program, args) = opener_invocation(std::env::consts::OS, uri);
        Command::new(program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|error| HandoffError::Launch(error.to_string()))?;

        info!(target: "handoff", "opened: uri={}", redact_contact(uri));
        Ok(())
    }
}

/// Program and arguments that open `uri` on `os`.
///
/// The URI is always passed as one argument and never reaches a shell, so
/// `&` in a query string cannot split the command on Windows.
fn opener_invocation(os: &str, uri: &Url) -> (&'static str, Vec<String>) {
    match os {
        "windows" => (
            "rundll32",
            vec![
                "url.dll,FileProtocolHandler".to_string(),
                uri.as_str().to_string(),
            ],
        ),
        "macos" => ("open", vec![uri.as_str().to_string()]),
        _ => ("xdg-open", vec![uri.as_str().to_string()]),
    }
}

/// Hand-off errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandoffError {
    /// Garage contact has no usable digits.
    #[error("garage contact has no phone digits")]
    InvalidContact,
    /// Result has no part name to parameterize the link.
    #[error("result has no damaged part name")]
    MissingPart,
    /// URI could not be assembled.
    #[error("invalid hand-off uri: {0}")]
    InvalidUri(String),
    /// URI scheme is not allowed.
    #[error("hand-off scheme not allowed: {0}")]
    DisallowedScheme(String),
    /// Platform opener failed.
    #[error("unable to open link: {0}")]
    Launch(String),
}

#[cfg(test)]
mod tests {
    //! Unit tests for deep-link building and redaction.

    use super::*;

    #[test]
    fn windows_opener_passes_query_ampersands_as_one_argument() {
        let uri = Url::parse("https://wa.me/447700900123?text=bumper&calc=1&x=%26")
            .expect("uri should parse");
        let (program, args) = opener_invocation("windows", &uri);

        assert_eq!(program, "rundll32");
        assert_eq!(args.len(), 2);
        assert_eq!(args[0], "url.dll,FileProtocolHandler");
        assert_eq!(args[1], uri.as_str());
        assert!(args.iter().all(|arg| arg != "/C" && arg != "start"));
    }

    #[test]
    fn unix_openers_take_the_uri_verbatim() {
        let uri = Url::parse("https://wa.me/1?text=a&b=c").expect("uri should parse");
        assert_eq!(
            opener_invocation("macos", &uri),
            ("open", vec![uri.as_str().to_string()])
        );
        assert_eq!(
            opener_invocation("linux", &uri),
            ("xdg-open", vec![uri.as_str().to_string()])
        );
    }

    #[test]
    fn builds_wa_me_link_with_quote_text() {
        let uri = build_whatsapp_uri("+44 7700-900123", "Front Bumper").expect("uri should build");
        assert_eq!(uri.host_str(), Some("wa.me"));
        assert_eq!(uri.path(), "/447700900123");
        let text = uri
            .query_pairs()
            .find(|(key, _)| key == "text")
            .map(|(_, value)| value.into_owned())
            .expect("text param should exist");
        assert!(text.ends_with("Damaged part: Front Bumper"));
    }

    #[test]
    fn rejects_contacts_without_digits() {
        assert_eq!(
            build_whatsapp_uri("call us", "door"),
            Err(HandoffError::InvalidContact)
        );
    }

    #[test]
    fn redaction_hides_phone_numbers() {
        let uri = Url::parse("https://wa.me/15550100?text=door").expect("uri should parse");
        let redacted = redact_contact(&uri);
        assert_eq!(redacted, "https://wa.me/<redacted>?text=door");
    }

    #[test]
    fn scheme_policy_blocks_scripts() {
        let uri = Url::parse("javascript:alert(1)").expect("uri should parse");
        assert!(validate_handoff_uri(&uri).is_err());
        let uri = Url::parse("whatsapp://send?phone=1").expect("uri should parse");
        assert!(validate_handoff_uri(&uri).is_ok());
    }
}
