//! Integration tests for hand-off lookup response parsing.

use partify_analysis_contract::{NormalizeError, parse_handoff_response};

#[test]
fn handoff_response_tests_accepts_known_uri_fields() {
    let url = parse_handoff_response(br#"{"whatsapp_url":"https://wa.me/15550100?text=hi"}"#)
        .expect("whatsapp_url should parse");
    assert_eq!(url.host_str(), Some("wa.me"));

    let url = parse_handoff_response(br#"{"url":"whatsapp://send?phone=15550100"}"#)
        .expect("url should parse");
    assert_eq!(url.scheme(), "whatsapp");
}

#[test]
fn handoff_response_tests_rejects_missing_or_invalid_uris() {
    assert!(matches!(
        parse_handoff_response(br#"{"link":42}"#),
        Err(NormalizeError::Protocol(_))
    ));
    assert!(matches!(
        parse_handoff_response(br#"{"url":"not a uri"}"#),
        Err(NormalizeError::Protocol(_))
    ));
    assert!(matches!(
        parse_handoff_response(b""),
        Err(NormalizeError::Protocol(_))
    ));
}
