//! Integration tests for the blocking HTTP transport against a local server.

use std::net::TcpListener;
use std::time::Duration;

use mockito::{Matcher, Server};
use partify_upload::{
    AnalysisTransport, HandoffRequest, HttpTransport, ServiceEndpoints, UPLOAD_FIELD_NAME,
    UploadEnvelope, UploadError, idempotency_key_for_upload,
};

fn envelope() -> UploadEnvelope {
    let bytes = b"fake-png-bytes".to_vec();
    UploadEnvelope {
        field_name: UPLOAD_FIELD_NAME.to_string(),
        file_name: "door.png".to_string(),
        mime_type: "image/png".to_string(),
        idempotency_key: idempotency_key_for_upload(&bytes, "image/png"),
        bytes,
    }
}

fn transport(base: &str, timeout: Duration) -> HttpTransport {
    let endpoints = ServiceEndpoints::new(base).expect("loopback base should be accepted");
    HttpTransport::new(endpoints, timeout).expect("client should build")
}

#[test]
fn http_transport_tests_analyze_posts_multipart_file_with_key() {
    let mut server = Server::new();
    let envelope = envelope();
    let mock = server
        .mock("POST", "/predict")
        .match_header("Idempotency-Key", envelope.idempotency_key.as_str())
        .match_header(
            "content-type",
            Matcher::Regex("^multipart/form-data; boundary=".to_string()),
        )
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex(r#"name="file"; filename="door.png""#.to_string()),
            Matcher::Regex("(?i)content-type: image/png".to_string()),
            Matcher::Regex("fake-png-bytes".to_string()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"prediction":"door","confidence":0.9}"#)
        .create();

    let raw = transport(&server.url(), Duration::from_secs(5))
        .analyze(&envelope)
        .expect("local server should answer");

    mock.assert();
    assert_eq!(raw.status, 200);
    assert_eq!(raw.body, br#"{"prediction":"door","confidence":0.9}"#.to_vec());
}

#[test]
fn http_transport_tests_handoff_sends_part_query() {
    let mut server = Server::new();
    let mock = server
        .mock("GET", "/whatsapp")
        .match_query(Matcher::UrlEncoded(
            "part".to_string(),
            "front bumper".to_string(),
        ))
        .match_header("accept", "application/json")
        .with_status(200)
        .with_body(r#"{"whatsapp_url":"https://wa.me/15550100"}"#)
        .create();

    let raw = transport(&server.url(), Duration::from_secs(5))
        .request_handoff(&HandoffRequest {
            part: "front bumper".to_string(),
        })
        .expect("local server should answer");

    mock.assert();
    assert!(raw.is_success());
    assert_eq!(raw.body, br#"{"whatsapp_url":"https://wa.me/15550100"}"#.to_vec());
}

#[test]
fn http_transport_tests_non_success_status_passes_through() {
    let mut server = Server::new();
    let mock = server
        .mock("POST", "/predict")
        .with_status(503)
        .with_body(r#"{"detail":"model warming up"}"#)
        .create();

    let raw = transport(&server.url(), Duration::from_secs(5))
        .analyze(&envelope())
        .expect("an error status is still a response");

    mock.assert();
    assert_eq!(raw.status, 503);
    assert!(!raw.is_success());
    assert_eq!(raw.body, br#"{"detail":"model warming up"}"#.to_vec());
}

#[test]
fn http_transport_tests_silent_server_times_out_as_network_error() {
    // Accepted by the kernel backlog but never answered.
    let listener = TcpListener::bind("127.0.0.1:0").expect("listener should bind");
    let address = listener.local_addr().expect("listener should have an address");

    let result = transport(
        &format!("http://{address}"),
        Duration::from_millis(200),
    )
    .analyze(&envelope());

    assert!(matches!(result, Err(UploadError::Network(_))), "{result:?}");
    drop(listener);
}

#[test]
fn http_transport_tests_refused_connection_is_network_error() {
    let address = {
        let listener = TcpListener::bind("127.0.0.1:0").expect("listener should bind");
        listener.local_addr().expect("listener should have an address")
    };

    let result = transport(&format!("http://{address}"), Duration::from_secs(2))
        .request_handoff(&HandoffRequest {
            part: "mirror".to_string(),
        });

    assert!(matches!(result, Err(UploadError::Network(_))), "{result:?}");
}
