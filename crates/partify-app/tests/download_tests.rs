//! Integration tests for artifact download.

mod common;

use std::fs;

use base64::Engine as _;
use common::{FLAT_BUMPER, Harness, image_candidate, ok_json};
use partify_app::AppError;
use partify_core::SelectionSource;

fn analyzed(payload: &str) -> (Harness, Vec<u8>) {
    let mut harness = Harness::new();
    harness.transport.push_analysis(ok_json(payload));
    let candidate = image_candidate("car.png");
    let original = candidate.bytes.clone();
    harness
        .workflow
        .select_file(candidate, SelectionSource::Picker)
        .expect("selection should succeed");
    harness.workflow.analyze();
    harness.run_all();
    (harness, original)
}

#[test]
fn download_tests_requires_a_result() {
    let dir = tempfile::tempdir().expect("temp dir");
    let harness = Harness::new();
    assert!(matches!(
        harness.workflow.download_artifact(dir.path()),
        Err(AppError::NoResult)
    ));
}

#[test]
fn download_tests_falls_back_to_original_image() {
    let dir = tempfile::tempdir().expect("temp dir");
    let (harness, original) = analyzed(FLAT_BUMPER);

    let path = harness
        .workflow
        .download_artifact(dir.path())
        .expect("download should succeed");

    assert_eq!(
        path.file_name().and_then(|name| name.to_str()),
        Some("bumper-damage.png")
    );
    assert_eq!(fs::read(&path).expect("artifact readable"), original);
}

#[test]
fn download_tests_prefers_annotated_image() {
    let dir = tempfile::tempdir().expect("temp dir");
    let annotated = b"annotated-jpeg".to_vec();
    let encoded = base64::engine::general_purpose::STANDARD.encode(&annotated);
    let payload = format!(
        r#"{{
            "success": true,
            "annotated_image": "data:image/jpeg;base64,{encoded}",
            "analysis": {{
                "damaged_part": "Front Bumper",
                "damage_detected": true,
                "damage_parts": [{{"type": "dent", "confidence": 0.9}}]
            }}
        }}"#
    );
    let (harness, _) = analyzed(&payload);

    let path = harness
        .workflow
        .download_artifact(&dir.path().join("nested"))
        .expect("download should succeed");

    assert_eq!(
        path.file_name().and_then(|name| name.to_str()),
        Some("front-bumper-damage.jpg")
    );
    assert_eq!(fs::read(&path).expect("artifact readable"), annotated);
}
