//! Benchmark smoke test for the normalize and workflow loop.

use std::sync::Arc;
use std::time::Instant;

use partify_analysis_contract::normalize;
use partify_app::{AnalysisWorkflow, ManualSpawner};
use partify_core::{DisplayOrder, SelectionSource};
use partify_selection::{FileCandidate, InMemoryPreviewStore};
use partify_upload::{
    AnalysisTransport, HandoffRequest, RawResponse, UploadEnvelope, UploadError,
    idempotency_key_for_upload,
};

const STRUCTURED: &str = r#"{
    "success": true,
    "analysis": {
        "damage_detected": true,
        "summary": "Several defects",
        "damage_parts": [
            {"type": "dent", "confidence": 92},
            {"type": "scratch", "confidence": 0.41},
            {"type": "crack", "confidence": 0.66},
            {"type": "paint", "confidence": 0.3},
            {"type": "glass", "confidence": 0.12}
        ]
    }
}"#;

struct FixedTransport;

impl AnalysisTransport for FixedTransport {
    fn analyze(&self, _envelope: &UploadEnvelope) -> Result<RawResponse, UploadError> {
        Ok(RawResponse {
            status: 200,
            body: STRUCTURED.as_bytes().to_vec(),
        })
    }

    fn request_handoff(&self, _request: &HandoffRequest) -> Result<RawResponse, UploadError> {
        Err(UploadError::Network("not scripted".to_string()))
    }
}

#[test]
fn benchmark_normalizer_smoke_prints_latency() {
    let start = Instant::now();
    let mut displayed = 0usize;

    for _ in 0..1_000 {
        let result = normalize(STRUCTURED.as_bytes()).expect("payload should normalize");
        displayed += result
            .top_damage_items(DisplayOrder::ConfidenceDescending)
            .len();
    }

    let elapsed_ms = start.elapsed().as_millis();
    println!("benchmark_normalizer_elapsed_ms={elapsed_ms}");
    println!("benchmark_normalizer_displayed_total={displayed}");

    assert_eq!(displayed, 3_000);
    // This is a lightweight guardrail; strict NFR checks are environment-specific.
    assert!(
        elapsed_ms < 5_000,
        "normalizer smoke benchmark should stay bounded"
    );
}

#[test]
fn benchmark_workflow_cycle_smoke_prints_latency() {
    let spawner = Arc::new(ManualSpawner::new());
    let mut workflow = AnalysisWorkflow::new(
        Arc::new(InMemoryPreviewStore::new()),
        Arc::new(FixedTransport),
        Arc::<ManualSpawner>::clone(&spawner),
    );
    let image = vec![0x5a_u8; 16 * 1024];

    let start = Instant::now();
    let mut key_lengths = 0usize;

    for index in 0..200 {
        let candidate = FileCandidate::new(image.clone(), "image/jpeg", format!("car-{index}.jpg"));
        workflow
            .select_file(candidate, SelectionSource::Drop)
            .expect("selection should succeed");
        workflow.analyze();
        while spawner.run_next() {}
        workflow.poll_completions();
        assert!(workflow.result().is_some());
        key_lengths += idempotency_key_for_upload(&image, "image/jpeg").len();
    }
    workflow.reset();

    let elapsed_ms = start.elapsed().as_millis();
    println!("benchmark_workflow_elapsed_ms={elapsed_ms}");
    println!("benchmark_idempotency_key_total_len={key_lengths}");

    assert!(
        elapsed_ms < 5_000,
        "workflow smoke benchmark should stay bounded"
    );
}
