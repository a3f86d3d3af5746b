//! Integration tests for single-flight analysis dispatch.

mod common;

use common::{FLAT_BUMPER, Harness, image_candidate, ok_json};
use partify_app::{AnalyzeOutcome, CompletionDisposition};
use partify_core::{RequestState, SelectionSource};
use partify_ui::{ANALYZING_LABEL, AnalysisStage};

#[test]
fn single_flight_tests_second_analyze_dispatches_nothing() {
    let mut harness = Harness::new();
    harness
        .workflow
        .select_file(image_candidate("car.png"), SelectionSource::Picker)
        .expect("selection should succeed");

    let first = harness.workflow.analyze();
    assert!(matches!(first, AnalyzeOutcome::Dispatched(_)));
    assert_eq!(harness.workflow.analyze(), AnalyzeOutcome::AlreadyInFlight);
    assert_eq!(harness.workflow.analyze(), AnalyzeOutcome::AlreadyInFlight);
    assert_eq!(harness.spawner.pending(), 1);

    let view = harness.workflow.view();
    assert_eq!(view.stage, AnalysisStage::Analyzing);
    assert!(!view.analyze_enabled);
    assert_eq!(view.analyze_label, ANALYZING_LABEL);
}

#[test]
fn single_flight_tests_analyze_without_selection_is_noop() {
    let mut harness = Harness::new();
    assert_eq!(harness.workflow.analyze(), AnalyzeOutcome::NoSelection);
    assert_eq!(harness.spawner.pending(), 0);
    assert_eq!(harness.workflow.request_state(), &RequestState::Idle);
}

#[test]
fn single_flight_tests_completion_reenables_analyze_with_fresh_token() {
    let mut harness = Harness::new();
    harness.transport.push_analysis(ok_json(FLAT_BUMPER));
    harness.transport.push_analysis(ok_json(FLAT_BUMPER));
    harness
        .workflow
        .select_file(image_candidate("car.png"), SelectionSource::Drop)
        .expect("selection should succeed");

    let AnalyzeOutcome::Dispatched(first) = harness.workflow.analyze() else {
        panic!("first analyze should dispatch");
    };
    assert_eq!(harness.run_all(), vec![CompletionDisposition::Applied]);
    assert!(harness.workflow.result().is_some());
    assert!(harness.workflow.view().analyze_enabled);

    let AnalyzeOutcome::Dispatched(second) = harness.workflow.analyze() else {
        panic!("re-analyze should dispatch");
    };
    assert!(second > first);
    assert!(harness.workflow.result().is_none());
    assert_eq!(harness.run_all(), vec![CompletionDisposition::Applied]);
    assert_eq!(harness.transport.envelopes().len(), 2);
}

#[test]
fn single_flight_tests_envelope_carries_selection() {
    let mut harness = Harness::new();
    harness.transport.push_analysis(ok_json(FLAT_BUMPER));
    let candidate = image_candidate("front.png");
    let expected_bytes = candidate.bytes.clone();
    harness
        .workflow
        .select_file(candidate, SelectionSource::Picker)
        .expect("selection should succeed");

    harness.workflow.analyze();
    harness.run_all();

    let envelopes = harness.transport.envelopes();
    assert_eq!(envelopes.len(), 1);
    assert_eq!(envelopes[0].field_name, "file");
    assert_eq!(envelopes[0].file_name, "front.png");
    assert_eq!(envelopes[0].mime_type, "image/png");
    assert_eq!(envelopes[0].bytes, expected_bytes);
}
