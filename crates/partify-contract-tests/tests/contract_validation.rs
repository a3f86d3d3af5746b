//! Validates contract fixtures against frozen JSON schemas and checks that
//! every valid fixture normalizes into the expected family.

use jsonschema::JSONSchema;
use partify_analysis_contract::{NormalizeError, normalize_value, parse_handoff_response};
use partify_core::{DisplayOrder, HandoffTarget, PayloadFamily};
use serde_json::Value;

const CONTRACTS_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/../../contracts");

fn load_json(path: &str) -> Value {
    let raw = std::fs::read_to_string(path).expect("json file should be readable");
    serde_json::from_str(&raw).expect("json file should be valid")
}

fn compile_validator(name: &str) -> JSONSchema {
    let schema = load_json(&format!("{CONTRACTS_DIR}/{name}.schema.json"));
    JSONSchema::compile(&schema).expect("schema should compile")
}

fn fixture(name: &str) -> Value {
    load_json(&format!("{CONTRACTS_DIR}/fixtures/{name}.valid.json"))
}

#[test]
fn fixtures_match_their_schemas() {
    for name in [
        "flat-prediction",
        "structured-analysis",
        "explicit-failure",
        "handoff-response",
    ] {
        let validator = compile_validator(name);
        assert!(
            validator.is_valid(&fixture(name)),
            "{name} fixture should validate against schema"
        );
    }
}

#[test]
fn family_schemas_are_mutually_exclusive() {
    let flat = compile_validator("flat-prediction");
    let structured = compile_validator("structured-analysis");
    let failure = compile_validator("explicit-failure");

    assert!(!flat.is_valid(&fixture("structured-analysis")));
    assert!(!flat.is_valid(&fixture("explicit-failure")));
    assert!(!structured.is_valid(&fixture("flat-prediction")));
    assert!(!structured.is_valid(&fixture("explicit-failure")));
    assert!(!failure.is_valid(&fixture("flat-prediction")));
    assert!(!failure.is_valid(&fixture("structured-analysis")));
}

#[test]
fn flat_fixture_normalizes() {
    let result = normalize_value(&fixture("flat-prediction")).expect("flat fixture should normalize");
    assert_eq!(result.source_family, PayloadFamily::FlatPrediction);
    assert_eq!(result.damaged_part, "bumper");
    assert_eq!(result.confidence, Some(0.87));
}

#[test]
fn structured_fixture_normalizes() {
    let result = normalize_value(&fixture("structured-analysis"))
        .expect("structured fixture should normalize");
    assert_eq!(result.source_family, PayloadFamily::StructuredAnalysis);
    assert_eq!(result.damaged_part, "Front Bumper");
    assert_eq!(result.damage_items.len(), 4);
    assert_eq!(result.total_damages, 4);
    assert_eq!(result.top_damage_items(DisplayOrder::SourceOrder).len(), 3);
    assert!(result.annotated_image.is_some());
    assert_eq!(
        result.handoff,
        HandoffTarget::GarageContact {
            phone: "+1 555 0100".to_string()
        }
    );
}

#[test]
fn failure_fixture_is_service_reported() {
    assert_eq!(
        normalize_value(&fixture("explicit-failure")),
        Err(NormalizeError::ServiceReportedFailure(
            "no car detected".to_string()
        ))
    );
}

#[test]
fn handoff_fixture_parses() {
    let raw = serde_json::to_vec(&fixture("handoff-response")).expect("fixture should serialize");
    let uri = parse_handoff_response(&raw).expect("hand-off fixture should parse");
    assert_eq!(uri.host_str(), Some("wa.me"));
}
