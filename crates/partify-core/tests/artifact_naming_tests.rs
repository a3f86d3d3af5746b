//! Tests deterministic artifact naming from damaged-part labels.

use partify_core::{artifact_file_name, slugify_label};

#[test]
fn artifact_naming_tests_lowercase_and_hyphenate_labels() {
    assert_eq!(
        artifact_file_name(Some("Rear  Left Door"), "image/png"),
        "rear-left-door-damage.png"
    );
    assert_eq!(slugify_label("Bumper/Front"), "bumperfront");
}

#[test]
fn artifact_naming_tests_fall_back_for_missing_labels() {
    assert_eq!(artifact_file_name(None, "image/jpeg"), "car-damage-analysis.jpg");
    assert_eq!(artifact_file_name(Some("   "), "image/webp"), "car-damage-analysis.webp");
    assert_eq!(artifact_file_name(Some("??"), "application/x-unknown"), "car-damage-analysis.bin");
}
