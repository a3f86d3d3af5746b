use std::fs;
use std::path::PathBuf;

fn main() {
    let manifest_dir = PathBuf::from(std::env::var("CARGO_MANIFEST_DIR").expect("manifest dir"));
    let version_path = manifest_dir
        .parent()
        .and_then(|crates_dir| crates_dir.parent())
        .expect("workspace root")
        .join("VERSION");

    println!("cargo:rerun-if-changed={}", version_path.display());

    let version = fs::read_to_string(&version_path)
        .map(|raw| raw.trim().to_string())
        .expect("read VERSION file");
    assert!(!version.is_empty(), "VERSION must not be empty");

    println!("cargo:rustc-env=PARTIFY_VERSION={version}");
}
