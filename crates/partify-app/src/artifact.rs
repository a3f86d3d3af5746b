//! Download artifact persistence.
//!
//! The annotated image is preferred; a result without one falls back to the
//! originally selected image so a download always yields a file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::info;
use partify_core::{CanonicalResult, Selection, artifact_file_name};
use thiserror::Error;

/// Writes the downloadable image of `result` into `dir` and returns its path.
///
/// # Errors
/// Returns [`ArtifactError::NoArtifact`] when the result has no annotated
/// image and no original selection is available, and
/// [`ArtifactError::Write`] when the directory or file cannot be written.
pub fn write_artifact(
    dir: &Path,
    result: &CanonicalResult,
    original: Option<&Selection>,
) -> Result<PathBuf, ArtifactError> {
    let (bytes, mime_type, source) = match (&result.annotated_image, original) {
        (Some(annotated), _) => (&annotated.bytes, annotated.mime_type.as_str(), "annotated"),
        (None, Some(selection)) => (&selection.bytes, selection.mime_type.as_str(), "original"),
        (None, None) => return Err(ArtifactError::NoArtifact),
    };

    let path = dir.join(artifact_file_name(result.part_label(), mime_type));
    fs::create_dir_all(dir).map_err(|source| ArtifactError::Write {
        path: dir.to_path_buf(),
        source,
    })?;
    fs::write(&path, bytes).map_err(|source| ArtifactError::Write {
        path: path.clone(),
        source,
    })?;

    info!(
        target: "artifact",
        "written: source={source} bytes={} path={}",
        bytes.len(),
        path.display()
    );
    Ok(path)
}

/// Artifact persistence errors.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// Neither an annotated nor an original image is available.
    #[error("no image available to download")]
    NoArtifact,
    /// Filesystem write failed.
    #[error("unable to write '{}': {source}", path.display())]
    Write {
        /// Target path.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },
}
