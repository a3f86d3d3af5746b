#![warn(missing_docs)]
//! # partify-selection
//!
//! ## Purpose
//! Acquires candidate images and manages their local preview handles.
//!
//! ## Responsibilities
//! - Validate picker and drop candidates before they become a [`Selection`].
//! - Define a backend-agnostic [`PreviewStore`] trait.
//! - Provide a directory-backed store for real sessions and a deterministic
//!   in-memory store for tests.
//! - Release superseded preview handles exactly once.
//!
//! ## Data flow
//! Picker/drop -> [`FileCandidate`] -> [`SelectionManager::select_file`] ->
//! [`Selection`] read by the workflow orchestrator.
//!
//! ## Ownership and lifetimes
//! The manager exclusively owns the active selection; downstream code only
//! borrows it.
//!
//! ## Error model
//! Invalid candidates and preview backend failures are [`SelectionError`]
//! values; [`SelectionError::to_error_info`] projects them for the user.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};
use partify_core::{
    CoreError, ErrorInfo, PreviewHandle, Selection, SelectionSource, extension_for_mime,
    validate_image_candidate,
};
use thiserror::Error;

/// MIME type declared for files whose type cannot be determined.
pub const UNKNOWN_MIME: &str = "application/octet-stream";

/// A file offered by the picker or by drag-and-drop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCandidate {
    /// Raw file bytes.
    pub bytes: Vec<u8>,
    /// Type declared by the platform.
    pub mime_type: String,
    /// Original file name.
    pub file_name: String,
}

impl FileCandidate {
    /// Creates a candidate from already-loaded bytes.
    pub fn new(
        bytes: Vec<u8>,
        mime_type: impl Into<String>,
        file_name: impl Into<String>,
    ) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
            file_name: file_name.into(),
        }
    }

    /// Loads a candidate from disk, declaring its type from magic bytes and
    /// falling back to the file extension.
    ///
    /// # Errors
    /// Returns [`SelectionError::Read`] when the file cannot be read.
    pub fn from_path(path: &Path) -> Result<Self, SelectionError> {
        let bytes = fs::read(path).map_err(|source| SelectionError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mime_type = sniff_image_mime(&bytes)
            .or_else(|| mime_from_extension(path))
            .unwrap_or(UNKNOWN_MIME);
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());

        Ok(Self::new(bytes, mime_type, file_name))
    }
}

/// Detects an image MIME type from the leading bytes.
pub fn sniff_image_mime(bytes: &[u8]) -> Option<&'static str> {
    image::guess_format(bytes)
        .ok()
        .map(|format| format.to_mime_type())
}

/// Maps a path's extension to an image MIME type.
pub fn mime_from_extension(path: &Path) -> Option<&'static str> {
    image::ImageFormat::from_path(path)
        .ok()
        .map(|format| format.to_mime_type())
}

/// Trait implemented by preview backends.
pub trait PreviewStore: Send + Sync {
    /// Materializes a preview for `bytes` and returns its handle.
    ///
    /// # Errors
    /// Returns [`SelectionError::Preview`] when the backend cannot create it.
    fn create(&self, bytes: &[u8], mime_type: &str) -> Result<PreviewHandle, SelectionError>;

    /// Revokes a previously created handle.
    ///
    /// # Errors
    /// Returns [`SelectionError::UnknownPreview`] when the handle is not live.
    fn release(&self, handle: &PreviewHandle) -> Result<(), SelectionError>;
}

static NEXT_TEMP_STORE: AtomicU64 = AtomicU64::new(0);

/// Preview store that writes each preview to a file in one directory and
/// deletes it on release.
///
/// A store made by [`DirPreviewStore::in_temp_dir`] owns its directory and
/// removes it on drop; a store made by [`DirPreviewStore::new`] leaves the
/// directory in place.
#[derive(Debug)]
pub struct DirPreviewStore {
    dir: PathBuf,
    next_id: Mutex<u64>,
    owns_dir: bool,
}

impl DirPreviewStore {
    /// Creates a store rooted at `dir`, creating the directory if needed.
    ///
    /// # Errors
    /// Returns [`SelectionError::Preview`] when the directory cannot be made.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, SelectionError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|error| {
            SelectionError::Preview(format!(
                "unable to create preview dir '{}': {error}",
                dir.display()
            ))
        })?;
        Ok(Self {
            dir,
            next_id: Mutex::new(0),
            owns_dir: false,
        })
    }

    /// Creates a store in a fresh directory under the system temp directory.
    /// The directory is removed when the store is dropped.
    ///
    /// # Errors
    /// See [`DirPreviewStore::new`].
    pub fn in_temp_dir() -> Result<Self, SelectionError> {
        let sequence = NEXT_TEMP_STORE.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!(
            "partify-previews-{}-{sequence}",
            std::process::id()
        ));
        let mut store = Self::new(dir)?;
        store.owns_dir = true;
        Ok(store)
    }

    /// Returns the backing directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl PreviewStore for DirPreviewStore {
    fn create(&self, bytes: &[u8], mime_type: &str) -> Result<PreviewHandle, SelectionError> {
        let id = {
            let mut next_id = self
                .next_id
                .lock()
                .map_err(|_| SelectionError::Preview("preview id lock poisoned".to_string()))?;
            *next_id += 1;
            *next_id
        };

        let path = self
            .dir
            .join(format!("preview-{id}.{}", extension_for_mime(mime_type)));
        fs::write(&path, bytes).map_err(|error| {
            SelectionError::Preview(format!(
                "unable to write preview '{}': {error}",
                path.display()
            ))
        })?;

        Ok(PreviewHandle {
            id,
            path: Some(path),
        })
    }

    fn release(&self, handle: &PreviewHandle) -> Result<(), SelectionError> {
        let path = handle
            .path
            .as_ref()
            .ok_or(SelectionError::UnknownPreview(handle.id))?;
        fs::remove_file(path).map_err(|_| SelectionError::UnknownPreview(handle.id))
    }
}

impl Drop for DirPreviewStore {
    fn drop(&mut self) {
        if !self.owns_dir {
            return;
        }
        if let Err(error) = fs::remove_dir_all(&self.dir) {
            warn!(
                target: "selection",
                "preview_dir_cleanup_failed: dir={} error={error}",
                self.dir.display()
            );
        }
    }
}

/// Deterministic preview store for tests; records every release.
#[derive(Debug, Default)]
pub struct InMemoryPreviewStore {
    state: Mutex<InMemoryState>,
}

#[derive(Debug, Default)]
struct InMemoryState {
    next_id: u64,
    live: BTreeMap<u64, Vec<u8>>,
    release_counts: BTreeMap<u64, u32>,
}

impl InMemoryPreviewStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns ids of handles that have not been released.
    pub fn live_handles(&self) -> Vec<u64> {
        self.state
            .lock()
            .map(|state| state.live.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Returns how many times `id` was released (including invalid repeats).
    pub fn release_count(&self, id: u64) -> u32 {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.release_counts.get(&id).copied())
            .unwrap_or(0)
    }

    /// Returns the bytes behind a live handle.
    pub fn preview_bytes(&self, id: u64) -> Option<Vec<u8>> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.live.get(&id).cloned())
    }
}

impl PreviewStore for InMemoryPreviewStore {
    fn create(&self, bytes: &[u8], _mime_type: &str) -> Result<PreviewHandle, SelectionError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| SelectionError::Preview("in-memory store lock poisoned".to_string()))?;
        state.next_id += 1;
        let id = state.next_id;
        state.live.insert(id, bytes.to_vec());
        Ok(PreviewHandle { id, path: None })
    }

    fn release(&self, handle: &PreviewHandle) -> Result<(), SelectionError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| SelectionError::Preview("in-memory store lock poisoned".to_string()))?;
        *state.release_counts.entry(handle.id).or_insert(0) += 1;
        state
            .live
            .remove(&handle.id)
            .map(|_| ())
            .ok_or(SelectionError::UnknownPreview(handle.id))
    }
}

/// Result of a selection attempt that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectOutcome {
    /// The candidate became the active selection.
    Selected,
    /// A non-image drop was ignored; nothing changed.
    Ignored,
}

/// Owns the active [`Selection`] and its preview handle.
pub struct SelectionManager {
    store: Arc<dyn PreviewStore>,
    current: Option<Selection>,
}

impl SelectionManager {
    /// Creates a manager with no selection.
    pub fn new(store: Arc<dyn PreviewStore>) -> Self {
        Self {
            store,
            current: None,
        }
    }

    /// Returns the active selection.
    pub fn current(&self) -> Option<&Selection> {
        self.current.as_ref()
    }

    /// Makes `candidate` the active selection.
    ///
    /// # Returns
    /// - `Ok(Selected)` when the candidate replaced the previous selection.
    /// - `Ok(Ignored)` for a non-image drop.
    ///
    /// # Side effects
    /// The previous preview handle is released after the new one is created.
    /// Nothing changes when the call fails.
    ///
    /// # Errors
    /// Returns [`SelectionError::InvalidCandidate`] for a non-image picker
    /// selection and [`SelectionError::Preview`] when the store fails.
    pub fn select_file(
        &mut self,
        candidate: FileCandidate,
        source: SelectionSource,
    ) -> Result<SelectOutcome, SelectionError> {
        if let Err(error) = validate_image_candidate(&candidate.bytes, &candidate.mime_type) {
            if source == SelectionSource::Drop {
                debug!(target: "selection", "drop_ignored: {error}");
                return Ok(SelectOutcome::Ignored);
            }
            warn!(target: "selection", "picker_rejected: {error}");
            return Err(SelectionError::InvalidCandidate(error));
        }

        let preview = self.store.create(&candidate.bytes, &candidate.mime_type)?;
        let selection = match Selection::new(
            candidate.bytes,
            candidate.mime_type,
            candidate.file_name,
            preview.clone(),
        ) {
            Ok(selection) => selection,
            Err(error) => {
                if let Err(release_error) = self.store.release(&preview) {
                    warn!(target: "selection", "preview_release_failed: {release_error}");
                }
                return Err(SelectionError::InvalidCandidate(error));
            }
        };

        self.release_current();
        info!(
            target: "selection",
            "selected: file={} mime={} bytes={} preview={}",
            selection.file_name,
            selection.mime_type,
            selection.bytes.len(),
            selection.preview.id
        );
        self.current = Some(selection);
        Ok(SelectOutcome::Selected)
    }

    /// Drops the active selection and releases its preview.
    pub fn clear(&mut self) {
        self.release_current();
    }

    fn release_current(&mut self) {
        if let Some(previous) = self.current.take()
            && let Err(error) = self.store.release(&previous.preview)
        {
            warn!(target: "selection", "preview_release_failed: {error}");
        }
    }
}

impl Drop for SelectionManager {
    fn drop(&mut self) {
        self.release_current();
    }
}

/// Selection layer error type.
#[derive(Debug, Error)]
pub enum SelectionError {
    /// Candidate is not a usable image.
    #[error("invalid selection: {0}")]
    InvalidCandidate(CoreError),
    /// Preview backend failure.
    #[error("preview backend failure: {0}")]
    Preview(String),
    /// Handle is not live in the store.
    #[error("unknown preview handle: {0}")]
    UnknownPreview(u64),
    /// Candidate file could not be read.
    #[error("unable to read '{}': {source}", path.display())]
    Read {
        /// File that failed to load.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

impl SelectionError {
    /// Projects the error into the user-facing taxonomy.
    pub fn to_error_info(&self) -> ErrorInfo {
        match self {
            Self::InvalidCandidate(error) => ErrorInfo::invalid_selection(error.to_string()),
            other => ErrorInfo::protocol("Failed to load image", other.to_string()),
        }
    }
}
