#![warn(missing_docs)]
//! # partify-app
//!
//! ## Purpose
//! Orchestrates selection, analysis, normalization, hand-off, and download
//! for `partify`.
//!
//! ## Responsibilities
//! - Own the single-flight [`AnalysisWorkflow`] aggregate.
//! - Load runtime configuration from the environment.
//! - Persist the downloadable artifact of a result.
//!
//! ## Data flow
//! File candidate -> selection manager -> upload envelope -> transport (worker
//! thread) -> completion channel -> normalizer -> workflow state -> UI view.
//!
//! ## Ownership and lifetimes
//! The workflow owns all session state. Worker threads own only a cloned
//! envelope and a channel sender; they never touch workflow state.
//!
//! ## Error model
//! User-visible failures live in workflow state as `ErrorInfo`. Operations
//! that fail outside that state (configuration, opening links, writing
//! files) return [`AppError`].

pub mod artifact;
pub mod config;
pub mod workflow;

use partify_core::ErrorInfo;
use partify_handoff::HandoffError;
use partify_selection::SelectionError;
use partify_upload::UploadError;
use thiserror::Error;

pub use artifact::{ArtifactError, write_artifact};
pub use config::{AppConfig, ConfigError};
pub use workflow::{
    AnalysisWorkflow, AnalyzeOutcome, Completion, CompletionDisposition, CompletionKind,
    HandoffStep, Job, ManualSpawner, TaskSpawner, ThreadSpawner, WorkflowSnapshot,
};

/// Build-time application version loaded from root `VERSION` file.
pub const APP_VERSION: &str = env!("PARTIFY_VERSION");

/// Returns the app version sourced from root `VERSION`.
pub fn app_version() -> &'static str {
    APP_VERSION
}

/// App integration error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration could not be loaded.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    /// Selection subsystem error.
    #[error("selection error: {0}")]
    Selection(#[from] SelectionError),
    /// Transport construction or endpoint error.
    #[error("upload error: {0}")]
    Upload(#[from] UploadError),
    /// Hand-off link error.
    #[error("handoff error: {0}")]
    Handoff(#[from] HandoffError),
    /// Artifact write error.
    #[error("artifact error: {0}")]
    Artifact(#[from] ArtifactError),
    /// No hand-off link is ready to open.
    #[error("no hand-off link is ready")]
    HandoffNotReady,
    /// Output could not be serialized.
    #[error("unable to render output: {0}")]
    Render(#[from] serde_json::Error),
    /// No successful analysis result exists.
    #[error("no analysis result available")]
    NoResult,
    /// The workflow ended in a user-visible failure.
    #[error("{0}")]
    Workflow(ErrorInfo),
}
