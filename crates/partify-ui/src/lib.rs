#![warn(missing_docs)]
//! # partify-ui
//!
//! ## Purpose
//! Projects workflow state into display-ready views.
//!
//! ## Responsibilities
//! - Render a [`CanonicalResult`] as a [`ResultView`] (headline, part,
//!   confidence percentage, top defects).
//! - Project the whole workflow into a [`WorkflowView`] that tells a shell
//!   which controls are enabled and which message to show.
//!
//! ## Data flow
//! Workflow state -> [`project_workflow`] -> [`WorkflowView`] -> shell output.
//!
//! ## Ownership and lifetimes
//! Views own their strings so a shell can keep them after the workflow moves
//! on.
//!
//! ## Error model
//! Views are total: every reachable state has a projection.

use std::fmt::Write as _;

use partify_core::{
    CanonicalResult, DisplayOrder, HandoffState, RequestState, Selection,
};
use serde::Serialize;

/// Label of the analyze control when idle.
pub const ANALYZE_LABEL: &str = "Analyze Damage";

/// Label of the analyze control while a request is outstanding.
pub const ANALYZING_LABEL: &str = "Analyzing Damage...";

/// Label of the hand-off control.
pub const QUOTE_LABEL: &str = "Get Quote on WhatsApp";

/// Coarse stage of the analysis pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AnalysisStage {
    /// Nothing selected.
    AwaitingImage,
    /// Image selected, not analyzed.
    Ready,
    /// Request outstanding.
    Analyzing,
    /// Result available.
    Complete,
    /// Request failed.
    Failed,
}

/// One displayed defect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DamageItemView {
    /// Defect type.
    pub kind: String,
    /// Rounded percentage such as `92%`, omitted when unknown.
    pub confidence: Option<String>,
}

/// Display projection of a canonical result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultView {
    /// `Damage Detected` or `No Damage Detected`.
    pub headline: String,
    /// Damaged part label.
    pub part: String,
    /// Rounded percentage, omitted when the service gave none.
    pub confidence: Option<String>,
    /// Service summary.
    pub summary: Option<String>,
    /// At most three defects.
    pub items: Vec<DamageItemView>,
    /// Total defects reported.
    pub total_damages: usize,
    /// Whether an annotated image can be downloaded.
    pub has_annotated_image: bool,
}

impl ResultView {
    /// Renders the view as plain text lines.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", self.headline);
        let _ = writeln!(out, "Part: {}", self.part);
        if let Some(confidence) = &self.confidence {
            let _ = writeln!(out, "Confidence: {confidence}");
        }
        if let Some(summary) = &self.summary {
            let _ = writeln!(out, "Summary: {summary}");
        }
        if !self.items.is_empty() {
            let _ = writeln!(out, "Top defects ({} total):", self.total_damages);
            for item in &self.items {
                match &item.confidence {
                    Some(confidence) => {
                        let _ = writeln!(out, "  - {} ({confidence})", item.kind);
                    }
                    None => {
                        let _ = writeln!(out, "  - {}", item.kind);
                    }
                }
            }
        }
        if self.has_annotated_image {
            let _ = writeln!(out, "Annotated image available");
        }
        out
    }
}

/// Formats a [0, 1] confidence as a rounded percentage.
pub fn format_confidence(confidence: f32) -> String {
    format!("{}%", (confidence * 100.0).round() as i64)
}

/// Projects a canonical result for display.
pub fn present(result: &CanonicalResult, order: DisplayOrder) -> ResultView {
    ResultView {
        headline: if result.damage_detected {
            "Damage Detected".to_string()
        } else {
            "No Damage Detected".to_string()
        },
        part: result.damaged_part.clone(),
        confidence: result.confidence.map(format_confidence),
        summary: result.summary.clone(),
        items: result
            .top_damage_items(order)
            .into_iter()
            .map(|item| DamageItemView {
                kind: item.kind.clone(),
                confidence: item.confidence.map(format_confidence),
            })
            .collect(),
        total_damages: result.total_damages,
        has_annotated_image: result.annotated_image.is_some(),
    }
}

/// Display projection of the hand-off lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum HandoffView {
    /// Hand-off control hidden (no result).
    Unavailable,
    /// Hand-off control offered.
    Offered,
    /// Lookup outstanding.
    Resolving,
    /// Link ready to open.
    Ready(String),
    /// Lookup failed with this message.
    Failed(String),
}

/// Flat projection of the whole workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkflowView {
    /// Selected file name.
    pub selected_file: Option<String>,
    /// Pipeline stage.
    pub stage: AnalysisStage,
    /// Whether the analyze control accepts input.
    pub analyze_enabled: bool,
    /// Current analyze control label.
    pub analyze_label: String,
    /// Result projection when the request succeeded.
    pub result: Option<ResultView>,
    /// Error message when the request failed.
    pub error: Option<String>,
    /// Hand-off projection.
    pub handoff: HandoffView,
}

/// Projects workflow state into a [`WorkflowView`].
pub fn project_workflow(
    selection: Option<&Selection>,
    request: &RequestState,
    handoff: &HandoffState,
    order: DisplayOrder,
) -> WorkflowView {
    let stage = match (selection, request) {
        (_, RequestState::InFlight(_)) => AnalysisStage::Analyzing,
        (_, RequestState::Succeeded(_)) => AnalysisStage::Complete,
        (_, RequestState::Failed(_)) => AnalysisStage::Failed,
        (Some(_), RequestState::Idle) => AnalysisStage::Ready,
        (None, RequestState::Idle) => AnalysisStage::AwaitingImage,
    };
    let in_flight = request.is_in_flight();

    let handoff = match (request.result(), handoff) {
        (None, _) => HandoffView::Unavailable,
        (Some(_), HandoffState::Idle) => HandoffView::Offered,
        (Some(_), HandoffState::Pending(_)) => HandoffView::Resolving,
        (Some(_), HandoffState::Ready(uri)) => HandoffView::Ready(uri.to_string()),
        (Some(_), HandoffState::Failed(error)) => HandoffView::Failed(error.message.clone()),
    };

    WorkflowView {
        selected_file: selection.map(|selection| selection.file_name.clone()),
        stage,
        analyze_enabled: selection.is_some() && !in_flight,
        analyze_label: if in_flight {
            ANALYZING_LABEL.to_string()
        } else {
            ANALYZE_LABEL.to_string()
        },
        result: request.result().map(|result| present(result, order)),
        error: request.error().map(|error| error.message.clone()),
        handoff,
    }
}
