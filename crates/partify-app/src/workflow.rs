//! Single-flight analysis workflow controller.
//!
//! All state lives in one [`AnalysisWorkflow`] mutated on the control thread.
//! External calls run through a [`TaskSpawner`] and report back as
//! [`Completion`] messages. A completion is honored only when its token still
//! matches the outstanding request; anything else is a stale completion and
//! is dropped.

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};
use partify_analysis_contract::{normalize, parse_handoff_response};
use partify_core::{
    ANALYSIS_ERROR_CONTEXT, CanonicalResult, DisplayOrder, ErrorInfo, HANDOFF_ERROR_CONTEXT,
    HandoffState, RequestId, RequestState, Selection, SelectionSource,
};
use partify_handoff::{
    HandoffResolution, LinkOpener, redact_contact, resolve_target, validate_handoff_uri,
};
use partify_selection::{FileCandidate, PreviewStore, SelectOutcome, SelectionManager};
use partify_ui::{WorkflowView, project_workflow};
use partify_upload::{
    AnalysisTransport, HandoffRequest, RawResponse, ResponseClass, UploadEnvelope, UploadError,
    classify_response,
};
use url::Url;

use crate::AppError;
use crate::artifact::write_artifact;

/// Unit of work executed off the control thread.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs external calls without blocking the control thread.
pub trait TaskSpawner: Send + Sync {
    /// Schedules `job`.
    ///
    /// # Errors
    /// Returns the platform error when the job cannot be scheduled.
    fn spawn(&self, job: Job) -> std::io::Result<()>;
}

/// Runs each job on its own named OS thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSpawner;

impl TaskSpawner for ThreadSpawner {
    fn spawn(&self, job: Job) -> std::io::Result<()> {
        std::thread::Builder::new()
            .name("partify-request".to_string())
            .spawn(job)
            .map(|_| ())
    }
}

/// Queues jobs until the caller runs them; gives tests full control over
/// completion timing.
#[derive(Default)]
pub struct ManualSpawner {
    queue: Mutex<VecDeque<Job>>,
}

impl ManualSpawner {
    /// Creates an empty spawner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of queued jobs.
    pub fn pending(&self) -> usize {
        self.queue.lock().map(|queue| queue.len()).unwrap_or(0)
    }

    /// Runs the oldest queued job. Returns `false` when the queue is empty.
    pub fn run_next(&self) -> bool {
        let job = self.queue.lock().ok().and_then(|mut queue| queue.pop_front());
        match job {
            Some(job) => {
                job();
                true
            }
            None => false,
        }
    }

    /// Runs the newest queued job, simulating out-of-order network replies.
    pub fn run_latest(&self) -> bool {
        let job = self.queue.lock().ok().and_then(|mut queue| queue.pop_back());
        match job {
            Some(job) => {
                job();
                true
            }
            None => false,
        }
    }
}

impl TaskSpawner for ManualSpawner {
    fn spawn(&self, job: Job) -> std::io::Result<()> {
        self.queue
            .lock()
            .map_err(|_| std::io::Error::other("manual spawner queue poisoned"))?
            .push_back(job);
        Ok(())
    }
}

/// Which external call a completion belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionKind {
    /// Image analysis call.
    Analysis,
    /// Hand-off URI lookup.
    Handoff,
}

/// Result of one external call, tagged with its token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Token issued when the call was dispatched.
    pub request_id: RequestId,
    /// Call kind.
    pub kind: CompletionKind,
    /// Transport outcome.
    pub outcome: Result<RawResponse, UploadError>,
}

/// What happened to a delivered completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionDisposition {
    /// The completion matched the outstanding token and changed state.
    Applied,
    /// The completion was superseded and ignored.
    Discarded,
}

/// Result of an `analyze` invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalyzeOutcome {
    /// A request with this token was dispatched.
    Dispatched(RequestId),
    /// A request is already outstanding; nothing was dispatched.
    AlreadyInFlight,
    /// No image is selected; nothing was dispatched.
    NoSelection,
    /// The call could not be started; the request state holds the error.
    SpawnFailed,
}

/// Result of a hand-off request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandoffStep {
    /// URI available now.
    Ready(Url),
    /// A lookup with this token was dispatched.
    Requested(RequestId),
    /// A lookup is already outstanding.
    AlreadyPending,
    /// There is no successful result to hand off.
    NoResult,
    /// The hand-off could not be resolved.
    Failed(ErrorInfo),
}

/// Comparable copy of the observable workflow state.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowSnapshot {
    /// Active selection.
    pub selection: Option<Selection>,
    /// Request lifecycle.
    pub request: RequestState,
    /// Hand-off lifecycle.
    pub handoff: HandoffState,
}

/// The analysis workflow aggregate.
pub struct AnalysisWorkflow {
    selection: SelectionManager,
    request: RequestState,
    handoff: HandoffState,
    last_issued: RequestId,
    display_order: DisplayOrder,
    transport: Arc<dyn AnalysisTransport>,
    spawner: Arc<dyn TaskSpawner>,
    completion_tx: Sender<Completion>,
    completion_rx: Receiver<Completion>,
}

impl AnalysisWorkflow {
    /// Creates a workflow in its initial state.
    pub fn new(
        previews: Arc<dyn PreviewStore>,
        transport: Arc<dyn AnalysisTransport>,
        spawner: Arc<dyn TaskSpawner>,
    ) -> Self {
        let (completion_tx, completion_rx) = mpsc::channel();
        Self {
            selection: SelectionManager::new(previews),
            request: RequestState::Idle,
            handoff: HandoffState::Idle,
            last_issued: RequestId::new(0),
            display_order: DisplayOrder::default(),
            transport,
            spawner,
            completion_tx,
            completion_rx,
        }
    }

    /// Sets the ordering policy of the truncated defect view.
    pub fn with_display_order(mut self, order: DisplayOrder) -> Self {
        self.display_order = order;
        self
    }

    /// Returns the active selection.
    pub fn selection(&self) -> Option<&Selection> {
        self.selection.current()
    }

    /// Returns the request lifecycle state.
    pub fn request_state(&self) -> &RequestState {
        &self.request
    }

    /// Returns the hand-off lifecycle state.
    pub fn handoff_state(&self) -> &HandoffState {
        &self.handoff
    }

    /// Returns the canonical result when the request succeeded.
    pub fn result(&self) -> Option<&CanonicalResult> {
        self.request.result()
    }

    /// Returns a comparable copy of the observable state.
    pub fn snapshot(&self) -> WorkflowSnapshot {
        WorkflowSnapshot {
            selection: self.selection.current().cloned(),
            request: self.request.clone(),
            handoff: self.handoff.clone(),
        }
    }

    /// Projects the state for display.
    pub fn view(&self) -> WorkflowView {
        project_workflow(
            self.selection.current(),
            &self.request,
            &self.handoff,
            self.display_order,
        )
    }

    /// Returns `true` while any external call is outstanding.
    pub fn has_outstanding(&self) -> bool {
        self.request.is_in_flight() || matches!(self.handoff, HandoffState::Pending(_))
    }

    /// Offers a file from the picker or a drop.
    ///
    /// A successful selection invalidates every prior request, result, error,
    /// and hand-off. A rejected or ignored candidate changes nothing.
    ///
    /// # Errors
    /// Returns the user-facing [`ErrorInfo`] for a rejected picker selection
    /// or a preview backend failure.
    pub fn select_file(
        &mut self,
        candidate: FileCandidate,
        source: SelectionSource,
    ) -> Result<SelectOutcome, ErrorInfo> {
        let outcome = self
            .selection
            .select_file(candidate, source)
            .map_err(|error| error.to_error_info())?;

        if outcome == SelectOutcome::Selected {
            if let Some(id) = self.request.in_flight_id() {
                info!(target: "workflow", "superseded: request_id={id}");
            }
            self.request = RequestState::Idle;
            self.handoff = HandoffState::Idle;
        }
        Ok(outcome)
    }

    /// Dispatches the analysis of the active selection.
    ///
    /// Invoking this while a request is outstanding or without a selection has
    /// no effect.
    pub fn analyze(&mut self) -> AnalyzeOutcome {
        if self.request.is_in_flight() {
            debug!(target: "workflow", "analyze_ignored: request already in flight");
            return AnalyzeOutcome::AlreadyInFlight;
        }
        let Some(selection) = self.selection.current() else {
            debug!(target: "workflow", "analyze_ignored: no selection");
            return AnalyzeOutcome::NoSelection;
        };

        let envelope = UploadEnvelope::from_selection(selection);
        let request_id = self.issue_token();
        self.request = RequestState::InFlight(request_id);
        self.handoff = HandoffState::Idle;

        let transport = Arc::clone(&self.transport);
        let completion_tx = self.completion_tx.clone();
        let job: Job = Box::new(move || {
            let outcome = guarded_call(|| transport.analyze(&envelope));
            // The receiver only disappears with the workflow itself.
            let _ = completion_tx.send(Completion {
                request_id,
                kind: CompletionKind::Analysis,
                outcome,
            });
        });

        if let Err(error) = self.spawner.spawn(job) {
            warn!(target: "workflow", "dispatch_failed: request_id={request_id} {error}");
            self.request = RequestState::Failed(ErrorInfo::network(
                ANALYSIS_ERROR_CONTEXT,
                format!("unable to start request: {error}"),
            ));
            return AnalyzeOutcome::SpawnFailed;
        }

        info!(target: "workflow", "analyze_dispatched: request_id={request_id}");
        AnalyzeOutcome::Dispatched(request_id)
    }

    /// Requests the garage hand-off link for the current result.
    ///
    /// Precomputed and contact-based links resolve immediately; otherwise a
    /// lookup is dispatched. Hand-off failures never change the request state.
    pub fn request_handoff(&mut self) -> HandoffStep {
        let Some(result) = self.request.result() else {
            return HandoffStep::NoResult;
        };
        match &self.handoff {
            HandoffState::Ready(uri) => return HandoffStep::Ready(uri.clone()),
            HandoffState::Pending(_) => return HandoffStep::AlreadyPending,
            HandoffState::Idle | HandoffState::Failed(_) => {}
        }

        let part = match resolve_target(result) {
            Ok(HandoffResolution::Ready(uri)) => {
                info!(target: "handoff", "resolved_locally: uri={}", redact_contact(&uri));
                self.handoff = HandoffState::Ready(uri.clone());
                return HandoffStep::Ready(uri);
            }
            Ok(HandoffResolution::NeedsLookup { part }) => part,
            Err(error) => {
                let info = ErrorInfo::protocol(HANDOFF_ERROR_CONTEXT, error.to_string());
                warn!(target: "handoff", "unresolvable: {error}");
                self.handoff = HandoffState::Failed(info.clone());
                return HandoffStep::Failed(info);
            }
        };

        let request_id = self.issue_token();
        self.handoff = HandoffState::Pending(request_id);

        let transport = Arc::clone(&self.transport);
        let completion_tx = self.completion_tx.clone();
        let job: Job = Box::new(move || {
            let outcome = guarded_call(|| transport.request_handoff(&HandoffRequest { part }));
            let _ = completion_tx.send(Completion {
                request_id,
                kind: CompletionKind::Handoff,
                outcome,
            });
        });

        if let Err(error) = self.spawner.spawn(job) {
            let info = ErrorInfo::network(
                HANDOFF_ERROR_CONTEXT,
                format!("unable to start request: {error}"),
            );
            self.handoff = HandoffState::Failed(info.clone());
            return HandoffStep::Failed(info);
        }

        info!(target: "handoff", "lookup_dispatched: request_id={request_id}");
        HandoffStep::Requested(request_id)
    }

    /// Opens the ready hand-off link through `opener`.
    ///
    /// # Errors
    /// Returns [`AppError::HandoffNotReady`] when no link is ready and
    /// [`AppError::Handoff`] when the opener fails.
    pub fn open_handoff(&self, opener: &dyn LinkOpener) -> Result<Url, AppError> {
        let HandoffState::Ready(uri) = &self.handoff else {
            return Err(AppError::HandoffNotReady);
        };
        opener.open(uri)?;
        Ok(uri.clone())
    }

    /// Saves the annotated image, or the original selection when the result
    /// has none, into `dir`.
    ///
    /// # Errors
    /// Returns [`AppError::NoResult`] without a successful result and
    /// [`AppError::Artifact`] when writing fails.
    pub fn download_artifact(&self, dir: &Path) -> Result<PathBuf, AppError> {
        let result = self.request.result().ok_or(AppError::NoResult)?;
        Ok(write_artifact(dir, result, self.selection.current())?)
    }

    /// Returns the workflow to its initial state.
    ///
    /// Outstanding calls keep running; their completions are discarded.
    pub fn reset(&mut self) {
        if self.has_outstanding() {
            info!(target: "workflow", "reset: discarding outstanding calls");
        }
        self.selection.clear();
        self.request = RequestState::Idle;
        self.handoff = HandoffState::Idle;
    }

    /// Applies every completion that has already arrived, in arrival order.
    pub fn poll_completions(&mut self) -> Vec<CompletionDisposition> {
        let mut dispositions = Vec::new();
        while let Ok(completion) = self.completion_rx.try_recv() {
            dispositions.push(self.apply_completion(completion));
        }
        dispositions
    }

    /// Blocks until the next completion arrives and applies it.
    ///
    /// Returns `None` without blocking when nothing is outstanding.
    pub fn wait_for_completion(&mut self) -> Option<CompletionDisposition> {
        if !self.has_outstanding() {
            return None;
        }
        let completion = self.completion_rx.recv().ok()?;
        Some(self.apply_completion(completion))
    }

    /// Applies one completion if its token is still current.
    pub fn apply_completion(&mut self, completion: Completion) -> CompletionDisposition {
        match completion.kind {
            CompletionKind::Analysis => {
                self.apply_analysis(completion.request_id, completion.outcome)
            }
            CompletionKind::Handoff => self.apply_handoff(completion.request_id, completion.outcome),
        }
    }

    fn apply_analysis(
        &mut self,
        request_id: RequestId,
        outcome: Result<RawResponse, UploadError>,
    ) -> CompletionDisposition {
        if self.request.in_flight_id() != Some(request_id) {
            debug!(target: "workflow", "stale_discarded: kind=analysis request_id={request_id}");
            return CompletionDisposition::Discarded;
        }

        self.request = match outcome {
            Err(error) => RequestState::Failed(transport_error_info(ANALYSIS_ERROR_CONTEXT, &error)),
            Ok(raw) => match classify_response(&raw) {
                ResponseClass::ServiceError { status, diagnostic } => RequestState::Failed(
                    ErrorInfo::service(ANALYSIS_ERROR_CONTEXT, status, diagnostic.as_deref()),
                ),
                ResponseClass::Success(body) => match normalize(body) {
                    Ok(result) => RequestState::Succeeded(result),
                    Err(error) => RequestState::Failed(error.to_error_info(ANALYSIS_ERROR_CONTEXT)),
                },
            },
        };

        match &self.request {
            RequestState::Succeeded(result) => info!(
                target: "workflow",
                "analysis_succeeded: request_id={request_id} part={} items={}",
                result.damaged_part,
                result.damage_items.len()
            ),
            RequestState::Failed(error) => warn!(
                target: "workflow",
                "analysis_failed: request_id={request_id} kind={}",
                error.kind
            ),
            _ => {}
        }
        CompletionDisposition::Applied
    }

    fn apply_handoff(
        &mut self,
        request_id: RequestId,
        outcome: Result<RawResponse, UploadError>,
    ) -> CompletionDisposition {
        if self.handoff != HandoffState::Pending(request_id) || self.request.result().is_none() {
            debug!(target: "workflow", "stale_discarded: kind=handoff request_id={request_id}");
            return CompletionDisposition::Discarded;
        }

        self.handoff = match outcome {
            Err(error) => HandoffState::Failed(transport_error_info(HANDOFF_ERROR_CONTEXT, &error)),
            Ok(raw) => match classify_response(&raw) {
                ResponseClass::ServiceError { status, diagnostic } => HandoffState::Failed(
                    ErrorInfo::service(HANDOFF_ERROR_CONTEXT, status, diagnostic.as_deref()),
                ),
                ResponseClass::Success(body) => match parse_handoff_response(body) {
                    Ok(uri) => match validate_handoff_uri(&uri) {
                        Ok(()) => HandoffState::Ready(uri),
                        Err(error) => HandoffState::Failed(ErrorInfo::protocol(
                            HANDOFF_ERROR_CONTEXT,
                            error.to_string(),
                        )),
                    },
                    Err(error) => HandoffState::Failed(error.to_error_info(HANDOFF_ERROR_CONTEXT)),
                },
            },
        };

        match &self.handoff {
            HandoffState::Ready(uri) => {
                info!(target: "handoff", "lookup_succeeded: uri={}", redact_contact(uri));
            }
            HandoffState::Failed(error) => {
                warn!(target: "handoff", "lookup_failed: kind={}", error.kind);
            }
            _ => {}
        }
        CompletionDisposition::Applied
    }

    fn issue_token(&mut self) -> RequestId {
        self.last_issued = self.last_issued.next();
        self.last_issued
    }
}

fn transport_error_info(context: &str, error: &UploadError) -> ErrorInfo {
    match error {
        UploadError::Network(detail) => ErrorInfo::network(context, detail),
        other => ErrorInfo::protocol(context, other.to_string()),
    }
}

/// Runs a transport call so that a panic still produces a completion.
///
/// The workflow keeps its own sender alive, so a job that unwinds without
/// sending would leave [`AnalysisWorkflow::wait_for_completion`] blocked.
fn guarded_call<F>(call: F) -> Result<RawResponse, UploadError>
where
    F: FnOnce() -> Result<RawResponse, UploadError>,
{
    catch_unwind(AssertUnwindSafe(call)).unwrap_or_else(|_| {
        warn!(target: "workflow", "worker_panicked: transport call did not return");
        Err(UploadError::Network(
            "request worker stopped before replying".to_string(),
        ))
    })
}
