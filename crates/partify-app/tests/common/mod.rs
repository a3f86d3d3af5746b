//! Shared fixtures for app integration tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use partify_app::{AnalysisWorkflow, CompletionDisposition, ManualSpawner};
use partify_selection::{FileCandidate, InMemoryPreviewStore};
use partify_upload::{AnalysisTransport, HandoffRequest, RawResponse, UploadEnvelope, UploadError};

/// Flat payload naming a bumper.
#[allow(dead_code)]
pub const FLAT_BUMPER: &str = r#"{"prediction":"bumper","confidence":0.87}"#;

/// Transport replaying scripted replies in call order.
#[derive(Default)]
pub struct ScriptedTransport {
    analyze_replies: Mutex<VecDeque<Result<RawResponse, UploadError>>>,
    handoff_replies: Mutex<VecDeque<Result<RawResponse, UploadError>>>,
    envelopes: Mutex<Vec<UploadEnvelope>>,
    handoff_requests: Mutex<Vec<HandoffRequest>>,
}

#[allow(dead_code)]
impl ScriptedTransport {
    /// Queues the reply of the next analysis call.
    pub fn push_analysis(&self, reply: Result<RawResponse, UploadError>) {
        self.analyze_replies
            .lock()
            .expect("script lock")
            .push_back(reply);
    }

    /// Queues the reply of the next hand-off lookup.
    pub fn push_handoff(&self, reply: Result<RawResponse, UploadError>) {
        self.handoff_replies
            .lock()
            .expect("script lock")
            .push_back(reply);
    }

    /// Envelopes received so far, in execution order.
    pub fn envelopes(&self) -> Vec<UploadEnvelope> {
        self.envelopes.lock().expect("script lock").clone()
    }

    /// Hand-off requests received so far.
    pub fn handoff_requests(&self) -> Vec<HandoffRequest> {
        self.handoff_requests.lock().expect("script lock").clone()
    }
}

impl AnalysisTransport for ScriptedTransport {
    fn analyze(&self, envelope: &UploadEnvelope) -> Result<RawResponse, UploadError> {
        self.envelopes
            .lock()
            .expect("script lock")
            .push(envelope.clone());
        self.analyze_replies
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or_else(|| Err(UploadError::Network("no scripted reply".to_string())))
    }

    fn request_handoff(&self, request: &HandoffRequest) -> Result<RawResponse, UploadError> {
        self.handoff_requests
            .lock()
            .expect("script lock")
            .push(request.clone());
        self.handoff_replies
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or_else(|| Err(UploadError::Network("no scripted reply".to_string())))
    }
}

/// Workflow wired to deterministic collaborators.
pub struct Harness {
    /// Workflow under test.
    pub workflow: AnalysisWorkflow,
    /// Queue of dispatched jobs.
    pub spawner: Arc<ManualSpawner>,
    /// Scripted service.
    pub transport: Arc<ScriptedTransport>,
    /// Preview store recording releases.
    pub previews: Arc<InMemoryPreviewStore>,
}

#[allow(dead_code)]
impl Harness {
    /// Creates a harness in the initial state.
    pub fn new() -> Self {
        let spawner = Arc::new(ManualSpawner::new());
        let transport = Arc::new(ScriptedTransport::default());
        let previews = Arc::new(InMemoryPreviewStore::new());
        let workflow = AnalysisWorkflow::new(
            Arc::<InMemoryPreviewStore>::clone(&previews),
            Arc::<ScriptedTransport>::clone(&transport),
            Arc::<ManualSpawner>::clone(&spawner),
        );
        Self {
            workflow,
            spawner,
            transport,
            previews,
        }
    }

    /// Runs every queued job in FIFO order and applies the completions.
    pub fn run_all(&mut self) -> Vec<CompletionDisposition> {
        while self.spawner.run_next() {}
        self.workflow.poll_completions()
    }
}

/// PNG-typed candidate with distinct bytes per name.
#[allow(dead_code)]
pub fn image_candidate(name: &str) -> FileCandidate {
    let mut bytes = vec![0x89, b'P', b'N', b'G'];
    bytes.extend_from_slice(name.as_bytes());
    FileCandidate::new(bytes, "image/png", name)
}

/// 200 response with `body`.
#[allow(dead_code)]
pub fn ok_json(body: &str) -> Result<RawResponse, UploadError> {
    Ok(RawResponse {
        status: 200,
        body: body.as_bytes().to_vec(),
    })
}

/// Non-success response with `body`.
#[allow(dead_code)]
pub fn status_reply(status: u16, body: &str) -> Result<RawResponse, UploadError> {
    Ok(RawResponse {
        status,
        body: body.as_bytes().to_vec(),
    })
}
