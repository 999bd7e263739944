use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use flotilla::{BuildId, BuildParams, BuildStatus, RemoteBuildSession, SessionError};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

/// Scriptable stand-in for one cluster's remote build session.
///
/// Every answer the dispatch core can receive is scriptable: load
/// queries, submissions, completion outcomes, log lines, failure detail,
/// and annotations. Calls are recorded so tests can assert on exactly
/// what the core did.
pub struct MockBuildSession {
    cluster_url: String,
    namespace: String,
    state: Mutex<MockState>,
}

struct MockState {
    active_builds: u32,
    load_error: Option<SessionError>,
    queued_load_errors: VecDeque<SessionError>,
    submit_error: Option<SessionError>,
    queued_submit_errors: VecDeque<SessionError>,
    cancel_error: Option<SessionError>,
    completion: Result<BuildStatus, SessionError>,
    completion_delay: Duration,
    log_lines: Vec<String>,
    failure_detail: Option<Map<String, Value>>,
    annotations: HashMap<String, String>,
    load_queries: u32,
    submit_attempts: u32,
    submits: Vec<BuildParams>,
    cancels: Vec<BuildId>,
}

impl Default for MockBuildSession {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBuildSession {
    pub fn new() -> Self {
        Self::with_endpoint("https://cluster.local", "worker")
    }

    pub fn with_endpoint(cluster_url: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            cluster_url: cluster_url.into(),
            namespace: namespace.into(),
            state: Mutex::new(MockState {
                active_builds: 0,
                load_error: None,
                queued_load_errors: VecDeque::new(),
                submit_error: None,
                queued_submit_errors: VecDeque::new(),
                cancel_error: None,
                completion: Ok(BuildStatus::Complete),
                completion_delay: Duration::ZERO,
                log_lines: Vec::new(),
                failure_detail: None,
                annotations: HashMap::new(),
                load_queries: 0,
                submit_attempts: 0,
                submits: Vec::new(),
                cancels: Vec::new(),
            }),
        }
    }

    /// Answer every load query with this many active builds.
    pub fn set_active_builds(&self, count: u32) {
        self.state.lock().active_builds = count;
    }

    /// Fail every load query from now on.
    pub fn fail_loads(&self, error: SessionError) {
        self.state.lock().load_error = Some(error);
    }

    /// Fail the next load query only.
    pub fn push_load_error(&self, error: SessionError) {
        self.state.lock().queued_load_errors.push_back(error);
    }

    /// Fail every submission from now on.
    pub fn reject_submits(&self, error: SessionError) {
        self.state.lock().submit_error = Some(error);
    }

    /// Fail the next submission only.
    pub fn push_submit_error(&self, error: SessionError) {
        self.state.lock().queued_submit_errors.push_back(error);
    }

    /// Fail cancellation requests. The builds are still recorded.
    pub fn fail_cancels(&self, error: SessionError) {
        self.state.lock().cancel_error = Some(error);
    }

    /// Script the outcome of `await_completion`.
    pub fn set_completion(&self, result: Result<BuildStatus, SessionError>) {
        self.state.lock().completion = result;
    }

    /// Delay `await_completion` answers, keeping the build "live".
    pub fn set_completion_delay(&self, delay: Duration) {
        self.state.lock().completion_delay = delay;
    }

    /// Lines replayed by `stream_logs`.
    pub fn set_log_lines(&self, lines: Vec<String>) {
        self.state.lock().log_lines = lines;
    }

    /// Structured detail returned by `inspect_failure_detail`.
    pub fn set_failure_detail(&self, detail: Map<String, Value>) {
        self.state.lock().failure_detail = Some(detail);
    }

    /// Raw annotations returned for completed builds.
    pub fn set_annotations(&self, annotations: HashMap<String, String>) {
        self.state.lock().annotations = annotations;
    }

    pub fn load_query_count(&self) -> u32 {
        self.state.lock().load_queries
    }

    pub fn submit_attempt_count(&self) -> u32 {
        self.state.lock().submit_attempts
    }

    /// Parameters of every accepted submission, in order.
    pub fn submitted(&self) -> Vec<BuildParams> {
        self.state.lock().submits.clone()
    }

    pub fn cancel_count(&self) -> usize {
        self.state.lock().cancels.len()
    }

    pub fn canceled_builds(&self) -> Vec<BuildId> {
        self.state.lock().cancels.clone()
    }

    pub fn assert_cancel_count_eq(&self, expected: usize) {
        let actual = self.cancel_count();
        assert_eq!(actual, expected, "Expected {expected} cancels, got {actual}");
    }
}

#[async_trait]
impl RemoteBuildSession for MockBuildSession {
    fn cluster_url(&self) -> String {
        self.cluster_url.clone()
    }

    fn namespace(&self) -> String {
        self.namespace.clone()
    }

    async fn active_build_count(&self) -> Result<u32, SessionError> {
        let mut state = self.state.lock();
        state.load_queries += 1;
        if let Some(error) = state.queued_load_errors.pop_front() {
            return Err(error);
        }
        if let Some(error) = &state.load_error {
            return Err(error.clone());
        }
        Ok(state.active_builds)
    }

    async fn submit_build(&self, params: &BuildParams) -> Result<BuildId, SessionError> {
        let mut state = self.state.lock();
        state.submit_attempts += 1;
        if let Some(error) = state.queued_submit_errors.pop_front() {
            return Err(error);
        }
        if let Some(error) = &state.submit_error {
            return Err(error.clone());
        }
        state.submits.push(params.clone());
        Ok(BuildId::new())
    }

    async fn stream_logs(&self, _build: &BuildId) -> Result<mpsc::Receiver<String>, SessionError> {
        let lines = self.state.lock().log_lines.clone();
        let (tx, rx) = mpsc::channel(lines.len().max(1));
        for line in lines {
            let _ = tx.try_send(line);
        }
        Ok(rx)
    }

    async fn await_completion(&self, _build: &BuildId) -> Result<BuildStatus, SessionError> {
        let (delay, result) = {
            let state = self.state.lock();
            (state.completion_delay, state.completion.clone())
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        result
    }

    async fn cancel(&self, build: &BuildId) -> Result<(), SessionError> {
        let mut state = self.state.lock();
        state.cancels.push(*build);
        if let Some(error) = &state.cancel_error {
            return Err(error.clone());
        }
        Ok(())
    }

    async fn inspect_failure_detail(
        &self,
        _build: &BuildId,
    ) -> Result<Option<Map<String, Value>>, SessionError> {
        Ok(self.state.lock().failure_detail.clone())
    }

    async fn annotations(&self, _build: &BuildId) -> Result<HashMap<String, String>, SessionError> {
        Ok(self.state.lock().annotations.clone())
    }
}
