//! Provider adapters: the full ask cycle behind one uniform contract.
//!
//! Every provider shares the same cycle — load session, wrap prompt, lock,
//! send, poll, capture diagnostics — so one adapter type parameterized by a
//! [`Communicator`] covers all of them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::comm::{
    ClaudeCommunicator, CodexCommunicator, Communicator, DroidCommunicator, GeminiCommunicator,
    OpenCodeCommunicator, ReadOpts, WaitOpts,
};
use crate::config::compute_project_id;
use crate::error::CommError;
use crate::lock::ProviderLock;
use crate::protocol;
use crate::session::{load_session, PaneRegistry, ProjectSession, SessionResolver};
use crate::terminal::Backend;

/// Default reply deadline when the request does not carry one.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// A request to a provider adapter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderRequest {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub work_dir: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub req_id: String,
    #[serde(default)]
    pub timeout_s: f64,
    #[serde(default)]
    pub quiet: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output_path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub caller: String,
}

/// The result of one ask cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderResult {
    pub exit_code: i32,
    #[serde(default)]
    pub reply: String,
    #[serde(default)]
    pub req_id: String,
    #[serde(default)]
    pub session_key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub log_path: String,
    #[serde(default)]
    pub anchor_seen: bool,
    #[serde(default)]
    pub done_seen: bool,
    #[serde(default)]
    pub fallback_scan: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl ProviderResult {
    fn failure(exit_code: i32, req_id: &str, error: String) -> Self {
        Self {
            exit_code,
            req_id: req_id.to_string(),
            error,
            ..Default::default()
        }
    }
}

/// A request queued for a session worker, with its reply channel.
#[derive(Debug)]
pub struct QueuedTask {
    pub provider: String,
    pub request: ProviderRequest,
    pub result_tx: oneshot::Sender<ProviderResult>,
}

/// Uniform adapter contract the daemon dispatches against.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Provider name.
    fn name(&self) -> &'static str;

    /// Run one full ask cycle. Infrastructure failures come back as typed
    /// results, never panics or errors.
    async fn send(&self, req: &ProviderRequest) -> ProviderResult;

    /// Liveness probe; succeeds when the pane is alive (or no session ID was
    /// supplied).
    async fn ping(&self, session_id: &str) -> Result<(), CommError>;

    /// Last reply seen by this adapter; empty when none.
    async fn pend(&self, session_id: &str) -> String;

    /// Resolve a live pane for the work directory, or explain why not.
    async fn ensure_pane(&self, work_dir: &str) -> Result<String, CommError>;
}

/// The one adapter implementation, parameterized by provider protocol.
pub struct ProviderAdapter {
    provider: &'static str,
    backend: Option<Arc<dyn Backend>>,
    comm: Box<dyn Communicator>,
    /// Shared pane registry; feeds the claude resolver fallback.
    panes: Option<Arc<PaneRegistry>>,
    last_reply: tokio::sync::Mutex<String>,
}

impl ProviderAdapter {
    fn new(
        provider: &'static str,
        backend: Option<Arc<dyn Backend>>,
        comm: Box<dyn Communicator>,
    ) -> Self {
        Self {
            provider,
            backend,
            comm,
            panes: None,
            last_reply: tokio::sync::Mutex::new(String::new()),
        }
    }

    /// Bind the shared pane registry used for resolver fallbacks.
    pub fn with_registry(mut self, panes: Arc<PaneRegistry>) -> Self {
        self.panes = Some(panes);
        self
    }

    // Session-file lookup first; claude additionally gets the six-stage
    // resolver because its sessions often predate the bridge.
    async fn load_session_for(&self, work_dir: &str) -> Option<ProjectSession> {
        if let Some(sess) = load_session(self.provider, work_dir) {
            return Some(sess);
        }
        if self.provider != "claude" {
            return None;
        }

        let resolver = SessionResolver::new(self.panes.clone(), self.backend.clone());
        let resolved = resolver.resolve(work_dir).await?;
        Some(ProjectSession {
            provider: self.provider.to_string(),
            project_id: compute_project_id(work_dir),
            work_dir: work_dir.to_string(),
            pane_id: resolved.pane_id,
            session_id: resolved.session_id,
            log_path: resolved.log_file,
        })
    }

    pub fn codex(backend: Option<Arc<dyn Backend>>) -> Self {
        Self::new(
            "codex",
            backend.clone(),
            Box::new(CodexCommunicator::new(backend)),
        )
    }

    pub fn gemini(backend: Option<Arc<dyn Backend>>) -> Self {
        Self::new(
            "gemini",
            backend.clone(),
            Box::new(GeminiCommunicator::new(backend)),
        )
    }

    pub fn opencode(backend: Option<Arc<dyn Backend>>) -> Self {
        Self::new(
            "opencode",
            backend.clone(),
            Box::new(OpenCodeCommunicator::new(backend)),
        )
    }

    pub fn claude(backend: Option<Arc<dyn Backend>>) -> Self {
        Self::new(
            "claude",
            backend.clone(),
            Box::new(ClaudeCommunicator::new(backend)),
        )
    }

    pub fn droid(backend: Option<Arc<dyn Backend>>) -> Self {
        Self::new(
            "droid",
            backend.clone(),
            Box::new(DroidCommunicator::new(backend)),
        )
    }

    /// Construct the adapter for a provider name.
    pub fn for_provider(provider: &str, backend: Option<Arc<dyn Backend>>) -> Option<Self> {
        match provider {
            "codex" => Some(Self::codex(backend)),
            "gemini" => Some(Self::gemini(backend)),
            "opencode" => Some(Self::opencode(backend)),
            "claude" => Some(Self::claude(backend)),
            "droid" => Some(Self::droid(backend)),
            _ => None,
        }
    }
}

#[async_trait]
impl Adapter for ProviderAdapter {
    fn name(&self) -> &'static str {
        self.provider
    }

    async fn send(&self, req: &ProviderRequest) -> ProviderResult {
        let start = Instant::now();

        let Some(sess) = self.load_session_for(&req.work_dir).await else {
            return ProviderResult::failure(
                1,
                &req.req_id,
                format!("{} session not found", self.provider),
            );
        };

        let req_id = if req.req_id.is_empty() {
            protocol::make_req_id()
        } else {
            req.req_id.clone()
        };

        let timeout = if req.timeout_s > 0.0 {
            Duration::from_secs_f64(req.timeout_s)
        } else {
            DEFAULT_TIMEOUT
        };

        // One request cycle per provider+directory across processes: each
        // cycle mutates the pane's input line.
        let mut lock = ProviderLock::new(self.provider, timeout, &req.work_dir);
        if !lock.acquire().await {
            return ProviderResult::failure(
                1,
                &req_id,
                format!("could not acquire {} provider lock", self.provider),
            );
        }

        let wrapped = protocol::wrap_prompt(&req.message, &req_id);
        if let Err(e) = self.comm.send_prompt(&sess.pane_id, &wrapped).await {
            lock.release();
            return ProviderResult::failure(1, &req_id, format!("send failed: {e}"));
        }

        let wait_opts = WaitOpts {
            log_path: sess.log_path.clone(),
            req_id: req_id.clone(),
            pane_id: sess.pane_id.clone(),
            poll_ms: 0,
        };
        let outcome = tokio::time::timeout(timeout, self.comm.wait_for_reply(&wait_opts)).await;
        lock.release();

        let mut result = ProviderResult {
            req_id: req_id.clone(),
            session_key: sess.project_id.clone(),
            log_path: sess.log_path.clone(),
            ..Default::default()
        };

        let error = match outcome {
            Ok(Ok(reply)) => {
                result.exit_code = 0;
                result.reply = reply.clone();
                result.done_seen = true;
                result.done_ms = Some(start.elapsed().as_millis() as i64);
                *self.last_reply.lock().await = reply;
                return result;
            }
            Ok(Err(e)) => e.to_string(),
            Err(_elapsed) => "timeout".to_string(),
        };

        // Capture whatever the parser had already seen so the caller can
        // decide whether to pend.
        result.exit_code = 2;
        result.error = error;
        let state = self
            .comm
            .capture_state(&ReadOpts {
                log_path: sess.log_path.clone(),
                req_id,
            })
            .await;
        result.anchor_seen = state.anchor_seen;
        result.fallback_scan = state.fallback_scan;
        if state.anchor_ms > 0 {
            result.anchor_ms = Some(state.anchor_ms);
        }
        result
    }

    async fn ping(&self, session_id: &str) -> Result<(), CommError> {
        let Some(backend) = &self.backend else {
            return Err(CommError::NoBackend(self.provider.to_string()));
        };
        if !session_id.is_empty() && !backend.is_alive(session_id).await {
            return Err(CommError::PaneDead {
                provider: self.provider.to_string(),
                pane_id: session_id.to_string(),
            });
        }
        Ok(())
    }

    async fn pend(&self, _session_id: &str) -> String {
        self.last_reply.lock().await.clone()
    }

    async fn ensure_pane(&self, work_dir: &str) -> Result<String, CommError> {
        if let Some(sess) = load_session(self.provider, work_dir) {
            if !sess.pane_id.is_empty() {
                if let Some(backend) = &self.backend {
                    if backend.is_alive(&sess.pane_id).await {
                        return Ok(sess.pane_id);
                    }
                }
            }
        }
        Err(CommError::NoSession(self.provider.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendError;
    use crate::terminal::PaneInfo;
    use crate::testsupport::{env_lock, TestTempDir};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering};

    const REQ: &str = "20250101-000000-000-1000";

    // Plays the provider side: a send lands the anchor (and optionally the
    // reply and done marker) in the session log, as codex would.
    struct ScriptedBackend {
        log_path: PathBuf,
        reply: Option<&'static str>,
        alive: AtomicBool,
        die_after_send: bool,
    }

    impl ScriptedBackend {
        fn new(log_path: PathBuf, reply: Option<&'static str>) -> Self {
            Self {
                log_path,
                reply,
                alive: AtomicBool::new(true),
                die_after_send: false,
            }
        }
    }

    #[async_trait]
    impl Backend for ScriptedBackend {
        fn name(&self) -> &'static str {
            "fake"
        }
        async fn send_keys(&self, _pane_id: &str, text: &str) -> Result<(), BackendError> {
            let anchor = text.lines().next().unwrap_or_default().to_string();
            let req_id = anchor.trim_start_matches("CCB_REQ_ID:").trim().to_string();
            let mut log = format!("earlier session output\n{anchor}\n");
            match self.reply {
                Some(reply) => log.push_str(&format!("{reply}\nCCB_DONE: {req_id}\n")),
                // The provider started answering but never finished.
                None => log.push_str("thinking...\n"),
            }
            std::fs::write(&self.log_path, log)?;
            if self.die_after_send {
                self.alive.store(false, Ordering::SeqCst);
            }
            Ok(())
        }
        async fn capture_pane(&self, _: &str) -> Result<String, BackendError> {
            Ok(String::new())
        }
        async fn split_window(&self, _: &str, _: &str) -> Result<String, BackendError> {
            Ok("%new".into())
        }
        async fn list_panes(&self) -> Result<Vec<PaneInfo>, BackendError> {
            Ok(Vec::new())
        }
        async fn kill_pane(&self, _: &str) -> Result<(), BackendError> {
            Ok(())
        }
        async fn has_session(&self, _: &str) -> bool {
            self.alive.load(Ordering::SeqCst)
        }
        async fn is_alive(&self, _: &str) -> bool {
            self.alive.load(Ordering::SeqCst)
        }
        async fn set_pane_title(&self, _: &str, _: &str) -> Result<(), BackendError> {
            Ok(())
        }
        async fn get_pane_title(&self, _: &str) -> Result<String, BackendError> {
            Ok(String::new())
        }
    }

    // One codex project on disk: session file pointing at %10 plus an empty
    // session log under a scoped session root.
    fn codex_fixture(tmp: &TestTempDir) -> PathBuf {
        tmp.write_text(".ccb_config/.codex-session", "%10");
        tmp.write_text("sessions/live/output.log", "")
    }

    #[tokio::test]
    async fn codex_happy_path_round_trips() {
        let _env = env_lock();
        let tmp = TestTempDir::new("adapter-e2e");
        let log = codex_fixture(&tmp);
        std::env::set_var("CODEX_SESSION_ROOT", tmp.child("sessions"));

        let backend: Arc<dyn Backend> = Arc::new(ScriptedBackend::new(log, Some("42")));
        let adapter = ProviderAdapter::codex(Some(backend));
        let result = adapter
            .send(&ProviderRequest {
                work_dir: tmp.path().to_string_lossy().into_owned(),
                message: "what is 6*7".into(),
                req_id: REQ.into(),
                timeout_s: 5.0,
                ..Default::default()
            })
            .await;
        std::env::remove_var("CODEX_SESSION_ROOT");

        assert_eq!(result.exit_code, 0, "error: {}", result.error);
        assert_eq!(result.reply, "42");
        assert!(result.done_seen);
        assert_eq!(result.req_id, REQ);
        assert!(result.done_ms.is_some());
        // The reply is now pendable.
        assert_eq!(adapter.pend("").await, "42");
    }

    #[tokio::test]
    async fn timeout_with_anchor_captures_partial_state() {
        let _env = env_lock();
        let tmp = TestTempDir::new("adapter-e2e");
        let log = codex_fixture(&tmp);
        std::env::set_var("CODEX_SESSION_ROOT", tmp.child("sessions"));

        // Anchor lands but the done marker never arrives.
        let backend: Arc<dyn Backend> = Arc::new(ScriptedBackend::new(log, None));
        let adapter = ProviderAdapter::codex(Some(backend));
        let result = adapter
            .send(&ProviderRequest {
                work_dir: tmp.path().to_string_lossy().into_owned(),
                message: "what is 6*7".into(),
                req_id: REQ.into(),
                timeout_s: 1.0,
                ..Default::default()
            })
            .await;
        std::env::remove_var("CODEX_SESSION_ROOT");

        assert_eq!(result.exit_code, 2);
        assert_eq!(result.error, "timeout");
        assert!(result.anchor_seen);
        assert!(!result.done_seen);
    }

    #[tokio::test]
    async fn pane_death_mid_wait_is_reported() {
        let _env = env_lock();
        let tmp = TestTempDir::new("adapter-e2e");
        let log = codex_fixture(&tmp);
        std::env::set_var("CODEX_SESSION_ROOT", tmp.child("sessions"));

        let mut scripted = ScriptedBackend::new(log, None);
        scripted.die_after_send = true;
        let backend: Arc<dyn Backend> = Arc::new(scripted);
        let adapter = ProviderAdapter::codex(Some(backend));
        let result = adapter
            .send(&ProviderRequest {
                work_dir: tmp.path().to_string_lossy().into_owned(),
                message: "anyone there".into(),
                req_id: REQ.into(),
                timeout_s: 5.0,
                ..Default::default()
            })
            .await;
        std::env::remove_var("CODEX_SESSION_ROOT");

        assert_eq!(result.exit_code, 2);
        assert!(result.error.contains("not alive"), "{}", result.error);
    }

    #[tokio::test]
    async fn send_without_session_fails_with_exit_1() {
        let tmp = TestTempDir::new("adapter");
        let adapter = ProviderAdapter::codex(None);
        let result = adapter
            .send(&ProviderRequest {
                work_dir: tmp.path().to_string_lossy().into_owned(),
                message: "hello".into(),
                ..Default::default()
            })
            .await;
        assert_eq!(result.exit_code, 1);
        assert_eq!(result.error, "codex session not found");
    }

    #[tokio::test]
    async fn send_without_backend_reports_send_failure() {
        let tmp = TestTempDir::new("adapter");
        tmp.write_text(".ccb_config/.codex-session", "%1");
        let adapter = ProviderAdapter::codex(None);
        let result = adapter
            .send(&ProviderRequest {
                work_dir: tmp.path().to_string_lossy().into_owned(),
                message: "hello".into(),
                timeout_s: 1.0,
                ..Default::default()
            })
            .await;
        assert_eq!(result.exit_code, 1);
        assert!(result.error.starts_with("send failed:"), "{}", result.error);
    }

    #[tokio::test]
    async fn ping_without_backend_is_an_error() {
        let adapter = ProviderAdapter::gemini(None);
        assert!(adapter.ping("").await.is_err());
    }

    #[tokio::test]
    async fn pend_is_empty_before_any_reply() {
        let adapter = ProviderAdapter::droid(None);
        assert_eq!(adapter.pend("").await, "");
    }

    #[tokio::test]
    async fn ensure_pane_without_session_explains() {
        let tmp = TestTempDir::new("adapter");
        let adapter = ProviderAdapter::claude(None);
        let err = adapter
            .ensure_pane(&tmp.path().to_string_lossy())
            .await
            .unwrap_err();
        assert!(matches!(err, CommError::NoSession(_)));
    }

    #[test]
    fn for_provider_covers_the_roster() {
        for name in crate::protocol::provider_names() {
            assert!(ProviderAdapter::for_provider(name, None).is_some());
        }
        assert!(ProviderAdapter::for_provider("mystery", None).is_none());
    }

    #[test]
    fn result_serialization_omits_empty_diagnostics() {
        let result = ProviderResult {
            exit_code: 0,
            reply: "42".into(),
            req_id: "r".into(),
            done_seen: true,
            ..Default::default()
        };
        let json = serde_json::to_string(&result).unwrap();
        assert!(!json.contains("log_path"));
        assert!(!json.contains("anchor_ms"));
        assert!(!json.contains("\"error\""));
        assert!(json.contains("\"done_seen\":true"));
    }
}
