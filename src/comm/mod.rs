//! Provider communication: prompt transport plus reply extraction from each
//! provider's own session log.
//!
//! Every provider follows the same cycle — inject an anchored prompt into a
//! pane, then poll the provider's log until the done marker appears — but
//! differs in where the log lives and how replies are encoded (plain text,
//! chat JSON, storage trees, JSONL).

mod claude;
mod codex;
mod droid;
mod gemini;
mod logreader;
mod opencode;
mod reverse;

pub use claude::{
    claude_project_key, claude_projects_dir, discover_claude_project_dir, ClaudeCommunicator,
};
pub(crate) use claude::{matches_work_dir, normalize_for_match};
pub use codex::{discover_codex_session, CodexCommunicator};
pub use droid::{discover_droid_sessions, find_droid_session_by_work_dir, DroidCommunicator};
pub use gemini::{discover_gemini_chats_dir, gemini_project_hash, GeminiCommunicator};
pub use logreader::LogReader;
pub use opencode::{discover_opencode_storage, OpenCodeCommunicator};
pub use reverse::ReverseReader;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

use crate::error::CommError;
use crate::protocol;
use crate::terminal::Backend;

/// Options for reading a reply.
#[derive(Debug, Clone, Default)]
pub struct ReadOpts {
    pub log_path: String,
    pub req_id: String,
}

/// Options for waiting for a complete reply.
#[derive(Debug, Clone, Default)]
pub struct WaitOpts {
    pub log_path: String,
    pub req_id: String,
    pub pane_id: String,
    /// Override of the initial poll interval in milliseconds (0 = default).
    pub poll_ms: u64,
}

/// State of an in-progress reply capture, used for timeout diagnostics.
#[derive(Debug, Clone, Default)]
pub struct CaptureState {
    /// File offset/size at time of capture.
    pub last_offset: u64,
    /// Whether the `CCB_REQ_ID` anchor was found.
    pub anchor_seen: bool,
    /// Milliseconds from send to anchor detection.
    pub anchor_ms: i64,
    /// Whether the `CCB_DONE` marker was found.
    pub done_seen: bool,
    /// Milliseconds from send to done detection.
    pub done_ms: i64,
    /// Collected reply lines so far.
    pub reply_lines: Vec<String>,
    /// Whether fallback scanning was used.
    pub fallback_scan: bool,
}

/// Adaptive polling strategy for `wait_for_reply`.
#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    /// Starting poll interval.
    pub initial_interval: Duration,
    /// Maximum poll interval.
    pub max_interval: Duration,
    /// Spacing of pane-liveness rechecks.
    pub liveness_every: Duration,
    /// Multiplier per poll cycle.
    pub backoff_factor: f64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(20),
            max_interval: Duration::from_millis(500),
            liveness_every: Duration::from_secs(2),
            backoff_factor: 1.5,
        }
    }
}

fn adaptive_sleep(current: Duration, cfg: &PollConfig) -> Duration {
    let next = current.mul_f64(cfg.backoff_factor);
    next.min(cfg.max_interval)
}

/// Shared transport and liveness plumbing for all communicators.
#[derive(Clone)]
pub struct BaseCommunicator {
    pub provider: &'static str,
    pub backend: Option<Arc<dyn Backend>>,
    pub poll: PollConfig,
}

impl BaseCommunicator {
    pub fn new(provider: &'static str, backend: Option<Arc<dyn Backend>>) -> Self {
        Self {
            provider,
            backend,
            poll: PollConfig::default(),
        }
    }

    /// Send text to a terminal pane.
    pub async fn send_via_terminal(&self, pane_id: &str, text: &str) -> Result<(), CommError> {
        let Some(backend) = &self.backend else {
            return Err(CommError::NoBackend(self.provider.to_string()));
        };
        backend
            .send_keys(pane_id, text)
            .await
            .map_err(|e| CommError::Io(std::io::Error::other(e.to_string())))
    }

    /// Check pane liveness via the backend; false without a backend.
    pub async fn pane_alive(&self, pane_id: &str) -> bool {
        match &self.backend {
            Some(backend) => backend.is_alive(pane_id).await,
            None => false,
        }
    }
}

/// One provider's communication protocol.
#[async_trait]
pub trait Communicator: Send + Sync {
    /// Provider name.
    fn name(&self) -> &'static str;

    /// Shared transport plumbing.
    fn base(&self) -> &BaseCommunicator;

    /// Send a prompt to the provider via the terminal backend.
    async fn send_prompt(&self, pane_id: &str, message: &str) -> Result<(), CommError> {
        self.base().send_via_terminal(pane_id, message).await
    }

    /// Read the latest reply for the request, empty when the anchor has not
    /// yet appeared. Malformed provider records are skipped, never errors.
    async fn read_reply(&self, opts: &ReadOpts) -> Result<String, CommError>;

    /// Wait for a complete reply carrying the `CCB_DONE` marker.
    ///
    /// Loops forever on an adaptive interval; the caller bounds it with a
    /// deadline. Pane death is surfaced as an error mid-wait.
    async fn wait_for_reply(&self, opts: &WaitOpts) -> Result<String, CommError> {
        let cfg = self.base().poll;
        let mut interval = if opts.poll_ms > 0 {
            Duration::from_millis(opts.poll_ms)
        } else {
            cfg.initial_interval
        };

        let read_opts = ReadOpts {
            log_path: opts.log_path.clone(),
            req_id: opts.req_id.clone(),
        };
        let mut last_liveness = Instant::now();

        loop {
            if let Ok(reply) = self.read_reply(&read_opts).await {
                if !reply.is_empty() && protocol::is_done(&reply, &opts.req_id) {
                    return Ok(protocol::strip_done(&reply, &opts.req_id));
                }
            }

            if !opts.pane_id.is_empty() && last_liveness.elapsed() > cfg.liveness_every {
                last_liveness = Instant::now();
                if !self.base().pane_alive(&opts.pane_id).await {
                    return Err(CommError::PaneDead {
                        provider: self.name().to_string(),
                        pane_id: opts.pane_id.clone(),
                    });
                }
            }

            sleep(interval).await;
            interval = adaptive_sleep(interval, &cfg);
        }
    }

    /// Capture the current communication state for diagnostics.
    async fn capture_state(&self, opts: &ReadOpts) -> CaptureState {
        let mut state = CaptureState::default();
        if opts.log_path.is_empty() {
            return state;
        }
        if let Ok(meta) = std::fs::metadata(&opts.log_path) {
            state.last_offset = meta.len();
        }
        let Ok(reply) = self.read_reply(opts).await else {
            return state;
        };
        if !reply.is_empty() {
            state.anchor_seen = true;
            state.reply_lines = reply.lines().map(str::to_string).collect();
            if protocol::is_done(&reply, &opts.req_id) {
                state.done_seen = true;
            }
        }
        state
    }

    /// Verify the provider pane is alive.
    async fn health_check(&self, pane_id: &str) -> Result<(), CommError> {
        if self.base().pane_alive(pane_id).await {
            Ok(())
        } else {
            Err(CommError::PaneDead {
                provider: self.name().to_string(),
                pane_id: pane_id.to_string(),
            })
        }
    }
}

/// Anchor text all parsers search for: `CCB_REQ_ID: <req_id>`.
pub(crate) fn anchor_text(req_id: &str) -> String {
    format!("{} {req_id}", protocol::REQ_ID_PREFIX)
}

/// Most recently modified entry among `(path, modified)` pairs.
pub(crate) fn most_recent(
    mut files: Vec<(std::path::PathBuf, std::time::SystemTime)>,
) -> Option<std::path::PathBuf> {
    files.sort_by(|a, b| b.1.cmp(&a.1));
    files.into_iter().next().map(|(p, _)| p)
}
