//! Codex CLI communication.
//!
//! Codex appends to a single growing text log
//! (`~/.codex/sessions/<id>/output.log`), so reply extraction is a reverse
//! tail scan for the anchor line.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::CommError;
use crate::runtime::home_dir;
use crate::terminal::Backend;

use super::{anchor_text, most_recent, BaseCommunicator, Communicator, ReadOpts, ReverseReader};

/// How far back the tail scan looks for the anchor.
const TAIL_SCAN_LINES: usize = 500;

/// Communicator for the Codex CLI.
pub struct CodexCommunicator {
    base: BaseCommunicator,
}

impl CodexCommunicator {
    pub fn new(backend: Option<Arc<dyn Backend>>) -> Self {
        Self {
            base: BaseCommunicator::new("codex", backend),
        }
    }
}

#[async_trait]
impl Communicator for CodexCommunicator {
    fn name(&self) -> &'static str {
        "codex"
    }

    fn base(&self) -> &BaseCommunicator {
        &self.base
    }

    async fn read_reply(&self, opts: &ReadOpts) -> Result<String, CommError> {
        if opts.log_path.is_empty() {
            return Ok(String::new());
        }

        let reader = ReverseReader::new(&opts.log_path);
        let lines = reader.read_last_lines(TAIL_SCAN_LINES)?;
        if lines.is_empty() {
            return Ok(String::new());
        }

        let anchor = anchor_text(&opts.req_id);
        let anchor_idx = lines.iter().rposition(|l| l.contains(&anchor));
        let Some(anchor_idx) = anchor_idx else {
            return Ok(String::new());
        };

        Ok(lines[anchor_idx + 1..].join("\n"))
    }
}

/// Root directory holding Codex session directories.
pub fn codex_session_root() -> PathBuf {
    let root = std::env::var("CODEX_SESSION_ROOT").unwrap_or_default();
    let root = root.trim();
    if !root.is_empty() {
        return PathBuf::from(root);
    }
    home_dir().join(".codex").join("sessions")
}

/// Find the most recent Codex session directory.
pub fn discover_codex_session() -> Option<PathBuf> {
    let root = codex_session_root();
    let entries = std::fs::read_dir(&root).ok()?;

    let mut sessions = Vec::new();
    for entry in entries.flatten() {
        if !entry.path().is_dir() {
            continue;
        }
        let log_file = entry.path().join("output.log");
        let Ok(meta) = std::fs::metadata(&log_file) else {
            continue;
        };
        let Ok(modified) = meta.modified() else {
            continue;
        };
        sessions.push((entry.path(), modified));
    }

    most_recent(sessions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testsupport::TestTempDir;

    const REQ: &str = "20250101-000000-000-1000";

    async fn read(log: &str, req_id: &str) -> String {
        let tmp = TestTempDir::new("codex");
        let path = tmp.write_text("output.log", log);
        let comm = CodexCommunicator::new(None);
        let opts = ReadOpts {
            log_path: path.to_string_lossy().into_owned(),
            req_id: req_id.to_string(),
        };
        comm.read_reply(&opts).await.unwrap()
    }

    #[tokio::test]
    async fn reply_is_everything_after_the_anchor() {
        let log = format!("earlier noise\nCCB_REQ_ID: {REQ}\n42\nCCB_DONE: {REQ}\n");
        assert_eq!(read(&log, REQ).await, format!("42\nCCB_DONE: {REQ}"));
    }

    #[tokio::test]
    async fn missing_anchor_yields_empty_reply() {
        assert_eq!(read("just output\nmore output\n", REQ).await, "");
    }

    // Re-asked requests repeat the anchor; only the last occurrence counts.
    #[tokio::test]
    async fn duplicate_anchors_favor_the_last() {
        let log = format!(
            "CCB_REQ_ID: {REQ}\nstale answer\nCCB_REQ_ID: {REQ}\nfresh answer\n"
        );
        assert_eq!(read(&log, REQ).await, "fresh answer");
    }

    #[tokio::test]
    async fn empty_log_path_short_circuits() {
        let comm = CodexCommunicator::new(None);
        let opts = ReadOpts::default();
        assert_eq!(comm.read_reply(&opts).await.unwrap(), "");
    }

    #[test]
    fn session_discovery_picks_most_recent_log() {
        let _env = crate::testsupport::env_lock();
        let tmp = TestTempDir::new("codex-root");
        tmp.write_text("sess-a/output.log", "old");
        std::thread::sleep(std::time::Duration::from_millis(20));
        tmp.write_text("sess-b/output.log", "new");

        std::env::set_var("CODEX_SESSION_ROOT", tmp.path());
        let found = discover_codex_session();
        std::env::remove_var("CODEX_SESSION_ROOT");

        assert!(found.unwrap().ends_with("sess-b"));
    }
}
