//! Droid communication.
//!
//! Droid records sessions as JSONL event streams under
//! `~/.factory/sessions/<slug>/events.jsonl` (or bare `.jsonl` files).

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::CommError;
use crate::runtime::home_dir;
use crate::terminal::Backend;

use super::{anchor_text, most_recent, BaseCommunicator, Communicator, ReadOpts};

/// Communicator for Droid.
pub struct DroidCommunicator {
    base: BaseCommunicator,
}

impl DroidCommunicator {
    pub fn new(backend: Option<Arc<dyn Backend>>) -> Self {
        Self {
            base: BaseCommunicator::new("droid", backend),
        }
    }
}

#[async_trait]
impl Communicator for DroidCommunicator {
    fn name(&self) -> &'static str {
        "droid"
    }

    fn base(&self) -> &BaseCommunicator {
        &self.base
    }

    async fn read_reply(&self, opts: &ReadOpts) -> Result<String, CommError> {
        if opts.log_path.is_empty() {
            return Ok(String::new());
        }
        read_droid_session(Path::new(&opts.log_path), &opts.req_id)
    }
}

#[derive(Debug, Deserialize, Default)]
struct DroidEvent {
    #[serde(rename = "type", default)]
    event_type: String,
    #[serde(default)]
    role: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    cwd: String,
}

impl DroidEvent {
    fn body(&self) -> &str {
        if self.content.is_empty() {
            &self.text
        } else {
            &self.content
        }
    }

    fn is_reply(&self) -> bool {
        self.role == "assistant" || self.event_type == "assistant" || self.event_type == "message"
    }
}

fn read_droid_session(sessions_path: &Path, req_id: &str) -> Result<String, CommError> {
    let events_file = if sessions_path.is_dir() {
        match find_latest_events(sessions_path)? {
            Some(file) => file,
            None => return Ok(String::new()),
        }
    } else {
        sessions_path.to_path_buf()
    };

    let events = parse_events(&events_file)?;

    let anchor = anchor_text(req_id);
    let mut found_anchor = false;
    let mut reply_parts = Vec::new();

    for event in events {
        let body = event.body();

        if !found_anchor {
            if body.contains(&anchor) {
                found_anchor = true;
            }
            continue;
        }
        if event.is_reply() && !body.is_empty() {
            reply_parts.push(body.to_string());
        }
    }

    Ok(reply_parts.join("\n"))
}

// The most recent event stream: `<slug>/events.jsonl`, any `<slug>/*.jsonl`,
// or bare `*.jsonl` directly under the sessions directory.
fn find_latest_events(sessions_dir: &Path) -> Result<Option<PathBuf>, CommError> {
    let entries = std::fs::read_dir(sessions_dir)?;
    let mut files = Vec::new();

    for entry in entries.flatten() {
        let path = entry.path();

        if !path.is_dir() {
            if path.extension().map_or(false, |e| e == "jsonl") {
                if let Ok(modified) = entry.metadata().and_then(|m| m.modified()) {
                    files.push((path, modified));
                }
            }
            continue;
        }

        let events_file = path.join("events.jsonl");
        if let Ok(meta) = std::fs::metadata(&events_file) {
            if let Ok(modified) = meta.modified() {
                files.push((events_file, modified));
                continue;
            }
        }

        let Ok(sub_entries) = std::fs::read_dir(&path) else {
            continue;
        };
        for sub in sub_entries.flatten() {
            let sub_path = sub.path();
            if sub_path.is_dir() || sub_path.extension().map_or(true, |e| e != "jsonl") {
                continue;
            }
            if let Ok(modified) = sub.metadata().and_then(|m| m.modified()) {
                files.push((sub_path, modified));
            }
        }
    }

    Ok(most_recent(files))
}

fn parse_events(events_file: &Path) -> Result<Vec<DroidEvent>, CommError> {
    let data = std::fs::read_to_string(events_file)?;
    let mut events = Vec::new();
    for line in data.trim().split('\n') {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(event) = serde_json::from_str::<DroidEvent>(line) else {
            continue;
        };
        events.push(event);
    }
    Ok(events)
}

/// Find the Droid sessions directory.
pub fn discover_droid_sessions() -> Option<PathBuf> {
    let sessions = home_dir().join(".factory").join("sessions");
    if sessions.exists() {
        Some(sessions)
    } else {
        None
    }
}

/// Find the Droid session file whose first event's `cwd` matches the work
/// directory.
pub fn find_droid_session_by_work_dir(sessions_dir: &Path, work_dir: &str) -> Option<PathBuf> {
    let entries = std::fs::read_dir(sessions_dir).ok()?;
    let norm_work_dir = super::claude::normalize_for_match(work_dir);

    let mut candidates = Vec::new();
    for entry in entries.flatten() {
        let dir_path = entry.path();
        if !dir_path.is_dir() {
            continue;
        }
        let Ok(sub_entries) = std::fs::read_dir(&dir_path) else {
            continue;
        };
        for sub in sub_entries.flatten() {
            let path = sub.path();
            if path.is_dir() || path.extension().map_or(true, |e| e != "jsonl") {
                continue;
            }
            let Ok(data) = std::fs::read_to_string(&path) else {
                continue;
            };
            let first_line = data.split('\n').next().unwrap_or_default();
            let Ok(event) = serde_json::from_str::<DroidEvent>(first_line) else {
                continue;
            };
            let event_cwd = super::claude::normalize_for_match(&event.cwd);
            if event_cwd == norm_work_dir
                || event_cwd.ends_with(&norm_work_dir)
                || norm_work_dir.ends_with(&event_cwd)
            {
                if let Ok(modified) = sub.metadata().and_then(|m| m.modified()) {
                    candidates.push((path, modified));
                }
            }
            break;
        }
    }

    most_recent(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testsupport::TestTempDir;

    const REQ: &str = "20250101-000000-000-1000";

    async fn read(path: &Path) -> String {
        let comm = DroidCommunicator::new(None);
        let opts = ReadOpts {
            log_path: path.to_string_lossy().into_owned(),
            req_id: REQ.to_string(),
        };
        comm.read_reply(&opts).await.unwrap()
    }

    fn event(kind: &str, role: &str, content: &str) -> String {
        serde_json::json!({"type": kind, "role": role, "content": content}).to_string()
    }

    #[tokio::test]
    async fn collects_assistant_events_after_anchor() {
        let tmp = TestTempDir::new("droid");
        let log = format!(
            "{}\n{}\n{}\n",
            event("user", "user", &format!("CCB_REQ_ID: {REQ}")),
            event("assistant", "", "42"),
            event("message", "", &format!("CCB_DONE: {REQ}")),
        );
        let path = tmp.write_text("slug/events.jsonl", &log);
        assert_eq!(read(&path).await, format!("42\nCCB_DONE: {REQ}"));
    }

    #[tokio::test]
    async fn text_field_is_a_content_fallback() {
        let tmp = TestTempDir::new("droid");
        let log = format!(
            "{}\n{}\n",
            serde_json::json!({"type": "user", "text": format!("CCB_REQ_ID: {REQ}")}),
            serde_json::json!({"role": "assistant", "text": "from text field"}),
        );
        let path = tmp.write_text("slug/events.jsonl", &log);
        assert_eq!(read(&path).await, "from text field");
    }

    #[tokio::test]
    async fn directory_scan_prefers_most_recent_stream() {
        let tmp = TestTempDir::new("droid");
        tmp.write_text("a/events.jsonl", &event("user", "user", "old"));
        std::thread::sleep(std::time::Duration::from_millis(20));
        let log = format!(
            "{}\n{}\n",
            event("user", "user", &format!("CCB_REQ_ID: {REQ}")),
            event("assistant", "", "fresh"),
        );
        tmp.write_text("b/session.jsonl", &log);
        assert_eq!(read(tmp.path()).await, "fresh");
    }

    #[tokio::test]
    async fn malformed_events_are_skipped() {
        let tmp = TestTempDir::new("droid");
        let log = format!(
            "{}\nnot-json\n{}\n",
            event("user", "user", &format!("CCB_REQ_ID: {REQ}")),
            event("assistant", "", "ok"),
        );
        let path = tmp.write_text("slug/events.jsonl", &log);
        assert_eq!(read(&path).await, "ok");
    }

    #[test]
    fn work_dir_search_reads_first_event_cwd() {
        let tmp = TestTempDir::new("droid-sessions");
        tmp.write_text(
            "one/events.jsonl",
            &serde_json::json!({"type": "user", "cwd": "/work/other"}).to_string(),
        );
        tmp.write_text(
            "two/events.jsonl",
            &serde_json::json!({"type": "user", "cwd": "/work/proj"}).to_string(),
        );
        let found = find_droid_session_by_work_dir(tmp.path(), "/work/proj").unwrap();
        assert!(found.starts_with(tmp.child("two")));
    }

    #[test]
    fn work_dir_search_returns_none_without_match() {
        let tmp = TestTempDir::new("droid-sessions");
        tmp.write_text(
            "one/events.jsonl",
            &serde_json::json!({"type": "user", "cwd": "/elsewhere"}).to_string(),
        );
        assert!(find_droid_session_by_work_dir(tmp.path(), "/work/proj").is_none());
    }
}
