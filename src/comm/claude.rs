//! Claude Code communication.
//!
//! Claude writes one JSON object per line into
//! `~/.claude/projects/<key>/<session>.jsonl`. Message content is either a
//! plain string or an array of typed blocks; only `text` blocks carry reply
//! content. Extracted text is stripped of ANSI escapes.

use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::CommError;
use crate::runtime::home_dir;
use crate::terminal::Backend;
use crate::textutil::strip_ansi;

use super::{anchor_text, most_recent, BaseCommunicator, Communicator, ReadOpts};

/// Cap on how many trailing JSONL lines one read parses.
const MAX_LOG_LINES: usize = 200;

/// Communicator for Claude Code.
pub struct ClaudeCommunicator {
    base: BaseCommunicator,
}

impl ClaudeCommunicator {
    pub fn new(backend: Option<Arc<dyn Backend>>) -> Self {
        Self {
            base: BaseCommunicator::new("claude", backend),
        }
    }
}

#[async_trait]
impl Communicator for ClaudeCommunicator {
    fn name(&self) -> &'static str {
        "claude"
    }

    fn base(&self) -> &BaseCommunicator {
        &self.base
    }

    async fn read_reply(&self, opts: &ReadOpts) -> Result<String, CommError> {
        if opts.log_path.is_empty() {
            return Ok(String::new());
        }

        let entries = read_claude_log(Path::new(&opts.log_path))?;
        if entries.is_empty() {
            return Ok(String::new());
        }

        let anchor = anchor_text(&opts.req_id);
        let mut found_anchor = false;
        let mut reply_parts: Vec<String> = Vec::new();

        for entry in &entries {
            let entry_type = entry.get("type").and_then(Value::as_str).unwrap_or_default();

            if entry_type == "human" || entry_type == "user" {
                let content = extract_entry_content(entry);
                if content.contains(&anchor) {
                    found_anchor = true;
                    // A re-sent anchor restarts collection; the last request
                    // wins.
                    reply_parts.clear();
                    continue;
                }
            }

            if !found_anchor {
                continue;
            }

            if entry_type == "assistant" {
                let content = extract_entry_content(entry);
                if !content.is_empty() {
                    reply_parts.push(content);
                }
            }
        }

        Ok(reply_parts.join("\n"))
    }
}

// Read parsed entries from a Claude JSONL log file, or from the most recent
// `.jsonl` under a directory.
fn read_claude_log(log_path: &Path) -> Result<Vec<Value>, CommError> {
    let meta = std::fs::metadata(log_path)?;

    let log_file = if meta.is_dir() {
        match find_most_recent_jsonl(log_path) {
            Some(file) => file,
            None => return Ok(Vec::new()),
        }
    } else {
        log_path.to_path_buf()
    };

    let data = std::fs::read_to_string(&log_file)?;
    let lines: Vec<&str> = data.trim().split('\n').collect();

    let start = lines.len().saturating_sub(MAX_LOG_LINES);
    let mut entries = Vec::new();
    for line in &lines[start..] {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        // A line mid-write parses as garbage; the next poll sees it whole.
        let Ok(entry) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        if entry.is_object() {
            entries.push(entry);
        }
    }
    Ok(entries)
}

// Most recently modified .jsonl file anywhere under `dir`.
fn find_most_recent_jsonl(dir: &Path) -> Option<PathBuf> {
    let mut files = Vec::new();
    collect_jsonl(dir, &mut files);
    most_recent(files)
}

fn collect_jsonl(dir: &Path, files: &mut Vec<(PathBuf, std::time::SystemTime)>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_jsonl(&path, files);
            continue;
        }
        if path.extension().map_or(true, |e| e != "jsonl") {
            continue;
        }
        if let Ok(modified) = entry.metadata().and_then(|m| m.modified()) {
            files.push((path, modified));
        }
    }
}

// Text content of a log entry. Content lives at `message.content` or
// directly at `content`, as a string or an array of blocks.
fn extract_entry_content(entry: &Value) -> String {
    if let Some(content) = entry.get("message").and_then(|m| m.get("content")) {
        return extract_content(content);
    }
    if let Some(content) = entry.get("content") {
        return extract_content(content);
    }
    String::new()
}

fn extract_content(content: &Value) -> String {
    match content {
        Value::String(s) => strip_ansi(s),
        Value::Array(items) => {
            let parts: Vec<String> = items
                .iter()
                .filter_map(|item| {
                    let obj = item.as_object()?;
                    if obj.get("type")?.as_str()? != "text" {
                        return None;
                    }
                    Some(strip_ansi(obj.get("text")?.as_str()?))
                })
                .collect();
            parts.join("\n")
        }
        _ => String::new(),
    }
}

/// Claude's project key for a work directory: the absolute path,
/// percent-escaped, with the encoded separators folded to `-`.
///
/// Unreserved characters (alphanumerics, `-`, `_`, `.`, `~`) stay literal;
/// everything else is `%XX`-escaped before `/` (and its `%2F` form) becomes
/// `-`.
pub fn claude_project_key(work_dir: &str) -> String {
    let abs = Path::new(work_dir);
    let abs = if abs.is_absolute() {
        abs.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(abs))
            .unwrap_or_else(|_| abs.to_path_buf())
    };
    let norm = abs.to_string_lossy().replace('\\', "/");

    let mut encoded = String::with_capacity(norm.len());
    for &b in norm.as_bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(b as char);
            }
            b'/' => encoded.push_str("%2F"),
            _ => encoded.push_str(&format!("%{b:02X}")),
        }
    }
    encoded.replace("%2F", "-").replace('/', "-")
}

/// Root of Claude's per-project session logs.
pub fn claude_projects_dir() -> PathBuf {
    home_dir().join(".claude").join("projects")
}

/// Find the Claude project directory matching a work directory, if any.
pub fn discover_claude_project_dir(work_dir: &str) -> Option<PathBuf> {
    let projects_dir = claude_projects_dir();
    let entries = std::fs::read_dir(&projects_dir).ok()?;

    let norm_work_dir = normalize_for_match(work_dir);
    for entry in entries.flatten() {
        if !entry.path().is_dir() {
            continue;
        }
        let project_key = entry.file_name().to_string_lossy().into_owned();
        let decoded = project_key.replace('-', "/");
        if matches_work_dir(&decoded, &norm_work_dir) {
            return Some(entry.path());
        }
    }
    None
}

pub(crate) fn normalize_for_match(path: &str) -> String {
    let lowered = path.replace('\\', "/").to_ascii_lowercase();
    lowered.trim_end_matches('/').to_string()
}

// A decoded project key matches when either side is a suffix of the other;
// key decoding is lossy (every `-` becomes `/`), so exact equality is rare.
pub(crate) fn matches_work_dir(decoded_key: &str, norm_work_dir: &str) -> bool {
    let decoded = normalize_for_match(decoded_key);
    decoded == norm_work_dir
        || decoded.ends_with(norm_work_dir)
        || norm_work_dir.ends_with(&decoded)
}
