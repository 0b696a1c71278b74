//! Gemini CLI communication.
//!
//! Gemini persists chats as JSON files under `~/.gemini/tmp/<hash>/chats/`;
//! the newest file holds the live conversation. Messages carry content either
//! directly or inside a `parts` array.

use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::CommError;
use crate::runtime::home_dir;
use crate::terminal::Backend;

use super::{anchor_text, most_recent, BaseCommunicator, Communicator, ReadOpts};

/// Communicator for the Gemini CLI.
pub struct GeminiCommunicator {
    base: BaseCommunicator,
}

impl GeminiCommunicator {
    pub fn new(backend: Option<Arc<dyn Backend>>) -> Self {
        Self {
            base: BaseCommunicator::new("gemini", backend),
        }
    }
}

#[async_trait]
impl Communicator for GeminiCommunicator {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn base(&self) -> &BaseCommunicator {
        &self.base
    }

    async fn read_reply(&self, opts: &ReadOpts) -> Result<String, CommError> {
        if opts.log_path.is_empty() {
            return Ok(String::new());
        }
        read_gemini_chat(Path::new(&opts.log_path), &opts.req_id)
    }
}

#[derive(Debug, Clone)]
struct GeminiMessage {
    role: String,
    content: String,
}

fn read_gemini_chat(chats_dir: &Path, req_id: &str) -> Result<String, CommError> {
    let Some(session_file) = find_latest_session(chats_dir)? else {
        return Ok(String::new());
    };

    // In-place writes leave the file momentarily unparseable; report empty
    // and let the next poll cycle pick up the completed write.
    let Some(messages) = parse_messages(&session_file) else {
        return Ok(String::new());
    };

    let anchor = anchor_text(req_id);
    let mut found_anchor = false;
    let mut reply_parts = Vec::new();

    for msg in messages {
        if !found_anchor {
            if msg.content.contains(&anchor) {
                found_anchor = true;
            }
            continue;
        }
        if msg.role == "model" || msg.role == "assistant" {
            reply_parts.push(msg.content);
        }
    }

    Ok(reply_parts.join("\n"))
}

fn find_latest_session(chats_dir: &Path) -> Result<Option<PathBuf>, CommError> {
    let entries = std::fs::read_dir(chats_dir)?;

    let mut files = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() || path.extension().map_or(true, |e| e != "json") {
            continue;
        }
        let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
            continue;
        };
        files.push((path, modified));
    }

    Ok(most_recent(files))
}

fn parse_messages(session_file: &Path) -> Option<Vec<GeminiMessage>> {
    let data = std::fs::read_to_string(session_file).ok()?;
    let value: Value = serde_json::from_str(&data).ok()?;

    // Two shapes in the wild: {"messages": [...]} or a top-level array.
    let raw_messages = match &value {
        Value::Object(map) => map.get("messages")?.as_array()?.clone(),
        Value::Array(items) => items.clone(),
        _ => return None,
    };

    let mut messages = Vec::new();
    for raw in raw_messages {
        let Some(obj) = raw.as_object() else { continue };
        let role = obj
            .get("role")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let mut content = obj
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if content.is_empty() {
            if let Some(parts) = obj.get("parts").and_then(Value::as_array) {
                let texts: Vec<&str> = parts
                    .iter()
                    .filter_map(|p| p.get("text").and_then(Value::as_str))
                    .collect();
                content = texts.join("\n");
            }
        }

        messages.push(GeminiMessage { role, content });
    }
    Some(messages)
}

/// Gemini's project hash: SHA-256 of the cleaned, lowercased path.
///
/// Cleaning collapses `.`, `..`, and redundant separators so every spelling
/// of a directory hashes to the same digest.
pub fn gemini_project_hash(work_dir: &str) -> String {
    let folded = work_dir.replace('\\', "/");
    let norm = crate::config::clean_posix_path(&folded).to_ascii_lowercase();
    let digest = Sha256::digest(norm.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Root of Gemini's per-project temp storage.
pub fn gemini_root() -> PathBuf {
    let root = std::env::var("GEMINI_ROOT").unwrap_or_default();
    let root = root.trim();
    if !root.is_empty() {
        return PathBuf::from(root);
    }
    home_dir().join(".gemini").join("tmp")
}

/// Find the chats directory for a work directory.
///
/// Tries the project hash first, then falls back to the most recently
/// modified `chats/` directory under the Gemini root.
pub fn discover_gemini_chats_dir(work_dir: &str) -> Option<PathBuf> {
    let root = gemini_root();

    let hashed = root.join(gemini_project_hash(work_dir)).join("chats");
    if hashed.is_dir() {
        return Some(hashed);
    }

    let entries = std::fs::read_dir(&root).ok()?;
    let mut dirs = Vec::new();
    for entry in entries.flatten() {
        if !entry.path().is_dir() {
            continue;
        }
        let chats = entry.path().join("chats");
        let Ok(meta) = std::fs::metadata(&chats) else {
            continue;
        };
        if !meta.is_dir() {
            continue;
        }
        let Ok(modified) = meta.modified() else { continue };
        dirs.push((chats, modified));
    }

    most_recent(dirs)
}
