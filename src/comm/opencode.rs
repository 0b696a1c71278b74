//! OpenCode communication.
//!
//! OpenCode persists one JSON file per message under a storage tree
//! (`~/.local/share/opencode/storage/<session>/<msg>.json`). Extraction
//! gathers the most recent files, re-sorts them oldest-first, and walks
//! forward from the anchor.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::CommError;
use crate::runtime::home_dir;
use crate::terminal::Backend;

use super::{anchor_text, BaseCommunicator, Communicator, ReadOpts};

/// Cap on how many recent message files one read inspects.
const RECENT_MESSAGE_LIMIT: usize = 50;

/// Communicator for OpenCode.
pub struct OpenCodeCommunicator {
    base: BaseCommunicator,
}

impl OpenCodeCommunicator {
    pub fn new(backend: Option<Arc<dyn Backend>>) -> Self {
        Self {
            base: BaseCommunicator::new("opencode", backend),
        }
    }
}

#[async_trait]
impl Communicator for OpenCodeCommunicator {
    fn name(&self) -> &'static str {
        "opencode"
    }

    fn base(&self) -> &BaseCommunicator {
        &self.base
    }

    async fn read_reply(&self, opts: &ReadOpts) -> Result<String, CommError> {
        if opts.log_path.is_empty() {
            return Ok(String::new());
        }
        read_storage(Path::new(&opts.log_path), &opts.req_id)
    }
}

#[derive(Debug, Deserialize, Default)]
struct StoredMessage {
    #[serde(default)]
    role: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    error: String,
}

fn read_storage(storage_path: &Path, req_id: &str) -> Result<String, CommError> {
    let entries = std::fs::read_dir(storage_path)?;

    let mut files = Vec::new();
    for entry in entries.flatten() {
        if !entry.path().is_dir() {
            continue;
        }
        let Ok(msg_entries) = std::fs::read_dir(entry.path()) else {
            continue;
        };
        for msg_entry in msg_entries.flatten() {
            let path = msg_entry.path();
            if path.is_dir() || path.extension().map_or(true, |e| e != "json") {
                continue;
            }
            let Ok(modified) = msg_entry.metadata().and_then(|m| m.modified()) else {
                continue;
            };
            files.push((path, modified));
        }
    }

    if files.is_empty() {
        return Ok(String::new());
    }

    // Newest first, capped, then flipped back to chronological order so the
    // anchor walk sees messages as they happened.
    files.sort_by(|a, b| b.1.cmp(&a.1));
    files.truncate(RECENT_MESSAGE_LIMIT);
    files.reverse();

    let mut messages = Vec::new();
    for (path, _) in files {
        let Ok(data) = std::fs::read(&path) else { continue };
        let Ok(msg) = serde_json::from_slice::<StoredMessage>(&data) else {
            continue;
        };
        // Cancelled turns stay on disk; skip them.
        if !msg.error.is_empty() && msg.error.contains("Aborted") {
            continue;
        }
        messages.push(msg);
    }

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
        if msg.role == "assistant" && !msg.content.is_empty() {
            reply_parts.push(msg.content);
        }
    }

    Ok(reply_parts.join("\n"))
}

/// Find the OpenCode storage directory.
pub fn discover_opencode_storage() -> Option<PathBuf> {
    let storage = home_dir()
        .join(".local")
        .join("share")
        .join("opencode")
        .join("storage");
    if storage.exists() {
        return Some(storage);
    }

    // Windows fallback.
    if let Ok(app_data) = std::env::var("LOCALAPPDATA") {
        if !app_data.is_empty() {
            let storage = PathBuf::from(app_data).join("opencode").join("storage");
            if storage.exists() {
                return Some(storage);
            }
        }
    }
    None
}
