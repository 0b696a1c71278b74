//! Per-provider session loading: session file + provider log-path discovery.

use std::path::Path;

use crate::comm;
use crate::config::{
    compute_project_id, find_project_session_file, parse_session_pane, read_session_file,
};
use crate::protocol::session_filename;

/// Session state for a provider in a specific project.
#[derive(Debug, Clone, Default)]
pub struct ProjectSession {
    pub provider: String,
    pub project_id: String,
    pub work_dir: String,
    pub pane_id: String,
    pub session_id: String,
    pub log_path: String,
}

/// Load a provider's session for a work directory.
///
/// Returns `None` when no session file exists or it holds no pane; a missing
/// provider log path is tolerated (the poll loop reports diagnostics).
pub fn load_session(provider: &str, work_dir: &str) -> Option<ProjectSession> {
    let filename = session_filename(provider)?;
    let session_file = find_project_session_file(Path::new(work_dir), filename)?;
    let content = read_session_file(&session_file);
    let pane_id = parse_session_pane(&content)?;

    let log_path = match provider {
        "codex" => find_codex_log_path(),
        "gemini" => find_gemini_log_path(work_dir),
        "opencode" => comm::discover_opencode_storage()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default(),
        "claude" => find_claude_log_path(work_dir),
        "droid" => comm::discover_droid_sessions()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default(),
        _ => String::new(),
    };

    Some(ProjectSession {
        provider: provider.to_string(),
        project_id: compute_project_id(work_dir),
        work_dir: work_dir.to_string(),
        pane_id,
        session_id: String::new(),
        log_path,
    })
}

// Codex: the output log of the most recent session directory.
fn find_codex_log_path() -> String {
    match comm::discover_codex_session() {
        Some(session_dir) => {
            let log = session_dir.join("output.log");
            if log.exists() {
                log.to_string_lossy().into_owned()
            } else {
                String::new()
            }
        }
        None => String::new(),
    }
}

// Gemini: the chats directory for this project (hash match or freshest).
fn find_gemini_log_path(work_dir: &str) -> String {
    comm::discover_gemini_chats_dir(work_dir)
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default()
}

// Claude: the matching project directory when one exists, else the projects
// root (parsers narrow to the freshest .jsonl).
fn find_claude_log_path(work_dir: &str) -> String {
    if let Some(project_dir) = comm::discover_claude_project_dir(work_dir) {
        return project_dir.to_string_lossy().into_owned();
    }
    let projects = comm::claude_projects_dir();
    if projects.exists() {
        projects.to_string_lossy().into_owned()
    } else {
        String::new()
    }
}
