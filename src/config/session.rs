//! Per-project session hint files under `.ccb_config/`.
//!
//! A session file holds either a bare pane identifier or a JSON object with
//! `pane_id`, `work_dir`, `active`, and `terminal`. Writes are atomic and
//! pre-checked so a blocked write surfaces a concrete reason and fix.

use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

/// Directory name holding per-project bridge files.
pub const PROJECT_CONFIG_DIRNAME: &str = ".ccb_config";

/// Why a session file cannot be written.
#[derive(Debug)]
pub enum SessionFileIssue {
    /// The parent directory is missing or not a directory.
    MissingDir(PathBuf),
    /// The parent directory exists but rejects writes.
    DirNotWritable(PathBuf),
    /// The path is a symlink; refuse to follow it.
    Symlink { path: PathBuf, target: PathBuf },
    /// The path is a directory, not a file.
    IsDirectory(PathBuf),
    /// The path exists but is not a regular file.
    NotRegular(PathBuf),
    /// The file exists but rejects writes.
    NotWritable(PathBuf),
    /// The path could not be inspected.
    Stat(std::io::Error),
}

impl SessionFileIssue {
    /// User-readable reason.
    pub fn reason(&self) -> String {
        match self {
            Self::MissingDir(dir) => format!("Directory not found: {}", dir.display()),
            Self::DirNotWritable(dir) => format!("Directory not writable: {}", dir.display()),
            Self::Symlink { target, .. } => {
                format!("Is symlink pointing to {}", target.display())
            }
            Self::IsDirectory(_) => "Is directory, not file".to_string(),
            Self::NotRegular(_) => "Not a regular file".to_string(),
            Self::NotWritable(path) => format!("File not writable: {}", path.display()),
            Self::Stat(e) => format!("Cannot stat file: {e}"),
        }
    }

    /// Suggested shell command to unblock the write.
    pub fn fix(&self) -> String {
        match self {
            Self::MissingDir(dir) => format!("mkdir -p {}", dir.display()),
            Self::DirNotWritable(dir) => format!("chmod u+w {}", dir.display()),
            Self::Symlink { path, .. } | Self::NotRegular(path) => {
                format!("rm -f {}", path.display())
            }
            Self::IsDirectory(path) => format!("rmdir {}", path.display()),
            Self::NotWritable(path) => format!("chmod u+w {}", path.display()),
            Self::Stat(_) => String::new(),
        }
    }
}

/// The `.ccb_config` directory for a given work directory.
pub fn project_config_dir(work_dir: &Path) -> PathBuf {
    work_dir.join(PROJECT_CONFIG_DIRNAME)
}

/// Ensure the `.ccb_config` directory exists for a work directory.
pub fn ensure_session_dir(work_dir: &Path) -> std::io::Result<PathBuf> {
    let dir = project_config_dir(work_dir);
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Check whether a session file can be written at `path`.
pub fn check_session_writable(path: &Path) -> Result<(), SessionFileIssue> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));

    match fs::metadata(parent) {
        Ok(meta) if meta.is_dir() => {}
        _ => return Err(SessionFileIssue::MissingDir(parent.to_path_buf())),
    }

    // Probe directory writability with a scratch file.
    let probe = parent.join(".ccb_write_test");
    match fs::File::create(&probe) {
        Ok(f) => {
            drop(f);
            let _ = fs::remove_file(&probe);
        }
        Err(_) => return Err(SessionFileIssue::DirNotWritable(parent.to_path_buf())),
    }

    let meta = match fs::symlink_metadata(path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(SessionFileIssue::Stat(e)),
        Ok(meta) => meta,
    };

    if meta.file_type().is_symlink() {
        let target = fs::read_link(path).unwrap_or_default();
        return Err(SessionFileIssue::Symlink {
            path: path.to_path_buf(),
            target,
        });
    }
    if meta.is_dir() {
        return Err(SessionFileIssue::IsDirectory(path.to_path_buf()));
    }
    if !meta.is_file() {
        return Err(SessionFileIssue::NotRegular(path.to_path_buf()));
    }

    match fs::OpenOptions::new().write(true).open(path) {
        Ok(_) => Ok(()),
        Err(_) => Err(SessionFileIssue::NotWritable(path.to_path_buf())),
    }
}

/// Safely write a session file with pre-checks and atomic rename.
pub fn safe_write_session(path: &Path, content: &str) -> Result<(), String> {
    if let Err(issue) = check_session_writable(path) {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        return Err(format!(
            "Cannot write {name}: {}\nFix: {}",
            issue.reason(),
            issue.fix()
        ));
    }

    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|e| format!("Cannot create directory: {e}"))?;

    let tmp = PathBuf::from(format!("{}.tmp", path.display()));
    if let Err(e) = fs::write(&tmp, content) {
        let _ = fs::remove_file(&tmp);
        return Err(format!(
            "Cannot write {}: {e}\nTry: rm -f {} then retry",
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            path.display()
        ));
    }
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(format!("Write failed: {e}"));
    }
    Ok(())
}

/// Locate a session file for a work directory.
///
/// Lookup is local-only (no upward traversal):
/// 1. `<work_dir>/.ccb_config/<filename>`
/// 2. `<work_dir>/<filename>` (legacy)
pub fn find_project_session_file(work_dir: &Path, filename: &str) -> Option<PathBuf> {
    let candidate = work_dir.join(PROJECT_CONFIG_DIRNAME).join(filename);
    if candidate.exists() {
        return Some(candidate);
    }
    let legacy = work_dir.join(filename);
    if legacy.exists() {
        return Some(legacy);
    }
    None
}

/// Read a session file's trimmed content; empty string on error.
pub fn read_session_file(path: &Path) -> String {
    fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

/// Extract the pane ID from session file content.
///
/// Content is either a bare pane identifier or a JSON object carrying
/// `pane_id`.
pub fn parse_session_pane(content: &str) -> Option<String> {
    let content = content.trim();
    if content.is_empty() {
        return None;
    }
    if content.starts_with('{') {
        let value: Value = serde_json::from_str(content).ok()?;
        let pane = value.get("pane_id")?.as_str()?.trim();
        if pane.is_empty() {
            return None;
        }
        return Some(pane.to_string());
    }
    Some(content.to_string())
}
