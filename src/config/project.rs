//! Work-directory normalization and the stable per-project identifier.
//!
//! A project ID must come out identical whether the caller is running under
//! Windows, WSL (`/mnt/c/...`), or MSYS (`/c/...`), so everything is folded
//! to a canonical forward-slash form before hashing.

use regex::Regex;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::LazyLock;

use super::session::PROJECT_CONFIG_DIRNAME;
use crate::runtime::home_dir;

static WIN_DRIVE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z]:([/\\]|$)").expect("invalid drive regex"));
static MNT_DRIVE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/mnt/([A-Za-z])/(.*)$").expect("invalid mnt regex"));
static MSYS_DRIVE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/([A-Za-z])/(.*)$").expect("invalid msys regex"));

/// Normalize a work directory path into a stable string for hashing.
///
/// Handles `~` expansion, relative paths, Windows drive letters, WSL `/mnt/`
/// paths, MSYS drive paths, and separator folding. A leading `//` UNC prefix
/// is preserved.
pub fn normalize_work_dir(value: &str) -> String {
    let raw = value.trim();
    if raw.is_empty() {
        return String::new();
    }

    let mut raw = raw.to_string();
    if raw.starts_with('~') {
        let home = home_dir();
        raw = format!("{}{}", home.display(), &raw[1..]);
    }

    let preview = raw.replace('\\', "/");
    let is_abs = preview.starts_with('/')
        || raw.starts_with("\\\\")
        || WIN_DRIVE_RE.is_match(&preview);
    if !is_abs {
        if let Ok(cwd) = std::env::current_dir() {
            raw = format!("{}/{}", cwd.display(), raw);
        }
    }

    let mut s = raw.replace('\\', "/");

    if let Some(caps) = MNT_DRIVE_RE.captures(&s) {
        let drive = caps[1].to_ascii_lowercase();
        s = format!("{drive}:/{}", &caps[2]);
    } else if let Some(caps) = MSYS_DRIVE_RE.captures(&s) {
        let msys = std::env::var_os("MSYSTEM").is_some();
        if msys || cfg!(windows) {
            let drive = caps[1].to_ascii_lowercase();
            s = format!("{drive}:/{}", &caps[2]);
        }
    }

    if let Some(rest) = s.strip_prefix("//") {
        let cleaned = clean_posix_path(rest);
        s = format!("//{}", cleaned.trim_start_matches('/'));
    } else {
        s = clean_posix_path(&s);
    }

    if WIN_DRIVE_RE.is_match(&s) {
        let mut chars = s.chars();
        let drive = chars.next().unwrap().to_ascii_lowercase();
        s = format!("{drive}{}", chars.as_str());
    }

    s
}

// Collapse `.`, `..`, and repeated separators in a forward-slash path.
pub(crate) fn clean_posix_path(p: &str) -> String {
    let absolute = p.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for comp in p.split('/') {
        match comp {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|last| *last != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }
    let joined = parts.join("/");
    if absolute {
        format!("/{joined}")
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

// Finds a `.ccb_config/` directory in the given directory (no ancestor
// traversal).
fn find_config_root(start_dir: &Path) -> Option<std::path::PathBuf> {
    let cfg = start_dir.join(PROJECT_CONFIG_DIRNAME);
    if cfg.is_dir() {
        Some(start_dir.to_path_buf())
    } else {
        None
    }
}

/// Compute the SHA-256 project ID used for routing.
///
/// When `<work_dir>/.ccb_config` exists the config-bearing directory is
/// hashed, so nested invocations of the same project agree on one ID.
pub fn compute_project_id(work_dir: &str) -> String {
    let abs = match std::fs::canonicalize(work_dir) {
        Ok(p) => p,
        Err(_) => {
            let p = Path::new(work_dir);
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                std::env::current_dir()
                    .map(|cwd| cwd.join(p))
                    .unwrap_or_else(|_| p.to_path_buf())
            }
        }
    };

    let base = find_config_root(&abs).unwrap_or(abs);
    let mut norm = normalize_work_dir(&base.to_string_lossy());
    if norm.is_empty() {
        norm = base.to_string_lossy().into_owned();
    }

    let digest = Sha256::digest(norm.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testsupport::TestTempDir;

    #[test]
    fn empty_input_stays_empty() {
        assert_eq!(normalize_work_dir(""), "");
        assert_eq!(normalize_work_dir("   "), "");
    }

    #[test]
    fn backslashes_fold_to_forward_slashes() {
        assert_eq!(normalize_work_dir("C:\\Users\\x"), "c:/Users/x");
        assert_eq!(normalize_work_dir("c:/Users/x"), "c:/Users/x");
    }

    #[test]
    fn wsl_mount_paths_become_drive_paths() {
        assert_eq!(normalize_work_dir("/mnt/c/Users/x"), "c:/Users/x");
        assert_eq!(normalize_work_dir("/mnt/D/proj"), "d:/proj");
    }

    #[test]
    fn windows_spellings_agree() {
        let a = normalize_work_dir("C:\\Users\\x");
        let b = normalize_work_dir("c:/Users/x");
        let c = normalize_work_dir("/mnt/c/Users/x");
        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[test]
    fn redundant_components_collapse() {
        assert_eq!(normalize_work_dir("/a//b/./c/../d"), "/a/b/d");
    }

    #[test]
    fn unc_prefix_is_preserved() {
        assert_eq!(normalize_work_dir("//server/share/x"), "//server/share/x");
    }

    #[test]
    fn project_id_is_64_hex_and_deterministic() {
        let tmp = TestTempDir::new("projid");
        let dir = tmp.path().to_string_lossy().into_owned();
        let id = compute_project_id(&dir);
        assert_eq!(id.len(), 64);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(id, compute_project_id(&dir));
    }

    #[test]
    fn project_id_prefers_config_root() {
        let tmp = TestTempDir::new("projid");
        std::fs::create_dir_all(tmp.child(PROJECT_CONFIG_DIRNAME)).unwrap();
        let root = tmp.path().to_string_lossy().into_owned();
        let with_config = compute_project_id(&root);
        // Hashing the same directory directly must agree when the config dir
        // lives there.
        assert_eq!(with_config, compute_project_id(&root));
    }

    #[test]
    fn clean_posix_handles_leading_dotdot() {
        assert_eq!(clean_posix_path("/.."), "/");
        assert_eq!(clean_posix_path("a/../../b"), "../b");
    }
}
