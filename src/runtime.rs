//! Per-user runtime directory, daemon state/log paths, and the size-capped
//! daemon log sink.

use chrono::Local;
use rand::rngs::OsRng;
use rand::RngCore;
use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

use crate::config::env_int;

/// Default cap on daemon log size before the tail-shrink kicks in.
const DEFAULT_LOG_MAX_BYTES: i64 = 2 * 1024 * 1024;
/// Default minimum spacing between shrink checks.
const DEFAULT_SHRINK_CHECK_INTERVAL_S: i64 = 10;

/// Runtime directory for state/log files.
///
/// `CCB_RUN_DIR` overrides; otherwise `$LOCALAPPDATA/ccb` on Windows and
/// `$XDG_CACHE_HOME/ccb` or `~/.cache/ccb` elsewhere.
pub fn run_dir() -> PathBuf {
    let override_dir = std::env::var("CCB_RUN_DIR").unwrap_or_default();
    let override_dir = override_dir.trim();
    if !override_dir.is_empty() {
        return expand_home(override_dir);
    }

    if cfg!(windows) {
        for name in ["LOCALAPPDATA", "APPDATA"] {
            if let Ok(base) = std::env::var(name) {
                if !base.trim().is_empty() {
                    return PathBuf::from(base).join("ccb");
                }
            }
        }
        return home_dir().join("AppData").join("Local").join("ccb");
    }

    if let Ok(xdg) = std::env::var("XDG_CACHE_HOME") {
        if !xdg.trim().is_empty() {
            return PathBuf::from(xdg).join("ccb");
        }
    }
    home_dir().join(".cache").join("ccb")
}

/// Path for a JSON state file under the runtime directory.
pub fn state_file_path(name: &str) -> PathBuf {
    if name.ends_with(".json") {
        run_dir().join(name)
    } else {
        run_dir().join(format!("{name}.json"))
    }
}

/// Path for a log file under the runtime directory.
pub fn log_path(name: &str) -> PathBuf {
    if name.ends_with(".log") {
        run_dir().join(name)
    } else {
        run_dir().join(format!("{name}.log"))
    }
}

/// Create the runtime directory if it doesn't exist.
pub fn ensure_run_dir() -> std::io::Result<()> {
    fs::create_dir_all(run_dir())
}

/// Generate a random 32-character hex token.
pub fn random_token() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Normalize a bind host into a connectable host.
pub fn normalize_connect_host(host: &str) -> &str {
    match host.trim() {
        "" | "0.0.0.0" => "127.0.0.1",
        "::" | "[::]" => "::1",
        other => other,
    }
}

/// Expand a leading `~` with the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix('~') {
        let mut home = home_dir().into_os_string().into_string().unwrap_or_default();
        home.push_str(rest);
        return PathBuf::from(home);
    }
    PathBuf::from(path)
}

/// Best-effort home directory lookup.
pub fn home_dir() -> PathBuf {
    if cfg!(windows) {
        if let Ok(profile) = std::env::var("USERPROFILE") {
            if !profile.is_empty() {
                return PathBuf::from(profile);
            }
        }
    }
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

// ---------------------------------------------------------------------------
// LogSink
// ---------------------------------------------------------------------------

/// Append-only daemon log with a size cap.
///
/// When the file exceeds `CCB_LOG_MAX_BYTES` (default 2 MiB) it is truncated
/// to its tail by writing the last bytes to a temp file and renaming over the
/// original, at most once per `CCB_LOG_SHRINK_CHECK_INTERVAL_S` seconds.
#[derive(Debug)]
pub struct LogSink {
    path: PathBuf,
    last_shrink_check: Mutex<Option<Instant>>,
}

impl LogSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_shrink_check: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one timestamped line to the log.
    pub fn log(&self, msg: &str) {
        let ts = Local::now().format("%Y-%m-%d %H:%M:%S");
        self.append(&format!("[{ts}] {msg}"));
    }

    /// Append a raw line, shrinking first if the cap was exceeded.
    pub fn append(&self, msg: &str) {
        self.maybe_shrink();

        if let Some(dir) = self.path.parent() {
            let _ = fs::create_dir_all(dir);
        }

        use std::io::Write;
        let Ok(mut f) = fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
        else {
            return;
        };
        let line = format!("{}\n", msg.trim_end_matches('\n'));
        let _ = f.write_all(line.as_bytes());
    }

    fn maybe_shrink(&self) {
        let max_bytes = env_int("CCB_LOG_MAX_BYTES", DEFAULT_LOG_MAX_BYTES);
        if max_bytes <= 0 {
            return;
        }
        let interval_s = env_int(
            "CCB_LOG_SHRINK_CHECK_INTERVAL_S",
            DEFAULT_SHRINK_CHECK_INTERVAL_S,
        );

        {
            let mut last = self
                .last_shrink_check
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            let now = Instant::now();
            if let Some(prev) = *last {
                if interval_s > 0 && now.duration_since(prev).as_secs() < interval_s as u64 {
                    return;
                }
            }
            *last = Some(now);
        }

        let Ok(meta) = fs::metadata(&self.path) else {
            return;
        };
        let size = meta.len() as i64;
        if size <= max_bytes {
            return;
        }

        let Ok(mut f) = fs::File::open(&self.path) else {
            return;
        };
        if f.seek(SeekFrom::End(-max_bytes)).is_err() {
            return;
        }
        let mut tail = Vec::with_capacity(max_bytes as usize);
        if f.read_to_end(&mut tail).is_err() {
            return;
        }
        drop(f);

        let tmp = self.path.with_extension("log.shrink.tmp");
        if fs::write(&tmp, &tail).is_err() {
            let _ = fs::remove_file(&tmp);
            return;
        }
        if fs::rename(&tmp, &self.path).is_err() {
            let _ = fs::remove_file(&tmp);
        }
    }
}
