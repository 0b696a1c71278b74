//! tmux backend: send-keys transport, pane queries, and pane log management.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;

use crate::error::BackendError;

use super::{Backend, PaneInfo};

/// Backend implemented over the `tmux` CLI.
#[derive(Debug, Default)]
pub struct TmuxBackend {
    /// Optional custom tmux socket name (`tmux -L`).
    socket_name: Option<String>,
}

impl TmuxBackend {
    pub fn new() -> Self {
        Self { socket_name: None }
    }

    /// True when tmux is installed and we are inside a tmux session.
    pub async fn is_available(&self) -> bool {
        if std::env::var("TMUX").unwrap_or_default().is_empty() {
            return false;
        }
        Command::new("tmux")
            .arg("-V")
            .output()
            .await
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    fn socket_args(&self) -> Vec<String> {
        let sock = self
            .socket_name
            .clone()
            .or_else(|| std::env::var("CCB_TMUX_SOCKET").ok())
            .unwrap_or_default();
        let sock = sock.trim();
        if sock.is_empty() {
            Vec::new()
        } else {
            vec!["-L".to_string(), sock.to_string()]
        }
    }

    async fn run(&self, args: &[&str]) -> Result<(), BackendError> {
        let mut full = self.socket_args();
        full.extend(args.iter().map(|a| a.to_string()));
        let status = Command::new("tmux").args(&full).status().await?;
        if status.success() {
            Ok(())
        } else {
            Err(BackendError::CommandFailed(format!(
                "tmux {} exited with {status}",
                args.first().copied().unwrap_or_default()
            )))
        }
    }

    async fn run_output(&self, args: &[&str]) -> Result<String, BackendError> {
        let mut full = self.socket_args();
        full.extend(args.iter().map(|a| a.to_string()));
        let out = Command::new("tmux").args(&full).output().await?;
        if !out.status.success() {
            return Err(BackendError::CommandFailed(format!(
                "tmux {} exited with {}",
                args.first().copied().unwrap_or_default(),
                out.status
            )));
        }
        Ok(String::from_utf8_lossy(&out.stdout).into_owned())
    }

    // Multiline text goes through load-buffer/paste-buffer so embedded
    // newlines are not interpreted as submissions mid-prompt.
    async fn send_bracketed_paste(&self, pane_id: &str, text: &str) -> Result<(), BackendError> {
        let tmp = std::env::temp_dir().join(format!("ccb-tmux-{}.txt", std::process::id()));
        if tokio::fs::write(&tmp, text).await.is_err() {
            return self
                .run(&["send-keys", "-t", pane_id, text, "Enter"])
                .await;
        }

        let result = self.paste_via_buffer(pane_id, &tmp, text).await;
        let _ = tokio::fs::remove_file(&tmp).await;
        result
    }

    async fn paste_via_buffer(
        &self,
        pane_id: &str,
        tmp: &Path,
        text: &str,
    ) -> Result<(), BackendError> {
        let tmp_str = tmp.to_string_lossy();
        if self.run(&["load-buffer", tmp_str.as_ref()]).await.is_err() {
            return self
                .run(&["send-keys", "-t", pane_id, text, "Enter"])
                .await;
        }
        self.run(&["paste-buffer", "-t", pane_id, "-d"]).await?;
        self.run(&["send-keys", "-t", pane_id, "Enter"]).await
    }

    /// Start logging a pane's output to a file.
    pub async fn pipe_pane(&self, pane_id: &str, log_file: &Path) -> Result<(), BackendError> {
        if let Some(dir) = log_file.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let sink = format!("cat >> {}", log_file.display());
        self.run(&["pipe-pane", "-t", pane_id, &sink]).await
    }

    /// Stop logging a pane's output.
    pub async fn stop_pipe_pane(&self, pane_id: &str) -> Result<(), BackendError> {
        self.run(&["pipe-pane", "-t", pane_id]).await
    }

    /// Respawn a dead pane with a new command.
    pub async fn respawn_pane(&self, pane_id: &str, cmd: &str) -> Result<(), BackendError> {
        if cmd.is_empty() {
            self.run(&["respawn-pane", "-t", pane_id, "-k"]).await
        } else {
            self.run(&["respawn-pane", "-t", pane_id, "-k", cmd]).await
        }
    }
}

#[async_trait]
impl Backend for TmuxBackend {
    fn name(&self) -> &'static str {
        "tmux"
    }

    async fn send_keys(&self, pane_id: &str, text: &str) -> Result<(), BackendError> {
        if text.contains('\n') {
            return self.send_bracketed_paste(pane_id, text).await;
        }
        self.run(&["send-keys", "-t", pane_id, text, "Enter"]).await
    }

    async fn capture_pane(&self, pane_id: &str) -> Result<String, BackendError> {
        self.run_output(&["capture-pane", "-t", pane_id, "-p", "-S", "-"])
            .await
    }

    async fn split_window(&self, target: &str, cmd: &str) -> Result<String, BackendError> {
        let mut args = vec!["split-window", "-t", target, "-h", "-P", "-F", "#{pane_id}"];
        if !cmd.is_empty() {
            args.push(cmd);
        }
        let out = self.run_output(&args).await?;
        Ok(out.trim().to_string())
    }

    async fn list_panes(&self) -> Result<Vec<PaneInfo>, BackendError> {
        let format =
            "#{pane_id}\t#{pane_title}\t#{pane_current_command}\t#{pane_active}\t#{pane_width}\t#{pane_height}";
        let out = self.run_output(&["list-panes", "-a", "-F", format]).await?;
        Ok(parse_pane_list(&out))
    }

    async fn kill_pane(&self, pane_id: &str) -> Result<(), BackendError> {
        self.run(&["kill-pane", "-t", pane_id]).await
    }

    async fn has_session(&self, session_id: &str) -> bool {
        self.run(&["has-session", "-t", session_id]).await.is_ok()
    }

    async fn is_alive(&self, pane_id: &str) -> bool {
        match self
            .run_output(&["display-message", "-t", pane_id, "-p", "#{pane_id}"])
            .await
        {
            Ok(out) => !out.trim().is_empty(),
            Err(_) => false,
        }
    }

    async fn set_pane_title(&self, pane_id: &str, title: &str) -> Result<(), BackendError> {
        self.run(&["select-pane", "-t", pane_id, "-T", title]).await
    }

    async fn get_pane_title(&self, pane_id: &str) -> Result<String, BackendError> {
        let out = self
            .run_output(&["display-message", "-t", pane_id, "-p", "#{pane_title}"])
            .await?;
        Ok(out.trim().to_string())
    }
}

fn parse_pane_list(output: &str) -> Vec<PaneInfo> {
    let mut panes = Vec::new();
    for line in output.trim().lines() {
        if line.is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.splitn(6, '\t').collect();
        if parts.len() < 6 {
            continue;
        }
        panes.push(PaneInfo {
            id: parts[0].to_string(),
            title: parts[1].to_string(),
            command: parts[2].to_string(),
            active: parts[3] == "1",
            width: parts[4].parse().unwrap_or(0),
            height: parts[5].parse().unwrap_or(0),
        });
    }
    panes
}

// ---------------------------------------------------------------------------
// PaneLogManager
// ---------------------------------------------------------------------------

/// Manages pane log files with rotation and cleanup.
#[derive(Debug)]
pub struct PaneLogManager {
    pub log_dir: PathBuf,
    pub max_files: usize,
    pub max_size: u64,
    pub ttl: Duration,
}

impl PaneLogManager {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            max_files: 50,
            max_size: 5 * 1024 * 1024,
            ttl: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }

    /// Log file path for a pane, with separator characters made filesystem
    /// safe.
    pub fn log_path_for(&self, pane_id: &str) -> PathBuf {
        let safe = pane_id
            .replace('%', "pct")
            .replace(['/', '\\'], "_");
        self.log_dir.join(format!("pane-{safe}.log"))
    }

    /// Remove expired logs, truncate oversized ones, and cap the file count.
    pub fn cleanup(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.log_dir)?;

        let now = std::time::SystemTime::now();
        let mut survivors: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();

        for entry in std::fs::read_dir(&self.log_dir)? {
            let Ok(entry) = entry else { continue };
            let path = entry.path();
            if path.is_dir() || path.extension().map_or(true, |e| e != "log") {
                continue;
            }
            let Ok(meta) = entry.metadata() else { continue };
            let modified = meta.modified().unwrap_or(now);

            if now
                .duration_since(modified)
                .is_ok_and(|age| age > self.ttl)
            {
                let _ = std::fs::remove_file(&path);
                continue;
            }

            if meta.len() > self.max_size {
                truncate_to_tail(&path, self.max_size);
            }
            survivors.push((path, modified));
        }

        if survivors.len() > self.max_files {
            survivors.sort_by_key(|(_, modified)| *modified);
            let excess = survivors.len() - self.max_files;
            for (path, _) in survivors.into_iter().take(excess) {
                let _ = std::fs::remove_file(path);
            }
        }
        Ok(())
    }
}

// Keep only the last `max_size` bytes of a file.
fn truncate_to_tail(path: &Path, max_size: u64) {
    use std::io::{Read, Seek, SeekFrom};

    let Ok(mut f) = std::fs::File::open(path) else {
        return;
    };
    let Ok(meta) = f.metadata() else { return };
    if meta.len() <= max_size {
        return;
    }
    if f.seek(SeekFrom::End(-(max_size as i64))).is_err() {
        return;
    }
    let mut tail = Vec::with_capacity(max_size as usize);
    if f.read_to_end(&mut tail).is_err() {
        return;
    }
    drop(f);
    let _ = std::fs::write(path, tail);
}
