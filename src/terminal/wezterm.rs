//! WezTerm backend driven through `wezterm cli`.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio::process::Command;

use crate::error::BackendError;

use super::{Backend, PaneInfo};

/// Backend implemented over the `wezterm cli` subcommands.
#[derive(Debug, Default)]
pub struct WeztermBackend;

impl WeztermBackend {
    pub fn new() -> Self {
        Self
    }

    /// True when the WezTerm CLI is reachable from this process.
    pub async fn is_available(&self) -> bool {
        // With WEZTERM_PANE set we are definitely inside WezTerm; otherwise a
        // successful `wezterm cli list` means the mux socket is reachable
        // even though the env was not propagated.
        let probe = Command::new("wezterm").args(["cli", "list"]).output().await;
        match probe {
            Ok(out) => out.status.success(),
            Err(_) => false,
        }
    }

    async fn run(&self, args: &[&str]) -> Result<(), BackendError> {
        let status = Command::new("wezterm")
            .arg("cli")
            .args(args)
            .status()
            .await?;
        if status.success() {
            Ok(())
        } else {
            Err(BackendError::CommandFailed(format!(
                "wezterm cli {} exited with {status}",
                args.first().copied().unwrap_or_default()
            )))
        }
    }

    async fn run_output(&self, args: &[&str]) -> Result<String, BackendError> {
        let out = Command::new("wezterm")
            .arg("cli")
            .args(args)
            .output()
            .await?;
        if !out.status.success() {
            return Err(BackendError::CommandFailed(format!(
                "wezterm cli {} exited with {}: {}",
                args.first().copied().unwrap_or_default(),
                out.status,
                String::from_utf8_lossy(&out.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&out.stdout).into_owned())
    }

    /// Send a bare Enter with retries; WezTerm occasionally drops the key
    /// right after a paste.
    pub async fn send_enter_with_retry(
        &self,
        pane_id: &str,
        max_retries: usize,
    ) -> Result<(), BackendError> {
        for _ in 0..max_retries {
            let mut args = vec!["send-text"];
            if !pane_id.is_empty() {
                args.extend(["--pane-id", pane_id]);
            }
            args.extend(["--no-paste", "\r"]);
            if self.run(&args).await.is_ok() {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        Err(BackendError::CommandFailed(format!(
            "failed to send Enter to pane {pane_id} after {max_retries} retries"
        )))
    }

    /// Spawn a brand-new pane (new tab) running `cmd`.
    pub async fn spawn(&self, cmd: &str) -> Result<String, BackendError> {
        let mut args = vec!["spawn".to_string(), "--".to_string()];
        args.extend(split_shell_command(cmd));
        let refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let out = self.run_output(&refs).await?;
        Ok(out.trim().to_string())
    }
}

#[derive(Debug, Deserialize)]
struct RawWezPane {
    pane_id: u64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    cwd: String,
    #[serde(default)]
    is_active: bool,
    #[serde(default)]
    size_cols: u32,
    #[serde(default)]
    size_rows: u32,
}

#[async_trait]
impl Backend for WeztermBackend {
    fn name(&self) -> &'static str {
        "wezterm"
    }

    async fn send_keys(&self, pane_id: &str, text: &str) -> Result<(), BackendError> {
        let payload = format!("{text}\r");
        let mut args = vec!["send-text"];
        if !pane_id.is_empty() {
            args.extend(["--pane-id", pane_id]);
        }
        args.extend(["--no-paste", payload.as_str()]);
        self.run(&args).await
    }

    async fn capture_pane(&self, pane_id: &str) -> Result<String, BackendError> {
        let mut args = vec!["get-text"];
        if !pane_id.is_empty() {
            args.extend(["--pane-id", pane_id]);
        }
        self.run_output(&args).await
    }

    async fn split_window(&self, target: &str, cmd: &str) -> Result<String, BackendError> {
        let mut args = vec!["split-pane".to_string()];
        if !target.is_empty() {
            args.push("--pane-id".to_string());
            args.push(target.to_string());
        }
        args.push("--right".to_string());
        if !cmd.is_empty() {
            args.push("--".to_string());
            args.extend(split_shell_command(cmd));
        }
        let refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let out = self.run_output(&refs).await?;
        Ok(out.trim().to_string())
    }

    async fn list_panes(&self) -> Result<Vec<PaneInfo>, BackendError> {
        let out = self.run_output(&["list", "--format", "json"]).await?;
        let raw: Vec<RawWezPane> = serde_json::from_str(&out)
            .map_err(|e| BackendError::CommandFailed(format!("wezterm cli list: {e}")))?;
        Ok(raw
            .into_iter()
            .map(|p| PaneInfo {
                id: p.pane_id.to_string(),
                title: p.title,
                command: p.cwd,
                active: p.is_active,
                width: p.size_cols,
                height: p.size_rows,
            })
            .collect())
    }

    async fn kill_pane(&self, pane_id: &str) -> Result<(), BackendError> {
        self.run(&["kill-pane", "--pane-id", pane_id]).await
    }

    async fn has_session(&self, session_id: &str) -> bool {
        self.is_alive(session_id).await
    }

    async fn is_alive(&self, pane_id: &str) -> bool {
        match self.list_panes().await {
            Ok(panes) => panes.iter().any(|p| p.id == pane_id),
            Err(_) => false,
        }
    }

    async fn set_pane_title(&self, _pane_id: &str, _title: &str) -> Result<(), BackendError> {
        // WezTerm titles follow the foreground process; there is no CLI verb
        // to set one.
        Ok(())
    }

    async fn get_pane_title(&self, pane_id: &str) -> Result<String, BackendError> {
        let panes = self.list_panes().await?;
        panes
            .into_iter()
            .find(|p| p.id == pane_id)
            .map(|p| p.title)
            .ok_or_else(|| BackendError::PaneNotFound {
                pane_id: pane_id.to_string(),
                backend: "wezterm".to_string(),
            })
    }
}

// Split a command string into arguments, respecting single and double quotes.
fn split_shell_command(cmd: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quote: Option<char> = None;

    for c in cmd.chars() {
        match in_quote {
            Some(q) if c == q => {
                in_quote = None;
                current.push(c);
            }
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                in_quote = Some(c);
                current.push(c);
            }
            None if c == ' ' || c == '\t' => {
                if !current.is_empty() {
                    args.push(std::mem::take(&mut current));
                }
            }
            None => current.push(c),
        }
    }
    if !current.is_empty() {
        args.push(current);
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_split_respects_quotes() {
        assert_eq!(
            split_shell_command(r#"codex -c trust_level="trusted" resume"#),
            vec!["codex", "-c", r#"trust_level="trusted""#, "resume"]
        );
        assert_eq!(
            split_shell_command("claude  --continue"),
            vec!["claude", "--continue"]
        );
        assert!(split_shell_command("").is_empty());
    }

    #[test]
    fn pane_json_deserializes_with_defaults() {
        let raw = r#"[{"pane_id": 3, "title": "t", "is_active": true}]"#;
        let panes: Vec<RawWezPane> = serde_json::from_str(raw).unwrap();
        assert_eq!(panes[0].pane_id, 3);
        assert!(panes[0].is_active);
        assert_eq!(panes[0].size_cols, 0);
    }
}
