//! PowerShell backend: a second-class Windows fallback.
//!
//! Pane IDs are process IDs of spawned PowerShell windows. Capture is not
//! supported; callers must not depend on it when this backend is active.

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::BackendError;

use super::{Backend, PaneInfo};

/// Backend driving PowerShell windows on Windows hosts.
#[derive(Debug, Default)]
pub struct PowerShellBackend;

impl PowerShellBackend {
    pub fn new() -> Self {
        Self
    }

    /// True only on Windows with PowerShell on PATH and no conflicting
    /// `CCB_BACKEND_ENV` setting.
    pub async fn is_available(&self) -> bool {
        if !cfg!(windows) {
            return false;
        }
        let env = std::env::var("CCB_BACKEND_ENV")
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if !env.is_empty() && env != "windows" {
            return false;
        }
        for exe in ["pwsh.exe", "powershell.exe"] {
            if Command::new(exe)
                .args(["-NoProfile", "-Command", "exit 0"])
                .output()
                .await
                .map(|o| o.status.success())
                .unwrap_or(false)
            {
                return true;
            }
        }
        false
    }

    fn ps_exe(&self) -> &'static str {
        "powershell.exe"
    }

    async fn run_ps(&self, script: &str) -> Result<String, BackendError> {
        let out = Command::new(self.ps_exe())
            .args(["-NoProfile", "-NonInteractive", "-Command", script])
            .output()
            .await?;
        if !out.status.success() {
            return Err(BackendError::CommandFailed(format!(
                "powershell exited with {}",
                out.status
            )));
        }
        Ok(String::from_utf8_lossy(&out.stdout).into_owned())
    }
}

#[async_trait]
impl Backend for PowerShellBackend {
    fn name(&self) -> &'static str {
        "powershell"
    }

    async fn send_keys(&self, pane_id: &str, text: &str) -> Result<(), BackendError> {
        let escaped = text.replace('\'', "''").replace('`', "``");
        let script = format!(
            "Add-Type -AssemblyName System.Windows.Forms\n\
             $wshell = New-Object -ComObject WScript.Shell\n\
             $wshell.AppActivate('{pane_id}') | Out-Null\n\
             Start-Sleep -Milliseconds 200\n\
             [System.Windows.Forms.SendKeys]::SendWait('{escaped}{{ENTER}}')"
        );
        self.run_ps(&script).await.map(|_| ())
    }

    async fn capture_pane(&self, _pane_id: &str) -> Result<String, BackendError> {
        Err(BackendError::CaptureUnsupported("powershell".to_string()))
    }

    async fn split_window(&self, _target: &str, cmd: &str) -> Result<String, BackendError> {
        let escaped = cmd.replace('\'', "''");
        let script = format!(
            "$proc = Start-Process {} -ArgumentList '-NoExit','-Command','{escaped}' -PassThru\n$proc.Id",
            self.ps_exe()
        );
        let out = self.run_ps(&script).await?;
        let pid = out.trim().to_string();
        if pid.is_empty() {
            return Err(BackendError::CommandFailed(
                "Start-Process returned no PID".to_string(),
            ));
        }
        Ok(pid)
    }

    async fn list_panes(&self) -> Result<Vec<PaneInfo>, BackendError> {
        let script = "Get-Process | Where-Object { $_.MainWindowTitle -like '*ccb*' } \
                      | Select-Object Id,ProcessName,MainWindowTitle | ConvertTo-Json";
        let out = self.run_ps(script).await?;
        Ok(parse_process_json(&out))
    }

    async fn kill_pane(&self, pane_id: &str) -> Result<(), BackendError> {
        let script =
            format!("Stop-Process -Id {pane_id} -Force -ErrorAction SilentlyContinue");
        self.run_ps(&script).await.map(|_| ())
    }

    async fn has_session(&self, session_id: &str) -> bool {
        self.is_alive(session_id).await
    }

    async fn is_alive(&self, pane_id: &str) -> bool {
        pane_id
            .parse::<u32>()
            .map(crate::lock::pid_alive)
            .unwrap_or(false)
    }

    async fn set_pane_title(&self, _pane_id: &str, _title: &str) -> Result<(), BackendError> {
        Ok(())
    }

    async fn get_pane_title(&self, _pane_id: &str) -> Result<String, BackendError> {
        Err(BackendError::CaptureUnsupported("powershell".to_string()))
    }
}

fn parse_process_json(out: &str) -> Vec<PaneInfo> {
    use serde_json::Value;

    let Ok(value) = serde_json::from_str::<Value>(out.trim()) else {
        return Vec::new();
    };
    let items: Vec<Value> = match value {
        Value::Array(items) => items,
        obj @ Value::Object(_) => vec![obj],
        _ => return Vec::new(),
    };
    items
        .into_iter()
        .filter_map(|item| {
            let id = item.get("Id")?.as_u64()?;
            Some(PaneInfo {
                id: id.to_string(),
                title: item
                    .get("MainWindowTitle")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                command: item
                    .get("ProcessName")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                ..Default::default()
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_json_handles_array_and_single_object() {
        let array = r#"[{"Id": 10, "ProcessName": "codex", "MainWindowTitle": "ccb-codex"}]"#;
        let panes = parse_process_json(array);
        assert_eq!(panes.len(), 1);
        assert_eq!(panes[0].id, "10");
        assert_eq!(panes[0].title, "ccb-codex");

        let single = r#"{"Id": 7, "ProcessName": "gemini", "MainWindowTitle": ""}"#;
        let panes = parse_process_json(single);
        assert_eq!(panes.len(), 1);
        assert_eq!(panes[0].command, "gemini");
    }

    #[test]
    fn process_json_tolerates_garbage() {
        assert!(parse_process_json("").is_empty());
        assert!(parse_process_json("not json").is_empty());
    }

    #[tokio::test]
    async fn capture_is_unsupported() {
        let backend = PowerShellBackend::new();
        let err = backend.capture_pane("1").await.unwrap_err();
        assert!(matches!(err, crate::error::BackendError::CaptureUnsupported(_)));
    }
}
