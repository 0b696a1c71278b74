//! Terminal backends: the shells that send keys into panes and list them.
//!
//! Backends are detected in priority order (tmux, WezTerm, PowerShell) and
//! hidden behind one trait so provider code never branches on the terminal.

mod powershell;
mod tmux;
mod wezterm;

pub use powershell::PowerShellBackend;
pub use tmux::{PaneLogManager, TmuxBackend};
pub use wezterm::WeztermBackend;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::error::BackendError;

/// Information about a terminal pane.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaneInfo {
    pub id: String,
    pub title: String,
    pub command: String,
    pub active: bool,
    pub width: u32,
    pub height: u32,
}

/// A terminal multiplexer driver.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Backend name (`tmux`, `wezterm`, `powershell`).
    fn name(&self) -> &'static str;

    /// Send text to a terminal pane.
    async fn send_keys(&self, pane_id: &str, text: &str) -> Result<(), BackendError>;

    /// Capture the current content of a terminal pane.
    ///
    /// Second-class backends may not support capture; callers must treat an
    /// error here as "no snapshot", not as pane death.
    async fn capture_pane(&self, pane_id: &str) -> Result<String, BackendError>;

    /// Create a new pane by splitting an existing one. Returns the new pane
    /// ID.
    async fn split_window(&self, target: &str, cmd: &str) -> Result<String, BackendError>;

    /// List all available panes.
    async fn list_panes(&self) -> Result<Vec<PaneInfo>, BackendError>;

    /// Kill a terminal pane.
    async fn kill_pane(&self, pane_id: &str) -> Result<(), BackendError>;

    /// Check whether a session/pane target exists.
    async fn has_session(&self, session_id: &str) -> bool;

    /// Check whether a specific pane is still alive.
    async fn is_alive(&self, pane_id: &str) -> bool;

    /// Set the title of a pane.
    async fn set_pane_title(&self, pane_id: &str, title: &str) -> Result<(), BackendError>;

    /// Get the title of a pane.
    async fn get_pane_title(&self, pane_id: &str) -> Result<String, BackendError>;

    /// Wait for a pane to become ready within the timeout.
    async fn wait_ready(&self, pane_id: &str, timeout: Duration) -> Result<(), BackendError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut interval = Duration::from_millis(100);
        while tokio::time::Instant::now() < deadline {
            if self.is_alive(pane_id).await {
                return Ok(());
            }
            tokio::time::sleep(interval).await;
            if interval < Duration::from_millis(500) {
                interval = Duration::from_millis((interval.as_millis() as u64 * 3) / 2);
            }
        }
        Err(BackendError::WaitTimeout {
            pane_id: pane_id.to_string(),
            timeout,
        })
    }
}

/// Detect the available terminal backend.
///
/// Priority: tmux, then WezTerm, then PowerShell (Windows only).
pub async fn detect_backend() -> Result<Arc<dyn Backend>, BackendError> {
    let tmux = TmuxBackend::new();
    if tmux.is_available().await {
        return Ok(Arc::new(tmux));
    }

    let wez = WeztermBackend::new();
    if wez.is_available().await {
        return Ok(Arc::new(wez));
    }

    let ps = PowerShellBackend::new();
    if ps.is_available().await {
        return Ok(Arc::new(ps));
    }

    Err(BackendError::NotAvailable {
        backend: "any".to_string(),
        reason: "no terminal backend available (tmux, wezterm, or powershell required)"
            .to_string(),
    })
}

/// Search all panes for one whose title contains the marker string.
pub async fn find_pane_by_title(
    backend: &dyn Backend,
    title_marker: &str,
) -> Result<String, BackendError> {
    let panes = backend.list_panes().await?;
    let marker = title_marker.to_ascii_lowercase();
    for pane in panes {
        if pane.title.to_ascii_lowercase().contains(&marker) {
            return Ok(pane.id);
        }
    }
    Err(BackendError::PaneNotFound {
        pane_id: title_marker.to_string(),
        backend: backend.name().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeBackend {
        panes: Vec<PaneInfo>,
    }

    #[async_trait]
    impl Backend for FakeBackend {
        fn name(&self) -> &'static str {
            "fake"
        }
        async fn send_keys(&self, _: &str, _: &str) -> Result<(), BackendError> {
            Ok(())
        }
        async fn capture_pane(&self, _: &str) -> Result<String, BackendError> {
            Ok(String::new())
        }
        async fn split_window(&self, _: &str, _: &str) -> Result<String, BackendError> {
            Ok("%new".into())
        }
        async fn list_panes(&self) -> Result<Vec<PaneInfo>, BackendError> {
            Ok(self.panes.clone())
        }
        async fn kill_pane(&self, _: &str) -> Result<(), BackendError> {
            Ok(())
        }
        async fn has_session(&self, _: &str) -> bool {
            true
        }
        async fn is_alive(&self, pane_id: &str) -> bool {
            self.panes.iter().any(|p| p.id == pane_id)
        }
        async fn set_pane_title(&self, _: &str, _: &str) -> Result<(), BackendError> {
            Ok(())
        }
        async fn get_pane_title(&self, _: &str) -> Result<String, BackendError> {
            Ok(String::new())
        }
    }

    fn pane(id: &str, title: &str) -> PaneInfo {
        PaneInfo {
            id: id.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn find_pane_by_title_is_case_insensitive() {
        let backend = FakeBackend {
            panes: vec![pane("%1", "shell"), pane("%2", "CCB-Codex")],
        };
        let found = find_pane_by_title(&backend, "ccb-codex").await.unwrap();
        assert_eq!(found, "%2");
    }

    #[tokio::test]
    async fn find_pane_by_title_reports_missing_marker() {
        let backend = FakeBackend { panes: vec![] };
        let err = find_pane_by_title(&backend, "ccb-droid").await.unwrap_err();
        assert!(matches!(err, BackendError::PaneNotFound { .. }));
    }

    #[tokio::test]
    async fn wait_ready_succeeds_for_live_pane() {
        let backend = FakeBackend {
            panes: vec![pane("%9", "x")],
        };
        backend
            .wait_ready("%9", Duration::from_millis(200))
            .await
            .expect("live pane must be ready");
    }

    #[tokio::test]
    async fn wait_ready_times_out_for_dead_pane() {
        let backend = FakeBackend { panes: vec![] };
        let err = backend
            .wait_ready("%9", Duration::from_millis(150))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::WaitTimeout { .. }));
    }
}
