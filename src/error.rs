//! Unified error types for the bridge.

use std::fmt;
use std::time::Duration;

// ---------------------------------------------------------------------------
// CommError
// ---------------------------------------------------------------------------

/// Errors arising from provider communication.
#[derive(Debug)]
pub enum CommError {
    /// No terminal backend is bound for this provider.
    NoBackend(String),
    /// The reply deadline elapsed before the done marker appeared.
    Timeout { provider: String, req_id: String },
    /// The provider pane disappeared mid-cycle.
    PaneDead { provider: String, pane_id: String },
    /// No session could be located for the provider.
    NoSession(String),
    Io(std::io::Error),
}

impl fmt::Display for CommError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoBackend(provider) => {
                write!(f, "no terminal backend available for {provider}")
            }
            Self::Timeout { provider, req_id } => {
                write!(
                    f,
                    "timeout waiting for reply from {provider} (req_id: {req_id})"
                )
            }
            Self::PaneDead { provider, pane_id } => {
                write!(f, "pane {pane_id} for {provider} is not alive")
            }
            Self::NoSession(provider) => write!(f, "no session found for {provider}"),
            Self::Io(e) => write!(f, "io: {e}"),
        }
    }
}

impl std::error::Error for CommError {}

impl From<std::io::Error> for CommError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

// ---------------------------------------------------------------------------
// BackendError
// ---------------------------------------------------------------------------

/// Errors from terminal backends (tmux, WezTerm, PowerShell).
#[derive(Debug)]
pub enum BackendError {
    /// The backend cannot be used in this environment.
    NotAvailable { backend: String, reason: String },
    /// The requested pane does not exist.
    PaneNotFound { pane_id: String, backend: String },
    /// A pane did not become ready within the allotted time.
    WaitTimeout { pane_id: String, timeout: Duration },
    /// Pane capture is not supported by this backend.
    CaptureUnsupported(String),
    /// The backend command ran but failed.
    CommandFailed(String),
    Io(std::io::Error),
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAvailable { backend, reason } => {
                write!(f, "backend {backend} not available: {reason}")
            }
            Self::PaneNotFound { pane_id, backend } => {
                write!(f, "pane {pane_id} not found in {backend}")
            }
            Self::WaitTimeout { pane_id, timeout } => {
                write!(f, "pane {pane_id} not ready after {timeout:?}")
            }
            Self::CaptureUnsupported(backend) => {
                write!(f, "capture not supported for {backend} backend")
            }
            Self::CommandFailed(msg) => write!(f, "backend command failed: {msg}"),
            Self::Io(e) => write!(f, "io: {e}"),
        }
    }
}

impl std::error::Error for BackendError {}

impl From<std::io::Error> for BackendError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

// ---------------------------------------------------------------------------
// ClientError
// ---------------------------------------------------------------------------

/// Errors from the daemon client.
#[derive(Debug)]
pub enum ClientError {
    /// No state file: the daemon is not running.
    NotRunning,
    /// The state file exists but cannot be parsed.
    InvalidState(String),
    /// TCP connection to the daemon failed.
    Connect(String, std::io::Error),
    /// The daemon replied with something that is not a JSON object.
    Protocol(String),
    /// Auto-starting the daemon failed.
    StartFailed(String),
    /// The daemon rejected or failed the request.
    Rpc(String),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotRunning => write!(f, "daemon not running (no state file)"),
            Self::InvalidState(msg) => write!(f, "invalid state file: {msg}"),
            Self::Connect(addr, e) => write!(f, "cannot connect to daemon at {addr}: {e}"),
            Self::Protocol(msg) => write!(f, "invalid response: {msg}"),
            Self::StartFailed(msg) => write!(f, "failed to start daemon: {msg}"),
            Self::Rpc(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for ClientError {}

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Errors when loading or writing bridge configuration.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io: {e}"),
            Self::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comm_error_display() {
        assert_eq!(
            CommError::NoSession("codex".into()).to_string(),
            "no session found for codex"
        );
        let e = CommError::Timeout {
            provider: "gemini".into(),
            req_id: "20250101-000000-000-1".into(),
        };
        assert!(e.to_string().contains("req_id: 20250101-000000-000-1"));
    }

    #[test]
    fn pane_dead_mentions_pane_and_provider() {
        let e = CommError::PaneDead {
            provider: "claude".into(),
            pane_id: "%7".into(),
        };
        assert_eq!(e.to_string(), "pane %7 for claude is not alive");
    }

    #[test]
    fn backend_error_display() {
        let e = BackendError::NotAvailable {
            backend: "tmux".into(),
            reason: "not inside a tmux session".into(),
        };
        assert_eq!(
            e.to_string(),
            "backend tmux not available: not inside a tmux session"
        );
        assert_eq!(
            BackendError::CaptureUnsupported("powershell".into()).to_string(),
            "capture not supported for powershell backend"
        );
    }

    #[test]
    fn client_error_from_io_connect() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let e = ClientError::Connect("127.0.0.1:9".into(), io_err);
        assert!(e
            .to_string()
            .starts_with("cannot connect to daemon at 127.0.0.1:9"));
    }
}
