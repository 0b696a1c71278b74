//! Daemon client: state-file discovery, per-RPC connections, and detached
//! auto-start.

use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::daemon::{DaemonState, ProviderResult};
use crate::error::ClientError;
use crate::protocol;
use crate::runtime::{normalize_connect_host, state_file_path};

/// How long a fresh daemon gets to come up before auto-start fails.
const START_DEADLINE: Duration = Duration::from_secs(10);
/// Readiness poll cadence during auto-start.
const START_POLL: Duration = Duration::from_millis(200);
/// Connect timeout for each RPC.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// A client-side ask request.
#[derive(Debug, Clone, Default)]
pub struct AskRequest {
    pub provider: String,
    pub message: String,
    pub work_dir: String,
    pub timeout_s: f64,
    pub quiet: bool,
    pub caller: String,
}

/// A client-side ask result.
#[derive(Debug, Clone, Default)]
pub struct AskResult {
    pub exit_code: i32,
    pub reply: String,
    pub req_id: String,
    pub error: String,
}

/// Read the daemon state from the state file.
pub fn read_state(state_file: Option<&Path>) -> Result<DaemonState, ClientError> {
    let path = match state_file {
        Some(p) => p.to_path_buf(),
        None => state_file_path("askd"),
    };
    let data = std::fs::read_to_string(&path).map_err(|_| ClientError::NotRunning)?;
    serde_json::from_str(&data).map_err(|e| ClientError::InvalidState(e.to_string()))
}

async fn connect(state: &DaemonState) -> Result<TcpStream, ClientError> {
    let host = normalize_connect_host(&state.host);
    let addr = format!("{host}:{}", state.port);
    let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr))
        .await
        .map_err(|_| {
            ClientError::Connect(
                addr.clone(),
                std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"),
            )
        })?
        .map_err(|e| ClientError::Connect(addr.clone(), e))?;
    Ok(stream)
}

/// One RPC: fresh connection, one JSON object each way.
pub async fn send_request(state: &DaemonState, req: &Value) -> Result<Value, ClientError> {
    let mut stream = connect(state).await?;

    let mut data = serde_json::to_vec(req).map_err(|e| ClientError::Protocol(e.to_string()))?;
    data.push(b'\n');
    stream
        .write_all(&data)
        .await
        .map_err(|e| ClientError::Protocol(e.to_string()))?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader
        .read_line(&mut line)
        .await
        .map_err(|e| ClientError::Protocol(e.to_string()))?;
    serde_json::from_str(&line).map_err(|e| ClientError::Protocol(e.to_string()))
}

/// Ping the daemon itself.
pub async fn ping_daemon(state: &DaemonState) -> Result<(), ClientError> {
    let resp = send_request(state, &json!({"method": "ping", "token": state.token})).await?;
    if resp.get("status").and_then(Value::as_str) == Some("ok") {
        Ok(())
    } else {
        let msg = resp
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("ping failed");
        Err(ClientError::Rpc(format!("ping failed: {msg}")))
    }
}

/// Ask the daemon to shut down.
pub async fn shutdown_daemon(state: &DaemonState) -> Result<(), ClientError> {
    send_request(state, &json!({"method": "shutdown", "token": state.token})).await?;
    Ok(())
}

/// Fetch the daemon's status payload.
pub async fn status_daemon(state: &DaemonState) -> Result<Value, ClientError> {
    send_request(state, &json!({"method": "status", "token": state.token})).await
}

/// Send an ask request, auto-starting the daemon when absent.
pub async fn ask(req: AskRequest) -> Result<AskResult, ClientError> {
    let state = match read_state(None) {
        Ok(state) => state,
        Err(_) => {
            maybe_start_daemon().await?;
            read_state(None)?
        }
    };

    let work_dir = if req.work_dir.is_empty() {
        resolve_work_dir(&req.provider)
    } else {
        req.work_dir.clone()
    };
    let timeout_s = if req.timeout_s > 0.0 { req.timeout_s } else { 120.0 };
    let req_id = protocol::make_req_id();

    let rpc_req = json!({
        "method": "request",
        "token": state.token,
        "provider": req.provider,
        "client_id": format!("cli-{}", std::process::id()),
        "work_dir": work_dir,
        "message": req.message,
        "req_id": req_id,
        "timeout_s": timeout_s,
        "quiet": req.quiet,
        "caller": req.caller,
    });

    let resp = send_request(&state, &rpc_req).await?;
    if resp.get("status").and_then(Value::as_str) == Some("error") {
        let msg = resp
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("request failed");
        return Err(ClientError::Rpc(msg.to_string()));
    }
    let result: ProviderResult =
        serde_json::from_value(resp).map_err(|e| ClientError::Protocol(e.to_string()))?;

    Ok(AskResult {
        exit_code: result.exit_code,
        reply: result.reply,
        req_id: result.req_id,
        error: result.error,
    })
}

/// Probe one provider through the daemon.
pub async fn ping(provider: &str) -> Result<(), ClientError> {
    let state = read_state(None)?;
    let resp = send_request(
        &state,
        &json!({"method": "ping", "token": state.token, "provider": provider}),
    )
    .await?;
    if resp.get("status").and_then(Value::as_str) == Some("ok") {
        Ok(())
    } else {
        let msg = resp
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("offline");
        Err(ClientError::Rpc(msg.to_string()))
    }
}

/// Retrieve the latest reply from a provider.
pub async fn pend(provider: &str) -> Result<String, ClientError> {
    let state = read_state(None)?;
    let resp = send_request(
        &state,
        &json!({"method": "pend", "token": state.token, "provider": provider}),
    )
    .await?;
    Ok(resp
        .get("reply")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string())
}

/// Start the daemon when it isn't already answering.
pub async fn maybe_start_daemon() -> Result<(), ClientError> {
    if let Ok(state) = read_state(None) {
        if ping_daemon(&state).await.is_ok() {
            return Ok(());
        }
    }
    start_daemon_detached()?;
    wait_for_daemon_ready(START_DEADLINE).await
}

/// Spawn `ccb daemon start` as a detached background process.
pub fn start_daemon_detached() -> Result<(), ClientError> {
    let exe =
        std::env::current_exe().map_err(|e| ClientError::StartFailed(e.to_string()))?;

    let mut cmd = std::process::Command::new(exe);
    cmd.args(["daemon", "start"])
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null());
    if let Ok(cwd) = std::env::current_dir() {
        cmd.current_dir(cwd);
    }
    detach(&mut cmd);

    cmd.spawn()
        .map(|_child| ())
        .map_err(|e| ClientError::StartFailed(e.to_string()))
}

#[cfg(unix)]
fn detach(_cmd: &mut std::process::Command) {
    // Nothing extra on unix: null stdio and no wait is enough.
}

#[cfg(windows)]
fn detach(cmd: &mut std::process::Command) {
    use std::os::windows::process::CommandExt;
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    const DETACHED_PROCESS: u32 = 0x0000_0008;
    cmd.creation_flags(CREATE_NO_WINDOW | DETACHED_PROCESS);
}

/// Poll until the daemon answers a ping or the deadline fires.
pub async fn wait_for_daemon_ready(deadline: Duration) -> Result<(), ClientError> {
    let give_up = tokio::time::Instant::now() + deadline;
    loop {
        if tokio::time::Instant::now() >= give_up {
            return Err(ClientError::StartFailed(
                "timeout waiting for daemon to start".to_string(),
            ));
        }
        tokio::time::sleep(START_POLL).await;
        let Ok(state) = read_state(None) else { continue };
        if ping_daemon(&state).await.is_ok() {
            return Ok(());
        }
    }
}

/// Resolve the working directory for a provider: the cwd when it carries a
/// session file, else a registry entry's recorded work dir, else the cwd.
pub fn resolve_work_dir(provider: &str) -> String {
    let cwd = std::env::current_dir()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| ".".to_string());

    if let Some(filename) = protocol::session_filename(provider) {
        let session_file = Path::new(&cwd)
            .join(crate::config::PROJECT_CONFIG_DIRNAME)
            .join(filename);
        if session_file.exists() {
            return cwd;
        }
    }

    let registry_path = crate::session::registry_path();
    let Ok(data) = std::fs::read_to_string(registry_path) else {
        return cwd;
    };
    let Ok(doc) = serde_json::from_str::<Value>(&data) else {
        return cwd;
    };
    if let Some(entries) = doc
        .get("providers")
        .and_then(|p| p.get(provider))
        .and_then(Value::as_object)
    {
        for entry in entries.values() {
            if let Some(work_dir) = entry.get("work_dir").and_then(Value::as_str) {
                if !work_dir.is_empty() {
                    return work_dir.to_string();
                }
            }
        }
    }
    cwd
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::{AdapterRegistry, ProviderAdapter, Server, ServerConfig};
    use crate::testsupport::TestTempDir;
    use std::sync::Arc;

    async fn live_daemon(tmp: &TestTempDir) -> (Server, DaemonState) {
        let registry = Arc::new(AdapterRegistry::new());
        registry.register("codex", Arc::new(ProviderAdapter::codex(None)));
        let server = Server::new(
            ServerConfig {
                state_file: tmp.child("askd.json"),
                log_file: tmp.child("askd.log"),
                ..Default::default()
            },
            registry,
        );
        server.start("127.0.0.1", 0).await.unwrap();
        let state = read_state(Some(&tmp.child("askd.json"))).unwrap();
        (server, state)
    }

    #[test]
    fn read_state_reports_missing_daemon() {
        let tmp = TestTempDir::new("client");
        let err = read_state(Some(&tmp.child("askd.json"))).unwrap_err();
        assert!(matches!(err, ClientError::NotRunning));
    }

    #[test]
    fn read_state_rejects_garbage() {
        let tmp = TestTempDir::new("client");
        let path = tmp.write_text("askd.json", "not json");
        let err = read_state(Some(&path)).unwrap_err();
        assert!(matches!(err, ClientError::InvalidState(_)));
    }

    #[tokio::test]
    async fn ping_and_status_round_trip() {
        let tmp = TestTempDir::new("client");
        let (server, state) = live_daemon(&tmp).await;

        ping_daemon(&state).await.expect("daemon must answer ping");
        let status = status_daemon(&state).await.unwrap();
        assert_eq!(status["status"], "ok");
        assert_eq!(status["providers"], serde_json::json!(["codex"]));

        server.shutdown();
        server.wait().await;
    }

    #[tokio::test]
    async fn wrong_token_surfaces_as_rpc_error() {
        let tmp = TestTempDir::new("client");
        let (server, mut state) = live_daemon(&tmp).await;
        state.token = "bogus".to_string();

        let err = ping_daemon(&state).await.unwrap_err();
        assert!(err.to_string().contains("invalid token"));

        server.shutdown();
        server.wait().await;
    }

    #[tokio::test]
    async fn shutdown_rpc_stops_the_daemon() {
        let tmp = TestTempDir::new("client");
        let (server, state) = live_daemon(&tmp).await;

        shutdown_daemon(&state).await.unwrap();
        server.wait().await;
        assert!(ping_daemon(&state).await.is_err());
    }

    #[test]
    fn resolve_work_dir_defaults_to_cwd() {
        let cwd = std::env::current_dir().unwrap();
        assert_eq!(resolve_work_dir("codex"), cwd.to_string_lossy());
    }
}
