//! The ask daemon's TCP JSON-RPC server.
//!
//! Loopback only; one JSON object per direction per connection, newline
//! terminated. Every request must carry the state-file token. Lifetime is
//! bounded by an idle monitor and an optional parent-process monitor.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, watch};

use crate::daemon::adapter::{ProviderRequest, ProviderResult, QueuedTask};
use crate::daemon::registry::AdapterRegistry;
use crate::daemon::worker::WorkerPool;
use crate::lock::pid_alive;
use crate::output::atomic_write_text;
use crate::runtime::{ensure_run_dir, random_token, LogSink};

/// Idle check cadence.
const IDLE_TICK: Duration = Duration::from_secs(30);
/// Parent liveness check cadence.
const PARENT_TICK: Duration = Duration::from_secs(5);
/// Grace between the shutdown reply and the actual stop.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(100);
/// Slack added to a request's own deadline before the server gives up on the
/// worker.
const REQUEST_SLACK: Duration = Duration::from_secs(10);
/// Cap on how long one connection may take to deliver its request line.
const CONN_DEADLINE: Duration = Duration::from_secs(5 * 60);

/// Persisted daemon state: everything a client needs to connect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonState {
    pub host: String,
    pub port: u16,
    pub token: String,
    pub pid: u32,
}

/// Server construction parameters.
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub token: String,
    pub state_file: PathBuf,
    pub log_file: PathBuf,
    pub idle_timeout: Duration,
    pub parent_pid: Option<u32>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            token: String::new(),
            state_file: crate::runtime::state_file_path("askd"),
            log_file: crate::runtime::log_path("askd"),
            idle_timeout: Duration::from_secs(30 * 60),
            parent_pid: None,
        }
    }
}

struct ServerInner {
    token: String,
    registry: Arc<AdapterRegistry>,
    pool: WorkerPool,
    last_active: Mutex<Instant>,
    idle_timeout: Duration,
    state_file: PathBuf,
    log: LogSink,
    parent_pid: Option<u32>,
    shutdown_tx: watch::Sender<bool>,
    done_tx: watch::Sender<bool>,
}

/// The daemon server.
pub struct Server {
    inner: Arc<ServerInner>,
    bound_addr: Mutex<Option<std::net::SocketAddr>>,
}

impl Server {
    pub fn new(mut cfg: ServerConfig, registry: Arc<AdapterRegistry>) -> Self {
        if cfg.host.is_empty() {
            cfg.host = "127.0.0.1".to_string();
        }
        if cfg.idle_timeout.is_zero() {
            cfg.idle_timeout = Duration::from_secs(30 * 60);
        }
        if cfg.token.is_empty() {
            cfg.token = random_token();
        }

        let (shutdown_tx, _) = watch::channel(false);
        let (done_tx, _) = watch::channel(false);
        let pool_registry = registry.clone();
        let pool = WorkerPool::new(move |task: QueuedTask| {
            let registry = pool_registry.clone();
            Box::pin(async move {
                let result = match registry.get(&task.provider) {
                    Some(adapter) => adapter.send(&task.request).await,
                    None => ProviderResult {
                        exit_code: 1,
                        req_id: task.request.req_id.clone(),
                        error: format!("unknown provider: {}", task.provider),
                        ..Default::default()
                    },
                };
                let _ = task.result_tx.send(result);
            }) as std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
        });

        Self {
            inner: Arc::new(ServerInner {
                token: cfg.token,
                registry,
                pool,
                last_active: Mutex::new(Instant::now()),
                idle_timeout: cfg.idle_timeout,
                state_file: cfg.state_file,
                log: LogSink::new(cfg.log_file),
                parent_pid: cfg.parent_pid,
                shutdown_tx,
                done_tx,
            }),
            bound_addr: Mutex::new(None),
        }
    }

    /// Bind, persist state, and start the accept loop and monitors.
    pub async fn start(&self, host: &str, port: u16) -> std::io::Result<std::net::SocketAddr> {
        let listener = match TcpListener::bind((host, port)).await {
            Ok(l) => l,
            // Requested port unavailable: let the OS pick one.
            Err(_) => TcpListener::bind((host, 0)).await?,
        };
        let addr = listener.local_addr()?;
        *self.bound_addr.lock().unwrap_or_else(|e| e.into_inner()) = Some(addr);

        self.write_state(host, addr.port());
        self.inner.log.log(&format!(
            "daemon started on {host}:{} (pid={})",
            addr.port(),
            std::process::id()
        ));

        let inner = self.inner.clone();
        let mut shutdown_rx = self.inner.shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, _)) => {
                                let inner = inner.clone();
                                tokio::spawn(async move {
                                    handle_conn(inner, stream).await;
                                });
                            }
                            Err(e) => {
                                inner.log.log(&format!("accept error: {e}"));
                            }
                        }
                    }
                }
            }
            inner.done_tx.send_replace(true);
        });

        self.spawn_idle_monitor();
        self.spawn_parent_monitor();
        Ok(addr)
    }

    /// Address the server is bound to, when started.
    pub fn addr(&self) -> Option<std::net::SocketAddr> {
        *self.bound_addr.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Token clients must present.
    pub fn token(&self) -> &str {
        &self.inner.token
    }

    /// Stop the listener, drain workers, and remove the state file.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    /// Wait for the accept loop to finish. Safe to call from several
    /// waiters.
    pub async fn wait(&self) {
        let mut done_rx = self.inner.done_tx.subscribe();
        if !*done_rx.borrow() {
            let _ = done_rx.changed().await;
        }
    }

    /// True once shutdown has been requested.
    pub fn is_shutting_down(&self) -> bool {
        *self.inner.shutdown_tx.borrow()
    }

    fn write_state(&self, host: &str, port: u16) {
        let state = DaemonState {
            host: host.to_string(),
            port,
            token: self.inner.token.clone(),
            pid: std::process::id(),
        };
        let Ok(json) = serde_json::to_string_pretty(&state) else {
            return;
        };
        let _ = ensure_run_dir();
        if let Err(e) = atomic_write_text(&self.inner.state_file, &json) {
            self.inner.log.log(&format!("failed to write state file: {e}"));
        }
    }

    fn spawn_idle_monitor(&self) {
        let inner = self.inner.clone();
        let mut shutdown_rx = self.inner.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(IDLE_TICK);
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => return,
                    _ = tick.tick() => {
                        let idle = inner
                            .last_active
                            .lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .elapsed();
                        if idle > inner.idle_timeout {
                            inner.log.log(&format!(
                                "idle timeout ({:?}), shutting down",
                                inner.idle_timeout
                            ));
                            inner.shutdown();
                            return;
                        }
                    }
                }
            }
        });
    }

    fn spawn_parent_monitor(&self) {
        let Some(parent_pid) = self.inner.parent_pid else {
            return;
        };
        let inner = self.inner.clone();
        let mut shutdown_rx = self.inner.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(PARENT_TICK);
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => return,
                    _ = tick.tick() => {
                        if !pid_alive(parent_pid) {
                            inner.log.log(&format!(
                                "parent process {parent_pid} gone, shutting down"
                            ));
                            inner.shutdown();
                            return;
                        }
                    }
                }
            }
        });
    }
}

impl ServerInner {
    fn shutdown(&self) {
        if *self.shutdown_tx.borrow() {
            return;
        }
        self.log.log("shutting down...");
        self.shutdown_tx.send_replace(true);
        self.pool.shutdown();
        let _ = std::fs::remove_file(&self.state_file);
    }

    fn touch_activity(&self) {
        *self.last_active.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }
}

async fn handle_conn(inner: Arc<ServerInner>, stream: TcpStream) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let mut line = String::new();
    let read = tokio::time::timeout(CONN_DEADLINE, reader.read_line(&mut line)).await;
    if !matches!(read, Ok(Ok(_))) || line.trim().is_empty() {
        send_error(&mut write_half, "invalid request").await;
        return;
    }

    let Ok(req) = serde_json::from_str::<Value>(&line) else {
        send_error(&mut write_half, "invalid request").await;
        return;
    };

    let token = req.get("token").and_then(Value::as_str).unwrap_or_default();
    if token != inner.token {
        send_error(&mut write_half, "invalid token").await;
        return;
    }

    inner.touch_activity();

    // Aliases: a leading dot is historical; "ask" equals "request".
    let method = req
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim_start_matches('.');

    match method {
        "ping" => handle_ping(&inner, &mut write_half, &req).await,
        "shutdown" => handle_shutdown(&inner, &mut write_half).await,
        "status" => handle_status(&inner, &mut write_half).await,
        "request" | "ask" => handle_request(&inner, &mut write_half, &req).await,
        "pend" => handle_pend(&inner, &mut write_half, &req).await,
        other => {
            send_error(&mut write_half, &format!("unknown method: {other}")).await;
        }
    }
}

async fn handle_ping(
    inner: &Arc<ServerInner>,
    stream: &mut tokio::net::tcp::OwnedWriteHalf,
    req: &Value,
) {
    let provider = req
        .get("provider")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if !provider.is_empty() {
        let Some(adapter) = inner.registry.get(provider) else {
            send_json(
                stream,
                &json!({"status": "error", "error": format!("unknown provider: {provider}")}),
            )
            .await;
            return;
        };
        let session_id = req
            .get("session_id")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if let Err(e) = adapter.ping(session_id).await {
            send_json(
                stream,
                &json!({"status": "error", "error": e.to_string()}),
            )
            .await;
            return;
        }
    }
    send_json(
        stream,
        &json!({"status": "ok", "providers": inner.registry.names()}),
    )
    .await;
}

async fn handle_shutdown(inner: &Arc<ServerInner>, stream: &mut tokio::net::tcp::OwnedWriteHalf) {
    send_json(
        stream,
        &json!({"status": "ok", "message": "shutting down"}),
    )
    .await;
    let inner = inner.clone();
    tokio::spawn(async move {
        tokio::time::sleep(SHUTDOWN_GRACE).await;
        inner.shutdown();
    });
}

async fn handle_status(inner: &Arc<ServerInner>, stream: &mut tokio::net::tcp::OwnedWriteHalf) {
    send_json(
        stream,
        &json!({
            "status": "ok",
            "pid": std::process::id(),
            "providers": inner.registry.names(),
            "workers": inner.pool.active_workers(),
            "active_requests": inner.pool.active_workers(),
        }),
    )
    .await;
}

async fn handle_pend(
    inner: &Arc<ServerInner>,
    stream: &mut tokio::net::tcp::OwnedWriteHalf,
    req: &Value,
) {
    let provider = req
        .get("provider")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if provider.is_empty() {
        send_error(stream, "missing provider").await;
        return;
    }
    let Some(adapter) = inner.registry.get(provider) else {
        send_error(stream, &format!("unknown provider: {provider}")).await;
        return;
    };
    let session_id = req
        .get("session_id")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let reply = adapter.pend(session_id).await;
    send_json(stream, &json!({"status": "ok", "reply": reply})).await;
}

async fn handle_request(
    inner: &Arc<ServerInner>,
    stream: &mut tokio::net::tcp::OwnedWriteHalf,
    req: &Value,
) {
    let provider = req
        .get("provider")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if provider.is_empty() {
        send_error(stream, "missing provider").await;
        return;
    }
    if inner.registry.get(&provider).is_none() {
        send_error(stream, &format!("unknown provider: {provider}")).await;
        return;
    }

    let get_str = |key: &str| {
        req.get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let prov_req = ProviderRequest {
        client_id: get_str("client_id"),
        work_dir: get_str("work_dir"),
        message: get_str("message"),
        req_id: get_str("req_id"),
        timeout_s: req.get("timeout_s").and_then(Value::as_f64).unwrap_or(0.0),
        quiet: req.get("quiet").and_then(Value::as_bool).unwrap_or(false),
        output_path: get_str("output_path"),
        caller: get_str("caller"),
    };

    let effective_timeout = if prov_req.timeout_s > 0.0 {
        Duration::from_secs_f64(prov_req.timeout_s)
    } else {
        Duration::from_secs(120)
    } + REQUEST_SLACK;

    let req_id = prov_req.req_id.clone();
    let session_key = format!("{provider}:{}", prov_req.work_dir);
    let (result_tx, result_rx) = oneshot::channel();
    inner.pool.submit(
        &session_key,
        QueuedTask {
            provider,
            request: prov_req,
            result_tx,
        },
    );

    let result = match tokio::time::timeout(effective_timeout, result_rx).await {
        Ok(Ok(result)) => result,
        _ => ProviderResult {
            exit_code: 2,
            req_id,
            error: "timeout".to_string(),
            ..Default::default()
        },
    };

    if let Ok(payload) = serde_json::to_value(&result) {
        send_json(stream, &payload).await;
    }
}

async fn send_json(stream: &mut tokio::net::tcp::OwnedWriteHalf, value: &Value) {
    let Ok(mut data) = serde_json::to_vec(value) else {
        return;
    };
    data.push(b'\n');
    let _ = stream.write_all(&data).await;
}

async fn send_error(stream: &mut tokio::net::tcp::OwnedWriteHalf, msg: &str) {
    send_json(stream, &json!({"status": "error", "error": msg})).await;
}
