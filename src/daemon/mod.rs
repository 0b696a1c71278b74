//! The unified ask daemon: adapter registry, per-session workers, and the
//! loopback JSON-RPC server.

mod adapter;
mod registry;
mod server;
mod worker;

pub use adapter::{Adapter, ProviderAdapter, ProviderRequest, ProviderResult, QueuedTask};
pub use registry::AdapterRegistry;
pub use server::{DaemonState, Server, ServerConfig};
pub use worker::WorkerPool;

use std::sync::Arc;
use std::time::Duration;

use crate::config::{env_int, load_start_config};
use crate::session::{registry_path, PaneRegistry, REGISTRY_TTL};
use crate::terminal::detect_backend;

/// Daemon construction parameters.
#[derive(Debug, Clone, Default)]
pub struct DaemonConfig {
    pub providers: Vec<String>,
    pub idle_timeout: Duration,
    pub parent_pid: Option<u32>,
}

/// Long-lived daemon wiring: backend detection, adapter registration, server
/// lifecycle.
pub struct UnifiedDaemon {
    server: Server,
}

impl UnifiedDaemon {
    /// Build a daemon for the given providers.
    ///
    /// A missing terminal backend is tolerated; adapters then answer pings
    /// with a backend error instead of refusing to start.
    pub async fn new(cfg: DaemonConfig) -> Self {
        let backend = detect_backend().await.ok();

        // One shared pane registry: adapters resolve through it and startup
        // sheds entries past the TTL.
        let panes = Arc::new(PaneRegistry::new(registry_path()));
        if let Some(backend) = &backend {
            panes.set_backend(backend.clone());
        }
        panes.prune_stale_panes(REGISTRY_TTL);
        panes.prune_dead_panes().await;

        let registry = Arc::new(AdapterRegistry::new());
        for provider in &cfg.providers {
            let Some(adapter) = ProviderAdapter::for_provider(provider, backend.clone()) else {
                continue;
            };
            registry.register(provider, Arc::new(adapter.with_registry(panes.clone())));
        }

        let server = Server::new(
            ServerConfig {
                idle_timeout: cfg.idle_timeout,
                parent_pid: cfg.parent_pid,
                ..Default::default()
            },
            registry,
        );

        Self { server }
    }

    /// Start the daemon and block until shutdown (signal, idle, parent loss,
    /// or RPC).
    pub async fn run(&self) -> std::io::Result<()> {
        self.server.start("127.0.0.1", 0).await?;

        tokio::select! {
            _ = shutdown_signal() => {
                eprintln!("received shutdown signal, shutting down");
                self.server.shutdown();
            }
            _ = self.server.wait() => {}
        }

        self.server.wait().await;
        Ok(())
    }

    pub fn server(&self) -> &Server {
        &self.server
    }
}

/// Run a daemon with providers from the start config and tuning from the
/// environment.
pub async fn run_default() -> std::io::Result<()> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| ".".into());
    let start_cfg = load_start_config(&cwd);

    let idle_timeout =
        Duration::from_secs(env_int("CCB_ASKD_IDLE_TIMEOUT_S", 1800).max(1) as u64);

    let daemon = UnifiedDaemon::new(DaemonConfig {
        providers: start_cfg.providers_or_default(),
        idle_timeout,
        parent_pid: parent_pid(),
    })
    .await;

    daemon.run().await
}

#[cfg(unix)]
fn parent_pid() -> Option<u32> {
    let ppid = unsafe { libc::getppid() };
    (ppid > 1).then_some(ppid as u32)
}

#[cfg(windows)]
fn parent_pid() -> Option<u32> {
    // Parent tracking is best-effort on Windows; the idle monitor still
    // bounds daemon lifetime.
    None
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
