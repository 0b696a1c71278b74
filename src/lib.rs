//! CCB — bridge a controlling agent to interactive AI CLIs in terminal panes.
//!
//! The bridge gives an agent a uniform asynchronous request/response
//! interface over heterogeneous provider CLIs whose only input surface is a
//! TTY and whose only output surface is an append-only session log. A
//! long-lived loopback daemon serializes requests per (provider, project),
//! injects marker-wrapped prompts into panes, and extracts exactly the right
//! reply from each provider's own log format.
//!
//! # Quick start
//!
//! ```no_run
//! use ccb::client::{ask, AskRequest};
//!
//! # async fn example() {
//! let result = ask(AskRequest {
//!     provider: "codex".into(),
//!     message: "what is 6*7".into(),
//!     ..Default::default()
//! })
//! .await
//! .unwrap();
//! println!("{}", result.reply);
//! # }
//! ```

/// Compile-time build/version metadata.
pub mod build_info;
/// Daemon client: state discovery, RPCs, detached auto-start.
pub mod client;
/// Provider communication: log tailers and reply parsers.
pub mod comm;
/// Environment helpers, project identity, start config, session files.
pub mod config;
/// The unified ask daemon: server, workers, adapters.
pub mod daemon;
/// Error types used across crate modules.
pub mod error;
/// Multi-provider pane launch and registration.
pub mod launcher;
/// Per-provider, per-directory request-cycle locking.
pub mod lock;
/// CLI output conventions, atomic writes, stdin decoding.
pub mod output;
/// Request markers and provider name tables.
pub mod protocol;
/// Runtime directory, daemon state/log paths, log sink.
pub mod runtime;
/// Pane registry, session resolver, session loaders.
pub mod session;
/// Terminal backends (tmux, WezTerm, PowerShell).
pub mod terminal;
#[cfg(test)]
/// Shared testing utilities compiled only for tests.
pub mod testsupport;
/// Shared text formatting helpers.
pub mod textutil;
