//! CLI argument definitions for the `ccb` binary.

use clap::{Parser, Subcommand};

/// Bridge a controlling agent to interactive AI CLIs running in terminal
/// panes.
#[derive(Debug, Parser)]
#[command(
    name = "ccb",
    version = ccb::build_info::cli_version_text(),
    about = "Claude Code Bridge - multi-model AI collaboration tool",
    long_about = "Launch multiple AI providers simultaneously:\n\
        ccb codex,claude              Start codex and claude\n\
        ccb -a codex,gemini,claude    Start with auto-approve mode\n\
        ccb -r codex,claude           Resume previous sessions\n\
        ccb codex gemini              Space-separated is also supported\n\n\
        Available providers: codex, gemini, opencode, claude, droid"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage the CCB daemon.
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },
    /// Send a message to an AI provider.
    Ask {
        /// Provider name (codex, gemini, opencode, claude, droid).
        provider: String,
        /// Message text; `-` reads from stdin.
        #[arg(required = true, num_args = 1..)]
        message: Vec<String>,
        /// Timeout in seconds.
        #[arg(short = 't', long, default_value_t = 120.0)]
        timeout: f64,
        /// Suppress progress output.
        #[arg(short, long)]
        quiet: bool,
    },
    /// Test connectivity with an AI provider.
    Ping {
        /// Provider name.
        provider: String,
    },
    /// View the latest reply from an AI provider.
    Pend {
        /// Provider name.
        provider: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum DaemonAction {
    /// Start the daemon (foreground).
    Start,
    /// Stop the daemon.
    Stop,
    /// Show daemon status.
    Status,
}
