//! CLI entry point for ccb.

mod cli;

use clap::Parser;
use std::io::Read;

use ccb::client;
use ccb::daemon;
use ccb::launcher;
use ccb::output;
use ccb::protocol;

use cli::{Cli, Command, DaemonAction};

/// Subcommand names that must NOT be treated as a provider launch.
const KNOWN_SUBCOMMANDS: [&str; 5] = ["ask", "ping", "pend", "daemon", "help"];

#[tokio::main]
async fn main() {
    let raw_args: Vec<String> = std::env::args().skip(1).collect();

    // "ccb codex,claude" launches providers; "ccb daemon start" is a
    // subcommand. Decide before clap sees anything.
    if should_run_launcher(&raw_args) {
        run_launcher(&raw_args).await;
        return;
    }

    let args = expand_alias(raw_args);
    let cli = Cli::parse_from(std::iter::once("ccb".to_string()).chain(args));

    match cli.command {
        Command::Daemon { action } => run_daemon_command(action).await,
        Command::Ask {
            provider,
            message,
            timeout,
            quiet,
        } => run_ask(&provider, &message, timeout, quiet).await,
        Command::Ping { provider } => run_ping(&provider).await,
        Command::Pend { provider } => run_pend(&provider).await,
    }
}

// A provider launch is any invocation whose first positional argument is not
// a known subcommand (or alias).
fn should_run_launcher(args: &[String]) -> bool {
    for arg in args {
        if matches!(arg.as_str(), "--help" | "-h" | "--version" | "-V") {
            return false;
        }
        if arg.starts_with('-') {
            continue;
        }
        return !KNOWN_SUBCOMMANDS.contains(&arg.as_str()) && alias_target(arg).is_none();
    }
    false
}

// Provider-pinned aliases expand to their canonical subcommand before clap
// parses: `cask <msg>` == `ask codex <msg>`, `cping` == `ping codex`, ...
fn alias_target(name: &str) -> Option<(&'static str, &'static str)> {
    let (prefix, command) = if let Some(p) = name.strip_suffix("ping") {
        (format!("{p}ask"), "ping")
    } else if let Some(p) = name.strip_suffix("pend") {
        (format!("{p}ask"), "pend")
    } else {
        (name.to_string(), "ask")
    };
    let provider = protocol::prefix_to_provider(&prefix)?;
    Some((command, provider))
}

fn expand_alias(args: Vec<String>) -> Vec<String> {
    let Some(first) = args.first() else {
        return args;
    };
    let Some((command, provider)) = alias_target(first) else {
        return args;
    };
    let mut expanded = vec![command.to_string(), provider.to_string()];
    expanded.extend(args.into_iter().skip(1));
    expanded
}

async fn run_launcher(args: &[String]) {
    let mut auto = false;
    let mut resume = false;
    let mut provider_args = Vec::new();

    for arg in args {
        match arg.as_str() {
            "-a" | "--auto" => auto = true,
            "-r" | "--resume" => resume = true,
            other if other.starts_with('-') => {
                eprintln!("unknown flag: {other}");
                std::process::exit(1);
            }
            other => provider_args.push(other.to_string()),
        }
    }

    if provider_args.is_empty() {
        eprintln!("no providers specified. Available: codex, gemini, opencode, claude, droid");
        std::process::exit(1);
    }

    let providers = launcher::parse_providers(&provider_args);
    if providers.is_empty() {
        eprintln!(
            "no valid providers specified. Available: codex, gemini, opencode, claude, droid"
        );
        std::process::exit(1);
    }

    let work_dir = std::env::current_dir()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();

    let total = providers.len();
    let results = match launcher::launch(launcher::LaunchConfig {
        providers,
        auto,
        resume,
        work_dir,
    })
    .await
    {
        Ok(results) => results,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let ok = results.iter().filter(|r| r.error.is_none()).count();
    if ok == 0 {
        eprintln!("failed to start any provider");
        std::process::exit(1);
    }

    print!("\n{ok}/{total} providers started");
    if resume {
        print!(" (resume mode)");
    }
    if auto {
        print!(" (auto-approve mode)");
    }
    println!();
}

async fn run_daemon_command(action: DaemonAction) {
    match action {
        DaemonAction::Start => {
            if let Err(e) = daemon::run_default().await {
                eprintln!("error: {e}");
                std::process::exit(1);
            }
        }
        DaemonAction::Stop => {
            let Ok(state) = client::read_state(None) else {
                eprintln!("daemon not running");
                std::process::exit(1);
            };
            if let Err(e) = client::shutdown_daemon(&state).await {
                eprintln!("error: {e}");
                std::process::exit(1);
            }
            println!("Daemon stopped");
        }
        DaemonAction::Status => {
            let Ok(state) = client::read_state(None) else {
                eprintln!("daemon not running");
                std::process::exit(1);
            };
            let status = match client::status_daemon(&state).await {
                Ok(status) => status,
                Err(e) => {
                    eprintln!("error: {e}");
                    std::process::exit(1);
                }
            };
            println!("PID:       {}", state.pid);
            println!("Address:   {}:{}", state.host, state.port);
            if let Some(providers) = status.get("providers").and_then(|v| v.as_array()) {
                let names: Vec<&str> = providers.iter().filter_map(|p| p.as_str()).collect();
                println!("Providers: {}", names.join(", "));
            }
            if let Some(workers) = status.get("workers").and_then(|v| v.as_u64()) {
                println!("Workers:   {workers}");
            }
        }
    }
}

async fn run_ask(provider: &str, message_parts: &[String], timeout: f64, quiet: bool) {
    let mut message = output::normalize_message_parts(message_parts);
    if message == "-" {
        let mut data = Vec::new();
        if std::io::stdin().read_to_end(&mut data).is_err() {
            eprintln!("failed to read stdin");
            std::process::exit(output::EXIT_ERROR);
        }
        message = output::decode_stdin_bytes(&data);
    }

    let result = match client::ask(client::AskRequest {
        provider: provider.to_string(),
        message,
        timeout_s: timeout,
        quiet,
        ..Default::default()
    })
    .await
    {
        Ok(result) => result,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(output::EXIT_ERROR);
        }
    };

    if !result.error.is_empty() && result.exit_code != 0 {
        output::errorf(&result.error);
    }
    if !result.reply.is_empty() {
        println!("{}", result.reply);
    }
    std::process::exit(result.exit_code);
}

async fn run_ping(provider: &str) {
    match client::ping(provider).await {
        Ok(()) => println!("{provider}: online"),
        Err(e) => {
            println!("{provider}: offline ({e})");
            std::process::exit(1);
        }
    }
}

async fn run_pend(provider: &str) {
    let reply = match client::pend(provider).await {
        Ok(reply) => reply,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(output::EXIT_ERROR);
        }
    };
    if reply.is_empty() {
        println!("(no reply)");
        std::process::exit(output::EXIT_NO_REPLY);
    }
    println!("{}", protocol::strip_trailing_markers(&reply));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(items: &[&str]) -> Vec<String> {
        items.iter().map(|i| i.to_string()).collect()
    }

    #[test]
    fn provider_lists_trigger_the_launcher() {
        assert!(should_run_launcher(&s(&["codex,claude"])));
        assert!(should_run_launcher(&s(&["-a", "codex"])));
        assert!(!should_run_launcher(&s(&["daemon", "start"])));
        assert!(!should_run_launcher(&s(&["ask", "codex", "hi"])));
        assert!(!should_run_launcher(&s(&["cask", "hi"])));
        assert!(!should_run_launcher(&s(&["--version"])));
        assert!(!should_run_launcher(&s(&[])));
    }

    #[test]
    fn aliases_expand_to_canonical_subcommands() {
        assert_eq!(
            expand_alias(s(&["cask", "what", "is", "6*7"])),
            s(&["ask", "codex", "what", "is", "6*7"])
        );
        assert_eq!(expand_alias(s(&["gping"])), s(&["ping", "gemini"]));
        assert_eq!(expand_alias(s(&["lpend"])), s(&["pend", "claude"]));
        assert_eq!(expand_alias(s(&["opend"])), s(&["pend", "opencode"]));
        assert_eq!(expand_alias(s(&["dask", "go"])), s(&["ask", "droid", "go"]));
        // Non-aliases pass through untouched.
        assert_eq!(expand_alias(s(&["ask", "codex", "hi"])), s(&["ask", "codex", "hi"]));
    }
}
