//! Multi-provider launch: start each provider CLI in a terminal pane and
//! register the pane so ask commands can find it.

use crossterm::style::Stylize;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

use crate::config::{compute_project_id, ensure_session_dir};
use crate::error::BackendError;
use crate::protocol::{is_valid_provider, session_filename};
use crate::session::{registry_path, PaneEntry, PaneRegistry};
use crate::terminal::{detect_backend, Backend};

/// Auto-approve behavior for one provider.
struct ProviderAutoSpec {
    /// Extra CLI flags added in auto mode.
    cli_flags: &'static [&'static str],
    /// Optional config-file write for auto mode.
    config_fn: Option<fn() -> std::io::Result<()>>,
}

fn auto_spec(provider: &str) -> ProviderAutoSpec {
    match provider {
        "codex" => ProviderAutoSpec {
            cli_flags: &[
                "-c",
                "trust_level=\"trusted\"",
                "-c",
                "approval_policy=\"never\"",
                "-c",
                "sandbox_mode=\"danger-full-access\"",
            ],
            config_fn: Some(ensure_codex_auto_approval),
        },
        "gemini" => ProviderAutoSpec {
            cli_flags: &["--yolo"],
            config_fn: None,
        },
        "claude" => ProviderAutoSpec {
            cli_flags: &["--dangerously-skip-permissions"],
            config_fn: None,
        },
        "opencode" => ProviderAutoSpec {
            cli_flags: &[],
            config_fn: Some(ensure_opencode_auto_config),
        },
        // Droid has no known auto-approve mechanism.
        _ => ProviderAutoSpec {
            cli_flags: &[],
            config_fn: None,
        },
    }
}

/// Configuration for one multi-provider launch.
#[derive(Debug, Clone, Default)]
pub struct LaunchConfig {
    pub providers: Vec<String>,
    /// Auto-approve mode (`-a`).
    pub auto: bool,
    /// Resume previous sessions (`-r`).
    pub resume: bool,
    pub work_dir: String,
}

/// Outcome of one provider launch.
#[derive(Debug)]
pub struct LaunchResult {
    pub provider: String,
    pub pane_id: String,
    pub command: String,
    pub error: Option<String>,
}

/// Split comma/space-separated provider tokens, dropping duplicates and
/// unknown names (with a warning).
pub fn parse_providers(args: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut result = Vec::new();
    for arg in args {
        for part in arg.split(',') {
            let p = part.trim().to_ascii_lowercase();
            if p.is_empty() || seen.contains(&p) {
                continue;
            }
            if !is_valid_provider(&p) {
                eprintln!("warning: unknown provider {p:?}, skipping");
                continue;
            }
            seen.insert(p.clone());
            result.push(p);
        }
    }
    result
}

/// Build the CLI start command for a provider, honoring auto/resume modes.
pub fn build_start_command(provider: &str, auto: bool, resume: bool) -> Option<String> {
    if !is_valid_provider(provider) {
        return None;
    }

    if auto {
        if let Some(config_fn) = auto_spec(provider).config_fn {
            if let Err(e) = config_fn() {
                eprintln!("warning: auto-config for {provider} failed: {e}");
            }
        }
    }

    let mut parts: Vec<String> = vec![provider.to_string()];
    match provider {
        "codex" => {
            if resume {
                parts.extend(["resume".into(), "--last".into()]);
            }
            parts.extend(["-c".into(), "disable_paste_burst=true".into()]);
        }
        "claude" if resume => parts.push("--continue".into()),
        "gemini" if resume => parts.extend(["--resume".into(), "latest".into()]),
        "opencode" if resume => parts.push("--continue".into()),
        "droid" if resume => parts.push("-r".into()),
        _ => {}
    }

    if auto {
        parts.extend(auto_spec(provider).cli_flags.iter().map(|f| f.to_string()));
    }

    Some(parts.join(" "))
}

/// Launch providers in terminal panes.
///
/// The first provider fills the current pane; each subsequent one splits
/// horizontally from it (falling back to a new tab). Every started pane is
/// registered in the session file and the pane registry.
pub async fn launch(mut cfg: LaunchConfig) -> Result<Vec<LaunchResult>, BackendError> {
    if cfg.work_dir.is_empty() {
        cfg.work_dir = std::env::current_dir()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
    }
    if cfg.providers.is_empty() {
        cfg.providers = crate::config::load_start_config(Path::new(&cfg.work_dir))
            .providers_or_default();
    }
    if cfg.providers.is_empty() {
        return Err(BackendError::CommandFailed("no providers specified".into()));
    }

    let backend = detect_backend().await?;
    launch_with_backend(cfg, backend).await
}

async fn launch_with_backend(
    cfg: LaunchConfig,
    backend: Arc<dyn Backend>,
) -> Result<Vec<LaunchResult>, BackendError> {
    let mut results = Vec::new();
    let current_pane = resolve_current_pane_id(backend.as_ref()).await;

    for (i, provider) in cfg.providers.iter().enumerate() {
        let Some(cmd) = build_start_command(provider, cfg.auto, cfg.resume) else {
            results.push(LaunchResult {
                provider: provider.clone(),
                pane_id: String::new(),
                command: String::new(),
                error: Some(format!("no CLI start command for {provider}")),
            });
            continue;
        };
        if cfg.resume {
            println!("  Resuming {provider} session...");
        }

        let pane_id = if i == 0 {
            println!("Starting {} in current pane...", provider.as_str().bold());
            if cfg.auto {
                println!("  [auto-approve mode enabled]");
            }
            match backend.send_keys(&current_pane, &cmd).await {
                Ok(()) => current_pane.clone(),
                Err(e) => {
                    println!("Failed to start {provider}: {e}");
                    results.push(LaunchResult {
                        provider: provider.clone(),
                        pane_id: String::new(),
                        command: cmd,
                        error: Some(e.to_string()),
                    });
                    continue;
                }
            }
        } else {
            let split = match backend.split_window(&current_pane, &cmd).await {
                Ok(id) => Ok(id),
                Err(_) => {
                    println!("  split failed, trying new tab for {provider}...");
                    try_spawn_window(backend.as_ref(), &cmd).await
                }
            };
            match split {
                Ok(id) => {
                    if cfg.auto {
                        println!("  [auto-approve mode enabled]");
                    }
                    let _ = backend
                        .set_pane_title(&id, &format!("ccb-{provider}"))
                        .await;
                    id
                }
                Err(e) => {
                    println!("Failed to start {provider}: {e}");
                    results.push(LaunchResult {
                        provider: provider.clone(),
                        pane_id: String::new(),
                        command: cmd,
                        error: Some(e.to_string()),
                    });
                    continue;
                }
            }
        };

        println!("Started {} in pane {}", provider.as_str().green(), pane_id);
        register_session(provider, &pane_id, &cfg.work_dir, backend.name());
        results.push(LaunchResult {
            provider: provider.clone(),
            pane_id,
            command: cmd,
            error: None,
        });
    }

    Ok(results)
}

/// Record a started pane in the session file and the pane registry.
pub fn register_session(provider: &str, pane_id: &str, work_dir: &str, terminal: &str) {
    if pane_id.is_empty() {
        return;
    }

    let Some(filename) = session_filename(provider) else {
        return;
    };

    if let Ok(session_dir) = ensure_session_dir(Path::new(work_dir)) {
        let session_file = session_dir.join(filename);
        write_session_file(&session_file, pane_id, work_dir, terminal);
    }

    let registry = PaneRegistry::new(registry_path());
    registry.upsert(
        provider,
        &compute_project_id(work_dir),
        PaneEntry {
            pane_id: pane_id.to_string(),
            work_dir: work_dir.to_string(),
            terminal: terminal.to_string(),
            ..Default::default()
        },
    );
}

// Write (or update) a JSON session file. An existing JSON document keeps its
// extra fields; only pane_id/active/work_dir are refreshed.
fn write_session_file(session_file: &Path, pane_id: &str, work_dir: &str, terminal: &str) {
    if let Ok(data) = std::fs::read_to_string(session_file) {
        if let Ok(mut existing) =
            serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(&data)
        {
            existing.insert("pane_id".into(), json!(pane_id));
            existing.insert("active".into(), json!(true));
            if !work_dir.is_empty() {
                existing.insert("work_dir".into(), json!(work_dir));
            }
            if let Ok(out) = serde_json::to_string_pretty(&existing) {
                let _ = crate::config::safe_write_session(session_file, &out);
            }
            return;
        }
    }

    let session = json!({
        "pane_id": pane_id,
        "terminal": terminal,
        "work_dir": work_dir,
        "active": true,
        "ccb_project_id": compute_project_id(work_dir),
    });
    if let Ok(out) = serde_json::to_string_pretty(&session) {
        let _ = crate::config::safe_write_session(session_file, &out);
    }
}

/// Current pane from the environment, falling back to the backend's active
/// pane.
pub async fn resolve_current_pane_id(backend: &dyn Backend) -> String {
    for name in ["WEZTERM_PANE", "TMUX_PANE"] {
        if let Ok(pane) = std::env::var(name) {
            if !pane.trim().is_empty() {
                return pane.trim().to_string();
            }
        }
    }
    if let Ok(panes) = backend.list_panes().await {
        if let Some(active) = panes.iter().find(|p| p.active) {
            return active.id.clone();
        }
        if let Some(first) = panes.first() {
            return first.id.clone();
        }
    }
    String::new()
}

// New tab/window fallback when a split fails.
async fn try_spawn_window(backend: &dyn Backend, cmd: &str) -> Result<String, BackendError> {
    if backend.name() == "wezterm" {
        let wez = crate::terminal::WeztermBackend::new();
        return wez.spawn(cmd).await;
    }
    backend.split_window("", cmd).await
}

// Codex reads ~/.codex/config.toml; write the trusted/never/full-access trio
// once.
fn ensure_codex_auto_approval() -> std::io::Result<()> {
    let config_dir = crate::runtime::home_dir().join(".codex");
    let config_file = config_dir.join("config.toml");

    if let Ok(content) = std::fs::read_to_string(&config_file) {
        if content.contains("approval_policy = \"never\"")
            && content.contains("sandbox_mode = \"danger-full-access\"")
        {
            return Ok(());
        }
    }

    std::fs::create_dir_all(&config_dir)?;
    let payload = "# CCB auto-approve configuration\n\
                   trust_level = \"trusted\"\n\
                   approval_policy = \"never\"\n\
                   sandbox_mode = \"danger-full-access\"\n";
    std::fs::write(&config_file, payload)
}

// OpenCode reads ~/.config/opencode/config.json.
fn ensure_opencode_auto_config() -> std::io::Result<()> {
    let config_dir = crate::runtime::home_dir().join(".config").join("opencode");
    let config_file = config_dir.join("config.json");

    if let Ok(content) = std::fs::read_to_string(&config_file) {
        if let Ok(mut doc) =
            serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(&content)
        {
            if doc.get("autoApprove").and_then(serde_json::Value::as_bool) == Some(true) {
                return Ok(());
            }
            doc.insert("autoApprove".into(), json!(true));
            std::fs::create_dir_all(&config_dir)?;
            return std::fs::write(&config_file, serde_json::to_string_pretty(&doc)?);
        }
    }

    std::fs::create_dir_all(&config_dir)?;
    std::fs::write(
        &config_file,
        serde_json::to_string_pretty(&json!({"autoApprove": true}))?,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_tokens_split_dedupe_and_validate() {
        let args = vec!["codex,claude".to_string(), "codex".to_string(), "gemini".to_string()];
        assert_eq!(parse_providers(&args), vec!["codex", "claude", "gemini"]);

        let args = vec!["mystery,droid".to_string()];
        assert_eq!(parse_providers(&args), vec!["droid"]);
    }

    #[test]
    fn start_commands_carry_resume_flags() {
        assert_eq!(
            build_start_command("claude", false, true).unwrap(),
            "claude --continue"
        );
        assert_eq!(
            build_start_command("gemini", false, true).unwrap(),
            "gemini --resume latest"
        );
        assert_eq!(build_start_command("droid", false, true).unwrap(), "droid -r");
        let codex = build_start_command("codex", false, true).unwrap();
        assert!(codex.starts_with("codex resume --last"));
        assert!(codex.contains("disable_paste_burst=true"));
    }

    #[test]
    fn auto_mode_appends_approval_flags() {
        let gemini = build_start_command("gemini", true, false).unwrap();
        assert!(gemini.ends_with("--yolo"));
        let claude = build_start_command("claude", true, false).unwrap();
        assert!(claude.ends_with("--dangerously-skip-permissions"));
    }

    #[test]
    fn unknown_provider_has_no_command() {
        assert!(build_start_command("mystery", false, false).is_none());
    }

    #[test]
    fn session_file_update_preserves_existing_fields() {
        let tmp = crate::testsupport::TestTempDir::new("launcher");
        let path = tmp.write_text(
            ".ccb_config/.codex-session",
            r#"{"pane_id": "%old", "custom": "kept", "active": false}"#,
        );
        write_session_file(&path, "%new", "/w", "tmux");

        let doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc["pane_id"], "%new");
        assert_eq!(doc["custom"], "kept");
        assert_eq!(doc["active"], true);
        assert_eq!(doc["work_dir"], "/w");
    }

    #[test]
    fn fresh_session_file_is_full_json() {
        let tmp = crate::testsupport::TestTempDir::new("launcher");
        std::fs::create_dir_all(tmp.child(".ccb_config")).unwrap();
        let path = tmp.child(".ccb_config/.gemini-session");
        write_session_file(&path, "%7", "/work", "wezterm");

        let doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc["pane_id"], "%7");
        assert_eq!(doc["terminal"], "wezterm");
        assert_eq!(doc["ccb_project_id"].as_str().unwrap().len(), 64);
    }
}
