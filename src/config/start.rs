//! Launch configuration (`ccb.config`) parsing.
//!
//! The file accepts either a whitespace/comma-separated provider token list
//! with `//` and `#` comments, or a JSON object `{providers: [...], cmd: bool}`.

use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use crate::protocol::is_valid_provider;
use crate::runtime::home_dir;

use super::session::PROJECT_CONFIG_DIRNAME;

/// Project/global start-config filename.
pub const CONFIG_FILENAME: &str = "ccb.config";

/// Providers launched when no config names any.
pub const DEFAULT_PROVIDERS: [&str; 4] = ["codex", "gemini", "opencode", "claude"];

static JSON_SYNTAX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[\[\]{}"']"#).expect("invalid syntax regex"));
static TOKEN_SPLIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[,\s]+").expect("invalid split regex"));

/// Parsed start configuration.
#[derive(Debug, Clone, Default)]
pub struct StartConfig {
    /// Ordered, deduplicated provider names.
    pub providers: Vec<String>,
    /// Whether shell-command mode was requested via the `cmd` token.
    pub cmd: bool,
    /// Which file supplied the config, when one was found.
    pub path: Option<PathBuf>,
}

impl StartConfig {
    /// Configured providers, or the defaults when the config names none.
    pub fn providers_or_default(&self) -> Vec<String> {
        if self.providers.is_empty() {
            DEFAULT_PROVIDERS.iter().map(|s| s.to_string()).collect()
        } else {
            self.providers.clone()
        }
    }
}

// Extract provider tokens from a raw config string, dropping comments and
// JSON punctuation.
fn parse_tokens(raw: &str) -> Vec<String> {
    if raw.is_empty() {
        return Vec::new();
    }
    let without_comments: Vec<String> = raw
        .lines()
        .map(|line| {
            let line = line.split("//").next().unwrap_or("");
            line.split('#').next().unwrap_or("").to_string()
        })
        .collect();
    let joined = without_comments.join(" ");
    let cleaned = JSON_SYNTAX_RE.replace_all(&joined, " ");
    TOKEN_SPLIT_RE
        .split(&cleaned)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

// Filter and deduplicate provider tokens; a `cmd` token flips the shell-mode
// flag instead of naming a provider.
fn normalize_providers(tokens: &[String]) -> (Vec<String>, bool) {
    let mut providers = Vec::new();
    let mut seen = HashSet::new();
    let mut cmd = false;

    for raw in tokens {
        let token = raw.trim().to_ascii_lowercase();
        if token.is_empty() {
            continue;
        }
        if token == "cmd" {
            cmd = true;
            continue;
        }
        if !is_valid_provider(&token) {
            continue;
        }
        if seen.insert(token.clone()) {
            providers.push(token);
        }
    }
    (providers, cmd)
}

fn parse_config_value(value: &Value) -> (Vec<String>, bool) {
    match value {
        Value::Object(map) => {
            let mut tokens = Vec::new();
            match map.get("providers") {
                Some(Value::String(s)) => tokens = parse_tokens(s),
                Some(Value::Array(items)) => {
                    tokens = items
                        .iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect();
                }
                _ => {}
            }
            let (providers, cmd_token) = normalize_providers(&tokens);
            let cmd = map.get("cmd").and_then(Value::as_bool).unwrap_or(cmd_token);
            (providers, cmd)
        }
        Value::Array(items) => {
            let tokens: Vec<String> = items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect();
            normalize_providers(&tokens)
        }
        Value::String(s) => normalize_providers(&parse_tokens(s)),
        _ => (Vec::new(), false),
    }
}

fn read_config(path: &Path) -> (Vec<String>, bool) {
    let Ok(raw) = fs::read_to_string(path) else {
        return (Vec::new(), false);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return (Vec::new(), false);
    }

    if let Ok(value) = serde_json::from_str::<Value>(raw) {
        return parse_config_value(&value);
    }

    normalize_providers(&parse_tokens(raw))
}

fn config_paths(work_dir: &Path) -> (PathBuf, PathBuf) {
    let project = work_dir.join(PROJECT_CONFIG_DIRNAME).join(CONFIG_FILENAME);
    let global = home_dir().join(".ccb").join(CONFIG_FILENAME);
    (project, global)
}

/// Load the start configuration for a work directory.
///
/// Project config wins over the global `~/.ccb/ccb.config`; a missing config
/// yields an empty `StartConfig` whose `providers_or_default()` falls back.
pub fn load_start_config(work_dir: &Path) -> StartConfig {
    let (project, global) = config_paths(work_dir);
    for path in [project, global] {
        if path.exists() {
            let (providers, cmd) = read_config(&path);
            return StartConfig {
                providers,
                cmd,
                path: Some(path),
            };
        }
    }
    StartConfig::default()
}

/// Write a default project config when none exists.
///
/// Returns the config path and whether it was created by this call.
pub fn ensure_default_start_config(work_dir: &Path) -> Option<(PathBuf, bool)> {
    let (project, _) = config_paths(work_dir);
    if project.exists() {
        return Some((project, false));
    }
    let dir = project.parent()?;
    fs::create_dir_all(dir).ok()?;
    let payload = format!("{}\n", DEFAULT_PROVIDERS.join(","));
    fs::write(&project, payload).ok()?;
    Some((project, true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testsupport::TestTempDir;

    #[test]
    fn token_list_with_comments_parses() {
        let tmp = TestTempDir::new("startcfg");
        tmp.write_text(
            ".ccb_config/ccb.config",
            "codex, gemini // primary pair\n# disabled: droid\nclaude\n",
        );
        let cfg = load_start_config(tmp.path());
        assert_eq!(cfg.providers, vec!["codex", "gemini", "claude"]);
        assert!(!cfg.cmd);
    }

    #[test]
    fn json_object_form_parses() {
        let tmp = TestTempDir::new("startcfg");
        tmp.write_text(
            ".ccb_config/ccb.config",
            r#"{"providers": ["claude", "droid"], "cmd": true}"#,
        );
        let cfg = load_start_config(tmp.path());
        assert_eq!(cfg.providers, vec!["claude", "droid"]);
        assert!(cfg.cmd);
    }

    #[test]
    fn json_array_form_parses() {
        let tmp = TestTempDir::new("startcfg");
        tmp.write_text(".ccb_config/ccb.config", r#"["opencode", "cmd"]"#);
        let cfg = load_start_config(tmp.path());
        assert_eq!(cfg.providers, vec!["opencode"]);
        assert!(cfg.cmd);
    }

    #[test]
    fn unknown_tokens_are_dropped_and_dupes_collapse() {
        let tokens = vec![
            "codex".to_string(),
            "CODEX".to_string(),
            "mystery".to_string(),
            "cmd".to_string(),
        ];
        let (providers, cmd) = normalize_providers(&tokens);
        assert_eq!(providers, vec!["codex"]);
        assert!(cmd);
    }

    #[test]
    fn missing_config_falls_back_to_defaults() {
        let tmp = TestTempDir::new("startcfg");
        let cfg = load_start_config(tmp.path());
        assert!(cfg.providers.is_empty());
        assert!(cfg.path.is_none());
        assert_eq!(cfg.providers_or_default(), DEFAULT_PROVIDERS.to_vec());
    }

    #[test]
    fn ensure_default_writes_once() {
        let tmp = TestTempDir::new("startcfg");
        let (path, created) = ensure_default_start_config(tmp.path()).unwrap();
        assert!(created);
        let (again, created_again) = ensure_default_start_config(tmp.path()).unwrap();
        assert_eq!(path, again);
        assert!(!created_again);
        let cfg = load_start_config(tmp.path());
        assert_eq!(cfg.providers, DEFAULT_PROVIDERS.to_vec());
    }
}
