//! Claude session resolution: a six-stage fallback chain from environment to
//! filesystem scan.

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{
    compute_project_id, find_project_session_file, parse_session_pane, read_session_file,
};
use crate::terminal::Backend;

use super::registry::PaneRegistry;

/// Which stage produced a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveSource {
    Env,
    RegistryProject,
    RegistryUnfiltered,
    SessionFile,
    RegistryPane,
    Fallback,
}

impl ResolveSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Env => "env",
            Self::RegistryProject => "registry_project",
            Self::RegistryUnfiltered => "registry_unfiltered",
            Self::SessionFile => "session_file",
            Self::RegistryPane => "registry_pane",
            Self::Fallback => "fallback",
        }
    }
}

/// Result of session resolution.
#[derive(Debug, Clone)]
pub struct ResolvedSession {
    pub session_id: String,
    pub project_key: String,
    pub log_file: String,
    pub pane_id: String,
    pub source: ResolveSource,
}

/// Resolves the active Claude session for a work directory.
///
/// Stages, strictly ordered, first success wins:
/// 1. `CCB_SESSION_ID` environment variable
/// 2. registry by project ID (pane must be alive)
/// 3. registry unfiltered (most recently updated alive entry)
/// 4. `.claude-session` file in the project directory
/// 5. registry by the current pane (`TMUX_PANE`/`WEZTERM_PANE`)
/// 6. filesystem scan of `~/.claude/projects`
pub struct SessionResolver {
    registry: Option<Arc<PaneRegistry>>,
    backend: Option<Arc<dyn Backend>>,
    /// Claude projects root; overridable for tests.
    projects_dir: PathBuf,
    /// Env lookup seam; production uses the process environment.
    env: Box<dyn Fn(&str) -> Option<String> + Send + Sync>,
}

impl SessionResolver {
    pub fn new(registry: Option<Arc<PaneRegistry>>, backend: Option<Arc<dyn Backend>>) -> Self {
        Self {
            registry,
            backend,
            projects_dir: crate::comm::claude_projects_dir(),
            env: Box::new(|name| std::env::var(name).ok()),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_projects_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.projects_dir = dir.into();
        self
    }

    #[cfg(test)]
    pub(crate) fn with_env<F>(mut self, env: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env = Box::new(env);
        self
    }

    fn env_var(&self, name: &str) -> Option<String> {
        (self.env)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    /// Resolve the active Claude session for a work directory.
    pub async fn resolve(&self, work_dir: &str) -> Option<ResolvedSession> {
        if let Some(result) = self.resolve_from_env() {
            return Some(result);
        }

        let project_id = compute_project_id(work_dir);

        if let Some(result) = self.resolve_from_registry_by_project(&project_id).await {
            return Some(result);
        }
        if let Some(result) = self.resolve_from_registry_unfiltered().await {
            return Some(result);
        }
        if let Some(result) = self.resolve_from_session_file(work_dir) {
            return Some(result);
        }
        if let Some(result) = self.resolve_from_registry_by_pane() {
            return Some(result);
        }
        self.resolve_best_fallback(work_dir)
    }

    // Stage 1: CCB_SESSION_ID, enriched from the registry when it indexes an
    // entry.
    fn resolve_from_env(&self) -> Option<ResolvedSession> {
        let session_id = self.env_var("CCB_SESSION_ID")?;

        if let Some(registry) = &self.registry {
            if let Some((provider, entry)) = registry.get_by_session_id(&session_id) {
                return Some(ResolvedSession {
                    session_id,
                    project_key: provider,
                    pane_id: entry.pane_id,
                    log_file: entry.session_path,
                    source: ResolveSource::Env,
                });
            }
        }

        Some(ResolvedSession {
            session_id,
            project_key: String::new(),
            log_file: String::new(),
            pane_id: String::new(),
            source: ResolveSource::Env,
        })
    }

    // Stage 2: registry keyed by this project's ID; the pane must be alive.
    async fn resolve_from_registry_by_project(&self, project_id: &str) -> Option<ResolvedSession> {
        let registry = self.registry.as_ref()?;
        let entry = registry.get_entry("claude", project_id)?;
        if entry.pane_id.is_empty() {
            return None;
        }
        if let Some(backend) = &self.backend {
            if !backend.is_alive(&entry.pane_id).await {
                return None;
            }
        }
        Some(ResolvedSession {
            session_id: entry.session_id,
            project_key: project_id.to_string(),
            pane_id: entry.pane_id,
            log_file: entry.session_path,
            source: ResolveSource::RegistryProject,
        })
    }

    // Stage 3: any Claude entry; the alive one with the greatest updated_at.
    async fn resolve_from_registry_unfiltered(&self) -> Option<ResolvedSession> {
        let registry = self.registry.as_ref()?;
        let entries = registry.get_by_provider("claude");
        if entries.is_empty() {
            return None;
        }

        let mut best: Option<(String, super::registry::PaneEntry)> = None;
        for (key, entry) in entries {
            if entry.pane_id.is_empty() {
                continue;
            }
            if let Some(backend) = &self.backend {
                if !backend.is_alive(&entry.pane_id).await {
                    continue;
                }
            }
            if best
                .as_ref()
                .map_or(true, |(_, b)| entry.updated_at > b.updated_at)
            {
                best = Some((key, entry));
            }
        }

        let (key, entry) = best?;
        Some(ResolvedSession {
            session_id: entry.session_id,
            project_key: key,
            pane_id: entry.pane_id,
            log_file: entry.session_path,
            source: ResolveSource::RegistryUnfiltered,
        })
    }

    // Stage 4: the per-project session file holds a pane hint.
    fn resolve_from_session_file(&self, work_dir: &str) -> Option<ResolvedSession> {
        let session_file =
            find_project_session_file(std::path::Path::new(work_dir), ".claude-session")?;
        let content = read_session_file(&session_file);
        let pane_id = parse_session_pane(&content)?;

        Some(ResolvedSession {
            session_id: String::new(),
            project_key: String::new(),
            log_file: String::new(),
            pane_id,
            source: ResolveSource::SessionFile,
        })
    }

    // Stage 5: whichever pane this process is running in, via the registry's
    // claude_pane index.
    fn resolve_from_registry_by_pane(&self) -> Option<ResolvedSession> {
        let registry = self.registry.as_ref()?;
        let current_pane = self
            .env_var("TMUX_PANE")
            .or_else(|| self.env_var("WEZTERM_PANE"))?;

        let (provider, entry) = registry.get_by_claude_pane(&current_pane)?;
        Some(ResolvedSession {
            session_id: entry.session_id,
            project_key: provider,
            pane_id: entry.pane_id,
            log_file: entry.session_path,
            source: ResolveSource::RegistryPane,
        })
    }

    // Stage 6: scan the Claude projects tree for the freshest session log
    // whose decoded key matches the work directory.
    fn resolve_best_fallback(&self, work_dir: &str) -> Option<ResolvedSession> {
        let entries = std::fs::read_dir(&self.projects_dir).ok()?;
        let norm_work_dir = crate::comm::normalize_for_match(work_dir);

        let mut candidates: Vec<(ResolvedSession, std::time::SystemTime)> = Vec::new();

        for entry in entries.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            let project_key = entry.file_name().to_string_lossy().into_owned();
            let decoded = project_key.replace('-', "/");
            if !crate::comm::matches_work_dir(&decoded, &norm_work_dir) {
                continue;
            }

            let Ok(session_files) = std::fs::read_dir(entry.path()) else {
                continue;
            };
            for file in session_files.flatten() {
                let path = file.path();
                if path.extension().map_or(true, |e| e != "jsonl") {
                    continue;
                }
                let session_id = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                // Sidechain sessions are tool-spawned; never the live pane.
                if session_id.contains("sidechain") {
                    continue;
                }
                let Ok(modified) = file.metadata().and_then(|m| m.modified()) else {
                    continue;
                };
                candidates.push((
                    ResolvedSession {
                        session_id,
                        project_key: project_key.clone(),
                        log_file: path.to_string_lossy().into_owned(),
                        pane_id: String::new(),
                        source: ResolveSource::Fallback,
                    },
                    modified,
                ));
            }
        }

        candidates.sort_by(|a, b| b.1.cmp(&a.1));
        candidates.into_iter().next().map(|(session, _)| session)
    }
}
