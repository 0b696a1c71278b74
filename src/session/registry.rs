//! Persistent pane registry: the mapping from (provider, project) to a live
//! terminal pane.
//!
//! Stored as one JSON document, schema version 2. A legacy flat schema
//! (`"provider:projectID" → paneID`) is migrated on load. All writes go
//! through a temp file and rename so a crash never leaves a torn document.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::terminal::Backend;

/// Entries older than this are eligible for pruning.
pub const REGISTRY_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);
const REGISTRY_VERSION: u32 = 2;

/// Registration data for a single provider+project combination.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaneEntry {
    #[serde(default)]
    pub pane_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub session_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub claude_pane: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub session_path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub work_dir: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub terminal: String,
    #[serde(default)]
    pub updated_at: i64,
}

type ProviderMap = HashMap<String, HashMap<String, PaneEntry>>;

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryData {
    #[serde(default)]
    providers: ProviderMap,
    #[serde(default)]
    version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    legacy: Option<HashMap<String, String>>,
}

/// Thread-safe pane registry backed by a JSON file.
pub struct PaneRegistry {
    file_path: PathBuf,
    data: RwLock<RegistryData>,
    backend: RwLock<Option<Arc<dyn Backend>>>,
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn legacy_key(provider: &str, project_id: &str) -> String {
    format!("{provider}:{project_id}")
}

impl PaneRegistry {
    /// Open (or initialize) a registry at the given path, migrating legacy
    /// documents in place.
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        let registry = Self {
            file_path: file_path.into(),
            data: RwLock::new(RegistryData {
                providers: HashMap::new(),
                version: REGISTRY_VERSION,
                legacy: None,
            }),
            backend: RwLock::new(None),
        };
        registry.load();
        registry
    }

    /// Bind a terminal backend for alive checks.
    pub fn set_backend(&self, backend: Arc<dyn Backend>) {
        *self.backend.write().unwrap_or_else(|e| e.into_inner()) = Some(backend);
    }

    fn backend(&self) -> Option<Arc<dyn Backend>> {
        self.backend
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Pane ID for a provider and project, consulting the legacy bag as a
    /// fallback.
    pub fn get(&self, provider: &str, project_id: &str) -> Option<String> {
        let data = self.data.read().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = data
            .providers
            .get(provider)
            .and_then(|m| m.get(project_id))
        {
            return Some(entry.pane_id.clone());
        }
        data.legacy
            .as_ref()
            .and_then(|l| l.get(&legacy_key(provider, project_id)))
            .cloned()
    }

    /// Full entry for a provider and project.
    pub fn get_entry(&self, provider: &str, project_id: &str) -> Option<PaneEntry> {
        let data = self.data.read().unwrap_or_else(|e| e.into_inner());
        data.providers
            .get(provider)
            .and_then(|m| m.get(project_id))
            .cloned()
    }

    /// Register a pane ID (simple form).
    pub fn set(&self, provider: &str, project_id: &str, pane_id: &str) {
        self.upsert(
            provider,
            project_id,
            PaneEntry {
                pane_id: pane_id.to_string(),
                updated_at: now_unix(),
                ..Default::default()
            },
        );
    }

    /// Update or insert a full entry, stamping `updated_at` when unset.
    pub fn upsert(&self, provider: &str, project_id: &str, mut entry: PaneEntry) {
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        if entry.updated_at == 0 {
            entry.updated_at = now_unix();
        }
        data.providers
            .entry(provider.to_string())
            .or_default()
            .insert(project_id.to_string(), entry);
        self.save_locked(&data);
    }

    /// Remove a registration from both schemas.
    pub fn remove(&self, provider: &str, project_id: &str) {
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        if let Some(map) = data.providers.get_mut(provider) {
            map.remove(project_id);
            if map.is_empty() {
                data.providers.remove(provider);
            }
        }
        if let Some(legacy) = data.legacy.as_mut() {
            legacy.remove(&legacy_key(provider, project_id));
        }
        self.save_locked(&data);
    }

    /// All entries for one provider.
    pub fn get_by_provider(&self, provider: &str) -> HashMap<String, PaneEntry> {
        let data = self.data.read().unwrap_or_else(|e| e.into_inner());
        data.providers.get(provider).cloned().unwrap_or_default()
    }

    /// First entry carrying the given session ID, with its provider.
    pub fn get_by_session_id(&self, session_id: &str) -> Option<(String, PaneEntry)> {
        let data = self.data.read().unwrap_or_else(|e| e.into_inner());
        for (provider, map) in &data.providers {
            for entry in map.values() {
                if entry.session_id == session_id {
                    return Some((provider.clone(), entry.clone()));
                }
            }
        }
        None
    }

    /// First entry whose `claude_pane` matches, with its provider.
    pub fn get_by_claude_pane(&self, claude_pane: &str) -> Option<(String, PaneEntry)> {
        let data = self.data.read().unwrap_or_else(|e| e.into_inner());
        for (provider, map) in &data.providers {
            for entry in map.values() {
                if entry.claude_pane == claude_pane {
                    return Some((provider.clone(), entry.clone()));
                }
            }
        }
        None
    }

    /// Snapshot of every entry across all providers.
    pub fn all_entries(&self) -> ProviderMap {
        self.data
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .providers
            .clone()
    }

    /// Check pane liveness for a provider+project.
    ///
    /// Returns true when no backend is bound (benefit of the doubt).
    pub async fn verify_alive(&self, provider: &str, project_id: &str) -> bool {
        let Some(entry) = self.get_entry(provider, project_id) else {
            return false;
        };
        if entry.pane_id.is_empty() {
            return false;
        }
        match self.backend() {
            Some(backend) => backend.is_alive(&entry.pane_id).await,
            None => true,
        }
    }

    /// Remove entries older than the TTL. Returns the count removed.
    pub fn prune_stale_panes(&self, ttl: Duration) -> usize {
        let ttl = if ttl.is_zero() { REGISTRY_TTL } else { ttl };
        let cutoff = now_unix() - ttl.as_secs() as i64;

        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        let mut removed = 0;

        data.providers.retain(|_, map| {
            map.retain(|_, entry| {
                let stale = entry.updated_at > 0 && entry.updated_at < cutoff;
                if stale {
                    removed += 1;
                }
                !stale
            });
            !map.is_empty()
        });

        if removed > 0 {
            self.save_locked(&data);
        }
        removed
    }

    /// Remove entries whose panes are no longer alive. Returns the count
    /// removed. No-op without a bound backend.
    pub async fn prune_dead_panes(&self) -> usize {
        let Some(backend) = self.backend() else {
            return 0;
        };

        // Probe liveness outside the lock; pane checks shell out to the
        // backend.
        let snapshot = self.all_entries();
        let mut dead: Vec<(String, String)> = Vec::new();
        for (provider, map) in &snapshot {
            for (project_id, entry) in map {
                if !entry.pane_id.is_empty() && !backend.is_alive(&entry.pane_id).await {
                    dead.push((provider.clone(), project_id.clone()));
                }
            }
        }

        if dead.is_empty() {
            return 0;
        }

        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        let mut removed = 0;
        for (provider, project_id) in dead {
            if let Some(map) = data.providers.get_mut(&provider) {
                if map.remove(&project_id).is_some() {
                    removed += 1;
                }
                if map.is_empty() {
                    data.providers.remove(&provider);
                }
            }
        }
        if removed > 0 {
            self.save_locked(&data);
        }
        removed
    }

    fn load(&self) {
        let Ok(raw) = std::fs::read(&self.file_path) else {
            return;
        };

        // Schema v2 first.
        if let Ok(parsed) = serde_json::from_slice::<RegistryData>(&raw) {
            if parsed.version >= REGISTRY_VERSION {
                let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
                *data = parsed;
                return;
            }
        }

        // Legacy flat map: promote every key to a nested entry, then drop
        // the bag.
        if let Ok(flat) = serde_json::from_slice::<HashMap<String, String>>(&raw) {
            let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
            data.providers.clear();
            data.legacy = Some(flat);
            data.version = REGISTRY_VERSION;
            self.migrate_legacy_locked(&mut data);
        }
    }

    fn migrate_legacy_locked(&self, data: &mut RegistryData) {
        let Some(legacy) = data.legacy.take() else {
            return;
        };
        if legacy.is_empty() {
            return;
        }

        for (key, pane_id) in legacy {
            let Some((provider, project_id)) = key.split_once(':') else {
                continue;
            };
            data.providers
                .entry(provider.to_string())
                .or_default()
                .insert(
                    project_id.to_string(),
                    PaneEntry {
                        pane_id,
                        updated_at: now_unix(),
                        ..Default::default()
                    },
                );
        }
        data.version = REGISTRY_VERSION;
        self.save_locked(data);
    }

    fn save_locked(&self, data: &RegistryData) {
        if let Some(dir) = self.file_path.parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        let Ok(json) = serde_json::to_vec_pretty(data) else {
            return;
        };
        let tmp = PathBuf::from(format!("{}.tmp", self.file_path.display()));
        if std::fs::write(&tmp, json).is_err() {
            let _ = std::fs::remove_file(&tmp);
            return;
        }
        if std::fs::rename(&tmp, &self.file_path).is_err() {
            let _ = std::fs::remove_file(&tmp);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testsupport::TestTempDir;

    fn registry_at(tmp: &TestTempDir) -> PaneRegistry {
        PaneRegistry::new(tmp.child("pane-registry.json"))
    }

    #[test]
    fn upsert_then_get_round_trips() {
        let tmp = TestTempDir::new("registry");
        let reg = registry_at(&tmp);
        reg.set("codex", "abc", "%10");
        assert_eq!(reg.get("codex", "abc").as_deref(), Some("%10"));
        assert!(reg.get("codex", "other").is_none());

        let entry = reg.get_entry("codex", "abc").unwrap();
        assert!(entry.updated_at > 0);
    }

    #[test]
    fn persisted_state_reloads() {
        let tmp = TestTempDir::new("registry");
        {
            let reg = registry_at(&tmp);
            reg.upsert(
                "gemini",
                "proj",
                PaneEntry {
                    pane_id: "%20".into(),
                    session_id: "sess-1".into(),
                    work_dir: "/w".into(),
                    ..Default::default()
                },
            );
        }
        let reg = registry_at(&tmp);
        let entry = reg.get_entry("gemini", "proj").unwrap();
        assert_eq!(entry.pane_id, "%20");
        assert_eq!(entry.session_id, "sess-1");
    }

    #[test]
    fn legacy_flat_schema_is_migrated_on_load() {
        let tmp = TestTempDir::new("registry");
        tmp.write_text(
            "pane-registry.json",
            r#"{"codex:abc": "%10", "gemini:abc": "%20"}"#,
        );

        let reg = registry_at(&tmp);
        assert_eq!(reg.get("codex", "abc").as_deref(), Some("%10"));
        assert_eq!(reg.get("gemini", "abc").as_deref(), Some("%20"));

        // The disk document is now the nested schema with the bag dropped.
        let raw = std::fs::read_to_string(tmp.child("pane-registry.json")).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(doc["version"], 2);
        assert_eq!(doc["providers"]["codex"]["abc"]["pane_id"], "%10");
        assert!(doc.get("legacy").is_none());
    }

    #[test]
    fn remove_drops_entry_and_empty_provider() {
        let tmp = TestTempDir::new("registry");
        let reg = registry_at(&tmp);
        reg.set("droid", "p1", "%1");
        reg.remove("droid", "p1");
        assert!(reg.get("droid", "p1").is_none());
        assert!(reg.all_entries().is_empty());
    }

    #[test]
    fn lookup_by_session_id_and_claude_pane() {
        let tmp = TestTempDir::new("registry");
        let reg = registry_at(&tmp);
        reg.upsert(
            "claude",
            "p1",
            PaneEntry {
                pane_id: "%5".into(),
                session_id: "sess-9".into(),
                claude_pane: "%99".into(),
                ..Default::default()
            },
        );

        let (provider, entry) = reg.get_by_session_id("sess-9").unwrap();
        assert_eq!(provider, "claude");
        assert_eq!(entry.pane_id, "%5");

        let (provider, _) = reg.get_by_claude_pane("%99").unwrap();
        assert_eq!(provider, "claude");
        assert!(reg.get_by_session_id("nope").is_none());
    }

    #[test]
    fn stale_entries_are_pruned_by_ttl() {
        let tmp = TestTempDir::new("registry");
        let reg = registry_at(&tmp);
        reg.upsert(
            "codex",
            "old",
            PaneEntry {
                pane_id: "%1".into(),
                updated_at: now_unix() - 8 * 24 * 60 * 60,
                ..Default::default()
            },
        );
        reg.set("codex", "fresh", "%2");

        let removed = reg.prune_stale_panes(Duration::ZERO);
        assert_eq!(removed, 1);
        assert!(reg.get("codex", "old").is_none());
        assert_eq!(reg.get("codex", "fresh").as_deref(), Some("%2"));
    }

    #[tokio::test]
    async fn verify_alive_gives_benefit_of_doubt_without_backend() {
        let tmp = TestTempDir::new("registry");
        let reg = registry_at(&tmp);
        reg.set("codex", "p", "%1");
        assert!(reg.verify_alive("codex", "p").await);
        assert!(!reg.verify_alive("codex", "missing").await);
    }

    #[tokio::test]
    async fn prune_dead_panes_is_noop_without_backend() {
        let tmp = TestTempDir::new("registry");
        let reg = registry_at(&tmp);
        reg.set("codex", "p", "%1");
        assert_eq!(reg.prune_dead_panes().await, 0);
    }

    // Concurrent upserts on distinct keys must all survive the rename dance.
    #[test]
    fn concurrent_upserts_preserve_all_writes() {
        let tmp = TestTempDir::new("registry");
        let reg = std::sync::Arc::new(registry_at(&tmp));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let reg = reg.clone();
                std::thread::spawn(move || {
                    reg.set("codex", &format!("proj-{i}"), &format!("%{i}"));
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        for i in 0..8 {
            assert_eq!(
                reg.get("codex", &format!("proj-{i}")).as_deref(),
                Some(format!("%{i}").as_str())
            );
        }
        // The on-disk file parses cleanly after the storm.
        let raw = std::fs::read_to_string(tmp.child("pane-registry.json")).unwrap();
        assert!(serde_json::from_str::<serde_json::Value>(&raw).is_ok());
    }
}
