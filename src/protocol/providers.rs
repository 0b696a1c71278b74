//! Provider name tables and per-provider file conventions.

/// Static description of one supported provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderSpec {
    /// Canonical user-facing name (`codex`, `gemini`, ...).
    pub name: &'static str,
    /// Short protocol prefix used by CLI aliases (`cask`, `gask`, ...).
    pub prefix: &'static str,
    /// Per-project session hint filename under `.ccb_config/`.
    pub session_filename: &'static str,
}

/// Every provider the bridge knows how to talk to.
pub const ALL_PROVIDERS: [ProviderSpec; 5] = [
    ProviderSpec {
        name: "codex",
        prefix: "cask",
        session_filename: ".codex-session",
    },
    ProviderSpec {
        name: "gemini",
        prefix: "gask",
        session_filename: ".gemini-session",
    },
    ProviderSpec {
        name: "opencode",
        prefix: "oask",
        session_filename: ".opencode-session",
    },
    ProviderSpec {
        name: "claude",
        prefix: "lask",
        session_filename: ".claude-session",
    },
    ProviderSpec {
        name: "droid",
        prefix: "dask",
        session_filename: ".droid-session",
    },
];

/// Canonical provider names in declaration order.
pub fn provider_names() -> Vec<&'static str> {
    ALL_PROVIDERS.iter().map(|s| s.name).collect()
}

/// Look up a provider spec by canonical name.
pub fn spec_for(name: &str) -> Option<&'static ProviderSpec> {
    ALL_PROVIDERS.iter().find(|s| s.name == name)
}

/// Protocol prefix (`cask` etc.) for a provider name.
pub fn protocol_prefix(name: &str) -> Option<&'static str> {
    spec_for(name).map(|s| s.prefix)
}

/// Provider name for a protocol prefix (`cask` → `codex`).
pub fn prefix_to_provider(prefix: &str) -> Option<&'static str> {
    ALL_PROVIDERS
        .iter()
        .find(|s| s.prefix == prefix)
        .map(|s| s.name)
}

/// Session hint filename for a provider (`.codex-session` etc.).
pub fn session_filename(name: &str) -> Option<&'static str> {
    spec_for(name).map(|s| s.session_filename)
}

/// True when `name` is a recognized provider.
pub fn is_valid_provider(name: &str) -> bool {
    spec_for(name).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_round_trip() {
        for spec in &ALL_PROVIDERS {
            assert_eq!(protocol_prefix(spec.name), Some(spec.prefix));
            assert_eq!(prefix_to_provider(spec.prefix), Some(spec.name));
        }
    }

    #[test]
    fn session_filenames_follow_provider_names() {
        assert_eq!(session_filename("codex"), Some(".codex-session"));
        assert_eq!(session_filename("droid"), Some(".droid-session"));
        assert_eq!(session_filename("nope"), None);
    }

    #[test]
    fn validation_rejects_unknown_names() {
        assert!(is_valid_provider("claude"));
        assert!(!is_valid_provider("cask"));
        assert!(!is_valid_provider(""));
    }
}
