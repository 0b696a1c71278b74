//! Session state: the pane registry, the Claude session resolver, and
//! per-provider session loaders.

mod loader;
mod registry;
mod resolver;

pub use loader::{load_session, ProjectSession};
pub use registry::{PaneEntry, PaneRegistry, REGISTRY_TTL};
pub use resolver::{ResolveSource, ResolvedSession, SessionResolver};

use std::path::PathBuf;

/// Canonical pane registry location under the runtime directory.
pub fn registry_path() -> PathBuf {
    crate::runtime::run_dir().join("pane-registry.json")
}
