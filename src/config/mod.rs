//! Configuration: environment helpers, project identity, start config, and
//! per-project session files.

mod env;
mod project;
mod session;
mod start;

pub use env::{env_bool, env_int, env_str};
pub(crate) use project::clean_posix_path;
pub use project::{compute_project_id, normalize_work_dir};
pub use session::{
    check_session_writable, ensure_session_dir, find_project_session_file, parse_session_pane,
    project_config_dir, read_session_file, safe_write_session, SessionFileIssue,
    PROJECT_CONFIG_DIRNAME,
};
pub use start::{
    ensure_default_start_config, load_start_config, StartConfig, CONFIG_FILENAME,
    DEFAULT_PROVIDERS,
};
