//! Config file locations

use std::path::{Path, PathBuf};

/// Config file name looked up in the current directory
pub const LOCAL_CONFIG_FILE: &str = "autoloop.json";

/// Per-user data directory (~/.autoloop)
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".autoloop")
}

/// Per-user config location
pub fn config_path() -> PathBuf {
    data_dir().join("config.json")
}

/// Project-local config location
pub fn local_config_path() -> PathBuf {
    PathBuf::from(LOCAL_CONFIG_FILE)
}

/// Pick the config file to load.
///
/// An explicit path always wins, even if it does not exist. Otherwise the
/// project-local file is preferred over the per-user one. `None` means no
/// file was found and defaults apply.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    [local_config_path(), config_path()]
        .into_iter()
        .find(|p| p.exists())
}
