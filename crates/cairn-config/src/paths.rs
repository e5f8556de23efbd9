//! Path utilities for cairn configuration
//!
//! Everything lives under the cairn home directory: `$CAIRN_HOME` when set,
//! otherwise `~/.cairn` (`%USERPROFILE%\.cairn` on Windows).

use crate::constants::{ENV_CAIRN_CONFIG, ENV_CAIRN_HOME};
use std::path::{Path, PathBuf};

pub const CAIRN_DIR_NAME: &str = ".cairn";
pub const LOG_DIR_NAME: &str = "log";
pub const DEFAULT_CONFIG_FILENAME: &str = "cairn.toml";
pub const DEFAULT_BREAKPOINTS_FILENAME: &str = "breakpoints.json";
pub const DEFAULT_LOG_FILENAME: &str = "cairn.log";

/// Cairn home directory. Falls back to the current directory if the home
/// directory cannot be determined.
pub fn cairn_home() -> PathBuf {
    if let Some(home) = std::env::var_os(ENV_CAIRN_HOME).filter(|v| !v.is_empty()) {
        return PathBuf::from(home);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CAIRN_DIR_NAME)
}

/// Config path: `$CAIRN_CONFIG` when set, otherwise `<home>/cairn.toml`.
pub fn default_config_path() -> PathBuf {
    if let Some(path) = std::env::var_os(ENV_CAIRN_CONFIG).filter(|v| !v.is_empty()) {
        return PathBuf::from(path);
    }
    cairn_home().join(DEFAULT_CONFIG_FILENAME)
}

pub fn default_breakpoints_path() -> PathBuf {
    cairn_home().join(DEFAULT_BREAKPOINTS_FILENAME)
}

pub fn default_log_path() -> PathBuf {
    cairn_home().join(LOG_DIR_NAME).join(DEFAULT_LOG_FILENAME)
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}

/// Create the parent directory of `path` if it does not exist.
pub fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() && !parent.exists() => {
            std::fs::create_dir_all(parent)
        }
        _ => Ok(()),
    }
}
