//! User configuration location.
//!
//! User config location: $XDG_CONFIG_HOME/tsunagi/tsunagi.toml
//! Fallback: the platform config directory reported by `dirs`.

use std::path::PathBuf;

const APP_DIR: &str = "tsunagi";
const FILE_NAME: &str = "tsunagi.toml";

/// Returns the path to the user configuration file.
///
/// 1. If $XDG_CONFIG_HOME is set: $XDG_CONFIG_HOME/tsunagi/tsunagi.toml
/// 2. Otherwise: `dirs::config_dir()`/tsunagi/tsunagi.toml
///
/// Returns None if no config directory can be determined.
pub fn user_config_path() -> Option<PathBuf> {
    if let Some(xdg_config) = std::env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(xdg_config).join(APP_DIR).join(FILE_NAME));
    }
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join(FILE_NAME))
}
