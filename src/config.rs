pub mod settings;
pub mod user;

use std::path::Path;

use log::{debug, info};

use crate::error::{ClientError, ClientResult};
pub use settings::{
    ClangdSettings, GenericServerSettings, GlobalSettings, PhpSettings, RustSettings, Settings,
    TransportSetting,
};
pub use user::user_config_path;

/// Parse and validate a settings document.
pub fn parse_settings(contents: &str) -> ClientResult<Settings> {
    let settings: Settings =
        toml::from_str(contents).map_err(|e| ClientError::config(e.to_string()))?;
    settings.validate()?;
    Ok(settings)
}

/// Load settings from `explicit`, else the user config file, else defaults.
///
/// An explicit path must exist; a missing user config file is not an error.
pub fn load_settings(explicit: Option<&Path>) -> ClientResult<Settings> {
    if let Some(path) = explicit {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ClientError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        info!(target: "tsunagi::config", "Loaded settings from {}", path.display());
        return parse_settings(&contents);
    }

    match user_config_path() {
        Some(path) if path.is_file() => {
            let contents = std::fs::read_to_string(&path).map_err(|e| {
                ClientError::config(format!("cannot read {}: {}", path.display(), e))
            })?;
            info!(target: "tsunagi::config", "Loaded settings from {}", path.display());
            parse_settings(&contents)
        }
        _ => {
            debug!(target: "tsunagi::config", "No user config file, using defaults");
            Ok(Settings::default())
        }
    }
}
