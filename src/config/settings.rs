use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ClientError, ClientResult};

/// Top-level settings file.
#[derive(Debug, Clone, Default, Deserialize, serde::Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub global: GlobalSettings,
    pub rust: RustSettings,
    pub clangd: ClangdSettings,
    pub php: PhpSettings,
    pub servers: Vec<GenericServerSettings>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct GlobalSettings {
    /// Keep per-run server logfiles after a clean shutdown.
    pub keep_logfiles: bool,
    pub log_dir: Option<PathBuf>,
    pub connection_timeout_ms: u64,
    pub initialize_timeout_ms: u64,
    pub shutdown_timeout_ms: u64,
    pub request_timeout_ms: u64,
    /// Ask servers for verbose logging where they support it.
    pub server_debug_logging: bool,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            keep_logfiles: false,
            log_dir: None,
            connection_timeout_ms: 10_000,
            initialize_timeout_ms: 30_000,
            shutdown_timeout_ms: 15_000,
            request_timeout_ms: 30_000,
            server_debug_logging: false,
        }
    }
}

impl GlobalSettings {
    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn initialize_timeout(&self) -> Duration {
        Duration::from_millis(self.initialize_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RustSettings {
    pub enabled: bool,
    pub rls_binary_path: Option<PathBuf>,
    pub rustc_binary_path: Option<PathBuf>,
}

impl Default for RustSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            rls_binary_path: None,
            rustc_binary_path: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ClangdSettings {
    pub enabled: bool,
    pub binary_path: Option<PathBuf>,
    pub bundled_binary_path: Option<PathBuf>,
    pub resource_dir: Option<PathBuf>,
    pub args: Vec<String>,
    /// Results are filtered client-side, so clangd is asked for a bounded list.
    pub uses_ycmd_caching: bool,
    pub limit_results: u32,
}

impl Default for ClangdSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            binary_path: None,
            bundled_binary_path: None,
            resource_dir: None,
            args: Vec::new(),
            uses_ycmd_caching: true,
            limit_results: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PhpSettings {
    pub enabled: bool,
    pub php_binary_path: Option<PathBuf>,
    pub language_server_path: Option<PathBuf>,
}

impl Default for PhpSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            php_binary_path: None,
            language_server_path: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, serde::Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportSetting {
    #[default]
    Stdio,
    Tcp,
}

/// A user-defined LSP server.
#[derive(Debug, Clone, Deserialize, serde::Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct GenericServerSettings {
    pub name: String,
    pub filetypes: Vec<String>,
    /// Program followed by its arguments. In TCP mode `{port}` is replaced
    /// with the listening port.
    pub cmd: Vec<String>,
    #[serde(default)]
    pub transport: TransportSetting,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub project_root_files: Vec<String>,
    #[serde(default)]
    pub initialization_options: Option<serde_json::Value>,
    #[serde(default)]
    pub start_eagerly: bool,
}

impl Settings {
    /// Reject settings that cannot produce a working server.
    pub fn validate(&self) -> ClientResult<()> {
        let global = &self.global;
        for (key, value) in [
            ("connection_timeout_ms", global.connection_timeout_ms),
            ("initialize_timeout_ms", global.initialize_timeout_ms),
            ("shutdown_timeout_ms", global.shutdown_timeout_ms),
            ("request_timeout_ms", global.request_timeout_ms),
        ] {
            if value == 0 {
                return Err(ClientError::config(format!("global.{} must be positive", key)));
            }
        }

        let mut names = std::collections::HashSet::new();
        for server in &self.servers {
            if server.name.trim().is_empty() {
                return Err(ClientError::config("servers entry has an empty name"));
            }
            if !names.insert(server.name.as_str()) {
                return Err(ClientError::config(format!(
                    "server {} is defined more than once",
                    server.name
                )));
            }
            if server.cmd.is_empty() {
                return Err(ClientError::config(format!("server {} has an empty cmd", server.name)));
            }
            if server.filetypes.is_empty() {
                return Err(ClientError::config(format!(
                    "server {} has no filetypes",
                    server.name
                )));
            }
        }
        Ok(())
    }
}
