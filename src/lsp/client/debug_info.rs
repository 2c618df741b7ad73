use std::path::PathBuf;

use serde::Serialize;

/// One extra key/value line of debug output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DebugItem {
    pub key: String,
    pub value: String,
}

impl DebugItem {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Snapshot of a server for diagnostics output.
#[derive(Debug, Clone, Serialize)]
pub struct DebugInfo {
    pub name: String,
    pub language: String,
    pub executable: Option<String>,
    pub pid: Option<u32>,
    pub address: Option<String>,
    pub port: Option<u16>,
    pub logfiles: Vec<PathBuf>,
    pub status: String,
    pub is_running: bool,
    pub extras: Vec<DebugItem>,
}
