//! Per-language behavior plugged into [`LanguageServerClient`](super::LanguageServerClient).
//!
//! A language supplies a handful of required facts (name, filetypes, launch
//! command, supported subcommands). Everything else is an optional hook with
//! a default that suits a plain stdio server.

use std::path::{Path, PathBuf};

use lsp_types::Hover;
use serde_json::Value;

use super::debug_info::DebugItem;
use super::subcommand::{self, Subcommand};
use crate::error::{ClientError, ClientResult};
use crate::lsp::process::ServerCommand;
use crate::lsp::protocol::{Notification, ResponseError};

/// How the protocol reaches the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Protocol over the child's stdin/stdout.
    Stdio,
    /// The server dials back to a loopback port we listen on.
    Tcp,
}

/// Inputs to building a launch command.
#[derive(Debug, Clone, Default)]
pub struct LaunchContext {
    pub project_root: Option<PathBuf>,
    /// Listening port, for TCP servers.
    pub port: Option<u16>,
    pub debug_logging: bool,
}

pub trait LanguageClient: Send + Sync + 'static {
    /// Human-readable language, e.g. "Rust".
    fn language(&self) -> &str;

    /// Short server name used in logs and logfile names.
    fn server_name(&self) -> &str;

    fn filetypes(&self) -> Vec<String>;

    /// Resolve the executable and build the launch command.
    ///
    /// May block on filesystem lookups or version probes; callers run it off
    /// the async workers.
    fn server_command(&self, context: &LaunchContext) -> ClientResult<ServerCommand>;

    /// Whether this language answers `subcommand`.
    fn supports(&self, subcommand: &Subcommand) -> bool;

    fn transport_kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    /// Root handed to the server at initialize.
    fn project_directory(&self, file: Option<&Path>) -> Option<PathBuf> {
        file.and_then(Path::parent).map(Path::to_path_buf)
    }

    fn initialization_options(&self) -> Option<Value> {
        None
    }

    /// Called in wire order for every notification, after diagnostics are cached.
    fn handle_notification(&self, _notification: &Notification) {}

    /// Answer a server-initiated request before the built-in replies.
    fn handle_server_request(
        &self,
        _method: &str,
        _params: &Value,
    ) -> Option<Result<Value, ResponseError>> {
        None
    }

    /// Forget per-generation state after the server stops.
    fn reset(&self) {}

    fn interpret_type(&self, hover: &Hover) -> ClientResult<String> {
        non_empty(subcommand::hover_text(hover))
    }

    fn interpret_doc(&self, hover: &Hover) -> ClientResult<String> {
        non_empty(subcommand::hover_text(hover))
    }

    fn extra_debug_items(&self) -> Vec<DebugItem> {
        Vec::new()
    }

    fn logfile_prefix(&self) -> String {
        self.server_name().to_string()
    }

    /// Start as soon as the client is registered rather than on first use.
    fn eager_start(&self) -> bool {
        false
    }

    /// Drop anything cached about how to launch the server.
    fn invalidate_command_cache(&self) {}
}

fn non_empty(text: String) -> ClientResult<String> {
    if text.trim().is_empty() {
        Err(ClientError::NoResult(subcommand::NO_HOVER.to_string()))
    } else {
        Ok(text)
    }
}

/// Nearest ancestor directory of `file` containing one of `markers`.
pub fn find_project_root(file: &Path, markers: &[impl AsRef<str>]) -> Option<PathBuf> {
    file.ancestors()
        .skip(1)
        .find(|dir| markers.iter().any(|m| dir.join(m.as_ref()).exists()))
        .map(Path::to_path_buf)
}
