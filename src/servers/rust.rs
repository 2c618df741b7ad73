//! Rust Language Server (RLS).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex};

use log::{debug, error};
use lsp_types::{Hover, MarkedString};
use regex::Regex;
use serde_json::Value;

use crate::config::RustSettings;
use crate::error::{ClientError, ClientResult, LockResultExt};
use crate::lsp::client::language::find_project_root;
use crate::lsp::client::subcommand::hover_items;
use crate::lsp::client::{DebugItem, LanguageClient, LaunchContext, Subcommand};
use crate::lsp::process::{ServerCommand, find_executable, find_on_path};
use crate::lsp::protocol::Notification;

pub const UNKNOWN_TYPE: &str = "Unknown type.";
pub const NO_DOCUMENTATION: &str = "No documentation available for current context.";

static RLS_VERSION: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^rls (?P<version>.*)$").ok());

/// Extract the version from `rls --version` output.
pub fn parse_rls_version(output: &str) -> Option<String> {
    let captures = RLS_VERSION.as_ref()?.captures(output.trim())?;
    Some(captures.name("version")?.as_str().to_string())
}

fn progress_key(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub struct RustClient {
    settings: RustSettings,
    /// In-flight build/index tasks by progress id.
    progress: Mutex<BTreeMap<String, String>>,
}

impl RustClient {
    pub fn new(settings: RustSettings) -> Self {
        Self {
            settings,
            progress: Mutex::new(BTreeMap::new()),
        }
    }

    fn rls_executable(&self) -> ClientResult<PathBuf> {
        find_executable(self.settings.rls_binary_path.as_deref(), "rls", None)
    }

    fn rls_version(&self) -> String {
        let Ok(rls) = self.rls_executable() else {
            return "None".to_string();
        };
        let output = match std::process::Command::new(&rls).arg("--version").output() {
            Ok(output) => String::from_utf8_lossy(&output.stdout).into_owned(),
            Err(e) => {
                debug!(target: "tsunagi::servers", "Cannot run {} --version: {}", rls.display(), e);
                return "None".to_string();
            }
        };
        parse_rls_version(&output).unwrap_or_else(|| {
            error!(
                target: "tsunagi::servers",
                "Cannot parse Rust Language Server version: {}",
                output.trim()
            );
            "None".to_string()
        })
    }

    /// Comma-separated in-flight tasks, or "Ready" when idle.
    pub fn build_status(&self) -> String {
        let progress = self.progress.lock().recover_poison("RustClient::build_status");
        if progress.is_empty() {
            "Ready".to_string()
        } else {
            progress.values().cloned().collect::<Vec<_>>().join(", ")
        }
    }

    fn record_progress(&self, id: String, message: Option<String>) {
        let mut progress = self.progress.lock().recover_poison("RustClient::record_progress");
        match message {
            Some(message) => {
                progress.insert(id, message);
            }
            None => {
                progress.remove(&id);
            }
        }
    }

    /// `window/progress`, as sent by RLS.
    fn on_window_progress(&self, params: &Value) {
        let Some(id) = params.get("id") else {
            return;
        };
        if params.get("done").is_some() {
            self.record_progress(progress_key(id), None);
            return;
        }
        let mut message = params
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if let Some(detail) = params.get("message").and_then(Value::as_str) {
            message.push(' ');
            message.push_str(detail);
        }
        self.record_progress(progress_key(id), Some(message));
    }

    /// Standard `$/progress` work-done notifications.
    fn on_work_done_progress(&self, params: &Value) {
        let (Some(token), Some(value)) = (params.get("token"), params.get("value")) else {
            return;
        };
        let key = progress_key(token);
        match value.get("kind").and_then(Value::as_str) {
            Some("end") => self.record_progress(key, None),
            Some("begin") | Some("report") => {
                let previous = self
                    .progress
                    .lock()
                    .recover_poison("RustClient::on_work_done_progress")
                    .get(&key)
                    .cloned();
                let title = value
                    .get("title")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .or(previous)
                    .unwrap_or_default();
                let message = match value.get("message").and_then(Value::as_str) {
                    Some(detail) if !title.is_empty() => format!("{} {}", title, detail),
                    Some(detail) => detail.to_string(),
                    None => title,
                };
                self.record_progress(key, Some(message));
            }
            _ => {}
        }
    }
}

impl LanguageClient for RustClient {
    fn language(&self) -> &str {
        "Rust"
    }

    fn server_name(&self) -> &str {
        "Rust Language Server"
    }

    fn filetypes(&self) -> Vec<String> {
        vec!["rust".to_string()]
    }

    fn server_command(&self, context: &LaunchContext) -> ClientResult<ServerCommand> {
        let mut command = ServerCommand::new(self.rls_executable()?);
        let rustc = self
            .settings
            .rustc_binary_path
            .clone()
            .or_else(|| find_on_path("rustc"));
        if let Some(rustc) = rustc {
            command = command.env("RUSTC", rustc.display().to_string());
        }
        if context.debug_logging {
            command = command
                .env("RUST_LOG", "rls=trace")
                .env("RUST_BACKTRACE", "1");
        }
        if let Some(root) = &context.project_root {
            command = command.current_dir(root);
        }
        Ok(command)
    }

    fn supports(&self, subcommand: &Subcommand) -> bool {
        match subcommand {
            Subcommand::GoTo
            | Subcommand::GoToDefinition
            | Subcommand::GoToDeclaration
            | Subcommand::GoToReferences
            | Subcommand::GetType
            | Subcommand::GetDoc
            | Subcommand::FixIt
            | Subcommand::RefactorRename { .. }
            | Subcommand::RestartServer
            | Subcommand::StopServer => true,
            Subcommand::GoToImprecise
            | Subcommand::GoToInclude
            | Subcommand::GetTypeImprecise => false,
        }
    }

    /// RLS detects the project from the root uri.
    fn project_directory(&self, file: Option<&Path>) -> Option<PathBuf> {
        let file = file?;
        find_project_root(file, &["Cargo.toml"]).or_else(|| file.parent().map(Path::to_path_buf))
    }

    fn handle_notification(&self, notification: &Notification) {
        match notification.method.as_str() {
            "window/progress" => self.on_window_progress(&notification.params),
            "$/progress" => self.on_work_done_progress(&notification.params),
            _ => {}
        }
    }

    fn reset(&self) {
        self.progress.lock().recover_poison("RustClient::reset").clear();
    }

    /// RLS hovers are a list; the type is the first language block.
    fn interpret_type(&self, hover: &Hover) -> ClientResult<String> {
        hover_items(hover)
            .into_iter()
            .find_map(|item| match item {
                MarkedString::LanguageString(code) => Some(code.value),
                MarkedString::String(_) => None,
            })
            .ok_or_else(|| ClientError::NoResult(UNKNOWN_TYPE.to_string()))
    }

    /// Documentation is the plain-string part of the hover list.
    fn interpret_doc(&self, hover: &Hover) -> ClientResult<String> {
        let documentation = hover_items(hover)
            .into_iter()
            .filter_map(|item| match item {
                MarkedString::String(text) => Some(text.trim().to_string()),
                MarkedString::LanguageString(_) => None,
            })
            .collect::<Vec<_>>()
            .join("\n");
        if documentation.is_empty() {
            return Err(ClientError::NoResult(NO_DOCUMENTATION.to_string()));
        }
        Ok(documentation)
    }

    fn extra_debug_items(&self) -> Vec<DebugItem> {
        vec![
            DebugItem::new("Build Status", self.build_status()),
            DebugItem::new("Version", self.rls_version()),
        ]
    }

    fn logfile_prefix(&self) -> String {
        "rls".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client() -> RustClient {
        RustClient::new(RustSettings::default())
    }

    fn notification(method: &str, params: Value) -> Notification {
        Notification {
            method: method.to_string(),
            params,
        }
    }

    fn hover(contents: Value) -> Hover {
        serde_json::from_value(json!({ "contents": contents })).unwrap()
    }

    #[test]
    fn parses_rls_version() {
        assert_eq!(
            parse_rls_version("rls 1.41.0 (8f1c275 2019-12-10)\n").as_deref(),
            Some("1.41.0 (8f1c275 2019-12-10)")
        );
        assert_eq!(parse_rls_version("something else"), None);
    }

    #[test]
    fn window_progress_tracks_build_status() {
        let client = client();
        assert_eq!(client.build_status(), "Ready");

        client.handle_notification(&notification(
            "window/progress",
            json!({"id": "progress_0", "title": "Building", "message": "serde"}),
        ));
        client.handle_notification(&notification(
            "window/progress",
            json!({"id": "progress_1", "title": "Indexing"}),
        ));
        assert_eq!(client.build_status(), "Building serde, Indexing");

        client.handle_notification(&notification(
            "window/progress",
            json!({"id": "progress_0", "done": true}),
        ));
        assert_eq!(client.build_status(), "Indexing");

        client.reset();
        assert_eq!(client.build_status(), "Ready");
    }

    #[test]
    fn work_done_progress_tracks_build_status() {
        let client = client();
        client.handle_notification(&notification(
            "$/progress",
            json!({"token": 1, "value": {"kind": "begin", "title": "Building"}}),
        ));
        client.handle_notification(&notification(
            "$/progress",
            json!({"token": 1, "value": {"kind": "report", "message": "3/10"}}),
        ));
        assert_eq!(client.build_status(), "Building 3/10");

        client.handle_notification(&notification(
            "$/progress",
            json!({"token": 1, "value": {"kind": "end"}}),
        ));
        assert_eq!(client.build_status(), "Ready");
    }

    #[test]
    fn get_type_uses_first_language_block() {
        let client = client();
        let contents = json!(["Some docs", {"language": "rust", "value": "fn foo() -> u32"}]);
        assert_eq!(client.interpret_type(&hover(contents)).unwrap(), "fn foo() -> u32");

        let err = client.interpret_type(&hover(json!(["only docs"]))).unwrap_err();
        assert_eq!(err.to_string(), UNKNOWN_TYPE);
    }

    #[test]
    fn get_doc_joins_plain_strings() {
        let client = client();
        let contents = json!([
            "  Adds two numbers. ",
            "https://docs.rs/foo",
            {"language": "rust", "value": "fn add(a: u32, b: u32) -> u32"}
        ]);
        assert_eq!(
            client.interpret_doc(&hover(contents)).unwrap(),
            "Adds two numbers.\nhttps://docs.rs/foo"
        );

        let err = client
            .interpret_doc(&hover(json!([{"language": "rust", "value": "u32"}])))
            .unwrap_err();
        assert_eq!(err.to_string(), NO_DOCUMENTATION);
    }

    #[test]
    fn project_directory_is_nearest_cargo_manifest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "[package]").unwrap();
        let file = dir.path().join("src/lib.rs");
        assert_eq!(client().project_directory(Some(&file)), Some(dir.path().to_path_buf()));

        let loose = tempfile::tempdir().unwrap();
        let file = loose.path().join("main.rs");
        assert_eq!(client().project_directory(Some(&file)), Some(loose.path().to_path_buf()));
    }

    #[cfg(unix)]
    #[test]
    fn debug_logging_sets_rls_environment() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let rls = dir.path().join("rls");
        std::fs::write(&rls, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&rls, std::fs::Permissions::from_mode(0o755)).unwrap();
        let client = RustClient::new(RustSettings {
            rls_binary_path: Some(rls.clone()),
            rustc_binary_path: Some(PathBuf::from("/opt/rust/bin/rustc")),
            ..RustSettings::default()
        });

        let context = LaunchContext {
            debug_logging: true,
            ..LaunchContext::default()
        };
        let command = client.server_command(&context).unwrap();
        assert_eq!(command.program, rls);
        assert!(command.env.contains(&("RUSTC".into(), "/opt/rust/bin/rustc".into())));
        assert!(command.env.contains(&("RUST_LOG".into(), "rls=trace".into())));
        assert!(command.env.contains(&("RUST_BACKTRACE".into(), "1".into())));
    }
}
