//! PHP Language Server, reached over TCP.

use crate::config::PhpSettings;
use crate::error::{ClientError, ClientResult};
use crate::lsp::client::{DebugItem, LanguageClient, LaunchContext, Subcommand, TransportKind};
use crate::lsp::process::{ServerCommand, find_executable, find_on_path, is_executable};

pub struct PhpClient {
    settings: PhpSettings,
}

impl PhpClient {
    pub fn new(settings: PhpSettings) -> Self {
        Self { settings }
    }
}

impl LanguageClient for PhpClient {
    fn language(&self) -> &str {
        "PHP"
    }

    fn server_name(&self) -> &str {
        "PHP Language Server"
    }

    fn filetypes(&self) -> Vec<String> {
        vec!["php".to_string()]
    }

    fn transport_kind(&self) -> TransportKind {
        TransportKind::Tcp
    }

    /// `php <language-server.php> --tcp=127.0.0.1:<port>`; the server dials back.
    fn server_command(&self, context: &LaunchContext) -> ClientResult<ServerCommand> {
        let php = find_executable(self.settings.php_binary_path.as_deref(), "php", None)?;
        let script = self.settings.language_server_path.as_ref().ok_or_else(|| {
            ClientError::config("php.language_server_path is not set")
        })?;
        if !script.is_file() {
            return Err(ClientError::spawn(
                script.display().to_string(),
                "PHP Language Server is not installed",
            ));
        }
        let port = context
            .port
            .ok_or_else(|| ClientError::internal("PHP Language Server needs a listening port"))?;

        Ok(ServerCommand::new(php)
            .arg(script.display().to_string())
            .arg(format!("--tcp=127.0.0.1:{}", port)))
    }

    fn supports(&self, subcommand: &Subcommand) -> bool {
        match subcommand {
            Subcommand::GoTo
            | Subcommand::GoToDefinition
            | Subcommand::GoToDeclaration
            | Subcommand::GoToReferences
            | Subcommand::FixIt
            | Subcommand::RefactorRename { .. }
            | Subcommand::RestartServer
            | Subcommand::StopServer => true,
            Subcommand::GoToImprecise
            | Subcommand::GoToInclude
            | Subcommand::GetType
            | Subcommand::GetTypeImprecise
            | Subcommand::GetDoc => false,
        }
    }

    fn extra_debug_items(&self) -> Vec<DebugItem> {
        let php = self
            .settings
            .php_binary_path
            .clone()
            .filter(|path| is_executable(path))
            .or_else(|| find_on_path("php"));
        vec![DebugItem::new(
            "PHP executable",
            php.map_or_else(|| "None".to_string(), |path| path.display().to_string()),
        )]
    }

    fn logfile_prefix(&self) -> String {
        "php_language_server".to_string()
    }

    fn eager_start(&self) -> bool {
        true
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    fn executable(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn command_passes_tcp_address() {
        let dir = tempfile::tempdir().unwrap();
        let php = executable(dir.path(), "php");
        let script = dir.path().join("php-language-server.php");
        std::fs::write(&script, "<?php").unwrap();

        let client = PhpClient::new(PhpSettings {
            enabled: true,
            php_binary_path: Some(php.clone()),
            language_server_path: Some(script.clone()),
        });
        let context = LaunchContext {
            port: Some(41234),
            ..LaunchContext::default()
        };
        let command = client.server_command(&context).unwrap();
        assert_eq!(command.program, php);
        assert_eq!(
            command.args,
            [script.display().to_string(), "--tcp=127.0.0.1:41234".to_string()]
        );
        assert_eq!(client.transport_kind(), TransportKind::Tcp);
        assert!(client.eager_start());
    }

    #[test]
    fn missing_language_server_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let client = PhpClient::new(PhpSettings {
            enabled: true,
            php_binary_path: Some(executable(dir.path(), "php")),
            language_server_path: Some(dir.path().join("missing.php")),
        });
        let context = LaunchContext {
            port: Some(1),
            ..LaunchContext::default()
        };
        assert!(matches!(
            client.server_command(&context),
            Err(ClientError::Spawn { .. })
        ));
    }

    #[test]
    fn debug_items_name_php_executable() {
        let dir = tempfile::tempdir().unwrap();
        let php = executable(dir.path(), "php");
        let client = PhpClient::new(PhpSettings {
            enabled: true,
            php_binary_path: Some(php.clone()),
            language_server_path: None,
        });
        let items = client.extra_debug_items();
        assert_eq!(items[0].key, "PHP executable");
        assert_eq!(items[0].value, php.display().to_string());
    }
}
