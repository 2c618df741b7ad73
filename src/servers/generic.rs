//! User-defined servers from `[[servers]]` entries.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::config::{GenericServerSettings, TransportSetting};
use crate::error::{ClientError, ClientResult};
use crate::lsp::client::language::find_project_root;
use crate::lsp::client::{LanguageClient, LaunchContext, Subcommand, TransportKind};
use crate::lsp::process::{ServerCommand, find_executable};

/// Replaced by the listening port in TCP-mode commands.
pub const PORT_PLACEHOLDER: &str = "{port}";

pub struct GenericClient {
    settings: GenericServerSettings,
}

impl GenericClient {
    pub fn new(settings: GenericServerSettings) -> Self {
        Self { settings }
    }
}

impl LanguageClient for GenericClient {
    fn language(&self) -> &str {
        &self.settings.name
    }

    fn server_name(&self) -> &str {
        &self.settings.name
    }

    fn filetypes(&self) -> Vec<String> {
        self.settings.filetypes.clone()
    }

    fn transport_kind(&self) -> TransportKind {
        match self.settings.transport {
            TransportSetting::Stdio => TransportKind::Stdio,
            TransportSetting::Tcp => TransportKind::Tcp,
        }
    }

    fn server_command(&self, context: &LaunchContext) -> ClientResult<ServerCommand> {
        let (program, args) = self
            .settings
            .cmd
            .split_first()
            .ok_or_else(|| ClientError::config(format!("server {} has an empty cmd", self.settings.name)))?;
        let program = find_executable(None, program, None)?;

        let port = context.port.map(|port| port.to_string());
        let args = args.iter().map(|arg| match &port {
            Some(port) => arg.replace(PORT_PLACEHOLDER, port),
            None => arg.clone(),
        });

        let mut command = ServerCommand::new(program).args(args);
        let mut env: Vec<_> = self.settings.env.iter().collect();
        env.sort();
        for (key, value) in env {
            command = command.env(key.clone(), value.clone());
        }
        if let Some(root) = &context.project_root {
            command = command.current_dir(root);
        }
        Ok(command)
    }

    fn supports(&self, _subcommand: &Subcommand) -> bool {
        true
    }

    fn project_directory(&self, file: Option<&Path>) -> Option<PathBuf> {
        let file = file?;
        find_project_root(file, &self.settings.project_root_files)
            .or_else(|| file.parent().map(Path::to_path_buf))
    }

    fn initialization_options(&self) -> Option<Value> {
        self.settings.initialization_options.clone()
    }

    fn eager_start(&self) -> bool {
        self.settings.start_eagerly
    }
}
