//! clangd for the C family.

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use arc_swap::ArcSwap;
use log::{debug, info, warn};
use regex::Regex;

use crate::config::ClangdSettings;
use crate::error::{ClientError, ClientResult};
use crate::lsp::client::{DebugItem, LanguageClient, LaunchContext, Subcommand};
use crate::lsp::process::{ServerCommand, find_on_path, is_executable};

/// Oldest clangd release we accept from `PATH`.
pub const MIN_SUPPORTED_VERSION: (u32, u32, u32) = (7, 0, 0);

static VERSION_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(\d+)\.(\d+)\.(\d+)").ok());

/// Parse the first `major.minor.patch` triple out of `clangd --version` output.
pub fn parse_version(output: &str) -> Option<(u32, u32, u32)> {
    let captures = VERSION_PATTERN.as_ref()?.captures(output)?;
    let part = |i: usize| -> Option<u32> { captures.get(i)?.as_str().parse().ok() };
    Some((part(1)?, part(2)?, part(3)?))
}

fn installed_version(clangd: &Path) -> Option<(u32, u32, u32)> {
    let output = std::process::Command::new(clangd)
        .arg("--version")
        .output()
        .ok()?;
    parse_version(&String::from_utf8_lossy(&output.stdout))
}

/// Launch command computed once and reused until invalidated.
///
/// Resolving it probes `clangd --version`, so it is not repeated on every start.
#[derive(Default)]
pub struct CommandCache {
    command: ArcSwap<Option<ServerCommand>>,
}

impl CommandCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_try_init(
        &self,
        compute: impl FnOnce() -> ClientResult<ServerCommand>,
    ) -> ClientResult<ServerCommand> {
        if let Some(command) = self.command.load().as_ref() {
            return Ok(command.clone());
        }
        let command = compute()?;
        self.command.store(Arc::new(Some(command.clone())));
        Ok(command)
    }

    pub fn is_cached(&self) -> bool {
        self.command.load().is_some()
    }

    pub fn invalidate(&self) {
        self.command.store(Arc::new(None));
    }
}

/// Build the clangd command line from settings.
///
/// A configured binary is used as is. Otherwise `clangd` from `PATH` is used
/// when it is recent enough (custom builds without a parsable version are
/// accepted), and the bundled binary with its resource directory is the
/// last resort.
pub fn resolve_command(settings: &ClangdSettings) -> ClientResult<ServerCommand> {
    let mut resource_dir = None;
    let binary = match &settings.binary_path {
        Some(configured) => configured.clone(),
        None => match find_on_path("clangd").filter(|found| is_supported(found)) {
            Some(found) => found,
            None => {
                let bundled = settings.bundled_binary_path.clone().ok_or_else(|| {
                    ClientError::spawn("clangd", "no supported clangd on PATH and no bundled binary")
                })?;
                resource_dir = settings.resource_dir.clone();
                bundled
            }
        },
    };
    if !is_executable(&binary) {
        return Err(ClientError::spawn(
            binary.display().to_string(),
            "does not exist or is not executable",
        ));
    }

    let mut command = ServerCommand::new(binary);
    if let Some(dir) = resource_dir {
        command = command.arg(format!("-resource-dir={}", dir.display()));
    }
    if settings.uses_ycmd_caching {
        command = command.arg(format!("-limit-results={}", settings.limit_results));
    }
    Ok(command.args(settings.args.iter().cloned()))
}

fn is_supported(clangd: &Path) -> bool {
    match installed_version(clangd) {
        Some(version) if version < MIN_SUPPORTED_VERSION => {
            warn!(
                target: "tsunagi::servers",
                "{} is version {}.{}.{}, which is not supported; trying the bundled binary",
                clangd.display(),
                version.0,
                version.1,
                version.2
            );
            false
        }
        Some(_) => true,
        None => {
            debug!(
                target: "tsunagi::servers",
                "Cannot parse the version of {}, assuming a custom build",
                clangd.display()
            );
            true
        }
    }
}

pub struct ClangdClient {
    settings: ClangdSettings,
    commands: CommandCache,
}

impl ClangdClient {
    pub fn new(settings: ClangdSettings) -> Self {
        Self {
            settings,
            commands: CommandCache::new(),
        }
    }
}

impl LanguageClient for ClangdClient {
    fn language(&self) -> &str {
        "C-family"
    }

    fn server_name(&self) -> &str {
        "clangd"
    }

    fn filetypes(&self) -> Vec<String> {
        ["c", "cpp", "objc", "objcpp", "cuda"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    fn server_command(&self, _context: &LaunchContext) -> ClientResult<ServerCommand> {
        self.commands.get_or_try_init(|| {
            let command = resolve_command(&self.settings)?;
            info!(target: "tsunagi::servers", "Using clangd command: {}", command.display());
            Ok(command)
        })
    }

    fn supports(&self, subcommand: &Subcommand) -> bool {
        match subcommand {
            Subcommand::GoTo
            | Subcommand::GoToDefinition
            | Subcommand::GoToDeclaration
            | Subcommand::GoToImprecise
            | Subcommand::GoToInclude
            | Subcommand::GoToReferences
            | Subcommand::GetType
            | Subcommand::GetTypeImprecise
            | Subcommand::FixIt
            | Subcommand::RefactorRename { .. }
            | Subcommand::RestartServer
            | Subcommand::StopServer => true,
            Subcommand::GetDoc => false,
        }
    }

    fn extra_debug_items(&self) -> Vec<DebugItem> {
        vec![DebugItem::new(
            "Limit results",
            if self.settings.uses_ycmd_caching {
                self.settings.limit_results.to_string()
            } else {
                "unbounded".to_string()
            },
        )]
    }

    fn invalidate_command_cache(&self) {
        self.commands.invalidate();
    }
}
