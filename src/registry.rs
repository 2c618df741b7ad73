//! Filetype → client lookup for every configured server.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::config::Settings;
use crate::lsp::client::{LanguageClient, LanguageServerClient};
use crate::servers::{ClangdClient, GenericClient, PhpClient, RustClient};

/// One client per enabled server, shared by all of its filetypes.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: Vec<LanguageServerClient>,
    by_filetype: HashMap<String, usize>,
}

impl ClientRegistry {
    /// Build clients for every enabled server in `settings`.
    ///
    /// User-defined servers are registered first, so they take precedence
    /// over the built-in ones for shared filetypes.
    pub fn from_settings(settings: &Settings) -> Self {
        let mut languages: Vec<Arc<dyn LanguageClient>> = Vec::new();
        for server in &settings.servers {
            languages.push(Arc::new(GenericClient::new(server.clone())));
        }
        if settings.clangd.enabled {
            languages.push(Arc::new(ClangdClient::new(settings.clangd.clone())));
        }
        if settings.rust.enabled {
            languages.push(Arc::new(RustClient::new(settings.rust.clone())));
        }
        if settings.php.enabled {
            languages.push(Arc::new(PhpClient::new(settings.php.clone())));
        }

        let mut registry = Self::default();
        for language in languages {
            registry.register(LanguageServerClient::new(language, settings.global.clone()));
        }
        registry
    }

    /// Add a client. Filetypes already claimed keep their first client.
    pub fn register(&mut self, client: LanguageServerClient) {
        let index = self.clients.len();
        for filetype in client.language().filetypes() {
            match self.by_filetype.get(&filetype) {
                Some(&existing) => warn!(
                    target: "tsunagi::registry",
                    "{} already handles {}; ignoring {}",
                    self.clients[existing].server_name(),
                    filetype,
                    client.server_name()
                ),
                None => {
                    self.by_filetype.insert(filetype, index);
                }
            }
        }
        debug!(target: "tsunagi::registry", "Registered {}", client.server_name());
        self.clients.push(client);
    }

    pub fn client_for_filetype(&self, filetype: &str) -> Option<&LanguageServerClient> {
        self.by_filetype.get(filetype).map(|&index| &self.clients[index])
    }

    pub fn clients(&self) -> &[LanguageServerClient] {
        &self.clients
    }

    pub fn filetypes(&self) -> Vec<&str> {
        let mut filetypes: Vec<&str> = self.by_filetype.keys().map(String::as_str).collect();
        filetypes.sort_unstable();
        filetypes
    }

    /// Start every server that asks to be started eagerly. Failures are logged.
    pub async fn start_eager(&self) {
        for client in self.clients.iter().filter(|c| c.language().eager_start()) {
            if let Err(e) = client.start_server().await {
                error!(
                    target: "tsunagi::registry",
                    "Failed to start {}: {}",
                    client.server_name(),
                    e
                );
            }
        }
    }

    /// Stop every server in parallel.
    pub async fn shutdown_all(&self) {
        let mut join_set = tokio::task::JoinSet::new();
        for client in &self.clients {
            let client = client.clone();
            join_set.spawn(async move { client.stop_server().await });
        }
        while let Some(result) = join_set.join_next().await {
            if let Err(e) = result {
                error!(target: "tsunagi::registry", "Server shutdown task panicked: {}", e);
            }
        }
        info!(target: "tsunagi::registry", "All servers stopped");
    }

    /// Drop cached launch commands, e.g. after the settings file changed.
    pub fn invalidate_command_caches(&self) {
        for client in &self.clients {
            client.language().invalidate_command_cache();
        }
    }
}
