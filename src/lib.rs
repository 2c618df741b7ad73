pub mod config;
pub mod error;
pub mod lsp;
pub mod registry;
pub mod servers;

pub use config::Settings;
pub use error::{ClientError, ClientResult};
pub use lsp::client::{
    DebugInfo, FileRequest, LanguageClient, LanguageServerClient, Subcommand, SubcommandResponse,
};
pub use registry::ClientRegistry;
