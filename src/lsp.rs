pub mod client;
pub mod codec;
pub mod connection;
pub mod process;
pub mod protocol;
pub mod transport;

pub use client::{ClientState, LanguageClient, LanguageServerClient};
pub use connection::{Connection, ConnectionState, ServerRequestHandler};
pub use process::{ServerCommand, ServerProcess};
pub use transport::Transport;
