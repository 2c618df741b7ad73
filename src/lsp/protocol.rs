//! JSON-RPC / LSP protocol types and message builders.

pub mod lifecycle;
pub mod message;
pub mod position;
pub mod request_id;
pub mod uri;

pub use message::{IncomingMessage, Notification, ResponseError, error_codes};
pub use position::{LineColumn, from_lsp_position, to_lsp_position};
pub use request_id::RequestId;
pub use uri::{path_to_uri, uri_to_path};
