//! Replies to requests initiated by the server.

use std::sync::Arc;

use log::debug;
use serde_json::{Value, json};

use super::language::LanguageClient;
use crate::lsp::connection::ServerRequestHandler;
use crate::lsp::protocol::ResponseError;

/// Asks the language hook first, then falls back to the built-in replies.
pub struct ClientRequestHandler {
    language: Arc<dyn LanguageClient>,
}

impl ClientRequestHandler {
    pub fn new(language: Arc<dyn LanguageClient>) -> Self {
        Self { language }
    }
}

/// Replies every client gives unless a language overrides them.
pub fn builtin_reply(method: &str, params: &Value) -> Option<Result<Value, ResponseError>> {
    let result = match method {
        "workspace/configuration" => {
            let count = params
                .get("items")
                .and_then(Value::as_array)
                .map_or(0, Vec::len);
            Value::Array(vec![Value::Null; count])
        }
        "client/registerCapability"
        | "client/unregisterCapability"
        | "window/workDoneProgress/create" => Value::Null,
        "workspace/applyEdit" => json!({ "applied": true }),
        _ => return None,
    };
    Some(Ok(result))
}

impl ServerRequestHandler for ClientRequestHandler {
    fn handle(&self, method: &str, params: &Value) -> Option<Result<Value, ResponseError>> {
        if let Some(reply) = self.language.handle_server_request(method, params) {
            return Some(reply);
        }
        let reply = builtin_reply(method, params);
        if reply.is_none() {
            debug!(
                target: "tsunagi::client",
                "{}: no handler for server request {}",
                self.language.server_name(),
                method
            );
        }
        reply
    }
}
