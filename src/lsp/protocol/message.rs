//! Classification of decoded JSON-RPC messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::request_id::RequestId;

/// Standard JSON-RPC error codes used by the client.
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    pub const REQUEST_CANCELLED: i64 = -32800;
}

/// A JSON-RPC `error` object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ResponseError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            error_codes::METHOD_NOT_FOUND,
            format!("Method not found: {}", method),
        )
    }
}

/// A one-way message from the server.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: String,
    pub params: Value,
}

/// A decoded message sorted by kind.
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingMessage {
    /// Reply to one of our requests.
    Response {
        id: RequestId,
        outcome: Result<Value, ResponseError>,
    },
    /// A request the server expects us to answer exactly once.
    Request {
        id: RequestId,
        method: String,
        params: Value,
    },
    Notification(Notification),
}

impl IncomingMessage {
    /// Sort a decoded body into one of the three message kinds.
    ///
    /// Bodies that fit none of them are returned as `Err` with a short reason;
    /// the caller logs and drops those.
    pub fn classify(mut message: Value) -> Result<Self, &'static str> {
        let Some(object) = message.as_object_mut() else {
            return Err("message is not a JSON object");
        };

        let method = match object.remove("method") {
            Some(Value::String(method)) => Some(method),
            Some(_) => return Err("method is not a string"),
            None => None,
        };
        let params = object.remove("params").unwrap_or(Value::Null);
        let has_id = object.contains_key("id");

        let id = if has_id {
            Some(RequestId::from_json(&message).ok_or("id is null or not a number/string")?)
        } else {
            None
        };

        match (id, method) {
            (Some(id), Some(method)) => Ok(IncomingMessage::Request { id, method, params }),
            (None, Some(method)) => Ok(IncomingMessage::Notification(Notification { method, params })),
            (Some(id), None) => {
                let object = message.as_object_mut().ok_or("message is not a JSON object")?;
                let error = object.remove("error").filter(|e| !e.is_null());
                let outcome = match error {
                    Some(error) => Err(serde_json::from_value(error).unwrap_or_else(|e| {
                        ResponseError::new(
                            error_codes::INTERNAL_ERROR,
                            format!("malformed error object: {}", e),
                        )
                    })),
                    None => match object.remove("result") {
                        Some(result) => Ok(result),
                        None => return Err("response has neither result nor error"),
                    },
                };
                Ok(IncomingMessage::Response { id, outcome })
            }
            (None, None) => Err("message has neither id nor method"),
        }
    }
}
