//! JSON-RPC message builders and the `initialize` handshake payloads.

use std::path::Path;

use serde_json::{Value, json};

use super::message::ResponseError;
use super::request_id::RequestId;
use super::uri::path_to_uri;

pub const INITIALIZE: &str = "initialize";
pub const INITIALIZED: &str = "initialized";
pub const SHUTDOWN: &str = "shutdown";
pub const EXIT: &str = "exit";

/// Build a request frame body.
///
/// Null params are omitted from the frame.
pub fn request(id: i64, method: &str, params: Value) -> Value {
    let mut message = json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method
    });
    with_params(&mut message, params);
    message
}

/// Build a notification frame body.
pub fn notification(method: &str, params: Value) -> Value {
    let mut message = json!({
        "jsonrpc": "2.0",
        "method": method
    });
    with_params(&mut message, params);
    message
}

fn with_params(message: &mut Value, params: Value) {
    if !params.is_null() {
        message["params"] = params;
    }
}

/// Build the success reply to a server-initiated request.
pub fn response(id: &RequestId, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id.to_json(),
        "result": result
    })
}

/// Build the error reply to a server-initiated request.
pub fn error_response(id: &RequestId, error: &ResponseError) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id.to_json(),
        "error": error
    })
}

/// Parameters of the `initialize` request.
///
/// `root` becomes both `rootUri` and the single workspace folder.
pub fn initialize_params(root: Option<&Path>, initialization_options: Option<Value>) -> Value {
    let root_uri = root.and_then(|p| path_to_uri(p).ok());
    let workspace_folders = match (&root_uri, root) {
        (Some(uri), Some(path)) => json!([{
            "uri": uri,
            "name": path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
        }]),
        _ => Value::Null,
    };

    json!({
        "processId": std::process::id(),
        "clientInfo": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION")
        },
        "rootUri": root_uri,
        "rootPath": root.map(|p| p.to_string_lossy().into_owned()),
        "workspaceFolders": workspace_folders,
        "initializationOptions": initialization_options,
        "capabilities": client_capabilities(),
        "trace": "off"
    })
}

fn client_capabilities() -> Value {
    json!({
        "workspace": {
            "applyEdit": true,
            "configuration": true,
            "workspaceEdit": { "documentChanges": true },
            "workspaceFolders": true
        },
        "textDocument": {
            "synchronization": { "didSave": false, "dynamicRegistration": false },
            "hover": { "contentFormat": ["plaintext", "markdown"] },
            "definition": { "linkSupport": true },
            "declaration": { "linkSupport": true },
            "references": {},
            "rename": { "prepareSupport": false },
            "codeAction": {
                "codeActionLiteralSupport": {
                    "codeActionKind": { "valueSet": ["", "quickfix", "refactor", "source"] }
                }
            },
            "publishDiagnostics": { "relatedInformation": true }
        },
        "window": { "workDoneProgress": true }
    })
}

/// Check the result of `initialize`.
///
/// Accepts any object; the `capabilities` member is returned when present.
pub fn validate_initialize_result(result: &Value) -> Result<Value, String> {
    match result {
        Value::Object(object) => Ok(object.get("capabilities").cloned().unwrap_or(Value::Null)),
        Value::Null => Err("initialize response missing valid result".to_string()),
        other => Err(format!("initialize result is not an object: {}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn request_has_correct_structure() {
        let message = request(9, SHUTDOWN, Value::Null);
        assert_eq!(message["jsonrpc"], "2.0");
        assert_eq!(message["id"], 9);
        assert_eq!(message["method"], "shutdown");
        assert!(message.get("params").is_none());
    }

    #[test]
    fn notification_has_no_id() {
        let message = notification(INITIALIZED, json!({}));
        assert_eq!(message["method"], "initialized");
        assert!(message["params"].is_object());
        assert!(message.get("id").is_none());
    }

    #[test]
    fn response_echoes_string_id() {
        let message = response(&RequestId::String("abc".into()), json!([null]));
        assert_eq!(message["id"], "abc");
        assert_eq!(message["result"], json!([null]));
    }

    #[test]
    fn error_response_carries_code_and_message() {
        let message = error_response(
            &RequestId::Number(3),
            &ResponseError::method_not_found("window/showDocument"),
        );
        assert_eq!(message["id"], 3);
        assert_eq!(message["error"]["code"], -32601);
        assert!(message["error"]["message"].as_str().unwrap().contains("window/showDocument"));
        assert!(message.get("result").is_none());
    }

    #[test]
    fn initialize_params_include_root_and_options() {
        let dir = tempfile::tempdir().unwrap();
        let options = json!({"cache": {"directory": "/tmp"}});
        let params = initialize_params(Some(dir.path()), Some(options.clone()));

        assert!(params["processId"].as_u64().is_some());
        assert!(params["rootUri"].as_str().unwrap().starts_with("file://"));
        assert_eq!(params["workspaceFolders"].as_array().map(Vec::len), Some(1));
        assert_eq!(params["initializationOptions"], options);
        assert_eq!(params["capabilities"]["window"]["workDoneProgress"], true);
    }

    #[test]
    fn initialize_params_without_root() {
        let params = initialize_params(None, None);
        assert!(params["rootUri"].is_null());
        assert!(params["workspaceFolders"].is_null());
        assert!(params["initializationOptions"].is_null());
    }

    #[rstest]
    #[case::with_capabilities(json!({"capabilities": {"hoverProvider": true}}), true)]
    #[case::empty_object(json!({}), true)]
    #[case::null(Value::Null, false)]
    #[case::array(json!([]), false)]
    fn validate_initialize_result_cases(#[case] result: Value, #[case] ok: bool) {
        assert_eq!(validate_initialize_result(&result).is_ok(), ok);
    }
}
