//! Error handling types for tsunagi
//!
//! One error enum covers the whole client stack: process spawning, the wire
//! codec, the connection engine and the per-server state machine.

use std::sync::PoisonError;
use std::time::Duration;
use thiserror::Error;

/// Comprehensive error type for language server client operations
#[derive(Debug, Error)]
pub enum ClientError {
    /// The server executable is missing or could not be started
    #[error("Failed to spawn {command}: {message}")]
    Spawn { command: String, message: String },

    /// The server did not connect or answer `initialize` in time
    #[error("Timed out waiting for {server} to {phase} after {timeout:?}")]
    ConnectionTimeout {
        server: String,
        phase: &'static str,
        timeout: Duration,
    },

    /// A frame header was missing, malformed or oversized
    #[error("Framing error: {message}")]
    Framing { message: String },

    /// A frame body was not valid JSON
    #[error("Parse error: {message}")]
    Parse { message: String },

    /// The connection closed while the request was outstanding
    #[error("Connection closed: {reason}")]
    ConnectionClosed { reason: String },

    /// The server is not in the Ready state
    #[error("Server is not ready: {server} is {state}")]
    ServerNotReady { server: String, state: String },

    /// A start or restart is already in flight
    #[error("{server} is already starting")]
    AlreadyStarting { server: String },

    /// The caller's own bound on a request expired
    #[error("Request {method} timed out after {timeout:?}")]
    RequestTimeout { method: String, timeout: Duration },

    /// The server process did not exit within the bound
    #[error("Process {pid} did not terminate within {timeout:?}")]
    TerminationTimeout { pid: u32, timeout: Duration },

    /// JSON-RPC error object returned by the server
    #[error("{message}")]
    Server { code: i64, message: String },

    /// The server answered but had nothing useful to say
    #[error("{0}")]
    NoResult(String),

    /// The subcommand exists but this server does not support it
    #[error("Subcommand {subcommand} is not supported by {server}")]
    UnsupportedSubcommand { subcommand: String, server: String },

    /// The subcommand name is not recognised
    #[error("Unknown subcommand: {0}")]
    UnknownSubcommand(String),

    /// A newer parse request superseded this one
    #[error("Parse request {ticket} was superseded by {latest}")]
    StaleParse { ticket: u64, latest: u64 },

    /// Configuration error
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Helper trait to recover from poisoned `std::sync` locks.
pub trait LockResultExt<T> {
    /// Recover the guard of a poisoned lock, logging which operation hit it.
    fn recover_poison(self, context: &str) -> T;
}

impl<T> LockResultExt<T> for Result<T, PoisonError<T>> {
    fn recover_poison(self, context: &str) -> T {
        match self {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!(
                    target: "tsunagi::lock_recovery",
                    "Recovered from poisoned lock in {}",
                    context
                );
                poisoned.into_inner()
            }
        }
    }
}

/// Helper functions for common error patterns
impl ClientError {
    /// Create a spawn error
    pub fn spawn(command: impl Into<String>, message: impl Into<String>) -> Self {
        ClientError::Spawn {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Create a connection timeout error
    pub fn connection_timeout(
        server: impl Into<String>,
        phase: &'static str,
        timeout: Duration,
    ) -> Self {
        ClientError::ConnectionTimeout {
            server: server.into(),
            phase,
            timeout,
        }
    }

    /// Create a framing error
    pub fn framing(message: impl Into<String>) -> Self {
        ClientError::Framing {
            message: message.into(),
        }
    }

    /// Create a connection closed error
    pub fn connection_closed(reason: impl Into<String>) -> Self {
        ClientError::ConnectionClosed {
            reason: reason.into(),
        }
    }

    /// Create a server-not-ready error
    pub fn not_ready(server: impl Into<String>, state: impl std::fmt::Display) -> Self {
        ClientError::ServerNotReady {
            server: server.into(),
            state: state.to_string(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        ClientError::Config {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        ClientError::Internal(message.into())
    }

    /// Whether the caller should poll and retry rather than report a failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::ServerNotReady { .. }
                | ClientError::AlreadyStarting { .. }
                | ClientError::RequestTimeout { .. }
                | ClientError::StaleParse { .. }
        )
    }

    /// Whether this error means the connection can no longer be used.
    pub fn is_fatal_to_connection(&self) -> bool {
        matches!(
            self,
            ClientError::Framing { .. }
                | ClientError::Parse { .. }
                | ClientError::ConnectionClosed { .. }
                | ClientError::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn retryable_errors_are_the_poll_class() {
        assert!(ClientError::not_ready("clangd", "Stopped").is_retryable());
        assert!(
            ClientError::AlreadyStarting {
                server: "rls".into()
            }
            .is_retryable()
        );
        assert!(
            ClientError::RequestTimeout {
                method: "textDocument/hover".into(),
                timeout: Duration::from_secs(1),
            }
            .is_retryable()
        );
        assert!(!ClientError::connection_closed("eof").is_retryable());
        assert!(!ClientError::spawn("clangd", "not found").is_retryable());
    }

    #[test]
    fn framing_and_closure_are_fatal_to_connection() {
        assert!(ClientError::framing("missing Content-Length").is_fatal_to_connection());
        assert!(ClientError::connection_closed("eof").is_fatal_to_connection());
        assert!(!ClientError::NoResult("Cannot jump to location".into()).is_fatal_to_connection());
    }

    #[test]
    fn server_error_displays_message_verbatim() {
        let err = ClientError::Server {
            code: -32602,
            message: "No references found".into(),
        };
        assert_eq!(err.to_string(), "No references found");
    }

    #[test]
    fn recover_poison_returns_inner_guard() {
        let lock = Arc::new(Mutex::new(5));
        let poisoner = Arc::clone(&lock);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("poison the lock");
        })
        .join();

        assert!(lock.is_poisoned());
        let guard = lock.lock().recover_poison("test");
        assert_eq!(*guard, 5);
    }
}
