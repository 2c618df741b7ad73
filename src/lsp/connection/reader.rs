//! Reader task for an external server's output stream.
//!
//! One task per connection. It opens the transport (accepting the dial-back
//! for TCP servers), then decodes frames one at a time and routes each:
//! responses to their pending slot, notifications to the sink, and
//! server-initiated requests to the request handler. A frame is fully handled
//! before the next is read, so delivery order matches wire order.
//!
//! Once the transport is open the reader also spawns the writer task. The
//! reader ends on cancellation, end-of-stream, or any framing or I/O error,
//! and always tears the connection down on its way out.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use log::{debug, error, warn};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::router::RouteOutcome;
use super::{Shared, writer};
use super::state::ConnectionState;
use crate::lsp::codec::CodecError;
use crate::lsp::protocol::{IncomingMessage, Notification, ResponseError, lifecycle};
use crate::lsp::transport::{Transport, TransportReader};

pub(super) fn spawn_reader_task(
    shared: Arc<Shared>,
    transport: Transport,
    notifications: mpsc::UnboundedSender<Notification>,
) -> JoinHandle<()> {
    tokio::spawn(run(shared, transport, notifications))
}

async fn run(
    shared: Arc<Shared>,
    transport: Transport,
    notifications: mpsc::UnboundedSender<Notification>,
) {
    let opened = tokio::select! {
        biased;
        _ = shared.cancel.cancelled() => None,
        result = transport.open() => Some(result),
    };

    let reader = match opened {
        None => {
            shared.teardown("connection closed before the server connected");
            return;
        }
        Some(Err(e)) => {
            error!(
                target: "tsunagi::connection",
                "{}: failed to open transport: {}",
                shared.name,
                e
            );
            shared.teardown(&format!("failed to open transport: {}", e));
            return;
        }
        Some(Ok((reader, write_half))) => {
            let (queue, outbound) = mpsc::unbounded_channel();
            let task = writer::spawn_writer_task(Arc::clone(&shared), write_half, outbound);
            shared.attach_writer(queue, task);
            shared.transition(ConnectionState::Connected);
            reader
        }
    };

    let reason = reader_loop(&shared, reader, &notifications).await;
    shared.teardown(&reason);
}

/// Returns the reason the loop ended.
async fn reader_loop(
    shared: &Arc<Shared>,
    mut reader: TransportReader,
    notifications: &mpsc::UnboundedSender<Notification>,
) -> String {
    loop {
        let result = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => {
                debug!(
                    target: "tsunagi::connection",
                    "{}: reader task cancelled, shutting down",
                    shared.name
                );
                return "connection closed".to_string();
            }
            result = reader.read_message() => result,
        };

        let expecting_close = shared.expecting_close.load(Ordering::Acquire);
        match result {
            Ok(Some(message)) => handle_message(shared, message, notifications),
            Ok(None) => {
                if expecting_close {
                    debug!(
                        target: "tsunagi::connection",
                        "{}: server closed its output after stop",
                        shared.name
                    );
                } else {
                    warn!(
                        target: "tsunagi::connection",
                        "{}: server closed its output unexpectedly",
                        shared.name
                    );
                }
                return "server closed the stream".to_string();
            }
            Err(CodecError::Io(e)) if expecting_close => {
                debug!(
                    target: "tsunagi::connection",
                    "{}: stream error after stop: {}",
                    shared.name,
                    e
                );
                return format!("stream error: {}", e);
            }
            Err(e) => {
                error!(
                    target: "tsunagi::connection",
                    "{}: unreadable frame, tearing down connection: {}",
                    shared.name,
                    e
                );
                return format!("unreadable frame: {}", e);
            }
        }
    }
}

fn handle_message(
    shared: &Arc<Shared>,
    message: Value,
    notifications: &mpsc::UnboundedSender<Notification>,
) {
    let message = match IncomingMessage::classify(message) {
        Ok(message) => message,
        Err(reason) => {
            debug!(
                target: "tsunagi::connection",
                "{}: dropping unclassifiable message: {}",
                shared.name,
                reason
            );
            return;
        }
    };

    match message {
        IncomingMessage::Response { id, outcome } => match shared.router.route(&id, outcome) {
            RouteOutcome::Delivered => {}
            RouteOutcome::Abandoned => debug!(
                target: "tsunagi::connection",
                "{}: discarding response {} whose caller gave up",
                shared.name,
                id
            ),
            RouteOutcome::Unknown => debug!(
                target: "tsunagi::connection",
                "{}: response for unknown request {}, dropping",
                shared.name,
                id
            ),
        },
        IncomingMessage::Notification(notification) => {
            if notifications.send(notification).is_err() {
                debug!(
                    target: "tsunagi::connection",
                    "{}: notification sink dropped, discarding",
                    shared.name
                );
            }
        }
        IncomingMessage::Request { id, method, params } => {
            let reply = match shared.handler.handle(&method, &params) {
                Some(Ok(result)) => lifecycle::response(&id, result),
                Some(Err(error)) => lifecycle::error_response(&id, &error),
                None => {
                    debug!(
                        target: "tsunagi::connection",
                        "{}: no handler for server request {}",
                        shared.name,
                        method
                    );
                    lifecycle::error_response(&id, &ResponseError::method_not_found(&method))
                }
            };
            // Queued, not awaited: the reader never waits on the writer.
            if let Err(e) = shared.enqueue(&reply) {
                debug!(
                    target: "tsunagi::connection",
                    "{}: failed to reply to {}: {}",
                    shared.name,
                    method,
                    e
                );
            }
        }
    }
}
