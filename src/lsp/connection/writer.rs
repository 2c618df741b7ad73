//! Writer task for the server's input stream.
//!
//! Callers enqueue complete frames and this task writes them one at a time, in
//! queue order. A frame is owned by the task once queued, so a caller that
//! stops waiting can never leave half a frame on the wire.
//!
//! The task ends on cancellation, when the queue is closed by teardown, or on
//! the first failed write, which tears the connection down.

use std::sync::Arc;

use log::{debug, error};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::Shared;
use crate::error::{ClientError, ClientResult};
use crate::lsp::transport::TransportWriter;

/// One encoded frame and the caller waiting for it to be written.
pub(super) struct Outbound {
    pub(super) frame: Vec<u8>,
    pub(super) written: oneshot::Sender<ClientResult<()>>,
}

pub(super) fn spawn_writer_task(
    shared: Arc<Shared>,
    writer: TransportWriter,
    queue: mpsc::UnboundedReceiver<Outbound>,
) -> JoinHandle<()> {
    tokio::spawn(run(shared, writer, queue))
}

async fn run(
    shared: Arc<Shared>,
    mut writer: TransportWriter,
    mut queue: mpsc::UnboundedReceiver<Outbound>,
) {
    loop {
        let outbound = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            next = queue.recv() => match next {
                Some(outbound) => outbound,
                None => break,
            },
        };

        let result = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => {
                let _ = outbound.written.send(Err(shared.closed_error()));
                break;
            }
            result = writer.write_frame(&outbound.frame) => result,
        };

        match result {
            Ok(()) => {
                let _ = outbound.written.send(Ok(()));
            }
            Err(e) => {
                error!(
                    target: "tsunagi::connection",
                    "{}: write failed, tearing down connection: {}",
                    shared.name,
                    e
                );
                let reason = format!("write failed: {}", e);
                let _ = outbound.written.send(Err(ClientError::from(e)));
                shared.teardown(&reason);
                break;
            }
        }
    }

    // Frames still queued are never written.
    queue.close();
    let mut dropped = 0usize;
    while let Ok(outbound) = queue.try_recv() {
        let _ = outbound.written.send(Err(shared.closed_error()));
        dropped += 1;
    }
    if dropped > 0 {
        debug!(
            target: "tsunagi::connection",
            "{}: dropped {} unwritten frame(s)",
            shared.name,
            dropped
        );
    }
    writer.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lsp::codec;
    use crate::lsp::connection::{ConnectionState, NoServerRequests};
    use crate::lsp::transport::Transport;
    use serde_json::json;
    use std::time::Duration;
    use tokio::io::BufReader;

    async fn open_writer(
        capacity: usize,
    ) -> (TransportWriter, tokio::io::DuplexStream) {
        let (client, server) = tokio::io::duplex(capacity);
        let (client_read, client_write) = tokio::io::split(client);
        let (_, writer) = Transport::from_streams(client_read, client_write)
            .open()
            .await
            .unwrap();
        (writer, server)
    }

    fn frame(method: &str) -> Vec<u8> {
        codec::encode(&json!({"jsonrpc": "2.0", "method": method})).unwrap()
    }

    #[tokio::test]
    async fn frames_are_written_in_queue_order() {
        let shared = Shared::new("writer", Arc::new(NoServerRequests));
        let (writer, server) = open_writer(1024).await;
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = spawn_writer_task(Arc::clone(&shared), writer, rx);

        let mut acks = Vec::new();
        for method in ["a", "b", "c"] {
            let (written, ack) = oneshot::channel();
            tx.send(Outbound {
                frame: frame(method),
                written,
            })
            .unwrap();
            acks.push(ack);
        }
        for ack in acks {
            ack.await.unwrap().unwrap();
        }
        drop(tx);
        handle.await.unwrap();

        let mut reader = BufReader::new(server);
        for method in ["a", "b", "c"] {
            let message = codec::read_message(&mut reader).await.unwrap().unwrap();
            assert_eq!(message["method"], method);
        }
        assert!(codec::read_message(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cancellation_unblocks_a_stalled_write() {
        let shared = Shared::new("writer", Arc::new(NoServerRequests));
        // The peer never reads, so a frame larger than the buffer stalls.
        let (writer, _server) = open_writer(64).await;
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = spawn_writer_task(Arc::clone(&shared), writer, rx);

        let (written, stalled) = oneshot::channel();
        tx.send(Outbound {
            frame: vec![b'x'; 16 * 1024],
            written,
        })
        .unwrap();
        let (written, queued) = oneshot::channel();
        tx.send(Outbound {
            frame: frame("queued"),
            written,
        })
        .unwrap();

        shared.cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();

        assert!(matches!(
            stalled.await.unwrap(),
            Err(ClientError::ConnectionClosed { .. })
        ));
        assert!(matches!(
            queued.await.unwrap(),
            Err(ClientError::ConnectionClosed { .. })
        ));
    }

    #[tokio::test]
    async fn failed_write_tears_the_connection_down() {
        let shared = Shared::new("writer", Arc::new(NoServerRequests));
        let (writer, server) = open_writer(1024).await;
        drop(server);
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = spawn_writer_task(Arc::clone(&shared), writer, rx);

        let (written, ack) = oneshot::channel();
        tx.send(Outbound {
            frame: frame("lost"),
            written,
        })
        .unwrap();

        assert!(ack.await.unwrap().is_err());
        handle.await.unwrap();
        assert_eq!(shared.state(), ConnectionState::Closed);
        assert!(shared.cancel.is_cancelled());
    }
}
