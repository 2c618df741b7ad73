//! Connection engine for one external language server.
//!
//! A [`Connection`] multiplexes concurrent requests and notifications over a
//! single [`Transport`]. Callers suspend in [`Connection::send_request`] until
//! their specific response arrives; a background reader task (see [`reader`])
//! decodes frames and dispatches them in wire order.
//!
//! Outbound frames are encoded by the caller and queued to a single writer
//! task (see [`writer`]), so frames never interleave and a caller that gives
//! up never cuts one short. The pending-request table has its own lock.

pub mod router;
pub mod state;

mod reader;
mod writer;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use log::{debug, error, info};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{ClientError, ClientResult, LockResultExt};
use crate::lsp::codec;
use crate::lsp::protocol::{Notification, RequestId, ResponseError, lifecycle};
use crate::lsp::transport::Transport;
use router::{Resolution, ResponseRouter};
pub use state::ConnectionState;
use writer::Outbound;

/// Answers requests initiated by the server.
///
/// Called on the reader task, in wire order. Returning `None` makes the
/// connection reply with a method-not-found error.
pub trait ServerRequestHandler: Send + Sync {
    fn handle(&self, method: &str, params: &Value) -> Option<Result<Value, ResponseError>>;
}

/// Handler that answers nothing.
pub struct NoServerRequests;

impl ServerRequestHandler for NoServerRequests {
    fn handle(&self, _method: &str, _params: &Value) -> Option<Result<Value, ResponseError>> {
        None
    }
}

/// State shared between the connection handle and its reader and writer tasks.
pub(crate) struct Shared {
    name: String,
    /// Queue to the writer task; `None` until connected and after teardown.
    outbound: std::sync::Mutex<Option<mpsc::UnboundedSender<Outbound>>>,
    writer_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    router: ResponseRouter,
    state: watch::Sender<ConnectionState>,
    expecting_close: AtomicBool,
    handler: Arc<dyn ServerRequestHandler>,
    cancel: CancellationToken,
}

impl Shared {
    fn new(name: impl Into<String>, handler: Arc<dyn ServerRequestHandler>) -> Arc<Self> {
        let (state, _) = watch::channel(ConnectionState::Unstarted);
        Arc::new(Self {
            name: name.into(),
            outbound: std::sync::Mutex::new(None),
            writer_task: std::sync::Mutex::new(None),
            router: ResponseRouter::new(),
            state,
            expecting_close: AtomicBool::new(false),
            handler,
            cancel: CancellationToken::new(),
        })
    }

    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Apply a legal transition; illegal ones are ignored.
    fn transition(&self, next: ConnectionState) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if current.can_transition_to(next) {
                *current = next;
                true
            } else {
                false
            }
        });
        if changed {
            debug!(
                target: "tsunagi::connection",
                "{}: connection is now {}",
                self.name,
                next
            );
        }
        changed
    }

    fn closed_error(&self) -> ClientError {
        ClientError::connection_closed(format!("{} is {}", self.name, self.state()))
    }

    /// Hand the writer task's queue over once the transport is open.
    fn attach_writer(&self, queue: mpsc::UnboundedSender<Outbound>, task: JoinHandle<()>) {
        *self.outbound.lock().recover_poison("Shared::attach_writer") = Some(queue);
        *self.writer_task.lock().recover_poison("Shared::attach_writer") = Some(task);
    }

    /// Encode `message` and queue it for the writer task.
    ///
    /// Never waits. The returned receiver resolves once the frame is fully
    /// written, or with an error if it never will be.
    fn enqueue(&self, message: &Value) -> ClientResult<oneshot::Receiver<ClientResult<()>>> {
        let frame = codec::encode(message)?;
        let (written, ack) = oneshot::channel();
        let outbound = self.outbound.lock().recover_poison("Shared::enqueue");
        let Some(queue) = outbound.as_ref() else {
            return Err(self.closed_error());
        };
        queue
            .send(Outbound { frame, written })
            .map_err(|_| self.closed_error())?;
        Ok(ack)
    }

    /// Queue `message` and wait until it is on the wire.
    async fn write(&self, message: &Value) -> ClientResult<()> {
        let ack = self.enqueue(message)?;
        Self::written(ack, || self.closed_error()).await
    }

    async fn written(
        ack: oneshot::Receiver<ClientResult<()>>,
        closed: impl FnOnce() -> ClientError,
    ) -> ClientResult<()> {
        ack.await.unwrap_or_else(|_| Err(closed()))
    }

    /// Resolve pending work, mark Closed and stop the writer. Idempotent.
    ///
    /// Never waits: the writer task half-closes the stream on its way out.
    fn teardown(&self, reason: &str) {
        let failed = self.router.fail_all(reason);
        if failed > 0 {
            debug!(
                target: "tsunagi::connection",
                "{}: cancelled {} pending request(s): {}",
                self.name,
                failed,
                reason
            );
        }
        self.transition(ConnectionState::Closed);
        self.outbound.lock().recover_poison("Shared::teardown").take();
        self.cancel.cancel();
    }
}

/// Handle to a connection. Dropping it cancels the reader and writer tasks.
pub struct Connection {
    shared: Arc<Shared>,
    next_id: AtomicI64,
    transport: std::sync::Mutex<Option<Transport>>,
    notifications: std::sync::Mutex<Option<mpsc::UnboundedSender<Notification>>>,
    reader: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Create an unstarted connection and the receiver of its notifications.
    pub fn new(
        name: impl Into<String>,
        transport: Transport,
        handler: Arc<dyn ServerRequestHandler>,
    ) -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (notification_tx, notification_rx) = mpsc::unbounded_channel();

        let connection = Self {
            shared: Shared::new(name, handler),
            next_id: AtomicI64::new(1),
            transport: std::sync::Mutex::new(Some(transport)),
            notifications: std::sync::Mutex::new(Some(notification_tx)),
            reader: std::sync::Mutex::new(None),
        };
        (connection, notification_rx)
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Number of requests still waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.shared.router.pending_count()
    }

    /// Launch the background reader task.
    ///
    /// Precondition: called at most once. A second call returns an internal
    /// error and leaves the running reader untouched.
    pub fn start(&self) -> ClientResult<()> {
        let transport = self.transport.lock().recover_poison("Connection::start").take();
        let notifications = self
            .notifications
            .lock()
            .recover_poison("Connection::start")
            .take();
        let (Some(transport), Some(notifications)) = (transport, notifications) else {
            return Err(ClientError::internal(format!(
                "connection {} was already started",
                self.shared.name
            )));
        };

        if !self.shared.transition(ConnectionState::Starting) {
            return Err(ClientError::connection_closed(format!(
                "{} is {}",
                self.shared.name,
                self.state()
            )));
        }

        let handle = reader::spawn_reader_task(Arc::clone(&self.shared), transport, notifications);
        *self.reader.lock().recover_poison("Connection::start") = Some(handle);
        Ok(())
    }

    /// Wait until the transport is connected, bounded by `timeout`.
    pub async fn await_server_connection(&self, timeout: Duration) -> ClientResult<()> {
        let mut rx = self.shared.state.subscribe();
        let waited = tokio::time::timeout(
            timeout,
            rx.wait_for(|s| !matches!(s, ConnectionState::Unstarted | ConnectionState::Starting)),
        )
        .await;

        match waited {
            Err(_) => Err(ClientError::connection_timeout(
                self.shared.name.clone(),
                "connect",
                timeout,
            )),
            Ok(Err(_)) => Err(ClientError::connection_closed("connection state dropped")),
            Ok(Ok(state)) if state.is_open() => Ok(()),
            Ok(Ok(state)) => Err(ClientError::connection_closed(format!(
                "{} became {} before connecting",
                self.shared.name, *state
            ))),
        }
    }

    /// Send a request and wait for its response.
    ///
    /// No timeout at this layer; see [`send_request_with_timeout`](Self::send_request_with_timeout).
    /// Fails with `ConnectionClosed` if the connection closes first, and with
    /// `Server` if the server answers with a JSON-RPC error.
    pub async fn send_request(&self, method: &str, params: Value) -> ClientResult<Value> {
        let (id, ack, rx) = self.queue_request(method, params)?;
        self.await_response(id, ack, rx).await
    }

    /// Send a request, giving up after `timeout`.
    ///
    /// The frame is queued before the clock starts and is always written
    /// whole. Expiry is a retryable `RequestTimeout`; the connection stays
    /// usable and a late response is discarded.
    pub async fn send_request_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> ClientResult<Value> {
        let (id, ack, rx) = self.queue_request(method, params)?;
        match tokio::time::timeout(timeout, self.await_response(id, ack, rx)).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::RequestTimeout {
                method: method.to_string(),
                timeout,
            }),
        }
    }

    /// Register a slot and queue the frame. Nothing here waits.
    fn queue_request(
        &self,
        method: &str,
        params: Value,
    ) -> ClientResult<(
        RequestId,
        oneshot::Receiver<ClientResult<()>>,
        oneshot::Receiver<Resolution>,
    )> {
        let raw_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let id = RequestId::from(raw_id);
        let rx = self.shared.router.register(id.clone()).ok_or_else(|| {
            ClientError::internal(format!("request id {} is already outstanding", id))
        })?;

        let message = lifecycle::request(raw_id, method, params);
        match self.shared.enqueue(&message) {
            Ok(ack) => {
                debug!(
                    target: "tsunagi::connection",
                    "{}: queued request {} ({})",
                    self.shared.name,
                    id,
                    method
                );
                Ok((id, ack, rx))
            }
            Err(e) => {
                self.shared.router.remove(&id);
                Err(e)
            }
        }
    }

    async fn await_response(
        &self,
        id: RequestId,
        ack: oneshot::Receiver<ClientResult<()>>,
        rx: oneshot::Receiver<Resolution>,
    ) -> ClientResult<Value> {
        if let Err(e) = Shared::written(ack, || self.shared.closed_error()).await {
            self.shared.router.remove(&id);
            return Err(e);
        }

        match rx.await {
            Ok(Resolution::Response(Ok(result))) => Ok(result),
            Ok(Resolution::Response(Err(error))) => Err(ClientError::Server {
                code: error.code,
                message: error.message,
            }),
            Ok(Resolution::Closed(reason)) => Err(ClientError::connection_closed(reason)),
            Err(_) => Err(ClientError::connection_closed("request slot dropped")),
        }
    }

    /// Fire-and-forget notification. Waits until the frame is written and
    /// fails only if it cannot be.
    pub async fn send_notification(&self, method: &str, params: Value) -> ClientResult<()> {
        self.shared
            .write(&lifecycle::notification(method, params))
            .await
    }

    /// Mark the stream as expected to close soon.
    ///
    /// End-of-stream after this is logged as routine rather than as a crash.
    /// Does not close anything.
    pub fn stop(&self) {
        self.shared.expecting_close.store(true, Ordering::Release);
        self.shared.transition(ConnectionState::Stopping);
    }

    /// Whether [`stop`](Self::stop) was called.
    pub fn is_stopping(&self) -> bool {
        self.shared.expecting_close.load(Ordering::Acquire)
    }

    /// Close the transport, cancel pending requests and join both tasks.
    ///
    /// Idempotent and safe to call from any task. Never waits on the server:
    /// a write stalled on a peer that stopped reading is abandoned.
    pub async fn close(&self) {
        self.shared.cancel.cancel();
        let reader = self.reader.lock().recover_poison("Connection::close").take();
        if let Some(handle) = reader {
            if let Err(e) = handle.await {
                error!(
                    target: "tsunagi::connection",
                    "{}: reader task panicked: {}",
                    self.shared.name,
                    e
                );
            }
        }
        self.shared.teardown("connection closed");

        let writer = self
            .shared
            .writer_task
            .lock()
            .recover_poison("Connection::close")
            .take();
        if let Some(handle) = writer {
            if let Err(e) = handle.await {
                error!(
                    target: "tsunagi::connection",
                    "{}: writer task panicked: {}",
                    self.shared.name,
                    e
                );
            }
        }
        info!(
            target: "tsunagi::connection",
            "{}: connection closed",
            self.shared.name
        );
    }

    /// Wait until the connection is Closed.
    pub async fn wait_closed(&self) {
        let mut rx = self.shared.state.subscribe();
        let _ = rx.wait_for(|s| s.is_closed()).await;
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .field("pending", &self.pending_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lsp::codec;
    use serde_json::json;
    use tokio::io::{BufReader, DuplexStream, ReadHalf, WriteHalf};

    struct FakeServer {
        reader: BufReader<ReadHalf<DuplexStream>>,
        writer: WriteHalf<DuplexStream>,
    }

    impl FakeServer {
        async fn recv(&mut self) -> Value {
            codec::read_message(&mut self.reader).await.unwrap().unwrap()
        }

        async fn send(&mut self, message: Value) {
            codec::write_message(&mut self.writer, &message).await.unwrap();
        }
    }

    fn pair() -> (Connection, mpsc::UnboundedReceiver<Notification>, FakeServer) {
        pair_with_buffer(64 * 1024)
    }

    fn pair_with_buffer(
        capacity: usize,
    ) -> (Connection, mpsc::UnboundedReceiver<Notification>, FakeServer) {
        let (client, server) = tokio::io::duplex(capacity);
        let (client_read, client_write) = tokio::io::split(client);
        let (server_read, server_write) = tokio::io::split(server);
        let (connection, notifications) = Connection::new(
            "fake",
            Transport::from_streams(client_read, client_write),
            Arc::new(NoServerRequests),
        );
        let server = FakeServer {
            reader: BufReader::new(server_read),
            writer: server_write,
        };
        (connection, notifications, server)
    }

    #[tokio::test]
    async fn request_round_trip() {
        let (connection, _notifications, mut server) = pair();
        connection.start().unwrap();
        connection
            .await_server_connection(Duration::from_secs(1))
            .await
            .unwrap();

        let (result, ()) = tokio::join!(connection.send_request("textDocument/hover", json!({})), async {
            let request = server.recv().await;
            assert_eq!(request["method"], "textDocument/hover");
            server
                .send(json!({"jsonrpc": "2.0", "id": request["id"], "result": {"contents": "doc"}}))
                .await;
        });

        assert_eq!(result.unwrap()["contents"], "doc");
        assert_eq!(connection.pending_count(), 0);
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let (connection, _notifications, _server) = pair();
        connection.start().unwrap();
        assert!(matches!(connection.start(), Err(ClientError::Internal(_))));
    }

    #[tokio::test]
    async fn server_error_is_surfaced() {
        let (connection, _notifications, mut server) = pair();
        connection.start().unwrap();
        connection
            .await_server_connection(Duration::from_secs(1))
            .await
            .unwrap();

        let (result, ()) = tokio::join!(connection.send_request("textDocument/rename", json!({})), async {
            let request = server.recv().await;
            server
                .send(json!({
                    "jsonrpc": "2.0",
                    "id": request["id"],
                    "error": {"code": -32803, "message": "Cannot rename"}
                }))
                .await;
        });

        let err = result.unwrap_err();
        assert!(matches!(err, ClientError::Server { code: -32803, ref message } if message == "Cannot rename"));
    }

    #[tokio::test]
    async fn caller_timeout_leaves_connection_usable() {
        let (connection, _notifications, mut server) = pair();
        connection.start().unwrap();
        connection
            .await_server_connection(Duration::from_secs(1))
            .await
            .unwrap();

        let err = connection
            .send_request_with_timeout("slow", json!({}), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::RequestTimeout { .. }));
        assert!(err.is_retryable());

        // The late response is discarded, the next request still works.
        let late = server.recv().await;
        server
            .send(json!({"jsonrpc": "2.0", "id": late["id"], "result": "late"}))
            .await;

        let (result, ()) = tokio::join!(connection.send_request("fast", json!({})), async {
            let request = server.recv().await;
            server
                .send(json!({"jsonrpc": "2.0", "id": request["id"], "result": "fast"}))
                .await;
        });
        assert_eq!(result.unwrap(), json!("fast"));
        assert_eq!(connection.pending_count(), 0);
        assert_eq!(connection.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn stop_then_eof_closes_quietly() {
        let (connection, _notifications, server) = pair();
        connection.start().unwrap();
        connection
            .await_server_connection(Duration::from_secs(1))
            .await
            .unwrap();

        connection.stop();
        assert_eq!(connection.state(), ConnectionState::Stopping);
        assert!(connection.is_stopping());

        drop(server);
        connection.wait_closed().await;
        assert_eq!(connection.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_rejects_later_requests() {
        let (connection, _notifications, _server) = pair();
        connection.start().unwrap();
        connection.close().await;
        connection.close().await;

        assert_eq!(connection.state(), ConnectionState::Closed);
        let err = connection.send_request("x", json!({})).await.unwrap_err();
        assert!(matches!(err, ClientError::ConnectionClosed { .. }));
        let err = connection.send_notification("y", json!({})).await.unwrap_err();
        assert!(matches!(err, ClientError::ConnectionClosed { .. }));
    }

    #[tokio::test]
    async fn close_before_start_marks_closed() {
        let (connection, _notifications, _server) = pair();
        connection.close().await;
        assert_eq!(connection.state(), ConnectionState::Closed);
        assert!(connection.start().is_err());
    }

    #[tokio::test]
    async fn await_server_connection_times_out_without_dial_back() {
        let (transport, _addr) = Transport::bind_loopback().await.unwrap();
        let (connection, _notifications) =
            Connection::new("tcp", transport, Arc::new(NoServerRequests));
        connection.start().unwrap();

        let err = connection
            .await_server_connection(Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::ConnectionTimeout { phase: "connect", .. }));
        assert_eq!(connection.state(), ConnectionState::Starting);

        connection.close().await;
        assert_eq!(connection.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn close_does_not_wait_for_a_peer_that_stopped_reading() {
        // The server side never reads, so a large frame stalls the writer.
        let (connection, _notifications, _server) = pair_with_buffer(256);
        connection.start().unwrap();
        connection
            .await_server_connection(Duration::from_secs(1))
            .await
            .unwrap();
        let connection = Arc::new(connection);

        let caller = {
            let connection = Arc::clone(&connection);
            tokio::spawn(async move {
                connection
                    .send_request("big", json!({"text": "x".repeat(64 * 1024)}))
                    .await
            })
        };
        while connection.pending_count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        tokio::time::timeout(Duration::from_secs(2), connection.close())
            .await
            .expect("close should not hang on a stalled write");
        let err = tokio::time::timeout(Duration::from_secs(1), caller)
            .await
            .unwrap()
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, ClientError::ConnectionClosed { .. }));
        assert_eq!(connection.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn timed_out_request_is_still_written_whole() {
        let (connection, _notifications, mut server) = pair_with_buffer(1024);
        connection.start().unwrap();
        connection
            .await_server_connection(Duration::from_secs(1))
            .await
            .unwrap();

        let text = "x".repeat(8 * 1024);
        let err = connection
            .send_request_with_timeout("big", json!({"text": text}), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::RequestTimeout { .. }));

        let next = tokio::spawn(async move {
            connection.send_notification("next", json!({})).await
        });

        let first = tokio::time::timeout(Duration::from_secs(1), server.recv())
            .await
            .unwrap();
        assert_eq!(first["method"], "big");
        assert_eq!(first["params"]["text"].as_str().map(str::len), Some(8 * 1024));
        let second = tokio::time::timeout(Duration::from_secs(1), server.recv())
            .await
            .unwrap();
        assert_eq!(second["method"], "next");
        next.await.unwrap().unwrap();
    }
}
