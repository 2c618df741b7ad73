//! Client state machine for one language server.
//!
//! [`LanguageServerClient`] owns the server process and its [`Connection`],
//! drives them through `Stopped -> Starting -> Ready -> ShuttingDown ->
//! Stopped`, and exposes the upstream operations (requests, subcommands,
//! diagnostics, debug info).
//!
//! # Locking
//!
//! - The lifecycle lock (`tokio::sync::Mutex<()>`) is held across a whole
//!   start, stop or restart so transitions never overlap.
//! - The slot lock (`std::sync::Mutex<ServerSlot>`) only guards field capture
//!   and update. It is never held across an `.await`, so readers such as
//!   [`server_is_healthy`](LanguageServerClient::server_is_healthy) are never
//!   blocked behind a slow server.
//! - `starting` makes a second concurrent start or restart fail fast with
//!   `AlreadyStarting` instead of queueing on the lifecycle lock.

pub mod debug_info;
pub mod diagnostics;
pub mod documents;
pub mod handler;
pub mod language;
pub mod request;
pub mod sequencer;
pub mod state;
pub mod subcommand;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, MutexGuard};
use std::time::Duration;

use log::{debug, error, info, warn};
use lsp_types::Diagnostic;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::GlobalSettings;
use crate::error::{ClientError, ClientResult, LockResultExt};
use crate::lsp::connection::Connection;
use crate::lsp::process::{LogfileSpec, ServerProcess, StdioMode, remove_logfiles};
use crate::lsp::protocol::{Notification, lifecycle, path_to_uri};
use crate::lsp::transport::Transport;
pub use debug_info::{DebugInfo, DebugItem};
use diagnostics::{DiagnosticsCache, PublishDiagnostics, diagnostics_on_line};
use documents::DocumentTracker;
use handler::ClientRequestHandler;
pub use language::{LanguageClient, LaunchContext, TransportKind};
pub use request::{FileRequest, Location};
use request::LocationResolver;
use sequencer::ParseSequencer;
pub use state::ClientState;
pub use subcommand::{Subcommand, SubcommandResponse};

/// Grace period between SIGTERM and SIGKILL when rolling back a failed start.
const ROLLBACK_GRACE: Duration = Duration::from_secs(2);

const PUBLISH_DIAGNOSTICS: &str = "textDocument/publishDiagnostics";

pub const DIAGNOSTICS_NOT_READY: &str = "Diagnostics are not ready yet.";
pub const NO_DIAGNOSTICS_FOR_FILE: &str = "No diagnostics for current file.";
pub const NO_DIAGNOSTICS_FOR_LINE: &str = "No diagnostics for current line.";

/// Lifecycle fields of the current server generation.
#[derive(Default)]
struct ServerSlot {
    state: ClientState,
    generation: u64,
    process: Option<ServerProcess>,
    connection: Option<Arc<Connection>>,
    executable: Option<String>,
    pid: Option<u32>,
    port: Option<u16>,
    logfiles: Vec<PathBuf>,
    /// File the last start was for; a restart reuses it.
    launch_file: Option<PathBuf>,
    capabilities: Option<Value>,
    /// Feeds notifications to the diagnostics cache; ends once the connection closes.
    dispatch: Option<JoinHandle<()>>,
}

impl ServerSlot {
    /// Back to Stopped, keeping `logfiles` for debug output.
    fn clear(&mut self, logfiles: Vec<PathBuf>) {
        self.state = ClientState::Stopped;
        self.process = None;
        self.connection = None;
        self.executable = None;
        self.pid = None;
        self.port = None;
        self.logfiles = logfiles;
        self.capabilities = None;
        self.dispatch = None;
    }
}

struct ClientShared {
    language: Arc<dyn LanguageClient>,
    settings: GlobalSettings,
    lifecycle: tokio::sync::Mutex<()>,
    starting: AtomicBool,
    slot: std::sync::Mutex<ServerSlot>,
    diagnostics: Arc<DiagnosticsCache>,
    documents: DocumentTracker,
    sequencer: ParseSequencer,
}

/// Clears the `starting` flag when the start attempt ends.
struct StartingGuard<'a>(&'a AtomicBool);

impl<'a> StartingGuard<'a> {
    fn acquire(flag: &'a AtomicBool, server: &str) -> ClientResult<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| ClientError::AlreadyStarting {
                server: server.to_string(),
            })?;
        Ok(Self(flag))
    }
}

impl Drop for StartingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Handle to one language server. Cheap to clone.
#[derive(Clone)]
pub struct LanguageServerClient {
    shared: Arc<ClientShared>,
}

impl LanguageServerClient {
    pub fn new(language: Arc<dyn LanguageClient>, settings: GlobalSettings) -> Self {
        Self {
            shared: Arc::new(ClientShared {
                language,
                settings,
                lifecycle: tokio::sync::Mutex::new(()),
                starting: AtomicBool::new(false),
                slot: std::sync::Mutex::new(ServerSlot::default()),
                diagnostics: Arc::new(DiagnosticsCache::new()),
                documents: DocumentTracker::new(),
                sequencer: ParseSequencer::new(),
            }),
        }
    }

    pub fn language(&self) -> &Arc<dyn LanguageClient> {
        &self.shared.language
    }

    pub fn server_name(&self) -> &str {
        self.shared.language.server_name()
    }

    pub fn settings(&self) -> &GlobalSettings {
        &self.shared.settings
    }

    fn slot(&self) -> MutexGuard<'_, ServerSlot> {
        self.shared.slot.lock().recover_poison("LanguageServerClient::slot")
    }

    pub fn state(&self) -> ClientState {
        self.slot().state
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ClientState::Ready
    }

    /// Ready, with a live process and an open connection.
    pub fn server_is_healthy(&self) -> bool {
        let mut slot = self.slot();
        if slot.state != ClientState::Ready {
            return false;
        }
        let connected = slot
            .connection
            .as_ref()
            .is_some_and(|c| c.state().is_open());
        connected && slot.process.as_mut().is_some_and(ServerProcess::is_running)
    }

    /// Capabilities the server announced at initialize.
    pub fn capabilities(&self) -> Option<Value> {
        self.slot().capabilities.clone()
    }

    pub fn debug_info(&self) -> DebugInfo {
        let language = &self.shared.language;
        let mut slot = self.slot();
        let is_running = slot.process.as_mut().is_some_and(ServerProcess::is_running);
        DebugInfo {
            name: language.server_name().to_string(),
            language: language.language().to_string(),
            executable: slot.executable.clone(),
            pid: slot.pid,
            address: slot.port.map(|_| "127.0.0.1".to_string()),
            port: slot.port,
            logfiles: slot.logfiles.clone(),
            status: slot.state.to_string(),
            is_running,
            extras: language.extra_debug_items(),
        }
    }

    /// Start the server with no file context.
    pub async fn start_server(&self) -> ClientResult<()> {
        self.start_server_for(None).await
    }

    /// Start the server, rooting the project at `file`. A no-op when Ready.
    ///
    /// Fails with `AlreadyStarting` while another start or restart is in flight.
    pub async fn start_server_for(&self, file: Option<&Path>) -> ClientResult<()> {
        if self.is_ready() {
            return Ok(());
        }
        let _starting = StartingGuard::acquire(&self.shared.starting, self.server_name())?;
        let _lifecycle = self.shared.lifecycle.lock().await;
        if self.is_ready() {
            return Ok(());
        }
        self.start_locked(file).await
    }

    /// Orderly stop. Idempotent; waits for an in-flight start to finish first.
    pub async fn stop_server(&self) {
        let _lifecycle = self.shared.lifecycle.lock().await;
        self.stop_locked().await;
    }

    /// Stop, then start again for `file` (or the file of the previous start).
    pub async fn restart_server(&self, file: Option<&Path>) -> ClientResult<()> {
        let _starting = StartingGuard::acquire(&self.shared.starting, self.server_name())?;
        let _lifecycle = self.shared.lifecycle.lock().await;
        let file = file
            .map(Path::to_path_buf)
            .or_else(|| self.slot().launch_file.clone());
        info!(target: "tsunagi::client", "{}: restarting server", self.server_name());
        self.stop_locked().await;
        self.start_locked(file.as_deref()).await
    }

    async fn start_locked(&self, file: Option<&Path>) -> ClientResult<()> {
        let name = self.server_name().to_string();
        let generation = {
            let mut slot = self.slot();
            slot.generation += 1;
            slot.state = ClientState::Starting;
            slot.launch_file = file.map(Path::to_path_buf);
            slot.generation
        };
        info!(target: "tsunagi::client", "{}: starting server", name);

        let mut process = None;
        let mut connection = None;
        match self.launch(file, &mut process, &mut connection).await {
            Ok(capabilities) => {
                let connection = connection.ok_or_else(|| {
                    ClientError::internal("launch finished without a connection")
                })?;
                {
                    let mut slot = self.slot();
                    slot.process = process;
                    slot.connection = Some(Arc::clone(&connection));
                    slot.capabilities = Some(capabilities);
                    slot.state = ClientState::Ready;
                }
                self.spawn_monitor(connection, generation);
                info!(target: "tsunagi::client", "{}: server is ready", name);
                Ok(())
            }
            Err(e) => {
                error!(target: "tsunagi::client", "{}: failed to start server: {}", name, e);
                self.rollback(process, connection).await;
                Err(e)
            }
        }
    }

    /// Spawn, connect and initialize. Partially built handles are left in
    /// `process_out`/`connection_out` for the caller to roll back.
    async fn launch(
        &self,
        file: Option<&Path>,
        process_out: &mut Option<ServerProcess>,
        connection_out: &mut Option<Arc<Connection>>,
    ) -> ClientResult<Value> {
        let language = Arc::clone(&self.shared.language);
        let settings = &self.shared.settings;
        let project_root = language.project_directory(file);

        let (listener, port) = match language.transport_kind() {
            TransportKind::Tcp => {
                let (transport, addr) = Transport::bind_loopback().await?;
                (Some(transport), Some(addr.port()))
            }
            TransportKind::Stdio => (None, None),
        };

        let context = LaunchContext {
            project_root: project_root.clone(),
            port,
            debug_logging: settings.server_debug_logging,
        };
        let command = {
            let language = Arc::clone(&language);
            tokio::task::spawn_blocking(move || language.server_command(&context))
                .await
                .map_err(|e| ClientError::internal(format!("launch command lookup failed: {}", e)))??
        };

        let logs = LogfileSpec {
            dir: settings.log_dir(),
            prefix: language.logfile_prefix(),
            port,
        };
        let mode = match listener {
            Some(_) => StdioMode::LogOnly,
            None => StdioMode::Pipes,
        };
        let process = process_out.insert(ServerProcess::spawn(&command, &logs, mode).await?);
        {
            let mut slot = self.slot();
            slot.executable = Some(command.display());
            slot.pid = Some(process.pid());
            slot.port = port;
            slot.logfiles = process.logfiles().to_vec();
        }

        let transport = match listener {
            Some(listener) => listener,
            None => {
                let (stdout, stdin) = process
                    .take_stdio()
                    .ok_or_else(|| ClientError::internal("server stdio was already taken"))?;
                Transport::from_streams(stdout, stdin)
            }
        };

        let handler = Arc::new(ClientRequestHandler::new(Arc::clone(&language)));
        let (connection, notifications) =
            Connection::new(language.server_name(), transport, handler);
        let connection = Arc::clone(connection_out.insert(Arc::new(connection)));
        connection.start()?;
        connection
            .await_server_connection(settings.connection_timeout())
            .await?;
        let dispatch = self.spawn_dispatch(notifications);
        self.slot().dispatch = Some(dispatch);

        let timeout = settings.initialize_timeout();
        let params = lifecycle::initialize_params(
            project_root.as_deref(),
            language.initialization_options(),
        );
        let result = match connection
            .send_request_with_timeout(lifecycle::INITIALIZE, params, timeout)
            .await
        {
            Err(ClientError::RequestTimeout { .. }) => {
                return Err(ClientError::connection_timeout(
                    language.server_name(),
                    "initialize",
                    timeout,
                ));
            }
            result => result?,
        };
        let capabilities = lifecycle::validate_initialize_result(&result)
            .map_err(|message| ClientError::Parse { message })?;

        connection
            .send_notification(lifecycle::INITIALIZED, json!({}))
            .await?;
        Ok(capabilities)
    }

    /// Undo a failed start. Unlike an orderly stop, the process is killed.
    async fn rollback(&self, process: Option<ServerProcess>, connection: Option<Arc<Connection>>) {
        let dispatch = self.slot().dispatch.take();
        if let Some(connection) = connection {
            connection.stop();
            connection.close().await;
        }
        self.join_dispatch(dispatch).await;
        if let Some(mut process) = process {
            process.terminate(ROLLBACK_GRACE).await;
        }

        {
            let mut slot = self.slot();
            let logfiles = std::mem::take(&mut slot.logfiles);
            slot.clear(logfiles);
        }
        self.shared.documents.clear();
        self.shared.diagnostics.clear();
        self.shared.language.reset();
    }

    async fn stop_locked(&self) {
        let name = self.server_name().to_string();
        let (connection, process, logfiles, dispatch) = {
            let mut slot = self.slot();
            if slot.connection.is_none() && slot.process.is_none() {
                debug!(target: "tsunagi::client", "{}: already stopped", name);
                slot.state = ClientState::Stopped;
                return;
            }
            slot.state = ClientState::ShuttingDown;
            (
                slot.connection.take(),
                slot.process.take(),
                std::mem::take(&mut slot.logfiles),
                slot.dispatch.take(),
            )
        };
        info!(target: "tsunagi::client", "{}: stopping server", name);

        let timeout = self.shared.settings.shutdown_timeout();
        if let Some(connection) = &connection {
            connection.stop();
            if connection.state().is_open() {
                if let Err(e) = connection
                    .send_request_with_timeout(lifecycle::SHUTDOWN, Value::Null, timeout)
                    .await
                {
                    warn!(target: "tsunagi::client", "{}: shutdown request failed: {}", name, e);
                }
                let exit = connection.send_notification(lifecycle::EXIT, Value::Null);
                match tokio::time::timeout(timeout, exit).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!(target: "tsunagi::client", "{}: exit notification failed: {}", name, e)
                    }
                    Err(_) => warn!(
                        target: "tsunagi::client",
                        "{}: server is not reading its input, closing anyway",
                        name
                    ),
                }
            }
            connection.close().await;
        }
        // Old-generation diagnostics must land before the cache is cleared.
        self.join_dispatch(dispatch).await;

        if let Some(mut process) = process {
            // On timeout the process is left to exit on its own.
            let _ = process.await_termination(timeout).await;
        }

        let kept = if self.shared.settings.keep_logfiles {
            logfiles
        } else {
            remove_logfiles(&logfiles);
            Vec::new()
        };
        self.slot().clear(kept);
        self.shared.documents.clear();
        self.shared.diagnostics.clear();
        self.shared.language.reset();
        info!(target: "tsunagi::client", "{}: server stopped", name);
    }

    /// Feed notifications to the diagnostics cache and the language hook, in wire order.
    fn spawn_dispatch(&self, mut notifications: mpsc::UnboundedReceiver<Notification>) -> JoinHandle<()> {
        let language = Arc::clone(&self.shared.language);
        let diagnostics = Arc::clone(&self.shared.diagnostics);
        tokio::spawn(async move {
            while let Some(notification) = notifications.recv().await {
                if notification.method == PUBLISH_DIAGNOSTICS {
                    match serde_json::from_value::<PublishDiagnostics>(notification.params.clone()) {
                        Ok(params) => diagnostics.publish(params),
                        Err(e) => warn!(
                            target: "tsunagi::client",
                            "{}: malformed diagnostics: {}",
                            language.server_name(),
                            e
                        ),
                    }
                }
                language.handle_notification(&notification);
            }
        })
    }

    /// Wait for the dispatch task to drain. Only valid once the connection is closed.
    async fn join_dispatch(&self, dispatch: Option<JoinHandle<()>>) {
        let Some(handle) = dispatch else {
            return;
        };
        if let Err(e) = handle.await {
            error!(
                target: "tsunagi::client",
                "{}: notification dispatch panicked: {}",
                self.server_name(),
                e
            );
        }
    }

    /// Clean up after a server that went away without being asked to.
    fn spawn_monitor(&self, connection: Arc<Connection>, generation: u64) {
        let shared = Arc::downgrade(&self.shared);
        tokio::spawn(async move {
            connection.wait_closed().await;
            if connection.is_stopping() {
                return;
            }
            drop(connection);
            let Some(shared) = shared.upgrade() else {
                return;
            };
            let client = LanguageServerClient { shared };
            let _lifecycle = client.shared.lifecycle.lock().await;
            {
                let slot = client.slot();
                if slot.generation != generation || slot.state != ClientState::Ready {
                    return;
                }
            }
            warn!(
                target: "tsunagi::client",
                "{}: server exited unexpectedly",
                client.server_name()
            );
            client.stop_locked().await;
        });
    }

    fn ready_connection(&self) -> ClientResult<Arc<Connection>> {
        let slot = self.slot();
        match (&slot.connection, slot.state) {
            (Some(connection), ClientState::Ready) => Ok(Arc::clone(connection)),
            (_, state) => Err(ClientError::not_ready(self.server_name(), state)),
        }
    }

    /// Send a request to the server, failing fast with `ServerNotReady`.
    pub async fn send_request(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> ClientResult<Value> {
        let connection = self.ready_connection()?;
        connection
            .send_request_with_timeout(method, params, timeout)
            .await
    }

    pub async fn send_notification(&self, method: &str, params: Value) -> ClientResult<()> {
        let connection = self.ready_connection()?;
        connection.send_notification(method, params).await
    }

    /// Bring the server's copy of the request's file up to date.
    async fn sync_document(&self, request: &FileRequest) -> ClientResult<()> {
        let connection = self.ready_connection()?;
        let uri = request.uri()?;
        let action = self
            .shared
            .documents
            .sync(&uri, &request.filetype, &request.contents);
        if let Some((method, params)) = action.into_notification() {
            if let Err(e) = connection.send_notification(method, params).await {
                self.shared.documents.close(&uri);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Start the server if needed, sync the file and return its cached diagnostics.
    ///
    /// Fails with `StaleParse` when a newer call superseded this one.
    pub async fn on_file_ready_to_parse(&self, request: &FileRequest) -> ClientResult<Vec<Diagnostic>> {
        let sequencer = &self.shared.sequencer;
        let ticket = sequencer.issue();
        sequencer
            .run(ticket, async {
                if !self.is_ready() {
                    self.start_server_for(Some(&request.filepath)).await?;
                    sequencer.check(ticket)?;
                }
                self.sync_document(request).await?;
                Ok(self.diagnostics_for(&request.filepath)?.unwrap_or_default())
            })
            .await
    }

    /// Latest diagnostics published for `path`; `None` if none were published.
    pub fn diagnostics_for(&self, path: &Path) -> ClientResult<Option<Vec<Diagnostic>>> {
        let uri = path_to_uri(path)?;
        Ok(self.shared.diagnostics.get(&uri))
    }

    /// Full text of the diagnostic nearest to the cursor.
    pub fn detailed_diagnostic(&self, request: &FileRequest) -> ClientResult<SubcommandResponse> {
        if self.shared.diagnostics.is_empty() {
            return Ok(SubcommandResponse::Message(DIAGNOSTICS_NOT_READY.to_string()));
        }
        let diagnostics = self.diagnostics_for(&request.filepath)?.unwrap_or_default();
        if diagnostics.is_empty() {
            return Ok(SubcommandResponse::Message(NO_DIAGNOSTICS_FOR_FILE.to_string()));
        }
        match diagnostics_on_line(&diagnostics, request.position()).first() {
            Some(nearest) => Ok(SubcommandResponse::DetailedInfo(nearest.message.clone())),
            None => Ok(SubcommandResponse::Message(NO_DIAGNOSTICS_FOR_LINE.to_string())),
        }
    }

    /// Run a subcommand for a position in a file.
    pub async fn execute_subcommand(
        &self,
        request: &FileRequest,
        subcommand: &Subcommand,
    ) -> ClientResult<SubcommandResponse> {
        match subcommand {
            Subcommand::RestartServer => {
                self.restart_server(Some(&request.filepath)).await?;
                Ok(SubcommandResponse::Ack)
            }
            Subcommand::StopServer => {
                self.stop_server().await;
                Ok(SubcommandResponse::Ack)
            }
            query => {
                if !self.shared.language.supports(query) {
                    return Err(ClientError::UnsupportedSubcommand {
                        subcommand: query.name().to_string(),
                        server: self.server_name().to_string(),
                    });
                }
                self.sync_document(request).await?;
                self.query_server(request, query).await
            }
        }
    }

    async fn query_server(
        &self,
        request: &FileRequest,
        subcommand: &Subcommand,
    ) -> ClientResult<SubcommandResponse> {
        let timeout = self.shared.settings.request_timeout();
        let mut params = request.text_document_position()?;

        match subcommand {
            Subcommand::GoTo
            | Subcommand::GoToDefinition
            | Subcommand::GoToImprecise
            | Subcommand::GoToInclude => {
                let result = self.send_request("textDocument/definition", params, timeout).await?;
                subcommand::definition_response(result, &mut LocationResolver::new(request))
            }
            Subcommand::GoToDeclaration => {
                let result = self.send_request("textDocument/declaration", params, timeout).await?;
                subcommand::definition_response(result, &mut LocationResolver::new(request))
            }
            Subcommand::GoToReferences => {
                params["context"] = json!({ "includeDeclaration": true });
                let result = self.send_request("textDocument/references", params, timeout).await?;
                subcommand::references_response(result, &mut LocationResolver::new(request))
            }
            Subcommand::GetType | Subcommand::GetTypeImprecise => {
                let hover = self.hover(params, timeout).await?;
                let text = self.shared.language.interpret_type(&hover)?;
                Ok(SubcommandResponse::Message(text))
            }
            Subcommand::GetDoc => {
                let hover = self.hover(params, timeout).await?;
                let text = self.shared.language.interpret_doc(&hover)?;
                Ok(SubcommandResponse::DetailedInfo(text))
            }
            Subcommand::FixIt => {
                let params = self.code_action_params(request)?;
                let result = self.send_request("textDocument/codeAction", params, timeout).await?;
                subcommand::code_actions_response(result, &mut LocationResolver::new(request))
            }
            Subcommand::RefactorRename { new_name } => {
                params["newName"] = Value::String(new_name.clone());
                let result = self.send_request("textDocument/rename", params, timeout).await?;
                subcommand::rename_response(result, &mut LocationResolver::new(request))
            }
            Subcommand::RestartServer | Subcommand::StopServer => Err(ClientError::internal(
                format!("{} is not a server query", subcommand.name()),
            )),
        }
    }

    async fn hover(&self, params: Value, timeout: Duration) -> ClientResult<lsp_types::Hover> {
        let result = self.send_request("textDocument/hover", params, timeout).await?;
        subcommand::parse_hover(result)?
            .ok_or_else(|| ClientError::NoResult(subcommand::NO_HOVER.to_string()))
    }

    /// `CodeActionParams` covering the cursor line, with its cached diagnostics.
    fn code_action_params(&self, request: &FileRequest) -> ClientResult<Value> {
        let position = request.position();
        let line_length = request
            .contents
            .lines()
            .nth(position.line as usize)
            .map_or(0, |line| line.encode_utf16().count());
        let diagnostics = self
            .diagnostics_for(&request.filepath)?
            .map(|all| diagnostics_on_line(&all, position))
            .unwrap_or_default();
        let diagnostics = serde_json::to_value(diagnostics).map_err(|e| ClientError::Parse {
            message: e.to_string(),
        })?;

        Ok(json!({
            "textDocument": { "uri": request.uri()? },
            "range": {
                "start": { "line": position.line, "character": 0 },
                "end": { "line": position.line, "character": line_length }
            },
            "context": { "diagnostics": diagnostics }
        }))
    }
}

impl std::fmt::Debug for LanguageServerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LanguageServerClient")
            .field("server", &self.server_name())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lsp::process::ServerCommand;

    struct ShellServer {
        script: &'static str,
    }

    impl LanguageClient for ShellServer {
        fn language(&self) -> &str {
            "Test"
        }

        fn server_name(&self) -> &str {
            "shell"
        }

        fn filetypes(&self) -> Vec<String> {
            vec!["test".to_string()]
        }

        fn server_command(&self, _context: &LaunchContext) -> ClientResult<ServerCommand> {
            Ok(ServerCommand::new("sh").args(["-c", self.script]))
        }

        fn supports(&self, subcommand: &Subcommand) -> bool {
            matches!(subcommand, Subcommand::GetType)
        }
    }

    fn client(script: &'static str, log_dir: &Path) -> LanguageServerClient {
        let settings = GlobalSettings {
            log_dir: Some(log_dir.to_path_buf()),
            connection_timeout_ms: 1000,
            initialize_timeout_ms: 200,
            shutdown_timeout_ms: 500,
            ..GlobalSettings::default()
        };
        LanguageServerClient::new(Arc::new(ShellServer { script }), settings)
    }

    #[tokio::test]
    async fn requests_fail_fast_when_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        let client = client("cat > /dev/null", dir.path());
        let err = client
            .send_request("textDocument/hover", json!({}), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::ServerNotReady { .. }));
        assert!(err.is_retryable());
        assert!(client.send_notification("x", json!({})).await.is_err());
    }

    #[tokio::test]
    async fn stop_on_stopped_client_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let client = client("cat > /dev/null", dir.path());
        client.stop_server().await;
        client.stop_server().await;
        assert_eq!(client.state(), ClientState::Stopped);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unanswered_initialize_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let client = client("cat > /dev/null", dir.path());

        let err = client.start_server().await.unwrap_err();
        assert!(matches!(err, ClientError::ConnectionTimeout { phase: "initialize", .. }));

        let info = client.debug_info();
        assert_eq!(info.status, "Stopped");
        assert!(!info.is_running);
        assert!(info.pid.is_none());
        assert!(!client.is_ready());
    }

    #[tokio::test]
    async fn unsupported_subcommand_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let client = client("cat > /dev/null", dir.path());
        let request = FileRequest::new(dir.path().join("a.test"), "test", "", 1, 1);
        let err = client
            .execute_subcommand(&request, &Subcommand::GoToReferences)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::UnsupportedSubcommand { .. }));

        let err = client
            .execute_subcommand(&request, &Subcommand::GetType)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::ServerNotReady { .. }));
    }

    #[test]
    fn detailed_diagnostic_messages() {
        let dir = tempfile::tempdir().unwrap();
        let client = client("true", dir.path());
        let path = dir.path().join("a.c");
        let request = FileRequest::new(&path, "c", "int x\nint y\n", 2, 3);

        assert_eq!(
            client.detailed_diagnostic(&request).unwrap(),
            SubcommandResponse::Message(DIAGNOSTICS_NOT_READY.to_string())
        );

        client.shared.diagnostics.publish(PublishDiagnostics {
            uri: path_to_uri(&dir.path().join("other.c")).unwrap(),
            diagnostics: Vec::new(),
        });
        assert_eq!(
            client.detailed_diagnostic(&request).unwrap(),
            SubcommandResponse::Message(NO_DIAGNOSTICS_FOR_FILE.to_string())
        );

        let diagnostic = |line: u32, message: &str| Diagnostic {
            range: lsp_types::Range::new(
                lsp_types::Position::new(line, 0),
                lsp_types::Position::new(line, 5),
            ),
            message: message.to_string(),
            ..Default::default()
        };
        client.shared.diagnostics.publish(PublishDiagnostics {
            uri: path_to_uri(&path).unwrap(),
            diagnostics: vec![diagnostic(0, "expected ';'")],
        });
        assert_eq!(
            client.detailed_diagnostic(&request).unwrap(),
            SubcommandResponse::Message(NO_DIAGNOSTICS_FOR_LINE.to_string())
        );

        client.shared.diagnostics.publish(PublishDiagnostics {
            uri: path_to_uri(&path).unwrap(),
            diagnostics: vec![diagnostic(0, "expected ';'"), diagnostic(1, "unknown type y")],
        });
        assert_eq!(
            client.detailed_diagnostic(&request).unwrap(),
            SubcommandResponse::DetailedInfo("unknown type y".to_string())
        );
    }
}
