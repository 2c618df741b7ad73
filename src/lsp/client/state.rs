/// Lifecycle state of a language server client.
///
/// - Stopped -> Starting (start/restart)
/// - Starting -> Ready (initialize answered, `initialized` sent)
/// - Starting -> Stopped (any start step failed; partial state rolled back)
/// - Ready -> ShuttingDown (stop, restart, or the server exited on its own)
/// - ShuttingDown -> Stopped (connection closed, process waited for)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub enum ClientState {
    #[default]
    Stopped,
    Starting,
    Ready,
    ShuttingDown,
}

impl std::fmt::Display for ClientState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ClientState::Stopped => "Stopped",
            ClientState::Starting => "Starting",
            ClientState::Ready => "Ready",
            ClientState::ShuttingDown => "ShuttingDown",
        };
        f.write_str(name)
    }
}
