//! Connection state machine.

/// State of a connection to an external language server.
///
/// Transitions:
/// - Unstarted -> Starting (on `start`)
/// - Starting -> Connected (transport open; immediately for stdio, after the
///   dial-back for TCP)
/// - Connected -> Stopping (on `stop`)
/// - any -> Closed (on `close`, end-of-stream or a fatal I/O or framing error)
///
/// Closed is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unstarted,
    Starting,
    Connected,
    Stopping,
    Closed,
}

impl ConnectionState {
    pub fn is_closed(self) -> bool {
        self == ConnectionState::Closed
    }

    /// Whether the connection can carry traffic.
    pub fn is_open(self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Stopping)
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Unstarted, Starting)
                | (Starting, Connected)
                | (Connected, Stopping)
                | (Unstarted | Starting | Connected | Stopping, Closed)
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Unstarted => "Unstarted",
            ConnectionState::Starting => "Starting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Stopping => "Stopping",
            ConnectionState::Closed => "Closed",
        };
        f.write_str(name)
    }
}
