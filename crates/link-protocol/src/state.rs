/// # Connection State Machine
///
/// ```text
///                 connect()
///   ┌──────────────┐ ───────► ┌────────────┐
///   │ Disconnected │          │ Connecting │
///   └──────────────┘ ◄─────── └─────┬──────┘
///         ▲   retries exhausted /   │
///         │   disconnect()          │ port opened
///         │                         ▼
///         │  I/O error /      ┌───────────┐
///         └───────────────────┤ Connected │
///            disconnect()     └───────────┘
/// ```
///
/// ## State Invariants
///
/// - **Disconnected**: no port in the transport slot; the health monitor (if
///   a session is running and auto-reconnect is on) will try `connect()`
/// - **Connecting**: exactly one `connect()` owns the open/retry cycle
/// - **Connected**: port open, receiver and writer using it
///
/// The state is stored in an `AtomicU8` (see [`ConnectionState::to_u8`]) so
/// loops can read it without locking. Readers tolerate a value that is one
/// poll cycle stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ConnectionState {
    /// No open port
    Disconnected,

    /// Opening the port, possibly retrying
    Connecting,

    /// Port open and operational
    Connected,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Human readable status
    pub fn status_text(&self) -> &'static str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting...",
            Self::Connected => "Connected",
        }
    }

    /// Validate if transition to new_state is allowed from current state
    pub fn can_transition_to(&self, new_state: ConnectionState) -> bool {
        use ConnectionState::*;

        match (self, new_state) {
            (Disconnected, Connecting) => true,   // connect() starts
            (Disconnected, Disconnected) => true, // Idempotent disconnect()

            (Connecting, Connected) => true,    // Port opened
            (Connecting, Disconnected) => true, // Retries exhausted or cancelled

            (Connected, Disconnected) => true, // I/O error or disconnect()

            // All other transitions are invalid
            _ => false,
        }
    }

    /// Convert state to u8 value for atomic storage
    pub fn to_u8(self) -> u8 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
        }
    }

    /// Convert u8 value back to state
    /// Returns None if value is invalid
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ConnectionState::Disconnected),
            1 => Some(ConnectionState::Connecting),
            2 => Some(ConnectionState::Connected),
            _ => None,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.status_text())
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn test_state_conversion_roundtrip() {
        let states = [
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
        ];

        for state in states {
            let recovered = ConnectionState::from_u8(state.to_u8()).unwrap();
            assert_eq!(state, recovered);
        }
        assert_eq!(ConnectionState::from_u8(9), None);
    }

    #[test]
    fn test_valid_transitions() {
        assert!(ConnectionState::Disconnected.can_transition_to(ConnectionState::Connecting));
        assert!(ConnectionState::Connecting.can_transition_to(ConnectionState::Connected));
        assert!(ConnectionState::Connected.can_transition_to(ConnectionState::Disconnected));
        assert!(ConnectionState::Disconnected.can_transition_to(ConnectionState::Disconnected));
    }

    #[test]
    fn test_invalid_transitions() {
        // Must go through Connecting
        assert!(!ConnectionState::Disconnected.can_transition_to(ConnectionState::Connected));
        // A live connection is never re-opened in place
        assert!(!ConnectionState::Connected.can_transition_to(ConnectionState::Connecting));
    }

    #[test]
    fn test_serialization() {
        let state = ConnectionState::Connected;
        let json = serde_json::to_string(&state).unwrap();
        let deserialized: ConnectionState = serde_json::from_str(&json).unwrap();
        assert_eq!(state, deserialized);
    }
}
