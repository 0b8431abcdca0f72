use serde::{Deserialize, Serialize};

/// Connection session states.
///
/// `Disconnected` is both the initial state and the terminal state after
/// reconnection attempts are exhausted; only a manual `connect()` leaves it.
/// `Closed` is reached by an explicit `disconnect()`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Closed => "closed",
        }
    }

    /// Transition function of the session state machine.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            // Manual connect from any resting state
            (Disconnected, Connecting) | (Closed, Connecting) => true,
            // Handshake outcomes
            (Connecting, Connected) | (Connecting, Reconnecting) => true,
            // Transport drop and retry outcomes
            (Connected, Reconnecting) => true,
            (Reconnecting, Connected) | (Reconnecting, Reconnecting) => true,
            // Budget exhaustion parks the session; with a single-attempt
            // budget it can fire straight out of the first handshake
            (Connecting, Disconnected) | (Reconnecting, Disconnected) => true,
            // Explicit disconnect wins from anywhere
            (_, Closed) => true,
            _ => false,
        }
    }

    pub fn is_active(self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Connected | ConnectionState::Reconnecting
        )
    }
}

#[cfg(test)]
mod tests {
    use super::ConnectionState::*;

    #[test]
    fn test_happy_path_transitions() {
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Reconnecting));
        assert!(Reconnecting.can_transition_to(Connected));
        assert!(Reconnecting.can_transition_to(Disconnected));
        assert!(Connecting.can_transition_to(Disconnected));
        assert!(Connected.can_transition_to(Closed));
        assert!(Closed.can_transition_to(Connecting));
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!Disconnected.can_transition_to(Connected));
        assert!(!Connected.can_transition_to(Connecting));
        assert!(!Disconnected.can_transition_to(Reconnecting));
    }

    #[test]
    fn test_active_states() {
        assert!(Connecting.is_active());
        assert!(Connected.is_active());
        assert!(Reconnecting.is_active());
        assert!(!Disconnected.is_active());
        assert!(!Closed.is_active());
    }
}
