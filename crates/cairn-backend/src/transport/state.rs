//! Connection state machine
//!
//! `Disconnected -> Connecting -> Connected`, with any state allowed to drop
//! back to `Disconnected`. The `away` flag is orthogonal: it records that
//! the host lost connectivity while the backend process keeps running.

use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Disconnected)
                // Streams attached directly, e.g. in-memory pipes
                | (Disconnected, Connected)
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(name)
    }
}

/// Published transport status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkStatus {
    pub state: ConnectionState,
    pub away: bool,
    /// Why the link last dropped to `Disconnected`.
    pub last_error: Option<String>,
    /// True once the session is over; no reconnect will follow.
    pub closed: bool,
}

impl LinkStatus {
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Apply a transition, returning false (and changing nothing) when it
    /// is not allowed.
    pub fn transition(&mut self, next: ConnectionState) -> bool {
        if self.state == next {
            return true;
        }
        if !self.state.can_transition_to(next) {
            return false;
        }
        self.state = next;
        if next != ConnectionState::Disconnected {
            self.last_error = None;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_transitions() {
        use ConnectionState::*;
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Disconnected));
        assert!(!Connected.can_transition_to(Connecting));
    }

    #[test]
    fn test_transition_clears_error_on_connect() {
        let mut status = LinkStatus {
            last_error: Some("eof".into()),
            ..LinkStatus::default()
        };
        assert!(status.transition(ConnectionState::Connecting));
        assert!(status.transition(ConnectionState::Connected));
        assert!(status.last_error.is_none());
        assert!(!status.transition(ConnectionState::Connecting));
        assert!(status.is_connected());
    }

    #[test]
    fn test_away_is_independent_of_state() {
        let mut status = LinkStatus::default();
        status.away = true;
        assert!(status.transition(ConnectionState::Connecting));
        assert!(status.away);
    }
}
