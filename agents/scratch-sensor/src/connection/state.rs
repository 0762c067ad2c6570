//! Connection State Management
//!
//! Tracks the lifecycle of a remote sensor connection and records recent
//! transitions for diagnostics.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;

/// Maximum number of transitions kept in history
const HISTORY_LIMIT: usize = 100;

/// Represents the possible states of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket is open
    Disconnected,
    /// A TCP connect is in flight
    Connecting,
    /// Socket open and the receive loop running
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
        }
    }
}

/// State transition information
#[derive(Debug, Clone)]
pub struct StateTransition {
    pub from: ConnectionState,
    pub to: ConnectionState,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
}

/// Internal state data
struct StateInner {
    current: ConnectionState,
    last_connected: Option<DateTime<Utc>>,
    connection_attempts: u32,
    transitions: Vec<StateTransition>,
}

/// Thread-safe connection state manager
#[derive(Clone)]
pub struct ConnectionStateManager {
    inner: Arc<RwLock<StateInner>>,
}

impl ConnectionStateManager {
    /// Create a new state manager starting in Disconnected state
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(StateInner {
                current: ConnectionState::Disconnected,
                last_connected: None,
                connection_attempts: 0,
                transitions: Vec::new(),
            })),
        }
    }

    /// Get the current state
    pub fn current_state(&self) -> ConnectionState {
        self.inner.read().current
    }

    /// Get the last connected timestamp
    pub fn last_connected(&self) -> Option<DateTime<Utc>> {
        self.inner.read().last_connected
    }

    /// Number of connect attempts since the last successful connection
    pub fn connection_attempts(&self) -> u32 {
        self.inner.read().connection_attempts
    }

    /// Transition to a new state.
    ///
    /// Returns false and leaves the state untouched if the move is not
    /// allowed from the current state.
    pub fn transition_to(&self, new_state: ConnectionState, reason: Option<String>) -> bool {
        let mut inner = self.inner.write();
        Self::apply(&mut inner, new_state, reason)
    }

    fn apply(inner: &mut StateInner, new_state: ConnectionState, reason: Option<String>) -> bool {
        if !Self::is_valid_transition(inner.current, new_state) {
            return false;
        }

        // Nothing to record for a no-op
        if inner.current == new_state {
            return true;
        }

        let old_state = inner.current;
        inner.current = new_state;

        match new_state {
            ConnectionState::Connected => {
                inner.last_connected = Some(Utc::now());
                inner.connection_attempts = 0;
            }
            ConnectionState::Connecting => {
                inner.connection_attempts += 1;
            }
            ConnectionState::Disconnected => {}
        }

        inner.transitions.push(StateTransition {
            from: old_state,
            to: new_state,
            timestamp: Utc::now(),
            reason: reason.clone(),
        });
        if inner.transitions.len() > HISTORY_LIMIT {
            inner.transitions.remove(0);
        }

        tracing::info!(
            from = %old_state,
            to = %new_state,
            reason = reason.as_deref().unwrap_or(""),
            "Connection state transition"
        );

        true
    }

    /// Check if a state transition is valid
    fn is_valid_transition(from: ConnectionState, to: ConnectionState) -> bool {
        matches!(
            (from, to),
            (ConnectionState::Disconnected, ConnectionState::Disconnected)
                | (ConnectionState::Disconnected, ConnectionState::Connecting)
                | (ConnectionState::Connecting, ConnectionState::Connected)
                | (ConnectionState::Connecting, ConnectionState::Disconnected)
                | (ConnectionState::Connected, ConnectionState::Disconnected)
        )
    }

    /// Claim the connection for a new connect attempt.
    ///
    /// Only succeeds from Disconnected; a second caller racing in sees false.
    pub fn begin_connecting(&self) -> bool {
        let mut inner = self.inner.write();
        if inner.current != ConnectionState::Disconnected {
            return false;
        }
        Self::apply(
            &mut inner,
            ConnectionState::Connecting,
            Some("Initiating connection".to_string()),
        )
    }

    /// Finish a connect attempt.
    ///
    /// Only succeeds from Connecting; false means the attempt was
    /// cancelled or superseded while it was dialing.
    pub fn set_connected(&self) -> bool {
        self.transition_to(ConnectionState::Connected, Some("Connection established".to_string()))
    }

    /// Set state to disconnected
    pub fn set_disconnected(&self, reason: Option<String>) {
        self.transition_to(ConnectionState::Disconnected, reason);
    }

    /// Get recent state transitions, newest first
    pub fn recent_transitions(&self, count: usize) -> Vec<StateTransition> {
        let inner = self.inner.read();
        inner.transitions.iter().rev().take(count).cloned().collect()
    }

    /// Check if the connection is usable
    pub fn is_connected(&self) -> bool {
        self.current_state() == ConnectionState::Connected
    }
}

impl Default for ConnectionStateManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let manager = ConnectionStateManager::new();
        assert_eq!(manager.current_state(), ConnectionState::Disconnected);
        assert!(manager.last_connected().is_none());
    }

    #[test]
    fn test_valid_transitions() {
        let manager = ConnectionStateManager::new();

        assert!(manager.transition_to(ConnectionState::Connecting, None));
        assert_eq!(manager.current_state(), ConnectionState::Connecting);

        assert!(manager.transition_to(ConnectionState::Connected, None));
        assert!(manager.is_connected());
        assert!(manager.last_connected().is_some());

        assert!(manager.transition_to(ConnectionState::Disconnected, None));
        assert_eq!(manager.current_state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_connected_cannot_go_back_to_connecting() {
        let manager = ConnectionStateManager::new();
        assert!(manager.begin_connecting());
        manager.set_connected();

        assert!(!manager.transition_to(ConnectionState::Connecting, None));
        assert!(!manager.begin_connecting());
        assert!(manager.is_connected());
    }

    #[test]
    fn test_stale_attempt_cannot_complete() {
        let manager = ConnectionStateManager::new();

        // First attempt is cancelled while dialing, a second one takes over
        assert!(manager.begin_connecting());
        manager.set_disconnected(Some("Disconnect requested".to_string()));
        assert!(manager.begin_connecting());
        assert!(manager.set_connected());

        // The first attempt finishing late must not count as connected again
        assert!(!manager.set_connected());
        assert!(!manager.transition_to(ConnectionState::Connected, None));
        assert_eq!(manager.recent_transitions(1)[0].from, ConnectionState::Connecting);
    }

    #[test]
    fn test_disconnected_is_idempotent() {
        let manager = ConnectionStateManager::new();
        assert!(manager.transition_to(ConnectionState::Disconnected, None));
        assert!(manager.recent_transitions(10).is_empty());
    }

    #[test]
    fn test_connection_attempts() {
        let manager = ConnectionStateManager::new();

        manager.begin_connecting();
        assert_eq!(manager.connection_attempts(), 1);

        manager.set_disconnected(Some("refused".to_string()));
        manager.begin_connecting();
        assert_eq!(manager.connection_attempts(), 2);

        manager.set_connected();
        assert_eq!(manager.connection_attempts(), 0);
    }

    #[test]
    fn test_history_is_newest_first() {
        let manager = ConnectionStateManager::new();
        manager.begin_connecting();
        manager.set_connected();
        manager.set_disconnected(Some("peer closed".to_string()));

        let history = manager.recent_transitions(2);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].to, ConnectionState::Disconnected);
        assert_eq!(history[0].reason.as_deref(), Some("peer closed"));
        assert_eq!(history[1].to, ConnectionState::Connected);
    }
}
