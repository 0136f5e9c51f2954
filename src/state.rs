//! Connection lifecycle state machine.
//!
//! ```text
//! ┌──────────────┐    ┌────────────┐    ┌─────────────┐    ┌───────┐
//! │ Disconnected │───>│ Connecting │───>│ Handshaking │───>│ Ready │──┐
//! └──────────────┘    └────────────┘    └─────────────┘    └───────┘<─┘
//!                           │                  │               │
//!                           └──────────────────┼───────────────┘
//!                                              ↓
//!                                        ┌─────────┐    ┌────────┐
//!                                        │ Closing │───>│ Closed │
//!                                        └─────────┘    └────────┘
//! ```
//!
//! `Disconnected` is initial and `Closed` is terminal. Every transition is
//! published on a `watch` channel so callers can observe the lifecycle
//! without polling.

use std::fmt;

use tokio::sync::watch;
use tracing::debug;

use crate::error::{ElkoError, Result};

/// Lifecycle state of one coordinator connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Nothing attempted yet.
    Disconnected,
    /// TCP connect in progress.
    Connecting,
    /// Version byte and `ClientHello` being exchanged.
    Handshaking,
    /// Steady state: reader, writer and heartbeats running.
    Ready,
    /// Tearing down after shutdown or failure.
    Closing,
    /// Socket closed.
    Closed,
}

impl ConnectionState {
    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Handshaking)
                | (Handshaking, Ready)
                | (Ready, Ready)
                | (Connecting | Handshaking | Ready, Closing)
                | (Closing, Closed)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == ConnectionState::Closed
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Handshaking => "handshaking",
            ConnectionState::Ready => "ready",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Current state plus its change feed.
#[derive(Debug)]
pub struct StateMachine {
    tx: watch::Sender<ConnectionState>,
}

impl StateMachine {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ConnectionState::Disconnected);
        Self { tx }
    }

    pub fn current(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    /// Receiver that observes every subsequent transition.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    /// Move to `next`, or fail with [`ElkoError::InvalidTransition`].
    pub fn transition(&self, next: ConnectionState) -> Result<()> {
        let mut result = Ok(());
        self.tx.send_if_modified(|state| {
            let from = *state;
            if !from.can_transition_to(next) {
                result = Err(ElkoError::InvalidTransition { from, to: next });
                return false;
            }
            *state = next;
            debug!(%from, to = %next, "Connection state changed");
            from != next
        });
        result
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    #[test]
    fn test_happy_path_transitions() {
        let machine = StateMachine::new();
        assert_eq!(machine.current(), Disconnected);

        for next in [Connecting, Handshaking, Ready, Ready, Closing, Closed] {
            machine.transition(next).unwrap();
            assert_eq!(machine.current(), next);
        }
        assert!(machine.current().is_terminal());
    }

    #[test]
    fn test_closing_reachable_from_every_active_state() {
        for from in [Connecting, Handshaking, Ready] {
            assert!(from.can_transition_to(Closing), "{} -> closing", from);
        }
        assert!(!Disconnected.can_transition_to(Closing));
    }

    #[test]
    fn test_closed_is_terminal() {
        for next in [Disconnected, Connecting, Handshaking, Ready, Closing, Closed] {
            assert!(!Closed.can_transition_to(next));
        }
    }

    #[test]
    fn test_skipping_states_is_rejected() {
        let machine = StateMachine::new();
        let err = machine.transition(Ready).unwrap_err();

        assert!(matches!(
            err,
            ElkoError::InvalidTransition {
                from: Disconnected,
                to: Ready
            }
        ));
        assert_eq!(err.to_string(), "Invalid state transition from disconnected to ready");
        assert_eq!(machine.current(), Disconnected);
    }

    #[tokio::test]
    async fn test_subscribers_observe_changes() {
        let machine = StateMachine::new();
        let mut rx = machine.subscribe();

        machine.transition(Connecting).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), Connecting);

        // Ready -> Ready does not wake subscribers
        machine.transition(Handshaking).unwrap();
        machine.transition(Ready).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), Ready);
        machine.transition(Ready).unwrap();
        assert!(!rx.has_changed().unwrap());
    }
}
