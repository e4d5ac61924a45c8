//! Connection lifecycle graph.
//!
//! ```text
//!                connect                 ConnAck
//! Disconnected ──────────► Connecting ──────────► Connected
//!      ▲                    │     ▲                  │
//!      │          failure / │     │ connect          │ failure
//!      │          timeout   ▼     │ (retry)          │
//!      └─────────────────  Error ◄───────────────────┘
//!          disconnect
//! ```
//!
//! `disconnect` is accepted from every state. Nothing else leaves the graph:
//! in particular Disconnected can neither fail nor become Connected directly.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Inputs that move the connection between states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trigger {
    /// Operator or reconnect policy starts an attempt
    Connect,
    /// Broker accepted the session (successful ConnAck)
    Acknowledged,
    /// Transport error, refused ConnAck or connect timeout
    Failed,
    /// Explicit close
    Disconnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Invalid connection transition: {trigger:?} while {from}")]
pub struct InvalidTransition {
    pub from: ConnectionState,
    pub trigger: Trigger,
}

#[derive(Debug, Default, Clone)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
}

impl ConnectionStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Applies `trigger` and returns the new state. The state is left
    /// untouched when the edge does not exist.
    pub fn apply(&mut self, trigger: Trigger) -> Result<ConnectionState, InvalidTransition> {
        use ConnectionState::*;

        let next = match (self.state, trigger) {
            (Disconnected | Error, Trigger::Connect) => Connecting,
            (Connecting, Trigger::Acknowledged) => Connected,
            (Connecting | Connected, Trigger::Failed) => Error,
            (_, Trigger::Disconnect) => Disconnected,
            (from, trigger) => return Err(InvalidTransition { from, trigger }),
        };

        self.state = next;
        Ok(next)
    }
}
