//! Server lifecycle state.
//!
//! ```text
//! Uninitialized ──init──▶ Initialized ──bind──▶ Bound ──start──▶ Started
//!                              └────────────start (auto-bind)────────▲
//! ```
//!
//! States only move forward. Calling an operation from a state it does not
//! accept is a programming error and panics.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ServerState {
    Uninitialized,
    Initialized,
    Bound,
    Started,
}

impl ServerState {
    /// Listening handles exist and addresses can be queried.
    pub fn is_bound(self) -> bool {
        matches!(self, ServerState::Bound | ServerState::Started)
    }

    /// Panic unless the current state is one of `allowed`.
    pub(crate) fn require(self, allowed: &[ServerState], operation: &str) {
        if !allowed.contains(&self) {
            tracing::error!(state = %self, operation, "RPC server operation in bad state");
            panic!("bad state: {operation} called while {self} (expected one of {allowed:?})");
        }
    }

    /// Move forward to `next`.
    pub(crate) fn advance(&mut self, next: ServerState) {
        assert!(next > *self, "bad state transition: {self} -> {next}");
        *self = next;
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServerState::Uninitialized => "uninitialized",
            ServerState::Initialized => "initialized",
            ServerState::Bound => "bound",
            ServerState::Started => "started",
        };
        f.write_str(name)
    }
}
