use std::time::Instant;

/// Lifecycle of one connection. Only the control loop advances it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Opening,
    Connected,
    Closing,
    /// Waiting out a backoff before the next open attempt.
    Faulted { backoff_until: Instant },
    /// Terminal; the control loop has returned.
    Stopped,
}

/// Everything that can move the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    OpenRequested,
    OpenSucceeded,
    OpenFailed { backoff_until: Instant },
    /// Read or write failure on an open handle.
    IoFailed { backoff_until: Instant },
    /// Non-I/O failure; the handle, if any, stays open.
    Unexpected,
    BackoffElapsed,
    StopRequested,
    HandleReleased,
}

impl ConnectionState {
    /// Successor of `self` under `trigger`. Defined for every pair;
    /// combinations that cannot occur leave the state unchanged.
    pub fn next(self, trigger: Trigger, auto_reconnect: bool) -> ConnectionState {
        use ConnectionState::*;
        use Trigger::*;

        match (self, trigger) {
            (Stopped, _) => Stopped,
            (Closing, HandleReleased) => Stopped,
            (Closing, _) => Closing,
            (_, StopRequested) => match self {
                Idle => Stopped,
                _ => Closing,
            },

            (Idle, OpenRequested) => Opening,
            (Idle, _) => Idle,

            (Opening, OpenSucceeded) => Connected,
            (Opening | Faulted { .. }, OpenFailed { backoff_until }) => {
                if auto_reconnect {
                    Faulted { backoff_until }
                } else {
                    Stopped
                }
            }
            (Faulted { .. }, BackoffElapsed) => Opening,
            (Faulted { .. }, OpenSucceeded) => Connected,

            (Connected, IoFailed { backoff_until }) => {
                if auto_reconnect {
                    Faulted { backoff_until }
                } else {
                    Stopped
                }
            }
            (Connected, HandleReleased) => Opening,

            // Unexpected errors and impossible combinations.
            (s, _) => s,
        }
    }

    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Stopped)
    }

    pub fn label(self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Opening => "opening",
            ConnectionState::Connected => "connected",
            ConnectionState::Closing => "closing",
            ConnectionState::Faulted { .. } => "faulted",
            ConnectionState::Stopped => "stopped",
        }
    }
}
