//! Queue lifecycle states.

use serde::{Deserialize, Serialize};

/// Lifecycle of a [`TaskQueue`](super::TaskQueue).
///
/// State transitions:
/// - Open -> Closing -> Closed (graceful close, drained through a marker)
/// - Open -> Closed (forced close)
/// - Closing -> Closed (the marker executes, or a forced close overtakes it)
///
/// Closed is terminal; a queue never reopens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueueState {
    /// Accepting work.
    Open,

    /// A close marker is pending; no further work is accepted.
    Closing,

    /// No pending work will execute; the consumer is on its way out or gone.
    Closed,
}

impl QueueState {
    /// Accepting new work?
    pub fn is_open(self) -> bool {
        matches!(self, QueueState::Open)
    }

    /// Terminal state?
    pub fn is_closed(self) -> bool {
        matches!(self, QueueState::Closed)
    }
}
