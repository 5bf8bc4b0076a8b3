//! Session-level connectivity state.

use std::fmt;

/// Coarse session state exposed to the coordinator's caller.
///
/// Derived solely from the network actor's ready-to-send-data signal and
/// recomputed on every signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Transport can carry data.
    Established,
    /// Transport lost readiness and is recovering.
    Reconnecting,
}

impl SessionState {
    /// Map the network actor's readiness flag to a session state.
    #[must_use]
    pub const fn from_ready(ready: bool) -> Self {
        if ready {
            SessionState::Established
        } else {
            SessionState::Reconnecting
        }
    }

    /// Stable lowercase name, used as a metric label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            SessionState::Established => "established",
            SessionState::Reconnecting => "reconnecting",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
