//! Link connection states

use std::fmt;

/// Connection state of one link.
///
/// ```text
/// Idle → MediumAcquiring → MediumAttached → BuffersReady → Connected
///   ▲                                                          │
///   └──────────── Disconnected ◄───────────── (any state) ─────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LinkState {
    /// Nothing acquired.
    #[default]
    Idle,
    /// Creating/opening the segment, or listening/dialing.
    MediumAcquiring,
    /// Segment mapped or stream established; waiting for the peer.
    MediumAttached,
    /// Own channel initialized and flagged ready; waiting for the peer's flag.
    BuffersReady,
    /// Both sides ready; signals flow.
    Connected,
    /// Torn down; medium released.
    Disconnected,
}

impl LinkState {
    /// Name used in logs and errors.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::MediumAcquiring => "acquiring medium",
            Self::MediumAttached => "medium attached",
            Self::BuffersReady => "buffers ready",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        }
    }

    /// Between `Idle` and `Connected`, exclusive.
    pub const fn is_connecting(self) -> bool {
        matches!(
            self,
            Self::MediumAcquiring | Self::MediumAttached | Self::BuffersReady
        )
    }

    /// Whether the medium holds OS resources in this state.
    pub const fn holds_medium(self) -> bool {
        !matches!(self, Self::Idle | Self::Disconnected)
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_predicates() {
        assert!(!LinkState::Idle.is_connecting());
        assert!(LinkState::BuffersReady.is_connecting());
        assert!(!LinkState::Connected.is_connecting());
        assert!(LinkState::Connected.holds_medium());
        assert!(!LinkState::Disconnected.holds_medium());
        assert_eq!(LinkState::default(), LinkState::Idle);
    }
}
