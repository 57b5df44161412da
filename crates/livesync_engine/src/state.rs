//! Observable state of a live collection.

use crate::error::SyncError;
use livesync_protocol::Timestamp;

/// Lifecycle phase of a live collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncPhase {
    /// Initial fetch and first channel attempt in progress.
    Initializing,
    /// Change feed connected; events stream into the mirror.
    Live,
    /// Change feed unavailable; the polling fallback keeps the mirror fresh.
    Degraded,
    /// Torn down; no further activity.
    TornDown,
}

impl SyncPhase {
    /// Returns true once initialization has completed and before teardown.
    pub fn is_running(&self) -> bool {
        matches!(self, SyncPhase::Live | SyncPhase::Degraded)
    }
}

/// Connection state exposed to consumers.
///
/// While [`phase`](Self::phase) is `Live` or `Degraded`, exactly one of
/// `is_connected` and `is_polling` is true.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionState {
    /// Change feed is connected.
    pub is_connected: bool,
    /// Polling fallback is active.
    pub is_polling: bool,
    /// Most recent error, cleared by the next successful fetch or connect.
    pub last_error: Option<SyncError>,
    /// Time of the last successful fetch.
    pub last_sync_time: Option<Timestamp>,
    /// Lifecycle phase.
    pub phase: SyncPhase,
    /// Reconnection gave up; polling is the steady state until restart.
    pub retries_exhausted: bool,
}

impl SubscriptionState {
    /// State before the first fetch.
    pub fn initializing() -> Self {
        Self {
            is_connected: false,
            is_polling: false,
            last_error: None,
            last_sync_time: None,
            phase: SyncPhase::Initializing,
            retries_exhausted: false,
        }
    }

    /// Checks the live-xor-polling invariant for the current phase.
    pub fn is_consistent(&self) -> bool {
        match self.phase {
            SyncPhase::Live => self.is_connected && !self.is_polling,
            SyncPhase::Degraded => !self.is_connected && self.is_polling,
            SyncPhase::Initializing | SyncPhase::TornDown => {
                !self.is_connected && !self.is_polling
            }
        }
    }
}

impl Default for SubscriptionState {
    fn default() -> Self {
        Self::initializing()
    }
}

/// Mode transitions worth telling a user about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Notice {
    /// `Live -> Degraded`: switching to polling.
    SwitchedToPolling,
    /// `Degraded -> Live`: real-time restored.
    RealtimeRestored,
    /// Reconnection gave up; polling from now on.
    FallbackPermanent,
}

impl Notice {
    /// Short human-readable message.
    pub fn message(&self) -> &'static str {
        match self {
            Notice::SwitchedToPolling => "Real-time connection lost, switching to polling",
            Notice::RealtimeRestored => "Real-time connection restored",
            Notice::FallbackPermanent => "Real-time unavailable, staying on polling",
        }
    }
}

/// Counters about sync activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Change events that altered the mirror.
    pub events_applied: u64,
    /// Change events ignored as stale or duplicate.
    pub events_ignored: u64,
    /// Change payloads dropped as malformed.
    pub malformed_events: u64,
    /// Completed `fetch_all` calls.
    pub fetches: u64,
    /// Failed `fetch_all` calls.
    pub fetch_failures: u64,
    /// Channel open attempts after the first one.
    pub reconnect_attempts: u64,
    /// `Live <-> Degraded` transitions.
    pub mode_transitions: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invariant_per_phase() {
        let mut state = SubscriptionState::initializing();
        assert!(state.is_consistent());
        assert!(!state.phase.is_running());

        state.phase = SyncPhase::Live;
        assert!(!state.is_consistent());
        state.is_connected = true;
        assert!(state.is_consistent());

        state.phase = SyncPhase::Degraded;
        state.is_polling = true;
        assert!(!state.is_consistent());
        state.is_connected = false;
        assert!(state.is_consistent());
        assert!(state.phase.is_running());
    }

    #[test]
    fn notice_messages() {
        assert!(Notice::SwitchedToPolling.message().contains("polling"));
        assert!(Notice::RealtimeRestored.message().contains("restored"));
    }
}
