//! Aggregate status derived from the active session

use hl_core::{ConnectionState, Status};

/// Projects the active session's state onto [`Status`] and deduplicates
/// change notifications.
#[derive(Debug, Default)]
pub struct StatusAggregator {
    last: Option<Status>,
}

impl StatusAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Status for the given active-session state (`None` when nothing is active)
    pub fn project(active: Option<ConnectionState>) -> Status {
        active.map_or(Status::Offline, |state| state.status())
    }

    /// Recompute from the active session's state.
    ///
    /// Returns the new status only when it differs from the last one returned.
    pub fn recompute(&mut self, active: Option<ConnectionState>) -> Option<Status> {
        let status = Self::project(active);
        if self.last == Some(status) {
            return None;
        }
        self.last = Some(status);
        Some(status)
    }

    /// Last emitted status
    pub fn current(&self) -> Status {
        self.last.unwrap_or(Status::Offline)
    }
}
