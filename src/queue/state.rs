//! Queue item types and status transitions.

use crate::story::Component;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::Instant;

/// Something that can be built: one component of one feature at one level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildTarget {
    pub level: u32,
    pub feature: u32,
    pub component: Component,
    /// Stable tag the branch is cut from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    pub branch: String,
    /// Placeholder inserted to satisfy a level gate
    #[serde(default)]
    pub autogenerated: bool,
}

impl BuildTarget {
    /// Queue identity. A queue holds at most one item per (level, component).
    pub fn key(&self) -> (u32, Component) {
        (self.level, self.component)
    }
}

/// Status of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ItemStatus {
    /// Waiting for its turn
    #[default]
    Pending,
    /// Currently building; at most one item at a time
    Building,
    Completed,
    /// Stopped by the user; can be retried
    Canceled,
    /// Stopped by the watchdog; can be retried
    Failed,
}

impl ItemStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Canceled | Self::Failed)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Building)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Canceled | Self::Failed)
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "Pending",
            Self::Building => "Building",
            Self::Completed => "Completed",
            Self::Canceled => "Canceled",
            Self::Failed => "Failed",
        };
        f.pad(s)
    }
}

/// Whether the queue may move an item from `from` to `to`.
pub fn is_valid_transition(from: ItemStatus, to: ItemStatus) -> bool {
    use ItemStatus::*;
    matches!(
        (from, to),
        (Pending, Building)
            | (Pending, Canceled)
            | (Building, Completed)
            | (Building, Canceled)
            | (Building, Failed)
            | (Failed, Canceled)
            | (Canceled, Pending)
            | (Failed, Pending)
    )
}

/// An entry in the build queue.
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub target: BuildTarget,
    pub status: ItemStatus,
    /// Percent complete, 0..=100
    pub progress: u8,
    pub(crate) started_at: Option<Instant>,
    pub(crate) started_wall: Option<DateTime<Utc>>,
}

impl QueueItem {
    pub fn new(target: BuildTarget) -> Self {
        Self {
            target,
            status: ItemStatus::Pending,
            progress: 0,
            started_at: None,
            started_wall: None,
        }
    }

    /// Move to `to`, panicking in debug builds on an illegal transition.
    pub(crate) fn transition(&mut self, to: ItemStatus) {
        debug_assert!(
            is_valid_transition(self.status, to),
            "illegal queue transition {} -> {}",
            self.status,
            to
        );
        self.status = to;
    }

    /// Back to a clean slate with the given status.
    pub(crate) fn reset(&mut self, to: ItemStatus) {
        self.transition(to);
        self.progress = 0;
        self.started_at = None;
        self.started_wall = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ItemStatus::*;

    #[test]
    fn test_terminal_states() {
        assert!(!Pending.is_terminal());
        assert!(!Building.is_terminal());
        assert!(Completed.is_terminal());
        assert!(Canceled.is_terminal());
        assert!(Failed.is_terminal());
    }

    #[test]
    fn test_valid_transitions() {
        assert!(is_valid_transition(Pending, Building));
        assert!(is_valid_transition(Building, Completed));
        assert!(is_valid_transition(Building, Canceled));
        assert!(is_valid_transition(Building, Failed));
        assert!(is_valid_transition(Canceled, Pending));
        assert!(is_valid_transition(Failed, Pending));
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!is_valid_transition(Pending, Completed));
        assert!(!is_valid_transition(Pending, Failed));
        assert!(!is_valid_transition(Completed, Pending));
        assert!(!is_valid_transition(Completed, Canceled));
        assert!(!is_valid_transition(Canceled, Building));
    }

    #[test]
    fn test_retryable() {
        assert!(Canceled.is_retryable());
        assert!(Failed.is_retryable());
        assert!(!Completed.is_retryable());
        assert!(!Pending.is_retryable());
    }
}
