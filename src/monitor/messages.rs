//! Reports and events published by the monitor
//!
//! ## Design Principles
//!
//! 1. **Reports**: returned by the operation that produced them
//! 2. **Events**: broadcast to every subscriber (notifier, API, tests)
//! 3. **Immutability**: all messages are cloneable for multi-subscriber patterns

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::{EntityStatus, MonitorClass, StatusChange};

/// Outcome of one sync pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Canonical entities upserted
    pub synced_count: usize,

    /// Of those, entities that were not active before
    pub created_count: usize,

    /// Active entities moved to the archive
    pub archived_count: usize,

    /// Credential records upserted
    pub account_count: usize,
}

/// Outcome of one `check_all` pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckReport {
    /// Probes attempted
    pub checked: usize,
    pub available: usize,
    pub removed: usize,

    /// Probes that failed transiently
    pub unknown: usize,

    /// Probes that failed with a permanent configuration error
    pub failed: usize,

    /// Entities skipped because they were busy or gone
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub class: MonitorClass,
    pub is_running: bool,
    pub interval_ms: u64,
}

/// Event broadcast while the monitor works
///
/// The broadcast channel may lag or drop events for slow subscribers. The
/// state store stays the source of truth.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorEvent {
    SyncCompleted {
        class: MonitorClass,
        report: SyncReport,
        at: DateTime<Utc>,
    },

    /// The safety guard refused an empty canonical list
    SyncAborted {
        class: MonitorClass,
        active: usize,
        floor: usize,
        at: DateTime<Utc>,
    },

    SyncFailed {
        class: MonitorClass,
        error: String,
        at: DateTime<Utc>,
    },

    CheckStarted {
        class: MonitorClass,
        pending: usize,
        at: DateTime<Utc>,
    },

    EntityChecked {
        class: MonitorClass,
        key: String,
        status: EntityStatus,
        error: Option<String>,
        at: DateTime<Utc>,
    },

    StatusChanged {
        name: String,
        account_id: Option<String>,
        change: StatusChange,
    },

    CheckCompleted {
        class: MonitorClass,
        report: CheckReport,
        at: DateTime<Utc>,
    },
}

impl MonitorEvent {
    pub fn class(&self) -> MonitorClass {
        match self {
            MonitorEvent::SyncCompleted { class, .. }
            | MonitorEvent::SyncAborted { class, .. }
            | MonitorEvent::SyncFailed { class, .. }
            | MonitorEvent::CheckStarted { class, .. }
            | MonitorEvent::EntityChecked { class, .. }
            | MonitorEvent::CheckCompleted { class, .. } => *class,
            MonitorEvent::StatusChanged { change, .. } => change.class,
        }
    }
}
