//! API request and response types

use serde::{Deserialize, Serialize};

use crate::monitor::SchedulerStatus;
use crate::storage::{EntityStatus, StatusCounts};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub storage: String,
}

/// Scheduler state plus entity counts for one class
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSummary {
    #[serde(flatten)]
    pub scheduler: SchedulerStatus,
    pub counts: StatusCounts,
}

/// Body of `PUT .../monitoring`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringToggle {
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResponse {
    pub key: String,
    pub status: EntityStatus,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// Max results (default: 50)
    pub limit: Option<usize>,
}
