//! Errors surfaced by reconciler and scheduler operations

use thiserror::Error;

use crate::error::ErrorKind;
use crate::registry::RegistryError;
use crate::storage::{MonitorClass, StorageError};

pub type MonitorResult<T> = Result<T, MonitorError>;

#[derive(Debug, Error)]
pub enum MonitorError {
    /// Empty canonical list while more than `floor` entities are active
    #[error(
        "{class} sync aborted: registry returned no entities but {active} are active (floor {floor})"
    )]
    SafetyAbort {
        class: MonitorClass,
        active: usize,
        floor: usize,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("{class} entity {key} not found")]
    NotFound { class: MonitorClass, key: String },

    #[error("{class} entity {key} is already being checked")]
    CheckInProgress { class: MonitorClass, key: String },
}

impl MonitorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MonitorError::SafetyAbort { .. } => ErrorKind::SafetyAbort,
            MonitorError::Registry(e) => e.kind(),
            MonitorError::Storage(e) => e.kind(),
            MonitorError::NotFound { .. } => ErrorKind::Permanent,
            MonitorError::CheckInProgress { .. } => ErrorKind::Transient,
        }
    }
}
