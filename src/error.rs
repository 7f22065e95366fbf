//! Error classification shared by every layer of the engine
//!
//! Each error type in the crate (`ProbeError`, `RegistryError`,
//! `StorageError`, `MonitorError`) maps onto one [`ErrorKind`]. The reconciler
//! decides how to record a failure by matching on the kind, never on the
//! message text.

use serde::{Deserialize, Serialize};

/// How a failure must be treated by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network, timeout or unexpected upstream shape. Retried by the next sweep.
    Transient,

    /// Configuration problem (e.g. incomplete credential). Needs an operator.
    Permanent,

    /// A sync pass refused to run because the registry looked like it was down.
    SafetyAbort,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Permanent => "permanent",
            ErrorKind::SafetyAbort => "safety_abort",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
