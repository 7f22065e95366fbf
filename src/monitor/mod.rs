//! Reconciliation and scheduling per monitor class
//!
//! ## Message Flow
//!
//! ```text
//! Scheduler tick → sweep ─┬─ sync:      registry → upsert / archive
//!                         └─ check_all: select_pending → probe → record_check
//!                                                    │
//!                                                    └─ MonitorEvent → [notifier, API, ...]
//! ```
//!
//! ## Serialization
//!
//! Each [`Reconciler`] owns a sweep lock: a scheduled sweep is skipped while
//! another sync or `check_all` of the same class runs, manual calls wait.
//! `check_one` bypasses the sweep lock but claims the key in an in-flight
//! set, so one entity is never probed twice at the same time.

pub mod error;
pub mod messages;
pub mod reconciler;
pub mod scheduler;

pub use error::{MonitorError, MonitorResult};
pub use messages::{CheckReport, MonitorEvent, SchedulerStatus, SyncReport};
pub use reconciler::{ARCHIVE_REASON, Reconciler, ReconcilerConfig};
pub use scheduler::Scheduler;
