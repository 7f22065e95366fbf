//! Row definitions for the monitoring state
//!
//! ## Tables
//!
//! - **tracked_entities**: one row per monitored app, keyed by `(class, key)`
//! - **archived_entities**: snapshots of apps that left the registry
//! - **status_history**: append-only log of status transitions
//! - **accounts**: credential material for the authoritative probe tier
//!
//! The probe bookkeeping lives on [`TrackedEntity`] as plain methods so the
//! rules for `removed_at` and `error_count` are the same for every backend.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::util::truncate_message;

/// Reserved `error_count` marking a permanent configuration error
pub const PERMANENT_ERROR_SENTINEL: u32 = 999;

/// Cap on the stored `last_error_message`
pub const MAX_ERROR_MESSAGE_CHARS: usize = 500;

/// Monitor class owning a set of entities
///
/// Every class has its own registry table, schedule and identity namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorClass {
    /// Apps going through release review
    Review,

    /// Own apps watched for removal from the store
    Removal,

    /// Target/competitor apps (no credentials)
    Competitor,
}

impl MonitorClass {
    pub const ALL: [MonitorClass; 3] = [
        MonitorClass::Review,
        MonitorClass::Removal,
        MonitorClass::Competitor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorClass::Review => "review",
            MonitorClass::Removal => "removal",
            MonitorClass::Competitor => "competitor",
        }
    }

    /// Sweep interval used when the config does not set one
    pub fn default_interval_secs(&self) -> u64 {
        match self {
            MonitorClass::Review => 60 * 60,
            MonitorClass::Removal | MonitorClass::Competitor => 12 * 60 * 60,
        }
    }
}

impl std::fmt::Display for MonitorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MonitorClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "review" => Ok(MonitorClass::Review),
            "removal" => Ok(MonitorClass::Removal),
            "competitor" => Ok(MonitorClass::Competitor),
            other => Err(format!("unknown monitor class '{other}'")),
        }
    }
}

/// Real-world availability of an app
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntityStatus {
    Available,
    Removed,
    Unknown,
}

impl EntityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityStatus::Available => "available",
            EntityStatus::Removed => "removed",
            EntityStatus::Unknown => "unknown",
        }
    }

    /// Parse the database representation, anything unrecognised is `Unknown`
    pub fn from_db(value: &str) -> Self {
        match value {
            "available" => EntityStatus::Available,
            "removed" => EntityStatus::Removed,
            _ => EntityStatus::Unknown,
        }
    }
}

impl std::fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What caused a status transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeSource {
    Probe,
    Sync,
}

impl ChangeSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeSource::Probe => "probe",
            ChangeSource::Sync => "sync",
        }
    }

    pub fn from_db(value: &str) -> Self {
        match value {
            "sync" => ChangeSource::Sync,
            _ => ChangeSource::Probe,
        }
    }
}

/// Registry row after field mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedEntity {
    /// Identity key (bundle identifier)
    pub key: String,

    pub name: String,

    /// Weak reference to an [`AccountCredential`]
    pub account_id: Option<String>,

    /// Monitoring flag, when the registry table maps one
    pub monitoring_enabled: Option<bool>,
}

/// Timestamp and host of a registry sync
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStamp {
    pub synced_at: DateTime<Utc>,
    pub origin: String,
}

/// One entry of the status history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub class: MonitorClass,
    pub key: String,
    pub from: EntityStatus,
    pub to: EntityStatus,
    pub source: ChangeSource,
    pub changed_at: DateTime<Utc>,
}

/// One monitored application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedEntity {
    pub class: MonitorClass,
    pub key: String,
    pub name: String,
    pub account_id: Option<String>,
    pub status: EntityStatus,
    pub monitoring_enabled: bool,
    pub removed_at: Option<DateTime<Utc>>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub error_count: u32,
    pub last_error_message: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub sync_origin: Option<String>,
}

impl TrackedEntity {
    /// Fresh row for an entity first seen in the registry
    pub fn from_registry(
        class: MonitorClass,
        entity: &NormalizedEntity,
        stamp: &SyncStamp,
    ) -> Self {
        Self {
            class,
            key: entity.key.clone(),
            name: entity.name.clone(),
            account_id: entity.account_id.clone(),
            status: EntityStatus::Available,
            monitoring_enabled: entity.monitoring_enabled.unwrap_or(true),
            removed_at: None,
            last_checked_at: None,
            error_count: 0,
            last_error_message: None,
            last_synced_at: Some(stamp.synced_at),
            sync_origin: Some(stamp.origin.clone()),
        }
    }

    pub fn has_permanent_error(&self) -> bool {
        self.error_count == PERMANENT_ERROR_SENTINEL
    }

    /// Refresh from a registry appearance
    ///
    /// A registry appearance means "this should be live": status goes back to
    /// AVAILABLE and error state is cleared. The monitoring flag is only
    /// overwritten when the registry maps one.
    pub fn apply_registry_refresh(
        &mut self,
        entity: &NormalizedEntity,
        stamp: &SyncStamp,
    ) -> Option<StatusChange> {
        self.name = entity.name.clone();
        self.account_id = entity.account_id.clone();
        if let Some(enabled) = entity.monitoring_enabled {
            self.monitoring_enabled = enabled;
        }
        self.error_count = 0;
        self.last_error_message = None;
        self.last_synced_at = Some(stamp.synced_at);
        self.sync_origin = Some(stamp.origin.clone());

        self.transition(EntityStatus::Available, ChangeSource::Sync, stamp.synced_at)
    }

    /// Record a successful probe
    pub fn apply_success(
        &mut self,
        status: EntityStatus,
        now: DateTime<Utc>,
    ) -> Option<StatusChange> {
        self.error_count = 0;
        self.last_error_message = None;
        self.last_checked_at = Some(now);

        self.transition(status, ChangeSource::Probe, now)
    }

    /// Record a failed probe
    ///
    /// Permanent failures pin `error_count` to the sentinel. Transient ones
    /// count up from the previous value, restarting when the previous value
    /// was the sentinel and never reaching it.
    pub fn apply_failure(
        &mut self,
        kind: ErrorKind,
        message: &str,
        now: DateTime<Utc>,
    ) -> Option<StatusChange> {
        self.error_count = match kind {
            ErrorKind::Permanent => PERMANENT_ERROR_SENTINEL,
            ErrorKind::Transient | ErrorKind::SafetyAbort => {
                if self.has_permanent_error() {
                    1
                } else {
                    self.error_count.saturating_add(1).min(PERMANENT_ERROR_SENTINEL - 1)
                }
            }
        };
        self.last_error_message = Some(truncate_message(message, MAX_ERROR_MESSAGE_CHARS));
        self.last_checked_at = Some(now);

        self.transition(EntityStatus::Unknown, ChangeSource::Probe, now)
    }

    fn transition(
        &mut self,
        to: EntityStatus,
        source: ChangeSource,
        at: DateTime<Utc>,
    ) -> Option<StatusChange> {
        match to {
            EntityStatus::Removed => {
                if self.removed_at.is_none() {
                    self.removed_at = Some(at);
                }
            }
            EntityStatus::Available => self.removed_at = None,
            EntityStatus::Unknown => {}
        }

        let from = self.status;
        self.status = to;

        (from != to).then(|| StatusChange {
            class: self.class,
            key: self.key.clone(),
            from,
            to,
            source,
            changed_at: at,
        })
    }
}

/// Authentication material for the authoritative probe tier
#[derive(Clone, PartialEq, Eq)]
pub struct AccountCredential {
    pub id: String,
    pub name: Option<String>,
    pub issuer_id: String,
    pub key_id: String,
    pub team_id: String,
    pub private_key: String,
}

impl AccountCredential {
    /// Names of required fields that are empty
    pub fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("issuer_id", &self.issuer_id),
            ("key_id", &self.key_id),
            ("team_id", &self.team_id),
            ("private_key", &self.private_key),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }
}

impl std::fmt::Debug for AccountCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountCredential")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("issuer_id", &self.issuer_id)
            .field("key_id", &self.key_id)
            .field("team_id", &self.team_id)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Snapshot of an entity that left the canonical registry list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub class: MonitorClass,
    pub key: String,
    pub name: String,
    pub account_id: Option<String>,
    pub last_status: EntityStatus,
    pub monitoring_enabled: bool,
    pub error_count: u32,
    pub last_error_message: Option<String>,
    pub removed_at: Option<DateTime<Utc>>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub archive_reason: String,
    pub archived_at: DateTime<Utc>,
}

impl ArchiveRecord {
    pub fn from_entity(entity: &TrackedEntity, reason: &str, archived_at: DateTime<Utc>) -> Self {
        Self {
            class: entity.class,
            key: entity.key.clone(),
            name: entity.name.clone(),
            account_id: entity.account_id.clone(),
            last_status: entity.status,
            monitoring_enabled: entity.monitoring_enabled,
            error_count: entity.error_count,
            last_error_message: entity.last_error_message.clone(),
            removed_at: entity.removed_at,
            last_checked_at: entity.last_checked_at,
            archive_reason: reason.to_string(),
            archived_at,
        }
    }
}

/// Aggregate counts for one monitor class
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub total: usize,
    pub monitoring_enabled: usize,
    pub available: usize,
    pub removed: usize,
    pub unknown: usize,
    pub permanent_errors: usize,
    pub archived: usize,
}

impl StatusCounts {
    /// Add one active entity to the counts
    pub fn tally(&mut self, entity: &TrackedEntity) {
        self.total += 1;
        if entity.monitoring_enabled {
            self.monitoring_enabled += 1;
        }
        match entity.status {
            EntityStatus::Available => self.available += 1,
            EntityStatus::Removed => self.removed += 1,
            EntityStatus::Unknown => self.unknown += 1,
        }
        if entity.has_permanent_error() {
            self.permanent_errors += 1;
        }
    }
}
