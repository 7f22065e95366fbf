//! State store trait definition
//!
//! This module defines the core `StateStore` trait that all storage
//! implementations must implement.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::StorageResult;
use super::schema::{
    AccountCredential, ArchiveRecord, MonitorClass, NormalizedEntity, StatusChange, StatusCounts,
    SyncStamp, TrackedEntity,
};

/// Health status of the storage backend
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: std::collections::HashMap<String, String>,
}

/// Persistence for the monitoring state
///
/// All writes are last-write-wins at row level. There is no optimistic
/// concurrency control: the reconciler runs at most one sweep per monitor
/// class, and different classes own disjoint `(class, key)` rows.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync` as they are shared by every
/// monitor class.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Insert or replace credential records, keyed by account id
    async fn upsert_accounts(&self, accounts: &[AccountCredential]) -> StorageResult<usize>;

    async fn get_account(&self, id: &str) -> StorageResult<Option<AccountCredential>>;

    /// Upsert canonical registry entities
    ///
    /// Existing rows are reset to AVAILABLE with cleared error state (see
    /// [`TrackedEntity::apply_registry_refresh`]), new rows are created, and
    /// any archive row for the same key is removed in the same transaction.
    /// Status resets are appended to the status history.
    async fn upsert_entities(
        &self,
        class: MonitorClass,
        entities: &[NormalizedEntity],
        stamp: &SyncStamp,
    ) -> StorageResult<usize>;

    /// Identity keys of all active entities in a class
    async fn active_keys(&self, class: MonitorClass) -> StorageResult<Vec<String>>;

    /// Entities due for a scheduled check
    ///
    /// Only rows with monitoring enabled, ordered by `last_checked_at`
    /// ascending with never-checked rows first, ties broken by key.
    async fn select_pending(&self, class: MonitorClass) -> StorageResult<Vec<TrackedEntity>>;

    /// All active entities in a class, ordered by key
    async fn list_entities(&self, class: MonitorClass) -> StorageResult<Vec<TrackedEntity>>;

    async fn get_entity(
        &self,
        class: MonitorClass,
        key: &str,
    ) -> StorageResult<Option<TrackedEntity>>;

    /// Persist the outcome of a probe
    ///
    /// Only the check columns are written, and only if the row is still
    /// active. `change` is appended to the status history when present.
    /// Returns false when the row was archived and nothing was written.
    async fn record_check(
        &self,
        entity: &TrackedEntity,
        change: Option<&StatusChange>,
    ) -> StorageResult<bool>;

    /// Toggle scheduled monitoring; returns false if the entity does not exist
    async fn set_monitoring(
        &self,
        class: MonitorClass,
        key: &str,
        enabled: bool,
    ) -> StorageResult<bool>;

    /// Move entities from the active set into the archive
    ///
    /// Each move is atomic: the snapshot is written and the active row is
    /// deleted in one transaction. Returns the number of entities moved.
    async fn archive(
        &self,
        class: MonitorClass,
        keys: &[String],
        reason: &str,
        archived_at: DateTime<Utc>,
    ) -> StorageResult<usize>;

    async fn list_archived(&self, class: MonitorClass) -> StorageResult<Vec<ArchiveRecord>>;

    /// Most recent status changes for an entity, newest first
    async fn status_history(
        &self,
        class: MonitorClass,
        key: &str,
        limit: usize,
    ) -> StorageResult<Vec<StatusChange>>;

    async fn stats(&self, class: MonitorClass) -> StorageResult<StatusCounts>;

    /// Check backend health
    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Close the backend and release resources
    async fn close(&self) -> StorageResult<()>;
}
