//! In-memory state store (no persistence)
//!
//! This store keeps all state in process memory.
//! It's useful for:
//! - Testing without database dependencies
//! - Running with `"backend": "none"` (state is rebuilt by the first sync)
//!
//! ## Limitations
//!
//! - **No persistence**: All data lost on restart
//! - **Single process**: State is not shared between hubs

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use super::backend::{HealthStatus, StateStore};
use super::error::StorageResult;
use super::schema::{
    AccountCredential, ArchiveRecord, MonitorClass, NormalizedEntity, StatusChange, StatusCounts,
    SyncStamp, TrackedEntity,
};

type EntityKey = (MonitorClass, String);

#[derive(Default)]
struct MemoryState {
    accounts: HashMap<String, AccountCredential>,
    entities: BTreeMap<EntityKey, TrackedEntity>,
    archived: BTreeMap<EntityKey, ArchiveRecord>,
    history: Vec<StatusChange>,
}

/// In-memory state store
///
/// A single lock guards all tables, which gives every operation the same
/// atomicity the SQLite transactions provide.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn upsert_accounts(&self, accounts: &[AccountCredential]) -> StorageResult<usize> {
        let mut state = self.state.write().await;
        for account in accounts {
            state.accounts.insert(account.id.clone(), account.clone());
        }
        Ok(accounts.len())
    }

    async fn get_account(&self, id: &str) -> StorageResult<Option<AccountCredential>> {
        Ok(self.state.read().await.accounts.get(id).cloned())
    }

    async fn upsert_entities(
        &self,
        class: MonitorClass,
        entities: &[NormalizedEntity],
        stamp: &SyncStamp,
    ) -> StorageResult<usize> {
        let mut state = self.state.write().await;

        for entity in entities {
            let key = (class, entity.key.clone());
            state.archived.remove(&key);

            let change = match state.entities.get_mut(&key) {
                Some(existing) => existing.apply_registry_refresh(entity, stamp),
                None => {
                    state
                        .entities
                        .insert(key, TrackedEntity::from_registry(class, entity, stamp));
                    None
                }
            };

            if let Some(change) = change {
                state.history.push(change);
            }
        }

        debug!("upserted {} {} entities in memory", entities.len(), class);
        Ok(entities.len())
    }

    async fn active_keys(&self, class: MonitorClass) -> StorageResult<Vec<String>> {
        let state = self.state.read().await;
        Ok(state
            .entities
            .keys()
            .filter(|(c, _)| *c == class)
            .map(|(_, key)| key.clone())
            .collect())
    }

    async fn select_pending(&self, class: MonitorClass) -> StorageResult<Vec<TrackedEntity>> {
        let state = self.state.read().await;
        let mut pending: Vec<TrackedEntity> = state
            .entities
            .values()
            .filter(|e| e.class == class && e.monitoring_enabled)
            .cloned()
            .collect();

        // None sorts before Some, which puts never-checked rows first
        pending.sort_by(|a, b| {
            a.last_checked_at
                .cmp(&b.last_checked_at)
                .then_with(|| a.key.cmp(&b.key))
        });

        Ok(pending)
    }

    async fn list_entities(&self, class: MonitorClass) -> StorageResult<Vec<TrackedEntity>> {
        let state = self.state.read().await;
        Ok(state
            .entities
            .values()
            .filter(|e| e.class == class)
            .cloned()
            .collect())
    }

    async fn get_entity(
        &self,
        class: MonitorClass,
        key: &str,
    ) -> StorageResult<Option<TrackedEntity>> {
        let state = self.state.read().await;
        Ok(state.entities.get(&(class, key.to_string())).cloned())
    }

    async fn record_check(
        &self,
        entity: &TrackedEntity,
        change: Option<&StatusChange>,
    ) -> StorageResult<bool> {
        let mut state = self.state.write().await;

        let Some(row) = state.entities.get_mut(&(entity.class, entity.key.clone())) else {
            debug!("{} was archived before its check was recorded", entity.key);
            return Ok(false);
        };

        row.status = entity.status;
        row.removed_at = entity.removed_at;
        row.last_checked_at = entity.last_checked_at;
        row.error_count = entity.error_count;
        row.last_error_message = entity.last_error_message.clone();

        if let Some(change) = change {
            state.history.push(change.clone());
        }

        Ok(true)
    }

    async fn set_monitoring(
        &self,
        class: MonitorClass,
        key: &str,
        enabled: bool,
    ) -> StorageResult<bool> {
        let mut state = self.state.write().await;
        match state.entities.get_mut(&(class, key.to_string())) {
            Some(row) => {
                row.monitoring_enabled = enabled;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn archive(
        &self,
        class: MonitorClass,
        keys: &[String],
        reason: &str,
        archived_at: DateTime<Utc>,
    ) -> StorageResult<usize> {
        let mut state = self.state.write().await;
        let mut moved = 0;

        for key in keys {
            let entity_key = (class, key.clone());
            if let Some(entity) = state.entities.remove(&entity_key) {
                state
                    .archived
                    .insert(entity_key, ArchiveRecord::from_entity(&entity, reason, archived_at));
                moved += 1;
            }
        }

        Ok(moved)
    }

    async fn list_archived(&self, class: MonitorClass) -> StorageResult<Vec<ArchiveRecord>> {
        let state = self.state.read().await;
        Ok(state
            .archived
            .values()
            .filter(|r| r.class == class)
            .cloned()
            .collect())
    }

    async fn status_history(
        &self,
        class: MonitorClass,
        key: &str,
        limit: usize,
    ) -> StorageResult<Vec<StatusChange>> {
        let state = self.state.read().await;
        Ok(state
            .history
            .iter()
            .rev()
            .filter(|c| c.class == class && c.key == key)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn stats(&self, class: MonitorClass) -> StorageResult<StatusCounts> {
        let state = self.state.read().await;
        let mut counts = StatusCounts::default();
        for entity in state.entities.values().filter(|e| e.class == class) {
            counts.tally(entity);
        }
        counts.archived = state.archived.keys().filter(|(c, _)| *c == class).count();
        Ok(counts)
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let state = self.state.read().await;
        Ok(HealthStatus {
            healthy: true,
            message: "In-memory storage operational".to_string(),
            metadata: HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                ("entities".to_string(), state.entities.len().to_string()),
            ]),
        })
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory store (no-op)");
        Ok(())
    }
}
