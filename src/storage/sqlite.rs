//! SQLite state store implementation
//!
//! This module provides a SQLite-based implementation of the `StateStore` trait.
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Better concurrency for reads during writes
//! - **Connection pooling**: Efficient resource usage
//! - **Migrations**: Automatic schema versioning with sqlx
//!
//! ## Atomicity
//!
//! - Each upsert batch runs in one transaction.
//! - Each archive move (snapshot + delete) runs in its own transaction, so a
//!   failure midway through a sync leaves every entity either active or
//!   archived, never both.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite, Transaction};
use tracing::{debug, info, instrument, warn};

use super::backend::{HealthStatus, StateStore};
use super::error::{StorageError, StorageResult};
use super::schema::{
    AccountCredential, ArchiveRecord, ChangeSource, EntityStatus, MonitorClass, NormalizedEntity,
    PERMANENT_ERROR_SENTINEL, StatusChange, StatusCounts, SyncStamp, TrackedEntity,
};

const ENTITY_COLUMNS: &str = "class, key, name, account_id, status, monitoring_enabled, \
     removed_at, last_checked_at, error_count, last_error_message, last_synced_at, sync_origin";

/// SQLite state store
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteStore {
    /// Create a new SQLite store
    ///
    /// This will:
    /// 1. Create the database file if it doesn't exist
    /// 2. Run migrations to create tables
    /// 3. Configure SQLite for WAL mode and a busy timeout
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite store at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("database migrations complete");

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    fn timestamp_to_millis(dt: &DateTime<Utc>) -> i64 {
        dt.timestamp_millis()
    }

    fn millis_to_timestamp(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
    }

    fn opt_millis(dt: Option<DateTime<Utc>>) -> Option<i64> {
        dt.as_ref().map(Self::timestamp_to_millis)
    }

    fn opt_timestamp(row: &SqliteRow, column: &str) -> StorageResult<Option<DateTime<Utc>>> {
        Ok(row
            .try_get::<Option<i64>, _>(column)?
            .map(Self::millis_to_timestamp))
    }

    fn class_from_row(row: &SqliteRow) -> StorageResult<MonitorClass> {
        let class: String = row.try_get("class")?;
        class.parse().map_err(StorageError::QueryFailed)
    }

    fn error_count_from_row(row: &SqliteRow) -> StorageResult<u32> {
        let count: i64 = row.try_get("error_count")?;
        Ok(count.clamp(0, u32::MAX as i64) as u32)
    }

    fn entity_from_row(row: &SqliteRow) -> StorageResult<TrackedEntity> {
        Ok(TrackedEntity {
            class: Self::class_from_row(row)?,
            key: row.try_get("key")?,
            name: row.try_get("name")?,
            account_id: row.try_get("account_id")?,
            status: EntityStatus::from_db(row.try_get("status")?),
            monitoring_enabled: row.try_get("monitoring_enabled")?,
            removed_at: Self::opt_timestamp(row, "removed_at")?,
            last_checked_at: Self::opt_timestamp(row, "last_checked_at")?,
            error_count: Self::error_count_from_row(row)?,
            last_error_message: row.try_get("last_error_message")?,
            last_synced_at: Self::opt_timestamp(row, "last_synced_at")?,
            sync_origin: row.try_get("sync_origin")?,
        })
    }

    fn archive_from_row(row: &SqliteRow) -> StorageResult<ArchiveRecord> {
        Ok(ArchiveRecord {
            class: Self::class_from_row(row)?,
            key: row.try_get("key")?,
            name: row.try_get("name")?,
            account_id: row.try_get("account_id")?,
            last_status: EntityStatus::from_db(row.try_get("last_status")?),
            monitoring_enabled: row.try_get("monitoring_enabled")?,
            error_count: Self::error_count_from_row(row)?,
            last_error_message: row.try_get("last_error_message")?,
            removed_at: Self::opt_timestamp(row, "removed_at")?,
            last_checked_at: Self::opt_timestamp(row, "last_checked_at")?,
            archive_reason: row.try_get("archive_reason")?,
            archived_at: Self::millis_to_timestamp(row.try_get("archived_at")?),
        })
    }

    fn change_from_row(row: &SqliteRow) -> StorageResult<StatusChange> {
        Ok(StatusChange {
            class: Self::class_from_row(row)?,
            key: row.try_get("key")?,
            from: EntityStatus::from_db(row.try_get("from_status")?),
            to: EntityStatus::from_db(row.try_get("to_status")?),
            source: ChangeSource::from_db(row.try_get("source")?),
            changed_at: Self::millis_to_timestamp(row.try_get("changed_at")?),
        })
    }

    async fn insert_change(
        tx: &mut Transaction<'_, Sqlite>,
        change: &StatusChange,
    ) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO status_history (class, key, from_status, to_status, source, changed_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(change.class.as_str())
        .bind(&change.key)
        .bind(change.from.as_str())
        .bind(change.to.as_str())
        .bind(change.source.as_str())
        .bind(Self::timestamp_to_millis(&change.changed_at))
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    async fn archive_one(
        &self,
        class: MonitorClass,
        key: &str,
        reason: &str,
        archived_at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO archived_entities (
                class, key, name, account_id, last_status, monitoring_enabled,
                error_count, last_error_message, removed_at, last_checked_at,
                archive_reason, archived_at
            )
            SELECT class, key, name, account_id, status, monitoring_enabled,
                   error_count, last_error_message, removed_at, last_checked_at,
                   ?, ?
            FROM tracked_entities
            WHERE class = ? AND key = ?
            "#,
        )
        .bind(reason)
        .bind(Self::timestamp_to_millis(&archived_at))
        .bind(class.as_str())
        .bind(key)
        .execute(&mut *tx)
        .await?;

        let deleted = sqlx::query("DELETE FROM tracked_entities WHERE class = ? AND key = ?")
            .bind(class.as_str())
            .bind(key)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(deleted == 1)
    }
}

#[async_trait]
impl StateStore for SqliteStore {
    #[instrument(skip(self, accounts), fields(count = accounts.len()))]
    async fn upsert_accounts(&self, accounts: &[AccountCredential]) -> StorageResult<usize> {
        if accounts.is_empty() {
            return Ok(0);
        }

        let now = Self::timestamp_to_millis(&Utc::now());
        let mut tx = self.pool.begin().await?;

        for account in accounts {
            sqlx::query(
                r#"
                INSERT INTO accounts (id, name, issuer_id, key_id, team_id, private_key, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (id) DO UPDATE SET
                    name = excluded.name,
                    issuer_id = excluded.issuer_id,
                    key_id = excluded.key_id,
                    team_id = excluded.team_id,
                    private_key = excluded.private_key,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&account.id)
            .bind(&account.name)
            .bind(&account.issuer_id)
            .bind(&account.key_id)
            .bind(&account.team_id)
            .bind(&account.private_key)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!("upserted {} accounts", accounts.len());
        Ok(accounts.len())
    }

    async fn get_account(&self, id: &str) -> StorageResult<Option<AccountCredential>> {
        let row = sqlx::query(
            "SELECT id, name, issuer_id, key_id, team_id, private_key FROM accounts WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(AccountCredential {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                issuer_id: row.try_get("issuer_id")?,
                key_id: row.try_get("key_id")?,
                team_id: row.try_get("team_id")?,
                private_key: row.try_get("private_key")?,
            })
        })
        .transpose()
    }

    #[instrument(skip(self, entities, stamp), fields(class = %class, count = entities.len()))]
    async fn upsert_entities(
        &self,
        class: MonitorClass,
        entities: &[NormalizedEntity],
        stamp: &SyncStamp,
    ) -> StorageResult<usize> {
        if entities.is_empty() {
            return Ok(0);
        }

        let synced_at = Self::timestamp_to_millis(&stamp.synced_at);
        let mut tx = self.pool.begin().await?;

        for entity in entities {
            let previous: Option<String> = sqlx::query_scalar(
                "SELECT status FROM tracked_entities WHERE class = ? AND key = ?",
            )
            .bind(class.as_str())
            .bind(&entity.key)
            .fetch_optional(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO tracked_entities (
                    class, key, name, account_id, status, monitoring_enabled,
                    removed_at, last_checked_at, error_count, last_error_message,
                    last_synced_at, sync_origin
                )
                VALUES (?, ?, ?, ?, 'available', COALESCE(?, 1), NULL, NULL, 0, NULL, ?, ?)
                ON CONFLICT (class, key) DO UPDATE SET
                    name = excluded.name,
                    account_id = excluded.account_id,
                    status = 'available',
                    monitoring_enabled = COALESCE(?, tracked_entities.monitoring_enabled),
                    removed_at = NULL,
                    error_count = 0,
                    last_error_message = NULL,
                    last_synced_at = excluded.last_synced_at,
                    sync_origin = excluded.sync_origin
                "#,
            )
            .bind(class.as_str())
            .bind(&entity.key)
            .bind(&entity.name)
            .bind(&entity.account_id)
            .bind(entity.monitoring_enabled)
            .bind(synced_at)
            .bind(&stamp.origin)
            .bind(entity.monitoring_enabled)
            .execute(&mut *tx)
            .await?;

            sqlx::query("DELETE FROM archived_entities WHERE class = ? AND key = ?")
                .bind(class.as_str())
                .bind(&entity.key)
                .execute(&mut *tx)
                .await?;

            let from = previous.as_deref().map(EntityStatus::from_db);
            if let Some(from) = from.filter(|s| *s != EntityStatus::Available) {
                let change = StatusChange {
                    class,
                    key: entity.key.clone(),
                    from,
                    to: EntityStatus::Available,
                    source: ChangeSource::Sync,
                    changed_at: stamp.synced_at,
                };
                Self::insert_change(&mut tx, &change).await?;
            }
        }

        tx.commit().await?;
        debug!("upsert complete");
        Ok(entities.len())
    }

    async fn active_keys(&self, class: MonitorClass) -> StorageResult<Vec<String>> {
        let keys =
            sqlx::query_scalar("SELECT key FROM tracked_entities WHERE class = ? ORDER BY key")
                .bind(class.as_str())
                .fetch_all(&self.pool)
                .await?;
        Ok(keys)
    }

    #[instrument(skip(self), fields(class = %class))]
    async fn select_pending(&self, class: MonitorClass) -> StorageResult<Vec<TrackedEntity>> {
        let sql = format!(
            r#"
            SELECT {ENTITY_COLUMNS}
            FROM tracked_entities
            WHERE class = ? AND monitoring_enabled = 1
            ORDER BY last_checked_at IS NOT NULL, last_checked_at ASC, key ASC
            "#
        );

        let rows = sqlx::query(&sql)
            .bind(class.as_str())
            .fetch_all(&self.pool)
            .await?;

        let pending = rows
            .iter()
            .map(Self::entity_from_row)
            .collect::<StorageResult<Vec<_>>>()?;
        debug!("{} entities pending", pending.len());
        Ok(pending)
    }

    async fn list_entities(&self, class: MonitorClass) -> StorageResult<Vec<TrackedEntity>> {
        let sql =
            format!("SELECT {ENTITY_COLUMNS} FROM tracked_entities WHERE class = ? ORDER BY key");
        let rows = sqlx::query(&sql)
            .bind(class.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::entity_from_row).collect()
    }

    async fn get_entity(
        &self,
        class: MonitorClass,
        key: &str,
    ) -> StorageResult<Option<TrackedEntity>> {
        let sql =
            format!("SELECT {ENTITY_COLUMNS} FROM tracked_entities WHERE class = ? AND key = ?");
        let row = sqlx::query(&sql)
            .bind(class.as_str())
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::entity_from_row).transpose()
    }

    #[instrument(skip(self, entity, change), fields(class = %entity.class, key = %entity.key))]
    async fn record_check(
        &self,
        entity: &TrackedEntity,
        change: Option<&StatusChange>,
    ) -> StorageResult<bool> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE tracked_entities
            SET status = ?, removed_at = ?, last_checked_at = ?,
                error_count = ?, last_error_message = ?
            WHERE class = ? AND key = ?
            "#,
        )
        .bind(entity.status.as_str())
        .bind(Self::opt_millis(entity.removed_at))
        .bind(Self::opt_millis(entity.last_checked_at))
        .bind(entity.error_count as i64)
        .bind(&entity.last_error_message)
        .bind(entity.class.as_str())
        .bind(&entity.key)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            debug!("entity was archived before its check was recorded");
        } else if let Some(change) = change {
            Self::insert_change(&mut tx, change).await?;
        }

        tx.commit().await?;
        Ok(updated == 1)
    }

    async fn set_monitoring(
        &self,
        class: MonitorClass,
        key: &str,
        enabled: bool,
    ) -> StorageResult<bool> {
        let updated = sqlx::query(
            "UPDATE tracked_entities SET monitoring_enabled = ? WHERE class = ? AND key = ?",
        )
        .bind(enabled)
        .bind(class.as_str())
        .bind(key)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated == 1)
    }

    #[instrument(skip(self, keys), fields(class = %class, count = keys.len()))]
    async fn archive(
        &self,
        class: MonitorClass,
        keys: &[String],
        reason: &str,
        archived_at: DateTime<Utc>,
    ) -> StorageResult<usize> {
        let mut moved = 0;
        for key in keys {
            if self.archive_one(class, key, reason, archived_at).await? {
                moved += 1;
            } else {
                warn!("{key} was not active, nothing archived");
            }
        }
        info!("archived {} {} entities", moved, class);
        Ok(moved)
    }

    async fn list_archived(&self, class: MonitorClass) -> StorageResult<Vec<ArchiveRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT class, key, name, account_id, last_status, monitoring_enabled,
                   error_count, last_error_message, removed_at, last_checked_at,
                   archive_reason, archived_at
            FROM archived_entities
            WHERE class = ?
            ORDER BY archived_at DESC, key ASC
            "#,
        )
        .bind(class.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::archive_from_row).collect()
    }

    async fn status_history(
        &self,
        class: MonitorClass,
        key: &str,
        limit: usize,
    ) -> StorageResult<Vec<StatusChange>> {
        let rows = sqlx::query(
            r#"
            SELECT class, key, from_status, to_status, source, changed_at
            FROM status_history
            WHERE class = ? AND key = ?
            ORDER BY changed_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(class.as_str())
        .bind(key)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::change_from_row).collect()
    }

    async fn stats(&self, class: MonitorClass) -> StorageResult<StatusCounts> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total,
                   COALESCE(SUM(monitoring_enabled), 0) AS enabled,
                   COALESCE(SUM(CASE WHEN status = 'available' THEN 1 ELSE 0 END), 0) AS available,
                   COALESCE(SUM(CASE WHEN status = 'removed' THEN 1 ELSE 0 END), 0) AS removed,
                   COALESCE(SUM(CASE WHEN status = 'unknown' THEN 1 ELSE 0 END), 0) AS unknown,
                   COALESCE(SUM(CASE WHEN error_count = ? THEN 1 ELSE 0 END), 0) AS permanent
            FROM tracked_entities
            WHERE class = ?
            "#,
        )
        .bind(PERMANENT_ERROR_SENTINEL as i64)
        .bind(class.as_str())
        .fetch_one(&self.pool)
        .await?;

        let archived: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM archived_entities WHERE class = ?")
                .bind(class.as_str())
                .fetch_one(&self.pool)
                .await?;

        let count = |column: &str| -> StorageResult<usize> {
            Ok(row.try_get::<i64, _>(column)?.max(0) as usize)
        };

        Ok(StatusCounts {
            total: count("total")?,
            monitoring_enabled: count("enabled")?,
            available: count("available")?,
            removed: count("removed")?,
            unknown: count("unknown")?,
            permanent_errors: count("permanent")?,
            archived: archived.max(0) as usize,
        })
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => {
                let mut metadata = HashMap::new();
                metadata.insert("backend".to_string(), "sqlite".to_string());
                metadata.insert("db_path".to_string(), self.db_path.clone());

                Ok(HealthStatus {
                    healthy: true,
                    message: "SQLite store operational".to_string(),
                    metadata,
                })
            }
            Err(e) => {
                warn!("health check failed: {}", e);
                Ok(HealthStatus {
                    healthy: false,
                    message: format!("health check failed: {}", e),
                    metadata: HashMap::new(),
                })
            }
        }
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite store");
        self.pool.close().await;
        Ok(())
    }
}
