//! Integration tests for the SQLite state store
//!
//! These tests verify that:
//! - Reconciled state survives a restart
//! - Archive and restore move rows atomically
//! - Checks recorded after archival are dropped
//! - Status history is returned newest first and limited

use std::sync::Arc;

use chrono::Duration;
use pretty_assertions::assert_eq;
use store_monitoring::{
    clock::Clock,
    probe::Verdict,
    storage::{EntityStatus, MonitorClass, StateStore, sqlite::SqliteStore},
};
use tempfile::tempdir;

use crate::helpers::{FakeProbe, FakeRegistry, Harness, Scripted, entity, keys};

async fn sqlite_harness(
    path: &std::path::Path,
    registry: Arc<FakeRegistry>,
    probe: Arc<FakeProbe>,
) -> Harness {
    let store: Arc<dyn StateStore> = Arc::new(SqliteStore::new(path).await.unwrap());
    Harness::with_parts(registry, probe, store)
}

#[tokio::test]
async fn test_state_survives_restart() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("state.db");

    let probe = FakeProbe::new();
    probe.answer("com.example.app01", Scripted::Verdict(Verdict::Removed));
    let harness = sqlite_harness(&db, FakeRegistry::new(keys(3)), probe).await;
    let reconciler = harness.reconciler(MonitorClass::Removal);
    reconciler.sync().await.unwrap();
    reconciler.check_all().await.unwrap();
    let checked_at = harness.clock.now();
    harness.store.close().await.unwrap();

    let reopened = SqliteStore::new(&db).await.unwrap();
    let rows = reopened.list_entities(MonitorClass::Removal).await.unwrap();
    assert_eq!(rows.len(), 3);

    let removed = rows.iter().find(|r| r.key == "com.example.app01").unwrap();
    assert_eq!(removed.status, EntityStatus::Removed);
    assert_eq!(removed.removed_at, Some(checked_at));
    assert_eq!(removed.last_checked_at, Some(checked_at));

    let stats = reopened.stats(MonitorClass::Removal).await.unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.available, 2);
    assert_eq!(stats.removed, 1);
}

#[tokio::test]
async fn test_archive_and_restore_round_trip() {
    let dir = tempdir().unwrap();
    let registry = FakeRegistry::new(vec![entity("com.example.a"), entity("com.example.b")]);
    let harness = sqlite_harness(&dir.path().join("state.db"), registry, FakeProbe::new()).await;
    let reconciler = harness.reconciler(MonitorClass::Review);
    reconciler.sync().await.unwrap();

    harness.registry.set_entities(vec![entity("com.example.a")]);
    harness.clock.advance(Duration::hours(1));
    reconciler.sync().await.unwrap();

    let archived = harness.store.list_archived(MonitorClass::Review).await.unwrap();
    assert_eq!(archived.len(), 1);
    assert_eq!(archived[0].key, "com.example.b");
    assert_eq!(archived[0].last_status, EntityStatus::Available);
    assert_eq!(archived[0].archived_at, harness.clock.now());
    let gone = harness.store.get_entity(MonitorClass::Review, "com.example.b").await.unwrap();
    assert_eq!(gone, None);
    assert_eq!(harness.store.stats(MonitorClass::Review).await.unwrap().archived, 1);

    harness
        .registry
        .set_entities(vec![entity("com.example.a"), entity("com.example.b")]);
    reconciler.sync().await.unwrap();

    assert!(harness.store.list_archived(MonitorClass::Review).await.unwrap().is_empty());
    assert!(
        harness
            .store
            .get_entity(MonitorClass::Review, "com.example.b")
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn test_check_recorded_after_archive_is_dropped() {
    let dir = tempdir().unwrap();
    let harness = sqlite_harness(
        &dir.path().join("state.db"),
        FakeRegistry::new(vec![entity("com.example.app")]),
        FakeProbe::new(),
    )
    .await;
    harness.reconciler(MonitorClass::Removal).sync().await.unwrap();

    let mut stale = harness
        .store
        .get_entity(MonitorClass::Removal, "com.example.app")
        .await
        .unwrap()
        .unwrap();
    harness
        .store
        .archive(
            MonitorClass::Removal,
            &["com.example.app".to_string()],
            "test",
            harness.clock.now(),
        )
        .await
        .unwrap();

    let change = stale.apply_success(EntityStatus::Removed, harness.clock.now());
    let recorded = harness.store.record_check(&stale, change.as_ref()).await.unwrap();
    assert!(!recorded);

    assert!(harness.store.active_keys(MonitorClass::Removal).await.unwrap().is_empty());
    assert!(
        harness
            .store
            .status_history(MonitorClass::Removal, "com.example.app", 10)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_history_is_newest_first_and_limited() {
    let dir = tempdir().unwrap();
    let probe = FakeProbe::new();
    let harness = sqlite_harness(
        &dir.path().join("state.db"),
        FakeRegistry::new(vec![entity("com.example.app")]),
        probe.clone(),
    )
    .await;
    let reconciler = harness.reconciler(MonitorClass::Removal);
    reconciler.sync().await.unwrap();

    for outcome in [
        Scripted::Verdict(Verdict::Removed),
        Scripted::Verdict(Verdict::Available),
        Scripted::Transient,
    ] {
        probe.answer("com.example.app", outcome);
        harness.clock.advance(Duration::minutes(5));
        reconciler.check_one("com.example.app").await.unwrap();
    }

    let history = harness
        .store
        .status_history(MonitorClass::Removal, "com.example.app", 2)
        .await
        .unwrap();
    let transitions: Vec<_> = history.iter().map(|c| (c.from, c.to)).collect();
    assert_eq!(
        transitions,
        vec![
            (EntityStatus::Available, EntityStatus::Unknown),
            (EntityStatus::Removed, EntityStatus::Available),
        ]
    );
    assert_eq!(history[0].changed_at, harness.clock.now());
}
