//! Integration tests for the reconciler
//!
//! These tests verify that:
//! - Sync creates, refreshes and archives rows against the registry
//! - The safety guard blocks mass archival on an empty registry answer
//! - Check passes record probe outcomes and status history
//! - Manual checks and sweeps never overlap on the same entity

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use store_monitoring::{
    clock::Clock,
    error::ErrorKind,
    monitor::{ARCHIVE_REASON, CheckReport, MonitorError, MonitorEvent, SyncReport},
    probe::Verdict,
    storage::{
        ChangeSource, EntityStatus, MonitorClass, NormalizedEntity,
        schema::PERMANENT_ERROR_SENTINEL,
    },
};

use crate::helpers::{
    FakeProbe, FakeRegistry, Harness, Scripted, account, drain, entity, entity_with_account, keys,
};

#[tokio::test]
async fn test_first_sync_creates_available_rows() {
    let harness = Harness::new(vec![entity("com.example.a"), entity("com.example.b")]);
    let reconciler = harness.reconciler(MonitorClass::Removal);

    let report = reconciler.sync().await.unwrap();
    assert_eq!(
        report,
        SyncReport {
            synced_count: 2,
            created_count: 2,
            archived_count: 0,
            account_count: 0,
        }
    );

    let rows = harness.store.list_entities(MonitorClass::Removal).await.unwrap();
    assert_eq!(rows.len(), 2);
    for row in &rows {
        assert_eq!(row.status, EntityStatus::Available);
        assert!(row.monitoring_enabled);
        assert_eq!(row.error_count, 0);
        assert_eq!(row.last_checked_at, None);
        assert_eq!(row.last_synced_at, Some(harness.clock.now()));
        assert_eq!(row.sync_origin.as_deref(), Some("test-host"));
    }
}

#[tokio::test]
async fn test_sync_archives_entities_that_left_the_registry() {
    let harness = Harness::new(vec![entity("com.example.a"), entity("com.example.b")]);
    let reconciler = harness.reconciler(MonitorClass::Removal);
    reconciler.sync().await.unwrap();

    harness.registry.set_entities(vec![entity("com.example.a")]);
    let report = reconciler.sync().await.unwrap();
    assert_eq!(report.archived_count, 1);
    assert_eq!(report.created_count, 0);

    let active = harness.store.active_keys(MonitorClass::Removal).await.unwrap();
    assert_eq!(active, vec!["com.example.a".to_string()]);

    let archived = harness.store.list_archived(MonitorClass::Removal).await.unwrap();
    assert_eq!(archived.len(), 1);
    assert_eq!(archived[0].key, "com.example.b");
    assert_eq!(archived[0].archive_reason, ARCHIVE_REASON);
    assert_eq!(archived[0].archived_at, harness.clock.now());
}

#[tokio::test]
async fn test_reappearing_entity_is_restored_from_archive() {
    let harness = Harness::new(vec![entity("com.example.a"), entity("com.example.b")]);
    let reconciler = harness.reconciler(MonitorClass::Removal);
    reconciler.sync().await.unwrap();

    harness.registry.set_entities(vec![entity("com.example.a")]);
    reconciler.sync().await.unwrap();

    harness
        .registry
        .set_entities(vec![entity("com.example.a"), entity("com.example.b")]);
    let report = reconciler.sync().await.unwrap();
    assert_eq!(report.created_count, 1);

    let restored = harness
        .store
        .get_entity(MonitorClass::Removal, "com.example.b")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(restored.status, EntityStatus::Available);
    assert!(harness.store.list_archived(MonitorClass::Removal).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_registry_above_floor_aborts_without_writes() {
    let harness = Harness::new(keys(12));
    let reconciler = harness.reconciler_with(MonitorClass::Review, 10, Duration::ZERO);
    reconciler.sync().await.unwrap();

    let mut rx = reconciler.subscribe();
    harness.registry.set_entities(vec![]);

    let err = reconciler.sync().await.unwrap_err();
    assert_matches!(
        err,
        MonitorError::SafetyAbort {
            class: MonitorClass::Review,
            active: 12,
            floor: 10,
        }
    );
    assert_eq!(err.kind(), ErrorKind::SafetyAbort);

    assert_eq!(harness.store.active_keys(MonitorClass::Review).await.unwrap().len(), 12);
    assert!(harness.store.list_archived(MonitorClass::Review).await.unwrap().is_empty());

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(e, MonitorEvent::SyncAborted { active: 12, .. })));
    assert!(!events.iter().any(|e| matches!(e, MonitorEvent::SyncFailed { .. })));
}

#[tokio::test]
async fn test_empty_registry_at_floor_archives_everything() {
    let harness = Harness::new(keys(3));
    let reconciler = harness.reconciler_with(MonitorClass::Review, 3, Duration::ZERO);
    reconciler.sync().await.unwrap();

    harness.registry.set_entities(vec![]);
    let report = reconciler.sync().await.unwrap();

    assert_eq!(report.synced_count, 0);
    assert_eq!(report.archived_count, 3);
    assert!(harness.store.active_keys(MonitorClass::Review).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unreachable_registry_changes_nothing() {
    let harness = Harness::new(keys(2));
    let reconciler = harness.reconciler(MonitorClass::Removal);
    reconciler.sync().await.unwrap();

    let mut rx = reconciler.subscribe();
    harness.registry.go_down();

    let err = reconciler.sync().await.unwrap_err();
    assert_matches!(err, MonitorError::Registry(_));
    assert_eq!(err.kind(), ErrorKind::Transient);
    assert_eq!(harness.store.active_keys(MonitorClass::Removal).await.unwrap().len(), 2);

    let events = drain(&mut rx);
    assert_matches!(events.as_slice(), [MonitorEvent::SyncFailed { .. }]);
}

#[tokio::test]
async fn test_sync_stores_credentials() {
    let harness = Harness::new(vec![entity_with_account("com.example.a", "acct-1")]);
    harness.registry.set_credentials(vec![account("acct-1"), account("acct-2")]);
    let reconciler = harness.reconciler(MonitorClass::Removal);

    let report = reconciler.sync().await.unwrap();
    assert_eq!(report.account_count, 2);

    let stored = harness.store.get_account("acct-1").await.unwrap().unwrap();
    assert_eq!(stored, account("acct-1"));
}

#[tokio::test]
async fn test_registry_monitoring_flag_is_honored() {
    let disabled = NormalizedEntity {
        monitoring_enabled: Some(false),
        ..entity("com.example.off")
    };
    let harness = Harness::new(vec![entity("com.example.on"), disabled]);
    let reconciler = harness.reconciler(MonitorClass::Removal);
    reconciler.sync().await.unwrap();

    let report = reconciler.check_all().await.unwrap();
    assert_eq!(report.checked, 1);
    assert_eq!(harness.probe.calls(), vec!["com.example.on".to_string()]);
}

#[tokio::test]
async fn test_check_all_records_outcomes() {
    let harness = Harness::new(vec![
        entity("com.example.live"),
        entity("com.example.gone"),
        entity("com.example.flaky"),
        entity_with_account("com.example.broken", "acct-9"),
    ]);
    harness.probe.answer("com.example.gone", Scripted::Verdict(Verdict::Removed));
    harness.probe.answer("com.example.flaky", Scripted::Transient);
    harness.probe.answer("com.example.broken", Scripted::Permanent);

    let reconciler = harness.reconciler(MonitorClass::Removal);
    reconciler.sync().await.unwrap();

    let report = reconciler.check_all().await.unwrap();
    assert_eq!(
        report,
        CheckReport {
            checked: 4,
            available: 1,
            removed: 1,
            unknown: 1,
            failed: 1,
            skipped: 0,
        }
    );

    let now = harness.clock.now();
    let get = |key: &'static str| {
        let store = harness.store.clone();
        async move {
            store
                .get_entity(MonitorClass::Removal, key)
                .await
                .unwrap()
                .unwrap()
        }
    };

    let live = get("com.example.live").await;
    assert_eq!(live.status, EntityStatus::Available);
    assert_eq!(live.last_checked_at, Some(now));

    let gone = get("com.example.gone").await;
    assert_eq!(gone.status, EntityStatus::Removed);
    assert_eq!(gone.removed_at, Some(now));

    let flaky = get("com.example.flaky").await;
    assert_eq!(flaky.status, EntityStatus::Unknown);
    assert_eq!(flaky.error_count, 1);
    assert!(flaky.last_error_message.unwrap().contains("503"));

    let broken = get("com.example.broken").await;
    assert_eq!(broken.status, EntityStatus::Unknown);
    assert_eq!(broken.error_count, PERMANENT_ERROR_SENTINEL);
    assert!(broken.last_error_message.unwrap().contains("private_key"));
}

#[tokio::test]
async fn test_removed_at_is_kept_until_recovery() {
    let harness = Harness::new(vec![entity("com.example.app")]);
    harness.probe.answer("com.example.app", Scripted::Verdict(Verdict::Removed));
    let reconciler = harness.reconciler(MonitorClass::Removal);
    reconciler.sync().await.unwrap();

    reconciler.check_all().await.unwrap();
    let first_removal = harness.clock.now();

    harness.clock.advance(chrono::Duration::hours(12));
    reconciler.check_all().await.unwrap();
    let row = harness
        .store
        .get_entity(MonitorClass::Removal, "com.example.app")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.removed_at, Some(first_removal));
    assert_eq!(row.last_checked_at, Some(harness.clock.now()));

    harness.probe.answer("com.example.app", Scripted::Verdict(Verdict::Available));
    harness.clock.advance(chrono::Duration::hours(12));
    reconciler.check_all().await.unwrap();
    let row = harness
        .store
        .get_entity(MonitorClass::Removal, "com.example.app")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, EntityStatus::Available);
    assert_eq!(row.removed_at, None);

    let history = harness
        .store
        .status_history(MonitorClass::Removal, "com.example.app", 10)
        .await
        .unwrap();
    let transitions: Vec<_> = history.iter().map(|c| (c.from, c.to)).collect();
    assert_eq!(
        transitions,
        vec![
            (EntityStatus::Removed, EntityStatus::Available),
            (EntityStatus::Available, EntityStatus::Removed),
        ]
    );
}

#[tokio::test]
async fn test_status_change_events_carry_entity_details() {
    let harness = Harness::new(vec![entity_with_account("com.example.app", "acct-1")]);
    harness.probe.answer("com.example.app", Scripted::Verdict(Verdict::Removed));
    let reconciler = harness.reconciler(MonitorClass::Removal);
    reconciler.sync().await.unwrap();

    let mut rx = reconciler.subscribe();
    reconciler.check_all().await.unwrap();

    let events = drain(&mut rx);
    let change = events
        .iter()
        .find_map(|e| match e {
            MonitorEvent::StatusChanged {
                name,
                account_id,
                change,
            } => Some((name.clone(), account_id.clone(), change.clone())),
            _ => None,
        })
        .expect("status change event");

    assert_eq!(change.0, "App com.example.app");
    assert_eq!(change.1.as_deref(), Some("acct-1"));
    assert_eq!(change.2.to, EntityStatus::Removed);
    assert_eq!(change.2.source, ChangeSource::Probe);
    assert!(matches!(events.first(), Some(MonitorEvent::CheckStarted { pending: 1, .. })));
    assert!(matches!(events.last(), Some(MonitorEvent::CheckCompleted { .. })));
}

#[tokio::test]
async fn test_sync_resets_removed_entity_and_records_history() {
    let harness = Harness::new(vec![entity("com.example.app")]);
    harness.probe.answer("com.example.app", Scripted::Transient);
    let reconciler = harness.reconciler(MonitorClass::Removal);
    reconciler.sync().await.unwrap();
    reconciler.check_all().await.unwrap();

    reconciler.sync().await.unwrap();
    let row = harness
        .store
        .get_entity(MonitorClass::Removal, "com.example.app")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, EntityStatus::Available);
    assert_eq!(row.error_count, 0);
    assert_eq!(row.last_error_message, None);

    let history = harness
        .store
        .status_history(MonitorClass::Removal, "com.example.app", 1)
        .await
        .unwrap();
    assert_eq!(history[0].source, ChangeSource::Sync);
    assert_eq!(history[0].from, EntityStatus::Unknown);
}

#[tokio::test]
async fn test_check_one_ignores_monitoring_flag() {
    let harness = Harness::new(vec![entity("com.example.app")]);
    harness.probe.answer("com.example.app", Scripted::Verdict(Verdict::Removed));
    let reconciler = harness.reconciler(MonitorClass::Competitor);
    reconciler.sync().await.unwrap();
    reconciler.set_monitoring("com.example.app", false).await.unwrap();

    assert_eq!(reconciler.check_all().await.unwrap().checked, 0);
    assert_eq!(
        reconciler.check_one("com.example.app").await.unwrap(),
        EntityStatus::Removed
    );
}

#[tokio::test]
async fn test_unknown_keys_are_not_found() {
    let harness = Harness::new(vec![entity("com.example.app")]);
    let reconciler = harness.reconciler(MonitorClass::Removal);
    reconciler.sync().await.unwrap();

    assert_matches!(
        reconciler.check_one("com.example.other").await,
        Err(MonitorError::NotFound { .. })
    );
    assert_matches!(
        reconciler.set_monitoring("com.example.other", true).await,
        Err(MonitorError::NotFound { .. })
    );
}

#[tokio::test]
async fn test_classes_do_not_share_rows() {
    let harness = Harness::new(vec![entity("com.example.app")]);
    harness.reconciler(MonitorClass::Review).sync().await.unwrap();

    harness.registry.set_entities(vec![entity("com.example.other")]);
    harness.reconciler(MonitorClass::Removal).sync().await.unwrap();

    assert_eq!(
        harness.store.active_keys(MonitorClass::Review).await.unwrap(),
        vec!["com.example.app".to_string()]
    );
    assert_eq!(
        harness.store.active_keys(MonitorClass::Removal).await.unwrap(),
        vec!["com.example.other".to_string()]
    );
}

#[tokio::test]
async fn test_concurrent_manual_checks_of_one_key_conflict() {
    let harness = Harness::with_parts(
        FakeRegistry::new(vec![entity("com.example.app")]),
        FakeProbe::with_delay(Duration::from_millis(200)),
        Arc::new(store_monitoring::storage::MemoryStore::new()),
    );
    let reconciler = Arc::new(harness.reconciler(MonitorClass::Removal));
    reconciler.sync().await.unwrap();

    let first = tokio::spawn({
        let reconciler = reconciler.clone();
        async move { reconciler.check_one("com.example.app").await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_matches!(
        reconciler.check_one("com.example.app").await,
        Err(MonitorError::CheckInProgress { .. })
    );
    assert_matches!(first.await.unwrap(), Ok(EntityStatus::Available));
    assert_eq!(harness.probe.calls().len(), 1);
}

#[tokio::test]
async fn test_overlapping_sweeps_are_skipped() {
    let harness = Harness::with_parts(
        FakeRegistry::new(keys(2)),
        FakeProbe::with_delay(Duration::from_millis(200)),
        Arc::new(store_monitoring::storage::MemoryStore::new()),
    );
    let reconciler = Arc::new(harness.reconciler(MonitorClass::Removal));

    let first = tokio::spawn({
        let reconciler = reconciler.clone();
        async move { reconciler.sweep().await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(!reconciler.sweep().await);
    assert!(first.await.unwrap());
    assert_eq!(harness.probe.calls().len(), 2);
}

#[tokio::test]
async fn test_sync_is_idempotent() {
    let harness = Harness::new(keys(4));
    let reconciler = harness.reconciler(MonitorClass::Removal);

    reconciler.sync().await.unwrap();
    let first = harness.store.list_entities(MonitorClass::Removal).await.unwrap();

    let report = reconciler.sync().await.unwrap();
    let second = harness.store.list_entities(MonitorClass::Removal).await.unwrap();

    assert_eq!(report.created_count, 0);
    assert_eq!(report.archived_count, 0);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_sync_diff() {
    let harness = Harness::new(vec![entity("A"), entity("B"), entity("C")]);
    harness.probe.answer("B", Scripted::Verdict(Verdict::Removed));
    let reconciler = harness.reconciler(MonitorClass::Review);
    reconciler.sync().await.unwrap();
    reconciler.check_all().await.unwrap();

    harness
        .registry
        .set_entities(vec![entity("B"), entity("C"), entity("D")]);
    let report = reconciler.sync().await.unwrap();
    assert_eq!(report.created_count, 1);
    assert_eq!(report.archived_count, 1);

    let rows = harness.store.list_entities(MonitorClass::Review).await.unwrap();
    let keys: Vec<_> = rows.iter().map(|r| r.key.as_str()).collect();
    assert_eq!(keys, vec!["B", "C", "D"]);
    assert!(rows.iter().all(|r| r.status == EntityStatus::Available && r.removed_at.is_none()));

    let archived = harness.store.list_archived(MonitorClass::Review).await.unwrap();
    assert_eq!(archived.len(), 1);
    assert_eq!(archived[0].key, "A");
}

#[tokio::test]
async fn test_safety_floor_decides_between_abort_and_archive() {
    for (floor, aborts) in [(10, true), (20, false)] {
        let harness = Harness::new(keys(15));
        let reconciler = harness.reconciler_with(MonitorClass::Removal, floor, Duration::ZERO);
        reconciler.sync().await.unwrap();

        harness.registry.set_entities(vec![]);
        let result = reconciler.sync().await;
        let active = harness.store.active_keys(MonitorClass::Removal).await.unwrap();

        if aborts {
            assert_matches!(result, Err(MonitorError::SafetyAbort { active: 15, .. }));
            assert_eq!(active.len(), 15);
        } else {
            assert_eq!(result.unwrap().archived_count, 15);
            assert!(active.is_empty());
        }
    }
}

#[tokio::test]
async fn test_check_of_entity_archived_during_the_check_is_dropped() {
    let harness = Harness::with_parts(
        FakeRegistry::new(vec![entity("com.example.app"), entity("com.example.other")]),
        FakeProbe::with_delay(Duration::from_millis(200)),
        Arc::new(store_monitoring::storage::MemoryStore::new()),
    );
    harness.probe.answer("com.example.app", Scripted::Verdict(Verdict::Removed));
    let reconciler = Arc::new(harness.reconciler(MonitorClass::Removal));
    reconciler.sync().await.unwrap();
    let mut rx = harness.events.subscribe();

    let check = tokio::spawn({
        let reconciler = reconciler.clone();
        async move { reconciler.check_one("com.example.app").await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    harness.registry.set_entities(vec![entity("com.example.other")]);
    assert_eq!(reconciler.sync().await.unwrap().archived_count, 1);

    assert_matches!(check.await.unwrap(), Err(MonitorError::NotFound { .. }));

    let archived = harness.store.list_archived(MonitorClass::Removal).await.unwrap();
    assert_eq!(archived.len(), 1);
    assert_eq!(archived[0].last_status, EntityStatus::Available);

    let events = drain(&mut rx);
    assert!(!events.iter().any(|event| matches!(
        event,
        MonitorEvent::StatusChanged { .. } | MonitorEvent::EntityChecked { .. }
    )));
}

#[tokio::test]
async fn test_entity_disabled_mid_pass_is_skipped() {
    let harness = Harness::with_parts(
        FakeRegistry::new(keys(3)),
        FakeProbe::with_delay(Duration::from_millis(100)),
        Arc::new(store_monitoring::storage::MemoryStore::new()),
    );
    let reconciler = Arc::new(harness.reconciler(MonitorClass::Removal));
    reconciler.sync().await.unwrap();

    let pass = tokio::spawn({
        let reconciler = reconciler.clone();
        async move { reconciler.check_all().await }
    });
    tokio::time::sleep(Duration::from_millis(30)).await;
    reconciler.set_monitoring("com.example.app02", false).await.unwrap();

    let report = pass.await.unwrap().unwrap();
    assert_eq!(report.checked, 2);
    assert_eq!(report.skipped, 1);
    assert_eq!(harness.probe.calls(), vec!["com.example.app00", "com.example.app01"]);

    let disabled = harness
        .store
        .get_entity(MonitorClass::Removal, "com.example.app02")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(disabled.last_checked_at, None);
}
