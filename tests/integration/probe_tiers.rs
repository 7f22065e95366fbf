//! Integration tests for the tiered status probe
//!
//! These tests verify that:
//! - The public tier decides AVAILABLE on its own
//! - Removals are corroborated by the credentialed tier but never overturned
//! - Public tier failures escalate according to the entity's account
//! - Credential problems are classified as permanent

use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::Utc;
use serde_json::json;
use store_monitoring::{
    clock::SystemClock,
    config::ProbeConfig,
    error::ErrorKind,
    probe::{ProbeError, StatusProbe, Tier, TieredProbe, Verdict},
    storage::{MonitorClass, NormalizedEntity, SyncStamp, TrackedEntity},
};
use wiremock::matchers::{header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::{account, entity, entity_with_account};

const KEY: &str = "com.example.app";

fn tracked(entity: &NormalizedEntity) -> TrackedEntity {
    TrackedEntity::from_registry(
        MonitorClass::Removal,
        entity,
        &SyncStamp {
            synced_at: Utc::now(),
            origin: "test-host".to_string(),
        },
    )
}

fn probe_for(server: &MockServer) -> TieredProbe {
    let config = ProbeConfig {
        lookup_url: format!("{}/lookup", server.uri()),
        authoritative_url: server.uri(),
        timeout_secs: 5,
        ..ProbeConfig::default()
    };
    TieredProbe::new(&config, Arc::new(SystemClock)).unwrap()
}

async fn mount_lookup(server: &MockServer, results: serde_json::Value) {
    let count = results.as_array().map(Vec::len).unwrap_or(0);
    Mock::given(method("GET"))
        .and(path("/lookup"))
        .and(query_param("bundleId", KEY))
        .and(query_param("country", "us"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({
                "resultCount": count,
                "results": results,
            })),
        )
        .mount(server)
        .await;
}

async fn mount_listing(server: &MockServer, page: ResponseTemplate) {
    mount_lookup(
        server,
        json!([{ "trackViewUrl": format!("{}/app/id42", server.uri()) }]),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/app/id42"))
        .respond_with(page)
        .mount(server)
        .await;
}

async fn mount_authoritative(
    server: &MockServer,
    app_ids: &[&str],
    states: &[&str],
    expected_calls: u64,
) {
    let apps: Vec<_> = app_ids.iter().map(|id| json!({ "id": id })).collect();
    Mock::given(method("GET"))
        .and(path("/v1/apps"))
        .and(query_param("filter[bundleId]", KEY))
        .and(header_exists("authorization"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": apps })))
        .expect(expected_calls)
        .mount(server)
        .await;

    let versions: Vec<_> = states
        .iter()
        .map(|state| json!({ "attributes": { "appStoreState": state } }))
        .collect();
    Mock::given(method("GET"))
        .and(path("/v1/apps/1234/appStoreVersions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": versions })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_public_listing_is_available_without_escalation() {
    let server = MockServer::start().await;
    mount_listing(&server, ResponseTemplate::new(200).set_body_string("<h1>Example</h1>")).await;
    mount_authoritative(&server, &["1234"], &["READY_FOR_SALE"], 0).await;

    let report = probe_for(&server)
        .check(&tracked(&entity_with_account(KEY, "acct-1")), Some(&account("acct-1")))
        .await
        .unwrap();

    assert_eq!(report.verdict, Verdict::Available);
    assert_eq!(report.decided_by, Tier::Public);
    assert_eq!(report.corroboration, None);
}

#[tokio::test]
async fn test_empty_lookup_is_removed_and_corroborated() {
    let server = MockServer::start().await;
    mount_lookup(&server, json!([])).await;
    mount_authoritative(&server, &[], &[], 1).await;

    let report = probe_for(&server)
        .check(&tracked(&entity_with_account(KEY, "acct-1")), Some(&account("acct-1")))
        .await
        .unwrap();

    assert_eq!(report.verdict, Verdict::Removed);
    assert_eq!(report.decided_by, Tier::Public);
    assert_eq!(report.corroboration, Some(Verdict::Removed));
}

#[tokio::test]
async fn test_disagreeing_corroboration_keeps_removal() {
    let server = MockServer::start().await;
    mount_lookup(&server, json!([])).await;
    mount_authoritative(&server, &["1234"], &["READY_FOR_SALE"], 1).await;

    let report = probe_for(&server)
        .check(&tracked(&entity_with_account(KEY, "acct-1")), Some(&account("acct-1")))
        .await
        .unwrap();

    assert_eq!(report.verdict, Verdict::Removed);
    assert_eq!(report.corroboration, Some(Verdict::Available));
}

#[tokio::test]
async fn test_not_found_marker_means_removed() {
    let server = MockServer::start().await;
    mount_listing(
        &server,
        ResponseTemplate::new(200)
            .set_body_string("<p>This app is no longer available in the App Store.</p>"),
    )
    .await;

    let report = probe_for(&server).check(&tracked(&entity(KEY)), None).await.unwrap();

    assert_eq!(report.verdict, Verdict::Removed);
    assert_eq!(report.corroboration, None);
}

#[tokio::test]
async fn test_page_status_codes() {
    let cases = [
        (404_u16, Verdict::Removed),
        (410, Verdict::Removed),
        (302, Verdict::Available),
    ];

    for (status, expected) in cases {
        let server = MockServer::start().await;
        let page = ResponseTemplate::new(status)
            .insert_header("location", "https://example.com/elsewhere");
        mount_listing(&server, page).await;

        let report = probe_for(&server).check(&tracked(&entity(KEY)), None).await.unwrap();
        assert_eq!(report.verdict, expected, "page status {status}");
    }
}

#[tokio::test]
async fn test_public_failure_without_account_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/lookup"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = probe_for(&server).check(&tracked(&entity(KEY)), None).await.unwrap_err();

    assert_matches!(
        err,
        ProbeError::UnexpectedStatus {
            tier: Tier::Public,
            status: 503,
        }
    );
    assert_eq!(err.kind(), ErrorKind::Transient);
}

#[tokio::test]
async fn test_public_failure_with_missing_account_is_permanent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/lookup"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let err = probe_for(&server)
        .check(&tracked(&entity_with_account(KEY, "acct-404")), None)
        .await
        .unwrap_err();

    assert_matches!(err, ProbeError::ConfigIncomplete { ref account, .. } if account == "acct-404");
    assert_eq!(err.kind(), ErrorKind::Permanent);
}

#[tokio::test]
async fn test_public_failure_with_incomplete_account_is_permanent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/lookup"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    mount_authoritative(&server, &["1234"], &["READY_FOR_SALE"], 0).await;

    let mut incomplete = account("acct-1");
    incomplete.private_key.clear();

    let err = probe_for(&server)
        .check(&tracked(&entity_with_account(KEY, "acct-1")), Some(&incomplete))
        .await
        .unwrap_err();

    assert_matches!(
        err,
        ProbeError::ConfigIncomplete { ref missing, .. } if missing == &vec!["private_key"]
    );
}

#[tokio::test]
async fn test_public_failure_escalates_to_authoritative_tier() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/lookup"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    mount_authoritative(&server, &["1234"], &["REMOVED_FROM_SALE", "READY_FOR_SALE"], 1).await;

    let report = probe_for(&server)
        .check(&tracked(&entity_with_account(KEY, "acct-1")), Some(&account("acct-1")))
        .await
        .unwrap();

    assert_eq!(report.verdict, Verdict::Available);
    assert_eq!(report.decided_by, Tier::Authoritative);
}

#[tokio::test]
async fn test_authoritative_without_active_version_is_removed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/lookup"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    mount_authoritative(&server, &["1234"], &["REMOVED_FROM_SALE"], 1).await;

    let report = probe_for(&server)
        .check(&tracked(&entity_with_account(KEY, "acct-1")), Some(&account("acct-1")))
        .await
        .unwrap();

    assert_eq!(report.verdict, Verdict::Removed);
    assert_eq!(report.decided_by, Tier::Authoritative);
}

#[tokio::test]
async fn test_rejected_credentials_are_permanent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/lookup"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/apps"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = probe_for(&server)
        .check(&tracked(&entity_with_account(KEY, "acct-1")), Some(&account("acct-1")))
        .await
        .unwrap_err();

    assert_matches!(err, ProbeError::CredentialRejected { status: 401, .. });
    assert_eq!(err.kind(), ErrorKind::Permanent);
}

#[tokio::test]
async fn test_authoritative_app_marked_removed_skips_versions() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/lookup"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/apps"))
        .and(query_param("filter[bundleId]", KEY))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "id": "1234", "attributes": { "removed": true } }]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/apps/1234/appStoreVersions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "attributes": { "appStoreState": "READY_FOR_SALE" } }]
        })))
        .expect(0)
        .mount(&server)
        .await;

    let report = probe_for(&server)
        .check(&tracked(&entity_with_account(KEY, "acct-1")), Some(&account("acct-1")))
        .await
        .unwrap();

    assert_eq!(report.verdict, Verdict::Removed);
    assert_eq!(report.decided_by, Tier::Authoritative);
}

#[tokio::test]
async fn test_authoritative_pending_release_is_available() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/lookup"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    mount_authoritative(&server, &["1234"], &["PENDING_DEVELOPER_RELEASE"], 1).await;

    let report = probe_for(&server)
        .check(&tracked(&entity_with_account(KEY, "acct-1")), Some(&account("acct-1")))
        .await
        .unwrap();

    assert_eq!(report.verdict, Verdict::Available);
    assert_eq!(report.decided_by, Tier::Authoritative);
}
