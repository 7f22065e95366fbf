//! Fakes and fixtures shared by the integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use store_monitoring::{
    clock::ManualClock,
    monitor::{MonitorEvent, Reconciler, ReconcilerConfig},
    probe::{ProbeError, ProbeReport, ProbeResult, StatusProbe, Tier, Verdict},
    registry::{RegistryError, RegistryResult, RegistrySource},
    storage::{
        AccountCredential, MemoryStore, MonitorClass, NormalizedEntity, StateStore, TrackedEntity,
    },
};
use tokio::sync::broadcast;

pub fn entity(key: &str) -> NormalizedEntity {
    NormalizedEntity {
        key: key.to_string(),
        name: format!("App {key}"),
        account_id: None,
        monitoring_enabled: None,
    }
}

pub fn entity_with_account(key: &str, account_id: &str) -> NormalizedEntity {
    NormalizedEntity {
        account_id: Some(account_id.to_string()),
        ..entity(key)
    }
}

pub fn account(id: &str) -> AccountCredential {
    AccountCredential {
        id: id.to_string(),
        name: Some(format!("Account {id}")),
        issuer_id: "57246542-96fe-1a63-e053-0824d011072a".to_string(),
        key_id: "2X9R4HXF34".to_string(),
        team_id: "TEAM123".to_string(),
        private_key: include_str!("../fixtures/authkey_test.p8").to_string(),
    }
}

pub fn test_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap(),
    ))
}

/// Registry answering whatever the test last configured
///
/// `None` entities make every fetch fail with [`RegistryError::Unavailable`].
pub struct FakeRegistry {
    entities: Mutex<Option<Vec<NormalizedEntity>>>,
    credentials: Mutex<Vec<AccountCredential>>,
}

impl FakeRegistry {
    pub fn new(entities: Vec<NormalizedEntity>) -> Arc<Self> {
        Arc::new(Self {
            entities: Mutex::new(Some(entities)),
            credentials: Mutex::new(Vec::new()),
        })
    }

    pub fn set_entities(&self, entities: Vec<NormalizedEntity>) {
        *self.entities.lock().unwrap() = Some(entities);
    }

    pub fn set_credentials(&self, credentials: Vec<AccountCredential>) {
        *self.credentials.lock().unwrap() = credentials;
    }

    pub fn go_down(&self) {
        *self.entities.lock().unwrap() = None;
    }
}

#[async_trait]
impl RegistrySource for FakeRegistry {
    async fn fetch_canonical_list(&self) -> RegistryResult<Vec<NormalizedEntity>> {
        match self.entities.lock().unwrap().clone() {
            None => Err(RegistryError::Unavailable("registry is down".to_string())),
            Some(entities) if entities.is_empty() => Err(RegistryError::EmptyResult),
            Some(entities) => Ok(entities),
        }
    }

    async fn fetch_credentials(&self) -> RegistryResult<Vec<AccountCredential>> {
        Ok(self.credentials.lock().unwrap().clone())
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Scripted {
    Verdict(Verdict),
    Transient,
    Permanent,
}

/// Probe answering from a per-key script, AVAILABLE by default
pub struct FakeProbe {
    script: Mutex<HashMap<String, Scripted>>,
    calls: Mutex<Vec<String>>,
    delay: Duration,
}

impl FakeProbe {
    pub fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            delay,
        })
    }

    pub fn answer(&self, key: &str, outcome: Scripted) {
        self.script.lock().unwrap().insert(key.to_string(), outcome);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl StatusProbe for FakeProbe {
    async fn check(
        &self,
        entity: &TrackedEntity,
        _account: Option<&AccountCredential>,
    ) -> ProbeResult<ProbeReport> {
        self.calls.lock().unwrap().push(entity.key.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let outcome = self
            .script
            .lock()
            .unwrap()
            .get(&entity.key)
            .copied()
            .unwrap_or(Scripted::Verdict(Verdict::Available));

        match outcome {
            Scripted::Verdict(verdict) => Ok(ProbeReport {
                verdict,
                decided_by: Tier::Public,
                corroboration: None,
            }),
            Scripted::Transient => Err(ProbeError::UnexpectedStatus {
                tier: Tier::Public,
                status: 503,
            }),
            Scripted::Permanent => Err(ProbeError::ConfigIncomplete {
                account: entity.account_id.clone().unwrap_or_default(),
                missing: vec!["private_key"],
            }),
        }
    }
}

pub struct Harness {
    pub registry: Arc<FakeRegistry>,
    pub probe: Arc<FakeProbe>,
    pub store: Arc<dyn StateStore>,
    pub clock: Arc<ManualClock>,
    pub events: broadcast::Sender<MonitorEvent>,
}

impl Harness {
    pub fn new(entities: Vec<NormalizedEntity>) -> Self {
        Self::with_parts(
            FakeRegistry::new(entities),
            FakeProbe::new(),
            Arc::new(MemoryStore::new()),
        )
    }

    pub fn with_parts(
        registry: Arc<FakeRegistry>,
        probe: Arc<FakeProbe>,
        store: Arc<dyn StateStore>,
    ) -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            registry,
            probe,
            store,
            clock: test_clock(),
            events,
        }
    }

    pub fn reconciler(&self, class: MonitorClass) -> Reconciler {
        self.reconciler_with(class, 10, Duration::ZERO)
    }

    pub fn reconciler_with(
        &self,
        class: MonitorClass,
        active_floor: usize,
        check_delay: Duration,
    ) -> Reconciler {
        Reconciler::new(
            class,
            self.registry.clone(),
            self.store.clone(),
            self.probe.clone(),
            self.events.clone(),
        )
        .with_config(ReconcilerConfig {
            active_floor,
            check_delay,
            origin: "test-host".to_string(),
        })
        .with_clock(self.clock.clone())
    }
}

pub fn keys(count: usize) -> Vec<NormalizedEntity> {
    (0..count)
        .map(|i| entity(&format!("com.example.app{i:02}")))
        .collect()
}

/// Drain every event currently buffered in `rx`
pub fn drain(rx: &mut broadcast::Receiver<MonitorEvent>) -> Vec<MonitorEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
