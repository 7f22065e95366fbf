//! Sync and check passes for one monitor class

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::MonitorConfig;
use crate::error::ErrorKind;
use crate::probe::StatusProbe;
use crate::registry::{RegistryError, RegistrySource};
use crate::storage::{EntityStatus, MonitorClass, StateStore, SyncStamp, TrackedEntity};

use super::error::{MonitorError, MonitorResult};
use super::messages::{CheckReport, MonitorEvent, SyncReport};

/// Archive reason for entities that left the canonical list
pub const ARCHIVE_REASON: &str = "removed from registry";

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// An empty canonical list aborts the sync while more entities are active
    pub active_floor: usize,

    /// Pause between two probes of one `check_all` pass
    pub check_delay: Duration,

    /// Host stamped on synced rows
    pub origin: String,
}

impl ReconcilerConfig {
    pub fn from_monitor(monitor: &MonitorConfig, origin: String) -> Self {
        Self {
            active_floor: monitor.active_floor,
            check_delay: monitor.check_delay(),
            origin,
        }
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            active_floor: 10,
            check_delay: Duration::from_secs(2),
            origin: crate::util::get_origin(),
        }
    }
}

struct CheckOutcome {
    status: EntityStatus,
    failure: Option<ErrorKind>,
}

impl CheckReport {
    fn record(&mut self, outcome: &CheckOutcome) {
        self.checked += 1;
        match outcome.failure {
            Some(ErrorKind::Permanent) => self.failed += 1,
            Some(_) => self.unknown += 1,
            None => match outcome.status {
                EntityStatus::Available => self.available += 1,
                EntityStatus::Removed => self.removed += 1,
                EntityStatus::Unknown => self.unknown += 1,
            },
        }
    }
}

/// Removes the key from the in-flight set on drop
struct InFlightClaim<'a> {
    keys: &'a Mutex<HashSet<String>>,
    key: String,
}

impl Drop for InFlightClaim<'_> {
    fn drop(&mut self) {
        self.keys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.key);
    }
}

pub struct Reconciler {
    class: MonitorClass,
    registry: Arc<dyn RegistrySource>,
    store: Arc<dyn StateStore>,
    probe: Arc<dyn StatusProbe>,
    clock: Arc<dyn Clock>,
    config: ReconcilerConfig,
    events: broadcast::Sender<MonitorEvent>,
    sweep_lock: tokio::sync::Mutex<()>,
    in_flight: Mutex<HashSet<String>>,
}

impl Reconciler {
    pub fn new(
        class: MonitorClass,
        registry: Arc<dyn RegistrySource>,
        store: Arc<dyn StateStore>,
        probe: Arc<dyn StatusProbe>,
        events: broadcast::Sender<MonitorEvent>,
    ) -> Self {
        Self {
            class,
            registry,
            store,
            probe,
            clock: Arc::new(SystemClock),
            config: ReconcilerConfig::default(),
            events,
            sweep_lock: tokio::sync::Mutex::new(()),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_config(mut self, config: ReconcilerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn class(&self) -> MonitorClass {
        self.class
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: MonitorEvent) {
        match self.events.send(event) {
            Ok(receivers) => trace!("published monitor event to {receivers} receivers"),
            Err(_) => trace!("no receivers for monitor event"),
        }
    }

    fn claim(&self, key: &str) -> Option<InFlightClaim<'_>> {
        let mut keys = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        keys.insert(key.to_string()).then(|| InFlightClaim {
            keys: &self.in_flight,
            key: key.to_string(),
        })
    }

    /// Reconcile local state with the registry's canonical list
    ///
    /// Waits for a running sweep of the same class to finish.
    pub async fn sync(&self) -> MonitorResult<SyncReport> {
        let _sweep = self.sweep_lock.lock().await;
        self.sync_locked().await
    }

    #[instrument(skip(self), fields(class = %self.class))]
    async fn sync_locked(&self) -> MonitorResult<SyncReport> {
        let result = self.reconcile().await;
        if let Err(e) = &result
            && !matches!(e, MonitorError::SafetyAbort { .. })
        {
            error!("sync failed: {e}");
            self.emit(MonitorEvent::SyncFailed {
                class: self.class,
                error: e.to_string(),
                at: self.clock.now(),
            });
        }
        result
    }

    async fn reconcile(&self) -> MonitorResult<SyncReport> {
        // fetch everything before the first write
        let canonical = match self.registry.fetch_canonical_list().await {
            Ok(entities) => entities,
            Err(RegistryError::EmptyResult) => {
                warn!("registry returned an empty canonical list");
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };
        let credentials = self.registry.fetch_credentials().await?;
        let active = self.store.active_keys(self.class).await?;

        if canonical.is_empty() && active.len() > self.config.active_floor {
            error!(
                "refusing to archive {} active entities on an empty registry answer (floor {})",
                active.len(),
                self.config.active_floor
            );
            self.emit(MonitorEvent::SyncAborted {
                class: self.class,
                active: active.len(),
                floor: self.config.active_floor,
                at: self.clock.now(),
            });
            return Err(MonitorError::SafetyAbort {
                class: self.class,
                active: active.len(),
                floor: self.config.active_floor,
            });
        }

        let now = self.clock.now();
        let stamp = SyncStamp {
            synced_at: now,
            origin: self.config.origin.clone(),
        };

        let account_count = self.store.upsert_accounts(&credentials).await?;

        let active_keys: HashSet<&str> = active.iter().map(String::as_str).collect();
        let created_count = canonical
            .iter()
            .filter(|e| !active_keys.contains(e.key.as_str()))
            .count();
        let synced_count = self
            .store
            .upsert_entities(self.class, &canonical, &stamp)
            .await?;

        let canonical_keys: HashSet<&str> = canonical.iter().map(|e| e.key.as_str()).collect();
        let to_archive: Vec<String> = active
            .iter()
            .filter(|key| !canonical_keys.contains(key.as_str()))
            .cloned()
            .collect();
        let archived_count = if to_archive.is_empty() {
            0
        } else {
            self.store
                .archive(self.class, &to_archive, ARCHIVE_REASON, now)
                .await?
        };

        let report = SyncReport {
            synced_count,
            created_count,
            archived_count,
            account_count,
        };
        info!(
            "synced {} entities ({} new, {} archived, {} accounts)",
            synced_count, created_count, archived_count, account_count
        );
        self.emit(MonitorEvent::SyncCompleted {
            class: self.class,
            report: report.clone(),
            at: now,
        });

        Ok(report)
    }

    /// Probe every monitored entity, stalest first
    ///
    /// Waits for a running sweep of the same class to finish.
    pub async fn check_all(&self) -> MonitorResult<CheckReport> {
        let _sweep = self.sweep_lock.lock().await;
        self.check_all_locked().await
    }

    #[instrument(skip(self), fields(class = %self.class))]
    async fn check_all_locked(&self) -> MonitorResult<CheckReport> {
        let pending = self.store.select_pending(self.class).await?;
        debug!("{} entities pending", pending.len());
        self.emit(MonitorEvent::CheckStarted {
            class: self.class,
            pending: pending.len(),
            at: self.clock.now(),
        });

        let mut report = CheckReport::default();
        let mut probed_before = false;

        for candidate in pending {
            let Some(_claim) = self.claim(&candidate.key) else {
                debug!("{} is being checked manually, skipping", candidate.key);
                report.skipped += 1;
                continue;
            };

            if probed_before {
                tokio::time::sleep(self.config.check_delay).await;
            }
            probed_before = true;

            // the row may have changed since the scan, probe the current one
            let entity = match self.store.get_entity(self.class, &candidate.key).await {
                Ok(Some(entity)) => entity,
                Ok(None) => {
                    debug!("{} was archived during the pass", candidate.key);
                    report.skipped += 1;
                    continue;
                }
                Err(e) => {
                    warn!(key = %candidate.key, "failed to load entity: {e}");
                    report.skipped += 1;
                    continue;
                }
            };

            if !entity.monitoring_enabled {
                debug!("{} was disabled during the pass", candidate.key);
                report.skipped += 1;
                continue;
            }

            match self.probe_and_record(entity).await {
                Ok(Some(outcome)) => report.record(&outcome),
                Ok(None) => {
                    debug!("{} was archived while being probed", candidate.key);
                    report.skipped += 1;
                }
                Err(e) => {
                    warn!(key = %candidate.key, "failed to record check: {e}");
                    report.checked += 1;
                    report.unknown += 1;
                }
            }
        }

        info!(
            "checked {} entities: {} available, {} removed, {} unknown, {} failed, {} skipped",
            report.checked,
            report.available,
            report.removed,
            report.unknown,
            report.failed,
            report.skipped
        );
        self.emit(MonitorEvent::CheckCompleted {
            class: self.class,
            report: report.clone(),
            at: self.clock.now(),
        });

        Ok(report)
    }

    /// Probe one entity, ignoring its monitoring flag
    ///
    /// Returns the recorded status, which is UNKNOWN when the probe failed.
    /// An entity archived while its probe was running is `NotFound`.
    #[instrument(skip(self), fields(class = %self.class))]
    pub async fn check_one(&self, key: &str) -> MonitorResult<EntityStatus> {
        let Some(_claim) = self.claim(key) else {
            return Err(MonitorError::CheckInProgress {
                class: self.class,
                key: key.to_string(),
            });
        };

        let Some(entity) = self.store.get_entity(self.class, key).await? else {
            return Err(MonitorError::NotFound {
                class: self.class,
                key: key.to_string(),
            });
        };

        match self.probe_and_record(entity).await? {
            Some(outcome) => Ok(outcome.status),
            None => Err(MonitorError::NotFound {
                class: self.class,
                key: key.to_string(),
            }),
        }
    }

    /// Returns `None` when the entity was archived before the result could
    /// be recorded. No events are emitted in that case.
    async fn probe_and_record(
        &self,
        mut entity: TrackedEntity,
    ) -> MonitorResult<Option<CheckOutcome>> {
        let account = match &entity.account_id {
            Some(id) => self.store.get_account(id).await?,
            None => None,
        };

        let result = self.probe.check(&entity, account.as_ref()).await;
        let now = self.clock.now();

        let (change, failure) = match result {
            Ok(report) => {
                debug!(
                    key = %entity.key,
                    "{} by {} tier (corroboration {:?})",
                    report.status(),
                    report.decided_by,
                    report.corroboration
                );
                (entity.apply_success(report.status(), now), None)
            }
            Err(e) => {
                let kind = e.kind();
                warn!(
                    key = %entity.key,
                    account = ?entity.account_id,
                    %kind,
                    "probe failed: {e}"
                );
                (entity.apply_failure(kind, &e.to_string(), now), Some((kind, e.to_string())))
            }
        };

        if !self.store.record_check(&entity, change.as_ref()).await? {
            return Ok(None);
        }

        self.emit(MonitorEvent::EntityChecked {
            class: self.class,
            key: entity.key.clone(),
            status: entity.status,
            error: failure.as_ref().map(|(_, message)| message.clone()),
            at: now,
        });
        if let Some(change) = change {
            info!(key = %entity.key, "status changed {} -> {}", change.from, change.to);
            self.emit(MonitorEvent::StatusChanged {
                name: entity.name.clone(),
                account_id: entity.account_id.clone(),
                change,
            });
        }

        Ok(Some(CheckOutcome {
            status: entity.status,
            failure: failure.map(|(kind, _)| kind),
        }))
    }

    /// Scheduled sweep: sync, then check everything still active
    ///
    /// Returns false without doing anything when another sweep of this class
    /// holds the lock. Sync failures are logged and do not prevent the check
    /// pass.
    pub async fn sweep(&self) -> bool {
        let Ok(_sweep) = self.sweep_lock.try_lock() else {
            warn!(class = %self.class, "previous sweep still running, skipping");
            return false;
        };

        if let Err(e) = self.sync_locked().await {
            error!(class = %self.class, kind = %e.kind(), "sweep sync failed: {e}");
        }
        if let Err(e) = self.check_all_locked().await {
            error!(class = %self.class, "sweep check failed: {e}");
        }

        true
    }

    /// Wait until no sweep, sync or check pass of this class is running
    pub async fn wait_idle(&self) {
        let _sweep = self.sweep_lock.lock().await;
    }

    /// Toggle scheduled monitoring for one entity
    pub async fn set_monitoring(&self, key: &str, enabled: bool) -> MonitorResult<()> {
        if self.store.set_monitoring(self.class, key, enabled).await? {
            let state = if enabled { "enabled" } else { "disabled" };
            info!(class = %self.class, key, "monitoring {state}");
            Ok(())
        } else {
            Err(MonitorError::NotFound {
                class: self.class,
                key: key.to_string(),
            })
        }
    }
}
