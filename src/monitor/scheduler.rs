//! Periodic sweeps for one monitor class
//!
//! The scheduler owns a timer task and its stop handle. Stopping only
//! prevents future sweeps: the timer loop does not poll the stop signal while
//! a sweep is running, so an in-flight sweep always completes.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info, instrument};

use crate::storage::EntityStatus;

use super::error::MonitorResult;
use super::messages::{CheckReport, SchedulerStatus, SyncReport};
use super::reconciler::Reconciler;

struct RunningTimer {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

pub struct Scheduler {
    reconciler: Arc<Reconciler>,
    interval: Duration,
    run_on_start: bool,
    timer: Mutex<Option<RunningTimer>>,
}

impl Scheduler {
    pub fn new(reconciler: Arc<Reconciler>, interval: Duration) -> Self {
        Self {
            reconciler,
            interval,
            run_on_start: true,
            timer: Mutex::new(None),
        }
    }

    /// Skip the immediate sweep on start, wait for the first interval instead
    pub fn with_run_on_start(mut self, run_on_start: bool) -> Self {
        self.run_on_start = run_on_start;
        self
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    /// Start the timer; returns false when it is already running
    pub fn start(&self) -> bool {
        let mut timer = self.timer.lock().unwrap_or_else(|e| e.into_inner());
        if timer.as_ref().is_some_and(|t| !t.task.is_finished()) {
            debug!(class = %self.reconciler.class(), "scheduler already running");
            return false;
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(run_timer(
            self.reconciler.clone(),
            self.interval,
            self.run_on_start,
            stop_rx,
        ));
        *timer = Some(RunningTimer { stop_tx, task });

        info!(
            class = %self.reconciler.class(),
            "scheduler started, sweeping every {:?}",
            self.interval
        );
        true
    }

    /// Cancel future sweeps; returns false when the timer was not running
    pub fn stop(&self) -> bool {
        let timer = self
            .timer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        match timer {
            Some(timer) => {
                let _ = timer.stop_tx.send(());
                info!(class = %self.reconciler.class(), "scheduler stopped");
                true
            }
            None => false,
        }
    }

    /// Stop the timer and wait for any sweep in progress to finish
    pub async fn shutdown(&self) {
        let timer = self
            .timer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        if let Some(timer) = timer {
            let _ = timer.stop_tx.send(());
            if let Err(e) = timer.task.await {
                error!(class = %self.reconciler.class(), "timer task failed: {e}");
            }
        }
        // manual passes hold the same lock
        self.reconciler.wait_idle().await;
        info!(class = %self.reconciler.class(), "scheduler shut down");
    }

    pub fn status(&self) -> SchedulerStatus {
        let is_running = self
            .timer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|t| !t.task.is_finished());

        SchedulerStatus {
            class: self.reconciler.class(),
            is_running,
            interval_ms: self.interval.as_millis() as u64,
        }
    }

    pub async fn sync(&self) -> MonitorResult<SyncReport> {
        self.reconciler.sync().await
    }

    /// Run a check pass in the background
    pub fn trigger_check_all(&self) -> JoinHandle<MonitorResult<CheckReport>> {
        let reconciler = self.reconciler.clone();
        tokio::spawn(async move {
            let result = reconciler.check_all().await;
            if let Err(e) = &result {
                error!(class = %reconciler.class(), "manual check pass failed: {e}");
            }
            result
        })
    }

    pub async fn check_one(&self, key: &str) -> MonitorResult<EntityStatus> {
        self.reconciler.check_one(key).await
    }
}

#[instrument(skip_all, fields(class = %reconciler.class()))]
async fn run_timer(
    reconciler: Arc<Reconciler>,
    period: Duration,
    run_on_start: bool,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let start = if run_on_start {
        Instant::now()
    } else {
        Instant::now() + period
    };
    let mut ticker = interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            // also fires when the scheduler is dropped
            _ = &mut stop_rx => break,

            _ = ticker.tick() => {
                debug!("starting sweep");
                reconciler.sweep().await;
            }
        }
    }

    debug!("timer stopped");
}
