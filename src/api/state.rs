//! API shared state containing scheduler handles

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::monitor::Scheduler;
use crate::storage::{MonitorClass, StateStore};

use super::error::{ApiError, ApiResult};

/// Shared state passed to all API handlers
#[derive(Clone)]
pub struct ApiState {
    /// One scheduler per configured monitor class
    schedulers: Arc<BTreeMap<MonitorClass, Arc<Scheduler>>>,

    /// State store for read-only queries
    pub store: Arc<dyn StateStore>,
}

impl ApiState {
    pub fn new(
        schedulers: impl IntoIterator<Item = Arc<Scheduler>>,
        store: Arc<dyn StateStore>,
    ) -> Self {
        let schedulers = schedulers
            .into_iter()
            .map(|s| (s.reconciler().class(), s))
            .collect();

        Self {
            schedulers: Arc::new(schedulers),
            store,
        }
    }

    /// Resolve the `:class` path segment
    pub fn scheduler(&self, class: &str) -> ApiResult<&Arc<Scheduler>> {
        let parsed: MonitorClass = class.parse().map_err(ApiError::InvalidRequest)?;
        self.schedulers
            .get(&parsed)
            .ok_or_else(|| ApiError::NotFound(format!("monitor '{class}' is not configured")))
    }

    pub fn schedulers(&self) -> impl Iterator<Item = &Arc<Scheduler>> {
        self.schedulers.values()
    }
}
