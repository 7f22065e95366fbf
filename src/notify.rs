//! NotifierActor - turns monitor events into alerts
//!
//! ## Alerting rules
//!
//! ```text
//! StatusChanged  * → REMOVED         => "app removed"
//! StatusChanged  REMOVED → AVAILABLE => "app available again"
//! SyncAborted                        => "registry sync aborted"
//! everything else                    => no alert
//! ```
//!
//! UNKNOWN transitions are probe trouble, not store changes, and never
//! alert. Delivery failures are logged and dropped.

use chrono::Utc;
use reqwest::Client;
use serde_json::json;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{Alert, Webhook};
use crate::discord::DiscordManager;
use crate::monitor::MonitorEvent;
use crate::storage::{EntityStatus, MonitorClass};

/// Something worth telling an operator about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Removed {
        class: MonitorClass,
        key: String,
        name: String,
        account_id: Option<String>,
    },
    Recovered {
        class: MonitorClass,
        key: String,
        name: String,
        account_id: Option<String>,
    },
    SyncAborted {
        class: MonitorClass,
        active: usize,
        floor: usize,
    },
}

impl Notice {
    pub fn from_event(event: &MonitorEvent) -> Option<Self> {
        match event {
            MonitorEvent::StatusChanged {
                name,
                account_id,
                change,
            } => match (change.from, change.to) {
                (_, EntityStatus::Removed) => Some(Notice::Removed {
                    class: change.class,
                    key: change.key.clone(),
                    name: name.clone(),
                    account_id: account_id.clone(),
                }),
                (EntityStatus::Removed, EntityStatus::Available) => Some(Notice::Recovered {
                    class: change.class,
                    key: change.key.clone(),
                    name: name.clone(),
                    account_id: account_id.clone(),
                }),
                _ => None,
            },
            MonitorEvent::SyncAborted {
                class,
                active,
                floor,
                ..
            } => Some(Notice::SyncAborted {
                class: *class,
                active: *active,
                floor: *floor,
            }),
            _ => None,
        }
    }

    pub fn headline(&self) -> String {
        match self {
            Notice::Removed { name, key, .. } => {
                format!("🔴 `{name}` ({key}) was removed from the store")
            }
            Notice::Recovered { name, key, .. } => {
                format!("✅ `{name}` ({key}) is available again")
            }
            Notice::SyncAborted { class, active, .. } => format!(
                "⚠️ {class} sync aborted: empty registry answer with {active} active entities"
            ),
        }
    }
}

pub struct Notifier {
    client: Client,
    alert: Alert,
    origin: String,
    discord_manager: DiscordManager,
}

impl Notifier {
    pub fn new(alert: Alert, origin: String) -> Self {
        let client = Client::new();
        Self {
            discord_manager: DiscordManager::new(client.clone(), origin.clone()),
            client,
            alert,
            origin,
        }
    }

    #[instrument(skip(self))]
    pub async fn send(&self, notice: &Notice) {
        match &self.alert {
            Alert::Discord(discord) => {
                let message = self.discord_manager.build_message(discord, notice);
                self.discord_manager.send_message(discord, &message).await;
            }
            Alert::Webhook(webhook) => self.send_webhook_alert(webhook, notice).await,
        }
    }

    #[instrument(skip(self, webhook, notice))]
    async fn send_webhook_alert(&self, webhook: &Webhook, notice: &Notice) {
        let mut payload = json!({
            "message": notice.headline(),
            "origin": self.origin,
            "timestamp": Utc::now().to_rfc3339()
        });
        match notice {
            Notice::Removed { class, key, account_id, .. }
            | Notice::Recovered { class, key, account_id, .. } => {
                payload["class"] = json!(class);
                payload["key"] = json!(key);
                payload["account_id"] = json!(account_id);
                payload["status"] = json!(if matches!(notice, Notice::Removed { .. }) {
                    EntityStatus::Removed
                } else {
                    EntityStatus::Available
                });
            }
            Notice::SyncAborted { class, active, floor } => {
                payload["class"] = json!(class);
                payload["active"] = json!(active);
                payload["floor"] = json!(floor);
            }
        }

        match self.client.post(&webhook.url).json(&payload).send().await {
            Ok(response) => {
                if response.status().is_success() {
                    info!("Successfully sent webhook alert");
                } else {
                    error!("Webhook alert failed with status: {}", response.status());
                }
            }
            Err(e) => {
                error!("Failed to send webhook alert: {}", e);
            }
        }
    }
}

/// Actor forwarding monitor events to the configured alert channel
pub struct NotifierActor {
    notifier: Notifier,
    event_rx: broadcast::Receiver<MonitorEvent>,
}

impl NotifierActor {
    pub fn new(notifier: Notifier, event_rx: broadcast::Receiver<MonitorEvent>) -> Self {
        Self { notifier, event_rx }
    }

    /// Run until the event channel closes
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting notifier actor");

        loop {
            match self.event_rx.recv().await {
                Ok(event) => {
                    if let Some(notice) = Notice::from_event(&event) {
                        self.notifier.send(&notice).await;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("notifier lagged, skipped {skipped} events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("event channel closed, shutting down");
                    break;
                }
            }
        }

        debug!("notifier actor stopped");
    }
}

/// Handle to a spawned [`NotifierActor`]
pub struct NotifierHandle {
    task: JoinHandle<()>,
}

impl NotifierHandle {
    pub fn spawn(notifier: Notifier, event_rx: broadcast::Receiver<MonitorEvent>) -> Self {
        let task = tokio::spawn(NotifierActor::new(notifier, event_rx).run());
        Self { task }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn abort(&self) {
        self.task.abort();
    }
}
