use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use tracing::trace;

use crate::storage::MonitorClass;

/// Storage backend configuration
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (no persistence, rebuilt by the first sync)
    #[serde(rename = "none")]
    None,

    /// SQLite database (default for most deployments)
    Sqlite {
        /// Path to the SQLite database file
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./storewatch.db")
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    /// Storage configuration (optional - defaults to SQLite)
    pub storage: Option<StorageConfig>,

    pub registry: RegistryConfig,

    #[serde(default)]
    pub probe: ProbeConfig,

    pub monitors: Vec<MonitorConfig>,

    pub alert: Option<Alert>,

    pub api: Option<ApiSettings>,

    /// Host name stamped on synced rows (defaults to `$HOSTNAME`)
    pub origin: Option<String>,
}

impl Config {
    pub fn origin(&self) -> String {
        self.origin.clone().unwrap_or_else(crate::util::get_origin)
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.monitors.is_empty() {
            bail!("no monitors configured");
        }

        let mut classes = HashSet::new();
        for monitor in &self.monitors {
            if !classes.insert(monitor.class) {
                bail!("monitor class '{}' is configured twice", monitor.class);
            }
            if monitor.interval_secs == Some(0) {
                bail!("monitor '{}' has a zero interval", monitor.class);
            }
            if monitor.entities.table_id.trim().is_empty() {
                bail!("monitor '{}' has an empty entity table id", monitor.class);
            }
            if let Some(accounts) = &monitor.accounts
                && accounts.table_id.trim().is_empty()
            {
                bail!("monitor '{}' has an empty account table id", monitor.class);
            }
        }

        if self.registry.page_size == 0 {
            bail!("registry page size must be positive");
        }

        Ok(())
    }
}

/// Connection to the external registry
#[derive(Clone, serde::Deserialize)]
pub struct RegistryConfig {
    pub base_url: String,

    /// Bearer token, falls back to `$REGISTRY_TOKEN`
    pub token: Option<String>,

    #[serde(default = "default_page_size")]
    pub page_size: u32,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl std::fmt::Debug for RegistryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryConfig")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("page_size", &self.page_size)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl RegistryConfig {
    pub fn token(&self) -> Option<String> {
        self.token.clone().or_else(crate::util::get_registry_token)
    }
}

fn default_page_size() -> u32 {
    100
}

fn default_timeout_secs() -> u64 {
    30
}

/// Storefront endpoints used by the tiered probe
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ProbeConfig {
    #[serde(default = "default_lookup_url")]
    pub lookup_url: String,

    #[serde(default = "default_country")]
    pub country: String,

    #[serde(default = "default_authoritative_url")]
    pub authoritative_url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Phrases on a public store page meaning "this app is gone"
    #[serde(default = "default_not_found_markers")]
    pub not_found_markers: Vec<String>,

    /// Lifetime of the signed token for the credentialed API
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            lookup_url: default_lookup_url(),
            country: default_country(),
            authoritative_url: default_authoritative_url(),
            timeout_secs: default_timeout_secs(),
            not_found_markers: default_not_found_markers(),
            token_ttl_secs: default_token_ttl_secs(),
        }
    }
}

fn default_lookup_url() -> String {
    "https://itunes.apple.com/lookup".to_string()
}

fn default_country() -> String {
    "us".to_string()
}

fn default_authoritative_url() -> String {
    "https://api.appstoreconnect.apple.com".to_string()
}

fn default_not_found_markers() -> Vec<String> {
    [
        "This app is no longer available",
        "is not available in your country or region",
        "Page Not Found",
        "该 App 目前不可用",
        "此 App 目前尚未在您所在的国家或地区提供",
        "このAppは現在入手できません",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_token_ttl_secs() -> u64 {
    20 * 60
}

/// One monitor class and the registry tables feeding it
#[derive(Debug, Clone, serde::Deserialize)]
pub struct MonitorConfig {
    pub class: MonitorClass,

    /// Sweep interval, defaults per class
    pub interval_secs: Option<u64>,

    /// Run a sweep as soon as the scheduler starts
    #[serde(default = "default_true")]
    pub run_on_start: bool,

    /// Pause between two probes of one sweep
    #[serde(default = "default_check_delay_ms")]
    pub check_delay_ms: u64,

    /// An empty registry answer aborts the sync above this many active rows
    #[serde(default = "default_active_floor")]
    pub active_floor: usize,

    pub entities: EntityTable,

    /// Credential table, absent for classes probed without accounts
    pub accounts: Option<AccountTable>,
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(
            self.interval_secs
                .unwrap_or_else(|| self.class.default_interval_secs()),
        )
    }

    pub fn check_delay(&self) -> Duration {
        Duration::from_millis(self.check_delay_ms)
    }
}

fn default_true() -> bool {
    true
}

fn default_check_delay_ms() -> u64 {
    2000
}

fn default_active_floor() -> usize {
    10
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct EntityTable {
    pub table_id: String,

    /// Server-side filter expressions, one query each
    #[serde(default)]
    pub filters: Vec<String>,

    #[serde(default)]
    pub fields: EntityFields,
}

/// Registry column names for entity rows
#[derive(Debug, Clone, serde::Deserialize)]
pub struct EntityFields {
    #[serde(default = "default_key_field")]
    pub key: String,

    #[serde(default = "default_name_field")]
    pub name: String,

    pub account: Option<String>,

    pub monitoring: Option<String>,
}

impl Default for EntityFields {
    fn default() -> Self {
        Self {
            key: default_key_field(),
            name: default_name_field(),
            account: None,
            monitoring: None,
        }
    }
}

fn default_key_field() -> String {
    "bundle_id".to_string()
}

fn default_name_field() -> String {
    "app_name".to_string()
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct AccountTable {
    pub table_id: String,

    #[serde(default)]
    pub filters: Vec<String>,

    #[serde(default)]
    pub fields: AccountFields,
}

/// Registry column names for credential rows
#[derive(Debug, Clone, serde::Deserialize)]
pub struct AccountFields {
    #[serde(default = "default_account_id_field")]
    pub id: String,
    pub name: Option<String>,
    #[serde(default = "default_issuer_id_field")]
    pub issuer_id: String,
    #[serde(default = "default_key_id_field")]
    pub key_id: String,
    #[serde(default = "default_team_id_field")]
    pub team_id: String,
    #[serde(default = "default_private_key_field")]
    pub private_key: String,
}

impl Default for AccountFields {
    fn default() -> Self {
        Self {
            id: default_account_id_field(),
            name: None,
            issuer_id: default_issuer_id_field(),
            key_id: default_key_id_field(),
            team_id: default_team_id_field(),
            private_key: default_private_key_field(),
        }
    }
}

fn default_account_id_field() -> String {
    "account_id".to_string()
}

fn default_issuer_id_field() -> String {
    "issuer_id".to_string()
}

fn default_key_id_field() -> String {
    "key_id".to_string()
}

fn default_team_id_field() -> String {
    "team_id".to_string()
}

fn default_private_key_field() -> String {
    "private_key".to_string()
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Alert {
    Discord(Discord),
    Webhook(Webhook),
}

#[derive(Clone, serde::Deserialize)]
pub struct Webhook {
    pub url: String,
}

#[derive(Clone, serde::Deserialize)]
pub struct Discord {
    pub url: String,
    pub user_id: Option<String>,
}

// webhook urls carry their secret in the path
impl std::fmt::Debug for Webhook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Webhook").field("url", &"<redacted>").finish()
    }
}

impl std::fmt::Debug for Discord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Discord")
            .field("url", &"<redacted>")
            .field("user_id", &self.user_id)
            .finish()
    }
}

/// Operator API settings
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ApiSettings {
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    #[serde(default = "default_true")]
    pub enable_cors: bool,
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

pub fn parse_config(content: &str) -> anyhow::Result<Config> {
    let config: Config =
        serde_json::from_str(content).context("invalid configuration file provided")?;
    config.validate()?;
    Ok(config)
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content =
        std::fs::read_to_string(path).with_context(|| format!("failed to read {path}"))?;
    parse_config(&file_content).inspect(|config| trace!("loaded config: {config:?}"))
}
