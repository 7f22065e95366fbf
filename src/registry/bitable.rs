//! HTTP client for a Bitable-style registry
//!
//! ## Wire format
//!
//! ```text
//! POST {base_url}/tables/{table_id}/records/search?page_size=N[&page_token=T]
//! Authorization: Bearer <token>
//! {"filter": "<expr>"}
//!
//! {"code": 0, "msg": "success",
//!  "data": {"items": [{"record_id": "rec1", "fields": {..}}],
//!           "has_more": true, "page_token": "T2", "total": 240}}
//! ```
//!
//! A non-zero `code` is a registry-level error even on HTTP 200.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument, trace, warn};

use crate::config::{AccountTable, EntityTable, MonitorConfig, RegistryConfig};
use crate::storage::{AccountCredential, MonitorClass, NormalizedEntity};

use super::error::{RegistryError, RegistryResult};
use super::fields::{Fields, normalize_account, normalize_entity};
use super::RegistrySource;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    code: i64,
    #[serde(default)]
    msg: String,
    data: Option<SearchPage>,
}

#[derive(Debug, Default, Deserialize)]
struct SearchPage {
    items: Option<Vec<Record>>,
    #[serde(default)]
    has_more: bool,
    page_token: Option<String>,
    total: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Record {
    #[serde(default)]
    record_id: String,
    #[serde(default)]
    fields: Fields,
}

/// Registry source for one monitor class
pub struct BitableRegistry {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    page_size: u32,
    class: MonitorClass,
    entities: EntityTable,
    accounts: Option<AccountTable>,
}

impl BitableRegistry {
    pub fn new(registry: &RegistryConfig, monitor: &MonitorConfig) -> RegistryResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(registry.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: registry.base_url.trim_end_matches('/').to_string(),
            token: registry.token(),
            page_size: registry.page_size,
            class: monitor.class,
            entities: monitor.entities.clone(),
            accounts: monitor.accounts.clone(),
        })
    }

    /// Run one query per filter (or a single unfiltered one) and concatenate
    async fn fetch_table(&self, table_id: &str, filters: &[String]) -> RegistryResult<Vec<Record>> {
        if filters.is_empty() {
            return self.search(table_id, None).await;
        }

        let mut records = Vec::new();
        for filter in filters {
            records.extend(self.search(table_id, Some(filter)).await?);
        }
        Ok(records)
    }

    #[instrument(skip(self), fields(class = %self.class))]
    async fn search(&self, table_id: &str, filter: Option<&str>) -> RegistryResult<Vec<Record>> {
        let url = format!("{}/tables/{}/records/search", self.base_url, table_id);
        let body = match filter {
            Some(filter) => json!({ "filter": filter }),
            None => json!({}),
        };

        let mut records = Vec::new();
        let mut page_token: Option<String> = None;
        let mut seen_tokens = HashSet::new();

        loop {
            let mut request = self
                .client
                .post(&url)
                .query(&[("page_size", self.page_size.to_string())]);
            if let Some(token) = &page_token {
                request = request.query(&[("page_token", token)]);
            }
            if let Some(token) = &self.token {
                request = request.bearer_auth(token);
            }

            trace!("requesting {url} (page token {page_token:?})");
            let response = request.json(&body).send().await?;

            let status = response.status();
            if !status.is_success() {
                return Err(RegistryError::Unavailable(format!(
                    "{table_id} answered HTTP {status}"
                )));
            }

            let page: SearchResponse = response
                .json()
                .await
                .map_err(|e| RegistryError::Malformed(e.to_string()))?;
            if page.code != 0 {
                return Err(RegistryError::Unavailable(format!(
                    "{table_id} answered code {}: {}",
                    page.code, page.msg
                )));
            }

            let data = page.data.unwrap_or_default();
            let items = data.items.unwrap_or_default();
            trace!("received {} records (total {:?})", items.len(), data.total);
            records.extend(items);

            match data.page_token.filter(|_| data.has_more) {
                Some(next) if seen_tokens.insert(next.clone()) => page_token = Some(next),
                Some(next) => {
                    warn!("registry repeated page token {next}, stopping pagination");
                    break;
                }
                None => break,
            }
        }

        debug!("fetched {} records from {table_id}", records.len());
        Ok(records)
    }
}

/// Keep the last row for every key, in first-seen order
fn dedupe_last_wins<T>(rows: Vec<T>, key: impl Fn(&T) -> &str) -> Vec<T> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut unique: Vec<T> = Vec::with_capacity(rows.len());

    for row in rows {
        match positions.get(key(&row)) {
            Some(&idx) => unique[idx] = row,
            None => {
                positions.insert(key(&row).to_string(), unique.len());
                unique.push(row);
            }
        }
    }

    unique
}

#[async_trait]
impl RegistrySource for BitableRegistry {
    #[instrument(skip(self), fields(class = %self.class))]
    async fn fetch_canonical_list(&self) -> RegistryResult<Vec<NormalizedEntity>> {
        let records = self
            .fetch_table(&self.entities.table_id, &self.entities.filters)
            .await?;

        let entities: Vec<NormalizedEntity> = records
            .iter()
            .filter_map(|record| {
                let entity = normalize_entity(&record.fields, &self.entities.fields);
                if entity.is_none() {
                    warn!(
                        "record {} has no '{}' value, skipping",
                        record.record_id, self.entities.fields.key
                    );
                }
                entity
            })
            .collect();

        let entities = dedupe_last_wins(entities, |e| e.key.as_str());
        if entities.is_empty() {
            return Err(RegistryError::EmptyResult);
        }

        debug!("canonical list has {} entities", entities.len());
        Ok(entities)
    }

    #[instrument(skip(self), fields(class = %self.class))]
    async fn fetch_credentials(&self) -> RegistryResult<Vec<AccountCredential>> {
        let Some(accounts) = &self.accounts else {
            trace!("no account table configured");
            return Ok(Vec::new());
        };

        let records = self.fetch_table(&accounts.table_id, &accounts.filters).await?;
        let credentials: Vec<AccountCredential> = records
            .iter()
            .filter_map(|record| {
                let account = normalize_account(&record.fields, &accounts.fields);
                if account.is_none() {
                    warn!("account record {} has no id, skipping", record.record_id);
                }
                account
            })
            .collect();

        Ok(dedupe_last_wins(credentials, |a| a.id.as_str()))
    }
}
