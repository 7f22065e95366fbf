//! Tier 1: public lookup API and store page
//!
//! 1. `GET {lookup_url}?bundleId=<key>&country=<cc>`; zero results means
//!    the app is gone.
//! 2. Fetch the match's `trackViewUrl` without following redirects:
//!
//! | page answer | verdict |
//! |-------------|---------|
//! | 2xx with a not-found marker | REMOVED |
//! | 2xx without a marker | AVAILABLE |
//! | 404 / 410 | REMOVED |
//! | 3xx | AVAILABLE |
//! | anything else | transient error |
//!
//! A redirect is ambiguous; treating it as available keeps the probe from
//! over-reporting removals.

use std::time::Duration;

use regex::RegexSet;
use reqwest::{StatusCode, redirect::Policy};
use serde::Deserialize;
use tracing::{debug, instrument, trace};

use crate::config::ProbeConfig;

use super::error::{ProbeError, ProbeResult};
use super::{Tier, Verdict};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupResponse {
    #[serde(default)]
    result_count: u64,
    #[serde(default)]
    results: Vec<LookupResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupResult {
    track_view_url: Option<String>,
}

pub struct PublicStoreClient {
    lookup_client: reqwest::Client,
    page_client: reqwest::Client,
    lookup_url: String,
    country: String,
    markers: RegexSet,
}

impl PublicStoreClient {
    pub fn new(config: &ProbeConfig) -> ProbeResult<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let lookup_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProbeError::Setup(e.to_string()))?;
        let page_client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(Policy::none())
            .build()
            .map_err(|e| ProbeError::Setup(e.to_string()))?;

        let markers = RegexSet::new(
            config
                .not_found_markers
                .iter()
                .map(|marker| format!("(?i){}", regex::escape(marker))),
        )
        .map_err(|e| ProbeError::Setup(e.to_string()))?;

        Ok(Self {
            lookup_client,
            page_client,
            lookup_url: config.lookup_url.clone(),
            country: config.country.clone(),
            markers,
        })
    }

    /// True when the page text carries any configured not-found marker
    pub fn is_not_found_page(&self, body: &str) -> bool {
        self.markers.is_match(body)
    }

    #[instrument(skip(self))]
    pub async fn check(&self, key: &str) -> ProbeResult<Verdict> {
        let response = self
            .lookup_client
            .get(&self.lookup_url)
            .query(&[("bundleId", key), ("country", self.country.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProbeError::UnexpectedStatus {
                tier: Tier::Public,
                status: status.as_u16(),
            });
        }

        let lookup: LookupResponse = response.json().await?;
        trace!("lookup returned {} results", lookup.result_count);

        if lookup.result_count == 0 || lookup.results.is_empty() {
            debug!("no lookup results");
            return Ok(Verdict::Removed);
        }

        let Some(url) = lookup.results.iter().find_map(|r| r.track_view_url.as_deref()) else {
            debug!("lookup result has no store page, trusting the lookup");
            return Ok(Verdict::Available);
        };

        self.check_page(url).await
    }

    async fn check_page(&self, url: &str) -> ProbeResult<Verdict> {
        let response = self.page_client.get(url).send().await?;
        let status = response.status();
        trace!("store page answered {status}");

        if status.is_success() {
            let body = response.text().await?;
            return Ok(if self.is_not_found_page(&body) {
                Verdict::Removed
            } else {
                Verdict::Available
            });
        }

        match status {
            StatusCode::NOT_FOUND | StatusCode::GONE => Ok(Verdict::Removed),
            s if s.is_redirection() => Ok(Verdict::Available),
            s => Err(ProbeError::UnexpectedStatus {
                tier: Tier::Public,
                status: s.as_u16(),
            }),
        }
    }
}
