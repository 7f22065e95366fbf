//! Tier 2: credentialed store API
//!
//! ```text
//! GET {base}/v1/apps?filter[bundleId]=<key>     no app          => REMOVED
//!                                               app marked gone => REMOVED
//! GET {base}/v1/apps/{id}/appStoreVersions      no versions     => REMOVED
//!                                               any active one  => AVAILABLE
//!                                               otherwise       => REMOVED
//! ```
//!
//! A version is active when it reports a state and none of its states is a
//! removal state, so versions in review or awaiting release count.
//!
//! Every call signs a fresh [`ScopedCredential`] that is dropped, and wiped,
//! before the call returns.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, trace};

use crate::clock::Clock;
use crate::config::ProbeConfig;
use crate::storage::AccountCredential;

use super::credential::ScopedCredential;
use super::error::{ProbeError, ProbeResult};
use super::{Tier, Verdict};

/// States marking an app or a version as pulled from sale
pub const REMOVED_STATES: [&str; 2] = ["REMOVED_FROM_SALE", "DEVELOPER_REMOVED_FROM_SALE"];

fn is_removed_state(state: &str) -> bool {
    REMOVED_STATES.contains(&state)
}

#[derive(Debug, Deserialize)]
struct Collection<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct AppResource {
    id: String,
    #[serde(default)]
    attributes: AppAttributes,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppAttributes {
    #[serde(default)]
    removed: bool,
    app_store_state: Option<String>,
}

impl AppAttributes {
    fn is_removed(&self) -> bool {
        self.removed || self.app_store_state.as_deref().is_some_and(is_removed_state)
    }
}

#[derive(Debug, Deserialize)]
struct VersionResource {
    attributes: VersionAttributes,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionAttributes {
    app_store_state: Option<String>,
    app_version_state: Option<String>,
}

impl VersionAttributes {
    fn is_active(&self) -> bool {
        let mut states = [&self.app_store_state, &self.app_version_state]
            .into_iter()
            .flatten()
            .peekable();
        states.peek().is_some() && states.all(|state| !is_removed_state(state))
    }
}

pub struct AuthoritativeClient {
    client: reqwest::Client,
    base_url: String,
    token_ttl: chrono::Duration,
    clock: Arc<dyn Clock>,
}

impl AuthoritativeClient {
    pub fn new(config: &ProbeConfig, clock: Arc<dyn Clock>) -> ProbeResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ProbeError::Setup(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.authoritative_url.trim_end_matches('/').to_string(),
            token_ttl: chrono::Duration::seconds(config.token_ttl_secs as i64),
            clock,
        })
    }

    #[instrument(skip(self, account), fields(account = %account.id))]
    pub async fn check(&self, key: &str, account: &AccountCredential) -> ProbeResult<Verdict> {
        let credential = ScopedCredential::issue(account, self.token_ttl, self.clock.now())?;

        let apps: Collection<AppResource> = self
            .get(
                &credential,
                &format!("{}/v1/apps", self.base_url),
                &[("filter[bundleId]", key)],
            )
            .await?;

        let Some(app) = apps.data.into_iter().next() else {
            debug!("no app record for {key}");
            return Ok(Verdict::Removed);
        };
        if app.attributes.is_removed() {
            debug!("app {} is marked removed", app.id);
            return Ok(Verdict::Removed);
        }

        let versions: Collection<VersionResource> = self
            .get(
                &credential,
                &format!("{}/v1/apps/{}/appStoreVersions", self.base_url, app.id),
                &[],
            )
            .await?;

        trace!("app {} has {} versions", app.id, versions.data.len());
        if versions.data.iter().any(|v| v.attributes.is_active()) {
            Ok(Verdict::Available)
        } else {
            Ok(Verdict::Removed)
        }
    }

    async fn get<T: DeserializeOwned>(
        &self,
        credential: &ScopedCredential,
        url: &str,
        query: &[(&str, &str)],
    ) -> ProbeResult<T> {
        let response = self
            .client
            .get(url)
            .query(query)
            .bearer_auth(credential.bearer())
            .send()
            .await?;

        let status = response.status();
        match status.as_u16() {
            401 | 403 => Err(ProbeError::CredentialRejected {
                account: credential.account_id().to_string(),
                status: status.as_u16(),
            }),
            _ if status.is_success() => Ok(response.json().await?),
            code => Err(ProbeError::UnexpectedStatus {
                tier: Tier::Authoritative,
                status: code,
            }),
        }
    }
}
