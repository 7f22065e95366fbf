//! Tier escalation
//!
//! ```text
//! public AVAILABLE                      => AVAILABLE (tier 2 not called)
//! public REMOVED, complete credential   => tier 2 corroborates, REMOVED
//! public REMOVED, no usable credential  => REMOVED
//! public error, no account reference    => public error (transient)
//! public error, account missing/broken  => ConfigIncomplete (permanent)
//! public error, complete credential     => tier 2 verdict
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use crate::clock::Clock;
use crate::config::ProbeConfig;
use crate::storage::{AccountCredential, TrackedEntity};

use super::authoritative::AuthoritativeClient;
use super::error::{ProbeError, ProbeResult};
use super::public::PublicStoreClient;
use super::{ProbeReport, StatusProbe, Tier, Verdict};

pub struct TieredProbe {
    public: PublicStoreClient,
    authoritative: AuthoritativeClient,
}

impl TieredProbe {
    pub fn new(config: &ProbeConfig, clock: Arc<dyn Clock>) -> ProbeResult<Self> {
        Ok(Self {
            public: PublicStoreClient::new(config)?,
            authoritative: AuthoritativeClient::new(config, clock)?,
        })
    }

    async fn corroborate(&self, key: &str, account: Option<&AccountCredential>) -> Option<Verdict> {
        let Some(account) = account.filter(|a| a.is_complete()) else {
            debug!("no complete credential, removal not corroborated");
            return None;
        };

        match self.authoritative.check(key, account).await {
            Ok(Verdict::Removed) => {
                debug!("authoritative tier confirms removal");
                Some(Verdict::Removed)
            }
            Ok(Verdict::Available) => {
                warn!("authoritative tier disagrees: app still has a live version");
                Some(Verdict::Available)
            }
            Err(e) => {
                warn!("corroboration failed: {e}");
                None
            }
        }
    }
}

#[async_trait]
impl StatusProbe for TieredProbe {
    #[instrument(
        skip_all,
        fields(class = %entity.class, key = %entity.key, account = ?entity.account_id)
    )]
    async fn check(
        &self,
        entity: &TrackedEntity,
        account: Option<&AccountCredential>,
    ) -> ProbeResult<ProbeReport> {
        match self.public.check(&entity.key).await {
            Ok(Verdict::Available) => Ok(ProbeReport {
                verdict: Verdict::Available,
                decided_by: Tier::Public,
                corroboration: None,
            }),
            Ok(Verdict::Removed) => Ok(ProbeReport {
                verdict: Verdict::Removed,
                decided_by: Tier::Public,
                corroboration: self.corroborate(&entity.key, account).await,
            }),
            Err(public_err) => {
                warn!("public tier failed: {public_err}");

                let Some(account_id) = &entity.account_id else {
                    return Err(public_err);
                };
                let Some(account) = account else {
                    return Err(ProbeError::ConfigIncomplete {
                        account: account_id.clone(),
                        missing: vec!["account record"],
                    });
                };

                let verdict = self.authoritative.check(&entity.key, account).await?;
                Ok(ProbeReport {
                    verdict,
                    decided_by: Tier::Authoritative,
                    corroboration: None,
                })
            }
        }
    }
}
