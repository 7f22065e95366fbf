//! Real-world availability checks against the app store
//!
//! ## Tiers
//!
//! ```text
//! Tier 1 (public)         lookup API + public store page, no credentials
//!     │ REMOVED or error
//!     ▼
//! Tier 2 (authoritative)  credentialed store API, short-lived signed token
//! ```
//!
//! Tier 2 is never consulted when Tier 1 says the app is available. When
//! Tier 1 says REMOVED, Tier 2 only corroborates: the answer is logged and
//! reported, the status stays REMOVED.
//!
//! Failures carry an [`ErrorKind`](crate::error::ErrorKind) so the reconciler
//! can tell a flaky network from an operator problem.

pub mod authoritative;
pub mod credential;
pub mod error;
pub mod public;
pub mod tiered;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::storage::{AccountCredential, EntityStatus, TrackedEntity};

pub use authoritative::AuthoritativeClient;
pub use credential::ScopedCredential;
pub use error::{ProbeError, ProbeResult};
pub use public::PublicStoreClient;
pub use tiered::TieredProbe;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Public,
    Authoritative,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Public => f.write_str("public"),
            Tier::Authoritative => f.write_str("authoritative"),
        }
    }
}

/// Conclusive answer of a single tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Available,
    Removed,
}

impl From<Verdict> for EntityStatus {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Available => EntityStatus::Available,
            Verdict::Removed => EntityStatus::Removed,
        }
    }
}

/// Outcome of a successful probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeReport {
    pub verdict: Verdict,

    /// Tier whose answer is the verdict
    pub decided_by: Tier,

    /// Tier 2 answer when it was asked to confirm a Tier 1 removal
    pub corroboration: Option<Verdict>,
}

impl ProbeReport {
    pub fn status(&self) -> EntityStatus {
        self.verdict.into()
    }
}

#[async_trait]
pub trait StatusProbe: Send + Sync {
    /// Determine the live-store status of `entity`
    ///
    /// `account` is the credential the entity references, `None` when it
    /// references none or the referenced record does not exist.
    async fn check(
        &self,
        entity: &TrackedEntity,
        account: Option<&AccountCredential>,
    ) -> ProbeResult<ProbeReport>;
}
