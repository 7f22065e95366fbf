//! Error types for status probes

use thiserror::Error;

use crate::error::ErrorKind;

use super::Tier;

pub type ProbeResult<T> = Result<T, ProbeError>;

#[derive(Debug, Error)]
pub enum ProbeError {
    /// The credentialed tier was required but the account cannot be used
    #[error("account {account} is incomplete, missing {}", .missing.join(", "))]
    ConfigIncomplete {
        account: String,
        missing: Vec<&'static str>,
    },

    /// The store API refused the signed token
    #[error("store API rejected credentials of account {account} (HTTP {status})")]
    CredentialRejected { account: String, status: u16 },

    /// The private key could not be used for signing
    #[error("invalid private key: {0}")]
    InvalidKey(String),

    /// Probe client could not be constructed
    #[error("probe setup failed: {0}")]
    Setup(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("{tier} tier answered HTTP {status}")]
    UnexpectedStatus { tier: Tier, status: u16 },

    #[error("malformed store response: {0}")]
    Malformed(String),
}

impl ProbeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProbeError::ConfigIncomplete { .. }
            | ProbeError::CredentialRejected { .. }
            | ProbeError::InvalidKey(_)
            | ProbeError::Setup(_) => ErrorKind::Permanent,
            ProbeError::Transport(_)
            | ProbeError::UnexpectedStatus { .. }
            | ProbeError::Malformed(_) => ErrorKind::Transient,
        }
    }
}

impl From<reqwest::Error> for ProbeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ProbeError::Malformed(err.to_string())
        } else {
            ProbeError::Transport(err.to_string())
        }
    }
}
