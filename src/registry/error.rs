//! Error types for registry operations

use thiserror::Error;

use crate::error::ErrorKind;

pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug, Error)]
pub enum RegistryError {
    /// Transport failure, non-2xx answer or a registry-level error code
    #[error("registry unavailable: {0}")]
    Unavailable(String),

    /// The registry answered but returned zero canonical rows
    #[error("registry returned no rows")]
    EmptyResult,

    /// The body could not be decoded
    #[error("malformed registry response: {0}")]
    Malformed(String),
}

impl RegistryError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Transient
    }
}

impl From<reqwest::Error> for RegistryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            RegistryError::Malformed(err.to_string())
        } else {
            RegistryError::Unavailable(err.to_string())
        }
    }
}
