//! Canonical entity lists from the external registry
//!
//! The registry is a low-code table store. Rows arrive as opaque maps keyed
//! by column name; this module turns them into [`NormalizedEntity`] and
//! [`AccountCredential`] values at the boundary so nothing downstream sees
//! raw field values.
//!
//! ## Usage
//!
//! ```no_run
//! use store_monitoring::config::read_config_file;
//! use store_monitoring::registry::{BitableRegistry, RegistrySource};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = read_config_file("config.json")?;
//!     let registry = BitableRegistry::new(&config.registry, &config.monitors[0])?;
//!     let entities = registry.fetch_canonical_list().await?;
//!     println!("{} entities in the registry", entities.len());
//!     Ok(())
//! }
//! ```

pub mod bitable;
pub mod error;
pub mod fields;

use async_trait::async_trait;

use crate::storage::{AccountCredential, NormalizedEntity};

pub use bitable::BitableRegistry;
pub use error::{RegistryError, RegistryResult};

/// Source of the canonical entity list for one monitor class
#[async_trait]
pub trait RegistrySource: Send + Sync {
    /// All canonical entities, paginated and deduplicated by key
    ///
    /// Returns [`RegistryError::EmptyResult`] when the registry is reachable
    /// but holds no rows.
    async fn fetch_canonical_list(&self) -> RegistryResult<Vec<NormalizedEntity>>;

    /// Credential records, empty when the class has no account table
    async fn fetch_credentials(&self) -> RegistryResult<Vec<AccountCredential>>;
}
