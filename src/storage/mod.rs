//! State stores for the monitoring engine
//!
//! This module provides a trait-based abstraction over the system of record:
//! active entities, credentials, status history and the archive.
//!
//! ## Design
//!
//! - **Trait-based**: `StateStore` trait allows swapping implementations
//! - **Async**: All operations are async for compatibility with Tokio tasks
//! - **Row-level last-write-wins**: no optimistic concurrency control
//!
//! ## Backends
//!
//! - **SQLite** (default): Embedded database with migrations
//! - **In-Memory**: No persistence, for tests or `"backend": "none"`
//!
//! ## Usage
//!
//! ```no_run
//! use store_monitoring::storage::{StateStore, sqlite::SqliteStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = SqliteStore::new("./storewatch.db").await?;
//!     let healthy = store.health_check().await?.healthy;
//!     assert!(healthy);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod memory;
pub mod schema;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

pub use backend::{HealthStatus, StateStore};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
pub use schema::{
    AccountCredential, ArchiveRecord, ChangeSource, EntityStatus, MonitorClass, NormalizedEntity,
    StatusChange, StatusCounts, SyncStamp, TrackedEntity,
};
