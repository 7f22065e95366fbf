#[cfg(feature = "api")]
pub mod api;
pub mod clock;
pub mod config;
pub mod discord;
pub mod error;
pub mod monitor;
pub mod notify;
pub mod probe;
pub mod registry;
pub mod storage;
pub mod util;

pub use error::ErrorKind;
