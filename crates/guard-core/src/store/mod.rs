//! Durable mapping from node key to upstream target.
//!
//! The proxy only needs three operations at runtime (`get`, `create`, `update`); `list` exists for
//! operator tooling. Two backends are provided:
//!
//! - [`SqliteConfigStore`]: production backend, one `config` table with a unique index on `key`
//! - [`MemoryConfigStore`]: process-local map used by tests and dry runs

pub mod memory;
pub mod sqlite;

pub use memory::MemoryConfigStore;
pub use sqlite::SqliteConfigStore;

use crate::types::{TargetPayload, UpstreamTarget};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Bound on connecting to and pinging the store at boot.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("config for key {0} already exists")]
    Duplicate(String),

    #[error("config for key {0} not found")]
    NotFound(String),

    #[error("stored config for key {key} is invalid: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("timed out connecting to config store")]
    ConnectTimeout,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// One persisted row: `{key, value: {url, cred}}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigRecord {
    pub key: String,
    pub value: TargetPayload,
}

impl ConfigRecord {
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupt`] if the stored URL no longer parses or the stored credentials
    /// cannot be sent as a header.
    pub fn into_target(self) -> Result<UpstreamTarget, StoreError> {
        let key = self.key;
        UpstreamTarget::try_from(self.value)
            .map_err(|e| StoreError::Corrupt { key, reason: e.to_string() })
    }
}

/// Storage abstraction for persisted upstream targets.
///
/// Implementations must be safe to share between the admin surface and boot code.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Returns `Ok(None)` when the key is absent; errors are reserved for backend failures.
    async fn get(&self, key: &str) -> Result<Option<ConfigRecord>, StoreError>;

    /// Inserts a new record. An existing key yields [`StoreError::Duplicate`].
    async fn create(&self, key: &str, value: &TargetPayload) -> Result<(), StoreError>;

    /// Replaces the value of an existing record. An absent key yields [`StoreError::NotFound`].
    async fn update(&self, key: &str, value: &TargetPayload) -> Result<(), StoreError>;

    async fn list(&self) -> Result<Vec<ConfigRecord>, StoreError>;
}
