use super::{ConfigRecord, ConfigStore, StoreError};
use crate::types::TargetPayload;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// In-process store with the same uniqueness semantics as the SQLite backend.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    records: RwLock<BTreeMap<String, TargetPayload>>,
}

impl MemoryConfigStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn get(&self, key: &str) -> Result<Option<ConfigRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .get(key)
            .map(|value| ConfigRecord { key: key.to_string(), value: value.clone() }))
    }

    async fn create(&self, key: &str, value: &TargetPayload) -> Result<(), StoreError> {
        let mut records = self.records.write();
        if records.contains_key(key) {
            return Err(StoreError::Duplicate(key.to_string()));
        }
        records.insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn update(&self, key: &str, value: &TargetPayload) -> Result<(), StoreError> {
        match self.records.write().get_mut(key) {
            Some(slot) => {
                *slot = value.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(key.to_string())),
        }
    }

    async fn list(&self) -> Result<Vec<ConfigRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .iter()
            .map(|(key, value)| ConfigRecord { key: key.clone(), value: value.clone() })
            .collect())
    }
}
