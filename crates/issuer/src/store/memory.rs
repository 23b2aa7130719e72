//! In-memory domain record store

use async_trait::async_trait;
use dashmap::DashMap;

use dnsproof_common::{DomainRecord, RecordKey};

use super::{DomainStore, StoreResult};

/// Domain records held in a concurrent map; lost on drop.
#[derive(Debug, Default)]
pub struct MemoryDomainStore {
    records: DashMap<RecordKey, DomainRecord>,
}

impl MemoryDomainStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl DomainStore for MemoryDomainStore {
    async fn get(&self, key: &RecordKey) -> StoreResult<Option<DomainRecord>> {
        Ok(self.records.get(key).map(|entry| entry.value().clone()))
    }

    async fn put(&self, record: &DomainRecord) -> StoreResult<()> {
        self.records.insert(record.key(), record.clone());
        Ok(())
    }

    async fn delete(&self, key: &RecordKey) -> StoreResult<bool> {
        Ok(self.records.remove(key).is_some())
    }

    async fn list_all(&self) -> StoreResult<Vec<DomainRecord>> {
        let mut records: Vec<DomainRecord> = self
            .records
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by_key(|record| record.key());
        Ok(records)
    }
}
