//! Domain record administration
//!
//! Explicit registration, lookup, listing and deletion of domain records.
//! Verification and issuance mutate records through their own engines.

use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use dnsproof_common::{DomainRecord, RecordError, RecordKey, UserId};

use crate::locks::DomainLocks;
use crate::store::{DomainStore, StoreError};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Invalid domain record: {0}")]
    InvalidRecord(#[from] RecordError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

/// Administrative access to domain records
#[derive(Debug, Clone)]
pub struct DomainRegistry {
    store: Arc<dyn DomainStore>,
    locks: DomainLocks,
}

impl DomainRegistry {
    pub fn new(store: Arc<dyn DomainStore>, locks: DomainLocks) -> Self {
        Self { store, locks }
    }

    /// Create the record if it does not exist yet; an existing record is
    /// returned unchanged
    pub async fn register(
        &self,
        user_id: &UserId,
        domain: &str,
    ) -> Result<DomainRecord, RegistryError> {
        let record = DomainRecord::new(user_id.clone(), domain)?;
        let key = record.key();
        let _guard = self.locks.lock(&key).await;

        if let Some(existing) = self.store.get(&key).await? {
            return Ok(existing);
        }

        self.store.put(&record).await?;
        info!(domain = %domain, user_id = %user_id, "Domain registered");
        Ok(record)
    }

    pub async fn get(
        &self,
        user_id: &UserId,
        domain: &str,
    ) -> Result<Option<DomainRecord>, RegistryError> {
        Ok(self.store.get(&RecordKey::new(user_id.clone(), domain)).await?)
    }

    /// Returns whether a record was removed
    pub async fn delete(&self, user_id: &UserId, domain: &str) -> Result<bool, RegistryError> {
        let key = RecordKey::new(user_id.clone(), domain);
        let _guard = self.locks.lock(&key).await;

        let removed = self.store.delete(&key).await?;
        if removed {
            info!(domain = %domain, user_id = %user_id, "Domain deleted");
        }
        Ok(removed)
    }

    /// All records, or those of one user
    pub async fn list(&self, user_id: Option<&UserId>) -> Result<Vec<DomainRecord>, RegistryError> {
        let records = self.store.list_all().await?;
        Ok(match user_id {
            Some(user_id) => records
                .into_iter()
                .filter(|record| record.user_id() == user_id)
                .collect(),
            None => records,
        })
    }
}
