//! Persisted ACME account credentials

use std::sync::Arc;
use tracing::{debug, info};

use super::ca::AccountKey;
use super::error::CertError;
use crate::store::BlobStore;

/// Account credentials stored as a JSON blob.
///
/// A single account is shared by every domain; it is created on the first
/// certificate request and reused afterwards.
#[derive(Debug, Clone)]
pub struct AccountKeyStore {
    blobs: Arc<dyn BlobStore>,
    path: String,
}

impl AccountKeyStore {
    pub fn new(blobs: Arc<dyn BlobStore>, path: impl Into<String>) -> Self {
        Self {
            blobs,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Stored credentials, `None` before the first registration
    pub async fn load(&self) -> Result<Option<AccountKey>, CertError> {
        let Some(bytes) = self.blobs.read_bytes(&self.path).await? else {
            debug!(path = %self.path, "No stored ACME account");
            return Ok(None);
        };

        let value: serde_json::Value = serde_json::from_slice(&bytes).map_err(|e| {
            CertError::AccountKey(format!("Failed to parse '{}': {}", self.path, e))
        })?;
        if !value.is_object() {
            return Err(CertError::AccountKey(format!(
                "'{}' does not hold a JSON object",
                self.path
            )));
        }

        debug!(path = %self.path, "Loaded ACME account");
        Ok(Some(AccountKey::new(value)))
    }

    pub async fn save(&self, key: &AccountKey) -> Result<(), CertError> {
        let json = serde_json::to_vec_pretty(key.as_value()).map_err(|e| {
            CertError::AccountKey(format!("Failed to serialize credentials: {}", e))
        })?;
        self.blobs.write_bytes(&self.path, &json).await?;

        info!(path = %self.path, "Saved ACME account");
        Ok(())
    }
}
