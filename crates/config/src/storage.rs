//! Record store and certificate blob locations

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use validator::Validate;

/// Storage settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct StorageConfig {
    /// JSON document holding every domain record
    #[serde(default = "default_records_path")]
    pub records_path: PathBuf,

    /// Root directory of the blob store (certificates, account credentials)
    #[serde(default = "default_blob_root")]
    pub blob_root: PathBuf,

    /// Prefix under which `<domain>/cert.key` and `<domain>/cert.crt` are written
    #[serde(default = "default_cert_prefix")]
    #[validate(custom(function = "crate::validation::validate_blob_prefix"))]
    pub cert_prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            records_path: default_records_path(),
            blob_root: default_blob_root(),
            cert_prefix: default_cert_prefix(),
        }
    }
}

pub(crate) fn default_records_path() -> PathBuf {
    PathBuf::from("dnsproof-records.json")
}

pub(crate) fn default_blob_root() -> PathBuf {
    PathBuf::from("data")
}

pub(crate) fn default_cert_prefix() -> String {
    "mastodon_le_certs/".to_string()
}
