//! Ownership key and delegation check configuration

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;
use validator::Validate;

/// What generating an ownership key does to a key that is already pending.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnershipKeyPolicy {
    /// Always replace the stored key, even while the user is publishing it.
    #[default]
    Overwrite,
    /// Keep an unexpired, unverified key and hand it back unchanged.
    PreservePending,
}

/// Verification engine settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct VerificationConfig {
    /// Label embedded in ownership keys, `<label>;<domain>;<token>`
    #[serde(default = "default_txt_record_name")]
    #[validate(length(min = 1, message = "txt_record_name must not be empty"))]
    pub txt_record_name: String,

    /// Lifetime of a generated ownership key
    #[serde(default = "default_ownership_key_ttl_secs")]
    #[validate(range(min = 1))]
    pub ownership_key_ttl_secs: u64,

    #[serde(default)]
    pub ownership_key_policy: OwnershipKeyPolicy,

    /// IPv4 addresses of hosts we run; A-record delegation targets
    #[serde(default)]
    pub owned_hosts: Vec<String>,

    /// Hostnames we run; CNAME delegation targets
    #[serde(default)]
    pub owned_cnames: Vec<String>,

    /// Nameservers to query (empty = system resolver configuration)
    #[serde(default)]
    pub nameservers: Vec<IpAddr>,
}

impl VerificationConfig {
    pub fn ownership_key_ttl(&self) -> Duration {
        Duration::from_secs(self.ownership_key_ttl_secs)
    }
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            txt_record_name: default_txt_record_name(),
            ownership_key_ttl_secs: default_ownership_key_ttl_secs(),
            ownership_key_policy: OwnershipKeyPolicy::default(),
            owned_hosts: Vec::new(),
            owned_cnames: Vec::new(),
            nameservers: Vec::new(),
        }
    }
}

pub(crate) fn default_txt_record_name() -> String {
    "mastodon_ownership_key".to_string()
}

pub(crate) fn default_ownership_key_ttl_secs() -> u64 {
    24 * 60 * 60
}
