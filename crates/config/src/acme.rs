//! CA directory and account configuration

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Let's Encrypt production directory URL
pub const LETSENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";
/// Let's Encrypt staging directory URL
pub const LETSENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

/// Which Let's Encrypt environment to talk to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcmeEnvironment {
    #[default]
    Staging,
    Production,
}

/// CA account settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AcmeConfig {
    /// Staging or production; ignored when `directory_url` is set
    #[serde(default)]
    pub environment: AcmeEnvironment,

    /// Explicit directory URL for non-Let's Encrypt CAs (e.g. Pebble)
    #[serde(default)]
    #[validate(url)]
    pub directory_url: Option<String>,

    /// Contact address registered with the CA account
    #[validate(email)]
    pub admin_email: String,

    /// Blob-store path of the persisted account credentials
    #[serde(default = "default_account_key_path")]
    #[validate(length(min = 1, message = "account_key_path must not be empty"))]
    pub account_key_path: String,
}

impl AcmeConfig {
    /// Directory URL to register against
    pub fn directory_url(&self) -> &str {
        if let Some(url) = &self.directory_url {
            return url;
        }
        match self.environment {
            AcmeEnvironment::Staging => LETSENCRYPT_STAGING,
            AcmeEnvironment::Production => LETSENCRYPT_PRODUCTION,
        }
    }
}

pub(crate) fn default_account_key_path() -> String {
    "acme/account.json".to_string()
}
