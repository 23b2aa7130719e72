//! DNS-01 challenge values
//!
//! The record the user publishes is a TXT record at
//! `_acme-challenge.<domain>` holding the base64url-encoded SHA-256 digest
//! of the challenge's key authorization.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// ACME challenge record name prefix
pub const ACME_CHALLENGE_RECORD: &str = "_acme-challenge";

/// Strip the wildcard label; wildcard names validate on the base domain
pub fn normalize_domain(domain: &str) -> &str {
    domain.strip_prefix("*.").unwrap_or(domain)
}

/// Full name of the DNS-01 record for `domain`
///
/// For `example.com` and `*.example.com`, returns `_acme-challenge.example.com`
pub fn challenge_record_fqdn(domain: &str) -> String {
    format!("{}.{}", ACME_CHALLENGE_RECORD, normalize_domain(domain))
}

/// Compute the DNS-01 TXT value from a key authorization
pub fn compute_challenge_value(key_authorization: &str) -> String {
    let digest = Sha256::digest(key_authorization.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

/// A TXT record the user has to publish
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DnsChallenge {
    pub domain: String,
    /// Record name, e.g. `_acme-challenge.example.com`
    pub zone: String,
    /// Record value
    pub value: String,
}

impl DnsChallenge {
    pub fn from_key_authorization(domain: &str, key_authorization: &str) -> Self {
        Self {
            domain: domain.to_string(),
            zone: challenge_record_fqdn(domain),
            value: compute_challenge_value(key_authorization),
        }
    }
}

/// Result of a certificate request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RequestOutcome {
    /// Publish the record, then complete the request
    Pending(DnsChallenge),
    /// The CA already considers the domain validated
    AlreadyValidated(DnsChallenge),
}

impl RequestOutcome {
    pub fn challenge(&self) -> &DnsChallenge {
        match self {
            RequestOutcome::Pending(challenge) | RequestOutcome::AlreadyValidated(challenge) => {
                challenge
            }
        }
    }

    pub fn is_validated(&self) -> bool {
        matches!(self, RequestOutcome::AlreadyValidated(_))
    }
}
