//! Persisted domain record model.
//!
//! A [`DomainRecord`] is created when a user claims a domain and carries
//! everything later steps need: the ownership proof, delegation checks and
//! ACME progress. It is only ever looked up by (user id, domain name).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::acme_state::AcmeState;
use crate::ids::{RecordKey, UserId};

/// Invalid domain record construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("domain record requires a user id")]
    MissingUserId,

    #[error("domain record requires a domain name")]
    MissingDomain,
}

/// Ownership proof: a TXT value the user must publish at `zone`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OwnershipVerification {
    /// Canonical TXT value, `<label>;<domain>;<token>`.
    pub key: Option<String>,
    /// Record name the value must be published under.
    pub zone: Option<String>,
    pub verified: bool,
    pub checked_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl OwnershipVerification {
    /// A key is expired from its `expires_at` instant onwards.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

/// Delegation checks: whether the domain points at hosts we run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Delegation {
    /// IPv4 addresses observed at the last A-record check.
    pub a_records: Vec<String>,
    /// CNAME targets observed at the last CNAME check.
    pub cnames: Vec<String>,
    pub a_record_verified: bool,
    pub cname_verified: bool,
    pub a_record_checked_at: Option<DateTime<Utc>>,
    pub cname_checked_at: Option<DateTime<Utc>>,
}

/// A user's claim on a domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StoredRecord")]
pub struct DomainRecord {
    domain_name: String,
    user_id: UserId,
    pub ownership_verification: OwnershipVerification,
    pub delegation: Delegation,
    pub acme_state: AcmeState,
}

impl DomainRecord {
    pub fn new(user_id: impl Into<UserId>, domain_name: impl Into<String>) -> Result<Self, RecordError> {
        let user_id = user_id.into();
        let domain_name = domain_name.into();

        if user_id.is_empty() {
            return Err(RecordError::MissingUserId);
        }
        if domain_name.is_empty() {
            return Err(RecordError::MissingDomain);
        }

        Ok(Self {
            domain_name,
            user_id,
            ownership_verification: OwnershipVerification::default(),
            delegation: Delegation::default(),
            acme_state: AcmeState::default(),
        })
    }

    pub fn domain_name(&self) -> &str {
        &self.domain_name
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.user_id.clone(), self.domain_name.clone())
    }
}

#[derive(Deserialize)]
struct StoredRecord {
    domain_name: String,
    user_id: UserId,
    #[serde(default)]
    ownership_verification: OwnershipVerification,
    #[serde(default)]
    delegation: Delegation,
    #[serde(default)]
    acme_state: AcmeState,
}

impl TryFrom<StoredRecord> for DomainRecord {
    type Error = RecordError;

    fn try_from(stored: StoredRecord) -> Result<Self, Self::Error> {
        let mut record = DomainRecord::new(stored.user_id, stored.domain_name)?;
        record.ownership_verification = stored.ownership_verification;
        record.delegation = stored.delegation;
        record.acme_state = stored.acme_state;
        Ok(record)
    }
}
