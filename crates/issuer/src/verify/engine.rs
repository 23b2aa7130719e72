//! Verification engine
//!
//! The primitive checks (`verify_ownership`, `verify_a_record`,
//! `verify_cname`) only read DNS. The `*_record_*` operations load a
//! domain record under its lock, run a check, and persist the result.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use dnsproof_common::{DomainRecord, RecordKey, UserId};
use dnsproof_config::{OwnershipKeyPolicy, VerificationConfig};

use super::lookup::DnsLookup;
use super::ownership::{generate_token, ownership_value};
use super::VerifyError;
use crate::locks::DomainLocks;
use crate::store::DomainStore;

/// Which delegation record to check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelegationKind {
    A,
    Cname,
}

/// Settings the engine is constructed with
#[derive(Debug, Clone)]
pub struct VerifierSettings {
    /// First component of generated ownership keys
    pub record_label: String,
    pub key_ttl: Duration,
    pub key_policy: OwnershipKeyPolicy,
    pub owned_hosts: Vec<String>,
    pub owned_cnames: Vec<String>,
}

impl VerifierSettings {
    pub fn from_config(config: &VerificationConfig) -> Self {
        Self {
            record_label: config.txt_record_name.clone(),
            key_ttl: config.ownership_key_ttl(),
            key_policy: config.ownership_key_policy,
            owned_hosts: config.owned_hosts.clone(),
            owned_cnames: config.owned_cnames.clone(),
        }
    }
}

impl Default for VerifierSettings {
    fn default() -> Self {
        Self::from_config(&VerificationConfig::default())
    }
}

/// Domain ownership and delegation checks
#[derive(Debug)]
pub struct DomainVerifier {
    lookup: Arc<dyn DnsLookup>,
    store: Arc<dyn DomainStore>,
    locks: DomainLocks,
    settings: VerifierSettings,
}

impl DomainVerifier {
    pub fn new(
        lookup: Arc<dyn DnsLookup>,
        store: Arc<dyn DomainStore>,
        locks: DomainLocks,
        settings: VerifierSettings,
    ) -> Self {
        Self {
            lookup,
            store,
            locks,
            settings,
        }
    }

    pub fn settings(&self) -> &VerifierSettings {
        &self.settings
    }

    pub fn locks(&self) -> &DomainLocks {
        &self.locks
    }

    // ------------------------------------------------------------------------
    // Primitive checks
    // ------------------------------------------------------------------------

    /// Whether any TXT record at `zone` equals `expected` exactly
    pub async fn verify_ownership(&self, zone: &str, expected: &str) -> Result<bool, VerifyError> {
        let values = self.lookup.txt(zone).await?;

        for value in &values {
            trace!(
                zone = %zone,
                found_value = %value,
                expected_value = %expected,
                "Checking TXT record"
            );
            if value == expected {
                debug!(zone = %zone, "Ownership record found");
                return Ok(true);
            }
        }

        debug!(zone = %zone, records = values.len(), "Ownership record not found");
        Ok(false)
    }

    /// Whether any IPv4 address of `domain` is one of `owned_hosts`
    pub async fn verify_a_record(
        &self,
        domain: &str,
        owned_hosts: &[String],
    ) -> Result<bool, VerifyError> {
        let addresses = self.resolve_a(domain).await?;
        Ok(a_records_match(&addresses, owned_hosts))
    }

    /// Whether the CNAME target of `domain` is one of `owned_cnames`
    pub async fn verify_cname(
        &self,
        domain: &str,
        owned_cnames: &[String],
    ) -> Result<bool, VerifyError> {
        let target = self.lookup.cname(domain).await?;
        Ok(target.is_some_and(|target| cname_matches(&target, owned_cnames)))
    }

    /// Store a fresh ownership key on `record` and persist it.
    ///
    /// Returns the canonical TXT value the user must publish on the domain.
    /// With [`OwnershipKeyPolicy::PreservePending`] an unexpired, unverified
    /// key is handed back untouched.
    pub async fn generate_ownership_key(
        &self,
        record: &mut DomainRecord,
    ) -> Result<String, VerifyError> {
        let now = Utc::now();
        let ownership = &record.ownership_verification;

        if self.settings.key_policy == OwnershipKeyPolicy::PreservePending {
            if let Some(key) = &ownership.key {
                if !ownership.verified && !ownership.is_expired(now) {
                    debug!(
                        domain = %record.domain_name(),
                        "Keeping pending ownership key"
                    );
                    return Ok(key.clone());
                }
            }
        }

        let value = ownership_value(
            &self.settings.record_label,
            record.domain_name(),
            &generate_token(),
        );
        let zone = record_zone(record.domain_name());

        let ownership = &mut record.ownership_verification;
        ownership.key = Some(value.clone());
        ownership.zone = Some(zone);
        ownership.verified = false;
        ownership.checked_at = None;
        ownership.expires_at = expiry(now, self.settings.key_ttl);

        self.store.put(record).await?;

        info!(
            domain = %record.domain_name(),
            user_id = %record.user_id(),
            "Generated ownership key"
        );
        Ok(value)
    }

    // ------------------------------------------------------------------------
    // Record operations
    // ------------------------------------------------------------------------

    /// Generate an ownership key, creating the record on first use
    pub async fn generate_key_for(
        &self,
        user_id: &UserId,
        domain: &str,
    ) -> Result<DomainRecord, VerifyError> {
        let key = RecordKey::new(user_id.clone(), domain);
        let _guard = self.locks.lock(&key).await;

        let mut record = match self.store.get(&key).await? {
            Some(record) => record,
            None => DomainRecord::new(user_id.clone(), domain)?,
        };
        self.generate_ownership_key(&mut record).await?;
        Ok(record)
    }

    /// Check the stored ownership key against DNS and persist the outcome
    pub async fn verify_record_ownership(
        &self,
        user_id: &UserId,
        domain: &str,
    ) -> Result<DomainRecord, VerifyError> {
        let key = RecordKey::new(user_id.clone(), domain);
        let _guard = self.locks.lock(&key).await;
        let mut record = self.load(&key).await?;
        let now = Utc::now();

        let ownership = &record.ownership_verification;
        let verified = match (&ownership.key, &ownership.zone) {
            (Some(_), Some(_)) if ownership.is_expired(now) => {
                warn!(domain = %domain, user_id = %user_id, "Ownership key expired");
                false
            }
            (Some(expected), Some(zone)) => self.verify_ownership(zone, expected).await?,
            _ => {
                debug!(domain = %domain, "No ownership key generated yet");
                false
            }
        };

        let ownership = &mut record.ownership_verification;
        ownership.verified = verified;
        ownership.checked_at = Some(now);
        self.store.put(&record).await?;

        info!(domain = %domain, user_id = %user_id, verified, "Ownership checked");
        Ok(record)
    }

    pub async fn verify_record_a(
        &self,
        user_id: &UserId,
        domain: &str,
    ) -> Result<DomainRecord, VerifyError> {
        self.verify_record_delegation(user_id, domain, DelegationKind::A)
            .await
    }

    pub async fn verify_record_cname(
        &self,
        user_id: &UserId,
        domain: &str,
    ) -> Result<DomainRecord, VerifyError> {
        self.verify_record_delegation(user_id, domain, DelegationKind::Cname)
            .await
    }

    /// Check A or CNAME delegation against the configured allow-lists
    pub async fn verify_record_delegation(
        &self,
        user_id: &UserId,
        domain: &str,
        kind: DelegationKind,
    ) -> Result<DomainRecord, VerifyError> {
        let key = RecordKey::new(user_id.clone(), domain);
        let _guard = self.locks.lock(&key).await;
        let mut record = self.load(&key).await?;
        let now = Utc::now();

        let verified = match kind {
            DelegationKind::A => {
                let addresses = self.resolve_a(domain).await?;
                let verified = a_records_match(&addresses, &self.settings.owned_hosts);
                let delegation = &mut record.delegation;
                delegation.a_records = addresses.iter().map(|a| a.to_string()).collect();
                delegation.a_record_verified = verified;
                delegation.a_record_checked_at = Some(now);
                verified
            }
            DelegationKind::Cname => {
                let target = self.lookup.cname(domain).await?;
                let verified = target
                    .as_deref()
                    .is_some_and(|target| cname_matches(target, &self.settings.owned_cnames));
                let delegation = &mut record.delegation;
                delegation.cnames = target.into_iter().collect();
                delegation.cname_verified = verified;
                delegation.cname_checked_at = Some(now);
                verified
            }
        };

        self.store.put(&record).await?;

        info!(
            domain = %domain,
            user_id = %user_id,
            kind = ?kind,
            verified,
            "Delegation checked"
        );
        Ok(record)
    }

    async fn resolve_a(&self, domain: &str) -> Result<Vec<std::net::Ipv4Addr>, VerifyError> {
        let addresses = self.lookup.ipv4(domain).await?;
        trace!(domain = %domain, addresses = ?addresses, "Resolved A records");
        Ok(addresses)
    }

    async fn load(&self, key: &RecordKey) -> Result<DomainRecord, VerifyError> {
        self.store
            .get(key)
            .await?
            .ok_or_else(|| VerifyError::DomainNotFound {
                user_id: key.user_id.clone(),
                domain: key.domain.clone(),
            })
    }
}

/// Ownership keys are published on the domain itself
fn record_zone(domain: &str) -> String {
    domain.to_string()
}

fn expiry(now: DateTime<Utc>, ttl: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
}

fn a_records_match(addresses: &[std::net::Ipv4Addr], owned_hosts: &[String]) -> bool {
    addresses
        .iter()
        .any(|addr| owned_hosts.iter().any(|host| *host == addr.to_string()))
}

/// Resolvers return fully-qualified targets; allow-lists may omit the root dot
fn cname_matches(target: &str, owned_cnames: &[String]) -> bool {
    let relative = target.strip_suffix('.').unwrap_or(target);
    owned_cnames
        .iter()
        .any(|owned| owned == target || owned == relative)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_a_records_match_is_exact() {
        let owned = vec!["203.0.113.7".to_string()];
        assert!(a_records_match(
            &[Ipv4Addr::new(198, 51, 100, 1), Ipv4Addr::new(203, 0, 113, 7)],
            &owned
        ));
        assert!(!a_records_match(&[Ipv4Addr::new(203, 0, 113, 70)], &owned));
        assert!(!a_records_match(&[], &owned));
    }

    #[test]
    fn test_cname_matches_with_and_without_root_dot() {
        let owned = vec!["edge.example.net".to_string()];
        assert!(cname_matches("edge.example.net.", &owned));
        assert!(cname_matches("edge.example.net", &owned));
        assert!(!cname_matches("Edge.example.net.", &owned));
        assert!(!cname_matches("other.example.net.", &owned));

        let fqdn_owned = vec!["edge.example.net.".to_string()];
        assert!(cname_matches("edge.example.net.", &fqdn_owned));
    }

    #[test]
    fn test_expiry_overflow_is_none() {
        let now = Utc::now();
        assert_eq!(
            expiry(now, Duration::from_secs(60)),
            Some(now + chrono::Duration::seconds(60))
        );
        assert_eq!(expiry(now, Duration::MAX), None);
    }
}
