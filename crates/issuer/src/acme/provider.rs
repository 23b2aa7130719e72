//! DNS-01 challenge providers
//!
//! A provider makes the challenge response visible to the CA. The only one
//! shipped here is [`ManualDnsProvider`], which records the expected TXT
//! record on the domain record and leaves publishing it to the user.

use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use dnsproof_common::RecordKey;

use super::challenge::DnsChallenge;
use super::error::CertError;
use crate::store::DomainStore;

/// Default time to wait for a challenge record to propagate
pub const DEFAULT_PROPAGATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Default interval between propagation checks
pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(2);

/// Present/clean-up contract for DNS-01 challenges
#[async_trait]
pub trait ChallengeProvider: Send + Sync + Debug {
    /// Make the response for `key_authorization` available
    async fn present(
        &self,
        key: &RecordKey,
        token: &str,
        key_authorization: &str,
    ) -> Result<DnsChallenge, CertError>;

    /// Remove whatever `present` put in place
    async fn clean_up(
        &self,
        key: &RecordKey,
        token: &str,
        key_authorization: &str,
    ) -> Result<(), CertError>;

    /// Interval between challenges when several are solved one at a time
    fn sequential(&self) -> Duration;

    /// Propagation timeout and polling interval
    fn timeout(&self) -> (Duration, Duration);
}

/// Stores the expected TXT record on the domain record.
///
/// Callers must hold the record's lock; the orchestrator does.
#[derive(Debug, Clone)]
pub struct ManualDnsProvider {
    store: Arc<dyn DomainStore>,
}

impl ManualDnsProvider {
    pub fn new(store: Arc<dyn DomainStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ChallengeProvider for ManualDnsProvider {
    async fn present(
        &self,
        key: &RecordKey,
        token: &str,
        key_authorization: &str,
    ) -> Result<DnsChallenge, CertError> {
        let mut record = self
            .store
            .get(key)
            .await?
            .ok_or_else(|| CertError::DomainNotFound {
                user_id: key.user_id.clone(),
                domain: key.domain.clone(),
            })?;

        let challenge = DnsChallenge::from_key_authorization(&key.domain, key_authorization);
        record.acme_state.challenge_zone = Some(challenge.zone.clone());
        record.acme_state.challenge_token = Some(challenge.value.clone());
        self.store.put(&record).await?;

        info!(
            domain = %key.domain,
            user_id = %key.user_id,
            zone = %challenge.zone,
            token = %token,
            "DNS-01 record recorded; waiting for user to publish it"
        );
        Ok(challenge)
    }

    async fn clean_up(
        &self,
        key: &RecordKey,
        token: &str,
        _key_authorization: &str,
    ) -> Result<(), CertError> {
        // The user owns the zone; there is nothing to remove.
        debug!(domain = %key.domain, token = %token, "DNS-01 clean up");
        Ok(())
    }

    fn sequential(&self) -> Duration {
        DEFAULT_PROPAGATION_TIMEOUT
    }

    fn timeout(&self) -> (Duration, Duration) {
        (DEFAULT_PROPAGATION_TIMEOUT, DEFAULT_POLLING_INTERVAL)
    }
}
