//! Certificate issuance orchestrator
//!
//! Issuance is split in two calls separated by however long the user takes
//! to publish a DNS record:
//!
//! 1. [`CertificateOrchestrator::request_certificate`] opens (or resumes) an
//!    order and hands back the DNS-01 record to publish.
//! 2. [`CertificateOrchestrator::complete_certificate_request`] checks that
//!    the record is visible, lets the CA validate it, finalizes the order and
//!    writes the certificate.
//!
//! Nothing but URLs survives between calls; each step persists its progress
//! on the domain record before the next external call, so any failure
//! leaves a state the next call can resume from.

use std::sync::Arc;

use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use tracing::{debug, info, warn};

use dnsproof_common::{ChallengeUrls, DomainRecord, RecordKey, UserId};

use super::account::AccountKeyStore;
use super::artifact::{ArtifactWriter, CertificateStatus, IssuedCertificate};
use super::ca::{
    AccountKey, AuthorizationStatus, CaClient, CaConnector, OrderSnapshot, OrderStatus,
    RegistrationMode,
};
use super::challenge::RequestOutcome;
use super::error::CertError;
use super::poll::{PollPolicy, PollStep};
use super::provider::ChallengeProvider;
use crate::locks::DomainLocks;
use crate::store::DomainStore;
use crate::verify::DomainVerifier;

/// CA settings of the orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub directory_url: String,
    pub poll: PollPolicy,
}

/// Drives the ACME DNS-01 exchange for domain records
#[derive(Debug)]
pub struct CertificateOrchestrator {
    store: Arc<dyn DomainStore>,
    verifier: Arc<DomainVerifier>,
    connector: Arc<dyn CaConnector>,
    provider: Arc<dyn ChallengeProvider>,
    accounts: AccountKeyStore,
    artifacts: ArtifactWriter,
    locks: DomainLocks,
    settings: OrchestratorSettings,
}

impl CertificateOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn DomainStore>,
        verifier: Arc<DomainVerifier>,
        connector: Arc<dyn CaConnector>,
        provider: Arc<dyn ChallengeProvider>,
        accounts: AccountKeyStore,
        artifacts: ArtifactWriter,
        locks: DomainLocks,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            store,
            verifier,
            connector,
            provider,
            accounts,
            artifacts,
            locks,
            settings,
        }
    }

    pub fn artifacts(&self) -> &ArtifactWriter {
        &self.artifacts
    }

    /// Open or resume an order and return the DNS-01 record to publish.
    ///
    /// Calling this again for an open order returns the same record without
    /// creating a new order. An order the CA reports invalid is replaced.
    pub async fn request_certificate(
        &self,
        user_id: &UserId,
        domain: &str,
        admin_email: &str,
    ) -> Result<RequestOutcome, CertError> {
        let key = RecordKey::new(user_id.clone(), domain);
        let _guard = self.locks.lock(&key).await;

        let account_key = self.accounts.load().await?;
        let client = self.connector.connect(&self.settings.directory_url).await?;
        let mut record = self.load(&key).await?;

        let mode = if record.acme_state.cert_url().is_some() {
            RegistrationMode::Reuse
        } else {
            RegistrationMode::Refresh
        };
        self.register(client.as_ref(), admin_email, account_key, mode)
            .await?;

        let order = self.open_order(client.as_ref(), &mut record).await?;

        for authz_url in &order.authorization_urls {
            let authz = client.fetch_authorization(&order.url, authz_url).await?;
            let Some(dns01) = authz.dns01 else {
                warn!(
                    domain = %domain,
                    authorization = %authz_url,
                    offered = ?authz.offered,
                    "Authorization offers no DNS-01 challenge"
                );
                continue;
            };

            let already_valid = match &authz.status {
                AuthorizationStatus::Valid => true,
                AuthorizationStatus::Pending | AuthorizationStatus::Invalid => false,
                AuthorizationStatus::Other(status) => {
                    warn!(
                        domain = %domain,
                        authorization = %authz_url,
                        status = %status,
                        "Skipping authorization"
                    );
                    continue;
                }
            };

            record.acme_state.record_challenge(ChallengeUrls {
                order_url: order.url.clone(),
                authz_url: authz.url.clone(),
                challenge_url: dns01.url.clone(),
                finalize_url: order.finalize_url.clone(),
            });
            if already_valid {
                record.acme_state.mark_validated()?;
            }
            self.store.put(&record).await?;

            let challenge = self
                .provider
                .present(&key, &dns01.token, &dns01.key_authorization)
                .await?;

            info!(
                domain = %domain,
                user_id = %user_id,
                zone = %challenge.zone,
                already_valid,
                "DNS-01 challenge ready"
            );
            return Ok(if already_valid {
                RequestOutcome::AlreadyValidated(challenge)
            } else {
                RequestOutcome::Pending(challenge)
            });
        }

        Err(CertError::NoChallengeAvailable {
            domain: domain.to_string(),
        })
    }

    /// Finish issuance once the DNS-01 record is published.
    ///
    /// Fails with [`CertError::RecordNotReady`] and changes nothing while the
    /// record is not visible. With a certificate already issued, only the
    /// chain is fetched and rewritten.
    pub async fn complete_certificate_request(
        &self,
        user_id: &UserId,
        domain: &str,
        admin_email: &str,
    ) -> Result<IssuedCertificate, CertError> {
        let key = RecordKey::new(user_id.clone(), domain);
        let _guard = self.locks.lock(&key).await;
        let mut record = self.load(&key).await?;

        let zone = required(&record, record.acme_state.challenge_zone.as_deref(), "challenge_zone")?;
        let token = required(&record, record.acme_state.challenge_token.as_deref(), "challenge_token")?;
        if !self.verifier.verify_ownership(&zone, &token).await? {
            debug!(domain = %domain, zone = %zone, "DNS-01 record not visible yet");
            return Err(CertError::RecordNotReady { zone });
        }

        let issued = record.acme_state.verified && record.acme_state.cert_url().is_some();
        let order_url = required(&record, record.acme_state.order_url(), "order_url")?;
        if !issued {
            required(&record, record.acme_state.authz_url(), "authz_url")?;
            required(&record, record.acme_state.challenge_url(), "challenge_url")?;
        }

        let account_key = self.accounts.load().await?;
        let client = self.connector.connect(&self.settings.directory_url).await?;
        self.register(client.as_ref(), admin_email, account_key, RegistrationMode::Reuse)
            .await?;

        if issued {
            info!(domain = %domain, "Certificate already issued, refreshing chain");
            return self
                .rewrite_chain(client.as_ref(), &mut record, &order_url)
                .await;
        }

        self.issue(client.as_ref(), &mut record, &order_url).await
    }

    /// Expiry state of the stored certificate of `domain`
    pub async fn certificate_status(
        &self,
        domain: &str,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<CertificateStatus, CertError> {
        self.artifacts.certificate_status(domain, now).await
    }

    async fn issue(
        &self,
        client: &dyn CaClient,
        record: &mut DomainRecord,
        order_url: &str,
    ) -> Result<IssuedCertificate, CertError> {
        let domain = record.domain_name().to_string();
        let authz_url = required(record, record.acme_state.authz_url(), "authz_url")?;
        let challenge_url = required(record, record.acme_state.challenge_url(), "challenge_url")?;
        let poll = &self.settings.poll;

        let order = client.fetch_order(order_url).await?;
        if order.status == OrderStatus::Invalid {
            return Err(invalid_order(&domain));
        }

        if order.status == OrderStatus::Valid {
            if let Some(cert_url) = &order.certificate_url {
                record.acme_state.mark_validated()?;
                record.acme_state.mark_issued(cert_url.clone())?;
                self.store.put(record).await?;
                return self.rewrite_chain(client, record, order_url).await;
            }
        }

        let authz = client.fetch_authorization(order_url, &authz_url).await?;
        match authz.status {
            AuthorizationStatus::Valid => {
                debug!(domain = %domain, "Authorization already valid");
            }
            AuthorizationStatus::Invalid => return Err(invalid_order(&domain)),
            _ => {
                client.accept_challenge(order_url, &challenge_url).await?;
                info!(domain = %domain, "Challenge accepted, waiting for CA validation");
                let (propagation, _) = self.provider.timeout();
                poll.with_min_timeout(propagation)
                    .poll("authorization", &domain, || {
                        authorization_step(client, order_url, &authz_url, &domain)
                    })
                    .await?;
            }
        }

        record.acme_state.mark_validated()?;
        self.store.put(record).await?;
        info!(domain = %domain, "Domain validated by CA");

        if let Some(dns01) = &authz.dns01 {
            self.provider
                .clean_up(&record.key(), &dns01.token, &dns01.key_authorization)
                .await?;
        }

        let order = poll
            .poll("order", &domain, || ready_step(client, order_url, &domain))
            .await?;

        if order.status == OrderStatus::Valid {
            if let Some(cert_url) = order.certificate_url {
                record.acme_state.mark_issued(cert_url)?;
                self.store.put(record).await?;
                return self.rewrite_chain(client, record, order_url).await;
            }
        }

        let (key_pem, csr_der) = build_csr(&domain)?;
        self.artifacts.write_key(&domain, &key_pem).await?;
        client.finalize(order_url, &csr_der).await?;

        let cert_url = poll
            .poll("certificate", &domain, || certificate_step(client, order_url, &domain))
            .await?;

        record.acme_state.mark_issued(cert_url)?;
        self.store.put(record).await?;

        self.rewrite_chain(client, record, order_url).await
    }

    /// Fetch an issued chain and write it next to the stored key.
    ///
    /// The key is stored before finalization, so this also repairs a chain
    /// write that failed after issuance. It is never regenerated here: a
    /// missing or foreign key drops the ACME state and the caller has to
    /// request a new certificate.
    async fn rewrite_chain(
        &self,
        client: &dyn CaClient,
        record: &mut DomainRecord,
        order_url: &str,
    ) -> Result<IssuedCertificate, CertError> {
        let domain = record.domain_name().to_string();
        let cert_url = required(record, record.acme_state.cert_url(), "cert_url")?;

        let chain = client.fetch_certificate(order_url, &cert_url).await?;
        if !self.artifacts.key_matches_leaf(&domain, &chain).await? {
            warn!(domain = %domain, "Stored key does not match issued certificate, dropping order");
            record.acme_state.reset();
            self.store.put(record).await?;
            return Err(CertError::KeyMaterialLost { domain });
        }

        self.artifacts.write_chain(&domain, &chain).await
    }

    /// Current order of the record, replacing one the CA declared invalid
    async fn open_order(
        &self,
        client: &dyn CaClient,
        record: &mut DomainRecord,
    ) -> Result<OrderSnapshot, CertError> {
        let domain = record.domain_name().to_string();

        let order = match record.acme_state.order_url() {
            None => client.new_order(&domain).await?,
            Some(url) => {
                let order = client.fetch_order(url).await?;
                if order.status == OrderStatus::Invalid {
                    warn!(domain = %domain, order = %order.url, "Order invalid, starting over");
                    record.acme_state.reset();
                    client.new_order(&domain).await?
                } else {
                    debug!(domain = %domain, order = %order.url, status = ?order.status, "Resuming order");
                    order
                }
            }
        };

        if record.acme_state.order_url() != Some(order.url.as_str()) {
            record.acme_state.begin_order(order.url.clone());
            self.store.put(record).await?;
            info!(domain = %domain, order = %order.url, "Order opened");
        }
        Ok(order)
    }

    async fn register(
        &self,
        client: &dyn CaClient,
        admin_email: &str,
        account_key: Option<AccountKey>,
        mode: RegistrationMode,
    ) -> Result<(), CertError> {
        let registration = client.register(admin_email, account_key, mode).await?;
        if registration.created {
            self.accounts.save(&registration.account_key).await?;
        }
        Ok(())
    }

    async fn load(&self, key: &RecordKey) -> Result<DomainRecord, CertError> {
        self.store
            .get(key)
            .await?
            .ok_or_else(|| CertError::DomainNotFound {
                user_id: key.user_id.clone(),
                domain: key.domain.clone(),
            })
    }
}

fn required(
    record: &DomainRecord,
    value: Option<&str>,
    field: &'static str,
) -> Result<String, CertError> {
    value
        .map(str::to_string)
        .ok_or_else(|| CertError::MissingAcmeState {
            domain: record.domain_name().to_string(),
            field,
        })
}

fn invalid_order(domain: &str) -> CertError {
    warn!(domain = %domain, "CA reports the order invalid");
    CertError::OrderInvalid {
        domain: domain.to_string(),
    }
}

async fn authorization_step(
    client: &dyn CaClient,
    order_url: &str,
    authz_url: &str,
    domain: &str,
) -> Result<PollStep<()>, CertError> {
    let authz = client.fetch_authorization(order_url, authz_url).await?;
    match authz.status {
        AuthorizationStatus::Valid => Ok(PollStep::Ready(())),
        AuthorizationStatus::Pending => Ok(PollStep::Pending),
        _ => Err(invalid_order(domain)),
    }
}

async fn ready_step(
    client: &dyn CaClient,
    order_url: &str,
    domain: &str,
) -> Result<PollStep<OrderSnapshot>, CertError> {
    let order = client.fetch_order(order_url).await?;
    match order.status {
        OrderStatus::Ready | OrderStatus::Valid => Ok(PollStep::Ready(order)),
        OrderStatus::Pending | OrderStatus::Processing => Ok(PollStep::Pending),
        OrderStatus::Invalid => Err(invalid_order(domain)),
    }
}

async fn certificate_step(
    client: &dyn CaClient,
    order_url: &str,
    domain: &str,
) -> Result<PollStep<String>, CertError> {
    let order = client.fetch_order(order_url).await?;
    match (order.status, order.certificate_url) {
        (OrderStatus::Valid, Some(cert_url)) => Ok(PollStep::Ready(cert_url)),
        (OrderStatus::Invalid, _) => Err(invalid_order(domain)),
        _ => Ok(PollStep::Pending),
    }
}

/// Fresh ECDSA P-256 key and a CSR for `domain`
fn build_csr(domain: &str) -> Result<(String, Vec<u8>), CertError> {
    let key_pair =
        KeyPair::generate().map_err(|e| CertError::Csr(format!("Failed to generate key: {}", e)))?;

    let mut params = CertificateParams::new(vec![domain.to_string()])
        .map_err(|e| CertError::Csr(format!("Failed to create CSR params: {}", e)))?;
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, domain);
    params.distinguished_name = dn;

    let csr = params
        .serialize_request(&key_pair)
        .map_err(|e| CertError::Csr(format!("Failed to serialize CSR: {}", e)))?;

    Ok((key_pair.serialize_pem(), csr.der().to_vec()))
}
