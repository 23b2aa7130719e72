//! [`CaClient`] over instant-acme
//!
//! instant-acme hands out `Order` objects that borrow nothing from the
//! caller, but they cannot be persisted. Every call therefore restores the
//! order from its URL, acts on it, and reports a snapshot.

use async_trait::async_trait;
use std::sync::Arc;

use instant_acme::{
    Account, AccountCredentials, AuthorizationStatus as AcmeAuthorizationStatus, ChallengeType,
    Identifier, NewAccount, NewOrder, Order, OrderStatus as AcmeOrderStatus,
};
use tokio::sync::RwLock;
use tracing::{debug, info, trace};

use super::ca::{
    AccountKey, AuthorizationSnapshot, AuthorizationStatus, CaClient, CaConnector, CaResult,
    ChallengeSnapshot, IssuedChain, OrderSnapshot, OrderStatus, Registration, RegistrationMode,
};
use super::error::CaError;

/// Opens [`InstantAcmeClient`]s
#[derive(Debug, Default, Clone)]
pub struct InstantAcmeConnector;

impl InstantAcmeConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CaConnector for InstantAcmeConnector {
    async fn connect(&self, directory_url: &str) -> CaResult<Arc<dyn CaClient>> {
        debug!(directory = %directory_url, "Opening ACME client");
        Ok(Arc::new(InstantAcmeClient::new(directory_url)))
    }
}

/// ACME client bound to one directory
pub struct InstantAcmeClient {
    directory_url: String,
    /// Set by `register`
    account: RwLock<Option<Account>>,
}

impl InstantAcmeClient {
    pub fn new(directory_url: impl Into<String>) -> Self {
        Self {
            directory_url: directory_url.into(),
            account: RwLock::new(None),
        }
    }

    async fn account(&self) -> CaResult<Account> {
        self.account.read().await.clone().ok_or(CaError::NoAccount)
    }

    async fn restore_order(&self, order_url: &str) -> CaResult<Order> {
        let account = self.account().await?;
        let order = account.order(order_url.to_string()).await?;
        trace!(order = %order_url, "Restored order");
        Ok(order)
    }
}

#[async_trait]
impl CaClient for InstantAcmeClient {
    /// Stored credentials are restored in both modes: they carry the account
    /// URL, so the CA already knows the account and a restored account is a
    /// refreshed one.
    async fn register(
        &self,
        email: &str,
        account_key: Option<AccountKey>,
        mode: RegistrationMode,
    ) -> CaResult<Registration> {
        if let Some(account_key) = account_key {
            let credentials: AccountCredentials =
                serde_json::from_value(account_key.as_value().clone())
                    .map_err(|e| CaError::AccountKey(e.to_string()))?;

            let account = Account::builder()?.from_credentials(credentials).await?;
            *self.account.write().await = Some(account);

            debug!(mode = ?mode, "ACME account restored from stored credentials");
            return Ok(Registration {
                account_key,
                created: false,
            });
        }

        info!(email = %email, directory = %self.directory_url, "Creating new ACME account");

        let (account, credentials) = Account::builder()?
            .create(
                &NewAccount {
                    contact: &[&format!("mailto:{}", email)],
                    terms_of_service_agreed: true,
                    only_return_existing: false,
                },
                self.directory_url.clone(),
                None,
            )
            .await?;

        let value = serde_json::to_value(&credentials)
            .map_err(|e| CaError::AccountKey(format!("Failed to serialize credentials: {}", e)))?;
        *self.account.write().await = Some(account);

        info!("ACME account created successfully");
        Ok(Registration {
            account_key: AccountKey::new(value),
            created: true,
        })
    }

    async fn new_order(&self, domain: &str) -> CaResult<OrderSnapshot> {
        let account = self.account().await?;
        let identifiers = [Identifier::Dns(domain.to_string())];

        info!(domain = %domain, "Creating certificate order");
        let mut order = account.new_order(&NewOrder::new(&identifiers)).await?;
        order_snapshot(&mut order).await
    }

    async fn fetch_order(&self, order_url: &str) -> CaResult<OrderSnapshot> {
        let mut order = self.restore_order(order_url).await?;
        order_snapshot(&mut order).await
    }

    async fn fetch_authorization(
        &self,
        order_url: &str,
        authz_url: &str,
    ) -> CaResult<AuthorizationSnapshot> {
        let mut order = self.restore_order(order_url).await?;

        let mut authorizations = order.authorizations();
        while let Some(result) = authorizations.next().await {
            let mut authz = result?;
            if authz.url() != authz_url {
                continue;
            }

            let url = authz.url().to_string();
            let identifier = match &authz.identifier().identifier {
                Identifier::Dns(domain) => domain.clone(),
                other => format!("{:?}", other),
            };
            let status = authorization_status(&authz.status);
            let offered = authz
                .challenges
                .iter()
                .map(|c| format!("{:?}", c.r#type))
                .collect();

            let dns01 = authz.challenge(ChallengeType::Dns01).map(|challenge| {
                ChallengeSnapshot {
                    url: challenge.url.clone(),
                    token: challenge.token.clone(),
                    key_authorization: challenge.key_authorization().as_str().to_string(),
                }
            });

            return Ok(AuthorizationSnapshot {
                url,
                identifier,
                status,
                dns01,
                offered,
            });
        }

        Err(CaError::NotFound {
            kind: "authorization",
            url: authz_url.to_string(),
        })
    }

    async fn accept_challenge(&self, order_url: &str, challenge_url: &str) -> CaResult<()> {
        let mut order = self.restore_order(order_url).await?;
        debug!(challenge_url = %challenge_url, "Setting challenge ready");

        let mut authorizations = order.authorizations();
        while let Some(result) = authorizations.next().await {
            let mut authz = result?;

            let matching_type = authz
                .challenges
                .iter()
                .find(|c| c.url == challenge_url)
                .map(|c| c.r#type.clone());

            if let Some(challenge_type) = matching_type {
                if let Some(mut challenge) = authz.challenge(challenge_type) {
                    challenge.set_ready().await?;
                    return Ok(());
                }
            }
        }

        Err(CaError::NotFound {
            kind: "challenge",
            url: challenge_url.to_string(),
        })
    }

    async fn finalize(&self, order_url: &str, csr_der: &[u8]) -> CaResult<OrderSnapshot> {
        let mut order = self.restore_order(order_url).await?;
        info!(order = %order_url, "Finalizing certificate order");
        order.finalize_csr(csr_der).await?;
        order_snapshot(&mut order).await
    }

    async fn fetch_certificate(&self, order_url: &str, cert_url: &str) -> CaResult<IssuedChain> {
        let mut order = self.restore_order(order_url).await?;
        let pem = order
            .certificate()
            .await?
            .ok_or_else(|| CaError::NoCertificate(order_url.to_string()))?;

        let der_chain = pem_chain_to_der(&pem)?;
        debug!(certificates = der_chain.len(), "Fetched certificate chain");
        Ok(IssuedChain {
            der_chain,
            cert_url: cert_url.to_string(),
        })
    }
}

impl std::fmt::Debug for InstantAcmeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstantAcmeClient")
            .field("directory_url", &self.directory_url)
            .field(
                "has_account",
                &self
                    .account
                    .try_read()
                    .map(|a| a.is_some())
                    .unwrap_or(false),
            )
            .finish()
    }
}

async fn order_snapshot(order: &mut Order) -> CaResult<OrderSnapshot> {
    let url = order.url().to_string();
    let state = order.state();
    let status = order_status(&state.status);
    let finalize_url = state.finalize.clone();
    let certificate_url = state.certificate.clone();

    let mut authorization_urls = Vec::new();
    let mut authorizations = order.authorizations();
    while let Some(result) = authorizations.next().await {
        authorization_urls.push(result?.url().to_string());
    }

    Ok(OrderSnapshot {
        url,
        status,
        authorization_urls,
        finalize_url,
        certificate_url,
    })
}

fn order_status(status: &AcmeOrderStatus) -> OrderStatus {
    match status {
        AcmeOrderStatus::Pending => OrderStatus::Pending,
        AcmeOrderStatus::Ready => OrderStatus::Ready,
        AcmeOrderStatus::Processing => OrderStatus::Processing,
        AcmeOrderStatus::Valid => OrderStatus::Valid,
        AcmeOrderStatus::Invalid => OrderStatus::Invalid,
    }
}

fn authorization_status(status: &AcmeAuthorizationStatus) -> AuthorizationStatus {
    match status {
        AcmeAuthorizationStatus::Pending => AuthorizationStatus::Pending,
        AcmeAuthorizationStatus::Valid => AuthorizationStatus::Valid,
        AcmeAuthorizationStatus::Invalid => AuthorizationStatus::Invalid,
        other => AuthorizationStatus::Other(format!("{:?}", other).to_lowercase()),
    }
}

/// Split a PEM chain into DER certificates, leaf first
fn pem_chain_to_der(pem: &str) -> CaResult<Vec<Vec<u8>>> {
    let mut der_chain = Vec::new();
    for block in x509_parser::pem::Pem::iter_from_buffer(pem.as_bytes()) {
        let block = block.map_err(|e| CaError::InvalidChain(e.to_string()))?;
        der_chain.push(block.contents);
    }

    if der_chain.is_empty() {
        return Err(CaError::InvalidChain("no certificates in PEM chain".to_string()));
    }
    Ok(der_chain)
}
