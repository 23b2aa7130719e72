//! CA protocol client interface
//!
//! The orchestrator never holds protocol objects between calls; it only
//! persists URLs. Every operation here therefore takes the URLs it acts on
//! and returns a plain snapshot of what the CA reported.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};
use std::sync::Arc;

use super::error::CaError;

/// Result type for CA operations
pub type CaResult<T> = Result<T, CaError>;

/// Order status as reported by the CA
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
}

/// Authorization status as reported by the CA
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationStatus {
    Pending,
    Valid,
    Invalid,
    /// Deactivated, expired, revoked or anything newer
    Other(String),
}

/// An order and the URLs hanging off it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderSnapshot {
    pub url: String,
    pub status: OrderStatus,
    pub authorization_urls: Vec<String>,
    pub finalize_url: String,
    pub certificate_url: Option<String>,
}

/// The DNS-01 challenge of an authorization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeSnapshot {
    pub url: String,
    pub token: String,
    /// `<token>.<account thumbprint>`; hashed into the TXT value
    pub key_authorization: String,
}

/// An authorization and its DNS-01 challenge, if one is offered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationSnapshot {
    pub url: String,
    pub identifier: String,
    pub status: AuthorizationStatus,
    pub dns01: Option<ChallengeSnapshot>,
    /// Challenge types offered, for logging
    pub offered: Vec<String>,
}

/// Whether `register` may reuse an existing registration as is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationMode {
    /// A certificate was issued before; the account is known to be good
    Reuse,
    /// Refresh the registration before ordering
    Refresh,
}

/// Serialized account credentials.
///
/// Opaque to everything but the client that produced them.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountKey(serde_json::Value);

impl AccountKey {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}

impl Debug for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccountKey(<redacted>)")
    }
}

/// Outcome of account registration
#[derive(Debug, Clone)]
pub struct Registration {
    pub account_key: AccountKey,
    /// A new account was created and `account_key` must be persisted
    pub created: bool,
}

/// Certificate chain fetched from the CA, leaf first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedChain {
    pub der_chain: Vec<Vec<u8>>,
    pub cert_url: String,
}

/// A connection to one CA directory.
///
/// `register` must succeed before any other call.
#[async_trait]
pub trait CaClient: Send + Sync + Debug {
    async fn register(
        &self,
        email: &str,
        account_key: Option<AccountKey>,
        mode: RegistrationMode,
    ) -> CaResult<Registration>;

    async fn new_order(&self, domain: &str) -> CaResult<OrderSnapshot>;

    async fn fetch_order(&self, order_url: &str) -> CaResult<OrderSnapshot>;

    async fn fetch_authorization(
        &self,
        order_url: &str,
        authz_url: &str,
    ) -> CaResult<AuthorizationSnapshot>;

    /// Tell the CA the challenge response is in place
    async fn accept_challenge(&self, order_url: &str, challenge_url: &str) -> CaResult<()>;

    /// Submit the CSR of a `ready` order
    async fn finalize(&self, order_url: &str, csr_der: &[u8]) -> CaResult<OrderSnapshot>;

    async fn fetch_certificate(&self, order_url: &str, cert_url: &str) -> CaResult<IssuedChain>;
}

/// Opens [`CaClient`]s bound to a directory URL
#[async_trait]
pub trait CaConnector: Send + Sync + Debug {
    async fn connect(&self, directory_url: &str) -> CaResult<Arc<dyn CaClient>>;
}
