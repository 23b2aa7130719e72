//! ACME error types

use std::time::Duration;
use thiserror::Error;

use dnsproof_common::{AcmeStateError, UserId};

use crate::store::StoreError;
use crate::verify::VerifyError;

/// Errors that can occur while issuing a certificate
#[derive(Debug, Error)]
pub enum CertError {
    /// No record for this (user, domain)
    #[error("Domain '{domain}' is not registered for user '{user_id}'")]
    DomainNotFound { user_id: UserId, domain: String },

    /// Resolver failure while checking the challenge record
    #[error(transparent)]
    Verify(#[from] VerifyError),

    /// The DNS-01 TXT record is not visible yet
    #[error("DNS-01 record not found at '{zone}' yet; publish it and retry")]
    RecordNotReady { zone: String },

    /// The CA reports the order or its authorization invalid
    #[error("Order for '{domain}' is invalid; request a new certificate")]
    OrderInvalid { domain: String },

    /// A required step of the ACME state was never recorded
    #[error("ACME state for '{domain}' is missing {field}; request a certificate first")]
    MissingAcmeState { domain: String, field: &'static str },

    /// None of the order's authorizations offers a DNS-01 challenge
    #[error("No DNS-01 challenge available for domain '{domain}'")]
    NoChallengeAvailable { domain: String },

    /// CA status polling hit its ceiling
    #[error("Timed out after {waited:?} waiting for {stage} of '{domain}'")]
    IssuanceTimeout {
        domain: String,
        stage: &'static str,
        waited: Duration,
    },

    /// Writing the key or chain to the blob store failed
    #[error("Failed to write certificate artifact '{path}': {source}")]
    ArtifactWrite {
        path: String,
        #[source]
        source: StoreError,
    },

    /// The stored key does not belong to the issued certificate
    #[error("Private key for '{domain}' is missing or does not match the issued certificate; request a new certificate")]
    KeyMaterialLost { domain: String },

    /// Stored account credentials are unreadable
    #[error("Invalid ACME account key: {0}")]
    AccountKey(String),

    #[error("CA error: {0}")]
    Ca(#[from] CaError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid ACME state: {0}")]
    State(#[from] AcmeStateError),

    /// Failed to generate the certificate key or CSR
    #[error("Failed to build CSR: {0}")]
    Csr(String),

    #[error("Failed to parse certificate: {0}")]
    CertificateParse(String),
}

impl CertError {
    /// The same call may succeed later without any other action
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CertError::RecordNotReady { .. } | CertError::IssuanceTimeout { .. }
        )
    }

    /// The caller has to start over with a new certificate request
    pub fn requires_rerequest(&self) -> bool {
        matches!(
            self,
            CertError::OrderInvalid { .. } | CertError::KeyMaterialLost { .. }
        )
    }
}

/// Errors reported by a CA client
#[derive(Debug, Error)]
pub enum CaError {
    /// No ACME account has been registered on this client
    #[error("ACME account not registered - call register() first")]
    NoAccount,

    /// Stored credentials do not deserialize into an account
    #[error("Invalid stored account credentials: {0}")]
    AccountKey(String),

    /// ACME protocol error
    #[error("ACME protocol error: {0}")]
    Protocol(String),

    /// The CA does not know this resource
    #[error("{kind} not found: {url}")]
    NotFound { kind: &'static str, url: String },

    /// The order has not produced a certificate
    #[error("No certificate available for order {0}")]
    NoCertificate(String),

    /// The certificate chain returned by the CA is unreadable
    #[error("Invalid certificate chain: {0}")]
    InvalidChain(String),
}

impl From<instant_acme::Error> for CaError {
    fn from(e: instant_acme::Error) -> Self {
        CaError::Protocol(e.to_string())
    }
}
