//! Domain ownership and delegation verification
//!
//! # Architecture
//!
//! - [`DnsLookup`] - TXT, A and CNAME resolution, implemented over hickory by [`HickoryLookup`]
//! - [`DomainVerifier`] - Compares live DNS against expected values and records the outcome
//! - [`ownership`] - Ownership key format and token generation
//!
//! # Ownership Flow
//!
//! 1. [`DomainVerifier::generate_ownership_key`] stores `<label>;<domain>;<token>`
//!    on the record, to be published as a TXT record on the domain itself
//! 2. The user publishes the value
//! 3. [`DomainVerifier::verify_record_ownership`] looks it up and flips
//!    `ownership_verification.verified`
//!
//! Lookups compare byte-for-byte. A missing name or empty answer is a
//! negative result, not an error; only resolver failures surface as
//! [`VerifyError::DnsLookup`].

mod engine;
mod lookup;
pub mod ownership;

use thiserror::Error;

use dnsproof_common::{RecordError, UserId};

use crate::store::StoreError;

pub use engine::{DelegationKind, DomainVerifier, VerifierSettings};
pub use lookup::{DnsLookup, HickoryLookup, LookupError, LookupResult};

/// Errors surfaced by the verification engine
#[derive(Debug, Error)]
pub enum VerifyError {
    /// Resolver failed for a reason other than the name not existing
    #[error("DNS lookup failed for '{name}': {message}")]
    DnsLookup { name: String, message: String },

    /// No record for this (user, domain)
    #[error("Domain '{domain}' is not registered for user '{user_id}'")]
    DomainNotFound { user_id: UserId, domain: String },

    #[error("Invalid domain record: {0}")]
    InvalidRecord(#[from] RecordError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl From<LookupError> for VerifyError {
    fn from(e: LookupError) -> Self {
        match e {
            LookupError::Resolver { name, message } => VerifyError::DnsLookup { name, message },
        }
    }
}
