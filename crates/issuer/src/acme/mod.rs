//! ACME DNS-01 certificate issuance
//!
//! Obtains certificates for user domains from Let's Encrypt and compatible
//! CAs, with the DNS-01 record published by the user by hand.
//!
//! # Architecture
//!
//! - [`CertificateOrchestrator`] - Drives the two-call issuance flow over a domain record
//! - [`CaClient`] / [`CaConnector`] - CA protocol seam, implemented over `instant-acme`
//!   by [`InstantAcmeClient`]
//! - [`ChallengeProvider`] - Present/clean-up contract; [`ManualDnsProvider`] records the
//!   expected TXT value instead of publishing it
//! - [`AccountKeyStore`] - Persisted account credentials
//! - [`ArtifactWriter`] - Private key and certificate chain storage
//! - [`PollPolicy`] - Bounded backoff while waiting on the CA
//!
//! # Flow
//!
//! ```text
//! request_certificate   -> order opened, DNS-01 record returned
//! (user publishes _acme-challenge.<domain> TXT <value>)
//! complete_certificate_request -> record checked, challenge accepted,
//!                                 order finalized, cert.key + cert.crt written
//! ```

mod account;
mod artifact;
mod ca;
mod challenge;
mod error;
mod instant;
mod orchestrator;
mod poll;
mod provider;

pub use account::AccountKeyStore;
pub use artifact::{ArtifactWriter, CertificateStatus, IssuedCertificate};
pub use ca::{
    AccountKey, AuthorizationSnapshot, AuthorizationStatus, CaClient, CaConnector, CaResult,
    ChallengeSnapshot, IssuedChain, OrderSnapshot, OrderStatus, Registration, RegistrationMode,
};
pub use challenge::{
    challenge_record_fqdn, compute_challenge_value, normalize_domain, DnsChallenge,
    RequestOutcome, ACME_CHALLENGE_RECORD,
};
pub use error::{CaError, CertError};
pub use instant::{InstantAcmeClient, InstantAcmeConnector};
pub use orchestrator::{CertificateOrchestrator, OrchestratorSettings};
pub use poll::{PollPolicy, PollStep};
pub use provider::{
    ChallengeProvider, ManualDnsProvider, DEFAULT_POLLING_INTERVAL, DEFAULT_PROPAGATION_TIMEOUT,
};
