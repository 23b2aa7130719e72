//! dnsproof issuer library
//!
//! Proves that users control the domains they claim and obtains TLS
//! certificates for them through ACME DNS-01, with the DNS record published
//! by the user.
//!
//! - **Verification**: ownership keys in TXT records, A and CNAME delegation
//! - **Issuance**: resumable two-call ACME DNS-01 flow
//! - **Storage**: domain records and certificate artifacts
//!
//! # Example
//!
//! ```ignore
//! use dnsproof_config::Config;
//! use dnsproof_issuer::Issuer;
//!
//! let config = Config::from_file("dnsproof.toml")?;
//! let issuer = Issuer::from_config(&config).await?;
//!
//! let alice = "alice".into();
//! issuer.registry().register(&alice, "foo.example").await?;
//! let outcome = issuer
//!     .orchestrator()
//!     .request_certificate(&alice, "foo.example", issuer.admin_email())
//!     .await?;
//! println!("publish {} TXT {}", outcome.challenge().zone, outcome.challenge().value);
//! ```

// ============================================================================
// Module Declarations
// ============================================================================

pub mod acme;
pub mod app;
pub mod domains;
pub mod locks;
pub mod store;
pub mod verify;

// ============================================================================
// Public API Re-exports
// ============================================================================

pub use acme::{
    CertError, CertificateOrchestrator, CertificateStatus, DnsChallenge, IssuedCertificate,
    RequestOutcome,
};
pub use app::{Components, Issuer};
pub use domains::{DomainRegistry, RegistryError};
pub use locks::{DomainLocks, RecordGuard};
pub use verify::{DelegationKind, DomainVerifier, VerifyError};
