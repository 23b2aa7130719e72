//! Shared identifiers and the persisted domain record model for dnsproof.
//!
//! # Module Organization
//!
//! - [`ids`]: Type-safe identifiers (UserId, RecordKey)
//! - [`types`]: The persisted [`DomainRecord`] and its ownership and delegation sections
//! - [`acme_state`]: ACME progress tracked on each record, with ordered URL setters

pub mod acme_state;
pub mod ids;
pub mod types;

pub use acme_state::{AcmePhase, AcmeState, AcmeStateError, ChallengeUrls};
pub use ids::{RecordKey, UserId};
pub use types::{Delegation, DomainRecord, OwnershipVerification, RecordError};
