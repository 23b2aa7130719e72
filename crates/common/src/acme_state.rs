//! ACME progress persisted on a domain record.
//!
//! The CA hands out URLs in a fixed order: an order, then its
//! authorization, then the DNS-01 challenge inside it, then the order's
//! finalize endpoint. [`AcmeState`] keeps those URLs private and only
//! accepts them through setters that refuse to record a URL whose
//! predecessor is missing. Deserialization goes through the same check,
//! so a record loaded from storage can never hold an out-of-order state.
//!
//! ```
//! use dnsproof_common::acme_state::{AcmePhase, AcmeState};
//!
//! let mut state = AcmeState::default();
//! assert!(state.set_authz_url("https://ca/authz/1").is_err());
//!
//! state.begin_order("https://ca/order/1");
//! state.set_authz_url("https://ca/authz/1").unwrap();
//! assert_eq!(state.phase(), AcmePhase::OrderOpen);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Rejected attempt to record an ACME URL before its predecessor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AcmeStateError {
    #[error("cannot record {field} before {missing} is set")]
    OutOfOrder {
        field: &'static str,
        missing: &'static str,
    },
}

/// Phase of the issuance state machine, derived from persisted fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AcmePhase {
    /// No CA order has been opened.
    NoOrder,
    /// An order exists but no challenge has been handed out yet.
    OrderOpen,
    /// A DNS-01 challenge is waiting for the TXT record to be published.
    ChallengePending,
    /// The CA validated the challenge; no certificate URL is known yet.
    Validated,
    /// A certificate was issued and its URL recorded.
    Issued,
}

impl fmt::Display for AcmePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NoOrder => "no_order",
            Self::OrderOpen => "order_open",
            Self::ChallengePending => "challenge_pending",
            Self::Validated => "validated",
            Self::Issued => "issued",
        };
        f.write_str(name)
    }
}

/// The four URLs recorded together when a challenge is handed out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeUrls {
    pub order_url: String,
    pub authz_url: String,
    pub challenge_url: String,
    pub finalize_url: String,
}

/// ACME progress for a single domain record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "AcmeStateRepr", into = "AcmeStateRepr")]
pub struct AcmeState {
    order_url: Option<String>,
    authz_url: Option<String>,
    challenge_url: Option<String>,
    finalize_url: Option<String>,
    cert_url: Option<String>,
    /// Expected TXT value for the pending DNS-01 challenge.
    pub challenge_token: Option<String>,
    /// Record name the DNS-01 TXT value must be published under.
    pub challenge_zone: Option<String>,
    /// Set once the CA has validated the challenge.
    pub verified: bool,
}

impl AcmeState {
    pub fn order_url(&self) -> Option<&str> {
        self.order_url.as_deref()
    }

    pub fn authz_url(&self) -> Option<&str> {
        self.authz_url.as_deref()
    }

    pub fn challenge_url(&self) -> Option<&str> {
        self.challenge_url.as_deref()
    }

    pub fn finalize_url(&self) -> Option<&str> {
        self.finalize_url.as_deref()
    }

    pub fn cert_url(&self) -> Option<&str> {
        self.cert_url.as_deref()
    }

    /// Current phase of the issuance state machine.
    pub fn phase(&self) -> AcmePhase {
        match (
            &self.order_url,
            &self.challenge_url,
            self.verified,
            &self.cert_url,
        ) {
            (None, ..) => AcmePhase::NoOrder,
            (Some(_), _, true, Some(_)) => AcmePhase::Issued,
            (Some(_), _, true, None) => AcmePhase::Validated,
            (Some(_), Some(_), false, _) => AcmePhase::ChallengePending,
            (Some(_), None, false, _) => AcmePhase::OrderOpen,
        }
    }

    /// Record a freshly opened order.
    ///
    /// Everything downstream of the order belongs to whichever order was
    /// open before, so it is cleared.
    pub fn begin_order(&mut self, order_url: impl Into<String>) {
        *self = Self {
            order_url: Some(order_url.into()),
            challenge_token: self.challenge_token.take(),
            challenge_zone: self.challenge_zone.take(),
            ..Self::default()
        };
    }

    pub fn set_authz_url(&mut self, url: impl Into<String>) -> Result<(), AcmeStateError> {
        require(&self.order_url, "authz_url", "order_url")?;
        self.authz_url = Some(url.into());
        Ok(())
    }

    pub fn set_challenge_url(&mut self, url: impl Into<String>) -> Result<(), AcmeStateError> {
        require(&self.authz_url, "challenge_url", "authz_url")?;
        self.challenge_url = Some(url.into());
        Ok(())
    }

    pub fn set_finalize_url(&mut self, url: impl Into<String>) -> Result<(), AcmeStateError> {
        require(&self.challenge_url, "finalize_url", "challenge_url")?;
        self.finalize_url = Some(url.into());
        Ok(())
    }

    /// Record all four URLs of a handed-out challenge at once.
    pub fn record_challenge(&mut self, urls: ChallengeUrls) {
        let ChallengeUrls {
            order_url,
            authz_url,
            challenge_url,
            finalize_url,
        } = urls;

        if self.order_url.as_deref() != Some(order_url.as_str()) {
            self.begin_order(order_url);
        }
        self.authz_url = Some(authz_url);
        self.challenge_url = Some(challenge_url);
        self.finalize_url = Some(finalize_url);
    }

    /// Mark the challenge as validated by the CA.
    pub fn mark_validated(&mut self) -> Result<(), AcmeStateError> {
        require(&self.challenge_url, "verified", "challenge_url")?;
        self.verified = true;
        Ok(())
    }

    /// Record the URL of the issued certificate.
    pub fn mark_issued(&mut self, cert_url: impl Into<String>) -> Result<(), AcmeStateError> {
        require(&self.finalize_url, "cert_url", "finalize_url")?;
        self.verified = true;
        self.cert_url = Some(cert_url.into());
        Ok(())
    }

    /// Forget the current order entirely. Used when the CA reports it invalid.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

fn require(
    predecessor: &Option<String>,
    field: &'static str,
    missing: &'static str,
) -> Result<(), AcmeStateError> {
    match predecessor {
        Some(_) => Ok(()),
        None => Err(AcmeStateError::OutOfOrder { field, missing }),
    }
}

/// Wire form of [`AcmeState`]; public fields, validated on the way in.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct AcmeStateRepr {
    #[serde(skip_serializing_if = "Option::is_none")]
    order_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    authz_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    challenge_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    finalize_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cert_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    challenge_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    challenge_zone: Option<String>,
    verified: bool,
}

impl TryFrom<AcmeStateRepr> for AcmeState {
    type Error = AcmeStateError;

    fn try_from(repr: AcmeStateRepr) -> Result<Self, Self::Error> {
        let mut state = AcmeState {
            challenge_token: repr.challenge_token,
            challenge_zone: repr.challenge_zone,
            ..AcmeState::default()
        };

        if let Some(url) = repr.order_url {
            state.begin_order(url);
        }
        if let Some(url) = repr.authz_url {
            state.set_authz_url(url)?;
        }
        if let Some(url) = repr.challenge_url {
            state.set_challenge_url(url)?;
        }
        if let Some(url) = repr.finalize_url {
            state.set_finalize_url(url)?;
        }
        if let Some(url) = repr.cert_url {
            state.mark_issued(url)?;
        }
        state.verified = repr.verified || state.cert_url.is_some();

        Ok(state)
    }
}

impl From<AcmeState> for AcmeStateRepr {
    fn from(state: AcmeState) -> Self {
        Self {
            order_url: state.order_url,
            authz_url: state.authz_url,
            challenge_url: state.challenge_url,
            finalize_url: state.finalize_url,
            cert_url: state.cert_url,
            challenge_token: state.challenge_token,
            challenge_zone: state.challenge_zone,
            verified: state.verified,
        }
    }
}
