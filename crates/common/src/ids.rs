//! Type-safe identifier newtypes.
//!
//! Records are addressed by the pair of the owning user and the domain
//! name. Nothing else identifies a record, so the pair gets its own type
//! ([`RecordKey`]) and is what stores and locks are keyed on.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of the user who claimed a domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for UserId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Unique key of a [`DomainRecord`](crate::DomainRecord).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub user_id: UserId,
    pub domain: String,
}

impl RecordKey {
    pub fn new(user_id: impl Into<UserId>, domain: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            domain: domain.into(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.user_id, self.domain)
    }
}
