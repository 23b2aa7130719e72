//! Ownership key format
//!
//! The canonical TXT value is `<record_label>;<domain>;<token>` where the
//! token is 30 random ASCII alphanumerics.

use rand::distr::Alphanumeric;
use rand::Rng;

/// Length of the random part of an ownership key
pub const TOKEN_LENGTH: usize = 30;

/// Generate a fresh random token
pub fn generate_token() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

/// Build the canonical TXT value
pub fn ownership_value(record_label: &str, domain: &str, token: &str) -> String {
    format!("{};{};{}", record_label, domain, token)
}

/// Split a canonical value back into (label, domain, token)
pub fn parse_ownership_value(value: &str) -> Option<(&str, &str, &str)> {
    let mut parts = value.splitn(3, ';');
    let label = parts.next()?;
    let domain = parts.next()?;
    let token = parts.next()?;
    if label.is_empty() || domain.is_empty() || token.len() != TOKEN_LENGTH {
        return None;
    }
    Some((label, domain, token))
}
