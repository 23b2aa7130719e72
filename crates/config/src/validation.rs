//! Configuration validation functions
//!
//! Field-level checks live on the structs as `validator` attributes; the
//! functions here cover the rules that span fields.

use std::borrow::Cow;
use tracing::warn;
use validator::ValidationError;

use crate::Config;

// ============================================================================
// Field Validators
// ============================================================================

/// Blob prefixes are joined directly with `<domain>/cert.*`
pub fn validate_blob_prefix(prefix: &str) -> Result<(), ValidationError> {
    if prefix.starts_with('/') || prefix.split('/').any(|part| part == "..") {
        let mut err = ValidationError::new("invalid_blob_prefix");
        err.message = Some(Cow::Owned(format!(
            "cert_prefix '{}' must be relative and must not contain '..'",
            prefix
        )));
        return Err(err);
    }
    Ok(())
}

// ============================================================================
// Semantic Validation
// ============================================================================

/// Cross-field checks run as the schema validator of [`Config`]
pub fn validate_config_semantics(config: &Config) -> Result<(), ValidationError> {
    let polling = &config.polling;
    if polling.initial_delay_ms > polling.max_delay_ms {
        let mut err = ValidationError::new("polling_delay_order");
        err.message = Some(Cow::Owned(format!(
            "polling.initial_delay_ms ({}) exceeds polling.max_delay_ms ({})",
            polling.initial_delay_ms, polling.max_delay_ms
        )));
        return Err(err);
    }

    if polling.max_delay_ms / 1_000 > polling.timeout_secs {
        warn!(
            max_delay_ms = polling.max_delay_ms,
            timeout_secs = polling.timeout_secs,
            "Polling delay cap is longer than the timeout; only one poll will run"
        );
    }

    let verification = &config.verification;
    for host in &verification.owned_hosts {
        if host.parse::<std::net::Ipv4Addr>().is_err() {
            let mut err = ValidationError::new("owned_host_not_ipv4");
            err.message = Some(Cow::Owned(format!(
                "verification.owned_hosts entry '{}' is not an IPv4 address",
                host
            )));
            return Err(err);
        }
    }

    Ok(())
}
