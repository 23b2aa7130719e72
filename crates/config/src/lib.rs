//! Configuration module for dnsproof
//!
//! Parses and validates the settings shared by the verification engine and
//! the certificate orchestrator. Files may be TOML or JSON; the format is
//! picked from the file extension.
//!
//! # Module Organization
//!
//! - [`acme`]: CA directory selection and account settings
//! - [`verification`]: Ownership key and delegation check settings
//! - [`storage`]: Record store and certificate blob locations
//! - [`polling`]: Backoff and ceiling for CA status polling
//! - [`validation`]: Cross-field validation functions
//! - [`defaults`]: Example configuration shipped with the binary

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use validator::Validate;

// ============================================================================
// Module Declarations
// ============================================================================

pub mod acme;
mod defaults;
pub mod polling;
pub mod storage;
pub mod validation;
pub mod verification;

// ============================================================================
// Re-exports
// ============================================================================

pub use acme::{AcmeConfig, AcmeEnvironment, LETSENCRYPT_PRODUCTION, LETSENCRYPT_STAGING};
pub use defaults::EXAMPLE_CONFIG_TOML;
pub use polling::PollingConfig;
pub use storage::StorageConfig;
pub use verification::{OwnershipKeyPolicy, VerificationConfig};

/// Configuration failed validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration validation failed: {0}")]
    Invalid(#[from] validator::ValidationErrors),

    #[error("Configuration error: {message}")]
    Semantic { message: String },
}

// ============================================================================
// Main Configuration Structure
// ============================================================================

/// Main configuration structure for dnsproof
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validation::validate_config_semantics"))]
pub struct Config {
    /// CA account and directory settings
    #[validate(nested)]
    pub acme: AcmeConfig,

    /// Ownership and delegation checks
    #[serde(default)]
    #[validate(nested)]
    pub verification: VerificationConfig,

    /// Where records and certificates live
    #[serde(default)]
    #[validate(nested)]
    pub storage: StorageConfig,

    /// CA status polling
    #[serde(default)]
    #[validate(nested)]
    pub polling: PollingConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("toml");

        match extension {
            "json" => Self::from_json(&content),
            "toml" => Self::from_toml(&content),
            _ => Err(anyhow::anyhow!("Unsupported config format: {}", extension)),
        }
    }

    /// Parse configuration from JSON format
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Failed to parse JSON configuration")
    }

    /// Parse configuration from TOML format
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse TOML configuration")
    }

    /// Parse the example configuration shipped with the binary
    pub fn example() -> Result<Self> {
        Self::from_toml(EXAMPLE_CONFIG_TOML)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        Validate::validate(self)?;
        Ok(())
    }

    /// Minimal configuration for tests: staging CA, in-tree defaults.
    pub fn default_for_testing() -> Self {
        Self {
            acme: AcmeConfig {
                environment: AcmeEnvironment::Staging,
                directory_url: None,
                admin_email: "admin@example.com".to_string(),
                account_key_path: acme::default_account_key_path(),
            },
            verification: VerificationConfig::default(),
            storage: StorageConfig::default(),
            polling: PollingConfig::default(),
        }
    }
}
