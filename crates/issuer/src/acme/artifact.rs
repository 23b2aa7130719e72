//! Certificate artifact storage
//!
//! Each domain gets two blobs under the configured prefix, the key written
//! before finalization and the chain once the CA has issued it:
//!
//! - `<prefix><domain>/cert.key` - PKCS#8 PEM private key
//! - `<prefix><domain>/cert.crt` - the DER certificates of the chain,
//!   leaf first, concatenated without separators
//!
//! Consumers read the chain back by parsing one DER certificate after
//! another until the buffer is exhausted.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use rcgen::PublicKeyData;
use x509_parser::prelude::*;

use super::ca::IssuedChain;
use super::error::CertError;
use crate::store::BlobStore;

const KEY_FILE: &str = "cert.key";
const CHAIN_FILE: &str = "cert.crt";

/// Where a certificate was written
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssuedCertificate {
    pub domain: String,
    pub key_path: String,
    pub chain_path: String,
    pub cert_url: String,
    pub not_after: DateTime<Utc>,
}

/// Stored certificate state of a domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CertificateStatus {
    Missing,
    Valid { not_after: DateTime<Utc> },
    Expired { not_after: DateTime<Utc> },
}

impl CertificateStatus {
    /// A certificate is valid strictly before its `not_after`
    pub fn evaluate(not_after: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        if not_after > now {
            CertificateStatus::Valid { not_after }
        } else {
            CertificateStatus::Expired { not_after }
        }
    }
}

/// Writes and inspects certificate artifacts in a [`BlobStore`]
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    blobs: Arc<dyn BlobStore>,
    prefix: String,
}

impl ArtifactWriter {
    pub fn new(blobs: Arc<dyn BlobStore>, prefix: impl Into<String>) -> Self {
        Self {
            blobs,
            prefix: prefix.into(),
        }
    }

    pub fn key_path(&self, domain: &str) -> String {
        format!("{}{}/{}", self.prefix, domain, KEY_FILE)
    }

    pub fn chain_path(&self, domain: &str) -> String {
        format!("{}{}/{}", self.prefix, domain, CHAIN_FILE)
    }

    /// Store the private key of a certificate about to be requested.
    ///
    /// Runs before the CSR reaches the CA, so an issued certificate always
    /// has its key in storage and a failed chain write can be repaired by
    /// refetching the chain.
    pub async fn write_key(&self, domain: &str, key_pem: &str) -> Result<String, CertError> {
        let key_path = self.key_path(domain);
        self.put(&key_path, key_pem.as_bytes()).await?;
        debug!(domain = %domain, key = %key_path, "Private key written");
        Ok(key_path)
    }

    /// Store the chain next to the key written by [`Self::write_key`]
    pub async fn write_chain(
        &self,
        domain: &str,
        chain: &IssuedChain,
    ) -> Result<IssuedCertificate, CertError> {
        let not_after = leaf_not_after(chain)?;
        let chain_path = self.chain_path(domain);
        self.put(&chain_path, &chain.der_chain.concat()).await?;

        info!(
            domain = %domain,
            chain = %chain_path,
            certificates = chain.der_chain.len(),
            expires = %not_after,
            "Certificate written"
        );
        Ok(IssuedCertificate {
            domain: domain.to_string(),
            key_path: self.key_path(domain),
            chain_path,
            cert_url: chain.cert_url.clone(),
            not_after,
        })
    }

    /// Whether the stored private key belongs to the chain's leaf certificate
    pub async fn key_matches_leaf(
        &self,
        domain: &str,
        chain: &IssuedChain,
    ) -> Result<bool, CertError> {
        let key_path = self.key_path(domain);
        let Some(bytes) = self.blobs.read_bytes(&key_path).await? else {
            debug!(domain = %domain, "No stored private key");
            return Ok(false);
        };

        let pem = match std::str::from_utf8(&bytes) {
            Ok(pem) => pem,
            Err(_) => {
                warn!(path = %key_path, "Stored private key is not PEM");
                return Ok(false);
            }
        };
        let key_pair = match rcgen::KeyPair::from_pem(pem) {
            Ok(key_pair) => key_pair,
            Err(e) => {
                warn!(path = %key_path, error = %e, "Failed to parse stored private key");
                return Ok(false);
            }
        };

        let leaf = chain
            .der_chain
            .first()
            .ok_or_else(|| CertError::CertificateParse("empty certificate chain".to_string()))?;
        let (_, cert) = X509Certificate::from_der(leaf)
            .map_err(|e| CertError::CertificateParse(e.to_string()))?;

        Ok(cert.public_key().raw == key_pair.subject_public_key_info().as_slice())
    }

    /// Expiry state of the stored certificate for `domain`
    pub async fn certificate_status(
        &self,
        domain: &str,
        now: DateTime<Utc>,
    ) -> Result<CertificateStatus, CertError> {
        let Some(chain) = self.blobs.read_bytes(&self.chain_path(domain)).await? else {
            return Ok(CertificateStatus::Missing);
        };

        let mut rest = chain.as_slice();
        while !rest.is_empty() {
            let (remaining, cert) = parse_x509_certificate(rest)
                .map_err(|e| CertError::CertificateParse(e.to_string()))?;
            if names_domain(&cert, domain) {
                return Ok(CertificateStatus::evaluate(not_after(&cert)?, now));
            }
            rest = remaining;
        }

        warn!(domain = %domain, "Stored chain holds no certificate for the domain");
        Ok(CertificateStatus::Missing)
    }

    async fn put(&self, path: &str, data: &[u8]) -> Result<(), CertError> {
        self.blobs
            .write_bytes(path, data)
            .await
            .map_err(|source| CertError::ArtifactWrite {
                path: path.to_string(),
                source,
            })
    }
}

fn leaf_not_after(chain: &IssuedChain) -> Result<DateTime<Utc>, CertError> {
    let leaf = chain
        .der_chain
        .first()
        .ok_or_else(|| CertError::CertificateParse("empty certificate chain".to_string()))?;
    let (_, cert) =
        X509Certificate::from_der(leaf).map_err(|e| CertError::CertificateParse(e.to_string()))?;
    not_after(&cert)
}

fn not_after(cert: &X509Certificate<'_>) -> Result<DateTime<Utc>, CertError> {
    let timestamp = cert.validity().not_after.timestamp();
    DateTime::from_timestamp(timestamp, 0)
        .ok_or_else(|| CertError::CertificateParse("Invalid expiry timestamp".to_string()))
}

/// Subject CN or a DNS subject alternative name equals `domain`
fn names_domain(cert: &X509Certificate<'_>, domain: &str) -> bool {
    let cn_matches = cert
        .subject()
        .iter_common_name()
        .filter_map(|cn| cn.as_str().ok())
        .any(|cn| cn == domain);
    if cn_matches {
        return true;
    }

    match cert.subject_alternative_name() {
        Ok(Some(san)) => san.value.general_names.iter().any(|name| match name {
            GeneralName::DNSName(name) => *name == domain,
            _ => false,
        }),
        _ => false,
    }
}
