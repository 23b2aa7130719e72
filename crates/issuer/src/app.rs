//! Application wiring
//!
//! Builds the verification engine, the orchestrator and the registry over
//! one set of stores and one lock registry.

use std::sync::Arc;
use tracing::info;

use dnsproof_config::Config;

use crate::acme::{
    AccountKeyStore, ArtifactWriter, CaConnector, CertificateOrchestrator, ChallengeProvider,
    InstantAcmeConnector, ManualDnsProvider, OrchestratorSettings, PollPolicy,
};
use crate::domains::DomainRegistry;
use crate::locks::DomainLocks;
use crate::store::{BlobStore, DomainStore, FsBlobStore, JsonFileDomainStore, StoreResult};
use crate::verify::{DnsLookup, DomainVerifier, HickoryLookup, VerifierSettings};

/// External collaborators of an [`Issuer`]
#[derive(Debug, Clone)]
pub struct Components {
    pub store: Arc<dyn DomainStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub lookup: Arc<dyn DnsLookup>,
    pub connector: Arc<dyn CaConnector>,
}

/// Everything the CLI operates on
#[derive(Debug)]
pub struct Issuer {
    registry: DomainRegistry,
    verifier: Arc<DomainVerifier>,
    orchestrator: CertificateOrchestrator,
    admin_email: String,
}

impl Issuer {
    /// Production wiring: JSON record file, filesystem blobs, hickory, instant-acme
    pub async fn from_config(config: &Config) -> StoreResult<Self> {
        let store = JsonFileDomainStore::open(&config.storage.records_path).await?;
        let components = Components {
            store: Arc::new(store),
            blobs: Arc::new(FsBlobStore::new(&config.storage.blob_root)),
            lookup: Arc::new(HickoryLookup::new(&config.verification.nameservers)),
            connector: Arc::new(InstantAcmeConnector::new()),
        };

        info!(
            records = %config.storage.records_path.display(),
            blobs = %config.storage.blob_root.display(),
            directory = %config.acme.directory_url(),
            "Issuer initialized"
        );
        Ok(Self::with_components(config, components))
    }

    pub fn with_components(config: &Config, components: Components) -> Self {
        let Components {
            store,
            blobs,
            lookup,
            connector,
        } = components;
        let locks = DomainLocks::new();

        let verifier = Arc::new(DomainVerifier::new(
            lookup,
            store.clone(),
            locks.clone(),
            VerifierSettings::from_config(&config.verification),
        ));

        let provider: Arc<dyn ChallengeProvider> = Arc::new(ManualDnsProvider::new(store.clone()));
        let orchestrator = CertificateOrchestrator::new(
            store.clone(),
            verifier.clone(),
            connector,
            provider,
            AccountKeyStore::new(blobs.clone(), config.acme.account_key_path.clone()),
            ArtifactWriter::new(blobs, config.storage.cert_prefix.clone()),
            locks.clone(),
            OrchestratorSettings {
                directory_url: config.acme.directory_url().to_string(),
                poll: PollPolicy::from_config(&config.polling),
            },
        );

        Self {
            registry: DomainRegistry::new(store, locks),
            verifier,
            orchestrator,
            admin_email: config.acme.admin_email.clone(),
        }
    }

    pub fn registry(&self) -> &DomainRegistry {
        &self.registry
    }

    pub fn verifier(&self) -> &DomainVerifier {
        &self.verifier
    }

    pub fn orchestrator(&self) -> &CertificateOrchestrator {
        &self.orchestrator
    }

    /// Contact address used for CA account registration
    pub fn admin_email(&self) -> &str {
        &self.admin_email
    }
}
