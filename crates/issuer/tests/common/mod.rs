//! Shared test utilities for integration tests
//!
//! In-memory stand-ins for DNS and the CA, plus a harness wiring them into
//! an [`Issuer`] over memory stores.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::Arc;

use dnsproof_common::{DomainRecord, RecordKey, UserId};
use dnsproof_config::Config;
use dnsproof_issuer::acme::{
    AccountKey, AuthorizationSnapshot, AuthorizationStatus, CaClient, CaConnector, CaError,
    CaResult, ChallengeSnapshot, IssuedChain, OrderSnapshot, OrderStatus, Registration,
    RegistrationMode,
};
use dnsproof_issuer::store::{
    BlobStore, DomainStore, MemoryBlobStore, MemoryDomainStore, StoreError, StoreResult,
};
use dnsproof_issuer::verify::{DnsLookup, LookupError, LookupResult};
use dnsproof_issuer::{Components, Issuer};

pub const CA_BASE: &str = "https://ca.test";

pub fn alice() -> UserId {
    UserId::from("alice")
}

// ============================================================================
// DNS
// ============================================================================

/// DNS answers set up by the test
#[derive(Debug, Default)]
pub struct StaticLookup {
    txt: Mutex<HashMap<String, Vec<String>>>,
    a: Mutex<HashMap<String, Vec<Ipv4Addr>>>,
    cname: Mutex<HashMap<String, String>>,
    failing: Mutex<HashSet<String>>,
}

impl StaticLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish_txt(&self, name: &str, value: &str) {
        self.txt
            .lock()
            .entry(name.to_string())
            .or_default()
            .push(value.to_string());
    }

    pub fn clear_txt(&self, name: &str) {
        self.txt.lock().remove(name);
    }

    pub fn set_a(&self, name: &str, addresses: &[Ipv4Addr]) {
        self.a.lock().insert(name.to_string(), addresses.to_vec());
    }

    pub fn set_cname(&self, name: &str, target: &str) {
        self.cname.lock().insert(name.to_string(), target.to_string());
    }

    /// Every lookup of `name` fails with a resolver error
    pub fn fail_on(&self, name: &str) {
        self.failing.lock().insert(name.to_string());
    }

    fn check(&self, name: &str) -> LookupResult<()> {
        if self.failing.lock().contains(name) {
            return Err(LookupError::Resolver {
                name: name.to_string(),
                message: "SERVFAIL".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DnsLookup for StaticLookup {
    async fn txt(&self, name: &str) -> LookupResult<Vec<String>> {
        self.check(name)?;
        Ok(self.txt.lock().get(name).cloned().unwrap_or_default())
    }

    async fn ipv4(&self, name: &str) -> LookupResult<Vec<Ipv4Addr>> {
        self.check(name)?;
        Ok(self.a.lock().get(name).cloned().unwrap_or_default())
    }

    async fn cname(&self, name: &str) -> LookupResult<Option<String>> {
        self.check(name)?;
        Ok(self.cname.lock().get(name).cloned())
    }
}

// ============================================================================
// Certificates
// ============================================================================

/// Self-signed certificate for `domain` (CN and SAN), DER
pub fn self_signed_der(domain: &str, key: &rcgen::KeyPair) -> Vec<u8> {
    let mut params = rcgen::CertificateParams::new(vec![domain.to_string()]).unwrap();
    let mut dn = rcgen::DistinguishedName::new();
    dn.push(rcgen::DnType::CommonName, domain);
    params.distinguished_name = dn;
    params.not_after = rcgen::date_time_ymd(2030, 1, 1);
    params.self_signed(key).unwrap().der().to_vec()
}

/// Leaf for `domain` signed by `key`, followed by an issuer certificate
pub fn chain_for(domain: &str, key: &rcgen::KeyPair) -> Vec<Vec<u8>> {
    let issuer_key = rcgen::KeyPair::generate().unwrap();
    vec![
        self_signed_der(domain, key),
        self_signed_der("Fake Intermediate", &issuer_key),
    ]
}

// ============================================================================
// CA
// ============================================================================

#[derive(Debug, Clone)]
struct FakeOrder {
    domain: String,
    status: OrderStatus,
    authz_status: AuthorizationStatus,
    token: String,
    chain: Option<Vec<Vec<u8>>>,
}

#[derive(Debug, Default)]
pub struct FakeCaState {
    pub connects: usize,
    pub registrations: Vec<RegistrationMode>,
    pub accounts_created: usize,
    pub new_orders: usize,
    pub accepted: usize,
    pub finalized: usize,
    pub certificate_fetches: usize,
    orders: HashMap<String, FakeOrder>,
    next_id: usize,

    /// New orders start with a valid authorization
    pub preauthorize: bool,
    /// Accepted challenges stay pending forever
    pub never_validate: bool,
    /// Authorizations only offer HTTP-01
    pub no_dns01: bool,
}

/// In-memory CA with one authorization per order.
///
/// Order `n` lives at `<CA_BASE>/order/n`, with its authorization,
/// challenge, finalize and certificate URLs numbered the same way.
///
/// The CA cannot sign the CSR's key itself; with a key store attached it
/// issues the leaf for the key stored at `<prefix><domain>/cert.key`,
/// otherwise for a fresh key.
#[derive(Debug, Clone, Default)]
pub struct FakeCa {
    state: Arc<Mutex<FakeCaState>>,
    key_store: Option<(Arc<dyn BlobStore>, String)>,
}

impl FakeCa {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key_store(blobs: Arc<dyn BlobStore>, prefix: &str) -> Self {
        Self {
            key_store: Some((blobs, prefix.to_string())),
            ..Self::default()
        }
    }

    async fn leaf_key(&self, domain: &str) -> rcgen::KeyPair {
        if let Some((blobs, prefix)) = &self.key_store {
            let path = format!("{}{}/cert.key", prefix, domain);
            if let Ok(Some(pem)) = blobs.read_bytes(&path).await {
                let pem = String::from_utf8(pem).unwrap();
                return rcgen::KeyPair::from_pem(&pem).unwrap();
            }
        }
        rcgen::KeyPair::generate().unwrap()
    }

    /// Inspect or tweak the CA
    pub fn state(&self) -> parking_lot::MutexGuard<'_, FakeCaState> {
        self.state.lock()
    }

    /// Mark an order and its authorization invalid
    pub fn invalidate(&self, order_url: &str) {
        let mut state = self.state.lock();
        if let Some(order) = state.orders.get_mut(order_url) {
            order.status = OrderStatus::Invalid;
            order.authz_status = AuthorizationStatus::Invalid;
        }
    }

    /// Add an order that already issued `chain`; returns its id
    pub fn insert_issued_order(&self, domain: &str, chain: Vec<Vec<u8>>) -> usize {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.orders.insert(
            url("order", id),
            FakeOrder {
                domain: domain.to_string(),
                status: OrderStatus::Valid,
                authz_status: AuthorizationStatus::Valid,
                token: format!("token-{}", id),
                chain: Some(chain),
            },
        );
        id
    }

    pub fn key_authorization(token: &str) -> String {
        format!("{}.thumbprint", token)
    }

    fn snapshot(id: usize, order: &FakeOrder) -> OrderSnapshot {
        OrderSnapshot {
            url: url("order", id),
            status: order.status,
            authorization_urls: vec![url("authz", id)],
            finalize_url: url("finalize", id),
            certificate_url: order.chain.as_ref().map(|_| url("cert", id)),
        }
    }
}

pub fn url(kind: &str, id: usize) -> String {
    format!("{}/{}/{}", CA_BASE, kind, id)
}

fn id_of(url: &str) -> usize {
    url.rsplit('/')
        .next()
        .and_then(|id| id.parse().ok())
        .unwrap_or(0)
}

fn not_found(kind: &'static str, url: &str) -> CaError {
    CaError::NotFound {
        kind,
        url: url.to_string(),
    }
}

#[async_trait]
impl CaConnector for FakeCa {
    async fn connect(&self, _directory_url: &str) -> CaResult<Arc<dyn CaClient>> {
        self.state.lock().connects += 1;
        Ok(Arc::new(self.clone()))
    }
}

#[async_trait]
impl CaClient for FakeCa {
    async fn register(
        &self,
        _email: &str,
        account_key: Option<AccountKey>,
        mode: RegistrationMode,
    ) -> CaResult<Registration> {
        let mut state = self.state.lock();
        state.registrations.push(mode);
        Ok(match account_key {
            Some(account_key) => Registration {
                account_key,
                created: false,
            },
            None => {
                state.accounts_created += 1;
                Registration {
                    account_key: AccountKey::new(serde_json::json!({
                        "id": format!("{}/acct/{}", CA_BASE, state.accounts_created)
                    })),
                    created: true,
                }
            }
        })
    }

    async fn new_order(&self, domain: &str) -> CaResult<OrderSnapshot> {
        let mut state = self.state.lock();
        state.new_orders += 1;
        state.next_id += 1;
        let id = state.next_id;

        let (status, authz_status) = if state.preauthorize {
            (OrderStatus::Ready, AuthorizationStatus::Valid)
        } else {
            (OrderStatus::Pending, AuthorizationStatus::Pending)
        };
        let order = FakeOrder {
            domain: domain.to_string(),
            status,
            authz_status,
            token: format!("token-{}", id),
            chain: None,
        };
        let snapshot = Self::snapshot(id, &order);
        state.orders.insert(url("order", id), order);
        Ok(snapshot)
    }

    async fn fetch_order(&self, order_url: &str) -> CaResult<OrderSnapshot> {
        let state = self.state.lock();
        let order = state
            .orders
            .get(order_url)
            .ok_or_else(|| not_found("order", order_url))?;
        Ok(Self::snapshot(id_of(order_url), order))
    }

    async fn fetch_authorization(
        &self,
        order_url: &str,
        authz_url: &str,
    ) -> CaResult<AuthorizationSnapshot> {
        let state = self.state.lock();
        let id = id_of(order_url);
        let order = state
            .orders
            .get(order_url)
            .filter(|_| authz_url == url("authz", id))
            .ok_or_else(|| not_found("authorization", authz_url))?;

        let dns01 = (!state.no_dns01).then(|| ChallengeSnapshot {
            url: url("chall", id),
            token: order.token.clone(),
            key_authorization: Self::key_authorization(&order.token),
        });
        Ok(AuthorizationSnapshot {
            url: authz_url.to_string(),
            identifier: order.domain.clone(),
            status: order.authz_status.clone(),
            dns01,
            offered: if state.no_dns01 {
                vec!["Http01".to_string()]
            } else {
                vec!["Http01".to_string(), "Dns01".to_string()]
            },
        })
    }

    async fn accept_challenge(&self, order_url: &str, challenge_url: &str) -> CaResult<()> {
        let mut state = self.state.lock();
        state.accepted += 1;
        let never_validate = state.never_validate;
        let order = state
            .orders
            .get_mut(order_url)
            .filter(|_| challenge_url == url("chall", id_of(order_url)))
            .ok_or_else(|| not_found("challenge", challenge_url))?;

        if !never_validate {
            order.authz_status = AuthorizationStatus::Valid;
            order.status = OrderStatus::Ready;
        }
        Ok(())
    }

    async fn finalize(&self, order_url: &str, csr_der: &[u8]) -> CaResult<OrderSnapshot> {
        assert!(!csr_der.is_empty());
        let domain = self
            .state
            .lock()
            .orders
            .get(order_url)
            .map(|order| order.domain.clone())
            .ok_or_else(|| not_found("order", order_url))?;
        let key = self.leaf_key(&domain).await;

        let mut state = self.state.lock();
        state.finalized += 1;
        let order = state
            .orders
            .get_mut(order_url)
            .ok_or_else(|| not_found("order", order_url))?;
        if order.status != OrderStatus::Ready {
            return Err(CaError::Protocol(format!("order is {:?}", order.status)));
        }

        order.chain = Some(chain_for(&order.domain, &key));
        order.status = OrderStatus::Valid;
        Ok(Self::snapshot(id_of(order_url), order))
    }

    async fn fetch_certificate(&self, order_url: &str, cert_url: &str) -> CaResult<IssuedChain> {
        let mut state = self.state.lock();
        state.certificate_fetches += 1;
        let chain = state
            .orders
            .get(order_url)
            .and_then(|order| order.chain.clone())
            .ok_or_else(|| CaError::NoCertificate(order_url.to_string()))?;
        Ok(IssuedChain {
            der_chain: chain,
            cert_url: cert_url.to_string(),
        })
    }
}

// ============================================================================
// Storage
// ============================================================================

/// Blob store refusing writes under one prefix
#[derive(Debug)]
pub struct FailingBlobs {
    inner: MemoryBlobStore,
    refuse_prefix: String,
    failures_left: Mutex<usize>,
}

impl FailingBlobs {
    pub fn new(refuse_prefix: &str) -> Self {
        Self::failing_times(refuse_prefix, usize::MAX)
    }

    /// Refuse the first `times` matching writes, then recover
    pub fn failing_times(refuse_prefix: &str, times: usize) -> Self {
        Self {
            inner: MemoryBlobStore::new(),
            refuse_prefix: refuse_prefix.to_string(),
            failures_left: Mutex::new(times),
        }
    }
}

#[async_trait]
impl BlobStore for FailingBlobs {
    async fn write_bytes(&self, path: &str, data: &[u8]) -> StoreResult<()> {
        if path.starts_with(&self.refuse_prefix) {
            let mut left = self.failures_left.lock();
            if *left > 0 {
                *left -= 1;
                return Err(StoreError::Backend("disk full".to_string()));
            }
        }
        self.inner.write_bytes(path, data).await
    }

    async fn read_bytes(&self, path: &str) -> StoreResult<Option<Vec<u8>>> {
        self.inner.read_bytes(path).await
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub config: Config,
    pub store: Arc<MemoryDomainStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub lookup: Arc<StaticLookup>,
    pub ca: FakeCa,
    pub issuer: Issuer,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_blobs(Arc::new(MemoryBlobStore::new()))
    }

    pub fn with_blobs(blobs: Arc<dyn BlobStore>) -> Self {
        Self::build(Config::default_for_testing(), blobs)
    }

    pub fn with_config(config: Config) -> Self {
        Self::build(config, Arc::new(MemoryBlobStore::new()))
    }

    fn build(config: Config, blobs: Arc<dyn BlobStore>) -> Self {
        let store = Arc::new(MemoryDomainStore::new());
        let lookup = Arc::new(StaticLookup::new());
        let ca = FakeCa::with_key_store(blobs.clone(), &config.storage.cert_prefix);

        let issuer = Issuer::with_components(
            &config,
            Components {
                store: store.clone(),
                blobs: blobs.clone(),
                lookup: lookup.clone(),
                connector: Arc::new(ca.clone()),
            },
        );

        Self {
            config,
            store,
            blobs,
            lookup,
            ca,
            issuer,
        }
    }

    pub async fn register(&self, domain: &str) -> DomainRecord {
        self.issuer
            .registry()
            .register(&alice(), domain)
            .await
            .unwrap()
    }

    pub async fn record(&self, domain: &str) -> DomainRecord {
        self.store
            .get(&RecordKey::new(alice(), domain))
            .await
            .unwrap()
            .unwrap()
    }

    pub fn admin_email(&self) -> &str {
        self.issuer.admin_email()
    }
}
