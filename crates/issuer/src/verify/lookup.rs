//! DNS resolution used by the verification engine

use async_trait::async_trait;
use std::fmt::Debug;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use hickory_resolver::config::{NameServerConfig, ResolverConfig, ResolverOpts};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::proto::rr::{RData, RecordType};
use hickory_resolver::proto::xfer::Protocol;
use hickory_resolver::{ResolveError, Resolver, TokioResolver};
use thiserror::Error;
use tracing::{debug, trace};

/// Result type for DNS lookups
pub type LookupResult<T> = Result<T, LookupError>;

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("lookup of '{name}' failed: {message}")]
    Resolver { name: String, message: String },
}

/// DNS queries the verification engine needs.
///
/// A name that does not exist, or exists without records of the queried
/// type, yields an empty answer rather than an error.
#[async_trait]
pub trait DnsLookup: Send + Sync + Debug {
    /// TXT records at `name`; multi-string records are joined
    async fn txt(&self, name: &str) -> LookupResult<Vec<String>>;

    /// IPv4 addresses `name` resolves to
    async fn ipv4(&self, name: &str) -> LookupResult<Vec<Ipv4Addr>>;

    /// CNAME target of `name`, as returned by the resolver (fully qualified)
    async fn cname(&self, name: &str) -> LookupResult<Option<String>>;
}

/// [`DnsLookup`] over hickory's tokio resolver.
///
/// Caching is disabled: verification is re-run by users right after they
/// change records, and a cached negative answer would hide the change.
#[derive(Debug)]
pub struct HickoryLookup {
    resolver: TokioResolver,
}

impl HickoryLookup {
    /// Resolver querying `nameservers`, or hickory's default upstreams when empty
    pub fn new(nameservers: &[IpAddr]) -> Self {
        let resolver_config = if nameservers.is_empty() {
            ResolverConfig::default()
        } else {
            let mut resolver_config = ResolverConfig::new();
            for ip in nameservers {
                resolver_config.add_name_server(NameServerConfig::new(
                    SocketAddr::new(*ip, 53),
                    Protocol::Udp,
                ));
            }
            resolver_config
        };

        let mut opts = ResolverOpts::default();
        opts.timeout = Duration::from_secs(5);
        opts.attempts = 3;
        opts.cache_size = 0;

        let resolver =
            Resolver::builder_with_config(resolver_config, TokioConnectionProvider::default())
                .with_options(opts)
                .build();

        Self { resolver }
    }
}

/// NXDOMAIN and NOERROR-without-answers are negative answers, not failures
fn is_negative_answer(e: &ResolveError) -> bool {
    e.is_nx_domain() || e.is_no_records_found()
}

fn resolver_error(name: &str, e: ResolveError) -> LookupError {
    LookupError::Resolver {
        name: name.to_string(),
        message: e.to_string(),
    }
}

#[async_trait]
impl DnsLookup for HickoryLookup {
    async fn txt(&self, name: &str) -> LookupResult<Vec<String>> {
        match self.resolver.txt_lookup(name).await {
            Ok(records) => {
                let values: Vec<String> = records
                    .iter()
                    .map(|record| {
                        record
                            .txt_data()
                            .iter()
                            .map(|data| String::from_utf8_lossy(data))
                            .collect()
                    })
                    .collect();
                trace!(name = %name, count = values.len(), "TXT lookup");
                Ok(values)
            }
            Err(e) if is_negative_answer(&e) => {
                debug!(name = %name, "No TXT records");
                Ok(Vec::new())
            }
            Err(e) => Err(resolver_error(name, e)),
        }
    }

    async fn ipv4(&self, name: &str) -> LookupResult<Vec<Ipv4Addr>> {
        match self.resolver.ipv4_lookup(name).await {
            Ok(records) => Ok(records.iter().map(|a| a.0).collect()),
            Err(e) if is_negative_answer(&e) => {
                debug!(name = %name, "No A records");
                Ok(Vec::new())
            }
            Err(e) => Err(resolver_error(name, e)),
        }
    }

    async fn cname(&self, name: &str) -> LookupResult<Option<String>> {
        match self.resolver.lookup(name, RecordType::CNAME).await {
            Ok(lookup) => Ok(lookup.iter().find_map(|rdata| match rdata {
                RData::CNAME(cname) => Some(cname.0.to_string()),
                _ => None,
            })),
            Err(e) if is_negative_answer(&e) => {
                debug!(name = %name, "No CNAME record");
                Ok(None)
            }
            Err(e) => Err(resolver_error(name, e)),
        }
    }
}
