//! DNS TXT source

use crate::errors::Result;
use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::error::ResolveErrorKind;
use hickory_resolver::TokioAsyncResolver;

/// TXT record prefix carrying the bound DID
const DID_PREFIX: &str = "did=";

#[async_trait]
pub trait DnsLookup: Send + Sync {
    /// TXT record values at `name`; empty when the name has none.
    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>>;
}

/// System-resolver-backed lookup
pub struct HickoryDns {
    resolver: TokioAsyncResolver,
}

impl HickoryDns {
    /// Resolver from the system configuration, falling back to defaults
    /// when none is readable.
    pub fn new() -> Self {
        let resolver = TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|_| {
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
        });
        Self { resolver }
    }
}

impl Default for HickoryDns {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DnsLookup for HickoryDns {
    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>> {
        match self.resolver.txt_lookup(name).await {
            Ok(lookup) => Ok(lookup.iter().map(|txt| txt.to_string()).collect()),
            Err(e) if matches!(e.kind(), ResolveErrorKind::NoRecordsFound { .. }) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Extract the DID value from `_atproto.<handle>` TXT records.
///
/// The value may carry a `did=` prefix, stripped before comparison.
pub fn did_from_txt(records: &[String]) -> Option<String> {
    records.iter().find_map(|record| {
        let value = record.trim();
        let value = value.strip_prefix(DID_PREFIX).unwrap_or(value);
        value.starts_with("did:").then(|| value.to_string())
    })
}
