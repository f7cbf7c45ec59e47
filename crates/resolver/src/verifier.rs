//! Three-source handle verification
//!
//! No single authority, including the directory service itself, is trusted
//! alone: directory-only resolution can be stale or manipulated. A binding
//! is accepted only when two of the three independent sources agree, which
//! bounds the impact of one compromised or lagging source.

use crate::directory::Directory;
use crate::dns::{did_from_txt, DnsLookup};
use crate::errors::ResolverError;
use crate::limiter::CallLimiter;
use crate::retry::with_retries;
use crate::wellknown::WellKnown;
use atgraph_types::{Did, Handle};
use std::sync::Arc;
use tracing::{debug, warn};

/// Verification verdict for one binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Valid,
    Invalid,
}

/// Raw DID values observed from the three sources
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceValues {
    pub dns: Option<String>,
    pub well_known: Option<String>,
    pub directory: Option<String>,
}

impl SourceValues {
    fn any_web(&self) -> bool {
        [&self.dns, &self.well_known, &self.directory]
            .into_iter()
            .flatten()
            .any(|value| Did::new(value.as_str()).is_web())
    }
}

/// Tuning knobs for the verifier
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    /// Retry bound for DNS and directory lookups
    pub max_attempts: u32,
    /// Retry bound for the well-known endpoint
    pub well_known_attempts: u32,
    /// Handles under this suffix consult only the well-known and directory
    /// sources; DNS is not authoritative for the platform's own namespace
    pub platform_suffix: String,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            well_known_attempts: 5,
            platform_suffix: ".bsky.social".to_string(),
        }
    }
}

/// Cross-validates handle→DID bindings
pub struct HandleVerifier {
    dns: Arc<dyn DnsLookup>,
    well_known: Arc<dyn WellKnown>,
    directory: Arc<dyn Directory>,
    limiter: Arc<CallLimiter>,
    config: VerifierConfig,
}

impl HandleVerifier {
    pub fn new(
        dns: Arc<dyn DnsLookup>,
        well_known: Arc<dyn WellKnown>,
        directory: Arc<dyn Directory>,
        limiter: Arc<CallLimiter>,
        config: VerifierConfig,
    ) -> Self {
        Self {
            dns,
            well_known,
            directory,
            limiter,
            config,
        }
    }

    /// Cross-validate the binding between `handle` and `did`.
    ///
    /// Fewer than two agreeing sources fail closed to [`Verdict::Invalid`],
    /// with all three raw values logged for audit.
    pub async fn verify(&self, did: &Did, handle: &Handle) -> Verdict {
        let use_dns = !handle.under_suffix(&self.config.platform_suffix);
        let (dns, well_known, directory) = tokio::join!(
            self.dns_value(handle, use_dns),
            self.well_known_value(handle),
            self.directory_value(handle),
        );
        let sources = SourceValues {
            dns,
            well_known,
            directory,
        };

        if let Some(agreed) = agreed_primary(&sources) {
            if agreed != did.as_str() {
                warn!(
                    %did,
                    %handle,
                    dns = ?sources.dns,
                    well_known = ?sources.well_known,
                    directory = ?sources.directory,
                    "sources agree on a DID other than the declared one"
                );
            }
            return Verdict::Valid;
        }

        if sources.any_web() {
            let from_well_known = self.canonical_handle(sources.well_known.as_deref()).await;
            let from_directory = self.canonical_handle(sources.directory.as_deref()).await;
            if handles_agree(handle, from_well_known.as_ref(), from_directory.as_ref()) {
                return Verdict::Valid;
            }
        }

        // Fail closed; keep the raw values around for manual audit.
        warn!(
            %did,
            %handle,
            dns = ?sources.dns,
            well_known = ?sources.well_known,
            directory = ?sources.directory,
            "handle verification dispute"
        );
        Verdict::Invalid
    }

    async fn dns_value(&self, handle: &Handle, enabled: bool) -> Option<String> {
        if !enabled {
            return None;
        }
        let name = format!("_atproto.{}", handle.as_str());
        let result = with_retries("dns_txt", self.config.max_attempts, || {
            let name = name.clone();
            async move {
                self.limiter.acquire().await;
                self.dns.lookup_txt(&name).await
            }
        })
        .await;
        match result {
            Ok(records) => did_from_txt(&records),
            Err(e) => {
                debug!(%handle, error = %e, "dns source degraded to no result");
                None
            }
        }
    }

    async fn well_known_value(&self, handle: &Handle) -> Option<String> {
        let result = with_retries("well_known", self.config.well_known_attempts, || async move {
            self.limiter.acquire().await;
            self.well_known.bound_did(handle).await
        })
        .await;
        match result {
            Ok(did) => Some(did),
            Err(ResolverError::NoBinding) => {
                debug!(%handle, "well-known endpoint reports no binding");
                None
            }
            Err(e) => {
                debug!(%handle, error = %e, "well-known source degraded to no result");
                None
            }
        }
    }

    async fn directory_value(&self, handle: &Handle) -> Option<String> {
        let result = with_retries("resolve_handle", self.config.max_attempts, || async move {
            self.limiter.acquire().await;
            self.directory.resolve_handle(handle).await
        })
        .await;
        match result {
            Ok(value) => value,
            Err(e) => {
                debug!(%handle, error = %e, "directory source degraded to no result");
                None
            }
        }
    }

    /// Resolve an observed value back to its canonical handle when it is
    /// of the indirect key form.
    async fn canonical_handle(&self, value: Option<&str>) -> Option<Handle> {
        let did = Did::new(value?);
        if !did.is_web() {
            return None;
        }
        let result = with_retries("resolve_did", self.config.max_attempts, || {
            let did = did.clone();
            async move {
                self.limiter.acquire().await;
                self.directory.resolve_did(&did).await
            }
        })
        .await;
        match result {
            Ok(handle) => handle,
            Err(e) => {
                debug!(%did, error = %e, "document resolution degraded to no result");
                None
            }
        }
    }
}

fn is_primary(value: &str) -> bool {
    Did::new(value).is_plc()
}

/// Two sources agreeing on a primary-form key validate the binding.
fn agreed_primary(sources: &SourceValues) -> Option<&str> {
    let values = [
        sources.dns.as_deref(),
        sources.well_known.as_deref(),
        sources.directory.as_deref(),
    ];
    for i in 0..values.len() {
        for j in (i + 1)..values.len() {
            if let (Some(a), Some(b)) = (values[i], values[j]) {
                if a == b && is_primary(a) {
                    return Some(a);
                }
            }
        }
    }
    None
}

/// Indirect-form decision table over source availability and equality:
/// any two of {declared handle, handle resolved from the well-known value,
/// handle resolved from the directory value} must agree.
fn handles_agree(
    declared: &Handle,
    from_well_known: Option<&Handle>,
    from_directory: Option<&Handle>,
) -> bool {
    match (from_well_known, from_directory) {
        (Some(w), Some(d)) => w == declared || d == declared || w == d,
        (Some(w), None) => w == declared,
        (None, Some(d)) => d == declared,
        (None, None) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ResolverError, Result};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct StaticDns(Vec<String>);

    #[async_trait]
    impl DnsLookup for StaticDns {
        async fn lookup_txt(&self, _name: &str) -> Result<Vec<String>> {
            Ok(self.0.clone())
        }
    }

    /// Fails the test if the DNS source is consulted at all.
    struct ForbiddenDns;

    #[async_trait]
    impl DnsLookup for ForbiddenDns {
        async fn lookup_txt(&self, name: &str) -> Result<Vec<String>> {
            panic!("dns consulted for {name}");
        }
    }

    struct StaticWellKnown {
        did: Option<String>,
        calls: AtomicU32,
    }

    impl StaticWellKnown {
        fn bound(did: &str) -> Self {
            Self {
                did: Some(did.to_string()),
                calls: AtomicU32::new(0),
            }
        }

        fn unbound() -> Self {
            Self {
                did: None,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl WellKnown for StaticWellKnown {
        async fn bound_did(&self, _handle: &Handle) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.did.clone().ok_or(ResolverError::NoBinding)
        }
    }

    #[derive(Default)]
    struct StaticDirectory {
        resolves_to: Option<String>,
        documents: HashMap<String, Handle>,
    }

    #[async_trait]
    impl Directory for StaticDirectory {
        async fn export(&self, _after: Option<&str>, _count: usize) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn resolve_handle(&self, _handle: &Handle) -> Result<Option<String>> {
            Ok(self.resolves_to.clone())
        }

        async fn resolve_did(&self, did: &Did) -> Result<Option<Handle>> {
            Ok(self.documents.get(did.as_str()).cloned())
        }
    }

    fn verifier(
        dns: impl DnsLookup + 'static,
        well_known: Arc<StaticWellKnown>,
        directory: StaticDirectory,
    ) -> HandleVerifier {
        HandleVerifier::new(
            Arc::new(dns),
            well_known,
            Arc::new(directory),
            Arc::new(CallLimiter::new(10_000, 10_000)),
            VerifierConfig {
                max_attempts: 1,
                well_known_attempts: 5,
                ..VerifierConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn two_primary_sources_agreeing_is_valid() {
        let v = verifier(
            StaticDns(vec!["did=did:plc:abc".to_string()]),
            Arc::new(StaticWellKnown::bound("did:plc:abc")),
            StaticDirectory::default(),
        );
        let verdict = v
            .verify(&Did::new("did:plc:abc"), &Handle::new("alice.example.com"))
            .await;
        assert_eq!(verdict, Verdict::Valid);
    }

    #[tokio::test]
    async fn one_source_alone_is_invalid() {
        let v = verifier(
            StaticDns(vec![]),
            Arc::new(StaticWellKnown::bound("did:plc:abc")),
            StaticDirectory::default(),
        );
        let verdict = v
            .verify(&Did::new("did:plc:abc"), &Handle::new("alice.example.com"))
            .await;
        assert_eq!(verdict, Verdict::Invalid);
    }

    #[tokio::test]
    async fn disagreeing_sources_are_invalid() {
        let v = verifier(
            StaticDns(vec!["did=did:plc:abc".to_string()]),
            Arc::new(StaticWellKnown::bound("did:plc:other")),
            StaticDirectory {
                resolves_to: Some("did:plc:third".to_string()),
                ..StaticDirectory::default()
            },
        );
        let verdict = v
            .verify(&Did::new("did:plc:abc"), &Handle::new("alice.example.com"))
            .await;
        assert_eq!(verdict, Verdict::Invalid);
    }

    #[tokio::test]
    async fn no_sources_is_invalid() {
        let v = verifier(
            StaticDns(vec![]),
            Arc::new(StaticWellKnown::unbound()),
            StaticDirectory::default(),
        );
        let verdict = v
            .verify(&Did::new("did:plc:abc"), &Handle::new("alice.example.com"))
            .await;
        assert_eq!(verdict, Verdict::Invalid);
    }

    #[tokio::test]
    async fn platform_suffix_skips_dns() {
        let v = verifier(
            ForbiddenDns,
            Arc::new(StaticWellKnown::bound("did:plc:abc")),
            StaticDirectory {
                resolves_to: Some("did:plc:abc".to_string()),
                ..StaticDirectory::default()
            },
        );
        let verdict = v
            .verify(&Did::new("did:plc:abc"), &Handle::new("alice.bsky.social"))
            .await;
        assert_eq!(verdict, Verdict::Valid);
    }

    #[tokio::test]
    async fn definitive_no_binding_is_queried_once() {
        let well_known = Arc::new(StaticWellKnown::unbound());
        let v = verifier(StaticDns(vec![]), well_known.clone(), StaticDirectory::default());
        let verdict = v
            .verify(&Did::new("did:plc:abc"), &Handle::new("alice.example.com"))
            .await;
        assert_eq!(verdict, Verdict::Invalid);
        assert_eq!(well_known.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn web_form_resolving_back_to_declared_handle_is_valid() {
        let mut documents = HashMap::new();
        documents.insert(
            "did:web:alice.example.com".to_string(),
            Handle::new("alice.example.com"),
        );
        let v = verifier(
            StaticDns(vec![]),
            Arc::new(StaticWellKnown::bound("did:web:alice.example.com")),
            StaticDirectory {
                resolves_to: None,
                documents,
            },
        );
        let verdict = v
            .verify(
                &Did::new("did:web:alice.example.com"),
                &Handle::new("alice.example.com"),
            )
            .await;
        assert_eq!(verdict, Verdict::Valid);
    }

    #[tokio::test]
    async fn multiply_populated_web_values_agreeing_with_each_other_is_valid() {
        // Both indirect values resolve to the same canonical handle, which
        // differs from the declared one; the 2-of-3 rule still accepts it.
        let mut documents = HashMap::new();
        documents.insert("did:web:a.example.com".to_string(), Handle::new("canonical.example.com"));
        documents.insert("did:web:b.example.com".to_string(), Handle::new("canonical.example.com"));
        let v = verifier(
            StaticDns(vec![]),
            Arc::new(StaticWellKnown::bound("did:web:a.example.com")),
            StaticDirectory {
                resolves_to: Some("did:web:b.example.com".to_string()),
                documents,
            },
        );
        let verdict = v
            .verify(
                &Did::new("did:web:a.example.com"),
                &Handle::new("alice.example.com"),
            )
            .await;
        assert_eq!(verdict, Verdict::Valid);
    }

    #[tokio::test]
    async fn multiply_populated_web_values_disagreeing_is_invalid() {
        let mut documents = HashMap::new();
        documents.insert("did:web:a.example.com".to_string(), Handle::new("one.example.com"));
        documents.insert("did:web:b.example.com".to_string(), Handle::new("two.example.com"));
        let v = verifier(
            StaticDns(vec![]),
            Arc::new(StaticWellKnown::bound("did:web:a.example.com")),
            StaticDirectory {
                resolves_to: Some("did:web:b.example.com".to_string()),
                documents,
            },
        );
        let verdict = v
            .verify(
                &Did::new("did:web:a.example.com"),
                &Handle::new("alice.example.com"),
            )
            .await;
        assert_eq!(verdict, Verdict::Invalid);
    }

    #[tokio::test]
    async fn unresolvable_web_value_is_invalid() {
        let v = verifier(
            StaticDns(vec![]),
            Arc::new(StaticWellKnown::bound("did:web:a.example.com")),
            StaticDirectory::default(),
        );
        let verdict = v
            .verify(
                &Did::new("did:web:a.example.com"),
                &Handle::new("alice.example.com"),
            )
            .await;
        assert_eq!(verdict, Verdict::Invalid);
    }

    #[test]
    fn decision_table_primary_agreement() {
        let agree = SourceValues {
            dns: Some("did:plc:abc".to_string()),
            well_known: None,
            directory: Some("did:plc:abc".to_string()),
        };
        assert_eq!(agreed_primary(&agree), Some("did:plc:abc"));

        // Agreement on an indirect form never satisfies the primary rule.
        let web = SourceValues {
            dns: Some("did:web:x.example.com".to_string()),
            well_known: Some("did:web:x.example.com".to_string()),
            directory: None,
        };
        assert_eq!(agreed_primary(&web), None);

        let lone = SourceValues {
            dns: None,
            well_known: Some("did:plc:abc".to_string()),
            directory: None,
        };
        assert_eq!(agreed_primary(&lone), None);
    }

    #[test]
    fn decision_table_handle_agreement() {
        let declared = Handle::new("alice.example.com");
        let same = Handle::new("alice.example.com");
        let other = Handle::new("bob.example.com");
        let third = Handle::new("carol.example.com");

        assert!(handles_agree(&declared, Some(&same), None));
        assert!(handles_agree(&declared, None, Some(&same)));
        assert!(handles_agree(&declared, Some(&other), Some(&other)));
        assert!(handles_agree(&declared, Some(&same), Some(&other)));
        assert!(!handles_agree(&declared, Some(&other), Some(&third)));
        assert!(!handles_agree(&declared, Some(&other), None));
        assert!(!handles_agree(&declared, None, None));
    }
}
