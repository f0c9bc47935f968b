//! Core DNS resolution trait.
//!
//! A resolver answers exactly two questions: "what is the CNAME target of
//! this name, if any" and "what A records does this name have". Chain
//! following, caching, and negative-result handling live above this trait
//! in [`super::DnsResolver`], so implementations stay trivial and tests
//! can substitute a static map.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Alias for the boxed future a resolver returns.
pub type Resolving<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Trait for raw DNS lookups. Implementations must be thread-safe.
///
/// Both operations are infallible by contract: any DNS problem (NXDOMAIN,
/// NOANSWER, timeout, transport error) is reported as `None` / empty set.
pub trait Resolve: Send + Sync {
    /// One CNAME step for `host`, or `None` when the name has no CNAME
    /// or the lookup failed.
    fn cname(&self, host: &str) -> Resolving<Option<String>>;

    /// A-record IPs for `host`; empty on NXDOMAIN, NOANSWER, or error.
    fn a_records(&self, host: &str) -> Resolving<BTreeSet<String>>;
}

impl<R: Resolve + ?Sized> Resolve for Arc<R> {
    fn cname(&self, host: &str) -> Resolving<Option<String>> {
        (**self).cname(host)
    }

    fn a_records(&self, host: &str) -> Resolving<BTreeSet<String>> {
        (**self).a_records(host)
    }
}

/// Static resolver backed by in-memory maps. Used by tests and by the
/// warm-cache determinism checks; names missing from the maps behave like
/// NXDOMAIN.
#[derive(Debug, Default, Clone)]
pub struct StaticResolve {
    cnames: HashMap<String, String>,
    addresses: HashMap<String, BTreeSet<String>>,
}

impl StaticResolve {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cname(mut self, host: &str, target: &str) -> Self {
        self.cnames.insert(host.to_ascii_lowercase(), target.to_string());
        self
    }

    pub fn with_a_record(mut self, host: &str, ip: &str) -> Self {
        self.addresses
            .entry(host.to_ascii_lowercase())
            .or_default()
            .insert(ip.to_string());
        self
    }
}

impl Resolve for StaticResolve {
    fn cname(&self, host: &str) -> Resolving<Option<String>> {
        let result = self.cnames.get(&host.to_ascii_lowercase()).cloned();
        Box::pin(std::future::ready(result))
    }

    fn a_records(&self, host: &str) -> Resolving<BTreeSet<String>> {
        let result = self.addresses.get(&host.to_ascii_lowercase()).cloned().unwrap_or_default();
        Box::pin(std::future::ready(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_resolver_cname_hit() {
        let resolver = StaticResolve::new().with_cname("tracked.example.com", "cdn.trkr.example");
        let target = resolver.cname("tracked.example.com").await;
        assert_eq!(target.as_deref(), Some("cdn.trkr.example"));
    }

    #[tokio::test]
    async fn test_static_resolver_miss_is_none() {
        let resolver = StaticResolve::new();
        assert_eq!(resolver.cname("nothing.example").await, None);
        assert!(resolver.a_records("nothing.example").await.is_empty());
    }

    #[tokio::test]
    async fn test_static_resolver_case_insensitive() {
        let resolver = StaticResolve::new().with_a_record("Example.COM", "93.184.216.34");
        let ips = resolver.a_records("example.com").await;
        assert_eq!(ips.len(), 1);
    }
}
