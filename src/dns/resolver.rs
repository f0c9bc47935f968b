//! CNAME-chain and A-record resolution with dual persisted caches.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;

use super::{Resolve, TtlCache};
use crate::base::EngineConfig;

/// A records change often; one hour matches typical authority TTLs.
pub const A_RECORD_TTL_SECS: u64 = 3600;
/// CNAME targets change rarely; cache them for a day.
pub const CNAME_CHAIN_TTL_SECS: u64 = 86_400;
/// Flush the CNAME cache after this many additions to bound loss on
/// abrupt exit.
pub const CNAME_FLUSH_EVERY: usize = 100;

/// DNS resolver with chain following and two independent TTL caches.
///
/// Every miss is resolved at most once across the worker pool: lookups
/// for the same key serialize through a per-key lock and re-check the
/// cache before hitting the network (keyed single-flight).
pub struct DnsResolver {
    inner: Arc<dyn Resolve>,
    a_cache: TtlCache<BTreeSet<String>>,
    cname_cache: TtlCache<Vec<String>>,
    inflight: DashMap<String, Arc<Mutex<()>>>,
    cname_additions: AtomicUsize,
    a_lookups: AtomicUsize,
}

impl DnsResolver {
    /// Build a resolver with caches loaded from the configured paths.
    pub fn new(inner: Arc<dyn Resolve>, config: &EngineConfig) -> Self {
        Self {
            inner,
            a_cache: TtlCache::load(
                config.a_record_cache_path(),
                Duration::from_secs(A_RECORD_TTL_SECS),
            ),
            cname_cache: TtlCache::load(
                config.cname_chain_cache_path(),
                Duration::from_secs(CNAME_CHAIN_TTL_SECS),
            ),
            inflight: DashMap::new(),
            cname_additions: AtomicUsize::new(0),
            a_lookups: AtomicUsize::new(0),
        }
    }

    /// Resolver with in-memory caches (tests).
    pub fn ephemeral(inner: Arc<dyn Resolve>) -> Self {
        Self {
            inner,
            a_cache: TtlCache::ephemeral(Duration::from_secs(A_RECORD_TTL_SECS)),
            cname_cache: TtlCache::ephemeral(Duration::from_secs(CNAME_CHAIN_TTL_SECS)),
            inflight: DashMap::new(),
            cname_additions: AtomicUsize::new(0),
            a_lookups: AtomicUsize::new(0),
        }
    }

    /// Follow the CNAME chain of `host` until a name with no CNAME or a
    /// cycle. Returns the chain excluding `host` itself, in order. Empty
    /// chains are cached like any other answer.
    pub async fn cname_chain(&self, host: &str) -> Vec<String> {
        let key = host.trim().to_ascii_lowercase();
        if let Some(chain) = self.cname_cache.get(&key) {
            return chain;
        }

        let lock = self.lock_for(&key);
        let _guard = lock.lock().await;
        // Another worker may have resolved this while we waited.
        if let Some(chain) = self.cname_cache.get(&key) {
            self.release_lock(&key);
            return chain;
        }

        tracing::debug!(domain = %key, "CNAME chain cache miss, resolving");
        let mut chain = Vec::new();
        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut current = key.clone();
        loop {
            match self.inner.cname(&current).await {
                Some(target) if !seen.contains(&target) => {
                    seen.insert(target.clone());
                    chain.push(target.clone());
                    current = target;
                }
                _ => break,
            }
        }

        self.cname_cache.insert(key.clone(), chain.clone());
        self.release_lock(&key);

        let additions = self.cname_additions.fetch_add(1, Ordering::Relaxed) + 1;
        if additions % CNAME_FLUSH_EVERY == 0 {
            tracing::debug!(additions, "flushing CNAME chain cache");
            self.cname_cache.persist();
        }

        chain
    }

    /// A-record IPs for `host`; empty on any DNS failure. Negative
    /// results are cached to avoid repeated lookups.
    pub async fn a_records(&self, host: &str) -> BTreeSet<String> {
        let key = host.trim().to_ascii_lowercase();
        if let Some(ips) = self.a_cache.get(&key) {
            return ips;
        }

        let lock = self.lock_for(&key);
        let _guard = lock.lock().await;
        if let Some(ips) = self.a_cache.get(&key) {
            self.release_lock(&key);
            return ips;
        }

        tracing::debug!(domain = %key, "A record cache miss, resolving");
        self.a_lookups.fetch_add(1, Ordering::Relaxed);
        let ips = self.inner.a_records(&key).await;
        self.a_cache.insert(key.clone(), ips.clone());
        self.release_lock(&key);
        ips
    }

    /// Number of A-record lookups performed this session.
    pub fn a_lookup_count(&self) -> usize {
        self.a_lookups.load(Ordering::Relaxed)
    }

    /// Persist both caches.
    pub fn persist(&self) {
        self.a_cache.persist();
        self.cname_cache.persist();
        tracing::debug!(
            a_lookups = self.a_lookup_count(),
            "DNS resolver caches persisted"
        );
    }

    fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        self.inflight.entry(key.to_string()).or_default().clone()
    }

    fn release_lock(&self, key: &str) {
        self.inflight.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::StaticResolve;

    #[tokio::test]
    async fn test_chain_follows_cnames_in_order() {
        let inner = StaticResolve::new()
            .with_cname("metrics.shop.example", "collect.trkr.example")
            .with_cname("collect.trkr.example", "edge.trkr.example");
        let resolver = DnsResolver::ephemeral(Arc::new(inner));

        let chain = resolver.cname_chain("metrics.shop.example").await;
        assert_eq!(chain, vec!["collect.trkr.example", "edge.trkr.example"]);
    }

    #[tokio::test]
    async fn test_chain_excludes_input_host() {
        let inner = StaticResolve::new().with_cname("a.example", "b.example");
        let resolver = DnsResolver::ephemeral(Arc::new(inner));
        let chain = resolver.cname_chain("a.example").await;
        assert_eq!(chain, vec!["b.example"]);
    }

    #[tokio::test]
    async fn test_cycle_detection_terminates() {
        let inner = StaticResolve::new()
            .with_cname("a.example", "b.example")
            .with_cname("b.example", "a.example");
        let resolver = DnsResolver::ephemeral(Arc::new(inner));

        let chain = resolver.cname_chain("a.example").await;
        // a -> b -> a stops when "a.example" repeats.
        assert_eq!(chain, vec!["b.example", "a.example"]);
    }

    #[tokio::test]
    async fn test_no_cname_is_empty_chain() {
        let resolver = DnsResolver::ephemeral(Arc::new(StaticResolve::new()));
        assert!(resolver.cname_chain("plain.example").await.is_empty());
    }

    #[tokio::test]
    async fn test_keys_are_lowercased() {
        let inner = StaticResolve::new().with_cname("host.example", "t.example");
        let resolver = DnsResolver::ephemeral(Arc::new(inner));
        let first = resolver.cname_chain("HOST.Example").await;
        let second = resolver.cname_chain("host.example").await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_a_records_negative_cached() {
        let resolver = DnsResolver::ephemeral(Arc::new(StaticResolve::new()));
        assert!(resolver.a_records("dead.example").await.is_empty());
        assert_eq!(resolver.a_lookup_count(), 1);
        // Second query is served from the negative cache.
        assert!(resolver.a_records("dead.example").await.is_empty());
        assert_eq!(resolver.a_lookup_count(), 1);
    }
}
