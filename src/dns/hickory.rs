//! Async DNS lookups via hickory-dns.
//!
//! The underlying resolver is lazily initialized on first use and shared
//! across all instances. It reads the system DNS configuration when
//! available and falls back to defaults otherwise. No retries: upstream
//! caching makes a failed name a one-time cost per TTL window.

use super::{Resolve, Resolving};
use hickory_resolver::{
    config::ResolverConfig,
    name_server::TokioConnectionProvider,
    proto::rr::{RData, RecordType},
    TokioResolver,
};
use std::collections::BTreeSet;
use std::sync::LazyLock;

/// Production resolver backed by hickory-dns.
#[derive(Debug, Clone)]
pub struct HickoryResolve {
    resolver: &'static LazyLock<TokioResolver>,
}

impl HickoryResolve {
    pub fn new() -> Self {
        static RESOLVER: LazyLock<TokioResolver> = LazyLock::new(|| {
            let builder = match TokioResolver::builder_tokio() {
                Ok(builder) => {
                    tracing::debug!("using system DNS configuration");
                    builder
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to read system DNS config, using defaults");
                    TokioResolver::builder_with_config(
                        ResolverConfig::default(),
                        TokioConnectionProvider::default(),
                    )
                }
            };
            builder.build()
        });

        Self { resolver: &RESOLVER }
    }
}

impl Default for HickoryResolve {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolve for HickoryResolve {
    fn cname(&self, host: &str) -> Resolving<Option<String>> {
        let resolver = self.clone();
        let host = host.to_string();
        Box::pin(async move {
            match resolver.resolver.lookup(host.as_str(), RecordType::CNAME).await {
                Ok(lookup) => lookup.iter().find_map(|rdata| match rdata {
                    RData::CNAME(target) => {
                        Some(target.0.to_utf8().trim_end_matches('.').to_string())
                    }
                    _ => None,
                }),
                Err(e) => {
                    tracing::debug!(domain = %host, error = %e, "CNAME lookup failed");
                    None
                }
            }
        })
    }

    fn a_records(&self, host: &str) -> Resolving<BTreeSet<String>> {
        let resolver = self.clone();
        let host = host.to_string();
        Box::pin(async move {
            match resolver.resolver.lookup(host.as_str(), RecordType::A).await {
                Ok(lookup) => lookup
                    .iter()
                    .filter_map(|rdata| match rdata {
                        RData::A(addr) => Some(addr.0.to_string()),
                        _ => None,
                    })
                    .collect(),
                Err(e) => {
                    tracing::debug!(domain = %host, error = %e, "A record lookup failed");
                    BTreeSet::new()
                }
            }
        })
    }
}
