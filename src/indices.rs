//! The shared, read-mostly reference indices.
//!
//! Built once at startup, shared across all concurrent site analyses.
//! Component caches inside are individually thread-safe; the bundle
//! itself is immutable after construction.

use std::sync::Arc;

use crate::base::{EngineConfig, EngineError};
use crate::cookiedb::CookieKnowledgeBase;
use crate::dns::{DnsResolver, HickoryResolve, Resolve};
use crate::filters::FilterIndex;
use crate::psl::PublicSuffixIndex;
use crate::trackerdb::{TrackerCategorizer, TrackerDb};

pub struct Indices {
    pub psl: PublicSuffixIndex,
    pub filters: FilterIndex,
    pub trackers: Box<dyn TrackerCategorizer>,
    pub cookies: CookieKnowledgeBase,
    pub dns: DnsResolver,
}

impl Indices {
    /// Load every index. Missing filter lists or an unavailable public
    /// suffix list are fatal; the tracker and cookie knowledge bases
    /// degrade to empty.
    pub async fn load(config: &EngineConfig) -> Result<Self, EngineError> {
        let psl = PublicSuffixIndex::load(config).await?;
        let filters = FilterIndex::load(config)?;
        tracing::info!(
            lists = filters.list_count(),
            rules = filters.rule_count(),
            suffixes = psl.len(),
            "reference indices loaded"
        );
        Ok(Self {
            psl,
            filters,
            trackers: Box::new(TrackerDb::load(config)),
            cookies: CookieKnowledgeBase::load(config),
            dns: DnsResolver::new(Arc::new(HickoryResolve::new()), config),
        })
    }

    /// Assemble indices from explicit parts (tests and embedders).
    pub fn from_parts(
        psl: PublicSuffixIndex,
        filters: FilterIndex,
        trackers: Box<dyn TrackerCategorizer>,
        cookies: CookieKnowledgeBase,
        resolver: Arc<dyn Resolve>,
    ) -> Self {
        Self { psl, filters, trackers, cookies, dns: DnsResolver::ephemeral(resolver) }
    }

    /// Persist every cache that survives across runs.
    pub fn persist(&self) {
        self.dns.persist();
        self.filters.persist();
        self.trackers.persist();
        self.cookies.save();
    }
}
