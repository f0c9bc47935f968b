//! Tracker Categorizer
//!
//! Maps a host to the categories and organizations a tracker knowledge
//! base knows it under. The knowledge base is a local, read-only JSON
//! file keyed by domain; a host matches every entry whose domain is a
//! suffix of it, so `gum.criteo.com` inherits what is known about
//! `criteo.com`.
//!
//! Results — including "nothing known" — are memoized in a cache that is
//! persisted across runs, the same discipline the DNS caches follow.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::base::EngineConfig;
use crate::psl::normalize_host;

/// Categories that imply tracking by nature.
pub const TRACKING_CATEGORIES: [&str; 3] = ["Advertising", "Analytics", "Social Network"];

/// What the knowledge base knows about a host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerInfo {
    pub categories: BTreeSet<String>,
    pub organizations: BTreeSet<String>,
}

impl TrackerInfo {
    /// Whether any category implies tracking.
    pub fn has_tracking_category(&self) -> bool {
        self.categories.iter().any(|c| TRACKING_CATEGORIES.contains(&c.as_str()))
    }

    pub fn tracking_categories(&self) -> Vec<&str> {
        self.categories
            .iter()
            .map(String::as_str)
            .filter(|c| TRACKING_CATEGORIES.contains(c))
            .collect()
    }

    /// Whether the two hosts share at least one organization.
    pub fn shares_organization(&self, other: &TrackerInfo) -> bool {
        self.organizations.iter().any(|org| other.organizations.contains(org))
    }
}

/// Boundary contract for the categorizer, so the knowledge base behind it
/// (embedded file, external service) can change without touching the
/// analyzers.
pub trait TrackerCategorizer: Send + Sync {
    /// Categories and organizations for `host`, or `None` when the
    /// knowledge base has nothing (including on lookup errors).
    fn categorize(&self, host: &str) -> Option<TrackerInfo>;

    /// Persist the memo cache.
    fn persist(&self);
}

#[derive(Debug, Deserialize)]
struct DbFile {
    #[serde(default)]
    domains: HashMap<String, TrackerInfo>,
}

/// Embedded tracker knowledge base with a persisted memo cache.
pub struct TrackerDb {
    domains: HashMap<String, TrackerInfo>,
    cache: DashMap<String, Option<TrackerInfo>>,
    cache_path: PathBuf,
}

impl TrackerDb {
    /// Load the knowledge base. A missing file is not fatal — the engine
    /// then simply has no category evidence — but it is loudly logged.
    pub fn load(config: &EngineConfig) -> Self {
        let domains = match std::fs::read_to_string(&config.tracker_db_path) {
            Ok(text) => match serde_json::from_str::<DbFile>(&text) {
                Ok(db) => {
                    tracing::info!(
                        path = %config.tracker_db_path.display(),
                        domains = db.domains.len(),
                        "loaded tracker knowledge base"
                    );
                    db.domains
                }
                Err(e) => {
                    tracing::warn!(
                        path = %config.tracker_db_path.display(),
                        error = %e,
                        "malformed tracker knowledge base, continuing without category evidence"
                    );
                    HashMap::new()
                }
            },
            Err(e) => {
                tracing::warn!(
                    path = %config.tracker_db_path.display(),
                    error = %e,
                    "tracker knowledge base unavailable, continuing without category evidence"
                );
                HashMap::new()
            }
        };

        Self {
            domains: domains
                .into_iter()
                .map(|(domain, info)| (domain.to_ascii_lowercase(), info))
                .collect(),
            cache: load_cache(&config.tracker_cache_path()),
            cache_path: config.tracker_cache_path(),
        }
    }

    /// Knowledge base from explicit entries (tests).
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, TrackerInfo)>,
    {
        Self {
            domains: entries
                .into_iter()
                .map(|(domain, info)| (domain.to_ascii_lowercase(), info))
                .collect(),
            cache: DashMap::new(),
            cache_path: PathBuf::new(),
        }
    }

    pub fn domain_count(&self) -> usize {
        self.domains.len()
    }

    fn categorize_uncached(&self, host: &str) -> Option<TrackerInfo> {
        let mut merged = TrackerInfo::default();
        let mut found = false;

        // Walk the subdomain chain so a host matches every suffix entry.
        let mut rest = host;
        loop {
            if let Some(info) = self.domains.get(rest) {
                merged.categories.extend(info.categories.iter().cloned());
                merged.organizations.extend(info.organizations.iter().cloned());
                found = true;
            }
            match rest.split_once('.') {
                Some((_, tail)) if !tail.is_empty() => rest = tail,
                _ => break,
            }
        }

        found.then_some(merged)
    }
}

impl TrackerCategorizer for TrackerDb {
    fn categorize(&self, host: &str) -> Option<TrackerInfo> {
        let key = normalize_host(host);
        if key.is_empty() {
            return None;
        }
        if let Some(cached) = self.cache.get(&key) {
            return cached.clone();
        }
        let result = self.categorize_uncached(&key);
        self.cache.insert(key, result.clone());
        result
    }

    fn persist(&self) {
        if self.cache_path.as_os_str().is_empty() {
            return;
        }
        let snapshot: Vec<(String, Option<TrackerInfo>)> =
            self.cache.iter().map(|kv| (kv.key().clone(), kv.value().clone())).collect();
        let bytes = match bincode::serialize(&snapshot) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "tracker cache serialize failed");
                return;
            }
        };
        if let Some(parent) = self.cache_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let tmp = self.cache_path.with_extension("bin.tmp");
        if let Err(e) =
            std::fs::write(&tmp, &bytes).and_then(|_| std::fs::rename(&tmp, &self.cache_path))
        {
            tracing::warn!(path = %self.cache_path.display(), error = %e, "tracker cache save failed");
        }
    }
}

fn load_cache(path: &Path) -> DashMap<String, Option<TrackerInfo>> {
    let cache = DashMap::new();
    match std::fs::read(path) {
        Ok(bytes) => match bincode::deserialize::<Vec<(String, Option<TrackerInfo>)>>(&bytes) {
            Ok(stored) => {
                for (key, value) in stored {
                    cache.insert(key, value);
                }
                tracing::debug!(path = %path.display(), entries = cache.len(), "loaded tracker cache");
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "corrupt tracker cache, starting empty");
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "could not read tracker cache");
        }
    }
    cache
}

#[cfg(test)]
pub(crate) fn info(categories: &[&str], organizations: &[&str]) -> TrackerInfo {
    TrackerInfo {
        categories: categories.iter().map(|s| s.to_string()).collect(),
        organizations: organizations.iter().map(|s| s.to_string()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> TrackerDb {
        TrackerDb::from_entries([
            ("criteo.com".to_string(), info(&["Advertising"], &["Criteo"])),
            ("cdn.example.net".to_string(), info(&["CDN"], &["EdgeCo"])),
        ])
    }

    #[test]
    fn test_exact_domain_hit() {
        let result = db().categorize("criteo.com").unwrap();
        assert!(result.categories.contains("Advertising"));
        assert!(result.organizations.contains("Criteo"));
    }

    #[test]
    fn test_subdomain_inherits_suffix_entry() {
        let result = db().categorize("gum.criteo.com").unwrap();
        assert!(result.categories.contains("Advertising"));
    }

    #[test]
    fn test_unknown_host_is_none() {
        assert!(db().categorize("example.org").is_none());
    }

    #[test]
    fn test_negative_result_memoized() {
        let db = db();
        assert!(db.categorize("example.org").is_none());
        assert!(db.cache.contains_key("example.org"));
    }

    #[test]
    fn test_tracking_category_detection() {
        let ad = info(&["Advertising"], &[]);
        let cdn = info(&["CDN"], &[]);
        assert!(ad.has_tracking_category());
        assert!(!cdn.has_tracking_category());
    }

    #[test]
    fn test_organization_overlap() {
        let a = info(&[], &["Acme", "Other"]);
        let b = info(&[], &["Acme"]);
        let c = info(&[], &["Unrelated"]);
        assert!(a.shares_organization(&b));
        assert!(!a.shares_organization(&c));
    }

    #[test]
    fn test_url_input_tolerated() {
        assert!(db().categorize("https://gum.criteo.com/pixel").is_some());
    }
}
