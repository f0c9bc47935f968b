use std::path::{Path, PathBuf};
use std::time::Duration;

/// URL the public suffix list is refreshed from.
pub const PUBLIC_SUFFIX_LIST_URL: &str = "https://publicsuffix.org/list/public_suffix_list.dat";

/// String length above which the full Ratcliff/Obershelp comparison is
/// replaced by the prefix+suffix approximation.
pub const SIMPLIFIED_COMPARISON_THRESHOLD: usize = 20_000;

/// Engine configuration.
///
/// Built once by the driver and passed as an immutable reference to every
/// component. All paths derive from a single data root so the on-disk
/// layout (`data/filters`, `data/cache`, `data/db+ref`, ...) stays in one
/// place.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root of the data layout (`data/` by convention).
    pub data_dir: PathBuf,
    /// Directory of `*_filter.txt` lists.
    pub filter_dir: PathBuf,
    /// Directory for persisted caches.
    pub cache_dir: PathBuf,
    /// Cached copy of the public suffix list.
    pub psl_path: PathBuf,
    /// Where the public suffix list is fetched from.
    pub psl_url: String,
    /// Maximum age of the cached public suffix list before a refresh.
    pub psl_max_age: Duration,
    /// Tracker knowledge base (read-only).
    pub tracker_db_path: PathBuf,
    /// Cookie knowledge base (read/write).
    pub cookie_db_path: PathBuf,
    /// Length threshold for the simplified similarity comparison.
    pub simplified_comparison_threshold: usize,
    /// Concurrent site analyses.
    pub workers: usize,
    /// Whether unknown cookies are fetched through the lookup collaborator.
    pub lookup_unknown: bool,
    /// Re-run analyses even when enrichment fields are already present.
    pub force: bool,
}

impl EngineConfig {
    /// Creates a configuration rooted at `data_dir` with the conventional
    /// layout and default knobs.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            filter_dir: data_dir.join("filters"),
            cache_dir: data_dir.join("cache"),
            psl_path: data_dir.join("public_suffix_list.dat"),
            psl_url: PUBLIC_SUFFIX_LIST_URL.to_string(),
            psl_max_age: Duration::from_secs(7 * 24 * 3600),
            tracker_db_path: data_dir.join("db+ref").join("tracker_db.json"),
            cookie_db_path: data_dir.join("db+ref").join("cookie_database.json"),
            simplified_comparison_threshold: SIMPLIFIED_COMPARISON_THRESHOLD,
            workers: default_workers(),
            lookup_unknown: true,
            force: false,
            data_dir,
        }
    }

    pub fn crawler_dir(&self) -> PathBuf {
        self.data_dir.join("crawler_data")
    }

    pub fn a_record_cache_path(&self) -> PathBuf {
        self.cache_dir.join("a_record_cache.bin")
    }

    pub fn cname_chain_cache_path(&self) -> PathBuf {
        self.cache_dir.join("cname_chain_cache.bin")
    }

    pub fn filter_cache_path(&self) -> PathBuf {
        self.cache_dir.join("filter_cache.bin")
    }

    pub fn tracker_cache_path(&self) -> PathBuf {
        self.cache_dir.join("tracker_cache.bin")
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_lookup_unknown(mut self, lookup: bool) -> Self {
        self.lookup_unknown = lookup;
        self
    }

    pub fn with_similarity_threshold(mut self, threshold: usize) -> Self {
        self.simplified_comparison_threshold = threshold;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new(Path::new("data"))
    }
}

/// One worker per core, minus one core left for the rest of the system.
pub fn default_workers() -> usize {
    num_cpus::get().saturating_sub(1).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_derive_from_data_dir() {
        let config = EngineConfig::new("data");
        assert_eq!(config.filter_dir, PathBuf::from("data/filters"));
        assert_eq!(config.psl_path, PathBuf::from("data/public_suffix_list.dat"));
        assert_eq!(config.cookie_db_path, PathBuf::from("data/db+ref/cookie_database.json"));
        assert_eq!(config.a_record_cache_path(), PathBuf::from("data/cache/a_record_cache.bin"));
    }

    #[test]
    fn test_workers_floor() {
        let config = EngineConfig::new("data").with_workers(0);
        assert_eq!(config.workers, 1);
    }
}
