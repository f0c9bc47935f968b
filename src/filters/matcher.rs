//! Host matching against the loaded filter lists, with a persisted memo
//! cache.

use std::path::{Path, PathBuf};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::{list_name_from_file, FilterList};
use crate::base::{EngineConfig, EngineError};
use crate::psl::normalize_host;

/// A positive match: which list, and which rule within it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterMatch {
    pub list: String,
    pub rule: String,
}

/// All loaded filter lists plus the memoized match results.
pub struct FilterIndex {
    lists: Vec<FilterList>,
    cache: DashMap<String, Option<FilterMatch>>,
    cache_path: PathBuf,
}

impl FilterIndex {
    /// Load every `*_filter.txt` under the configured filter directory.
    ///
    /// A missing directory or an empty rule set is fatal: without filter
    /// lists the engine cannot produce tracker evidence.
    pub fn load(config: &EngineConfig) -> Result<Self, EngineError> {
        let dir = &config.filter_dir;
        if !dir.is_dir() {
            return Err(EngineError::FilterDirMissing(dir.clone()));
        }

        let mut paths: Vec<(PathBuf, String)> = std::fs::read_dir(dir)
            .map_err(|e| EngineError::io(dir, e))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter_map(|p| list_name_from_file(&p).map(|name| (p, name)))
            .collect();
        paths.sort();

        let mut lists = Vec::with_capacity(paths.len());
        for (path, name) in paths {
            let text = std::fs::read_to_string(&path).map_err(|e| EngineError::io(&path, e))?;
            let list = FilterList::parse(name, &text);
            tracing::debug!(list = %list.name, rules = list.len(), "loaded filter list");
            lists.push(list);
        }

        if lists.iter().all(|l| l.is_empty()) {
            return Err(EngineError::NoFilterRules(dir.clone()));
        }

        Ok(Self {
            lists,
            cache: load_cache(&config.filter_cache_path()),
            cache_path: config.filter_cache_path(),
        })
    }

    /// Index over in-memory lists (tests).
    pub fn from_lists(lists: Vec<FilterList>) -> Self {
        Self { lists, cache: DashMap::new(), cache_path: PathBuf::new() }
    }

    pub fn rule_count(&self) -> usize {
        self.lists.iter().map(FilterList::len).sum()
    }

    pub fn list_count(&self) -> usize {
        self.lists.len()
    }

    /// First matching `(list, rule)` for a host, memoized. Misses are
    /// cached too.
    pub fn matches(&self, host: &str) -> Option<FilterMatch> {
        let key = normalize_host(host);
        if let Some(cached) = self.cache.get(&key) {
            return cached.clone();
        }
        let result = self.match_uncached(&key);
        self.cache.insert(key, result.clone());
        result
    }

    fn match_uncached(&self, host: &str) -> Option<FilterMatch> {
        // Subdomain chain: host, after-first-dot, ...
        let chain: Vec<&str> = {
            let mut out = Vec::new();
            let mut rest = host;
            loop {
                out.push(rest);
                match rest.split_once('.') {
                    Some((_, tail)) if !tail.is_empty() => rest = tail,
                    _ => break,
                }
            }
            out
        };

        for list in &self.lists {
            for rule in &list.rules {
                let dotted = format!(".{}", rule.pattern);
                let matched = rule.pattern == host
                    || chain.iter().any(|sub| *sub == rule.pattern || sub.ends_with(&dotted))
                    || rule.glob.as_ref().is_some_and(|glob| glob.is_match(host));
                if matched {
                    return Some(FilterMatch {
                        list: list.name.clone(),
                        rule: rule.pattern.clone(),
                    });
                }
            }
        }
        None
    }

    /// Persist the memo cache (atomic, failures logged and swallowed).
    pub fn persist(&self) {
        if self.cache_path.as_os_str().is_empty() {
            return;
        }
        let snapshot: Vec<(String, Option<FilterMatch>)> =
            self.cache.iter().map(|kv| (kv.key().clone(), kv.value().clone())).collect();
        let bytes = match bincode::serialize(&snapshot) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "filter cache serialize failed");
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
            tracing::warn!(path = %self.cache_path.display(), error = %e, "filter cache save failed");
        }
    }
}

fn load_cache(path: &Path) -> DashMap<String, Option<FilterMatch>> {
    let cache = DashMap::new();
    match std::fs::read(path) {
        Ok(bytes) => match bincode::deserialize::<Vec<(String, Option<FilterMatch>)>>(&bytes) {
            Ok(stored) => {
                for (key, value) in stored {
                    cache.insert(key, value);
                }
                tracing::debug!(path = %path.display(), entries = cache.len(), "loaded filter cache");
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "corrupt filter cache, starting empty");
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "could not read filter cache");
        }
    }
    cache
}
