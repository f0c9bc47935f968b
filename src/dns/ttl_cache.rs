//! Persisted TTL cache.
//!
//! Entries carry their absolute expiry, so the TTL survives the
//! round-trip to disk. Persistence is atomic (write-temp-then-rename)
//! and expired entries are pruned on save. A corrupt or version-skewed
//! cache file is discarded with a single warning; the cache then starts
//! empty, which can never change analysis results, only their cost.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry<V> {
    value: V,
    expires_at: u64,
}

/// Concurrent string-keyed cache with per-entry expiry.
pub struct TtlCache<V> {
    entries: DashMap<String, Entry<V>>,
    ttl: Duration,
    path: PathBuf,
}

impl<V> TtlCache<V>
where
    V: Clone + Serialize + DeserializeOwned,
{
    /// Load the cache from `path`, or start empty when the file is
    /// missing or unreadable.
    pub fn load(path: impl Into<PathBuf>, ttl: Duration) -> Self {
        let path = path.into();
        let entries = DashMap::new();
        match std::fs::read(&path) {
            Ok(bytes) => match bincode::deserialize::<Vec<(String, Entry<V>)>>(&bytes) {
                Ok(stored) => {
                    let now = now_secs();
                    let mut loaded = 0usize;
                    for (key, entry) in stored {
                        if entry.expires_at > now {
                            entries.insert(key, entry);
                            loaded += 1;
                        }
                    }
                    tracing::debug!(path = %path.display(), entries = loaded, "loaded cache");
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "corrupt cache file, starting empty");
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "could not read cache, starting empty");
            }
        }
        Self { entries, ttl, path }
    }

    /// In-memory cache for tests.
    pub fn ephemeral(ttl: Duration) -> Self {
        Self { entries: DashMap::new(), ttl, path: PathBuf::new() }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let entry = self.entries.get(key)?;
        if entry.expires_at <= now_secs() {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        Some(entry.value.clone())
    }

    pub fn insert(&self, key: String, value: V) {
        let expires_at = now_secs() + self.ttl.as_secs();
        self.entries.insert(key, Entry { value, expires_at });
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist atomically. Save failures are logged and swallowed: losing
    /// a cache costs lookups, never correctness.
    pub fn persist(&self) {
        if self.path.as_os_str().is_empty() {
            return;
        }
        let now = now_secs();
        let snapshot: Vec<(String, Entry<V>)> = self
            .entries
            .iter()
            .filter(|kv| kv.value().expires_at > now)
            .map(|kv| (kv.key().clone(), kv.value().clone()))
            .collect();

        let bytes = match bincode::serialize(&snapshot) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "cache serialize failed");
                return;
            }
        };

        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let tmp = self.path.with_extension("bin.tmp");
        if let Err(e) = std::fs::write(&tmp, &bytes).and_then(|_| std::fs::rename(&tmp, &self.path))
        {
            tracing::warn!(path = %self.path.display(), error = %e, "cache save failed");
        } else {
            tracing::debug!(path = %self.path.display(), entries = snapshot.len(), "saved cache");
        }
    }
}

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get() {
        let cache: TtlCache<Vec<String>> = TtlCache::ephemeral(Duration::from_secs(60));
        cache.insert("example.com".into(), vec!["target.example".into()]);
        assert_eq!(cache.get("example.com").unwrap().len(), 1);
        assert!(cache.get("other.com").is_none());
    }

    #[test]
    fn test_zero_ttl_expires_immediately() {
        let cache: TtlCache<u32> = TtlCache::ephemeral(Duration::from_secs(0));
        cache.insert("k".into(), 1);
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn test_persist_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.bin");

        let cache: TtlCache<Vec<String>> = TtlCache::load(&path, Duration::from_secs(3600));
        cache.insert("a.example".into(), vec!["b.example".into()]);
        cache.insert("empty.example".into(), vec![]);
        cache.persist();

        let reloaded: TtlCache<Vec<String>> = TtlCache::load(&path, Duration::from_secs(3600));
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.get("a.example").unwrap(), vec!["b.example".to_string()]);
        // Negative entries round-trip too.
        assert_eq!(reloaded.get("empty.example").unwrap(), Vec::<String>::new());
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.bin");
        std::fs::write(&path, b"not a cache").unwrap();

        let cache: TtlCache<u32> = TtlCache::load(&path, Duration::from_secs(60));
        assert!(cache.is_empty());
    }
}
