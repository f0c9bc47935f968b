//! Cookie Knowledge Base
//!
//! Persistent name-keyed map of cookie classifications
//! (`data/db+ref/cookie_database.json`). Misses are filled through an
//! external lookup collaborator (see [`lookup`]) driving a fallback
//! strategy; confirmed-absent names are stored as `Unknown` entries so
//! they are never re-queried.

mod lookup;

pub use lookup::{CookieDetails, CookieLookup, MatchType, NullLookup, SearchHit};

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::base::EngineConfig;

pub const NOT_SPECIFIED: &str = "Not specified";
/// Internal category for names that were looked up and confirmed absent.
/// Distinct from the classifier-facing `Unidentified`, which means "not
/// looked up yet".
pub const UNKNOWN_CATEGORY: &str = "Unknown";

/// One stored cookie definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieDbEntry {
    pub name: String,
    pub cookie_id: String,
    pub category: String,
    pub script: String,
    pub description: String,
    pub url: String,
    pub script_url: String,
    pub found_at: String,
    pub match_type: String,
}

impl CookieDbEntry {
    /// Entry for a name every strategy failed on.
    pub fn unknown(name: &str) -> Self {
        Self {
            name: name.to_string(),
            cookie_id: NOT_SPECIFIED.to_string(),
            category: UNKNOWN_CATEGORY.to_string(),
            script: NOT_SPECIFIED.to_string(),
            description: "No match found".to_string(),
            url: NOT_SPECIFIED.to_string(),
            script_url: NOT_SPECIFIED.to_string(),
            found_at: now_stamp(),
            match_type: MatchType::None.as_str().to_string(),
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.category.eq_ignore_ascii_case(UNKNOWN_CATEGORY)
    }
}

/// Aggregate view of the stored entries.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CookieDbStatistics {
    pub total_cookies: usize,
    pub categories: BTreeMap<String, usize>,
    pub scripts: BTreeMap<String, usize>,
    pub match_types: BTreeMap<String, usize>,
}

/// The knowledge base: many concurrent readers during classification,
/// exclusive writer during lookup backfill and save.
pub struct CookieKnowledgeBase {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, CookieDbEntry>>,
}

impl CookieKnowledgeBase {
    /// Load the database; a missing or corrupt file starts empty.
    pub fn load(config: &EngineConfig) -> Self {
        let path = config.cookie_db_path.clone();
        let entries = match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<BTreeMap<String, CookieDbEntry>>(&text) {
                Ok(entries) => {
                    tracing::info!(path = %path.display(), cookies = entries.len(), "loaded cookie database");
                    entries
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "malformed cookie database, starting empty");
                    BTreeMap::new()
                }
            },
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "cookie database not loaded, starting empty");
                BTreeMap::new()
            }
        };
        Self { path, entries: RwLock::new(entries) }
    }

    /// Empty in-memory database (tests).
    pub fn ephemeral() -> Self {
        Self { path: PathBuf::new(), entries: RwLock::new(BTreeMap::new()) }
    }

    pub fn get(&self, name: &str) -> Option<CookieDbEntry> {
        self.entries.read().expect("cookie db lock").get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().expect("cookie db lock").contains_key(name)
    }

    /// Whether `name` was looked up before and confirmed absent.
    pub fn is_unknown(&self, name: &str) -> bool {
        self.get(name).map(|e| e.is_unknown()).unwrap_or(false)
    }

    pub fn insert(&self, entry: CookieDbEntry) {
        self.entries.write().expect("cookie db lock").insert(entry.name.clone(), entry);
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("cookie db lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve every name through the collaborator, recording the match
    /// type the winning strategy earned. Saves once at the end to bound
    /// disk churn.
    pub fn lookup_batch(&self, collaborator: &dyn CookieLookup, names: &[String]) -> usize {
        let mut found = 0usize;
        for name in names {
            // Previously classified names (including confirmed unknowns)
            // are not re-queried.
            if self.contains(name) {
                continue;
            }
            let entry = lookup::lookup_one(collaborator, name);
            if entry.match_type != MatchType::None.as_str() {
                found += 1;
                tracing::debug!(cookie = %name, match_type = %entry.match_type, "cookie lookup hit");
            }
            self.insert(entry);
        }
        self.save();
        found
    }

    /// Save atomically; failures are logged, enrichment is unaffected.
    pub fn save(&self) {
        if self.path.as_os_str().is_empty() {
            return;
        }
        let entries = self.entries.read().expect("cookie db lock");
        if entries.is_empty() {
            return;
        }
        let json = match serde_json::to_string_pretty(&*entries) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(error = %e, "cookie database serialize failed");
                return;
            }
        };
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let tmp = self.path.with_extension("json.tmp");
        if let Err(e) = std::fs::write(&tmp, json).and_then(|_| std::fs::rename(&tmp, &self.path)) {
            tracing::warn!(path = %self.path.display(), error = %e, "cookie database save failed");
        } else {
            tracing::debug!(path = %self.path.display(), cookies = entries.len(), "saved cookie database");
        }
    }

    pub fn statistics(&self) -> CookieDbStatistics {
        let entries = self.entries.read().expect("cookie db lock");
        let mut stats = CookieDbStatistics { total_cookies: entries.len(), ..Default::default() };
        for entry in entries.values() {
            *stats.categories.entry(entry.category.clone()).or_default() += 1;
            *stats.scripts.entry(entry.script.clone()).or_default() += 1;
            *stats.match_types.entry(entry.match_type.clone()).or_default() += 1;
        }
        stats
    }
}

pub(crate) fn now_stamp() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, category: &str) -> CookieDbEntry {
        CookieDbEntry {
            name: name.to_string(),
            cookie_id: "c1".to_string(),
            category: category.to_string(),
            script: "Acme Analytics".to_string(),
            description: String::new(),
            url: NOT_SPECIFIED.to_string(),
            script_url: NOT_SPECIFIED.to_string(),
            found_at: now_stamp(),
            match_type: MatchType::Direct.as_str().to_string(),
        }
    }

    #[test]
    fn test_insert_get_contains() {
        let db = CookieKnowledgeBase::ephemeral();
        db.insert(entry("_ga", "Analytics"));
        assert!(db.contains("_ga"));
        assert_eq!(db.get("_ga").unwrap().category, "Analytics");
        assert!(!db.contains("_gid"));
    }

    #[test]
    fn test_unknown_entry_detection() {
        let db = CookieKnowledgeBase::ephemeral();
        db.insert(CookieDbEntry::unknown("mystery"));
        assert!(db.contains("mystery"));
        assert!(db.is_unknown("mystery"));
        assert!(!db.is_unknown("_ga"));
    }

    #[test]
    fn test_statistics_histograms() {
        let db = CookieKnowledgeBase::ephemeral();
        db.insert(entry("_ga", "Analytics"));
        db.insert(entry("_gid", "Analytics"));
        db.insert(CookieDbEntry::unknown("mystery"));

        let stats = db.statistics();
        assert_eq!(stats.total_cookies, 3);
        assert_eq!(stats.categories["Analytics"], 2);
        assert_eq!(stats.categories[UNKNOWN_CATEGORY], 1);
        assert_eq!(stats.match_types["none"], 1);
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = EngineConfig::new(dir.path());
        config.cookie_db_path = dir.path().join("cookie_database.json");

        let db = CookieKnowledgeBase::load(&config);
        db.insert(entry("_ga", "Analytics"));
        db.save();

        let reloaded = CookieKnowledgeBase::load(&config);
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.get("_ga").unwrap().script, "Acme Analytics");
    }
}
