//! Lookup collaborator boundary and the miss-fallback strategy.
//!
//! The collaborator that actually answers queries is external (the
//! production one is a browser-automation script against a cookie search
//! site); the engine owns the *strategy*: direct lookup of the exact
//! name, then progressively simplified stems (strip the suffix after the
//! last `_`, `.` or `-`), each stem tried directly and then through the
//! collaborator's search surface. The stored entry always keeps the
//! original cookie name regardless of which stem finally matched.

use super::{now_stamp, CookieDbEntry};

/// How a stored entry was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    /// The exact name had a details record.
    Direct,
    /// A simplified stem had a details record.
    Simplified,
    /// A search for a stem returned an exact-text match.
    Search,
    /// A search for a stem returned a result that merely starts with it.
    Partial,
    /// Every strategy failed.
    None,
}

impl MatchType {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchType::Direct => "direct",
            MatchType::Simplified => "simplified",
            MatchType::Search => "search",
            MatchType::Partial => "partial",
            MatchType::None => "none",
        }
    }
}

/// A details record produced by the collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieDetails {
    pub cookie_id: String,
    pub category: String,
    pub script: String,
    pub script_url: String,
    pub description: String,
    pub url: String,
}

/// One row on the collaborator's search surface.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub name: String,
    pub details: CookieDetails,
}

/// External lookup collaborator.
///
/// Implementations may time out or fail internally; both surface as
/// `None` / empty results and the name is recorded as `Unknown`.
pub trait CookieLookup: Send + Sync {
    /// Details record for an exact name, if one exists.
    fn fetch(&self, name: &str) -> Option<CookieDetails>;

    /// Search results for a stem.
    fn search(&self, stem: &str) -> Vec<SearchHit>;
}

/// Collaborator that knows nothing. Used when lookups are disabled or no
/// external collaborator is wired up.
pub struct NullLookup;

impl CookieLookup for NullLookup {
    fn fetch(&self, _name: &str) -> Option<CookieDetails> {
        None
    }

    fn search(&self, _stem: &str) -> Vec<SearchHit> {
        Vec::new()
    }
}

/// Run the full fallback strategy for one name.
pub(crate) fn lookup_one(collaborator: &dyn CookieLookup, name: &str) -> CookieDbEntry {
    if let Some(details) = collaborator.fetch(name) {
        return entry_from(name, details, MatchType::Direct);
    }

    let mut stem = name.to_string();
    while let Some(simpler) = simplify(&stem) {
        stem = simpler;
        tracing::debug!(cookie = %name, %stem, "trying simplified lookup");

        if let Some(details) = collaborator.fetch(&stem) {
            return entry_from(name, details, MatchType::Simplified);
        }

        let hits = collaborator.search(&stem);
        if let Some(hit) = hits.iter().find(|h| h.name == stem) {
            return entry_from(name, hit.details.clone(), MatchType::Search);
        }
        if let Some(hit) = hits.iter().find(|h| h.name.starts_with(stem.as_str())) {
            return entry_from(name, hit.details.clone(), MatchType::Partial);
        }
    }

    CookieDbEntry::unknown(name)
}

/// Strip the suffix after the last of `_`, `.`, `-`. Returns `None` when
/// no separator remains in a splittable position.
fn simplify(name: &str) -> Option<String> {
    let idx = name.rfind(['_', '.', '-'])?;
    if idx == 0 {
        return None;
    }
    Some(name[..idx].to_string())
}

fn entry_from(original_name: &str, details: CookieDetails, match_type: MatchType) -> CookieDbEntry {
    CookieDbEntry {
        name: original_name.to_string(),
        cookie_id: details.cookie_id,
        category: details.category,
        script: details.script,
        description: details.description,
        url: details.url,
        script_url: details.script_url,
        found_at: now_stamp(),
        match_type: match_type.as_str().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MapLookup {
        records: HashMap<String, CookieDetails>,
        search_index: HashMap<String, Vec<SearchHit>>,
    }

    impl MapLookup {
        fn with_record(mut self, name: &str, category: &str) -> Self {
            self.records.insert(name.to_string(), details(category));
            self
        }

        fn with_search(mut self, stem: &str, result_names: &[&str]) -> Self {
            self.search_index.insert(
                stem.to_string(),
                result_names
                    .iter()
                    .map(|n| SearchHit { name: n.to_string(), details: details("Analytics") })
                    .collect(),
            );
            self
        }
    }

    impl CookieLookup for MapLookup {
        fn fetch(&self, name: &str) -> Option<CookieDetails> {
            self.records.get(name).cloned()
        }

        fn search(&self, stem: &str) -> Vec<SearchHit> {
            self.search_index.get(stem).cloned().unwrap_or_default()
        }
    }

    fn details(category: &str) -> CookieDetails {
        CookieDetails { category: category.to_string(), ..Default::default() }
    }

    #[test]
    fn test_direct_match() {
        let lookup = MapLookup::default().with_record("_ga", "Analytics");
        let entry = lookup_one(&lookup, "_ga");
        assert_eq!(entry.match_type, "direct");
        assert_eq!(entry.category, "Analytics");
    }

    #[test]
    fn test_simplified_match_keeps_original_name() {
        // "acme_sid_12345" -> "acme_sid" has a record.
        let lookup = MapLookup::default().with_record("acme_sid", "Analytics");
        let entry = lookup_one(&lookup, "acme_sid_12345");
        assert_eq!(entry.name, "acme_sid_12345");
        assert_eq!(entry.match_type, "simplified");
    }

    #[test]
    fn test_search_exact_beats_prefix() {
        let lookup = MapLookup::default().with_search("acme", &["acme_other", "acme"]);
        let entry = lookup_one(&lookup, "acme_sid");
        assert_eq!(entry.match_type, "search");
    }

    #[test]
    fn test_search_prefix_is_partial() {
        let lookup = MapLookup::default().with_search("acme", &["acme_other"]);
        let entry = lookup_one(&lookup, "acme_sid");
        assert_eq!(entry.match_type, "partial");
    }

    #[test]
    fn test_all_strategies_fail_is_unknown() {
        let entry = lookup_one(&NullLookup, "opaque");
        assert_eq!(entry.match_type, "none");
        assert!(entry.is_unknown());
        assert_eq!(entry.name, "opaque");
    }

    #[test]
    fn test_simplify_walks_separators() {
        assert_eq!(simplify("a_b.c-d").as_deref(), Some("a_b.c"));
        assert_eq!(simplify("a_b.c").as_deref(), Some("a_b"));
        assert_eq!(simplify("a_b").as_deref(), Some("a"));
        assert_eq!(simplify("a"), None);
        assert_eq!(simplify("_leading"), None);
    }
}
