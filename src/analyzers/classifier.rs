//! Cookie Classifier
//!
//! Classifies every cookie in a site record against the cookie knowledge
//! base and attaches a per-site aggregate. Runs in two passes: the first
//! classifies with the current knowledge base and collects the names it
//! does not know; when lookups are enabled those names are fetched in a
//! batch through the lookup collaborator and the record is re-classified.
//!
//! A cookie the knowledge base has never seen is labeled `Unidentified`
//! (match type `none`). That is distinct from the knowledge-base-internal
//! `Unknown`, which marks names that were looked up and confirmed absent.

use std::collections::{BTreeMap, BTreeSet};

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::cookiedb::{CookieLookup, NOT_SPECIFIED};
use crate::indices::Indices;
use crate::record::{Cookie, CookieAnalysis, CookieClassification, SiteRecord};

/// Classifier-facing label for cookies absent from the knowledge base.
pub const UNIDENTIFIED: &str = "Unidentified";

const AGGREGATE_NOTE: &str = "Category and script counts represent unique cookies across all visits";

pub struct CookieClassifier<'a> {
    indices: &'a Indices,
}

impl<'a> CookieClassifier<'a> {
    pub fn new(indices: &'a Indices) -> Self {
        Self { indices }
    }

    /// Classify the record's cookies; when a collaborator is given,
    /// unknown names are fetched in a batch and the record re-classified.
    pub fn classify(&self, record: &mut SiteRecord, lookup: Option<&dyn CookieLookup>) {
        let unknowns = self.unknown_names(record);
        self.classify_once(record);

        if let Some(collaborator) = lookup {
            if !unknowns.is_empty() {
                tracing::debug!(
                    site = %record.domain,
                    unknown = unknowns.len(),
                    "looking up unknown cookies"
                );
                self.indices.cookies.lookup_batch(collaborator, &unknowns);
                self.classify_once(record);
            }
        }
    }

    /// Cookie names the knowledge base has no entry for.
    fn unknown_names(&self, record: &SiteRecord) -> Vec<String> {
        let names: BTreeSet<String> = record
            .cookies
            .iter()
            .filter(|c| !c.name.is_empty())
            .filter(|c| !self.indices.cookies.contains(&c.name))
            .map(|c| c.name.clone())
            .collect();
        names.into_iter().collect()
    }

    fn classify_once(&self, record: &mut SiteRecord) {
        let mut unique_pairs: BTreeSet<(String, String)> = BTreeSet::new();
        let mut identified: BTreeSet<String> = BTreeSet::new();
        let mut unidentified: BTreeSet<String> = BTreeSet::new();
        // Unique names per category / script, not occurrences.
        let mut category_names: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut script_names: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut names_by_visit: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

        for (visit_id, cookies) in record.cookies.by_visit_mut() {
            for cookie in cookies {
                if cookie.name.is_empty() {
                    continue;
                }
                unique_pairs.insert((cookie.name.clone(), cookie.domain.clone()));
                names_by_visit.entry(visit_id.clone()).or_default().insert(cookie.name.clone());

                let (classification, found) = self.classify_cookie(cookie);
                if found {
                    identified.insert(cookie.name.clone());
                } else {
                    unidentified.insert(cookie.name.clone());
                }
                category_names
                    .entry(classification.category.clone())
                    .or_default()
                    .insert(cookie.name.clone());
                script_names
                    .entry(classification.script.clone())
                    .or_default()
                    .insert(cookie.name.clone());
                cookie.classification = Some(classification);
            }
        }

        // Names present in more than one visit.
        let mut overlapping: BTreeSet<String> = BTreeSet::new();
        let visits: Vec<&BTreeSet<String>> = names_by_visit.values().collect();
        for i in 0..visits.len() {
            for j in i + 1..visits.len() {
                overlapping.extend(visits[i].intersection(visits[j]).cloned());
            }
        }

        let previous = record.cookie_analysis.take().unwrap_or_default();
        record.cookie_analysis = Some(CookieAnalysis {
            unique_cookies: unique_pairs.len() as u64,
            overlapping_cookies: overlapping.len() as u64,
            identified_cookies: identified.len() as u64,
            unidentified_cookies: unidentified.len() as u64,
            categories: category_names.into_iter().map(|(k, v)| (k, v.len() as u64)).collect(),
            scripts: script_names.into_iter().map(|(k, v)| (k, v.len() as u64)).collect(),
            note: AGGREGATE_NOTE.to_string(),
            analyzed_at: OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default(),
            // Fields owned by the cookie analyzer survive re-classification.
            first_party_cookies: previous.first_party_cookies,
            third_party_cookies: previous.third_party_cookies,
            persistent_count: previous.persistent_count,
            non_persistent_count: previous.non_persistent_count,
            persistence_ratio: previous.persistence_ratio,
            value_consistency: previous.value_consistency,
            potential_tracking_cookies: previous.potential_tracking_cookies,
            cookie_sharing: previous.cookie_sharing,
        });
    }

    /// Returns the classification and whether the cookie counts as
    /// identified.
    fn classify_cookie(&self, cookie: &Cookie) -> (CookieClassification, bool) {
        match self.indices.cookies.get(&cookie.name) {
            Some(entry) => {
                let found = !entry.is_unknown();
                (
                    CookieClassification {
                        category: entry.category,
                        script: entry.script,
                        script_url: entry.script_url,
                        description: entry.description,
                        match_type: entry.match_type,
                    },
                    found,
                )
            }
            None => (
                CookieClassification {
                    category: UNIDENTIFIED.to_string(),
                    script: NOT_SPECIFIED.to_string(),
                    script_url: NOT_SPECIFIED.to_string(),
                    description: "No match found in database".to_string(),
                    match_type: "none".to_string(),
                },
                false,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cookiedb::{CookieDbEntry, CookieDetails, CookieKnowledgeBase, SearchHit};
    use crate::dns::StaticResolve;
    use crate::filters::{FilterIndex, FilterList};
    use crate::psl::PublicSuffixIndex;
    use crate::trackerdb::TrackerDb;
    use std::sync::Arc;

    fn indices() -> Indices {
        Indices::from_parts(
            PublicSuffixIndex::from_suffixes(["com"]),
            FilterIndex::from_lists(vec![FilterList::parse("Easy Privacy", "||unused.test^")]),
            Box::new(TrackerDb::from_entries([])),
            CookieKnowledgeBase::ephemeral(),
            Arc::new(StaticResolve::new()),
        )
    }

    fn record(cookie_names: &[(&str, &str)]) -> SiteRecord {
        let cookies: Vec<serde_json::Value> = cookie_names
            .iter()
            .map(|(name, domain)| {
                serde_json::json!({"name": name, "domain": domain, "value": "v"})
            })
            .collect();
        serde_json::from_value(serde_json::json!({
            "domain": "shop.com",
            "cookies": {"1": cookies, "2": [{"name": cookie_names[0].0, "domain": cookie_names[0].1, "value": "v"}]},
        }))
        .unwrap()
    }

    fn db_entry(name: &str, category: &str, script: &str, match_type: &str) -> CookieDbEntry {
        CookieDbEntry {
            name: name.to_string(),
            cookie_id: "c1".to_string(),
            category: category.to_string(),
            script: script.to_string(),
            description: String::new(),
            url: NOT_SPECIFIED.to_string(),
            script_url: NOT_SPECIFIED.to_string(),
            found_at: String::new(),
            match_type: match_type.to_string(),
        }
    }

    #[test]
    fn test_known_cookie_classified() {
        let idx = indices();
        idx.cookies.insert(db_entry("_ga", "Analytics", "Google Analytics", "direct"));
        let mut rec = record(&[("_ga", ".shop.com")]);

        CookieClassifier::new(&idx).classify(&mut rec, None);

        let cookie = rec.cookies.iter().next().unwrap();
        let classification = cookie.classification.as_ref().unwrap();
        assert_eq!(classification.category, "Analytics");
        let analysis = rec.cookie_analysis.as_ref().unwrap();
        assert_eq!(analysis.identified_cookies, 1);
        assert_eq!(analysis.unidentified_cookies, 0);
        assert_eq!(analysis.categories["Analytics"], 1);
    }

    #[test]
    fn test_missing_cookie_is_unidentified() {
        let idx = indices();
        let mut rec = record(&[("acme_sid", ".shop.com")]);

        CookieClassifier::new(&idx).classify(&mut rec, None);

        let cookie = rec.cookies.iter().next().unwrap();
        let classification = cookie.classification.as_ref().unwrap();
        assert_eq!(classification.category, UNIDENTIFIED);
        assert_eq!(classification.match_type, "none");
        let analysis = rec.cookie_analysis.as_ref().unwrap();
        assert_eq!(analysis.unidentified_cookies, 1);
    }

    #[test]
    fn test_lookup_pass_reclassifies() {
        struct StemLookup;
        impl CookieLookup for StemLookup {
            fn fetch(&self, name: &str) -> Option<CookieDetails> {
                (name == "acme_sid").then(|| CookieDetails {
                    category: "Analytics".to_string(),
                    script: "Acme Analytics".to_string(),
                    ..Default::default()
                })
            }
            fn search(&self, _stem: &str) -> Vec<SearchHit> {
                Vec::new()
            }
        }

        let idx = indices();
        let mut rec = record(&[("acme_sid_123", ".shop.com")]);

        CookieClassifier::new(&idx).classify(&mut rec, Some(&StemLookup));

        let cookie = rec.cookies.iter().next().unwrap();
        let classification = cookie.classification.as_ref().unwrap();
        assert_eq!(classification.category, "Analytics");
        assert_eq!(classification.match_type, "simplified");
        let analysis = rec.cookie_analysis.as_ref().unwrap();
        assert_eq!(analysis.identified_cookies, 1);
        assert_eq!(analysis.unidentified_cookies, 0);
    }

    #[test]
    fn test_confirmed_unknown_stays_unidentified_count() {
        let idx = indices();
        idx.cookies.insert(CookieDbEntry::unknown("opaque"));
        let mut rec = record(&[("opaque", ".shop.com")]);

        CookieClassifier::new(&idx).classify(&mut rec, None);

        let analysis = rec.cookie_analysis.as_ref().unwrap();
        assert_eq!(analysis.identified_cookies, 0);
        assert_eq!(analysis.unidentified_cookies, 1);
        // The stored entry's own category is surfaced, not "Unidentified".
        let cookie = rec.cookies.iter().next().unwrap();
        assert_eq!(cookie.classification.as_ref().unwrap().category, "Unknown");
    }

    #[test]
    fn test_unique_and_overlap_counts() {
        let idx = indices();
        let mut rec = record(&[("a", ".shop.com"), ("b", ".shop.com")]);
        CookieClassifier::new(&idx).classify(&mut rec, None);

        let analysis = rec.cookie_analysis.as_ref().unwrap();
        // "a" appears in both visits, "b" only in visit 1.
        assert_eq!(analysis.unique_cookies, 2);
        assert_eq!(analysis.overlapping_cookies, 1);
        assert_eq!(analysis.note, AGGREGATE_NOTE);
    }
}
