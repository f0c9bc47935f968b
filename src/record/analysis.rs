//! Enrichment structures the analyzers attach to a site record.
//!
//! Field order inside each struct is the serialization order and is part
//! of the output contract; aggregate maps are `BTreeMap` so warm-cache
//! reruns produce byte-identical files (modulo `analyzed_at`).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// How a host earned its tracker flag. Authoritative; human-readable
/// notes are derived from it, never the other way around.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingMethod {
    FilterList,
    CategorizedTracker,
    OrganizationDifference,
}

/// Per-host classification result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEntry {
    pub domain: String,
    #[serde(default)]
    pub request_count: u64,
    #[serde(default)]
    pub is_first_party_domain: bool,
    #[serde(default)]
    pub filter_match: bool,
    #[serde(default)]
    pub is_tracker: bool,
    #[serde(default)]
    pub tracking_method: Option<TrackingMethod>,
    #[serde(default)]
    pub cname_cloaking: bool,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub organizations: Vec<String>,
    #[serde(default)]
    pub cname_chain: Vec<String>,
    #[serde(default)]
    pub analysis_notes: Vec<String>,
}

impl DomainEntry {
    /// Hosting/CDN destinations are infrastructure, not trackers; they are
    /// excluded from third-party sharing.
    pub fn is_infrastructure(&self) -> bool {
        self.categories.iter().any(|c| c == "Hosting" || c == "CDN")
    }
}

/// Tracker counts split by how they were detected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerStats {
    pub total: u64,
    pub direct: u64,
    pub cloaked: u64,
}

/// First-party or third-party breakdown.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PartyStats {
    pub total: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrastructure: Option<u64>,
    pub trackers: TrackerStats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clean: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CnameCloakingStats {
    pub total: u64,
    /// Histogram of organizations behind the cloaking destinations.
    pub trackers_using_cloaking: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionStats {
    pub total: u64,
    pub filter_list_matches: u64,
    pub category_based: u64,
    pub organization_based: u64,
}

/// Site-level rollup over every analyzed host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainStatistics {
    pub total_domains: u64,
    pub filter_matches: u64,
    pub cname_cloaking: CnameCloakingStats,
    pub first_party: PartyStats,
    pub third_party: PartyStats,
    pub categories: BTreeMap<String, u64>,
    pub organizations: BTreeMap<String, u64>,
    pub trackers: DetectionStats,
}

/// Output of the domain analyzer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainAnalysis {
    #[serde(default)]
    pub analyzed_at: String,
    #[serde(default)]
    pub domains: Vec<DomainEntry>,
    #[serde(default)]
    pub statistics: DomainStatistics,
}

impl DomainAnalysis {
    /// Lowercased hosts flagged first-party.
    pub fn first_party_hosts(&self) -> Vec<String> {
        self.domains
            .iter()
            .filter(|d| d.is_first_party_domain)
            .map(|d| d.domain.to_ascii_lowercase())
            .collect()
    }

    pub fn entry(&self, host: &str) -> Option<&DomainEntry> {
        self.domains.iter().find(|d| d.domain.eq_ignore_ascii_case(host))
    }
}

/// Cross-visit stability of cookie values seen in request headers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValueConsistency {
    pub cookies_in_multiple_visits: u64,
    pub identical_value_count: u64,
    pub changing_value_count: u64,
    pub identical_percentage: f64,
}

/// Identifier-gate failure counters, one per criterion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailedChecks {
    /// sessionStorage items auto-fail persistence; cookies fail here when
    /// no occurrence is long-lived persistent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent: Option<u64>,
    pub entropy: u64,
    pub length: u64,
    pub similarity: u64,
}

/// Summary of cookies flagged by the identifier gate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PotentialTrackingCookies {
    pub total: u64,
    pub by_category: BTreeMap<String, u64>,
    pub cookie_names: Vec<String>,
    pub failed_checks: FailedChecks,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SharedIdentifiers {
    pub count: u64,
    pub names: Vec<String>,
}

/// Summary of cookie-header sharing across request hosts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieSharingSummary {
    pub total_cookies_shared: u64,
    pub cookies_shared_with_third_parties: u64,
    pub third_party_domains_receiving_cookies: Vec<String>,
    pub shared_identifiers: SharedIdentifiers,
}

/// Aggregate cookie statistics. The first ten fields are a stable,
/// ordered prefix consumed by the tabular exporter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieAnalysis {
    pub unique_cookies: u64,
    pub overlapping_cookies: u64,
    pub identified_cookies: u64,
    pub unidentified_cookies: u64,
    pub first_party_cookies: u64,
    pub third_party_cookies: u64,
    pub categories: BTreeMap<String, u64>,
    pub scripts: BTreeMap<String, u64>,
    pub note: String,
    pub analyzed_at: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub non_persistent_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistence_ratio: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_consistency: Option<ValueConsistency>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub potential_tracking_cookies: Option<PotentialTrackingCookies>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookie_sharing: Option<CookieSharingSummary>,
}

/// Sharing metadata attached to a storage item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SharedWith {
    pub domains: Vec<String>,
    pub categories: Vec<String>,
    pub organizations: Vec<String>,
    pub is_infrastructure_only: bool,
    /// Which side of the item leaked: `"key"`, `"value"`, or both.
    pub shared_by: Vec<String>,
}

/// Per-item analysis object produced by the storage analyzer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageItemAnalysis {
    pub is_shared: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_with: Option<SharedWith>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasons: Vec<String>,
}

/// Identifier counts per storage type, with the flagged key names.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PotentialIdentifiers {
    pub total: u64,
    #[serde(rename = "localStorage")]
    pub local_storage: u64,
    #[serde(rename = "sessionStorage")]
    pub session_storage: u64,
    pub item_names: ItemNames,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ItemNames {
    #[serde(rename = "localStorage")]
    pub local_storage: Vec<String>,
    #[serde(rename = "sessionStorage")]
    pub session_storage: Vec<String>,
}

/// Similarity workload accounting, keyed by storage key so the test suite
/// can assert exactly when the simplified comparison was used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoragePerformance {
    pub items_analyzed: u64,
    pub similarity_pairs_checked: u64,
    pub simplified_comparisons: u64,
    pub simplified_by_key: BTreeMap<String, u64>,
}

/// Output of the storage analyzer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageAnalysis {
    pub analyzed_at: String,
    pub potential_identifiers: PotentialIdentifiers,
    pub failed_checks: FailedChecks,
    pub performance: StoragePerformance,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracking_method_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&TrackingMethod::FilterList).unwrap(),
            "\"filter_list\""
        );
        assert_eq!(
            serde_json::to_string(&TrackingMethod::OrganizationDifference).unwrap(),
            "\"organization_difference\""
        );
    }

    #[test]
    fn test_cookie_analysis_field_order() {
        let analysis = CookieAnalysis {
            unique_cookies: 2,
            note: "n".into(),
            ..Default::default()
        };
        let json = serde_json::to_string(&analysis).unwrap();
        let unique = json.find("unique_cookies").unwrap();
        let overlapping = json.find("overlapping_cookies").unwrap();
        let identified = json.find("identified_cookies").unwrap();
        let first = json.find("first_party_cookies").unwrap();
        let note = json.find("\"note\"").unwrap();
        assert!(unique < overlapping && overlapping < identified);
        assert!(identified < first && first < note);
    }

    #[test]
    fn test_infrastructure_detection() {
        let mut entry = DomainEntry {
            domain: "cdn.example.net".into(),
            request_count: 1,
            is_first_party_domain: false,
            filter_match: false,
            is_tracker: false,
            tracking_method: None,
            cname_cloaking: false,
            categories: vec!["CDN".into()],
            organizations: vec![],
            cname_chain: vec![],
            analysis_notes: vec![],
        };
        assert!(entry.is_infrastructure());
        entry.categories = vec!["Advertising".into()];
        assert!(!entry.is_infrastructure());
    }
}
