//! Cookie Analyzer
//!
//! Marks cookie persistence and first-party status, measures cross-visit
//! value stability, applies the four-criterion identifier gate, and scans
//! request cookie headers for third-party sharing. Runs after the domain
//! analyzer (first-party status and third-party destinations come from
//! its output) and after the classifier (the identifier summary buckets
//! by classification category).

use std::collections::{BTreeMap, BTreeSet};
use std::time::{SystemTime, UNIX_EPOCH};

use super::similarity;
use crate::record::{
    Cookie, CookieSharingSummary, FailedChecks, PotentialTrackingCookies, SharedIdentifiers,
    SiteRecord, ValueConsistency,
};

/// A persistent cookie must outlive this many days to pass the gate.
pub const LONG_LIVED_DAYS: f64 = 90.0;
/// Minimum value length for identifier entropy.
pub const MIN_VALUE_LEN: usize = 8;
/// Maximum relative length variation across visits.
pub const MAX_LENGTH_VARIATION: f64 = 0.25;

pub struct CookieAnalyzer;

impl CookieAnalyzer {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze(&self, record: &mut SiteRecord) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        self.analyze_at(record, now);
    }

    /// Entry point with an explicit clock, so tests pin "now".
    pub fn analyze_at(&self, record: &mut SiteRecord, now: f64) {
        self.mark_persistence(record, now);
        self.mark_first_party(record);
        self.check_value_consistency(record);
        self.apply_identifier_gate(record);
        self.analyze_sharing(record);
    }

    /// A cookie is persistent iff its expiry lies in the future. Missing
    /// expiry means session cookie, never persistent.
    fn mark_persistence(&self, record: &mut SiteRecord, now: f64) {
        let mut unique: BTreeMap<(String, String), bool> = BTreeMap::new();
        for cookie in record.cookies.iter_mut() {
            let persistent = cookie.expires.map(|e| e > now).unwrap_or(false);
            cookie.persistent = Some(persistent);
            if persistent {
                let days = (cookie.expires.unwrap_or(now) - now) / 86_400.0;
                cookie.days_until_expiry = Some(round2(days));
            } else {
                cookie.days_until_expiry = None;
            }
            unique
                .entry((cookie.name.clone(), cookie.domain.clone()))
                .or_insert(persistent);
        }

        let persistent_count = unique.values().filter(|p| **p).count() as u64;
        let total = unique.len() as u64;
        let analysis = record.cookie_analysis.get_or_insert_with(Default::default);
        analysis.unique_cookies = total;
        analysis.persistent_count = Some(persistent_count);
        analysis.non_persistent_count = Some(total - persistent_count);
        analysis.persistence_ratio = Some(if total > 0 {
            round2(persistent_count as f64 / total as f64 * 100.0)
        } else {
            0.0
        });
    }

    /// A cookie is first-party when its domain (leading dot and optional
    /// `www.` stripped) matches or is a subdomain of a first-party host.
    fn mark_first_party(&self, record: &mut SiteRecord) {
        let first_party_hosts: Vec<String> = record
            .domain_analysis
            .as_ref()
            .map(|a| a.first_party_hosts())
            .unwrap_or_default();

        let mut unique: BTreeMap<(String, String), bool> = BTreeMap::new();
        for cookie in record.cookies.iter_mut() {
            let domain = cookie.normalized_domain();
            let is_first_party = !domain.is_empty()
                && first_party_hosts
                    .iter()
                    .any(|h| domain == *h || domain.ends_with(&format!(".{h}")));
            cookie.is_first_party = Some(is_first_party);
            unique
                .entry((cookie.name.clone(), cookie.domain.clone()))
                .or_insert(is_first_party);
        }

        let first_party = unique.values().filter(|fp| **fp).count() as u64;
        let total = unique.len() as u64;
        let analysis = record.cookie_analysis.get_or_insert_with(Default::default);
        analysis.first_party_cookies = first_party;
        analysis.third_party_cookies = total - first_party;
    }

    /// Compare cookie values across visits as seen in request headers.
    fn check_value_consistency(&self, record: &mut SiteRecord) {
        // name -> visit -> value (last seen in the visit wins).
        let mut values: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
        for (visit_id, network) in &record.network_data {
            for request in &network.requests {
                let Some(header) = request.cookie_header() else { continue };
                for (name, value) in parse_cookie_header(header) {
                    values.entry(name).or_default().insert(visit_id.clone(), value);
                }
            }
        }

        let mut identical = 0u64;
        let mut changing = 0u64;
        for visits in values.values() {
            if visits.len() < 2 {
                continue;
            }
            let distinct: BTreeSet<&String> = visits.values().collect();
            if distinct.len() == 1 {
                identical += 1;
            } else {
                changing += 1;
            }
        }

        if values.is_empty() {
            return;
        }
        let multi = identical + changing;
        let analysis = record.cookie_analysis.get_or_insert_with(Default::default);
        analysis.value_consistency = Some(ValueConsistency {
            cookies_in_multiple_visits: multi,
            identical_value_count: identical,
            changing_value_count: changing,
            identical_percentage: if multi > 0 {
                round1(identical as f64 / multi as f64 * 100.0)
            } else {
                0.0
            },
        });
    }

    /// The four-criterion identifier gate, applied per cookie name across
    /// visits. All criteria are checked (not short-circuited) so every
    /// failure counter reflects its own criterion.
    fn apply_identifier_gate(&self, record: &mut SiteRecord) {
        let mut by_name: BTreeMap<String, Vec<&Cookie>> = BTreeMap::new();
        for cookie in record.cookies.iter() {
            if !cookie.name.is_empty() {
                by_name.entry(cookie.name.clone()).or_default().push(cookie);
            }
        }

        let mut failed = FailedChecks { persistent: Some(0), ..Default::default() };
        let mut passing: BTreeSet<String> = BTreeSet::new();

        for (name, cookies) in &by_name {
            if cookies.len() <= 1 {
                continue;
            }

            let long_lived = cookies.iter().any(|c| {
                c.persistent == Some(true)
                    && c.days_until_expiry.unwrap_or(0.0) > LONG_LIVED_DAYS
            });
            if !long_lived {
                *failed.persistent.get_or_insert(0) += 1;
            }

            let values: Vec<&str> = cookies.iter().map(|c| c.value.as_str()).collect();
            let lengths: Vec<usize> = values.iter().map(|v| v.chars().count()).collect();
            let min_len = lengths.iter().copied().min().unwrap_or(0);
            let max_len = lengths.iter().copied().max().unwrap_or(0);

            let entropy_ok = min_len >= MIN_VALUE_LEN;
            if !entropy_ok {
                failed.entropy += 1;
            }

            let length_ok = min_len == 0
                || (max_len - min_len) as f64 / min_len as f64 <= MAX_LENGTH_VARIATION;
            if !length_ok {
                failed.length += 1;
            }

            let similar = similar_but_not_identical(&values);
            if !similar {
                failed.similarity += 1;
            }

            if long_lived && entropy_ok && length_ok && similar {
                passing.insert(name.clone());
            }
        }

        // Flag every occurrence; names outside any multi-visit group get
        // an explicit false.
        for cookie in record.cookies.iter_mut() {
            cookie.is_potential_identifier = Some(passing.contains(&cookie.name));
        }

        // Summary bucketed by classification category.
        let mut by_category: BTreeMap<String, u64> = BTreeMap::new();
        for cookie in record.cookies.iter() {
            if cookie.is_potential_identifier == Some(true) {
                let category = cookie
                    .classification
                    .as_ref()
                    .map(|c| c.category.clone())
                    .unwrap_or_else(|| "Unknown".to_string());
                *by_category.entry(category).or_default() += 1;
            }
        }

        tracing::debug!(
            site = %record.domain,
            identifiers = passing.len(),
            failed_persistence = failed.persistent.unwrap_or(0),
            failed_entropy = failed.entropy,
            failed_length = failed.length,
            failed_similarity = failed.similarity,
            "cookie identifier gate"
        );

        let analysis = record.cookie_analysis.get_or_insert_with(Default::default);
        analysis.potential_tracking_cookies = Some(PotentialTrackingCookies {
            total: passing.len() as u64,
            by_category,
            cookie_names: passing.into_iter().collect(),
            failed_checks: failed,
        });
    }

    /// Scan request cookie headers: which hosts carried each cookie, and
    /// which of those are third parties (neither first-party nor
    /// infrastructure).
    fn analyze_sharing(&self, record: &mut SiteRecord) {
        let Some(domain_analysis) = record.domain_analysis.clone() else {
            tracing::debug!(site = %record.domain, "no domain analysis, skipping cookie sharing");
            return;
        };

        let mut all_domains: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut third_party: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

        for network in record.network_data.values() {
            for request in &network.requests {
                let Some(header) = request.cookie_header() else { continue };
                let host = request.host();
                if host.is_empty() {
                    continue;
                }
                let entry = domain_analysis.entry(&host);
                let is_first_party = entry.map(|e| e.is_first_party_domain).unwrap_or(false);
                let is_infrastructure = entry.map(|e| e.is_infrastructure()).unwrap_or(false);

                for (name, _value) in parse_cookie_header(header) {
                    all_domains.entry(name.clone()).or_default().insert(host.clone());
                    if !is_first_party && !is_infrastructure {
                        third_party.entry(name).or_default().insert(host.clone());
                    }
                }
            }
        }

        let mut receiving: BTreeSet<String> = BTreeSet::new();
        let mut shared_with_third: BTreeSet<String> = BTreeSet::new();
        let mut shared_identifiers: BTreeSet<String> = BTreeSet::new();

        for cookie in record.cookies.iter_mut() {
            match all_domains.get(&cookie.name) {
                Some(hosts) => {
                    cookie.shared_with = Some(hosts.iter().cloned().collect());
                    let tp = third_party.get(&cookie.name).filter(|t| !t.is_empty());
                    cookie.shared_with_third_parties = Some(tp.is_some());
                    if let Some(tp) = tp {
                        cookie.third_party_domains = Some(tp.iter().cloned().collect());
                        shared_with_third.insert(cookie.name.clone());
                        receiving.extend(tp.iter().cloned());
                        if cookie.is_potential_identifier == Some(true) {
                            shared_identifiers.insert(cookie.name.clone());
                        }
                    }
                }
                None => {
                    cookie.shared_with = Some(Vec::new());
                    cookie.shared_with_third_parties = Some(false);
                }
            }
        }

        let analysis = record.cookie_analysis.get_or_insert_with(Default::default);
        analysis.cookie_sharing = Some(CookieSharingSummary {
            total_cookies_shared: all_domains.len() as u64,
            cookies_shared_with_third_parties: shared_with_third.len() as u64,
            third_party_domains_receiving_cookies: receiving.into_iter().collect(),
            shared_identifiers: SharedIdentifiers {
                count: shared_identifiers.len() as u64,
                names: shared_identifiers.into_iter().collect(),
            },
        });
    }
}

impl Default for CookieAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

/// `name=value; other=x` -> pairs. Segments without `=` are skipped.
fn parse_cookie_header(header: &str) -> Vec<(String, String)> {
    header
        .split(';')
        .filter_map(|part| {
            let part = part.trim();
            let (name, value) = part.split_once('=')?;
            (!name.is_empty()).then(|| (name.to_string(), value.to_string()))
        })
        .collect()
}

/// At least one distinct pair with Ratcliff/Obershelp >= 0.6.
fn similar_but_not_identical(values: &[&str]) -> bool {
    let distinct: BTreeSet<&&str> = values.iter().collect();
    if distinct.len() < 2 {
        return false;
    }
    for i in 0..values.len() {
        for j in i + 1..values.len() {
            if values[i] == values[j] {
                continue;
            }
            if similarity::ratio(values[i], values[j]) >= similarity::SIMILARITY_THRESHOLD {
                return true;
            }
        }
    }
    false
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}
