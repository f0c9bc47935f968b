//! Domain Analyzer
//!
//! Classifies every unique host seen in a site's request log: filter-list
//! status, tracker categories and organizations, first-party vs
//! third-party, and CNAME cloaking, then rolls the per-host entries up
//! into site-level statistics.

use std::collections::BTreeMap;

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::indices::Indices;
use crate::record::{
    DomainAnalysis, DomainEntry, DomainStatistics, SiteRecord, TrackingMethod,
};
use crate::trackerdb::TrackerInfo;

/// Hosts with these prefixes are browser-internal; DNS never applies.
const BROWSER_SCHEMES: [&str; 5] =
    ["chrome-extension://", "chrome://", "edge://", "brave://", "about:"];

pub struct DomainAnalyzer<'a> {
    indices: &'a Indices,
}

impl<'a> DomainAnalyzer<'a> {
    pub fn new(indices: &'a Indices) -> Self {
        Self { indices }
    }

    /// Analyze every unique request host and attach `domain_analysis`.
    pub async fn analyze(&self, record: &mut SiteRecord) {
        let main_domain = crate::psl::normalize_host(&record.domain);

        // Count requests per host across all visits.
        let mut request_counts: BTreeMap<String, u64> = BTreeMap::new();
        for request in record.all_requests() {
            let host = request.host();
            if host.is_empty() {
                continue;
            }
            *request_counts.entry(host).or_default() += 1;
        }

        tracing::debug!(
            site = %main_domain,
            domains = request_counts.len(),
            "analyzing request hosts"
        );

        let mut entries = Vec::with_capacity(request_counts.len());
        for (host, count) in &request_counts {
            entries.push(self.analyze_host(&main_domain, host, *count).await);
        }

        // Most-contacted hosts first; name breaks ties so reruns are
        // byte-identical.
        entries.sort_by(|a, b| {
            b.request_count.cmp(&a.request_count).then_with(|| a.domain.cmp(&b.domain))
        });

        let statistics = self.collect_statistics(&entries);
        record.domain_analysis = Some(DomainAnalysis {
            analyzed_at: OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default(),
            domains: entries,
            statistics,
        });
    }

    /// Classify a single host against the site under test.
    async fn analyze_host(&self, main_domain: &str, host: &str, request_count: u64) -> DomainEntry {
        let mut entry = DomainEntry {
            domain: host.to_string(),
            request_count,
            is_first_party_domain: false,
            filter_match: false,
            is_tracker: false,
            tracking_method: None,
            cname_cloaking: false,
            categories: Vec::new(),
            organizations: Vec::new(),
            cname_chain: Vec::new(),
            analysis_notes: Vec::new(),
        };

        // Filter lists are the strongest evidence.
        if let Some(hit) = self.indices.filters.matches(host) {
            entry.filter_match = true;
            entry.is_tracker = true;
            entry.tracking_method = Some(TrackingMethod::FilterList);
            entry.analysis_notes.push(format!("Domain found in {}: {}", hit.list, hit.rule));
        }

        // Knowledge-base categorization.
        let host_info = self.indices.trackers.categorize(host);
        if let Some(info) = &host_info {
            entry.categories = info.categories.iter().cloned().collect();
            entry.organizations = info.organizations.iter().cloned().collect();
            if info.has_tracking_category() {
                entry.is_tracker = true;
                if entry.tracking_method.is_none() {
                    entry.tracking_method = Some(TrackingMethod::CategorizedTracker);
                }
                entry.analysis_notes.push(format!(
                    "Domain categorized as {} by the tracker knowledge base",
                    entry.categories.join(", ")
                ));
            }
        }

        // First-party determination: PSL relation, then organizational
        // overlap with the site under test.
        let main_info = self.indices.trackers.categorize(main_domain);
        if self.indices.psl.are_related(main_domain, host) {
            entry.is_first_party_domain = true;
            entry.analysis_notes.push("FIRST-PARTY: Domain related by name structure".to_string());
        } else if let (Some(info), Some(main)) = (&host_info, &main_info) {
            if let Some(org) =
                info.organizations.iter().find(|org| main.organizations.contains(*org))
            {
                entry.is_first_party_domain = true;
                entry.analysis_notes.push(format!(
                    "Domain belongs to same organization ({org}) as main site"
                ));
            }
        }

        if !is_browser_internal(host) {
            self.check_cname_cloaking(&mut entry, main_info.as_ref()).await;
        }

        entry
    }

    /// Walk the CNAME chain looking for first-party hosts that resolve to
    /// third-party trackers.
    async fn check_cname_cloaking(&self, entry: &mut DomainEntry, main_info: Option<&TrackerInfo>) {
        let chain = self.indices.dns.cname_chain(&entry.domain).await;
        if chain.is_empty() {
            return;
        }
        entry.cname_chain = chain.clone();

        for cname in &chain {
            if let Some(hit) = self.indices.filters.matches(cname) {
                entry.analysis_notes.push(format!(
                    "CNAME chain member {cname} found in {}: {}",
                    hit.list, hit.rule
                ));
                if entry.is_first_party_domain {
                    entry.cname_cloaking = true;
                    entry.analysis_notes.push(
                        "CNAME CLOAKING DETECTED: First-party domain using tracker in CNAME chain"
                            .to_string(),
                    );
                }
            }

            let Some(info) = self.indices.trackers.categorize(cname) else { continue };
            let foreign = !info.organizations.is_empty()
                && !main_info.map(|m| info.shares_organization(m)).unwrap_or(false);
            if !foreign {
                continue;
            }
            entry.analysis_notes.push(format!(
                "CNAME chain member {cname} belongs to different organization ({})",
                info.organizations.iter().cloned().collect::<Vec<_>>().join(", ")
            ));

            if entry.is_first_party_domain && info.has_tracking_category() {
                entry.cname_cloaking = true;
                entry.is_tracker = true;
                if entry.tracking_method.is_none() {
                    entry.tracking_method = Some(TrackingMethod::OrganizationDifference);
                }
                entry.analysis_notes.push(format!(
                    "CNAME CLOAKING DETECTED: First-party domain using {} service in CNAME chain",
                    info.tracking_categories().join(", ")
                ));
            }
        }
    }

    fn collect_statistics(&self, entries: &[DomainEntry]) -> DomainStatistics {
        let mut stats = DomainStatistics {
            total_domains: entries.len() as u64,
            ..Default::default()
        };
        stats.first_party.clean = Some(0);
        stats.third_party.infrastructure = Some(0);
        stats.third_party.other = Some(0);

        for entry in entries {
            if entry.filter_match {
                stats.filter_matches += 1;
            }

            if entry.cname_cloaking {
                stats.cname_cloaking.total += 1;
                for cname in &entry.cname_chain {
                    if let Some(info) = self.indices.trackers.categorize(cname) {
                        for org in &info.organizations {
                            *stats
                                .cname_cloaking
                                .trackers_using_cloaking
                                .entry(org.clone())
                                .or_default() += 1;
                        }
                    }
                }
            }

            // A host that cloaks a tracker counts as one even when it
            // carries no tracker evidence of its own.
            let tracking_host = entry.is_tracker || entry.cname_cloaking;
            if entry.is_first_party_domain {
                stats.first_party.total += 1;
                if tracking_host {
                    stats.first_party.trackers.total += 1;
                    if entry.cname_cloaking {
                        stats.first_party.trackers.cloaked += 1;
                    } else {
                        stats.first_party.trackers.direct += 1;
                    }
                } else {
                    *stats.first_party.clean.get_or_insert(0) += 1;
                }
            } else {
                stats.third_party.total += 1;
                if entry.is_infrastructure() {
                    *stats.third_party.infrastructure.get_or_insert(0) += 1;
                } else if tracking_host {
                    stats.third_party.trackers.total += 1;
                    if entry.cname_cloaking {
                        stats.third_party.trackers.cloaked += 1;
                    } else {
                        stats.third_party.trackers.direct += 1;
                    }
                } else {
                    *stats.third_party.other.get_or_insert(0) += 1;
                }
            }

            for category in &entry.categories {
                *stats.categories.entry(category.clone()).or_default() += 1;
            }
            for org in &entry.organizations {
                *stats.organizations.entry(org.clone()).or_default() += 1;
            }

            if entry.is_tracker {
                stats.trackers.total += 1;
                match entry.tracking_method {
                    Some(TrackingMethod::FilterList) => stats.trackers.filter_list_matches += 1,
                    Some(TrackingMethod::CategorizedTracker) => stats.trackers.category_based += 1,
                    Some(TrackingMethod::OrganizationDifference) => {
                        stats.trackers.organization_based += 1
                    }
                    None => {}
                }
            }
        }

        stats
    }
}

fn is_browser_internal(host: &str) -> bool {
    BROWSER_SCHEMES.iter().any(|scheme| host.starts_with(scheme))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cookiedb::CookieKnowledgeBase;
    use crate::dns::StaticResolve;
    use crate::filters::{FilterIndex, FilterList};
    use crate::psl::PublicSuffixIndex;
    use crate::trackerdb::{info, TrackerDb};
    use std::sync::Arc;

    fn indices(resolver: StaticResolve) -> Indices {
        Indices::from_parts(
            PublicSuffixIndex::from_suffixes(["com", "net", "example"]),
            FilterIndex::from_lists(vec![FilterList::parse(
                "Easy Privacy",
                "||doubleclick.net^\n||trkr.example^",
            )]),
            Box::new(TrackerDb::from_entries([
                ("doubleclick.net".to_string(), info(&["Advertising"], &["Google"])),
                ("cdnhost.net".to_string(), info(&["CDN"], &["EdgeCo"])),
                ("trkr.example".to_string(), info(&["Analytics"], &["Trackster"])),
            ])),
            CookieKnowledgeBase::ephemeral(),
            Arc::new(resolver),
        )
    }

    fn record_with_requests(domain: &str, hosts: &[&str]) -> SiteRecord {
        let requests: Vec<serde_json::Value> = hosts
            .iter()
            .map(|h| serde_json::json!({"url": format!("https://{h}/"), "domain": h}))
            .collect();
        serde_json::from_value(serde_json::json!({
            "domain": domain,
            "network_data": {"1": {"requests": requests}},
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_direct_filter_match() {
        let idx = indices(StaticResolve::new());
        let mut record = record_with_requests("plushbeds.com", &["doubleclick.net"]);
        DomainAnalyzer::new(&idx).analyze(&mut record).await;

        let analysis = record.domain_analysis.unwrap();
        let entry = analysis.entry("doubleclick.net").unwrap();
        assert!(entry.filter_match);
        assert!(entry.is_tracker);
        assert_eq!(entry.tracking_method, Some(TrackingMethod::FilterList));
        assert!(!entry.is_first_party_domain);
    }

    #[tokio::test]
    async fn test_cname_cloaking_detected() {
        let resolver =
            StaticResolve::new().with_cname("dnklry.plushbeds.com", "something.trkr.example");
        let idx = indices(resolver);
        let mut record = record_with_requests("plushbeds.com", &["dnklry.plushbeds.com"]);
        DomainAnalyzer::new(&idx).analyze(&mut record).await;

        let analysis = record.domain_analysis.unwrap();
        let entry = analysis.entry("dnklry.plushbeds.com").unwrap();
        assert!(entry.is_first_party_domain);
        assert_eq!(entry.cname_chain, vec!["something.trkr.example"]);
        assert!(entry.cname_cloaking);
        assert!(entry
            .analysis_notes
            .iter()
            .any(|n| n.contains("CNAME CLOAKING DETECTED")));
        assert_eq!(analysis.statistics.cname_cloaking.total, 1);
    }

    #[tokio::test]
    async fn test_third_party_cname_is_not_cloaking() {
        let resolver = StaticResolve::new().with_cname("ads.other.com", "x.trkr.example");
        let idx = indices(resolver);
        let mut record = record_with_requests("plushbeds.com", &["ads.other.com"]);
        DomainAnalyzer::new(&idx).analyze(&mut record).await;

        let entry = record.domain_analysis.unwrap();
        let entry = entry.entry("ads.other.com").unwrap();
        assert!(!entry.is_first_party_domain);
        assert!(!entry.cname_cloaking);
        // The chain itself is still recorded as evidence.
        assert_eq!(entry.cname_chain, vec!["x.trkr.example"]);
    }

    #[tokio::test]
    async fn test_request_counts_match_log() {
        let idx = indices(StaticResolve::new());
        let mut record: SiteRecord = serde_json::from_value(serde_json::json!({
            "domain": "shop.example",
            "network_data": {
                "1": {"requests": [
                    {"url": "https://shop.example/", "domain": "shop.example"},
                    {"url": "https://shop.example/a", "domain": "shop.example"},
                    {"url": "https://doubleclick.net/px", "domain": "doubleclick.net"}
                ]},
                "2": {"requests": [
                    {"url": "https://shop.example/", "domain": "shop.example"}
                ]}
            },
        }))
        .unwrap();
        DomainAnalyzer::new(&idx).analyze(&mut record).await;

        let analysis = record.domain_analysis.unwrap();
        let total: u64 = analysis.domains.iter().map(|d| d.request_count).sum();
        assert_eq!(total, 4);
        assert_eq!(analysis.entry("shop.example").unwrap().request_count, 3);
        assert_eq!(analysis.statistics.total_domains, 2);
    }

    #[tokio::test]
    async fn test_organization_overlap_is_first_party() {
        let idx = Indices::from_parts(
            PublicSuffixIndex::from_suffixes(["com"]),
            FilterIndex::from_lists(vec![FilterList::parse("Easy Privacy", "||nothing.test^")]),
            Box::new(TrackerDb::from_entries([
                ("shop.com".to_string(), info(&[], &["Acme Holdings"])),
                ("shopcdn.com".to_string(), info(&["Hosting"], &["Acme Holdings"])),
            ])),
            CookieKnowledgeBase::ephemeral(),
            Arc::new(StaticResolve::new()),
        );
        let mut record = record_with_requests("shop.com", &["static.shopcdn.com"]);
        DomainAnalyzer::new(&idx).analyze(&mut record).await;

        let analysis = record.domain_analysis.unwrap();
        let entry = analysis.entry("static.shopcdn.com").unwrap();
        assert!(entry.is_first_party_domain);
        assert!(entry.analysis_notes.iter().any(|n| n.contains("same organization")));
    }

    #[tokio::test]
    async fn test_infrastructure_counted() {
        let idx = indices(StaticResolve::new());
        let mut record = record_with_requests("shop.example", &["assets.cdnhost.net"]);
        DomainAnalyzer::new(&idx).analyze(&mut record).await;

        let stats = record.domain_analysis.unwrap().statistics;
        assert_eq!(stats.third_party.infrastructure, Some(1));
        assert_eq!(stats.third_party.trackers.total, 0);
    }

    #[tokio::test]
    async fn test_browser_internal_hosts_skip_dns() {
        let idx = indices(StaticResolve::new().with_cname("chrome-extension://abc", "x.example"));
        let mut record = record_with_requests("shop.example", &["chrome-extension://abc"]);
        DomainAnalyzer::new(&idx).analyze(&mut record).await;

        let analysis = record.domain_analysis.unwrap();
        assert!(analysis.domains[0].cname_chain.is_empty());
    }
}
