//! Storage Analyzer
//!
//! Applies the identifier gate to localStorage/sessionStorage keys across
//! visits and scans outbound requests for storage keys and values, to
//! surface identifiers minted in DOM storage and exfiltrated to third
//! parties.
//!
//! Unlike the cookie gate, criteria here are evaluated in sequence and an
//! item stops at its first failure, so each failure counter records the
//! criterion that actually eliminated the item. sessionStorage items can
//! never pass: they fail persistence by construction.

use std::collections::{BTreeMap, BTreeSet};

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use super::similarity;
use crate::base::EngineConfig;
use crate::record::{
    FailedChecks, ItemNames, PotentialIdentifiers, SharedWith, SiteRecord, StorageAnalysis,
    StorageItem, StorageItemAnalysis, StoragePerformance,
};

/// Confidence assigned to an item that passes the identifier gate.
pub const GATE_CONFIDENCE: f64 = 0.8;
/// Confidence boost when a flagged identifier is also shared.
pub const SHARING_BOOST: f64 = 0.2;
/// Minimum key/value length considered in the sharing scan.
pub const MIN_SHARED_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum StorageKind {
    Local,
    Session,
}

impl StorageKind {
    fn label(self) -> &'static str {
        match self {
            StorageKind::Local => "localStorage",
            StorageKind::Session => "sessionStorage",
        }
    }
}

struct SharingInfo {
    domains: BTreeSet<String>,
    categories: BTreeSet<String>,
    organizations: BTreeSet<String>,
    infrastructure_only: bool,
}

impl Default for SharingInfo {
    fn default() -> Self {
        Self {
            domains: BTreeSet::new(),
            categories: BTreeSet::new(),
            organizations: BTreeSet::new(),
            // Holds until a non-infrastructure destination shows up.
            infrastructure_only: true,
        }
    }
}

pub struct StorageAnalyzer<'a> {
    config: &'a EngineConfig,
}

impl<'a> StorageAnalyzer<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Self { config }
    }

    pub fn analyze(&self, record: &mut SiteRecord) {
        self.mark_persistence(record);

        let (passing, failed, mut performance) = self.apply_identifier_gate(record);
        let (key_sharing, value_sharing) = self.scan_sharing(record);

        self.annotate_items(record, &passing, &key_sharing, &value_sharing);

        let mut local_names: Vec<String> = passing
            .iter()
            .filter(|(kind, _)| *kind == StorageKind::Local)
            .map(|(_, key)| key.clone())
            .collect();
        local_names.sort();
        let mut session_names: Vec<String> = passing
            .iter()
            .filter(|(kind, _)| *kind == StorageKind::Session)
            .map(|(_, key)| key.clone())
            .collect();
        session_names.sort();

        performance.simplified_by_key.retain(|_, count| *count > 0);

        record.storage_analysis = Some(StorageAnalysis {
            analyzed_at: OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default(),
            potential_identifiers: PotentialIdentifiers {
                total: (local_names.len() + session_names.len()) as u64,
                local_storage: local_names.len() as u64,
                session_storage: session_names.len() as u64,
                item_names: ItemNames {
                    local_storage: local_names,
                    session_storage: session_names,
                },
            },
            failed_checks: failed,
            performance,
        });
    }

    /// localStorage persists by definition; sessionStorage never does.
    fn mark_persistence(&self, record: &mut SiteRecord) {
        let mut local = 0usize;
        let mut session = 0usize;
        for visit in record.storage.values_mut() {
            for item in &mut visit.local_storage {
                item.persistent = Some(true);
                item.is_potential_identifier = Some(false);
                local += 1;
            }
            for item in &mut visit.session_storage {
                item.persistent = Some(false);
                item.is_potential_identifier = Some(false);
                session += 1;
            }
        }
        tracing::debug!(
            site = %record.domain,
            local_storage = local,
            session_storage = session,
            "marked storage persistence"
        );
    }

    /// Gate each `(storage_type, key)` seen in at least two visits.
    fn apply_identifier_gate(
        &self,
        record: &SiteRecord,
    ) -> (BTreeSet<(StorageKind, String)>, FailedChecks, StoragePerformance) {
        // (kind, key) -> values across visits, in visit order.
        let mut values_by_key: BTreeMap<(StorageKind, String), Vec<String>> = BTreeMap::new();
        for visit in record.storage.values() {
            for (kind, items) in [
                (StorageKind::Local, &visit.local_storage),
                (StorageKind::Session, &visit.session_storage),
            ] {
                for item in items {
                    if item.key.is_empty() {
                        continue;
                    }
                    values_by_key
                        .entry((kind, item.key.clone()))
                        .or_default()
                        .push(item.value_text());
                }
            }
        }

        let mut passing: BTreeSet<(StorageKind, String)> = BTreeSet::new();
        let mut failed = FailedChecks { session: Some(0), ..Default::default() };
        let mut performance = StoragePerformance::default();

        for ((kind, key), values) in &values_by_key {
            performance.items_analyzed += 1;
            if values.len() <= 1 {
                continue;
            }

            if *kind == StorageKind::Session {
                *failed.session.get_or_insert(0) += 1;
                continue;
            }

            let lengths: Vec<usize> = values.iter().map(|v| v.chars().count()).collect();
            let min_len = lengths.iter().copied().min().unwrap_or(0);
            let max_len = lengths.iter().copied().max().unwrap_or(0);

            if min_len < super::cookies::MIN_VALUE_LEN {
                failed.entropy += 1;
                continue;
            }
            if (max_len - min_len) as f64 / min_len as f64 > super::cookies::MAX_LENGTH_VARIATION {
                failed.length += 1;
                continue;
            }

            if !self.values_similar(key, values, &mut performance) {
                failed.similarity += 1;
                continue;
            }

            passing.insert((*kind, key.clone()));
            tracing::debug!(site = %record.domain, key = %key, storage = kind.label(), "potential tracking identifier");
        }

        (passing, failed, performance)
    }

    /// Pairwise similarity with the long-value guard: when either side
    /// exceeds the configured threshold, only the first and last 100
    /// characters are compared, and the deviation is recorded per key.
    fn values_similar(
        &self,
        key: &str,
        values: &[String],
        performance: &mut StoragePerformance,
    ) -> bool {
        let distinct: BTreeSet<&String> = values.iter().collect();
        if distinct.len() < 2 {
            return false;
        }
        let limit = self.config.simplified_comparison_threshold;

        for i in 0..values.len() {
            for j in i + 1..values.len() {
                let (a, b) = (&values[i], &values[j]);
                if a == b {
                    continue;
                }
                if a.len() > limit || b.len() > limit {
                    performance.simplified_comparisons += 1;
                    *performance.simplified_by_key.entry(key.to_string()).or_default() += 1;
                    if similarity::affix_similar(a, b) {
                        return true;
                    }
                } else {
                    performance.similarity_pairs_checked += 1;
                    if similarity::ratio(a, b) >= similarity::SIMILARITY_THRESHOLD {
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Scan request URLs and bodies for storage keys and values. Only
    /// third-party destinations count as sharing; what distinguishes
    /// harmless from interesting is the `is_infrastructure_only` rollup.
    fn scan_sharing(
        &self,
        record: &SiteRecord,
    ) -> (BTreeMap<String, SharingInfo>, BTreeMap<String, SharingInfo>) {
        let mut keys: BTreeSet<String> = BTreeSet::new();
        let mut values: BTreeSet<String> = BTreeSet::new();
        for visit in record.storage.values() {
            for item in visit.local_storage.iter().chain(visit.session_storage.iter()) {
                if item.key.chars().count() >= MIN_SHARED_LEN {
                    keys.insert(item.key.clone());
                }
                let value = item.value_text();
                if value.chars().count() >= MIN_SHARED_LEN {
                    values.insert(value);
                }
            }
        }

        let mut key_sharing: BTreeMap<String, SharingInfo> = BTreeMap::new();
        let mut value_sharing: BTreeMap<String, SharingInfo> = BTreeMap::new();
        if keys.is_empty() && values.is_empty() {
            return (key_sharing, value_sharing);
        }

        let domain_analysis = record.domain_analysis.as_ref();
        for request in record.all_requests() {
            let host = request.host();
            if host.is_empty() {
                continue;
            }
            let entry = domain_analysis.and_then(|a| a.entry(&host));
            if entry.map(|e| e.is_first_party_domain).unwrap_or(false) {
                continue;
            }

            let url = &request.url;
            let body = request.post_data_text();

            for key in &keys {
                if url.contains(key.as_str()) || body.contains(key.as_str()) {
                    accumulate(key_sharing.entry(key.clone()).or_default(), &host, entry);
                }
            }
            for value in &values {
                if url.contains(value.as_str()) || body.contains(value.as_str()) {
                    accumulate(value_sharing.entry(value.clone()).or_default(), &host, entry);
                }
            }
        }

        (key_sharing, value_sharing)
    }

    /// Attach per-item analysis objects: identifier flags, confidence,
    /// and sharing metadata.
    fn annotate_items(
        &self,
        record: &mut SiteRecord,
        passing: &BTreeSet<(StorageKind, String)>,
        key_sharing: &BTreeMap<String, SharingInfo>,
        value_sharing: &BTreeMap<String, SharingInfo>,
    ) {
        for visit in record.storage.values_mut() {
            for (kind, items) in [
                (StorageKind::Local, &mut visit.local_storage),
                (StorageKind::Session, &mut visit.session_storage),
            ] {
                for item in items.iter_mut() {
                    annotate_item(item, kind, passing, key_sharing, value_sharing);
                }
            }
        }
    }
}

fn accumulate(
    info: &mut SharingInfo,
    host: &str,
    entry: Option<&crate::record::DomainEntry>,
) {
    info.domains.insert(host.to_string());
    if let Some(entry) = entry {
        info.categories.extend(entry.categories.iter().cloned());
        info.organizations.extend(entry.organizations.iter().cloned());
        if !entry.is_infrastructure() {
            info.infrastructure_only = false;
        }
    } else {
        // Unclassified destination: cannot be called infrastructure.
        info.infrastructure_only = false;
    }
}

fn annotate_item(
    item: &mut StorageItem,
    kind: StorageKind,
    passing: &BTreeSet<(StorageKind, String)>,
    key_sharing: &BTreeMap<String, SharingInfo>,
    value_sharing: &BTreeMap<String, SharingInfo>,
) {
    let is_identifier = passing.contains(&(kind, item.key.clone()));
    item.is_potential_identifier = Some(is_identifier);

    let mut analysis = StorageItemAnalysis::default();
    if is_identifier {
        analysis.confidence = Some(GATE_CONFIDENCE);
        analysis.reasons.push(
            "Persistent across visits with similar high-entropy values".to_string(),
        );
    }

    let value = item.value_text();
    let key_hit = key_sharing.get(&item.key);
    let value_hit = value_sharing.get(&value);

    if key_hit.is_none() && value_hit.is_none() {
        item.analysis = Some(analysis);
        return;
    }

    analysis.is_shared = true;
    let mut shared = SharedWith { is_infrastructure_only: true, ..Default::default() };
    for (marker, hit) in [("key", key_hit), ("value", value_hit)] {
        let Some(info) = hit else { continue };
        shared.domains.extend(info.domains.iter().cloned());
        shared.categories.extend(info.categories.iter().cloned());
        shared.organizations.extend(info.organizations.iter().cloned());
        shared.is_infrastructure_only &= info.infrastructure_only;
        shared.shared_by.push(marker.to_string());
    }
    dedup_sorted(&mut shared.domains);
    dedup_sorted(&mut shared.categories);
    dedup_sorted(&mut shared.organizations);

    if is_identifier {
        let boosted = (analysis.confidence.unwrap_or(0.0) + SHARING_BOOST).min(1.0);
        analysis.confidence = Some(boosted);
        if shared.shared_by.iter().any(|s| s == "key") {
            analysis.reasons.push("Key shared with third parties".to_string());
        }
        if shared.shared_by.iter().any(|s| s == "value") {
            analysis.reasons.push("Value shared with third parties".to_string());
        }
    }

    analysis.shared_with = Some(shared);
    item.analysis = Some(analysis);
}

fn dedup_sorted(values: &mut Vec<String>) {
    values.sort();
    values.dedup();
}
