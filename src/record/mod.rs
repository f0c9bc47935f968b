//! The per-site capture record.
//!
//! One record per (profile, site) pair, produced by the crawler and
//! enriched in place by the analysis pipeline. The model is deliberately
//! tolerant: collaborator-owned fields (`banner_analysis`, OCR output,
//! fingerprinting call logs) are round-tripped untouched through
//! `serde(flatten)` extras, and the two cookie layouts the crawler has
//! historically emitted (visit-keyed map vs flat list) are normalized to
//! the visit-keyed form at load time.

mod analysis;
mod site;

pub use analysis::{
    CnameCloakingStats, CookieAnalysis, CookieSharingSummary, DetectionStats, DomainAnalysis,
    DomainEntry, DomainStatistics, FailedChecks, ItemNames, PartyStats, PotentialIdentifiers,
    PotentialTrackingCookies, SharedIdentifiers, SharedWith, StorageAnalysis, StorageItemAnalysis,
    StoragePerformance, TrackerStats, TrackingMethod, ValueConsistency,
};
pub use site::{
    Cookie, CookieClassification, CookieSet, Request, SiteRecord, StorageItem, VisitNetwork,
    VisitStorage,
};
