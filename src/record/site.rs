use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::base::EngineError;
use crate::record::analysis::{CookieAnalysis, DomainAnalysis, StorageAnalysis, StorageItemAnalysis};

/// Visit ids are opaque labels ("1", "2", sometimes "0"). Nothing in the
/// engine assumes specific values, only that cross-visit comparisons need
/// at least two distinct labels.
pub type VisitId = String;

/// A per-site capture record, enriched in place by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteRecord {
    /// Registrable host of the site under test.
    pub domain: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,

    #[serde(default, skip_serializing_if = "CookieSet::is_empty")]
    pub cookies: CookieSet,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub storage: BTreeMap<VisitId, VisitStorage>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub network_data: BTreeMap<VisitId, VisitNetwork>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_analysis: Option<DomainAnalysis>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookie_analysis: Option<CookieAnalysis>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_analysis: Option<StorageAnalysis>,

    /// Fields owned by external collaborators (`fingerprinting`,
    /// `banner_analysis`, screenshot output, ...) survive re-save here.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl SiteRecord {
    /// Load a record from disk and normalize the cookie layout.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let text = fs::read_to_string(path).map_err(|e| EngineError::io(path, e))?;
        let mut record: SiteRecord = serde_json::from_str(&text)
            .map_err(|e| EngineError::MalformedRecord { path: path.to_path_buf(), source: e })?;
        record.cookies.normalize();
        Ok(record)
    }

    /// Save the record atomically (write `<path>.tmp`, then rename).
    pub fn save(&self, path: &Path) -> Result<(), EngineError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| EngineError::io(path, std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| EngineError::io(&tmp, e))?;
        fs::rename(&tmp, path).map_err(|e| EngineError::io(path, e))
    }

    /// Whether every enrichment field is already present.
    pub fn is_enriched(&self) -> bool {
        self.domain_analysis.is_some()
            && self.cookie_analysis.is_some()
            && self.storage_analysis.is_some()
    }

    /// Every request across all visits, in visit order.
    pub fn all_requests(&self) -> impl Iterator<Item = &Request> {
        self.network_data.values().flat_map(|v| v.requests.iter())
    }
}

/// The two cookie layouts the crawler has emitted over time.
///
/// `Flat` captures are normalized to `ByVisit` under the label `"1"` at
/// load time; downstream code only ever sees the visit-keyed form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CookieSet {
    ByVisit(BTreeMap<VisitId, Vec<Cookie>>),
    Flat(Vec<Cookie>),
}

impl Default for CookieSet {
    fn default() -> Self {
        CookieSet::ByVisit(BTreeMap::new())
    }
}

impl CookieSet {
    pub fn is_empty(&self) -> bool {
        match self {
            CookieSet::ByVisit(map) => map.is_empty(),
            CookieSet::Flat(list) => list.is_empty(),
        }
    }

    /// Fold the flat layout into a single visit `"1"`.
    pub fn normalize(&mut self) {
        if let CookieSet::Flat(list) = self {
            let mut map = BTreeMap::new();
            map.insert("1".to_string(), std::mem::take(list));
            *self = CookieSet::ByVisit(map);
        }
    }

    pub fn by_visit(&self) -> &BTreeMap<VisitId, Vec<Cookie>> {
        match self {
            CookieSet::ByVisit(map) => map,
            CookieSet::Flat(_) => {
                // Loaders normalize before handing the record out.
                static EMPTY: std::sync::OnceLock<BTreeMap<VisitId, Vec<Cookie>>> =
                    std::sync::OnceLock::new();
                EMPTY.get_or_init(BTreeMap::new)
            }
        }
    }

    pub fn by_visit_mut(&mut self) -> &mut BTreeMap<VisitId, Vec<Cookie>> {
        self.normalize();
        match self {
            CookieSet::ByVisit(map) => map,
            CookieSet::Flat(_) => unreachable!("normalized above"),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cookie> {
        self.by_visit().values().flatten()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Cookie> {
        self.by_visit_mut().values_mut().flatten()
    }
}

/// One cookie as captured, plus the enrichment the analyzers attach.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cookie {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default)]
    pub value: String,
    /// Expiry in epoch seconds; absent or in the past means session cookie.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<f64>,
    #[serde(rename = "httpOnly", default, skip_serializing_if = "Option::is_none")]
    pub http_only: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure: Option<bool>,
    #[serde(rename = "sameSite", default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,

    // Enrichment written by the cookie analyzer and classifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_until_expiry: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_first_party: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_potential_identifier: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_with: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_with_third_parties: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub third_party_domains: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<CookieClassification>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Cookie {
    /// Cookie domain with the leading dot and an optional `www.` stripped,
    /// lowercased. This is the form matched against first-party hosts.
    pub fn normalized_domain(&self) -> String {
        let d = self.domain.trim_start_matches('.');
        let d = d.strip_prefix("www.").unwrap_or(d);
        d.to_ascii_lowercase()
    }
}

/// Per-cookie classification produced by the cookie classifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieClassification {
    pub category: String,
    pub script: String,
    pub script_url: String,
    pub description: String,
    pub match_type: String,
}

/// One localStorage / sessionStorage entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageItem {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    // Enrichment written by the storage analyzer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_potential_identifier: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<StorageItemAnalysis>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl StorageItem {
    /// Storage values are occasionally structured JSON; comparisons and
    /// sharing scans run over their text form.
    pub fn value_text(&self) -> String {
        match &self.value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Storage snapshot for one visit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VisitStorage {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub local_storage: Vec<StorageItem>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub session_storage: Vec<StorageItem>,
    /// Cache-storage entries are collaborator-owned and only preserved.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub cache_storage: Value,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Network log for one visit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VisitNetwork {
    #[serde(default)]
    pub requests: Vec<Request>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// One observed network request. The engine never mutates requests; it
/// reads them to drive sharing detection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub request_type: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_data: Option<Value>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Request {
    /// The `cookie` request header, if one was captured.
    pub fn cookie_header(&self) -> Option<&str> {
        self.headers.get("cookie").and_then(Value::as_str)
    }

    /// Request body as text, empty when absent.
    pub fn post_data_text(&self) -> String {
        match &self.post_data {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        }
    }

    /// Lowercased request host.
    pub fn host(&self) -> String {
        self.domain.trim().to_ascii_lowercase()
    }
}
