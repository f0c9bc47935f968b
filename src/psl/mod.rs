//! Public Suffix List index.
//!
//! Answers "what is the registrable base of this host?" against Mozilla's
//! public suffix list. The list is kept as a cached `.dat` file and
//! refreshed from publicsuffix.org when the copy on disk is older than
//! the configured maximum age; if the refresh fails the stale copy is
//! used. With neither a cache nor a reachable origin the engine refuses
//! to start.

use std::collections::HashSet;
use std::fs;
use std::net::IpAddr;
use std::path::Path;
use std::time::SystemTime;

use crate::base::{EngineConfig, EngineError};

/// Split of a host into its registrable label and public suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSplit {
    /// Label immediately left of the matched suffix; `None` for bare
    /// suffixes and IP literals.
    pub registrable_label: Option<String>,
    /// The matched public suffix; `None` for IP literals.
    pub public_suffix: Option<String>,
}

/// In-memory index over the public suffix list.
pub struct PublicSuffixIndex {
    suffixes: HashSet<String>,
}

impl PublicSuffixIndex {
    /// Load the index, refreshing the on-disk copy when stale.
    pub async fn load(config: &EngineConfig) -> Result<Self, EngineError> {
        let cached = read_cached(&config.psl_path);
        let stale = match cache_age(&config.psl_path) {
            Some(age) => age > config.psl_max_age,
            None => true,
        };

        if !stale {
            if let Some(text) = cached {
                let index = Self::parse(&text);
                tracing::debug!(suffixes = index.len(), "using cached public suffix list");
                return Ok(index);
            }
        }

        match fetch(&config.psl_url).await {
            Ok(text) => {
                if let Some(parent) = config.psl_path.parent() {
                    let _ = fs::create_dir_all(parent);
                }
                if let Err(e) = fs::write(&config.psl_path, &text) {
                    tracing::warn!(error = %e, "could not cache public suffix list");
                }
                let index = Self::parse(&text);
                tracing::info!(suffixes = index.len(), "downloaded fresh public suffix list");
                Ok(index)
            }
            Err(reason) => match read_cached(&config.psl_path) {
                Some(text) => {
                    tracing::warn!(%reason, "PSL refresh failed, using stale cached copy");
                    Ok(Self::parse(&text))
                }
                None => Err(EngineError::PublicSuffixUnavailable { reason }),
            },
        }
    }

    /// Parse `public_suffix_list.dat` text. Lines starting with `//` are
    /// comments; everything else is a literal suffix entry.
    pub fn parse(text: &str) -> Self {
        let suffixes = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with("//"))
            .map(|l| l.to_ascii_lowercase())
            .collect();
        Self { suffixes }
    }

    /// Build an index from explicit suffixes (tests).
    pub fn from_suffixes<I, S>(suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            suffixes: suffixes.into_iter().map(|s| s.into().to_ascii_lowercase()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.suffixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.suffixes.is_empty()
    }

    /// Split a host into `(registrable_label, public_suffix)`.
    ///
    /// The match is the longest suffix from the list matching the tail of
    /// the host. Hosts that *are* a public suffix yield no label. IP
    /// literals yield neither. `www.` is not stripped; comparison is
    /// lowercased.
    pub fn split(&self, host: &str) -> HostSplit {
        let host = normalize_host(host);
        if host.is_empty() || host.parse::<IpAddr>().is_ok() {
            return HostSplit { registrable_label: None, public_suffix: None };
        }

        let labels: Vec<&str> = host.split('.').collect();
        for i in 0..labels.len() {
            let candidate = labels[i..].join(".");
            if self.suffixes.contains(&candidate) {
                let label = if i > 0 { Some(labels[i - 1].to_string()) } else { None };
                return HostSplit { registrable_label: label, public_suffix: Some(candidate) };
            }
        }

        // Unknown TLD: treat the last label as the suffix.
        if labels.len() >= 2 {
            HostSplit {
                registrable_label: Some(labels[labels.len() - 2].to_string()),
                public_suffix: Some(labels[labels.len() - 1].to_string()),
            }
        } else {
            HostSplit {
                registrable_label: None,
                public_suffix: labels.first().map(|l| l.to_string()),
            }
        }
    }

    /// Two hosts are related when both the registrable label and the
    /// public suffix match. Bare suffixes and IPs relate to nothing.
    pub fn are_related(&self, a: &str, b: &str) -> bool {
        let sa = self.split(a);
        let sb = self.split(b);
        match (&sa.registrable_label, &sb.registrable_label) {
            (Some(la), Some(lb)) => la == lb && sa.public_suffix == sb.public_suffix,
            _ => false,
        }
    }
}

/// Lowercase a host, tolerating full URLs and ports.
pub fn normalize_host(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.contains("://") {
        if let Ok(url) = url::Url::parse(trimmed) {
            if let Some(host) = url.host_str() {
                return host.to_ascii_lowercase();
            }
        }
    }
    let host = trimmed.split('/').next().unwrap_or(trimmed);
    // Strip a port, but not from IPv6 literals.
    let host = match host.rfind(':') {
        Some(idx) if !host.contains('[') && host[idx + 1..].chars().all(|c| c.is_ascii_digit()) => {
            &host[..idx]
        }
        _ => host,
    };
    host.to_ascii_lowercase()
}

fn read_cached(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok()
}

fn cache_age(path: &Path) -> Option<std::time::Duration> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    SystemTime::now().duration_since(modified).ok()
}

async fn fetch(url: &str) -> Result<String, String> {
    let response = reqwest::get(url).await.map_err(|e| e.to_string())?;
    let response = response.error_for_status().map_err(|e| e.to_string())?;
    response.text().await.map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> PublicSuffixIndex {
        PublicSuffixIndex::from_suffixes(["com", "co.uk", "uk", "dk", "github.io", "io"])
    }

    #[test]
    fn test_split_simple() {
        let split = index().split("analytics.example.co.uk");
        assert_eq!(split.registrable_label.as_deref(), Some("example"));
        assert_eq!(split.public_suffix.as_deref(), Some("co.uk"));
    }

    #[test]
    fn test_split_prefers_longest_suffix() {
        // Both "uk" and "co.uk" are entries; the longer tail wins.
        let split = index().split("shop.example.co.uk");
        assert_eq!(split.public_suffix.as_deref(), Some("co.uk"));
    }

    #[test]
    fn test_bare_public_suffix_has_no_label() {
        let split = index().split("co.uk");
        assert_eq!(split.registrable_label, None);
        assert_eq!(split.public_suffix.as_deref(), Some("co.uk"));
    }

    #[test]
    fn test_ip_splits_to_nothing() {
        let split = index().split("192.168.1.10");
        assert_eq!(split.registrable_label, None);
        assert_eq!(split.public_suffix, None);
    }

    #[test]
    fn test_unknown_tld_falls_back_to_last_label() {
        let split = index().split("example.test");
        assert_eq!(split.registrable_label.as_deref(), Some("example"));
        assert_eq!(split.public_suffix.as_deref(), Some("test"));
    }

    #[test]
    fn test_related_same_base_and_suffix() {
        let idx = index();
        assert!(idx.are_related("amazon.co.uk", "completion.amazon.co.uk"));
        assert!(idx.are_related("AMAZON.co.uk", "images-eu.amazon.CO.UK"));
        assert!(idx.are_related("test.github.io", "test.github.io"));
    }

    #[test]
    fn test_unrelated_different_suffix() {
        // Same label under a different suffix is not related.
        let idx = index();
        assert!(!idx.are_related("amazon.co.uk", "amazon.com"));
        assert!(!idx.are_related("example.dk", "example.com"));
    }

    #[test]
    fn test_unrelated_different_label() {
        let idx = index();
        assert!(!idx.are_related("amazon.co.uk", "amazonprime.co.uk"));
        assert!(!idx.are_related("amazon.co.uk", "famazon.co.uk"));
        assert!(!idx.are_related("amazon.co.uk", "amazon.co.uk.malicious.com"));
    }

    #[test]
    fn test_bare_suffix_never_related() {
        let idx = index();
        assert!(!idx.are_related("co.uk", "example.co.uk"));
        assert!(!idx.are_related("co.uk", "co.uk"));
    }

    #[test]
    fn test_ip_never_related() {
        let idx = index();
        assert!(!idx.are_related("192.168.1.10", "192.168.1.10"));
        assert!(!idx.are_related("10.0.0.1", "example.com"));
    }

    #[test]
    fn test_www_not_stripped_but_tolerated() {
        // www is just another subdomain label; relatedness still holds.
        let idx = index();
        assert!(idx.are_related("example.com", "www.example.com"));
        let split = idx.split("www.example.com");
        assert_eq!(split.registrable_label.as_deref(), Some("example"));
    }

    #[test]
    fn test_normalize_host_url_forms() {
        assert_eq!(normalize_host("https://Sub.Example.COM/path?q=1"), "sub.example.com");
        assert_eq!(normalize_host("example.com:8443"), "example.com");
        assert_eq!(normalize_host("  example.com  "), "example.com");
    }

    #[test]
    fn test_parse_skips_comments() {
        let index = PublicSuffixIndex::parse("// header\ncom\n\nco.uk\n// trailer\n");
        assert_eq!(index.len(), 2);
    }
}
