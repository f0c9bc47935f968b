//! Pipeline Driver
//!
//! Discovers capture files, analyzes them through the component chain
//! (domains, classification, cookies, storage — in that order, each at
//! most once per record), and writes the enriched records back. Sites
//! are processed by a bounded worker pool; the shared indices and their
//! caches are the only cross-site state.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::stream::StreamExt;

use crate::analyzers::{CookieAnalyzer, CookieClassifier, DomainAnalyzer, StorageAnalyzer};
use crate::base::{EngineConfig, EngineError};
use crate::cookiedb::{CookieLookup, NullLookup};
use crate::indices::Indices;
use crate::record::SiteRecord;

/// What happened to one capture file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Analyzed,
    /// Enrichment already present and `--force` not given.
    Skipped,
    /// Malformed record or I/O failure; the run continues.
    Failed(String),
}

/// Counts over one driver run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub analyzed: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct Pipeline {
    config: EngineConfig,
    indices: Arc<Indices>,
    lookup: Arc<dyn CookieLookup>,
}

impl Pipeline {
    /// Load every index and assemble the pipeline.
    pub async fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let indices = Arc::new(Indices::load(&config).await?);
        Ok(Self::with_indices(config, indices))
    }

    /// Assemble the pipeline around pre-built indices (tests, embedders).
    pub fn with_indices(config: EngineConfig, indices: Arc<Indices>) -> Self {
        Self { config, indices, lookup: Arc::new(NullLookup) }
    }

    /// Install a cookie lookup collaborator (the default knows nothing).
    pub fn with_lookup(mut self, lookup: Arc<dyn CookieLookup>) -> Self {
        self.lookup = lookup;
        self
    }

    pub fn indices(&self) -> &Arc<Indices> {
        &self.indices
    }

    /// Recursively collect capture files, optionally restricted to one
    /// profile subdirectory. Sorted so runs are reproducible.
    pub fn discover(&self, dir: &Path, profile: Option<&str>) -> Result<Vec<PathBuf>, EngineError> {
        let root = match profile {
            Some(profile) => dir.join(profile),
            None => dir.to_path_buf(),
        };
        if !root.is_dir() {
            return Err(EngineError::CaptureDirMissing(root));
        }

        let mut files: Vec<PathBuf> = walkdir::WalkDir::new(&root)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("json"))
            .collect();
        files.sort();
        Ok(files)
    }

    /// Analyze every capture under `dir`, then persist all caches.
    pub async fn run(&self, dir: &Path, profile: Option<&str>) -> Result<RunSummary, EngineError> {
        let files = self.discover(dir, profile)?;
        tracing::info!(files = files.len(), dir = %dir.display(), "starting analysis run");

        let mut outcomes = futures::stream::iter(files.into_iter().map(|path| {
            let indices = Arc::clone(&self.indices);
            let config = self.config.clone();
            let lookup = Arc::clone(&self.lookup);
            tokio::spawn(async move {
                let outcome = process_file(&path, &config, &indices, lookup.as_ref()).await;
                (path, outcome)
            })
        }))
        .buffer_unordered(self.config.workers.max(1));

        let mut summary = RunSummary::default();
        while let Some(joined) = outcomes.next().await {
            match joined {
                Ok((path, FileOutcome::Analyzed)) => {
                    summary.analyzed += 1;
                    tracing::debug!(file = %path.display(), "analyzed");
                }
                Ok((path, FileOutcome::Skipped)) => {
                    summary.skipped += 1;
                    tracing::debug!(file = %path.display(), "already enriched, skipped");
                }
                Ok((path, FileOutcome::Failed(reason))) => {
                    summary.failed += 1;
                    tracing::warn!(file = %path.display(), %reason, "skipping file");
                }
                Err(e) => {
                    summary.failed += 1;
                    tracing::warn!(error = %e, "analysis task panicked");
                }
            }
        }

        self.indices.persist();
        tracing::info!(
            analyzed = summary.analyzed,
            skipped = summary.skipped,
            failed = summary.failed,
            "analysis run complete"
        );
        Ok(summary)
    }

    /// Run the full component chain over one already-loaded record.
    pub async fn analyze_record(&self, record: &mut SiteRecord) {
        analyze_record(record, &self.config, &self.indices, self.lookup.as_ref()).await;
    }
}

async fn process_file(
    path: &Path,
    config: &EngineConfig,
    indices: &Indices,
    lookup: &dyn CookieLookup,
) -> FileOutcome {
    let mut record = match SiteRecord::load(path) {
        Ok(record) => record,
        Err(e) => return FileOutcome::Failed(e.to_string()),
    };

    if record.is_enriched() && !config.force {
        return FileOutcome::Skipped;
    }

    analyze_record(&mut record, config, indices, lookup).await;

    match record.save(path) {
        Ok(()) => FileOutcome::Analyzed,
        Err(e) => FileOutcome::Failed(e.to_string()),
    }
}

/// The fixed per-record component order: the classifier, cookie, and
/// storage analyzers all consume the domain analyzer's output.
async fn analyze_record(
    record: &mut SiteRecord,
    config: &EngineConfig,
    indices: &Indices,
    lookup: &dyn CookieLookup,
) {
    DomainAnalyzer::new(indices).analyze(record).await;
    let lookup = config.lookup_unknown.then_some(lookup);
    CookieClassifier::new(indices).classify(record, lookup);
    CookieAnalyzer::new().analyze(record);
    StorageAnalyzer::new(config).analyze(record);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cookiedb::CookieKnowledgeBase;
    use crate::dns::StaticResolve;
    use crate::filters::{FilterIndex, FilterList};
    use crate::psl::PublicSuffixIndex;
    use crate::trackerdb::TrackerDb;

    fn test_pipeline(data_dir: &Path) -> Pipeline {
        let indices = Indices::from_parts(
            PublicSuffixIndex::from_suffixes(["com", "net", "example"]),
            FilterIndex::from_lists(vec![FilterList::parse("Easy Privacy", "||doubleclick.net^")]),
            Box::new(TrackerDb::from_entries([])),
            CookieKnowledgeBase::ephemeral(),
            Arc::new(StaticResolve::new()),
        );
        Pipeline::with_indices(EngineConfig::new(data_dir), Arc::new(indices))
    }

    fn capture(domain: &str) -> serde_json::Value {
        serde_json::json!({
            "domain": domain,
            "cookies": {"1": [{"name": "a", "domain": domain, "value": "somevalue"}]},
            "network_data": {"1": {"requests": [
                {"url": format!("https://{domain}/"), "domain": domain}
            ]}},
        })
    }

    #[tokio::test]
    async fn test_run_enriches_and_skips() {
        let dir = tempfile::tempdir().unwrap();
        let captures = dir.path().join("crawler_data").join("profile_a");
        std::fs::create_dir_all(&captures).unwrap();
        let file = captures.join("shop.example.json");
        std::fs::write(&file, serde_json::to_string(&capture("shop.example")).unwrap()).unwrap();

        let pipeline = test_pipeline(dir.path());
        let root = dir.path().join("crawler_data");

        let summary = pipeline.run(&root, None).await.unwrap();
        assert_eq!(summary.analyzed, 1);
        assert_eq!(summary.failed, 0);

        let record = SiteRecord::load(&file).unwrap();
        assert!(record.is_enriched());

        // Second run without --force skips the already-enriched record.
        let summary = pipeline.run(&root, None).await.unwrap();
        assert_eq!(summary.analyzed, 0);
        assert_eq!(summary.skipped, 1);
    }

    #[tokio::test]
    async fn test_malformed_file_does_not_stop_run() {
        let dir = tempfile::tempdir().unwrap();
        let captures = dir.path().join("crawler_data");
        std::fs::create_dir_all(&captures).unwrap();
        std::fs::write(captures.join("broken.json"), "{not json").unwrap();
        std::fs::write(
            captures.join("ok.json"),
            serde_json::to_string(&capture("shop.example")).unwrap(),
        )
        .unwrap();

        let pipeline = test_pipeline(dir.path());
        let summary = pipeline.run(&captures, None).await.unwrap();
        assert_eq!(summary.analyzed, 1);
        assert_eq!(summary.failed, 1);
    }

    #[tokio::test]
    async fn test_profile_restriction() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("crawler_data");
        for profile in ["consent_blocker", "vanilla"] {
            let sub = root.join(profile);
            std::fs::create_dir_all(&sub).unwrap();
            std::fs::write(
                sub.join("shop.example.json"),
                serde_json::to_string(&capture("shop.example")).unwrap(),
            )
            .unwrap();
        }

        let pipeline = test_pipeline(dir.path());
        let files = pipeline.discover(&root, Some("vanilla")).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].starts_with(root.join("vanilla")));
    }

    #[tokio::test]
    async fn test_missing_directory_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = test_pipeline(dir.path());
        let result = pipeline.discover(&dir.path().join("nope"), None);
        assert!(matches!(result, Err(EngineError::CaptureDirMissing(_))));
    }
}
