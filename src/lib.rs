//! # crawlsight
//!
//! A post-crawl web privacy analysis engine.
//!
//! `crawlsight` enriches per-site capture records produced by a crawler
//! (cookies across visits, DOM storage snapshots, network request logs)
//! with privacy classifications: first-party vs third-party vs
//! infrastructure domains, tracker status via filter lists and a tracker
//! knowledge base, CNAME-cloaking detection through DNS chain
//! resolution, likely-identifier flags from persistence/entropy/
//! similarity heuristics, and third-party sharing evidence found in
//! outbound request URLs and bodies.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use crawlsight::base::EngineConfig;
//! use crawlsight::pipeline::Pipeline;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = EngineConfig::new("data");
//!     let pipeline = Pipeline::new(config).await?;
//!     let summary = pipeline.run("data/crawler_data".as_ref(), None).await?;
//!     println!("analyzed {} sites", summary.analyzed);
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`base`] - Engine error and configuration types
//! - [`record`] - The per-site capture record and its enrichment model
//! - [`psl`] - Public-suffix index and registrable-base computation
//! - [`dns`] - CNAME/A resolution with dual persisted TTL caches
//! - [`filters`] - AdBlock-style filter-rule matching
//! - [`trackerdb`] - Tracker categorization knowledge base
//! - [`cookiedb`] - Cookie knowledge base and lookup collaborator boundary
//! - [`analyzers`] - The domain, cookie, storage, and classifier passes
//! - [`indices`] - The shared read-mostly index bundle
//! - [`pipeline`] - Capture discovery and the bounded worker pool
//!
//! ## Failure philosophy
//!
//! Components recover locally whenever a safe empty answer exists: DNS
//! errors become empty chains, lookup misses become "no evidence", and
//! corrupt caches start empty. Only missing reference data at startup
//! aborts the run. The engine never guesses tracker status; unresolved
//! means "no evidence", never "tracker".

pub mod analyzers;
pub mod base;
pub mod cookiedb;
pub mod dns;
pub mod filters;
pub mod indices;
pub mod pipeline;
pub mod psl;
pub mod record;
pub mod trackerdb;
