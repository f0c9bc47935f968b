//! CLI driver: analyze a directory of capture files.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crawlsight::base::EngineConfig;
use crawlsight::pipeline::Pipeline;

#[derive(Debug, Parser)]
#[command(
    name = "crawlsight",
    about = "Enrich crawler capture files with privacy classifications",
    version
)]
struct Cli {
    /// Directory of capture files, one JSON record per (profile, site).
    #[arg(default_value = "data/crawler_data")]
    dir: PathBuf,

    /// Root of the reference-data layout (filters, caches, knowledge bases).
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Restrict the run to one profile subdirectory.
    #[arg(long)]
    profile: Option<String>,

    /// Concurrent site analyses. Defaults to cores minus one.
    #[arg(long)]
    workers: Option<usize>,

    /// Re-run analyses even when enrichment fields are already present.
    #[arg(long)]
    force: bool,

    /// Fetch unknown cookies through the lookup collaborator (default).
    #[arg(long, overrides_with = "no_lookup_unknown")]
    lookup_unknown: bool,

    /// Do not fetch unknown cookies; label them Unidentified.
    #[arg(long, overrides_with = "lookup_unknown")]
    no_lookup_unknown: bool,

    /// Debug-level logging.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "crawlsight=debug" } else { "crawlsight=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let lookup_unknown = cli.lookup_unknown || !cli.no_lookup_unknown;
    let mut config = EngineConfig::new(&cli.data_dir)
        .with_force(cli.force)
        .with_lookup_unknown(lookup_unknown);
    if let Some(workers) = cli.workers {
        config = config.with_workers(workers);
    }

    let pipeline = Pipeline::new(config).await.context("engine setup failed")?;

    let stats = pipeline.indices().cookies.statistics();
    tracing::info!(cookies = stats.total_cookies, "cookie knowledge base ready");

    let summary = pipeline
        .run(&cli.dir, cli.profile.as_deref())
        .await
        .context("analysis run failed")?;

    println!(
        "analyzed {} site(s), skipped {}, failed {}",
        summary.analyzed, summary.skipped, summary.failed
    );
    Ok(())
}
