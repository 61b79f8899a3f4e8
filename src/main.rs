use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use log::info;

use fixed_issues_harvester::{Crawler, DiscoveryStrategy, ExportOutcome, HarvestConfig, IssueStore};

#[derive(Debug, Parser)]
#[command(
    name = "fixed-issues-harvester",
    version,
    about = "Collect closed issues and the merged PRs that fixed them"
)]
struct Cli {
    /// JSON config file; unspecified fields use defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database path
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    crawl: CrawlArgs,
}

#[derive(Debug, clap::Args)]
struct CrawlArgs {
    /// Resume file listing finished repositories
    #[arg(long)]
    progress: Option<PathBuf>,

    #[arg(long, value_enum)]
    strategy: Option<StrategyArg>,

    /// Maximum number of repository search pages
    #[arg(long)]
    max_pages: Option<u32>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Write every non-empty table to <table>.csv
    Export {
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StrategyArg {
    PrFirst,
    IssueFirst,
}

impl From<StrategyArg> for DiscoveryStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::PrFirst => DiscoveryStrategy::PrFirst,
            StrategyArg::IssueFirst => DiscoveryStrategy::IssueFirst,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => HarvestConfig::from_file(path)?,
        None => HarvestConfig::default(),
    };
    if let Some(db) = cli.db {
        config.storage.db_path = db;
    }

    match cli.command {
        Some(Command::Export { out }) => export(&config, out),
        None => {
            if let Some(progress) = cli.crawl.progress {
                config.storage.progress_path = progress;
            }
            if let Some(strategy) = cli.crawl.strategy {
                config.crawl.strategy = strategy.into();
            }
            if let Some(max_pages) = cli.crawl.max_pages {
                config.crawl.max_pages = max_pages;
            }
            crawl(&config).await
        }
    }
}

async fn crawl(config: &HarvestConfig) -> anyhow::Result<()> {
    info!("Starting crawl ({:?})", config.crawl.strategy);

    let mut crawler = Crawler::from_config(config)?;
    let report = crawler.run().await.context("crawl aborted")?;

    println!(
        "\n{} issue-PR pairs added ({} repos processed, {} already done)",
        report.records_added, report.repos_processed, report.skipped
    );
    println!("\n{}", crawler.store().summary()?);
    Ok(())
}

fn export(config: &HarvestConfig, out: PathBuf) -> anyhow::Result<()> {
    let store = IssueStore::open(&config.storage.db_path, config.storage.commit_batch_size)
        .with_context(|| format!("opening {}", config.storage.db_path.display()))?;

    for outcome in store.export_csv(&out)? {
        match outcome {
            ExportOutcome::Written { table, path, rows } => {
                println!("Exported {} ({} rows) to {}", table, rows, path.display())
            }
            ExportOutcome::SkippedEmpty { table } => {
                println!("Skipped {}, it was empty", table)
            }
        }
    }
    Ok(())
}
