pub mod collector;
pub mod config;
pub mod crawler;
pub mod discovery;
pub mod enrich;
pub mod error;
pub mod fetcher;
pub mod progress;
pub mod references;
pub mod store;
pub mod types;

use std::path::PathBuf;

pub use collector::Collector;
pub use config::{
    CrawlConfig, DiscoveryStrategy, GitHubConfig, HarvestConfig, RetryPolicy, StopCondition,
    StorageConfig,
};
pub use crawler::Crawler;
pub use discovery::{Discovered, FixLink};
pub use enrich::{Enricher, Enrichment};
pub use error::{HarvestError, Result};
pub use fetcher::Fetcher;
pub use progress::ProcessedRepoSet;
pub use references::{extract_closing_issue_numbers, extract_closing_issues};
pub use store::{ExportOutcome, IssueStore, StoreSummary};
pub use types::{CrawlReport, FixedIssueRecord, PullRequest, Repository};

pub struct CrawlerBuilder {
    config: HarvestConfig,
    token: Option<String>,
}

impl CrawlerBuilder {
    pub fn new() -> Self {
        Self {
            config: HarvestConfig::default(),
            token: None,
        }
    }

    pub fn from_config(config: HarvestConfig) -> Self {
        Self {
            config,
            token: None,
        }
    }

    /// Use this credential instead of reading the environment.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn token_env_var(mut self, var_name: impl Into<String>) -> Self {
        self.config.github.token_env_var = var_name.into();
        self
    }

    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.github.api_base_url = url.into();
        self
    }

    pub fn strategy(mut self, strategy: DiscoveryStrategy) -> Self {
        self.config.crawl.strategy = strategy;
        self
    }

    pub fn max_pages(mut self, pages: u32) -> Self {
        self.config.crawl.max_pages = pages;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    /// Drop the courtesy delays between pages and PRs.
    pub fn no_delays(mut self) -> Self {
        self.config.crawl.page_delay_ms = 0;
        self.config.crawl.pr_delay_ms = 0;
        self
    }

    pub fn db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.storage.db_path = path.into();
        self
    }

    pub fn progress_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.storage.progress_path = path.into();
        self
    }

    pub fn commit_batch_size(mut self, size: usize) -> Self {
        self.config.storage.commit_batch_size = size;
        self
    }

    pub fn crawl(mut self, crawl: CrawlConfig) -> Self {
        self.config.crawl = crawl;
        self
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    pub fn build(self) -> Result<Crawler> {
        let Some(token) = self.token else {
            return Crawler::from_config(&self.config);
        };

        let fetcher = Fetcher::with_token(token, self.config.github.clone(), self.config.retry)?;
        let store = IssueStore::open(
            &self.config.storage.db_path,
            self.config.storage.commit_batch_size,
        )?;
        let progress = ProcessedRepoSet::load(self.config.storage.progress_path);
        Ok(Crawler::new(fetcher, store, progress, self.config.crawl))
    }
}

impl Default for CrawlerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
