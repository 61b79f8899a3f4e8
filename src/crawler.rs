use log::{error, info, warn};
use std::collections::HashSet;
use tokio::time::sleep;

use crate::collector::Collector;
use crate::config::{CrawlConfig, HarvestConfig};
use crate::discovery::{self, FixLink};
use crate::enrich::Enricher;
use crate::error::Result;
use crate::fetcher::Fetcher;
use crate::progress::ProcessedRepoSet;
use crate::store::IssueStore;
use crate::types::{CrawlReport, FixedIssueRecord, SearchRepository};

/// Drives the crawl one repository at a time and records each finished
/// repository before moving on, so a restart resumes where it stopped.
pub struct Crawler {
    fetcher: Fetcher,
    enricher: Enricher,
    store: IssueStore,
    progress: ProcessedRepoSet,
    config: CrawlConfig,
}

impl Crawler {
    pub fn new(
        fetcher: Fetcher,
        store: IssueStore,
        progress: ProcessedRepoSet,
        config: CrawlConfig,
    ) -> Self {
        Self {
            fetcher,
            enricher: Enricher::new(),
            store,
            progress,
            config,
        }
    }

    /// Build every collaborator from configuration. The credential is
    /// checked first so a missing token fails before any file is touched.
    pub fn from_config(config: &HarvestConfig) -> Result<Self> {
        let fetcher = Fetcher::new(config.github.clone(), config.retry.clone())?;
        let store = IssueStore::open(&config.storage.db_path, config.storage.commit_batch_size)?;
        let progress = ProcessedRepoSet::load(config.storage.progress_path.clone());
        Ok(Self::new(fetcher, store, progress, config.crawl.clone()))
    }

    pub fn store(&self) -> &IssueStore {
        &self.store
    }

    pub fn progress(&self) -> &ProcessedRepoSet {
        &self.progress
    }

    /// Candidate repository names from the search endpoint, deduplicated,
    /// in search order.
    pub async fn candidates(&self) -> Vec<String> {
        let collector = Collector::new(
            &self.fetcher,
            self.config.page_delay(),
            self.config.stop_condition,
        );
        let items = collector
            .search_repositories(
                &self.config.repository_query(),
                &self.config.sort,
                self.config.per_page,
                self.config.max_pages,
            )
            .await;

        let mut seen = HashSet::new();
        items
            .into_iter()
            .filter_map(|item| serde_json::from_value::<SearchRepository>(item).ok())
            .map(|repo| repo.full_name)
            .filter(|name| !name.is_empty() && seen.insert(name.clone()))
            .collect()
    }

    /// Crawl every candidate that is not already in the processed set.
    pub async fn run(&mut self) -> Result<CrawlReport> {
        info!(
            "Found {} previously processed repos",
            self.progress.len()
        );

        let candidates = self.candidates().await;
        info!("{} repos found", candidates.len());

        if candidates.is_empty() {
            warn!("No repositories found");
            return Ok(CrawlReport::default());
        }

        self.run_with_candidates(candidates).await
    }

    /// Crawl `candidates` in order. Each name is processed at most once.
    pub async fn run_with_candidates(&mut self, candidates: Vec<String>) -> Result<CrawlReport> {
        let mut seen = HashSet::new();
        let to_process: Vec<String> = candidates
            .iter()
            .filter(|name| !self.progress.contains(name) && seen.insert(name.as_str()))
            .cloned()
            .collect();

        let mut report = CrawlReport {
            candidates: candidates.len(),
            skipped: candidates.len() - to_process.len(),
            ..Default::default()
        };
        info!("Will process {} new repos", to_process.len());

        for repo_name in &to_process {
            match self.process_repo(repo_name).await {
                Ok(added) => report.records_added += added,
                Err(e) => {
                    // not marked processed so the next run retries it
                    error!("Failed to finish {}: {}", repo_name, e);
                    continue;
                }
            }

            self.progress.mark_processed(repo_name)?;
            report.repos_processed += 1;
            info!(
                "Progress saved. Processed {}/{} repos",
                self.progress.len(),
                candidates.len()
            );
        }

        info!("{} issue-PR pairs added", report.records_added);
        Ok(report)
    }

    /// Discover, enrich and store every fix in one repository. Returns the
    /// number of new records. Only a failed final commit is an error.
    pub async fn process_repo(&mut self, repo_name: &str) -> Result<usize> {
        info!("Processing repo: {}", repo_name);
        self.store.begin_repo();

        let discovered =
            discovery::discover(self.config.strategy, &self.fetcher, &self.config, repo_name).await;

        if discovered.listed == 0 {
            info!("No PRs or issues found for {}, skipping it", repo_name);
        } else {
            info!(
                "Processing {} links from {} listed entries for {}",
                discovered.links.len(),
                discovered.listed,
                repo_name
            );
        }

        for (i, link) in discovered.links.iter().enumerate() {
            if i > 0 && !self.config.pr_delay().is_zero() {
                sleep(self.config.pr_delay()).await;
            }
            self.store_link(link, repo_name).await;
        }

        let added = self.store.finish_repo()?;
        info!("{} entries for {} added", added, repo_name);
        Ok(added)
    }

    async fn store_link(&mut self, link: &FixLink, repo_name: &str) {
        let pr = &link.pull_request;
        info!(
            "PR {} links to {} issues",
            pr.number,
            link.issue_urls.len()
        );

        let enrichment = self.enricher.enrich(&self.fetcher, pr, repo_name).await;

        for issue_url in &link.issue_urls {
            let record = FixedIssueRecord {
                issue_url: issue_url.clone(),
                repo_name: repo_name.to_string(),
                pull_request_url: pr.html_url.clone(),
                languages: enrichment.languages.clone(),
                before_code_url: enrichment.before_code_url.clone(),
                after_code_url: enrichment.after_code_url.clone(),
                affected_files: enrichment.affected_files.clone(),
            };

            if let Err(e) = self.store.upsert(&record) {
                error!("Database error: {} for issue {}", e, issue_url);
            }
        }
    }
}
