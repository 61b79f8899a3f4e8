use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{HarvestError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    pub github: GitHubConfig,
    pub retry: RetryPolicy,
    pub crawl: CrawlConfig,
    pub storage: StorageConfig,
}

impl HarvestConfig {
    /// Load a JSON config file. Missing sections fall back to defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            HarvestError::Config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Ok(serde_json::from_str(&raw)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
    pub token_env_var: String,
    pub api_base_url: String,
    /// Base for the human-facing URLs stored in records (issues, commits).
    pub web_base_url: String,
    pub user_agent: String,
    pub timeout_seconds: u64,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            token_env_var: "GITHUB_TOKEN".to_string(),
            api_base_url: "https://api.github.com".to_string(),
            web_base_url: "https://github.com".to_string(),
            user_agent: "fixed-issues-harvester/0.1.0".to_string(),
            timeout_seconds: 30,
        }
    }
}

impl GitHubConfig {
    /// Resolve the credential from the configured environment variable.
    pub fn resolve_token(&self) -> Result<String> {
        match std::env::var(&self.token_env_var) {
            Ok(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
            _ => Err(HarvestError::AuthMissing(format!(
                "{} environment variable not set",
                self.token_env_var
            ))),
        }
    }
}

/// How the fetcher reacts to rate limiting and transient server errors.
///
/// `max_retries = None` keeps retrying forever.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: Option<u32>,
    pub server_error_delay_ms: u64,
    /// Upper bound of random extra delay added to every wait.
    pub jitter_ms: u64,
    /// Cap on a single rate-limit wait, for tests and impatient runs.
    pub max_rate_limit_wait_secs: Option<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: None,
            server_error_delay_ms: 5000,
            jitter_ms: 0,
            max_rate_limit_wait_secs: None,
        }
    }
}

impl RetryPolicy {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn bounded(max_retries: u32) -> Self {
        Self {
            max_retries: Some(max_retries),
            ..Self::default()
        }
    }

    pub fn server_error_delay(&self) -> Duration {
        Duration::from_millis(self.server_error_delay_ms)
    }

    /// Whether another attempt is allowed after `retries` retries so far.
    pub fn allows_retry(&self, retries: u32) -> bool {
        self.max_retries.map_or(true, |max| retries < max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiscoveryStrategy {
    /// Walk merged PRs and parse closing references out of their bodies.
    PrFirst,
    /// Walk closed issues and follow their timeline to the closing PR.
    IssueFirst,
}

impl Default for DiscoveryStrategy {
    fn default() -> Self {
        DiscoveryStrategy::PrFirst
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopCondition {
    /// Only a failed page ends collection.
    OnError,
    /// An empty page ends collection as well.
    OnEmptyOrError,
}

impl Default for StopCondition {
    fn default() -> Self {
        StopCondition::OnError
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    pub strategy: DiscoveryStrategy,
    pub search_query: String,
    pub license: String,
    pub sort: String,
    pub per_page: u32,
    pub max_pages: u32,
    pub pr_per_page: u32,
    pub pr_max_pages: u32,
    pub issues_per_page: u32,
    pub issue_max_pages: u32,
    pub stop_condition: StopCondition,
    pub pr_delay_ms: u64,
    pub page_delay_ms: u64,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            strategy: DiscoveryStrategy::PrFirst,
            search_query: "stars:>10000".to_string(),
            license: "mit".to_string(),
            sort: "forks".to_string(),
            per_page: 100,
            max_pages: 1000,
            pr_per_page: 30,
            pr_max_pages: 3,
            issues_per_page: 100,
            issue_max_pages: 1,
            stop_condition: StopCondition::OnError,
            pr_delay_ms: 500,
            page_delay_ms: 1000,
        }
    }
}

impl CrawlConfig {
    pub fn pr_delay(&self) -> Duration {
        Duration::from_millis(self.pr_delay_ms)
    }

    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }

    /// Search qualifiers for the candidate repository query, unencoded.
    pub fn repository_query(&self) -> String {
        if self.license.is_empty() {
            self.search_query.clone()
        } else {
            format!("{} license:{}", self.search_query, self.license)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: PathBuf,
    pub progress_path: PathBuf,
    pub commit_batch_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("fixed_issues.db"),
            progress_path: PathBuf::from("progress.json"),
            commit_batch_size: 10,
        }
    }
}
