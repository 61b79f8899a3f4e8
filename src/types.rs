use serde::{Deserialize, Serialize};

/// One row of the store: a closed issue and the merged PR that fixed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedIssueRecord {
    pub issue_url: String,
    pub repo_name: String,
    pub pull_request_url: String,
    pub languages: Vec<String>,
    pub before_code_url: Option<String>,
    pub after_code_url: Option<String>,
    pub affected_files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Repository {
    pub owner: String,
    pub name: String,
    pub full_name: String,
}

impl Repository {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        let owner = owner.into();
        let name = name.into();
        let full_name = format!("{}/{}", owner, name);
        Self {
            owner,
            name,
            full_name,
        }
    }

    pub fn from_full_name(full_name: &str) -> anyhow::Result<Self> {
        let parts: Vec<&str> = full_name.split('/').collect();
        if parts.len() != 2 || parts.iter().any(|p| p.is_empty()) {
            return Err(anyhow::anyhow!(
                "Invalid repository full name format. Expected 'owner/name', got: {}",
                full_name
            ));
        }
        Ok(Self::new(parts[0], parts[1]))
    }
}

/// Repository entry of a search response. Only the name is needed.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SearchRepository {
    pub full_name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CommitRef {
    pub sha: Option<String>,
    pub repo: Option<RefRepository>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RefRepository {
    pub full_name: Option<String>,
}

/// Pull request payload as returned by the list and detail endpoints.
/// Every field is optional so a sparse payload still deserializes.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PullRequest {
    pub number: u64,
    pub html_url: String,
    pub url: Option<String>,
    pub body: Option<String>,
    pub merged_at: Option<String>,
    pub base: Option<CommitRef>,
    pub head: Option<CommitRef>,
}

impl PullRequest {
    pub fn is_merged(&self) -> bool {
        self.merged_at.is_some()
    }

    pub fn base_sha(&self) -> Option<&str> {
        self.base.as_ref()?.sha.as_deref().filter(|s| !s.is_empty())
    }

    pub fn head_sha(&self) -> Option<&str> {
        self.head.as_ref()?.sha.as_deref().filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Issue {
    pub number: u64,
    pub html_url: String,
    /// Present when the "issue" is really a pull request.
    pub pull_request: Option<serde_json::Value>,
}

impl Issue {
    pub fn is_pull_request(&self) -> bool {
        self.pull_request.is_some()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TimelineEvent {
    pub event: Option<String>,
    pub source: Option<TimelineSource>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TimelineSource {
    pub issue: Option<TimelineIssue>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TimelineIssue {
    pub html_url: Option<String>,
}

impl TimelineEvent {
    /// HTML URL of the pull request behind a cross-reference event.
    pub fn cross_referenced_pull_url(&self) -> Option<&str> {
        if self.event.as_deref() != Some("cross-referenced") {
            return None;
        }
        let url = self.source.as_ref()?.issue.as_ref()?.html_url.as_deref()?;
        url.contains("/pull/").then_some(url)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PrFile {
    pub filename: String,
}

/// Outcome of a full crawl.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CrawlReport {
    pub candidates: usize,
    pub skipped: usize,
    pub repos_processed: usize,
    pub records_added: usize,
}
