//! Ways of finding (issue, merged PR) links inside one repository.
//!
//! [`DiscoveryStrategy::PrFirst`] lists recently closed PRs and reads the
//! closing references out of their descriptions. [`DiscoveryStrategy::IssueFirst`]
//! lists closed issues and follows each issue's timeline to the PR that
//! cross-referenced it. Both produce [`FixLink`]s for the crawler to enrich
//! and store.

use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use tokio::time::sleep;

use crate::collector::Collector;
use crate::config::{CrawlConfig, DiscoveryStrategy};
use crate::fetcher::Fetcher;
use crate::references::extract_closing_issues;
use crate::types::{Issue, PullRequest, Repository, TimelineEvent};

/// A merged pull request and the issues it closes.
#[derive(Debug, Clone)]
pub struct FixLink {
    pub pull_request: PullRequest,
    pub issue_urls: BTreeSet<String>,
}

/// Outcome of discovery for one repository.
#[derive(Debug, Clone, Default)]
pub struct Discovered {
    /// How many PRs (or issues) the listing returned.
    pub listed: usize,
    pub links: Vec<FixLink>,
}

pub async fn discover(
    strategy: DiscoveryStrategy,
    fetcher: &Fetcher,
    config: &CrawlConfig,
    repo_name: &str,
) -> Discovered {
    match strategy {
        DiscoveryStrategy::PrFirst => discover_from_pull_requests(fetcher, config, repo_name).await,
        DiscoveryStrategy::IssueFirst => discover_from_issues(fetcher, config, repo_name).await,
    }
}

/// Closed PRs of `repo_name`, most recently updated first, keeping only
/// those that were merged.
pub async fn merged_pull_requests(
    fetcher: &Fetcher,
    config: &CrawlConfig,
    repo_name: &str,
) -> Vec<PullRequest> {
    info!("Fetching merged PRs for {}...", repo_name);

    let collector = Collector::new(fetcher, config.page_delay(), config.stop_condition);
    let items = collector
        .collect("pull requests", config.pr_max_pages, |page| {
            fetcher.api_url(&format!(
                "repos/{}/pulls?state=closed&sort=updated&direction=desc&per_page={}&page={}",
                repo_name, config.pr_per_page, page
            ))
        })
        .await;

    let merged: Vec<PullRequest> = parse_items::<PullRequest>(items)
        .into_iter()
        .filter(PullRequest::is_merged)
        .collect();

    info!("Found total of {} merged PRs for {}", merged.len(), repo_name);
    merged
}

async fn discover_from_pull_requests(
    fetcher: &Fetcher,
    config: &CrawlConfig,
    repo_name: &str,
) -> Discovered {
    let prs = merged_pull_requests(fetcher, config, repo_name).await;
    let listed = prs.len();

    let links = prs
        .into_iter()
        .filter_map(|pr| {
            let issue_urls = extract_closing_issues(
                pr.body.as_deref(),
                repo_name,
                &fetcher.config().web_base_url,
            );
            if issue_urls.is_empty() {
                debug!("PR #{} closes no issues", pr.number);
                return None;
            }
            Some(FixLink {
                pull_request: pr,
                issue_urls,
            })
        })
        .collect();

    Discovered { listed, links }
}

async fn discover_from_issues(
    fetcher: &Fetcher,
    config: &CrawlConfig,
    repo_name: &str,
) -> Discovered {
    info!("Fetching closed issues for {}...", repo_name);

    let collector = Collector::new(fetcher, config.page_delay(), config.stop_condition);
    let items = collector
        .collect("issues", config.issue_max_pages, |page| {
            fetcher.api_url(&format!(
                "repos/{}/issues?state=closed&per_page={}&page={}",
                repo_name, config.issues_per_page, page
            ))
        })
        .await;

    let issues: Vec<Issue> = parse_items::<Issue>(items)
        .into_iter()
        .filter(|issue| !issue.is_pull_request())
        .collect();
    let listed = issues.len();

    // several issues can point at the same PR; keep one link per PR
    let mut links: Vec<FixLink> = Vec::new();
    let mut by_pr: HashMap<String, usize> = HashMap::new();

    for (i, issue) in issues.into_iter().enumerate() {
        if i > 0 && !config.pr_delay().is_zero() {
            sleep(config.pr_delay()).await;
        }

        let Some(pr_url) = closing_pull_request_url(fetcher, repo_name, issue.number).await else {
            continue;
        };

        if let Some(&slot) = by_pr.get(&pr_url) {
            links[slot].issue_urls.insert(issue.html_url);
            continue;
        }

        let Some(pr) = fetch_pull_request(fetcher, &pr_url).await else {
            continue;
        };
        if !pr.is_merged() {
            debug!("{} was never merged, skipping issue #{}", pr_url, issue.number);
            continue;
        }

        by_pr.insert(pr_url, links.len());
        links.push(FixLink {
            pull_request: pr,
            issue_urls: BTreeSet::from([issue.html_url]),
        });
    }

    Discovered { listed, links }
}

/// HTML URL of the first pull request that cross-referenced the issue.
pub async fn closing_pull_request_url(
    fetcher: &Fetcher,
    repo_name: &str,
    issue_number: u64,
) -> Option<String> {
    let url = fetcher.api_url(&format!(
        "repos/{}/issues/{}/timeline?per_page=100",
        repo_name, issue_number
    ));

    match fetcher.fetch_as::<Vec<TimelineEvent>>(&url).await {
        Ok(events) => events
            .iter()
            .find_map(|event| event.cross_referenced_pull_url())
            .map(str::to_string),
        Err(e) => {
            warn!(
                "Failed to fetch timeline for issue #{} in {}: {}",
                issue_number, repo_name, e
            );
            None
        }
    }
}

async fn fetch_pull_request(fetcher: &Fetcher, pr_html_url: &str) -> Option<PullRequest> {
    let Some((repo, number)) = parse_pull_url(pr_html_url) else {
        warn!("Unrecognised pull request URL: {}", pr_html_url);
        return None;
    };

    let url = fetcher.api_url(&format!("repos/{}/pulls/{}", repo.full_name, number));
    match fetcher.fetch_as::<PullRequest>(&url).await {
        Ok(mut pr) => {
            if pr.html_url.is_empty() {
                pr.html_url = pr_html_url.to_string();
            }
            Some(pr)
        }
        Err(e) => {
            warn!("Failed to fetch {}: {}", pr_html_url, e);
            None
        }
    }
}

/// Split `https://host/owner/repo/pull/N` into its repository and N.
pub fn parse_pull_url(url: &str) -> Option<(Repository, u64)> {
    let segments: Vec<&str> = url.trim_end_matches('/').split('/').collect();
    let pos = segments.iter().rposition(|s| *s == "pull")?;
    if pos < 2 {
        return None;
    }
    let number = segments.get(pos + 1)?.parse().ok()?;
    let repo =
        Repository::from_full_name(&format!("{}/{}", segments[pos - 2], segments[pos - 1])).ok()?;
    Some((repo, number))
}

/// Deserialize each item, dropping the ones that do not fit.
fn parse_items<T: DeserializeOwned>(items: Vec<Value>) -> Vec<T> {
    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value(item) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                debug!("Skipping malformed item: {}", e);
                None
            }
        })
        .collect()
}
