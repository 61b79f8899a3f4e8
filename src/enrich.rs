use log::{debug, warn};
use std::collections::HashMap;

use crate::fetcher::Fetcher;
use crate::types::{PrFile, PullRequest};

/// Repository and PR metadata attached to every record of a PR.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Enrichment {
    pub languages: Vec<String>,
    pub before_code_url: Option<String>,
    pub after_code_url: Option<String>,
    pub affected_files: Vec<String>,
}

/// Resolves enrichment data, caching repository languages for the run.
#[derive(Debug, Default)]
pub struct Enricher {
    languages: HashMap<String, Vec<String>>,
}

impl Enricher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Languages of `repo_name`, fetched at most once per run. A failed
    /// lookup is cached as an empty list.
    pub async fn languages(&mut self, fetcher: &Fetcher, repo_name: &str) -> Vec<String> {
        if let Some(cached) = self.languages.get(repo_name) {
            return cached.clone();
        }

        let url = fetcher.api_url(&format!("repos/{}/languages", repo_name));
        let languages = match fetcher.fetch(&url).await {
            Ok(serde_json::Value::Object(map)) => map.keys().cloned().collect(),
            Ok(other) => {
                warn!("Unexpected languages payload for {}: {}", repo_name, other);
                Vec::new()
            }
            Err(e) => {
                warn!("Failed to fetch languages for {}: {}", repo_name, e);
                Vec::new()
            }
        };

        debug!("Languages used by {}: {:?}", repo_name, languages);
        self.languages
            .insert(repo_name.to_string(), languages.clone());
        languages
    }

    pub async fn enrich(
        &mut self,
        fetcher: &Fetcher,
        pr: &PullRequest,
        repo_name: &str,
    ) -> Enrichment {
        let languages = self.languages(fetcher, repo_name).await;
        let (before_code_url, after_code_url) = commit_urls(fetcher, pr, repo_name);
        let affected_files = affected_files(fetcher, pr, repo_name).await;

        Enrichment {
            languages,
            before_code_url,
            after_code_url,
            affected_files,
        }
    }
}

/// Commit URLs for the PR's base and head, read straight off the payload.
pub fn commit_urls(
    fetcher: &Fetcher,
    pr: &PullRequest,
    repo_name: &str,
) -> (Option<String>, Option<String>) {
    let repo = pr
        .base
        .as_ref()
        .and_then(|base| base.repo.as_ref())
        .and_then(|repo| repo.full_name.as_deref())
        .unwrap_or(repo_name);

    let commit = |sha: &str| fetcher.web_url(&format!("{}/commit/{}", repo, sha));
    (pr.base_sha().map(commit), pr.head_sha().map(commit))
}

/// File names touched by the PR. Any failure yields an empty list.
pub async fn affected_files(fetcher: &Fetcher, pr: &PullRequest, repo_name: &str) -> Vec<String> {
    let Some(number) = pr_number(pr) else {
        warn!("Cannot resolve PR number for {}", pr.html_url);
        return Vec::new();
    };

    let url = fetcher.api_url(&format!(
        "repos/{}/pulls/{}/files?per_page=100",
        repo_name, number
    ));

    match fetcher.fetch_as::<Vec<PrFile>>(&url).await {
        Ok(files) => files.into_iter().map(|file| file.filename).collect(),
        Err(e) => {
            warn!("Failed to fetch files for PR #{} in {}: {}", number, repo_name, e);
            Vec::new()
        }
    }
}

/// The PR number from the payload, or from the tail of its HTML URL.
fn pr_number(pr: &PullRequest) -> Option<u64> {
    if pr.number > 0 {
        return Some(pr.number);
    }
    pr.html_url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .and_then(|tail| tail.parse().ok())
}
