//! End-to-end crawls against a scripted upstream.

use std::path::Path;

use fixed_issues_harvester::{
    CrawlConfig, Crawler, CrawlerBuilder, DiscoveryStrategy, HarvestError, IssueStore,
    ProcessedRepoSet,
};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn crawl_config(strategy: DiscoveryStrategy) -> CrawlConfig {
    CrawlConfig {
        strategy,
        max_pages: 1,
        pr_max_pages: 1,
        issue_max_pages: 1,
        page_delay_ms: 0,
        pr_delay_ms: 0,
        ..Default::default()
    }
}

fn crawler(server: &MockServer, dir: &Path, strategy: DiscoveryStrategy) -> Crawler {
    CrawlerBuilder::new()
        .token("test-token")
        .api_base_url(server.uri())
        .crawl(crawl_config(strategy))
        .db_path(dir.join("fixed_issues.db"))
        .progress_path(dir.join("progress.json"))
        .build()
        .expect("crawler")
}

async fn mount_json(server: &MockServer, route: &str, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

async fn mount_search(server: &MockServer, repos: &[&str]) {
    let items: Vec<_> = repos.iter().map(|n| json!({"full_name": n})).collect();
    mount_json(server, "/search/repositories", json!({"items": items})).await;
}

async fn requested_paths(server: &MockServer) -> Vec<String> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(|request| request.url.path().to_string())
        .collect()
}

fn merged_pr(number: u64, repo: &str, body: &str) -> serde_json::Value {
    json!({
        "number": number,
        "html_url": format!("https://github.com/{}/pull/{}", repo, number),
        "body": body,
        "merged_at": "2024-01-02T03:04:05Z",
        "base": {"sha": format!("base{}", number), "repo": {"full_name": repo}},
        "head": {"sha": format!("head{}", number)}
    })
}

#[tokio::test]
async fn test_pr_first_crawl_stores_linked_issues() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_search(&server, &["o/y"]).await;
    mount_json(
        &server,
        "/repos/o/y/pulls",
        json!([
            merged_pr(10, "o/y", "Fixes #1 and closes o/y#2"),
            merged_pr(11, "o/y", "Just a refactor"),
            merged_pr(12, "o/y", "resolves #3"),
            {"number": 13, "html_url": "https://github.com/o/y/pull/13", "body": "fixes #4", "merged_at": null}
        ]),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/repos/o/y/languages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"Rust": 900, "C": 50, "Shell": 1})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/o/y/pulls/10/files"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    mount_json(
        &server,
        "/repos/o/y/pulls/12/files",
        json!([{"filename": "src/a.rs"}, {"filename": "README.md"}]),
    )
    .await;

    let mut crawler = crawler(&server, dir.path(), DiscoveryStrategy::PrFirst);
    let report = crawler.run().await.unwrap();

    assert_eq!(report.candidates, 1);
    assert_eq!(report.repos_processed, 1);
    assert_eq!(report.records_added, 3);
    assert!(crawler.progress().contains("o/y"));

    let store = crawler.store();
    assert_eq!(store.count().unwrap(), 3);

    // the failed file list degrades to an empty list, the record survives
    let first = store
        .get("https://github.com/o/y/issues/1")
        .unwrap()
        .expect("issue 1 stored");
    assert_eq!(first.pull_request_url, "https://github.com/o/y/pull/10");
    assert_eq!(first.languages, vec!["Rust", "C", "Shell"]);
    assert_eq!(
        first.before_code_url.as_deref(),
        Some("https://github.com/o/y/commit/base10")
    );
    assert_eq!(
        first.after_code_url.as_deref(),
        Some("https://github.com/o/y/commit/head10")
    );
    assert!(first.affected_files.is_empty());

    let third = store
        .get("https://github.com/o/y/issues/3")
        .unwrap()
        .expect("issue 3 stored");
    assert_eq!(third.affected_files, vec!["src/a.rs", "README.md"]);

    // unmerged PRs and PRs without closing references produce nothing
    assert!(store.get("https://github.com/o/y/issues/4").unwrap().is_none());
    let paths = requested_paths(&server).await;
    assert!(!paths.iter().any(|p| p == "/repos/o/y/pulls/11/files"));
    assert!(!paths.iter().any(|p| p == "/repos/o/y/pulls/13/files"));
}

#[tokio::test]
async fn test_processed_repositories_are_not_requested() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    let mut done = ProcessedRepoSet::load(dir.path().join("progress.json"));
    done.mark_processed("o/x").unwrap();

    mount_search(&server, &["o/x", "o/y"]).await;
    mount_json(&server, "/repos/o/y/pulls", json!([])).await;

    let mut crawler = crawler(&server, dir.path(), DiscoveryStrategy::PrFirst);
    let report = crawler.run().await.unwrap();

    assert_eq!(report.candidates, 2);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.repos_processed, 1);

    let paths = requested_paths(&server).await;
    assert!(paths.iter().any(|p| p.starts_with("/repos/o/y/")));
    assert!(
        !paths.iter().any(|p| p.starts_with("/repos/o/x/")),
        "processed repository was requested: {:?}",
        paths
    );

    // a repository with no PRs still counts as finished
    let reloaded = ProcessedRepoSet::load(dir.path().join("progress.json"));
    assert_eq!(reloaded.names(), &["o/x".to_string(), "o/y".to_string()]);
}

#[tokio::test]
async fn test_second_run_adds_nothing() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_search(&server, &["o/y"]).await;
    mount_json(
        &server,
        "/repos/o/y/pulls",
        json!([merged_pr(10, "o/y", "Fixes #1")]),
    )
    .await;
    mount_json(&server, "/repos/o/y/languages", json!({"Go": 1})).await;
    mount_json(&server, "/repos/o/y/pulls/10/files", json!([])).await;

    let first = crawler(&server, dir.path(), DiscoveryStrategy::PrFirst)
        .run()
        .await
        .unwrap();
    assert_eq!(first.records_added, 1);

    // forget progress; the store still refuses the duplicate
    std::fs::remove_file(dir.path().join("progress.json")).unwrap();
    let mut again = crawler(&server, dir.path(), DiscoveryStrategy::PrFirst);
    let second = again.run().await.unwrap();
    assert_eq!(second.repos_processed, 1);
    assert_eq!(second.records_added, 0);
    assert_eq!(again.store().count().unwrap(), 1);
}

#[tokio::test]
async fn test_issue_first_crawl_follows_timeline() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_search(&server, &["o/z"]).await;
    mount_json(
        &server,
        "/repos/o/z/issues",
        json!([
            {"number": 1, "html_url": "https://github.com/o/z/issues/1"},
            {"number": 2, "html_url": "https://github.com/o/z/pull/2", "pull_request": {"url": "x"}},
            {"number": 3, "html_url": "https://github.com/o/z/issues/3"},
            {"number": 4, "html_url": "https://github.com/o/z/issues/4"}
        ]),
    )
    .await;
    let cross_ref = |url: &str| {
        json!([
            {"event": "labeled"},
            {"event": "cross-referenced", "source": {"issue": {"html_url": url}}}
        ])
    };
    mount_json(
        &server,
        "/repos/o/z/issues/1/timeline",
        cross_ref("https://github.com/o/z/pull/5"),
    )
    .await;
    mount_json(
        &server,
        "/repos/o/z/issues/3/timeline",
        cross_ref("https://github.com/o/z/pull/5"),
    )
    .await;
    mount_json(&server, "/repos/o/z/issues/4/timeline", json!([{"event": "closed"}])).await;
    mount_json(&server, "/repos/o/z/pulls/5", merged_pr(5, "o/z", "")).await;
    Mock::given(method("GET"))
        .and(path("/repos/o/z/pulls/5/files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"filename": "lib/x.py"}])))
        .expect(1)
        .mount(&server)
        .await;
    mount_json(&server, "/repos/o/z/languages", json!({"Python": 3})).await;

    let mut crawler = crawler(&server, dir.path(), DiscoveryStrategy::IssueFirst);
    let report = crawler.run().await.unwrap();
    assert_eq!(report.records_added, 2);

    let store = crawler.store();
    for issue in ["https://github.com/o/z/issues/1", "https://github.com/o/z/issues/3"] {
        let record = store.get(issue).unwrap().expect("stored");
        assert_eq!(record.pull_request_url, "https://github.com/o/z/pull/5");
        assert_eq!(record.affected_files, vec!["lib/x.py"]);
        assert_eq!(record.languages, vec!["Python"]);
    }

    let paths = requested_paths(&server).await;
    assert!(!paths.iter().any(|p| p == "/repos/o/z/issues/2/timeline"));
}

#[tokio::test]
async fn test_failed_languages_lookup_keeps_records() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_search(&server, &["o/y"]).await;
    mount_json(
        &server,
        "/repos/o/y/pulls",
        json!([
            merged_pr(10, "o/y", "Fixes #1"),
            merged_pr(12, "o/y", "closes #2")
        ]),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/repos/o/y/languages"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    mount_json(&server, "/repos/o/y/pulls/10/files", json!([{"filename": "a.c"}])).await;
    mount_json(&server, "/repos/o/y/pulls/12/files", json!([])).await;

    let mut crawler = crawler(&server, dir.path(), DiscoveryStrategy::PrFirst);
    let report = crawler.run().await.unwrap();
    assert_eq!(report.records_added, 2);

    let store = crawler.store();
    for issue in ["https://github.com/o/y/issues/1", "https://github.com/o/y/issues/2"] {
        let record = store.get(issue).unwrap().expect("stored");
        assert!(record.languages.is_empty());
    }
    let first = store.get("https://github.com/o/y/issues/1").unwrap().unwrap();
    assert_eq!(first.affected_files, vec!["a.c"]);

    let paths = requested_paths(&server).await;
    let lookups = paths.iter().filter(|p| *p == "/repos/o/y/languages").count();
    assert_eq!(lookups, 1);
}

#[tokio::test]
async fn test_rejected_record_does_not_stop_the_repository() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("fixed_issues.db");

    drop(IssueStore::open(&db, 10).unwrap());
    rusqlite::Connection::open(&db)
        .unwrap()
        .execute_batch(
            "CREATE TRIGGER reject_issue_2 BEFORE INSERT ON fixed_issues
             WHEN NEW.issue_url LIKE '%/issues/2'
             BEGIN SELECT RAISE(ABORT, 'constraint trouble'); END;",
        )
        .unwrap();

    mount_search(&server, &["o/y"]).await;
    mount_json(
        &server,
        "/repos/o/y/pulls",
        json!([merged_pr(10, "o/y", "Fixes #1, fixes #2 and fixes #3")]),
    )
    .await;
    mount_json(&server, "/repos/o/y/languages", json!({"Rust": 1})).await;
    mount_json(&server, "/repos/o/y/pulls/10/files", json!([])).await;

    let mut crawler = crawler(&server, dir.path(), DiscoveryStrategy::PrFirst);
    let report = crawler.run().await.unwrap();

    assert_eq!(report.repos_processed, 1);
    assert_eq!(report.records_added, 2);
    assert!(crawler.progress().contains("o/y"));

    let store = crawler.store();
    assert_eq!(store.count().unwrap(), 2);
    assert!(store.get("https://github.com/o/y/issues/1").unwrap().is_some());
    assert!(store.get("https://github.com/o/y/issues/2").unwrap().is_none());
    assert!(store.get("https://github.com/o/y/issues/3").unwrap().is_some());
}

#[tokio::test]
async fn test_duplicate_candidates_are_crawled_once() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/repos/o/y/pulls"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let mut crawler = crawler(&server, dir.path(), DiscoveryStrategy::PrFirst);
    let report = crawler
        .run_with_candidates(vec!["o/y".to_string(), "o/y".to_string()])
        .await
        .unwrap();

    assert_eq!(report.candidates, 2);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.repos_processed, 1);
    assert_eq!(crawler.progress().names(), &["o/y".to_string()]);
}

#[tokio::test]
async fn test_empty_candidate_list_does_nothing() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_search(&server, &[]).await;

    let mut crawler = crawler(&server, dir.path(), DiscoveryStrategy::PrFirst);
    let report = crawler.run().await.unwrap();

    assert_eq!(report.candidates, 0);
    assert_eq!(report.repos_processed, 0);
    assert_eq!(requested_paths(&server).await, vec!["/search/repositories"]);
}

#[tokio::test]
async fn test_missing_token_fails_before_any_work() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("fixed_issues.db");

    let result = CrawlerBuilder::new()
        .token_env_var("FIXED_ISSUES_HARVESTER_UNSET_TOKEN")
        .db_path(&db)
        .progress_path(dir.path().join("progress.json"))
        .build();

    assert!(matches!(result, Err(HarvestError::AuthMissing(_))));
    assert!(!db.exists());
}

#[test]
fn test_uncommitted_batch_is_lost_but_committed_rows_survive() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("fixed_issues.db");

    let record = |n: u32| fixed_issues_harvester::FixedIssueRecord {
        issue_url: format!("https://github.com/o/r/issues/{}", n),
        repo_name: "o/r".to_string(),
        pull_request_url: format!("https://github.com/o/r/pull/{}", n + 100),
        languages: vec!["Rust".to_string()],
        before_code_url: None,
        after_code_url: None,
        affected_files: Vec::new(),
    };

    {
        let mut store = IssueStore::open(&db, 10).unwrap();
        store.begin_repo();
        for n in 0..10 {
            assert!(store.upsert(&record(n)).unwrap());
        }
        assert_eq!(store.pending(), 0);

        for n in 10..19 {
            assert!(store.upsert(&record(n)).unwrap());
        }
        assert_eq!(store.pending(), 9);
        // dropped here without a commit, as if the process was killed
    }

    let store = IssueStore::open(&db, 10).unwrap();
    assert_eq!(store.count().unwrap(), 10);
    assert!(store.get("https://github.com/o/r/issues/9").unwrap().is_some());
    assert!(store.get("https://github.com/o/r/issues/10").unwrap().is_none());
}

#[test]
fn test_export_writes_non_empty_tables() {
    let dir = TempDir::new().unwrap();
    let mut store = IssueStore::open(dir.path().join("fixed_issues.db"), 10).unwrap();

    let outcomes = store.export_csv(dir.path().join("out")).unwrap();
    assert_eq!(
        outcomes,
        vec![fixed_issues_harvester::ExportOutcome::SkippedEmpty {
            table: "fixed_issues".to_string()
        }]
    );

    store
        .upsert(&fixed_issues_harvester::FixedIssueRecord {
            issue_url: "https://github.com/o/r/issues/1".to_string(),
            repo_name: "o/r".to_string(),
            pull_request_url: "https://github.com/o/r/pull/2".to_string(),
            languages: vec!["Rust".to_string(), "C".to_string()],
            before_code_url: Some("https://github.com/o/r/commit/a".to_string()),
            after_code_url: None,
            affected_files: vec![],
        })
        .unwrap();
    store.commit().unwrap();

    store.export_csv(dir.path().join("out")).unwrap();
    let csv = std::fs::read_to_string(dir.path().join("out").join("fixed_issues.csv")).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(
        lines[0],
        "issue_url,repo_name,pull_request_url,languages,before_code_url,after_code_url,affected_files"
    );
    assert_eq!(
        lines[1],
        "https://github.com/o/r/issues/1,o/r,https://github.com/o/r/pull/2,\"[\"\"Rust\"\",\"\"C\"\"]\",https://github.com/o/r/commit/a,,[]"
    );
}
