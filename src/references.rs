use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

fn closing_reference_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:close[sd]?|fix(?:e[sd])?|resolve[sd]?):?\s+(?:([\w.-]+/[\w.-]+))?#(\d+)\b",
        )
        .expect("closing reference pattern is valid")
    })
}

/// Issue numbers in `repo_name` that a PR description claims to close.
///
/// Recognises `fixes #12` and `closes owner/repo#12`; references into other
/// repositories are ignored.
pub fn extract_closing_issue_numbers(description: Option<&str>, repo_name: &str) -> BTreeSet<u64> {
    let Some(text) = description else {
        return BTreeSet::new();
    };

    closing_reference_regex()
        .captures_iter(text)
        .filter(|caps| {
            caps.get(1)
                .map_or(true, |scope| scope.as_str().eq_ignore_ascii_case(repo_name))
        })
        .filter_map(|caps| caps.get(2)?.as_str().parse().ok())
        .collect()
}

/// Issue URLs under `web_base` closed by a PR description, one per
/// distinct issue.
pub fn extract_closing_issues(
    description: Option<&str>,
    repo_name: &str,
    web_base: &str,
) -> BTreeSet<String> {
    extract_closing_issue_numbers(description, repo_name)
        .into_iter()
        .map(|number| issue_url(web_base, repo_name, number))
        .collect()
}

pub fn issue_url(web_base: &str, repo_name: &str, number: u64) -> String {
    format!(
        "{}/{}/issues/{}",
        web_base.trim_end_matches('/'),
        repo_name,
        number
    )
}
