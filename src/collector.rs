use log::{debug, info, warn};
use reqwest::Url;
use serde_json::Value;
use tokio::time::{sleep, Duration};

use crate::config::StopCondition;
use crate::fetcher::Fetcher;

/// Walks numbered pages `1..=max_pages` and concatenates their items.
pub struct Collector<'a> {
    fetcher: &'a Fetcher,
    page_delay: Duration,
    stop: StopCondition,
}

impl<'a> Collector<'a> {
    pub fn new(fetcher: &'a Fetcher, page_delay: Duration, stop: StopCondition) -> Self {
        Self {
            fetcher,
            page_delay,
            stop,
        }
    }

    /// Repository search, sorted descending by `sort`.
    pub async fn search_repositories(
        &self,
        query: &str,
        sort: &str,
        per_page: u32,
        max_pages: u32,
    ) -> Vec<Value> {
        let base = match Url::parse(&self.fetcher.api_url("search/repositories")) {
            Ok(url) => url,
            Err(e) => {
                warn!("Invalid search URL: {}", e);
                return Vec::new();
            }
        };

        self.collect("repositories", max_pages, |page| {
            let mut url = base.clone();
            url.query_pairs_mut()
                .append_pair("q", query)
                .append_pair("sort", sort)
                .append_pair("order", "desc")
                .append_pair("per_page", &per_page.to_string())
                .append_pair("page", &page.to_string());
            url.to_string()
        })
        .await
    }

    /// Fetch each page URL in turn. A failed page ends collection and the
    /// items gathered so far are returned; the fetcher has already done all
    /// the retrying there is to do.
    pub async fn collect<F>(&self, label: &str, max_pages: u32, page_url: F) -> Vec<Value>
    where
        F: Fn(u32) -> String,
    {
        let mut items = Vec::new();

        for page in 1..=max_pages {
            if page > 1 && !self.page_delay.is_zero() {
                sleep(self.page_delay).await;
            }

            let url = page_url(page);
            debug!("Fetching {} page {}/{}", label, page, max_pages);

            let payload = match self.fetcher.fetch(&url).await {
                Ok(payload) => payload,
                Err(e) => {
                    warn!("Failed to fetch {} (page {}): {}", label, page, e);
                    break;
                }
            };

            let page_items = page_items(payload);
            info!(
                "{} {} on page {}/{} found",
                page_items.len(),
                label,
                page,
                max_pages
            );

            if page_items.is_empty() && self.stop == StopCondition::OnEmptyOrError {
                break;
            }
            items.extend(page_items);
        }

        items
    }
}

/// Search responses wrap results in `items`; list endpoints return a bare array.
pub fn page_items(payload: Value) -> Vec<Value> {
    match payload {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("items") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}
