use chrono::Utc;
use log::{debug, info, warn};
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tokio::time::{sleep, Duration};

use crate::config::{GitHubConfig, RetryPolicy};
use crate::error::{HarvestError, Result};

const RATE_LIMIT_RESET: &str = "x-ratelimit-reset";

/// Authenticated GET against the REST API that waits out rate limits and
/// transient server errors according to its [`RetryPolicy`].
pub struct Fetcher {
    client: reqwest::Client,
    headers: HeaderMap,
    config: GitHubConfig,
    policy: RetryPolicy,
}

impl Fetcher {
    /// Build a fetcher, reading the credential from the configured
    /// environment variable.
    pub fn new(config: GitHubConfig, policy: RetryPolicy) -> Result<Self> {
        let token = config.resolve_token()?;
        Self::with_token(token, config, policy)
    }

    pub fn with_token(
        token: impl Into<String>,
        config: GitHubConfig,
        policy: RetryPolicy,
    ) -> Result<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(HarvestError::AuthMissing("empty token".to_string()));
        }

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token.trim()))
                .map_err(|e| HarvestError::Config(format!("Invalid token: {}", e)))?,
        );
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .map_err(|e| HarvestError::Config(format!("Invalid user agent: {}", e)))?,
        );
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            headers,
            config,
            policy,
        })
    }

    pub fn config(&self) -> &GitHubConfig {
        &self.config
    }

    /// Absolute API URL for a path such as `/repos/o/r/languages`.
    pub fn api_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.api_base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Human-facing URL for a path such as `o/r/issues/4`.
    pub fn web_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.web_base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub async fn fetch_as<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let value = self.fetch(url).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// GET `url` and return the JSON payload of a 200 response.
    ///
    /// 403 with a reset header sleeps until the reset time, 502/503/504 sleep
    /// a fixed delay; both retry for as long as the policy allows. Any other
    /// status is returned as [`HarvestError::RequestFailed`].
    pub async fn fetch(&self, url: &str) -> Result<serde_json::Value> {
        let mut retries = 0u32;

        loop {
            debug!("GET {}", url);

            let response = match self
                .client
                .get(url)
                .headers(self.headers.clone())
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    if !self.policy.allows_retry(retries) {
                        return Err(e.into());
                    }
                    let delay = self.with_jitter(self.policy.server_error_delay());
                    warn!(
                        "Network error ({}). Retrying in {:.2} seconds...",
                        e,
                        delay.as_secs_f64()
                    );
                    sleep(delay).await;
                    retries += 1;
                    continue;
                }
            };

            let status = response.status();

            if status == StatusCode::OK {
                let bytes = response.bytes().await?;
                return Ok(serde_json::from_slice(&bytes)?);
            }

            if status == StatusCode::FORBIDDEN {
                if let Some(reset) = rate_limit_reset(response.headers()) {
                    if !self.policy.allows_retry(retries) {
                        return Err(HarvestError::RateLimited {
                            url: url.to_string(),
                            attempts: retries + 1,
                        });
                    }
                    let wait = self.with_jitter(rate_limit_wait(
                        reset,
                        Utc::now().timestamp_millis(),
                        &self.policy,
                    ));
                    info!(
                        "Rate limit exceeded. Sleeping for {:.2} seconds...",
                        wait.as_secs_f64()
                    );
                    sleep(wait).await;
                    retries += 1;
                    continue;
                }
            }

            if is_transient(status) {
                if !self.policy.allows_retry(retries) {
                    return Err(HarvestError::TransientServerError {
                        url: url.to_string(),
                        status: status.as_u16(),
                        attempts: retries + 1,
                    });
                }
                let delay = self.with_jitter(self.policy.server_error_delay());
                warn!(
                    "Temporary error ({}). Retrying in {:.2} seconds...",
                    status.as_u16(),
                    delay.as_secs_f64()
                );
                sleep(delay).await;
                retries += 1;
                continue;
            }

            warn!("Request failed: {} for URL: {}", status.as_u16(), url);
            return Err(HarvestError::RequestFailed {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
    }

    fn with_jitter(&self, delay: Duration) -> Duration {
        if self.policy.jitter_ms == 0 {
            return delay;
        }
        let extra = rand::rng().random_range(0..=self.policy.jitter_ms);
        delay + Duration::from_millis(extra)
    }
}

fn is_transient(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
    )
}

fn rate_limit_reset(headers: &HeaderMap) -> Option<i64> {
    headers
        .get(RATE_LIMIT_RESET)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Time left until `reset_epoch_secs`, never negative, capped by the policy.
pub(crate) fn rate_limit_wait(
    reset_epoch_secs: i64,
    now_millis: i64,
    policy: &RetryPolicy,
) -> Duration {
    let remaining_ms = reset_epoch_secs
        .saturating_mul(1000)
        .saturating_sub(now_millis)
        .max(0) as u64;
    let wait = Duration::from_millis(remaining_ms);

    match policy.max_rate_limit_wait_secs {
        Some(cap) => wait.min(Duration::from_secs(cap)),
        None => wait,
    }
}
