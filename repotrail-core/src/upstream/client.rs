//! HTTP client for the upstream REST API
//!
//! Implements [`UpstreamClient`] against a GitHub-compatible API.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, LINK, USER_AGENT};
use reqwest::StatusCode;

use crate::config::{RateLimitPolicy, UpstreamConfig};
use crate::error::{Error, Result};
use crate::types::RepositorySnapshot;

use super::rate_limit::{RateLimitSnapshot, RateLimitTracker};
use super::wire;
use super::{CommitPage, CommitPageRequest, UpstreamClient};

/// Longest error body echoed into an error message
const MAX_ERROR_BODY: usize = 200;

/// HTTP client for the upstream API
pub struct GithubClient {
    config: UpstreamConfig,
    http_client: reqwest::Client,
    base_url: String,
    rate_limit: RateLimitTracker,
}

impl GithubClient {
    /// Create a new client from configuration
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: UpstreamConfig) -> Result<Self> {
        config.validate()?;

        let base_url = config.base_url.trim_end_matches('/').to_string();

        // Build default headers
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("repotrail/", env!("CARGO_PKG_VERSION"))),
        );
        headers.insert("x-github-api-version", HeaderValue::from_static("2022-11-28"));

        // Add authorization header
        if let Some(token) = config.resolved_token() {
            let auth_value = format!("Bearer {}", token);
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&auth_value)
                    .map_err(|e| Error::Config(format!("invalid upstream token: {}", e)))?,
            );
        } else {
            tracing::info!("No upstream token configured, using unauthenticated rate limits");
        }

        let http_client = reqwest::Client::builder()
            .timeout(config.timeout())
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            http_client,
            base_url,
            rate_limit: RateLimitTracker::new(),
        })
    }

    /// Latest rate-limit counters seen on any response
    pub fn rate_limit(&self) -> RateLimitSnapshot {
        self.rate_limit.snapshot()
    }

    /// URL for a repository metadata request
    pub fn repository_url(&self, name: &str) -> String {
        format!("{}/repos/{}", self.base_url, name)
    }

    /// URL for a commit page request
    ///
    /// A non-empty SHA anchor replaces the date window entirely.
    pub fn commits_url(&self, request: &CommitPageRequest) -> String {
        let anchor = if request.is_sha_anchored() {
            format!("sha={}", urlencoding::encode(&request.last_fetched_commit))
        } else {
            format!(
                "since={}&until={}",
                urlencoding::encode(&request.since.to_rfc3339_opts(SecondsFormat::Secs, true)),
                urlencoding::encode(&request.until.to_rfc3339_opts(SecondsFormat::Secs, true)),
            )
        };

        format!(
            "{}/repos/{}/commits?{}&page={}&per_page={}",
            self.base_url,
            request.repository_name,
            anchor,
            request.page.max(1),
            self.config.per_page
        )
    }

    /// Honour the configured rate-limit policy before a request.
    async fn pace(&self) {
        if self.config.rate_limit_policy != RateLimitPolicy::Wait {
            return;
        }
        if let Some(wait) = self.rate_limit.wait_until_reset() {
            let wait = wait.min(self.config.max_rate_limit_wait());
            if wait > Duration::ZERO {
                tracing::info!(wait_secs = wait.as_secs(), "Waiting for upstream rate limit reset");
                tokio::time::sleep(wait).await;
            }
        }
    }

    /// Perform a GET and return status, headers and body.
    ///
    /// Rate-limit headers are recorded for every response, including errors.
    async fn get(&self, url: &str) -> Result<(StatusCode, HeaderMap, String)> {
        self.pace().await;

        tracing::debug!(url = %url, "Upstream request");

        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let headers = response.headers().clone();
        self.rate_limit.observe(&headers);

        let body = response
            .text()
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("failed to read response: {}", e)))?;

        Ok((status, headers, body))
    }
}

#[async_trait]
impl UpstreamClient for GithubClient {
    async fn fetch_repository_metadata(&self, name: &str) -> Result<RepositorySnapshot> {
        let url = self.repository_url(name);
        let (status, headers, body) = self.get(&url).await?;
        repository_from_response(name, status, &headers, &body)
    }

    async fn fetch_commits(&self, request: &CommitPageRequest) -> Result<CommitPage> {
        let url = self.commits_url(request);
        let (status, headers, body) = self.get(&url).await?;
        commit_page_from_response(&request.repository_name, status, &headers, &body)
    }
}

fn repository_from_response(
    name: &str,
    status: StatusCode,
    headers: &HeaderMap,
    body: &str,
) -> Result<RepositorySnapshot> {
    if status.is_success() {
        return wire::parse_repository(body);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(Error::RepositoryNotFound(name.to_string()));
    }
    Err(status_error(status, headers, body))
}

/// A page has a successor only when `Link` advertises `rel="next"`.
fn commit_page_from_response(
    repository_name: &str,
    status: StatusCode,
    headers: &HeaderMap,
    body: &str,
) -> Result<CommitPage> {
    if !status.is_success() {
        return Err(status_error(status, headers, body));
    }

    let commits = wire::parse_commit_page(body, repository_name, Utc::now())?;
    let has_more_pages = headers
        .get(LINK)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_next_link)
        .is_some();

    Ok(CommitPage {
        commits,
        has_more_pages,
    })
}

/// Map a non-success response to an error.
///
/// 429, and 403 with zero remaining quota, mean the request was throttled.
/// Only the headers of this response are consulted.
fn status_error(status: StatusCode, headers: &HeaderMap, body: &str) -> Error {
    let observed = RateLimitSnapshot::from_headers(headers);
    let throttled = status == StatusCode::TOO_MANY_REQUESTS
        || (status == StatusCode::FORBIDDEN && observed.is_exhausted());

    if throttled {
        return Error::UpstreamThrottled {
            reset_at: observed.reset_at,
        };
    }

    let mut snippet: String = body.chars().take(MAX_ERROR_BODY).collect();
    if snippet.is_empty() {
        snippet = "unknown".to_string();
    }
    Error::UpstreamUnavailable(format!("API error ({}): {}", status, snippet))
}

/// Extract the `rel="next"` target from a `Link` header value.
pub fn parse_next_link(link_header: &str) -> Option<String> {
    link_header.split(',').find_map(|link| {
        let mut parts = link.trim().split(';');
        let target = parts.next()?.trim();
        let is_next = parts.any(|param| {
            let param = param.trim();
            param == r#"rel="next""# || param == "rel=next"
        });
        if !is_next {
            return None;
        }
        let url = target.trim_start_matches('<').trim_end_matches('>');
        (!url.is_empty()).then(|| url.to_string())
    })
}
