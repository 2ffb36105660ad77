//! Feed fetcher - retrieves raw feed text over HTTP.
//!
//! No retries happen here; a failed fetch fails the run for that source and
//! the next sweep tries again.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use crate::common::ImportError;
use crate::kernel::BaseFeedFetcher;

pub const USER_AGENT: &str = "JobImporter/1.0 (+https://example.com)";

const ACCEPT: &str = "application/xml,text/xml,application/rss+xml,application/atom+xml,application/json,text/plain,*/*";

/// HTTP feed fetcher using reqwest.
pub struct FeedFetcher {
    client: reqwest::Client,
}

impl FeedFetcher {
    pub fn new(timeout: Duration) -> Result<Self, ImportError> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static(ACCEPT),
        );

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| ImportError::Other(anyhow::anyhow!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl BaseFeedFetcher for FeedFetcher {
    async fn fetch(&self, url: &str) -> Result<String, ImportError> {
        let fail = |reason: String| ImportError::http(format!("Failed to fetch XML from {}: {}", url, reason));

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                fail(format!("request timed out ({})", e))
            } else {
                fail(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(fail(format!("HTTP {}", status)));
        }

        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                fail(format!("body read timed out ({})", e))
            } else {
                fail(e.to_string())
            }
        })?;

        if body.trim().is_empty() {
            return Err(fail("Empty or invalid XML response".to_string()));
        }

        debug!(url = %url, bytes = body.len(), "fetched feed");
        Ok(body)
    }
}
