//! Feed-gateway HTTP client
//!
//! Fetches a channel's pre-parsed MRSS entries from a feed gateway that
//! serves each feed as JSON:
//!
//! ```json
//! { "items": [ { "guid": "ep-1", "title": "...", "duration_secs": 1800 } ] }
//! ```
//!
//! Features:
//! - Rate limiting with governor (shared across channels)
//! - Bounded retry with exponential backoff on transport errors
//! - All-or-nothing per channel: one unreachable feed fails the fetch

use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use reqwest::{header::ACCEPT, Client, StatusCode};
use serde::Deserialize;

use super::{FeedError, FeedSource};
use crate::config::FeedConfig;
use crate::models::{Channel, RawFeedItem};
use crate::utils::retry::{with_retry_if, RetryConfig};

/// Feed document served by the gateway
#[derive(Debug, Deserialize)]
struct FeedDocument {
    #[serde(default)]
    items: Vec<RawFeedItem>,
}

/// HTTP feed source with rate limiting and retry
pub struct HttpFeedSource {
    /// HTTP client with configured timeout and compression
    client: Client,

    /// Rate limiter to control request frequency
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,

    /// Retry policy for transport failures
    retry: RetryConfig,
}

impl HttpFeedSource {
    /// Create a new feed source from configuration
    ///
    /// # Errors
    ///
    /// Returns `FeedError::Unavailable` if the HTTP client cannot be created
    pub fn new(config: &FeedConfig) -> Result<Self, FeedError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .gzip(true)
            .user_agent(format!("onair/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FeedError::unavailable("<client>", e.to_string()))?;

        let rate = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = RateLimiter::direct(Quota::per_second(rate));

        Ok(Self {
            client,
            rate_limiter,
            retry: RetryConfig::with_delays(config.max_retries, 500, 5_000),
        })
    }

    /// Override the retry policy
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn fetch_feed(&self, url: &str) -> Result<Vec<RawFeedItem>, FeedError> {
        self.rate_limiter.until_ready().await;

        let response = self
            .client
            .get(url)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| FeedError::unavailable(url, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(url, status));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FeedError::unavailable(url, e.to_string()))?;

        let document: FeedDocument =
            serde_json::from_slice(&body).map_err(|e| FeedError::Malformed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        Ok(document
            .items
            .into_iter()
            .map(|mut item| {
                item.source.get_or_insert_with(|| url.to_string());
                item
            })
            .collect())
    }
}

fn status_error(url: &str, status: StatusCode) -> FeedError {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        FeedError::unavailable(url, format!("gateway returned {status}"))
    } else {
        FeedError::Malformed {
            url: url.to_string(),
            reason: format!("gateway returned {status}"),
        }
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch_items(&self, channel: &Channel) -> Result<Vec<RawFeedItem>, FeedError> {
        if channel.feeds.is_empty() {
            return Err(FeedError::NoSources(channel.id.clone()));
        }

        let mut items = Vec::new();
        for url in &channel.feeds {
            let fetched = with_retry_if(
                &self.retry,
                || self.fetch_feed(url),
                FeedError::is_transient,
            )
            .await?;

            tracing::debug!(
                channel_id = %channel.id,
                url = %url,
                items = fetched.len(),
                "Fetched feed"
            );
            items.extend(fetched);
        }

        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_classification() {
        let err = status_error("http://x", StatusCode::SERVICE_UNAVAILABLE);
        assert!(err.is_transient());

        let err = status_error("http://x", StatusCode::TOO_MANY_REQUESTS);
        assert!(err.is_transient());

        let err = status_error("http://x", StatusCode::NOT_FOUND);
        assert!(!err.is_transient());
    }

    #[test]
    fn test_feed_document_tolerates_missing_items() {
        let doc: FeedDocument = serde_json::from_str("{}").unwrap();
        assert!(doc.items.is_empty());
    }

    #[tokio::test]
    async fn test_channel_without_feeds() {
        let source = HttpFeedSource::new(&FeedConfig::default()).unwrap();
        let channel = Channel::new("news", "acme", "News");
        let err = source.fetch_items(&channel).await.unwrap_err();
        assert!(matches!(err, FeedError::NoSources(_)));
    }
}
