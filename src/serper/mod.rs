//! Search API client: trait, live client, mock, retry policy.

pub mod client;
pub mod errors;
pub mod mock;
pub mod models;

pub use client::SerperClient;
pub use errors::SearchError;
pub use mock::MockSearchApi;
pub use models::{FetchedPlace, SearchOutcome};

use crate::config::Config;
use std::time::Duration;
use tracing::warn;

/// A single logical search against the external API.
///
/// Implementations perform exactly one attempt; callers apply
/// [`RetryPolicy`] through [`search_with_retries`].
#[async_trait::async_trait]
pub trait SearchApi: Send + Sync {
    async fn search(&self, q: &str, page: i32) -> Result<SearchOutcome, SearchError>;

    /// Short identifier recorded in the `source` column of place rows.
    fn source(&self) -> &'static str;
}

/// Retry policy for transient search failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum attempts, first try included.
    pub max_attempts: u32,
    /// Backoff base; attempt n sleeps `base * 2^(n-1)`.
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.max_retries_per_query.max(1),
            base_delay: config.retry_delay_seconds,
        }
    }
}

/// Run one search with exponential backoff on transient failures.
///
/// Timeouts, transport errors, 429s, and 5xx responses are retried up to
/// `policy.max_attempts`; everything else surfaces immediately.
pub async fn search_with_retries(
    api: &dyn SearchApi,
    policy: &RetryPolicy,
    q: &str,
    page: i32,
) -> Result<SearchOutcome, SearchError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match api.search(q, page).await {
            Ok(outcome) => return Ok(outcome),
            Err(err) if err.is_transient() && attempt < max_attempts => {
                let delay = policy.base_delay * 2u32.saturating_pow(attempt - 1);
                warn!(
                    q,
                    page,
                    attempt,
                    delay = ?delay,
                    error = %err,
                    "transient search failure, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Truncate to at most `max` bytes without splitting a UTF-8 character.
///
/// Used to keep API error bodies from flooding error columns and logs.
pub(crate) fn truncate_on_boundary(mut text: String, max: usize) -> String {
    if text.len() > max {
        let mut end = max;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
    }
    text
}
