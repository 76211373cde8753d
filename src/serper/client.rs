//! Live search API client.

use crate::config::Config;
use crate::serper::errors::SearchError;
use crate::serper::models::{self, SearchOutcome};
use crate::serper::{SearchApi, truncate_on_boundary};
use reqwest::Client;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Results requested per page; the API bills one credit per call regardless.
const PAGE_SIZE: u32 = 10;

/// How much of an error body is kept in error messages.
const ERROR_DETAIL_LIMIT: usize = 500;

/// Threshold for logging slow requests at DEBUG level
const SLOW_REQUEST_THRESHOLD: Duration = Duration::from_secs(1);

/// Client for the external `/places` search endpoint.
#[derive(Debug, Clone)]
pub struct SerperClient {
    client: Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl SerperClient {
    pub fn from_config(config: &Config) -> Result<Self, SearchError> {
        let api_key = config
            .serper_api_key
            .clone()
            .filter(|key| !key.is_empty())
            .ok_or(SearchError::MissingApiKey)?;

        let timeout = config.serper_timeout_seconds;
        let client = Client::builder()
            .user_agent(concat!("placegrid/", env!("CARGO_PKG_VERSION")))
            .tcp_keepalive(Some(Duration::from_secs(60 * 5)))
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()
            .map_err(|e| SearchError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.serper_base_url.trim_end_matches('/').to_owned(),
            api_key,
            timeout,
        })
    }
}

#[async_trait::async_trait]
impl SearchApi for SerperClient {
    async fn search(&self, q: &str, page: i32) -> Result<SearchOutcome, SearchError> {
        let url = format!("{}/places", self.base_url);
        let body = serde_json::json!({"q": q, "page": page, "num": PAGE_SIZE});

        let started = Instant::now();
        let response = self
            .client
            .post(&url)
            .header("X-API-KEY", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    SearchError::Timeout(self.timeout)
                } else {
                    SearchError::Transport(err.to_string())
                }
            })?;

        let status = response.status().as_u16();
        let text = response.text().await.map_err(|err| {
            if err.is_timeout() {
                SearchError::Timeout(self.timeout)
            } else {
                SearchError::Transport(err.to_string())
            }
        })?;
        let elapsed = started.elapsed();
        let elapsed_ms = elapsed.as_millis() as i64;

        if !(200..300).contains(&status) {
            warn!(q, page, status, elapsed_ms, "search request failed");
            // Even failure bodies may carry a billed credit count.
            let credits = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|body| body.get("credits").and_then(Value::as_i64));
            return Err(SearchError::Status {
                status,
                detail: truncate_on_boundary(text, ERROR_DETAIL_LIMIT),
                credits,
            });
        }

        let parsed: Value =
            serde_json::from_str(&text).map_err(|_| SearchError::MalformedBody { status })?;

        let credits = models::extract_credits(&parsed);
        let (places, parse_failures, dropped) = models::extract_places(&parsed);

        if elapsed >= SLOW_REQUEST_THRESHOLD {
            debug!(q, page, status, elapsed_ms, results = places.len(), "search completed (slow)");
        } else {
            trace!(q, page, status, elapsed_ms, results = places.len(), "search completed");
        }
        if dropped > 0 {
            warn!(q, page, dropped, "dropped records without a stable identifier");
        }

        Ok(SearchOutcome {
            places,
            credits,
            api_status: status,
            elapsed_ms,
            parse_failures,
            dropped,
        })
    }

    fn source(&self) -> &'static str {
        "serper"
    }
}
