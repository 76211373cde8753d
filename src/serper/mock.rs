//! Synthetic search client for offline runs, dry-run jobs, and tests.

use crate::serper::errors::SearchError;
use crate::serper::models::{self, SearchOutcome};
use crate::serper::SearchApi;
use serde_json::json;

/// Deterministic stand-in for the live search API.
///
/// Returns `page_one_results` records for page 1 and `deeper_results` for
/// every later page. Record identifiers are derived from the query text, so
/// repeated calls (and retries) produce identical results and distinct
/// queries never collide.
#[derive(Debug, Clone)]
pub struct MockSearchApi {
    pub page_one_results: usize,
    pub deeper_results: usize,
    pub credits_per_call: i64,
}

impl Default for MockSearchApi {
    fn default() -> Self {
        Self {
            page_one_results: 5,
            deeper_results: 0,
            credits_per_call: 1,
        }
    }
}

#[async_trait::async_trait]
impl SearchApi for MockSearchApi {
    async fn search(&self, q: &str, page: i32) -> Result<SearchOutcome, SearchError> {
        let count = if page == 1 {
            self.page_one_results
        } else {
            self.deeper_results
        };

        let slug: String = q
            .chars()
            .map(|c| if c.is_whitespace() { '-' } else { c })
            .collect();

        let records: Vec<serde_json::Value> = (0..count)
            .map(|i| {
                json!({
                    "placeId": format!("{slug}-p{page}-{i}"),
                    "position": i as i64 + 1,
                    "title": format!("{q} result {}", i + 1),
                    "address": format!("{} Main St", 100 + i),
                    "rating": 4.2,
                    "ratingCount": 37,
                    "category": "mock",
                })
            })
            .collect();

        let body = json!({"places": records, "credits": self.credits_per_call});
        let (places, parse_failures, dropped) = models::extract_places(&body);

        Ok(SearchOutcome {
            places,
            credits: self.credits_per_call,
            api_status: 200,
            elapsed_ms: 1,
            parse_failures,
            dropped,
        })
    }

    fn source(&self) -> &'static str {
        "mock"
    }
}
