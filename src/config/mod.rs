//! Configuration module for the placegrid pipeline.
//!
//! All settings are bound from environment variables via figment and frozen
//! into an immutable [`Config`] at startup. Duration-valued settings accept
//! both bare numbers (interpreted as seconds) and duration strings with
//! units ("30s", "2m", "1500ms").

use fundu::{DurationParser, TimeUnit};
use serde::{Deserialize, Deserializer};
use std::time::Duration;

/// Main application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Log level for this application's target specifically.
    ///
    /// e.g. "debug" is equivalent to "warn,placegrid=debug".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Database connection URL (the durable store behind the queue).
    pub database_url: String,

    /// When true, the search client returns synthetic results for offline
    /// runs and tests; no external API is contacted.
    #[serde(default)]
    pub use_mock_api: bool,

    /// Credential for the external search API. Required unless the mock
    /// client is enabled.
    #[serde(default)]
    pub serper_api_key: Option<String>,

    /// Base URL for the external search API.
    #[serde(default = "default_serper_base_url")]
    pub serper_base_url: String,

    /// Daily spend ceiling in USD across all jobs created that day.
    #[serde(default = "default_daily_budget_usd")]
    pub daily_budget_usd: f64,

    /// Cost of one API credit in USD.
    #[serde(default = "default_cost_per_credit")]
    pub cost_per_credit: f64,

    /// Percentage of the daily budget at which job creation logs a warning.
    #[serde(default = "default_budget_soft_pct")]
    pub budget_soft_pct: f64,

    /// Percentage of the daily budget at which job creation is blocked.
    #[serde(default = "default_budget_hard_pct")]
    pub budget_hard_pct: f64,

    /// Number of concurrent coordinator loops in one `process-batches` run.
    #[serde(default = "default_processor_max_workers")]
    pub processor_max_workers: usize,

    /// Queries claimed per batch when `create-job` is not given --batch-size.
    #[serde(default = "default_batch_size")]
    pub default_batch_size: i32,

    /// In-flight search requests per batch when --concurrency is not given.
    #[serde(default = "default_concurrency")]
    pub default_concurrency: i32,

    /// Page depth when --pages is not given.
    #[serde(default = "default_pages")]
    pub default_pages: i32,

    /// Minimum page-1 result count below which pages 2..P are skipped.
    #[serde(default = "default_early_exit_threshold")]
    pub early_exit_threshold: i32,

    /// Cap on rows per upsert / batched-update statement.
    #[serde(default = "default_merge_chunk_size")]
    pub merge_chunk_size: usize,

    /// Per-request wall clock for the search API.
    #[serde(
        default = "default_serper_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub serper_timeout_seconds: Duration,

    /// Maximum attempts per search request (first try included).
    #[serde(default = "default_max_retries_per_query")]
    pub max_retries_per_query: u32,

    /// Base delay for exponential retry backoff.
    #[serde(
        default = "default_retry_delay",
        deserialize_with = "deserialize_duration"
    )]
    pub retry_delay_seconds: Duration,

    /// Politeness pause between coordinator iterations.
    #[serde(
        default = "default_loop_delay",
        deserialize_with = "deserialize_duration"
    )]
    pub processor_loop_delay_seconds: Duration,

    /// Pause when running jobs exist but nothing was claimable.
    #[serde(
        default = "default_idle_poll_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub idle_poll_interval: Duration,

    /// Age after which a `processing` claim is considered abandoned and
    /// returned to the queue.
    #[serde(
        default = "default_reclaim_after",
        deserialize_with = "deserialize_duration"
    )]
    pub reclaim_after_seconds: Duration,

    /// Graceful shutdown timeout for `process-batches`.
    #[serde(
        default = "default_shutdown_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub shutdown_timeout: Duration,
}

impl Config {
    /// Bind configuration from the process environment.
    pub fn from_env() -> Result<Self, figment::Error> {
        use figment::{Figment, providers::Env};
        Figment::new().merge(Env::raw()).extract()
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_serper_base_url() -> String {
    "https://google.serper.dev".to_string()
}

fn default_daily_budget_usd() -> f64 {
    50.0
}

fn default_cost_per_credit() -> f64 {
    0.001
}

fn default_budget_soft_pct() -> f64 {
    80.0
}

fn default_budget_hard_pct() -> f64 {
    100.0
}

fn default_processor_max_workers() -> usize {
    4
}

fn default_batch_size() -> i32 {
    150
}

fn default_concurrency() -> i32 {
    100
}

fn default_pages() -> i32 {
    3
}

fn default_early_exit_threshold() -> i32 {
    10
}

fn default_merge_chunk_size() -> usize {
    500
}

/// Default per-request timeout of 30 seconds
fn default_serper_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_retries_per_query() -> u32 {
    3
}

/// Default backoff base of 5 seconds
fn default_retry_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_loop_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_idle_poll_interval() -> Duration {
    Duration::from_secs(5)
}

/// Default reclaim age of 1 hour
fn default_reclaim_after() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(8)
}

/// Duration parser with seconds as the default unit.
///
/// Supports seconds (s), milliseconds (ms), and minutes (m); allows
/// whitespace between the number and the unit and multiple summed units
/// ("10s 2m" = 130 seconds). Fractions, exponents, and infinity are
/// rejected.
const DURATION_PARSER: DurationParser<'static> = DurationParser::builder()
    .time_units(&[TimeUnit::Second, TimeUnit::MilliSecond, TimeUnit::Minute])
    .parse_multiple(None)
    .allow_time_unit_delimiter()
    .disable_infinity()
    .disable_fraction()
    .disable_exponent()
    .default_unit(TimeUnit::Second)
    .build();

/// Deserializer for duration fields that accepts both numbers and strings.
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Visitor;

    struct DurationVisitor;

    impl<'de> Visitor<'de> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a duration string or number")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            DURATION_PARSER
                .parse(value)
                .map_err(|e| {
                    serde::de::Error::custom(format!(
                        "Invalid duration format '{value}': {e}. Examples: '5' (5 seconds), '3500ms', '30s', '2m'"
                    ))
                })?
                .try_into()
                .map_err(|e| serde::de::Error::custom(format!("Duration conversion error: {e}")))
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(Duration::from_secs(value))
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            if value < 0 {
                return Err(serde::de::Error::custom("Duration cannot be negative"));
            }
            Ok(Duration::from_secs(value as u64))
        }
    }

    deserializer.deserialize_any(DurationVisitor)
}
