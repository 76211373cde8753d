//! Row structs and status enums for the three core tables.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// Lifecycle state of a job.
#[derive(sqlx::Type, Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[sqlx(type_name = "job_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Done,
}

/// Execution state of a single (zip, page) query.
///
/// `Success`, `Failed`, and `Skipped` are terminal; a terminal row is never
/// re-claimed. `Processing` rows return to `Queued` only via the stuck-claim
/// reaper.
#[derive(sqlx::Type, Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[sqlx(type_name = "query_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    Queued,
    Processing,
    Success,
    Failed,
    Skipped,
}

impl QueryStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Skipped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

/// A job row: frozen parameters plus lifecycle and rollup columns.
#[derive(sqlx::FromRow, Debug, Clone)]
pub struct Job {
    pub job_id: String,
    pub keyword: String,
    pub state: String,
    pub pages: i32,
    pub batch_size: i32,
    pub concurrency: i32,
    pub dry_run: bool,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub total_zips: i64,
    pub total_queries: i64,
    pub total_successes: i64,
    pub total_failures: i64,
    pub total_skipped: i64,
    pub total_places: i64,
    pub total_credits: i64,
}

/// Parameters for a new job row.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_id: String,
    pub keyword: String,
    pub state: String,
    pub pages: i32,
    pub batch_size: i32,
    pub concurrency: i32,
    pub dry_run: bool,
}

/// A query row, the unit of work in the queue.
#[derive(sqlx::FromRow, Debug, Clone)]
pub struct QueryRow {
    pub job_id: String,
    pub zip: String,
    pub page: i32,
    pub q: String,
    pub status: QueryStatus,
    pub claim_id: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub ran_at: Option<DateTime<Utc>>,
    pub api_status: Option<i32>,
    pub results_count: Option<i32>,
    pub credits: Option<i64>,
    pub error: Option<String>,
}

/// A query row to enqueue. Produced by the expander, persisted once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewQuery {
    pub zip: String,
    pub page: i32,
    pub q: String,
}

/// The terminal outcome of one claimed query, written back in a batch.
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub zip: String,
    pub page: i32,
    pub status: QueryStatus,
    pub api_status: Option<i32>,
    pub results_count: Option<i32>,
    pub credits: Option<i64>,
    pub error: Option<String>,
    pub ran_at: DateTime<Utc>,
}

/// A place row to upsert, keyed by (job_id, place_uid).
///
/// `payload` is the structured parse of the API record and may be absent
/// when the record failed typed parsing; `payload_raw` is always the
/// record's original JSON text.
#[derive(Debug, Clone)]
pub struct NewPlace {
    pub place_uid: String,
    pub payload: Option<Value>,
    pub payload_raw: String,
    pub zip: String,
    pub page: i32,
    pub api_status: Option<i32>,
    pub api_ms: Option<i64>,
    pub results_count: Option<i32>,
    pub credits: Option<i64>,
}

/// Per-status row counts for one job.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusCounts {
    pub queued: i64,
    pub processing: i64,
    pub success: i64,
    pub failed: i64,
    pub skipped: i64,
}

impl StatusCounts {
    pub fn pending(&self) -> i64 {
        self.queued + self.processing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(QueryStatus::Success.is_terminal());
        assert!(QueryStatus::Failed.is_terminal());
        assert!(QueryStatus::Skipped.is_terminal());
        assert!(!QueryStatus::Queued.is_terminal());
        assert!(!QueryStatus::Processing.is_terminal());
    }
}
