use chrono::{DateTime, Utc};
use placegrid::config::Config;
use placegrid::db::DbContext;
use placegrid::db::models::{Job, JobStatus};
use placegrid::pipeline::executor::{BatchExecutor, BatchResult, ExecutorSettings};
use placegrid::serper::{MockSearchApi, RetryPolicy, SearchApi};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

/// Test configuration with fast pacing and the mock search client.
pub fn test_config() -> Config {
    serde_json::from_value(serde_json::json!({
        "database_url": "postgres://unused-in-tests/placegrid",
        "use_mock_api": true,
        "retry_delay_seconds": "1ms",
        "processor_loop_delay_seconds": "10ms",
        "idle_poll_interval": "10ms",
    }))
    .expect("test config should deserialize")
}

/// Seed `state_zips` rows for one state in a single round-trip.
pub async fn seed_state_zips(pool: &PgPool, state: &str, zips: &[String]) {
    sqlx::query(
        "INSERT INTO state_zips (state, zip) SELECT $1, z FROM UNNEST($2::text[]) AS z
         ON CONFLICT DO NOTHING",
    )
    .bind(state)
    .bind(zips)
    .execute(pool)
    .await
    .expect("seed_state_zips failed");
}

/// Generate `count` consecutive five-digit zip strings starting at `start`.
pub fn zip_range(start: u32, count: u32) -> Vec<String> {
    (start..start + count).map(|z| format!("{z:05}")).collect()
}

/// Insert a job row directly via SQL.
pub async fn insert_job(
    pool: &PgPool,
    job_id: &str,
    keyword: &str,
    state: &str,
    pages: i32,
    batch_size: i32,
    concurrency: i32,
) {
    sqlx::query(
        "INSERT INTO jobs (job_id, keyword, state, pages, batch_size, concurrency)
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(job_id)
    .bind(keyword)
    .bind(state)
    .bind(pages)
    .bind(batch_size)
    .bind(concurrency)
    .execute(pool)
    .await
    .expect("insert_job failed");
}

/// Insert a query row directly via SQL with the given status.
pub async fn insert_query(pool: &PgPool, job_id: &str, zip: &str, page: i32, status: &str) {
    sqlx::query(
        "INSERT INTO queries (job_id, zip, page, q, status)
         VALUES ($1, $2, $3, $4, $5::query_status)",
    )
    .bind(job_id)
    .bind(zip)
    .bind(page)
    .bind(format!("{zip} test"))
    .bind(status)
    .execute(pool)
    .await
    .expect("insert_query failed");
}

/// Fetch (status, claim_id, error) for one query row.
pub async fn query_state(
    pool: &PgPool,
    job_id: &str,
    zip: &str,
    page: i32,
) -> (String, Option<String>, Option<String>) {
    sqlx::query_as(
        "SELECT status::text, claim_id, error FROM queries
         WHERE job_id = $1 AND zip = $2 AND page = $3",
    )
    .bind(job_id)
    .bind(zip)
    .bind(page)
    .fetch_one(pool)
    .await
    .expect("query_state failed")
}

/// Backdate a claimed row so the reaper sees it as expired.
pub async fn backdate_claim(pool: &PgPool, job_id: &str, zip: &str, page: i32, by: Duration) {
    let claimed_at: DateTime<Utc> = Utc::now() - chrono::Duration::from_std(by).unwrap();
    sqlx::query(
        "UPDATE queries SET claimed_at = $4 WHERE job_id = $1 AND zip = $2 AND page = $3",
    )
    .bind(job_id)
    .bind(zip)
    .bind(page)
    .bind(claimed_at)
    .execute(pool)
    .await
    .expect("backdate_claim failed");
}

/// Build an executor wired to the given mock client and threshold.
pub fn executor_with_mock(
    ctx: DbContext,
    mock: MockSearchApi,
    early_exit_threshold: i32,
) -> BatchExecutor {
    let api: Arc<dyn SearchApi> = Arc::new(mock);
    BatchExecutor::new(
        ctx,
        api.clone(),
        api,
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        },
        ExecutorSettings {
            early_exit_threshold,
            merge_chunk_size: 500,
        },
    )
}

/// Process batches for one job until it completes, like a single
/// coordinator would.
pub async fn drive_job(ctx: &DbContext, executor: &BatchExecutor, job_id: &str) {
    for _ in 0..1000 {
        let job: Job = ctx
            .jobs()
            .get(job_id)
            .await
            .expect("get job failed")
            .expect("job should exist");
        if job.status == JobStatus::Done {
            return;
        }
        let result: BatchResult = executor
            .process_batch(&job)
            .await
            .expect("process_batch failed");
        if result.processed == 0 {
            if ctx
                .jobs()
                .mark_done_if_complete(job_id)
                .await
                .expect("mark_done failed")
            {
                return;
            }
            // Another worker may still hold claims.
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
    panic!("job {job_id} did not complete");
}
