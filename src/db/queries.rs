//! Queue protocol over the `queries` table.
//!
//! The claim is the central concurrency primitive: one conditional UPDATE
//! flips up to `batch_size` rows from `queued` to `processing` and stamps
//! them with a claim id, so concurrent claimers on the same job always
//! receive disjoint batches. Everything else (writeback, early-exit, the
//! stuck-claim reaper) is phrased as conditional updates that only match
//! rows in the expected state, which makes every operation safe to repeat.

use crate::db::DbContext;
use crate::db::models::{NewQuery, QueryOutcome, QueryRow, StatusCounts};
use crate::error::Result;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::debug;

/// Queue operations for one `DbContext`.
pub struct QueryOps<'a> {
    ctx: &'a DbContext,
}

/// Generate a claim id unique to one claim call.
///
/// Millisecond timestamp plus a random 64-bit nonce; collisions would need
/// two claims in the same millisecond drawing the same nonce.
pub fn new_claim_id() -> String {
    let millis = Utc::now().timestamp_millis();
    let nonce: u64 = rand::random();
    format!("{millis:x}-{nonce:016x}")
}

impl<'a> QueryOps<'a> {
    pub(crate) fn new(ctx: &'a DbContext) -> Self {
        Self { ctx }
    }

    /// Idempotently enqueue query rows for a job.
    ///
    /// Rows already present under the same (job_id, zip, page) key are left
    /// untouched, so a crashed creator retrying produces no duplicates.
    ///
    /// # Returns
    /// The number of newly inserted rows.
    pub async fn enqueue(&self, job_id: &str, queries: &[NewQuery]) -> Result<u64> {
        if queries.is_empty() {
            return Ok(0);
        }

        let zips: Vec<&str> = queries.iter().map(|q| q.zip.as_str()).collect();
        let pages: Vec<i32> = queries.iter().map(|q| q.page).collect();
        let qs: Vec<&str> = queries.iter().map(|q| q.q.as_str()).collect();

        let result = sqlx::query(
            r#"
            INSERT INTO queries (job_id, zip, page, q, status)
            SELECT $1, v.zip, v.page, v.q, 'queued'
            FROM UNNEST($2::text[], $3::int4[], $4::text[]) AS v(zip, page, q)
            ON CONFLICT (job_id, zip, page) DO NOTHING
            "#,
        )
        .bind(job_id)
        .bind(&zips)
        .bind(&pages)
        .bind(&qs)
        .execute(self.ctx.pool())
        .await?;

        Ok(result.rows_affected())
    }

    /// Atomically claim up to `batch_size` queued rows for this caller.
    ///
    /// One conditional update flips the lowest queued rows to `processing`
    /// under a fresh claim id; rows claimed by a concurrent worker no longer
    /// match the `status = 'queued'` predicate, so two claimers always
    /// receive disjoint sets. The claimed rows are then selected back by
    /// (job_id, claim_id).
    ///
    /// Selection is page-major: every page-1 probe drains before any deeper
    /// page is claimed, so early exits skip deeper pages while they are
    /// still queued instead of after they have been paid for.
    pub async fn claim(&self, job_id: &str, batch_size: i32) -> Result<(String, Vec<QueryRow>)> {
        let claim_id = new_claim_id();

        sqlx::query(
            r#"
            UPDATE queries SET status = 'processing', claim_id = $2, claimed_at = NOW()
            WHERE (job_id, zip, page) IN (
                SELECT job_id, zip, page FROM queries
                WHERE job_id = $1 AND status = 'queued'
                ORDER BY page ASC, zip ASC
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            "#,
        )
        .bind(job_id)
        .bind(&claim_id)
        .bind(batch_size)
        .execute(self.ctx.pool())
        .await?;

        let batch = sqlx::query_as::<_, QueryRow>(
            "SELECT * FROM queries WHERE job_id = $1 AND claim_id = $2 ORDER BY zip ASC, page ASC",
        )
        .bind(job_id)
        .bind(&claim_id)
        .fetch_all(self.ctx.pool())
        .await?;

        if !batch.is_empty() {
            debug!(job_id, claim_id = %claim_id, batch_len = batch.len(), "claimed batch");
        }

        Ok((claim_id, batch))
    }

    /// Write back terminal outcomes for rows claimed under `claim_id`.
    ///
    /// Only rows still `processing` under the matching claim are updated,
    /// so a stale writer (its claim reaped and re-issued elsewhere) cannot
    /// clobber another worker's rows, and repeating the call is a no-op.
    /// Statements are chunked to respect store parameter limits.
    ///
    /// # Returns
    /// The number of rows updated.
    pub async fn mark_results(
        &self,
        job_id: &str,
        claim_id: &str,
        outcomes: &[QueryOutcome],
        chunk_size: usize,
    ) -> Result<u64> {
        let mut updated = 0;
        for chunk in outcomes.chunks(chunk_size.max(1)) {
            let zips: Vec<&str> = chunk.iter().map(|o| o.zip.as_str()).collect();
            let pages: Vec<i32> = chunk.iter().map(|o| o.page).collect();
            let statuses: Vec<&str> = chunk.iter().map(|o| o.status.as_str()).collect();
            let api_statuses: Vec<Option<i32>> = chunk.iter().map(|o| o.api_status).collect();
            let results_counts: Vec<Option<i32>> = chunk.iter().map(|o| o.results_count).collect();
            let credits: Vec<Option<i64>> = chunk.iter().map(|o| o.credits).collect();
            let errors: Vec<Option<&str>> = chunk.iter().map(|o| o.error.as_deref()).collect();
            let ran_ats: Vec<DateTime<Utc>> = chunk.iter().map(|o| o.ran_at).collect();

            let result = sqlx::query(
                r#"
                UPDATE queries AS q SET
                    status = v.status::query_status,
                    api_status = v.api_status,
                    results_count = v.results_count,
                    credits = v.credits,
                    error = v.error,
                    ran_at = v.ran_at,
                    claim_id = NULL
                FROM UNNEST(
                    $3::text[], $4::int4[], $5::text[], $6::int4[],
                    $7::int4[], $8::int8[], $9::text[], $10::timestamptz[]
                ) AS v(zip, page, status, api_status, results_count, credits, error, ran_at)
                WHERE q.job_id = $1 AND q.claim_id = $2 AND q.status = 'processing'
                  AND q.zip = v.zip AND q.page = v.page
                "#,
            )
            .bind(job_id)
            .bind(claim_id)
            .bind(&zips)
            .bind(&pages)
            .bind(&statuses)
            .bind(&api_statuses)
            .bind(&results_counts)
            .bind(&credits)
            .bind(&errors)
            .bind(&ran_ats)
            .execute(self.ctx.pool())
            .await?;

            updated += result.rows_affected();
        }
        Ok(updated)
    }

    /// Skip the deeper pages of a zip whose page 1 came back thin.
    ///
    /// No-op unless called for page 1 with a result count below the
    /// threshold. Only `queued` siblings are touched, so rows already
    /// claimed, finished, or skipped are never affected. Purely a cost
    /// optimization.
    ///
    /// # Returns
    /// The number of rows transitioned to `skipped`.
    pub async fn skip_remaining_pages(
        &self,
        job_id: &str,
        zip: &str,
        page: i32,
        results_count: i32,
        threshold: i32,
    ) -> Result<u64> {
        if page != 1 || results_count >= threshold {
            return Ok(0);
        }

        let result = sqlx::query(
            r#"
            UPDATE queries SET status = 'skipped', error = 'early_exit'
            WHERE job_id = $1 AND zip = $2 AND page > 1 AND status = 'queued'
            "#,
        )
        .bind(job_id)
        .bind(zip)
        .execute(self.ctx.pool())
        .await?;

        let skipped = result.rows_affected();
        if skipped > 0 {
            debug!(job_id, zip, results_count, skipped, "early exit");
        }
        Ok(skipped)
    }

    /// Return expired claims to the queue.
    ///
    /// `processing` rows whose claim is older than `older_than` were
    /// abandoned by a dead or partitioned worker; flipping them back to
    /// `queued` lets any worker pick them up again. Terminal rows never
    /// match.
    ///
    /// # Returns
    /// The number of rows reclaimed.
    pub async fn reap_stuck(&self, older_than: Duration) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE queries SET status = 'queued', claim_id = NULL, claimed_at = NULL
            WHERE status = 'processing'
              AND claimed_at < NOW() - make_interval(secs => $1::double precision)
            "#,
        )
        .bind(older_than.as_secs_f64())
        .execute(self.ctx.pool())
        .await?;

        Ok(result.rows_affected())
    }

    /// Per-status row counts for one job.
    pub async fn status_counts(&self, job_id: &str) -> Result<StatusCounts> {
        let row: (i64, i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'queued'),
                COUNT(*) FILTER (WHERE status = 'processing'),
                COUNT(*) FILTER (WHERE status = 'success'),
                COUNT(*) FILTER (WHERE status = 'failed'),
                COUNT(*) FILTER (WHERE status = 'skipped')
            FROM queries WHERE job_id = $1
            "#,
        )
        .bind(job_id)
        .fetch_one(self.ctx.pool())
        .await?;

        Ok(StatusCounts {
            queued: row.0,
            processing: row.1,
            success: row.2,
            failed: row.3,
            skipped: row.4,
        })
    }
}
