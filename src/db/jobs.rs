//! Job record operations: creation, rollup aggregation, completion.

use crate::db::DbContext;
use crate::db::models::{Job, NewJob};
use crate::error::Result;

/// Job operations for one `DbContext`.
pub struct JobOps<'a> {
    ctx: &'a DbContext,
}

impl<'a> JobOps<'a> {
    pub(crate) fn new(ctx: &'a DbContext) -> Self {
        Self { ctx }
    }

    /// Insert a new job in `running` state.
    ///
    /// A row that already exists under the same id is left untouched, so
    /// re-running an interrupted creation cannot clobber the original
    /// frozen parameters.
    pub async fn insert(&self, job: &NewJob) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO jobs (job_id, keyword, state, pages, batch_size, concurrency, dry_run)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (job_id) DO NOTHING
            "#,
        )
        .bind(&job.job_id)
        .bind(&job.keyword)
        .bind(&job.state)
        .bind(job.pages)
        .bind(job.batch_size)
        .bind(job.concurrency)
        .bind(job.dry_run)
        .execute(self.ctx.pool())
        .await?;
        Ok(())
    }

    /// Fetch a job by id.
    pub async fn get(&self, job_id: &str) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE job_id = $1")
            .bind(job_id)
            .fetch_optional(self.ctx.pool())
            .await?;
        Ok(job)
    }

    /// All jobs currently in `running` state, oldest first.
    pub async fn running(&self) -> Result<Vec<Job>> {
        let jobs = sqlx::query_as::<_, Job>(
            "SELECT * FROM jobs WHERE status = 'running' ORDER BY created_at ASC",
        )
        .fetch_all(self.ctx.pool())
        .await?;
        Ok(jobs)
    }

    /// Stamp `started_at` the first time a batch is claimed for the job.
    pub async fn mark_started(&self, job_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET started_at = COALESCE(started_at, NOW()) WHERE job_id = $1",
        )
        .bind(job_id)
        .execute(self.ctx.pool())
        .await?;
        Ok(())
    }

    /// Recompute the job rollup from the authoritative per-query table.
    ///
    /// `total_credits` sums every non-queued row so failed attempts that
    /// were still billed are accounted for.
    pub async fn update_stats(&self, job_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs SET
                total_zips = s.zips,
                total_queries = s.queries,
                total_successes = s.successes,
                total_failures = s.failures,
                total_skipped = s.skipped,
                total_places = p.places,
                total_credits = s.credits
            FROM (
                SELECT
                    COUNT(DISTINCT zip) AS zips,
                    COUNT(*) AS queries,
                    COUNT(*) FILTER (WHERE status = 'success') AS successes,
                    COUNT(*) FILTER (WHERE status = 'failed') AS failures,
                    COUNT(*) FILTER (WHERE status = 'skipped') AS skipped,
                    COALESCE(SUM(credits) FILTER (WHERE status <> 'queued'), 0) AS credits
                FROM queries WHERE job_id = $1
            ) s, (
                SELECT COUNT(*) AS places FROM places WHERE job_id = $1
            ) p
            WHERE jobs.job_id = $1
            "#,
        )
        .bind(job_id)
        .execute(self.ctx.pool())
        .await?;
        Ok(())
    }

    /// Mark the job done iff no queued or processing rows remain.
    ///
    /// The completion predicate is evaluated inside the update, so
    /// concurrent workers cannot finish a job that still has claimable
    /// work. Safe to repeat; `finished_at` is written once.
    ///
    /// # Returns
    /// `true` if this call transitioned the job to `done`.
    pub async fn mark_done_if_complete(&self, job_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET status = 'done', finished_at = COALESCE(finished_at, NOW())
            WHERE job_id = $1 AND status = 'running'
              AND NOT EXISTS (
                  SELECT 1 FROM queries
                  WHERE job_id = $1 AND status IN ('queued', 'processing')
              )
            "#,
        )
        .bind(job_id)
        .execute(self.ctx.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Credits consumed by jobs created on the current date.
    pub async fn credits_spent_today(&self) -> Result<i64> {
        let (credits,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(SUM(total_credits), 0)::BIGINT FROM jobs WHERE created_at::date = CURRENT_DATE",
        )
        .fetch_one(self.ctx.pool())
        .await?;
        Ok(credits)
    }
}
