//! Place row persistence.

use crate::db::DbContext;
use crate::db::models::{Job, NewPlace};
use crate::error::Result;
use serde_json::Value;

/// Place operations for one `DbContext`.
pub struct PlaceOps<'a> {
    ctx: &'a DbContext,
}

impl<'a> PlaceOps<'a> {
    pub(crate) fn new(ctx: &'a DbContext) -> Self {
        Self { ctx }
    }

    /// Upsert place rows for a job, keyed by (job_id, place_uid).
    ///
    /// Rows that already exist are left untouched, so re-running a batch
    /// after a crash cannot create duplicates. Statements are chunked to
    /// respect store parameter limits. `ingest_id` attributes the rows to
    /// the claim that produced them.
    ///
    /// # Returns
    /// The number of newly inserted rows.
    pub async fn upsert(
        &self,
        job: &Job,
        places: &[NewPlace],
        ingest_id: &str,
        source: &str,
        chunk_size: usize,
    ) -> Result<u64> {
        let mut inserted = 0;
        for chunk in places.chunks(chunk_size.max(1)) {
            let place_uids: Vec<&str> = chunk.iter().map(|p| p.place_uid.as_str()).collect();
            let payloads: Vec<Option<Value>> = chunk.iter().map(|p| p.payload.clone()).collect();
            let payload_raws: Vec<&str> = chunk.iter().map(|p| p.payload_raw.as_str()).collect();
            let zips: Vec<&str> = chunk.iter().map(|p| p.zip.as_str()).collect();
            let pages: Vec<i32> = chunk.iter().map(|p| p.page).collect();
            let api_statuses: Vec<Option<i32>> = chunk.iter().map(|p| p.api_status).collect();
            let api_mss: Vec<Option<i64>> = chunk.iter().map(|p| p.api_ms).collect();
            let results_counts: Vec<Option<i32>> =
                chunk.iter().map(|p| p.results_count).collect();
            let credits: Vec<Option<i64>> = chunk.iter().map(|p| p.credits).collect();

            let result = sqlx::query(
                r#"
                INSERT INTO places (
                    job_id, place_uid, payload, payload_raw,
                    keyword, state, zip, page,
                    api_status, api_ms, results_count, credits,
                    source, source_version, ingest_id
                )
                SELECT
                    $1, v.place_uid, v.payload, v.payload_raw,
                    $2, $3, v.zip, v.page,
                    v.api_status, v.api_ms, v.results_count, v.credits,
                    $4, $5, $6
                FROM UNNEST(
                    $7::text[], $8::jsonb[], $9::text[], $10::text[], $11::int4[],
                    $12::int4[], $13::int8[], $14::int4[], $15::int8[]
                ) AS v(place_uid, payload, payload_raw, zip, page, api_status, api_ms, results_count, credits)
                ON CONFLICT (job_id, place_uid) DO NOTHING
                "#,
            )
            .bind(&job.job_id)
            .bind(&job.keyword)
            .bind(&job.state)
            .bind(source)
            .bind(env!("CARGO_PKG_VERSION"))
            .bind(ingest_id)
            .bind(&place_uids)
            .bind(&payloads)
            .bind(&payload_raws)
            .bind(&zips)
            .bind(&pages)
            .bind(&api_statuses)
            .bind(&api_mss)
            .bind(&results_counts)
            .bind(&credits)
            .execute(self.ctx.pool())
            .await?;

            inserted += result.rows_affected();
        }
        Ok(inserted)
    }

    /// Total place rows for one job.
    pub async fn count(&self, job_id: &str) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM places WHERE job_id = $1")
            .bind(job_id)
            .fetch_one(self.ctx.pool())
            .await?;
        Ok(count)
    }
}
