//! Batch execution: claim, parallel fan-out, idempotent persistence.

use crate::config::Config;
use crate::db::DbContext;
use crate::db::models::{Job, NewPlace, QueryOutcome, QueryStatus};
use crate::error::Result;
use crate::serper::{RetryPolicy, SearchApi, SearchError, SearchOutcome, search_with_retries};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// How much of a failure message is recorded on the query row.
const ERROR_COLUMN_LIMIT: usize = 500;

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub early_exit_threshold: i32,
    pub merge_chunk_size: usize,
}

impl ExecutorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            early_exit_threshold: config.early_exit_threshold,
            merge_chunk_size: config.merge_chunk_size,
        }
    }
}

/// Outcome summary of one processed batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchResult {
    pub processed: usize,
    pub places: u64,
    pub credits: i64,
}

/// Executes one claimed batch at a time for any job.
///
/// Holds both the live and the synthetic search client; dry-run jobs are
/// routed to the synthetic one so they exercise the full pipeline without
/// external spend.
pub struct BatchExecutor {
    ctx: DbContext,
    live: Arc<dyn SearchApi>,
    dry: Arc<dyn SearchApi>,
    retry: RetryPolicy,
    settings: ExecutorSettings,
}

impl BatchExecutor {
    pub fn new(
        ctx: DbContext,
        live: Arc<dyn SearchApi>,
        dry: Arc<dyn SearchApi>,
        retry: RetryPolicy,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            ctx,
            live,
            dry,
            retry,
            settings,
        }
    }

    fn api_for(&self, job: &Job) -> Arc<dyn SearchApi> {
        if job.dry_run {
            self.dry.clone()
        } else {
            self.live.clone()
        }
    }

    /// Claim and process one batch for `job`.
    ///
    /// Fan-out is bounded by the job's `concurrency`; one task per query.
    /// A failed search marks only its own query `failed`. Places are
    /// persisted strictly before query statuses: after a crash between the
    /// two writes, the reaped queries re-run and their places land on the
    /// existing rows as no-ops. A places-upsert failure therefore aborts
    /// the batch before any query is marked, leaving the claim to expire.
    pub async fn process_batch(&self, job: &Job) -> Result<BatchResult> {
        let (claim_id, batch) = self.ctx.queries().claim(&job.job_id, job.batch_size).await?;
        if batch.is_empty() {
            return Ok(BatchResult::default());
        }
        self.ctx.jobs().mark_started(&job.job_id).await?;

        let api = self.api_for(job);
        let semaphore = Arc::new(Semaphore::new(job.concurrency.max(1) as usize));
        let mut tasks = Vec::with_capacity(batch.len());
        for query in &batch {
            let api = api.clone();
            let semaphore = semaphore.clone();
            let retry = self.retry.clone();
            let q = query.q.clone();
            let page = query.page;
            tasks.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| SearchError::Transport("worker pool closed".into()))?;
                let result = search_with_retries(api.as_ref(), &retry, &q, page).await;
                let ran_at = Utc::now();
                result.map(|outcome| (outcome, ran_at))
            }));
        }
        let results = futures::future::join_all(tasks).await;

        let mut outcomes: Vec<QueryOutcome> = Vec::with_capacity(batch.len());
        let mut new_places: Vec<NewPlace> = Vec::new();
        let mut seen_uids: HashSet<String> = HashSet::new();
        let mut early_exits: Vec<(String, i32)> = Vec::new();
        let mut credits_total = 0i64;
        let mut parse_failures = 0usize;

        for (query, joined) in batch.iter().zip(results) {
            let settled: std::result::Result<(SearchOutcome, DateTime<Utc>), SearchError> =
                match joined {
                    Ok(settled) => settled,
                    Err(join_err) => {
                        // A panicked task fails its own query, not the batch.
                        outcomes.push(failure_outcome(
                            query.zip.clone(),
                            query.page,
                            None,
                            None,
                            format!("search task failed: {join_err}"),
                        ));
                        continue;
                    }
                };

            match settled {
                Ok((outcome, ran_at)) => {
                    let SearchOutcome {
                        places,
                        credits,
                        api_status,
                        elapsed_ms,
                        parse_failures: failures,
                        dropped: _,
                    } = outcome;
                    let results_count = places.len() as i32;
                    credits_total += credits;
                    parse_failures += failures;

                    for place in places {
                        if seen_uids.insert(place.place_uid.clone()) {
                            new_places.push(NewPlace {
                                place_uid: place.place_uid,
                                payload: place.payload,
                                payload_raw: place.payload_raw,
                                zip: query.zip.clone(),
                                page: query.page,
                                api_status: Some(api_status as i32),
                                api_ms: Some(elapsed_ms),
                                results_count: Some(results_count),
                                credits: Some(credits),
                            });
                        }
                    }

                    if query.page == 1 && results_count < self.settings.early_exit_threshold {
                        early_exits.push((query.zip.clone(), results_count));
                    }

                    outcomes.push(QueryOutcome {
                        zip: query.zip.clone(),
                        page: query.page,
                        status: QueryStatus::Success,
                        api_status: Some(api_status as i32),
                        results_count: Some(results_count),
                        credits: Some(credits),
                        error: None,
                        ran_at,
                    });
                }
                Err(err) => {
                    credits_total += err.credits().unwrap_or(0);
                    outcomes.push(failure_outcome(
                        query.zip.clone(),
                        query.page,
                        err.api_status(),
                        err.credits(),
                        err.to_string(),
                    ));
                }
            }
        }

        if parse_failures > 0 {
            warn!(
                job_id = %job.job_id,
                parse_failures, "place payloads failed typed parsing; raw text retained"
            );
        }

        let inserted = self
            .ctx
            .places()
            .upsert(
                job,
                &new_places,
                &claim_id,
                api.source(),
                self.settings.merge_chunk_size,
            )
            .await?;

        self.ctx
            .queries()
            .mark_results(
                &job.job_id,
                &claim_id,
                &outcomes,
                self.settings.merge_chunk_size,
            )
            .await?;

        for (zip, results_count) in &early_exits {
            self.ctx
                .queries()
                .skip_remaining_pages(
                    &job.job_id,
                    zip,
                    1,
                    *results_count,
                    self.settings.early_exit_threshold,
                )
                .await?;
        }

        self.ctx.jobs().update_stats(&job.job_id).await?;

        info!(
            job_id = %job.job_id,
            claim_id = %claim_id,
            processed = batch.len(),
            places = inserted,
            credits = credits_total,
            "batch processed"
        );

        Ok(BatchResult {
            processed: batch.len(),
            places: inserted,
            credits: credits_total,
        })
    }
}

fn failure_outcome(
    zip: String,
    page: i32,
    api_status: Option<i32>,
    credits: Option<i64>,
    error: String,
) -> QueryOutcome {
    QueryOutcome {
        zip,
        page,
        status: QueryStatus::Failed,
        api_status,
        results_count: None,
        credits,
        error: Some(crate::serper::truncate_on_boundary(error, ERROR_COLUMN_LIMIT)),
        ran_at: Utc::now(),
    }
}
