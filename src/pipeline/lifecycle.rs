//! Job creation and completion.

use crate::config::Config;
use crate::db::DbContext;
use crate::db::models::NewJob;
use crate::error::{Error, Result};
use crate::pipeline::budget::BudgetGuard;
use crate::pipeline::expander::expand_job;
use chrono::Utc;
use tracing::info;

/// Client-supplied parameters for a new job.
#[derive(Debug, Clone)]
pub struct JobSpec {
    /// Caller-chosen job id; a fresh one is generated when absent.
    pub job_id: Option<String>,
    pub keyword: String,
    pub state: String,
    pub pages: i32,
    pub batch_size: i32,
    pub concurrency: i32,
    pub dry_run: bool,
}

/// Validate, budget-gate, expand, and enqueue a new job.
///
/// Nothing is persisted unless validation and the budget gate both pass.
/// When the caller supplies a job id, creation is idempotent end to end:
/// the job insert and the enqueue both leave existing rows untouched, so a
/// creator that crashed between the two can re-run with the same id and
/// fill in whatever is missing. Without a supplied id every call mints a
/// fresh job; a crash mid-creation then strands the half-created job and
/// the retry starts over under a new id.
///
/// # Returns
/// The job id.
pub async fn create_job(ctx: &DbContext, config: &Config, spec: JobSpec) -> Result<String> {
    let spec = validate(spec)?;

    let zips = ctx.reference().zips_for_state(&spec.state).await?;
    if zips.is_empty() {
        return Err(Error::Validation(format!(
            "no zip codes known for state {}",
            spec.state
        )));
    }

    let guard = BudgetGuard::from_config(config);
    let estimate = guard.estimate(zips.len(), spec.pages);
    let spent_today = ctx.jobs().credits_spent_today().await?;
    guard.check(&estimate, spent_today)?;

    let job_id = match &spec.job_id {
        Some(id) => id.clone(),
        None => new_job_id(&spec.keyword, &spec.state),
    };
    ctx.jobs()
        .insert(&NewJob {
            job_id: job_id.clone(),
            keyword: spec.keyword.clone(),
            state: spec.state.clone(),
            pages: spec.pages,
            batch_size: spec.batch_size,
            concurrency: spec.concurrency,
            dry_run: spec.dry_run,
        })
        .await?;

    let queries = expand_job(&spec.keyword, spec.pages, &zips);
    let inserted = ctx.queries().enqueue(&job_id, &queries).await?;
    ctx.jobs().update_stats(&job_id).await?;

    info!(
        job_id = %job_id,
        keyword = %spec.keyword,
        state = %spec.state,
        zips = zips.len(),
        queries = queries.len(),
        inserted,
        estimated_credits = estimate.credits,
        dry_run = spec.dry_run,
        "job created"
    );

    Ok(job_id)
}

fn validate(mut spec: JobSpec) -> Result<JobSpec> {
    if let Some(job_id) = &mut spec.job_id {
        let trimmed = job_id.trim();
        if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
            return Err(Error::Validation(
                "job id must be non-empty and contain no whitespace".into(),
            ));
        }
        *job_id = trimmed.to_owned();
    }

    spec.keyword = spec.keyword.trim().to_owned();
    if spec.keyword.is_empty() {
        return Err(Error::Validation("keyword must not be empty".into()));
    }

    spec.state = spec.state.trim().to_ascii_uppercase();
    if spec.state.len() != 2 || !spec.state.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(Error::Validation(format!(
            "state must be a two-letter code, got {:?}",
            spec.state
        )));
    }

    if spec.pages < 1 {
        return Err(Error::Validation("pages must be at least 1".into()));
    }
    if spec.batch_size < 1 {
        return Err(Error::Validation("batch size must be at least 1".into()));
    }
    if spec.concurrency < 1 {
        return Err(Error::Validation("concurrency must be at least 1".into()));
    }

    Ok(spec)
}

/// Opaque, unique, human-scannable job id.
fn new_job_id(keyword: &str, state: &str) -> String {
    let slug: String = keyword
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-");

    let millis = Utc::now().timestamp_millis();
    let nonce: u16 = rand::random();
    format!("{slug}-{}-{millis:x}{nonce:04x}", state.to_ascii_lowercase())
}
