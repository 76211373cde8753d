//! Queue protocol tests: idempotent enqueue, atomic claiming,
//! claim-guarded writeback, early exit, and the stuck-claim reaper.

#[allow(dead_code)]
mod helpers;

use chrono::Utc;
use placegrid::db::DbContext;
use placegrid::db::models::{NewQuery, QueryOutcome, QueryStatus};
use placegrid::pipeline::expander::expand_job;
use sqlx::PgPool;
use std::collections::HashSet;
use std::time::Duration;

fn success_outcome(zip: &str, page: i32) -> QueryOutcome {
    QueryOutcome {
        zip: zip.to_owned(),
        page,
        status: QueryStatus::Success,
        api_status: Some(200),
        results_count: Some(5),
        credits: Some(1),
        error: None,
        ran_at: Utc::now(),
    }
}

async fn seed_job_with_queries(
    pool: &PgPool,
    job_id: &str,
    zips: &[String],
    pages: i32,
) -> Vec<NewQuery> {
    helpers::insert_job(pool, job_id, "bars", "AZ", pages, 150, 100).await;
    let ctx = DbContext::new(pool.clone());
    let queries = expand_job("bars", pages, zips);
    ctx.queries().enqueue(job_id, &queries).await.unwrap();
    queries
}

// ── enqueue ─────────────────────────────────────────────────────────

#[sqlx::test]
async fn enqueue_is_idempotent(pool: PgPool) {
    let ctx = DbContext::new(pool.clone());
    helpers::insert_job(&pool, "j1", "bars", "AZ", 2, 150, 100).await;

    let queries = expand_job("bars", 2, &helpers::zip_range(85001, 3));
    let first = ctx.queries().enqueue("j1", &queries).await.unwrap();
    let second = ctx.queries().enqueue("j1", &queries).await.unwrap();

    assert_eq!(first, 6);
    assert_eq!(second, 0, "re-enqueueing must not insert new rows");

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM queries WHERE job_id = 'j1'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 6);
}

#[sqlx::test]
async fn enqueue_preserves_existing_rows(pool: PgPool) {
    let ctx = DbContext::new(pool.clone());
    helpers::insert_job(&pool, "j1", "bars", "AZ", 1, 150, 100).await;
    helpers::insert_query(&pool, "j1", "85001", 1, "success").await;

    let queries = expand_job("bars", 1, &helpers::zip_range(85001, 1));
    let inserted = ctx.queries().enqueue("j1", &queries).await.unwrap();
    assert_eq!(inserted, 0);

    let (status, _, _) = helpers::query_state(&pool, "j1", "85001", 1).await;
    assert_eq!(status, "success", "existing row must not be reset");
}

// ── claim ───────────────────────────────────────────────────────────

#[sqlx::test]
async fn claim_flips_rows_to_processing_with_claim_id(pool: PgPool) {
    let ctx = DbContext::new(pool.clone());
    seed_job_with_queries(&pool, "j1", &helpers::zip_range(85001, 2), 1).await;

    let (claim_id, batch) = ctx.queries().claim("j1", 10).await.unwrap();
    assert_eq!(batch.len(), 2);
    for row in &batch {
        assert_eq!(row.status, QueryStatus::Processing);
        assert_eq!(row.claim_id.as_deref(), Some(claim_id.as_str()));
        assert!(row.claimed_at.is_some());
    }
}

#[sqlx::test]
async fn claim_is_page_major(pool: PgPool) {
    let ctx = DbContext::new(pool.clone());
    seed_job_with_queries(&pool, "j1", &helpers::zip_range(85001, 3), 2).await;

    let (_, batch) = ctx.queries().claim("j1", 4).await.unwrap();
    let keys: Vec<(i32, &str)> = batch.iter().map(|r| (r.page, r.zip.as_str())).collect();
    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(keys.len(), 4);
    // All three page-1 probes come before any page-2 row.
    assert_eq!(
        sorted,
        [(1, "85001"), (1, "85002"), (1, "85003"), (2, "85001")]
    );
}

#[sqlx::test]
async fn sequential_claims_are_disjoint(pool: PgPool) {
    let ctx = DbContext::new(pool.clone());
    seed_job_with_queries(&pool, "j1", &helpers::zip_range(85001, 6), 1).await;

    let (claim_a, batch_a) = ctx.queries().claim("j1", 4).await.unwrap();
    let (claim_b, batch_b) = ctx.queries().claim("j1", 4).await.unwrap();

    assert_ne!(claim_a, claim_b);
    assert_eq!(batch_a.len(), 4);
    assert_eq!(batch_b.len(), 2, "second claim only gets the remainder");

    let a: HashSet<(String, i32)> = batch_a.iter().map(|r| (r.zip.clone(), r.page)).collect();
    let b: HashSet<(String, i32)> = batch_b.iter().map(|r| (r.zip.clone(), r.page)).collect();
    assert!(a.is_disjoint(&b));
}

#[sqlx::test]
async fn concurrent_claims_are_disjoint(pool: PgPool) {
    seed_job_with_queries(&pool, "j1", &helpers::zip_range(85001, 40), 1).await;

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let pool = pool.clone();
        tasks.push(tokio::spawn(async move {
            let ctx = DbContext::new(pool);
            let mut claimed = Vec::new();
            loop {
                let (_, batch) = ctx.queries().claim("j1", 5).await.unwrap();
                if batch.is_empty() {
                    break;
                }
                claimed.extend(batch.into_iter().map(|r| (r.zip, r.page)));
            }
            claimed
        }));
    }

    let mut union: HashSet<(String, i32)> = HashSet::new();
    let mut total = 0usize;
    for task in tasks {
        let claimed = task.await.unwrap();
        total += claimed.len();
        union.extend(claimed);
    }

    // Union size equals the sum of sizes: no row went to two workers.
    assert_eq!(total, 40);
    assert_eq!(union.len(), 40);
}

#[sqlx::test]
async fn claim_skips_non_queued_rows(pool: PgPool) {
    let ctx = DbContext::new(pool.clone());
    helpers::insert_job(&pool, "j1", "bars", "AZ", 1, 150, 100).await;
    helpers::insert_query(&pool, "j1", "85001", 1, "success").await;
    helpers::insert_query(&pool, "j1", "85002", 1, "failed").await;
    helpers::insert_query(&pool, "j1", "85003", 1, "skipped").await;
    helpers::insert_query(&pool, "j1", "85004", 1, "queued").await;

    let (_, batch) = ctx.queries().claim("j1", 10).await.unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].zip, "85004");
}

// ── mark_results ────────────────────────────────────────────────────

#[sqlx::test]
async fn mark_results_updates_claimed_rows(pool: PgPool) {
    let ctx = DbContext::new(pool.clone());
    seed_job_with_queries(&pool, "j1", &helpers::zip_range(85001, 2), 1).await;

    let (claim_id, batch) = ctx.queries().claim("j1", 10).await.unwrap();
    let outcomes: Vec<QueryOutcome> = batch
        .iter()
        .map(|r| success_outcome(&r.zip, r.page))
        .collect();

    let updated = ctx
        .queries()
        .mark_results("j1", &claim_id, &outcomes, 500)
        .await
        .unwrap();
    assert_eq!(updated, 2);

    let (status, claim, _) = helpers::query_state(&pool, "j1", "85001", 1).await;
    assert_eq!(status, "success");
    assert!(claim.is_none(), "claim_id is cleared on writeback");
}

#[sqlx::test]
async fn mark_results_requires_matching_claim(pool: PgPool) {
    let ctx = DbContext::new(pool.clone());
    seed_job_with_queries(&pool, "j1", &helpers::zip_range(85001, 1), 1).await;

    let (_claim_id, _batch) = ctx.queries().claim("j1", 10).await.unwrap();
    let outcomes = vec![success_outcome("85001", 1)];

    let updated = ctx
        .queries()
        .mark_results("j1", "some-other-claim", &outcomes, 500)
        .await
        .unwrap();
    assert_eq!(updated, 0, "a stale writer must not touch the row");

    let (status, claim, _) = helpers::query_state(&pool, "j1", "85001", 1).await;
    assert_eq!(status, "processing");
    assert!(claim.is_some());
}

#[sqlx::test]
async fn mark_results_is_idempotent(pool: PgPool) {
    let ctx = DbContext::new(pool.clone());
    seed_job_with_queries(&pool, "j1", &helpers::zip_range(85001, 1), 1).await;

    let (claim_id, _) = ctx.queries().claim("j1", 10).await.unwrap();
    let outcomes = vec![success_outcome("85001", 1)];

    let first = ctx
        .queries()
        .mark_results("j1", &claim_id, &outcomes, 500)
        .await
        .unwrap();
    let second = ctx
        .queries()
        .mark_results("j1", &claim_id, &outcomes, 500)
        .await
        .unwrap();
    assert_eq!(first, 1);
    assert_eq!(second, 0, "repeating the writeback is a no-op");
}

#[sqlx::test]
async fn terminal_rows_are_never_reclaimed(pool: PgPool) {
    let ctx = DbContext::new(pool.clone());
    seed_job_with_queries(&pool, "j1", &helpers::zip_range(85001, 1), 1).await;

    let (claim_id, _) = ctx.queries().claim("j1", 10).await.unwrap();
    ctx.queries()
        .mark_results("j1", &claim_id, &[success_outcome("85001", 1)], 500)
        .await
        .unwrap();

    let (_, batch) = ctx.queries().claim("j1", 10).await.unwrap();
    assert!(batch.is_empty(), "terminal rows must not be claimable");
}

// ── early exit ──────────────────────────────────────────────────────

#[sqlx::test]
async fn skip_remaining_pages_skips_queued_siblings(pool: PgPool) {
    let ctx = DbContext::new(pool.clone());
    seed_job_with_queries(&pool, "j1", &helpers::zip_range(85001, 2), 3).await;

    let skipped = ctx
        .queries()
        .skip_remaining_pages("j1", "85001", 1, 2, 10)
        .await
        .unwrap();
    assert_eq!(skipped, 2);

    for page in [2, 3] {
        let (status, _, error) = helpers::query_state(&pool, "j1", "85001", page).await;
        assert_eq!(status, "skipped");
        assert_eq!(error.as_deref(), Some("early_exit"));
    }
    // The sibling zip is untouched.
    let (status, _, _) = helpers::query_state(&pool, "j1", "85002", 2).await;
    assert_eq!(status, "queued");
}

#[sqlx::test]
async fn skip_remaining_pages_never_touches_non_queued_rows(pool: PgPool) {
    let ctx = DbContext::new(pool.clone());
    helpers::insert_job(&pool, "j1", "bars", "AZ", 3, 150, 100).await;
    helpers::insert_query(&pool, "j1", "85001", 1, "success").await;
    helpers::insert_query(&pool, "j1", "85001", 2, "success").await;
    helpers::insert_query(&pool, "j1", "85001", 3, "queued").await;

    let skipped = ctx
        .queries()
        .skip_remaining_pages("j1", "85001", 1, 2, 10)
        .await
        .unwrap();
    assert_eq!(skipped, 1, "only the queued page may be skipped");

    let (status, _, _) = helpers::query_state(&pool, "j1", "85001", 2).await;
    assert_eq!(status, "success");
}

#[sqlx::test]
async fn skip_remaining_pages_is_a_noop_when_guarded(pool: PgPool) {
    let ctx = DbContext::new(pool.clone());
    seed_job_with_queries(&pool, "j1", &helpers::zip_range(85001, 1), 3).await;

    // Not a page-1 outcome.
    let skipped = ctx
        .queries()
        .skip_remaining_pages("j1", "85001", 2, 0, 10)
        .await
        .unwrap();
    assert_eq!(skipped, 0);

    // Page 1 was full enough.
    let skipped = ctx
        .queries()
        .skip_remaining_pages("j1", "85001", 1, 10, 10)
        .await
        .unwrap();
    assert_eq!(skipped, 0);
}

// ── stuck-claim reaper ──────────────────────────────────────────────

#[sqlx::test]
async fn reaper_restores_expired_claims(pool: PgPool) {
    let ctx = DbContext::new(pool.clone());
    seed_job_with_queries(&pool, "j1", &helpers::zip_range(85001, 2), 1).await;

    let (_, batch) = ctx.queries().claim("j1", 10).await.unwrap();
    assert_eq!(batch.len(), 2);
    helpers::backdate_claim(&pool, "j1", "85001", 1, Duration::from_secs(2 * 3600)).await;

    let reaped = ctx
        .queries()
        .reap_stuck(Duration::from_secs(3600))
        .await
        .unwrap();
    assert_eq!(reaped, 1, "only the expired claim is reclaimed");

    let (status, claim, _) = helpers::query_state(&pool, "j1", "85001", 1).await;
    assert_eq!(status, "queued");
    assert!(claim.is_none());

    let (status, _, _) = helpers::query_state(&pool, "j1", "85002", 1).await;
    assert_eq!(status, "processing", "fresh claims stay claimed");
}

#[sqlx::test]
async fn reaper_ignores_terminal_rows(pool: PgPool) {
    let ctx = DbContext::new(pool.clone());
    seed_job_with_queries(&pool, "j1", &helpers::zip_range(85001, 1), 1).await;

    let (claim_id, _) = ctx.queries().claim("j1", 10).await.unwrap();
    ctx.queries()
        .mark_results("j1", &claim_id, &[success_outcome("85001", 1)], 500)
        .await
        .unwrap();

    let reaped = ctx.queries().reap_stuck(Duration::ZERO).await.unwrap();
    assert_eq!(reaped, 0);

    let (status, _, _) = helpers::query_state(&pool, "j1", "85001", 1).await;
    assert_eq!(status, "success");
}

#[sqlx::test]
async fn reaped_rows_are_claimable_again(pool: PgPool) {
    let ctx = DbContext::new(pool.clone());
    seed_job_with_queries(&pool, "j1", &helpers::zip_range(85001, 1), 1).await;

    let (first_claim, _) = ctx.queries().claim("j1", 10).await.unwrap();
    ctx.queries().reap_stuck(Duration::ZERO).await.unwrap();

    let (second_claim, batch) = ctx.queries().claim("j1", 10).await.unwrap();
    assert_eq!(batch.len(), 1);
    assert_ne!(first_claim, second_claim);

    // The first claim's writeback must now be rejected.
    let updated = ctx
        .queries()
        .mark_results("j1", &first_claim, &[success_outcome("85001", 1)], 500)
        .await
        .unwrap();
    assert_eq!(updated, 0);
}

// ── counts ──────────────────────────────────────────────────────────

#[sqlx::test]
async fn status_counts_group_by_status(pool: PgPool) {
    let ctx = DbContext::new(pool.clone());
    helpers::insert_job(&pool, "j1", "bars", "AZ", 1, 150, 100).await;
    helpers::insert_query(&pool, "j1", "85001", 1, "queued").await;
    helpers::insert_query(&pool, "j1", "85002", 1, "processing").await;
    helpers::insert_query(&pool, "j1", "85003", 1, "success").await;
    helpers::insert_query(&pool, "j1", "85004", 1, "success").await;
    helpers::insert_query(&pool, "j1", "85005", 1, "failed").await;
    helpers::insert_query(&pool, "j1", "85006", 1, "skipped").await;

    let counts = ctx.queries().status_counts("j1").await.unwrap();
    assert_eq!(counts.queued, 1);
    assert_eq!(counts.processing, 1);
    assert_eq!(counts.success, 2);
    assert_eq!(counts.failed, 1);
    assert_eq!(counts.skipped, 1);
    assert_eq!(counts.pending(), 2);
}
