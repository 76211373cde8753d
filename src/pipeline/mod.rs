//! The batch-processing engine: expansion, execution, coordination.

pub mod budget;
pub mod coordinator;
pub mod executor;
pub mod expander;
pub mod lifecycle;

use crate::config::Config;
use crate::db::DbContext;
use crate::error::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use self::coordinator::Coordinator;
use self::executor::BatchExecutor;

/// Owns the worker pool and the stuck-claim reaper for one
/// `process-batches` run.
pub struct ProcessorService {
    ctx: DbContext,
    executor: Arc<BatchExecutor>,
    workers: usize,
    loop_delay: Duration,
    idle_poll: Duration,
    reclaim_after: Duration,
}

impl ProcessorService {
    pub fn from_config(ctx: DbContext, executor: Arc<BatchExecutor>, config: &Config) -> Self {
        Self {
            ctx,
            executor,
            workers: config.processor_max_workers.max(1),
            loop_delay: config.processor_loop_delay_seconds,
            idle_poll: config.idle_poll_interval,
            reclaim_after: config.reclaim_after_seconds,
        }
    }

    /// Run workers until every running job completes.
    ///
    /// Claims abandoned by a previous unclean shutdown are reclaimed once
    /// up front, then swept periodically while workers run. Sending on
    /// `shutdown_tx` stops all workers at their next batch boundary.
    pub async fn run(&self, shutdown_tx: broadcast::Sender<()>) -> Result<()> {
        match self.ctx.queries().reap_stuck(self.reclaim_after).await {
            Ok(0) => {}
            Ok(count) => warn!(count, "reclaimed stale claims from a previous run"),
            Err(e) => warn!(error = ?e, "failed to reclaim stale claims"),
        }

        let reaper_token = CancellationToken::new();
        let reaper_handle = self.spawn_reaper(reaper_token.clone());

        let mut worker_handles = Vec::with_capacity(self.workers);
        for id in 0..self.workers {
            let worker = Coordinator::new(
                id,
                self.ctx.clone(),
                self.executor.clone(),
                self.loop_delay,
                self.idle_poll,
            );
            let shutdown_rx = shutdown_tx.subscribe();
            worker_handles.push(tokio::spawn(async move {
                worker.run(shutdown_rx).await;
            }));
        }
        info!(worker_count = self.workers, "spawned worker tasks");

        let results = futures::future::join_all(worker_handles).await;

        reaper_token.cancel();
        let _ = reaper_handle.await;

        let panicked = results.iter().filter(|r| r.is_err()).count();
        if panicked > 0 {
            return Err(anyhow::anyhow!("{panicked} worker task(s) panicked").into());
        }
        Ok(())
    }

    fn spawn_reaper(&self, token: CancellationToken) -> tokio::task::JoinHandle<()> {
        let ctx = self.ctx.clone();
        let reclaim_after = self.reclaim_after;
        let sweep_interval = (reclaim_after / 2).max(Duration::from_secs(30));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately and duplicates the startup
            // sweep; reaping is idempotent so that is harmless.
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        match ctx.queries().reap_stuck(reclaim_after).await {
                            Ok(0) => {}
                            Ok(count) => warn!(count, "returned expired claims to the queue"),
                            Err(e) => warn!(error = ?e, "stuck-claim sweep failed"),
                        }
                    }
                }
            }
        })
    }
}
