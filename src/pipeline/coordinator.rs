//! The outer worker loop: enumerate running jobs, drive the executor,
//! finish jobs whose queues have drained.

use crate::db::DbContext;
use crate::error::Result;
use crate::pipeline::executor::BatchExecutor;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time;
use tracing::{debug, info, trace, warn};

/// What one coordinator iteration accomplished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tick {
    /// No job is running; the worker's work is finished.
    Idle,
    /// Running jobs exist but nothing was claimable this pass.
    Stalled,
    /// At least one query was processed.
    Worked,
}

/// A single worker loop instance.
///
/// Several coordinators may run in this process and in others; the claim
/// protocol keeps their batches disjoint without any coordination here.
pub struct Coordinator {
    id: usize,
    ctx: DbContext,
    executor: Arc<BatchExecutor>,
    loop_delay: Duration,
    idle_poll: Duration,
}

impl Coordinator {
    pub fn new(
        id: usize,
        ctx: DbContext,
        executor: Arc<BatchExecutor>,
        loop_delay: Duration,
        idle_poll: Duration,
    ) -> Self {
        Self {
            id,
            ctx,
            executor,
            loop_delay,
            idle_poll,
        }
    }

    /// Run until every running job completes or shutdown is signalled.
    ///
    /// Shutdown is honored at batch boundaries only; an in-flight batch
    /// always finishes its writes. Claims abandoned by an abrupt kill are
    /// recovered by the stuck-claim reaper.
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(worker_id = self.id, "worker started");
        loop {
            if shutdown_requested(&mut shutdown_rx) {
                break;
            }
            let pause = match self.tick(&mut shutdown_rx).await {
                Ok(Tick::Idle) => {
                    debug!(worker_id = self.id, "no running jobs, worker finished");
                    break;
                }
                Ok(Tick::Worked) => self.loop_delay,
                Ok(Tick::Stalled) => {
                    trace!(worker_id = self.id, "nothing claimable, waiting");
                    self.idle_poll
                }
                Err(e) => {
                    warn!(worker_id = self.id, error = ?e, "worker iteration failed");
                    self.idle_poll
                }
            };
            // The politeness pause is interruptible; batches are not.
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = time::sleep(pause) => {}
            }
        }
        info!(worker_id = self.id, "worker stopped");
    }

    async fn tick(&self, shutdown_rx: &mut broadcast::Receiver<()>) -> Result<Tick> {
        let running = self.ctx.jobs().running().await?;
        if running.is_empty() {
            return Ok(Tick::Idle);
        }

        let mut worked = false;
        for job in &running {
            if shutdown_requested(shutdown_rx) {
                break;
            }
            let result = match self.executor.process_batch(job).await {
                Ok(result) => result,
                Err(e) => {
                    // One job's bad batch must not starve the others.
                    warn!(worker_id = self.id, job_id = %job.job_id, error = ?e, "batch failed");
                    continue;
                }
            };

            if result.processed > 0 {
                worked = true;
            } else if self.ctx.jobs().mark_done_if_complete(&job.job_id).await? {
                info!(worker_id = self.id, job_id = %job.job_id, "job complete");
            }
        }

        Ok(if worked { Tick::Worked } else { Tick::Stalled })
    }
}

/// Non-blocking shutdown probe. A closed channel counts as shutdown.
fn shutdown_requested(rx: &mut broadcast::Receiver<()>) -> bool {
    !matches!(rx.try_recv(), Err(broadcast::error::TryRecvError::Empty))
}
