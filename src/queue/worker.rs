//! The queue worker: drains approved actions by priority, with timeouts,
//! retries, and a periodic sweep for expiry and crash recovery.

use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::time::{MissedTickBehavior, timeout};
use tracing::{error, info, instrument, warn};

use crate::{
    base::{config::Config, types::Void},
    service::db::DbClient,
};

use super::{ApprovalQueue, QueueJob, QueueReceivers, executor::ActionExecutor};

/// Drains the approval queues and executes jobs.
pub struct Worker {
    receivers: QueueReceivers,
    queue: ApprovalQueue,
    executor: ActionExecutor,
    db: DbClient,
    config: Config,
}

impl Worker {
    pub fn new(receivers: QueueReceivers, queue: ApprovalQueue, executor: ActionExecutor, db: DbClient, config: Config) -> Self {
        Self {
            receivers,
            queue,
            executor,
            db,
            config,
        }
    }

    /// Run the worker loop until the queue senders are dropped.
    ///
    /// The select is biased so that, when multiple queues hold jobs, the
    /// highest risk level always drains first.
    #[instrument(name = "Worker::run", skip_all)]
    pub async fn run(mut self) -> Void {
        let mut sweep = tokio::time::interval(Duration::from_secs(self.config.sweep_interval_secs));
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Approval worker started.");

        loop {
            tokio::select! {
                biased;

                job = self.receivers.high.recv() => match job {
                    Some(job) => self.handle_job(job).await,
                    None => break,
                },
                job = self.receivers.medium.recv() => match job {
                    Some(job) => self.handle_job(job).await,
                    None => break,
                },
                job = self.receivers.low.recv() => match job {
                    Some(job) => self.handle_job(job).await,
                    None => break,
                },
                _ = sweep.tick() => {
                    if let Err(err) = self.sweep().await {
                        error!("Worker sweep failed: {err}");
                    }
                },
            }
        }

        info!("Approval worker stopped.");

        Ok(())
    }

    /// Execute one job with a timeout, retrying on failure until the budget
    /// is spent.
    #[instrument(skip(self, job), fields(approval_id = %job.approval_id))]
    async fn handle_job(&self, job: QueueJob) {
        let start = Instant::now();

        let result = timeout(Duration::from_secs(self.config.job_timeout_secs), self.executor.execute(&job.approval_id)).await;

        match result {
            Ok(Ok(_)) => {
                self.queue.metrics.record_success(start.elapsed());
                info!("Executed approval `{}` in {:?}.", job.approval_id, start.elapsed());
            }
            Ok(Err(err)) => {
                self.handle_failure(job, err.to_string()).await;
            }
            Err(_) => {
                self.queue.metrics.record_timeout();
                self.handle_failure(job, format!("execution timed out after {}s", self.config.job_timeout_secs)).await;
            }
        }
    }

    /// Re-enqueue with exponential backoff, or mark the approval failed once
    /// the retry budget is spent.
    async fn handle_failure(&self, job: QueueJob, error: String) {
        let attempts = match self.db.bump_attempts(&job.approval_id).await {
            Ok(attempts) => attempts,
            Err(err) => {
                error!("Failed to record attempt for `{}`: {err}", job.approval_id);
                job.attempt + 1
            }
        };

        if attempts < self.config.max_retries {
            self.queue.metrics.record_retry();

            let delay = Duration::from_millis(self.config.retry_delay_ms * 2_u64.pow(attempts.saturating_sub(1)));
            warn!("Approval `{}` failed (attempt {attempts}/{}), retrying in {delay:?}: {error}", job.approval_id, self.config.max_retries);

            let queue = self.queue.clone();
            let retry = QueueJob { attempt: attempts, ..job };

            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Err(err) = queue.enqueue(retry) {
                    error!("Failed to re-enqueue approval: {err}");
                }
            });
        } else {
            self.queue.metrics.record_failure();
            error!("Approval `{}` failed terminally after {attempts} attempts: {error}", job.approval_id);

            if let Err(err) = self.db.mark_failed(&job.approval_id, &error).await {
                error!("Failed to mark approval `{}` failed: {err}", job.approval_id);
            }
        }
    }

    /// Expire overdue pending approvals and recover approved stragglers that
    /// never made it onto the queue (e.g. after a crash).
    #[instrument(skip_all)]
    async fn sweep(&self) -> Void {
        let expired = self.db.expire_stale(Utc::now()).await?;
        if expired > 0 {
            info!("Sweep expired {expired} pending approvals.");
        }

        // Leave recently decided approvals alone; they are likely already in
        // flight.  The grace window covers a full execution plus one retry.
        let grace = chrono::Duration::seconds((2 * self.config.job_timeout_secs) as i64);
        let cutoff = Utc::now() - grace;

        for approval in self.db.approved_unexecuted().await? {
            let decided_long_ago = approval.decided_at.map(|t| t < cutoff).unwrap_or(true);

            if decided_long_ago && approval.attempts < self.config.max_retries {
                warn!("Sweep re-enqueueing straggler approval `{}`.", approval.approval_id);
                self.queue.enqueue(QueueJob::for_approval(&approval))?;
            }
        }

        let approvals = self.db.approval_stats().await?;
        let queue = self.queue.metrics.stats();
        info!(
            "Heartbeat: {} pending, {} executed, {} failed approvals; queue {} ok / {} failed / {} retries.",
            approvals.pending, approvals.executed, approvals.failed, queue.successes, queue.failures, queue.retries
        );

        Ok(())
    }
}
