//! The approval execution queue.
//!
//! Approved actions are routed onto one of three in-process queues keyed by
//! risk level.  The worker drains them highest-risk-first and executes each
//! action with a timeout and retry budget; see [`worker`] and [`executor`].

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::debug;

use crate::base::types::{RiskLevel, Void};
use crate::service::db::ApprovalRecord;

pub mod executor;
pub mod worker;

/// One unit of work: execute the action behind an approved approval.
#[derive(Debug, Clone)]
pub struct QueueJob {
    pub approval_id: String,
    pub risk: RiskLevel,
    pub enqueued_at: DateTime<Utc>,
    /// Failed execution attempts so far.
    pub attempt: u32,
}

impl QueueJob {
    pub fn for_approval(approval: &ApprovalRecord) -> Self {
        Self {
            approval_id: approval.approval_id.clone(),
            risk: approval.risk,
            enqueued_at: Utc::now(),
            attempt: approval.attempts,
        }
    }
}

/// Sending half of the approval queue.
///
/// This is trivially cloneable and can be passed around without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct ApprovalQueue {
    high: mpsc::UnboundedSender<QueueJob>,
    medium: mpsc::UnboundedSender<QueueJob>,
    low: mpsc::UnboundedSender<QueueJob>,
    pub metrics: Arc<QueueMetrics>,
}

/// Receiving half of the approval queue, owned by the worker.
pub struct QueueReceivers {
    pub high: mpsc::UnboundedReceiver<QueueJob>,
    pub medium: mpsc::UnboundedReceiver<QueueJob>,
    pub low: mpsc::UnboundedReceiver<QueueJob>,
}

impl ApprovalQueue {
    /// Create the queue, returning the sender and the worker's receivers.
    pub fn new() -> (Self, QueueReceivers) {
        let (high_tx, high_rx) = mpsc::unbounded_channel();
        let (medium_tx, medium_rx) = mpsc::unbounded_channel();
        let (low_tx, low_rx) = mpsc::unbounded_channel();

        let queue = Self {
            high: high_tx,
            medium: medium_tx,
            low: low_tx,
            metrics: Arc::new(QueueMetrics::new()),
        };

        let receivers = QueueReceivers {
            high: high_rx,
            medium: medium_rx,
            low: low_rx,
        };

        (queue, receivers)
    }

    /// Route a job onto the queue matching its risk level.
    pub fn enqueue(&self, job: QueueJob) -> Void {
        let sender = match job.risk {
            RiskLevel::High => &self.high,
            RiskLevel::Medium => &self.medium,
            RiskLevel::Low => &self.low,
        };

        debug!("Enqueueing approval `{}` at {:?} priority (attempt {}).", job.approval_id, job.risk, job.attempt);

        sender.send(job).map_err(|e| anyhow::anyhow!("Queue receiver dropped: {e}"))?;

        Ok(())
    }
}

/// In-process metrics for queue executions.
pub struct QueueMetrics {
    started: Instant,
    successes: AtomicU64,
    failures: AtomicU64,
    timeouts: AtomicU64,
    retries: AtomicU64,
    total_execution_ms: AtomicU64,
}

/// Snapshot of the queue metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueStats {
    pub successes: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub retries: u64,
    pub success_rate: f64,
    pub avg_execution_ms: f64,
    pub uptime: Duration,
}

impl QueueMetrics {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            total_execution_ms: AtomicU64::new(0),
        }
    }

    pub fn record_success(&self, elapsed: Duration) {
        self.successes.fetch_add(1, Ordering::Relaxed);
        self.total_execution_ms.fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
    }

    /// A terminal failure: the retry budget is spent.
    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> QueueStats {
        let successes = self.successes.load(Ordering::Relaxed);
        let failures = self.failures.load(Ordering::Relaxed);
        let terminal = successes + failures;

        QueueStats {
            successes,
            failures,
            timeouts: self.timeouts.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            success_rate: if terminal > 0 { successes as f64 / terminal as f64 } else { 0.0 },
            avg_execution_ms: if successes > 0 { self.total_execution_ms.load(Ordering::Relaxed) as f64 / successes as f64 } else { 0.0 },
            uptime: self.started.elapsed(),
        }
    }
}

// Tests.
