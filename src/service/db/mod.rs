//! Persistence for triage runs, reviews, tickets, and approvals.
//!
//! The `GenericDbClient` trait defines the storage operations the rest of the
//! application depends on, with a default implementation for SurrealDB.  The
//! approval operations are where the status state machine is enforced: every
//! transition goes through this layer and illegal transitions are errors.

use std::{ops::Deref, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::base::types::{Action, ApprovalStatus, Res, ReviewCategory, RiskLevel, Void};

pub mod surreal;

// Traits.

/// Generic database client trait that clients must implement.
///
/// This trait defines the core functionality for storing triage runs, review
/// classifications, tracker tickets, and the approval lifecycle.  Implementing
/// this trait allows different database backends to be used with pm-bot.
#[async_trait]
pub trait GenericDbClient: Send + Sync + 'static {
    /// Creates a new triage run for an intake batch.
    async fn create_run(&self, input: &str) -> Res<TriageRun>;

    /// Completes a triage run with a final status and summary document.
    async fn complete_run(&self, run_id: &str, status: &str, summary: Value) -> Void;

    /// Stores a classified review.
    ///
    /// Rejects confidence values outside `[0, 1]`.
    async fn store_review(&self, review: NewReview) -> Res<ReviewRecord>;

    /// Gets a stored review by its ID.
    async fn get_review(&self, review_id: &str) -> Res<Option<ReviewRecord>>;

    /// Records a tracker ticket created on behalf of a review.
    async fn record_ticket(&self, ticket: NewTicket) -> Res<TicketRecord>;

    /// Creates a new approval in `Pending` state.
    async fn create_approval(&self, new: NewApproval) -> Res<ApprovalRecord>;

    /// Gets an approval by its ID.
    async fn get_approval(&self, approval_id: &str) -> Res<Option<ApprovalRecord>>;

    /// Records where the approval request message was posted.
    async fn set_approval_message(&self, approval_id: &str, channel: &str, ts: &str) -> Void;

    /// Applies a human decision to a pending approval.
    ///
    /// `decision` must be `Approved` or `Rejected`.  Enforces the state
    /// machine and the reviewer allowlist stored on the record.
    async fn decide_approval(&self, approval_id: &str, decision: ApprovalStatus, decided_by: &str, reason: Option<&str>) -> Res<ApprovalRecord>;

    /// Marks an approved action as executed, with its outcome document.
    async fn mark_executed(&self, approval_id: &str, outcome: Value) -> Res<ApprovalRecord>;

    /// Marks an approved action as terminally failed.
    async fn mark_failed(&self, approval_id: &str, error: &str) -> Res<ApprovalRecord>;

    /// Increments and returns the execution attempt counter.
    async fn bump_attempts(&self, approval_id: &str) -> Res<u32>;

    /// All approvals currently pending, oldest first.
    async fn pending_approvals(&self) -> Res<Vec<ApprovalRecord>>;

    /// Approvals that were approved but never reached a terminal state,
    /// oldest first.  Feed for the worker sweep.
    async fn approved_unexecuted(&self) -> Res<Vec<ApprovalRecord>>;

    /// Expires pending approvals whose deadline has passed.  Returns the
    /// number of records expired.
    async fn expire_stale(&self, now: DateTime<Utc>) -> Res<usize>;

    /// Aggregate approval counts by status.
    async fn approval_stats(&self) -> Res<ApprovalStats>;
}

/// Database client for pm-bot.
///
/// This is trivially cloneable and can be passed around without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct DbClient {
    /// The database client instance.
    pub inner: Arc<dyn GenericDbClient>,
}

impl Deref for DbClient {
    type Target = dyn GenericDbClient;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl DbClient {
    pub fn new(inner: Arc<dyn GenericDbClient>) -> Self {
        Self { inner }
    }
}

// Records.

/// A triage run covering one intake batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriageRun {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub run_id: String,
    pub input: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub summary: Option<Value>,
}

/// A new review classification to store.
#[derive(Debug, Clone)]
pub struct NewReview {
    pub review_id: String,
    pub run_id: String,
    pub text: String,
    pub category: ReviewCategory,
    pub confidence: f64,
    pub source: Option<String>,
}

/// A stored review classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub review_id: String,
    pub run_id: String,
    pub text: String,
    pub category: ReviewCategory,
    pub confidence: f64,
    pub source: Option<String>,
    pub processed_at: DateTime<Utc>,
}

/// A new tracker ticket to record.
#[derive(Debug, Clone)]
pub struct NewTicket {
    pub review_id: String,
    pub project: String,
    pub issue_id: String,
    pub url: Option<String>,
    pub title: String,
    pub duplicate_of: Option<String>,
}

/// A tracker ticket created on behalf of a review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub review_id: String,
    pub project: String,
    pub issue_id: String,
    pub url: Option<String>,
    pub title: String,
    pub duplicate_of: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A new approval request.
#[derive(Debug, Clone)]
pub struct NewApproval {
    pub action: Action,
    pub risk: RiskLevel,
    pub channel: String,
    pub reviewer_allowlist: Vec<String>,
    pub review_id: Option<String>,
    pub audit: Option<Value>,
    pub expires_at: DateTime<Utc>,
}

/// An approval record with full lifecycle state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub approval_id: String,
    pub action: Action,
    pub risk: RiskLevel,
    pub status: ApprovalStatus,
    pub channel: String,
    pub message_ts: Option<String>,
    pub reviewer_allowlist: Vec<String>,
    pub review_id: Option<String>,
    pub audit: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub decided_by: Option<String>,
    pub reason: Option<String>,
    pub executed_at: Option<DateTime<Utc>>,
    pub outcome: Option<Value>,
    pub error: Option<String>,
    pub attempts: u32,
}

/// Aggregate approval counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApprovalStats {
    pub total: usize,
    pub pending: usize,
    pub approved: usize,
    pub rejected: usize,
    pub executed: usize,
    pub failed: usize,
    pub expired: usize,
    /// Approved / (approved + rejected), counting every decision ever made.
    pub approval_rate: f64,
}
