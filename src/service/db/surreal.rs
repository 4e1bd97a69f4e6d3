//! SurrealDB implementation for pm-bot data storage.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use surrealdb::{
    Surreal,
    engine::any::{Any, connect},
    opt::auth::Root,
};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::base::{
    config::Config,
    types::{ApprovalStatus, Res, Void},
};

use super::{ApprovalRecord, ApprovalStats, DbClient, GenericDbClient, NewApproval, NewReview, NewTicket, ReviewRecord, TicketRecord, TriageRun};

// Extra methods on `DbClient` applied by the surreal implementation.

impl DbClient {
    /// Creates a new SurrealDB-backed client from configuration.
    pub async fn surreal(config: &Config) -> Res<Self> {
        let client = SurrealDbClient::new(config).await?;
        Ok(Self { inner: Arc::new(client) })
    }

    /// Creates an in-memory SurrealDB-backed client (used by tests).
    pub async fn surreal_memory() -> Res<Self> {
        let client = SurrealDbClient::memory().await?;
        Ok(Self { inner: Arc::new(client) })
    }
}

// Structs.

/// SurrealDB client implementation.
#[derive(Clone)]
pub struct SurrealDbClient {
    db: Surreal<Any>,
}

impl SurrealDbClient {
    /// Create a new database client from configuration.
    #[instrument(name = "SurrealDbClient::new", skip_all)]
    pub async fn new(config: &Config) -> Res<Self> {
        let db = connect(&config.db_endpoint).await?;

        // The embedded engine has no authentication layer.
        if config.db_endpoint != "memory" {
            db.signin(Root {
                username: &config.db_username,
                password: &config.db_password,
            })
            .await?;
        }

        db.use_ns(&config.db_namespace).use_db(&config.db_database).await?;

        Self::define_tables(&db).await?;

        info!("Database initialized successfully.");

        Ok(Self { db })
    }

    /// Create an in-memory database client.
    pub async fn memory() -> Res<Self> {
        let db = connect("memory").await?;

        db.use_ns("pm").use_db("bot").await?;

        Self::define_tables(&db).await?;

        Ok(Self { db })
    }

    async fn define_tables(db: &Surreal<Any>) -> Void {
        db.query("DEFINE TABLE IF NOT EXISTS run SCHEMALESS").await?;
        db.query("DEFINE TABLE IF NOT EXISTS review SCHEMALESS").await?;
        db.query("DEFINE TABLE IF NOT EXISTS ticket SCHEMALESS").await?;
        db.query("DEFINE TABLE IF NOT EXISTS approval SCHEMALESS").await?;
        db.query("DEFINE INDEX IF NOT EXISTS approval_status ON approval FIELDS status").await?;
        db.query("DEFINE INDEX IF NOT EXISTS review_category ON review FIELDS category").await?;

        Ok(())
    }

    /// Loads an approval or errors if it does not exist.
    async fn require_approval(&self, approval_id: &str) -> Res<ApprovalRecord> {
        let approval: Option<ApprovalRecord> = self.db.select(("approval", approval_id)).await?;

        approval.ok_or_else(|| anyhow::anyhow!("Approval `{approval_id}` not found."))
    }

    /// Persists an updated approval record under its existing key.
    async fn put_approval(&self, mut approval: ApprovalRecord) -> Res<ApprovalRecord> {
        // The record id is derived from the key; never write it back.
        approval.id = None;

        let key = approval.approval_id.clone();
        let updated: Option<ApprovalRecord> = self.db.update(("approval", key)).content(approval).await?;

        updated.ok_or_else(|| anyhow::anyhow!("Approval update returned no record."))
    }

    async fn approvals_with_status(&self, status: &str) -> Res<Vec<ApprovalRecord>> {
        let mut response = self.db.query("SELECT * FROM approval WHERE status = $status").bind(("status", status.to_string())).await?;

        let mut approvals: Vec<ApprovalRecord> = response.take(0)?;
        approvals.sort_by_key(|a| a.created_at);

        Ok(approvals)
    }
}

#[async_trait]
impl GenericDbClient for SurrealDbClient {
    #[instrument(skip(self))]
    async fn create_run(&self, input: &str) -> Res<TriageRun> {
        let run_id = Uuid::new_v4().to_string();

        let run = TriageRun {
            id: None,
            run_id: run_id.clone(),
            input: input.to_string(),
            status: "running".to_string(),
            started_at: Utc::now(),
            completed_at: None,
            summary: None,
        };

        let created: Option<TriageRun> = self.db.create(("run", run_id)).content(run).await?;

        created.ok_or_else(|| anyhow::anyhow!("Run creation returned no record."))
    }

    #[instrument(skip(self, summary))]
    async fn complete_run(&self, run_id: &str, status: &str, summary: Value) -> Void {
        let run: Option<TriageRun> = self.db.select(("run", run_id)).await?;
        let mut run = run.ok_or_else(|| anyhow::anyhow!("Run `{run_id}` not found."))?;

        run.id = None;
        run.status = status.to_string();
        run.completed_at = Some(Utc::now());
        run.summary = Some(summary);

        let _: Option<TriageRun> = self.db.update(("run", run_id.to_string())).content(run).await?;

        Ok(())
    }

    #[instrument(skip(self, review))]
    async fn store_review(&self, review: NewReview) -> Res<ReviewRecord> {
        if !(0.0..=1.0).contains(&review.confidence) {
            return Err(anyhow::anyhow!("Confidence must be between 0 and 1, got {}.", review.confidence));
        }

        let record = ReviewRecord {
            id: None,
            review_id: review.review_id.clone(),
            run_id: review.run_id,
            text: review.text,
            category: review.category,
            confidence: review.confidence,
            source: review.source,
            processed_at: Utc::now(),
        };

        let created: Option<ReviewRecord> = self.db.create(("review", review.review_id)).content(record).await?;

        created.ok_or_else(|| anyhow::anyhow!("Review creation returned no record."))
    }

    #[instrument(skip(self))]
    async fn get_review(&self, review_id: &str) -> Res<Option<ReviewRecord>> {
        Ok(self.db.select(("review", review_id)).await?)
    }

    #[instrument(skip(self, ticket))]
    async fn record_ticket(&self, ticket: NewTicket) -> Res<TicketRecord> {
        let record = TicketRecord {
            id: None,
            review_id: ticket.review_id,
            project: ticket.project,
            issue_id: ticket.issue_id.clone(),
            url: ticket.url,
            title: ticket.title,
            duplicate_of: ticket.duplicate_of,
            created_at: Utc::now(),
        };

        // Upsert keeps a retried execution from tripping over its own
        // earlier ticket row.
        let created: Option<TicketRecord> = self.db.upsert(("ticket", ticket.issue_id)).content(record).await?;

        created.ok_or_else(|| anyhow::anyhow!("Ticket creation returned no record."))
    }

    #[instrument(skip(self, new))]
    async fn create_approval(&self, new: NewApproval) -> Res<ApprovalRecord> {
        let approval_id = Uuid::new_v4().to_string();

        let record = ApprovalRecord {
            id: None,
            approval_id: approval_id.clone(),
            action: new.action,
            risk: new.risk,
            status: ApprovalStatus::Pending,
            channel: new.channel,
            message_ts: None,
            reviewer_allowlist: new.reviewer_allowlist,
            review_id: new.review_id,
            audit: new.audit,
            created_at: Utc::now(),
            expires_at: new.expires_at,
            decided_at: None,
            decided_by: None,
            reason: None,
            executed_at: None,
            outcome: None,
            error: None,
            attempts: 0,
        };

        let created: Option<ApprovalRecord> = self.db.create(("approval", approval_id.clone())).content(record).await?;
        let created = created.ok_or_else(|| anyhow::anyhow!("Approval creation returned no record."))?;

        info!("Created approval `{}` ({}, {:?}).", approval_id, created.action.kind(), created.risk);

        Ok(created)
    }

    #[instrument(skip(self))]
    async fn get_approval(&self, approval_id: &str) -> Res<Option<ApprovalRecord>> {
        Ok(self.db.select(("approval", approval_id)).await?)
    }

    #[instrument(skip(self))]
    async fn set_approval_message(&self, approval_id: &str, channel: &str, ts: &str) -> Void {
        let mut approval = self.require_approval(approval_id).await?;

        approval.channel = channel.to_string();
        approval.message_ts = Some(ts.to_string());

        self.put_approval(approval).await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn decide_approval(&self, approval_id: &str, decision: ApprovalStatus, decided_by: &str, reason: Option<&str>) -> Res<ApprovalRecord> {
        if !matches!(decision, ApprovalStatus::Approved | ApprovalStatus::Rejected) {
            return Err(anyhow::anyhow!("Decision must be approved or rejected, got {decision:?}."));
        }

        let mut approval = self.require_approval(approval_id).await?;

        if !approval.status.can_transition_to(decision) {
            return Err(anyhow::anyhow!("Approval `{approval_id}` is not pending (status: {:?}).", approval.status));
        }

        if !approval.reviewer_allowlist.is_empty() && !approval.reviewer_allowlist.iter().any(|r| r == decided_by) {
            return Err(anyhow::anyhow!("User `{decided_by}` is not authorized to decide this approval."));
        }

        approval.status = decision;
        approval.decided_at = Some(Utc::now());
        approval.decided_by = Some(decided_by.to_string());
        approval.reason = reason.map(str::to_string);

        let updated = self.put_approval(approval).await?;

        info!("Approval `{}` decided: {:?} by `{}`.", approval_id, decision, decided_by);

        Ok(updated)
    }

    #[instrument(skip(self, outcome))]
    async fn mark_executed(&self, approval_id: &str, outcome: Value) -> Res<ApprovalRecord> {
        let mut approval = self.require_approval(approval_id).await?;

        if !approval.status.can_transition_to(ApprovalStatus::Executed) {
            return Err(anyhow::anyhow!("Approval `{approval_id}` is not approved (status: {:?}).", approval.status));
        }

        approval.status = ApprovalStatus::Executed;
        approval.executed_at = Some(Utc::now());
        approval.outcome = Some(outcome);

        self.put_approval(approval).await
    }

    #[instrument(skip(self))]
    async fn mark_failed(&self, approval_id: &str, error: &str) -> Res<ApprovalRecord> {
        let mut approval = self.require_approval(approval_id).await?;

        if !approval.status.can_transition_to(ApprovalStatus::Failed) {
            return Err(anyhow::anyhow!("Approval `{approval_id}` is not approved (status: {:?}).", approval.status));
        }

        approval.status = ApprovalStatus::Failed;
        approval.executed_at = Some(Utc::now());
        approval.error = Some(error.to_string());

        self.put_approval(approval).await
    }

    #[instrument(skip(self))]
    async fn bump_attempts(&self, approval_id: &str) -> Res<u32> {
        let mut approval = self.require_approval(approval_id).await?;

        approval.attempts += 1;
        let attempts = approval.attempts;

        self.put_approval(approval).await?;

        Ok(attempts)
    }

    #[instrument(skip(self))]
    async fn pending_approvals(&self) -> Res<Vec<ApprovalRecord>> {
        self.approvals_with_status("pending").await
    }

    #[instrument(skip(self))]
    async fn approved_unexecuted(&self) -> Res<Vec<ApprovalRecord>> {
        self.approvals_with_status("approved").await
    }

    #[instrument(skip(self))]
    async fn expire_stale(&self, now: DateTime<Utc>) -> Res<usize> {
        let pending = self.approvals_with_status("pending").await?;
        let mut count = 0;

        for mut approval in pending {
            if approval.expires_at < now {
                approval.status = ApprovalStatus::Expired;
                self.put_approval(approval).await?;
                count += 1;
            }
        }

        if count > 0 {
            info!("Expired {count} stale approvals.");
        }

        Ok(count)
    }

    #[instrument(skip(self))]
    async fn approval_stats(&self) -> Res<ApprovalStats> {
        let mut response = self.db.query("SELECT * FROM approval").await?;
        let approvals: Vec<ApprovalRecord> = response.take(0)?;

        let mut stats = ApprovalStats {
            total: approvals.len(),
            ..Default::default()
        };

        for approval in &approvals {
            match approval.status {
                ApprovalStatus::Pending => stats.pending += 1,
                ApprovalStatus::Approved => stats.approved += 1,
                ApprovalStatus::Rejected => stats.rejected += 1,
                ApprovalStatus::Executed => stats.executed += 1,
                ApprovalStatus::Failed => stats.failed += 1,
                ApprovalStatus::Expired => stats.expired += 1,
            }
        }

        // Executed and failed actions were approved decisions too.
        let approved_decisions = stats.approved + stats.executed + stats.failed;
        let decided = approved_decisions + stats.rejected;
        stats.approval_rate = if decided > 0 { approved_decisions as f64 / decided as f64 } else { 0.0 };

        Ok(stats)
    }
}

// Tests.

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use serde_json::json;

    use crate::base::types::{Action, IssuePriority, ReviewCategory, RiskLevel};
    use crate::service::db::NewApproval;

    use super::*;

    fn new_approval(risk: RiskLevel) -> NewApproval {
        NewApproval {
            action: Action::CreateIssue {
                project: "DEMO".into(),
                summary: "App crashes on login".into(),
                description: "From review r-1".into(),
                priority: IssuePriority::Major,
                tags: vec![],
            },
            risk,
            channel: "approvals".into(),
            reviewer_allowlist: vec![],
            review_id: Some("r-1".into()),
            audit: None,
            expires_at: Utc::now() + Duration::hours(48),
        }
    }

    #[tokio::test]
    async fn test_approval_lifecycle_to_executed() {
        let db = SurrealDbClient::memory().await.unwrap();

        let approval = db.create_approval(new_approval(RiskLevel::Medium)).await.unwrap();
        assert_eq!(approval.status, ApprovalStatus::Pending);

        let approved = db.decide_approval(&approval.approval_id, ApprovalStatus::Approved, "U123", Some("lgtm")).await.unwrap();
        assert_eq!(approved.status, ApprovalStatus::Approved);
        assert_eq!(approved.decided_by.as_deref(), Some("U123"));

        let executed = db.mark_executed(&approval.approval_id, json!({"issue_id": "DEMO-1"})).await.unwrap();
        assert_eq!(executed.status, ApprovalStatus::Executed);
        assert!(executed.executed_at.is_some());
    }

    #[tokio::test]
    async fn test_rejected_approval_cannot_execute() {
        let db = SurrealDbClient::memory().await.unwrap();

        let approval = db.create_approval(new_approval(RiskLevel::Low)).await.unwrap();
        db.decide_approval(&approval.approval_id, ApprovalStatus::Rejected, "U123", Some("not actionable")).await.unwrap();

        let result = db.mark_executed(&approval.approval_id, json!({})).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_double_decision_is_rejected() {
        let db = SurrealDbClient::memory().await.unwrap();

        let approval = db.create_approval(new_approval(RiskLevel::Medium)).await.unwrap();
        db.decide_approval(&approval.approval_id, ApprovalStatus::Approved, "U123", None).await.unwrap();

        let second = db.decide_approval(&approval.approval_id, ApprovalStatus::Rejected, "U456", None).await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn test_allowlist_is_enforced() {
        let db = SurrealDbClient::memory().await.unwrap();

        let mut new = new_approval(RiskLevel::High);
        new.reviewer_allowlist = vec!["U111".into()];

        let approval = db.create_approval(new).await.unwrap();

        let denied = db.decide_approval(&approval.approval_id, ApprovalStatus::Approved, "U999", None).await;
        assert!(denied.is_err());

        let allowed = db.decide_approval(&approval.approval_id, ApprovalStatus::Approved, "U111", None).await;
        assert!(allowed.is_ok());
    }

    #[tokio::test]
    async fn test_expire_stale_only_touches_overdue_pending() {
        let db = SurrealDbClient::memory().await.unwrap();

        let mut overdue = new_approval(RiskLevel::Low);
        overdue.expires_at = Utc::now() - Duration::hours(1);
        let overdue = db.create_approval(overdue).await.unwrap();

        let fresh = db.create_approval(new_approval(RiskLevel::Low)).await.unwrap();

        let decided = db.create_approval(new_approval(RiskLevel::Low)).await.unwrap();
        db.decide_approval(&decided.approval_id, ApprovalStatus::Approved, "U123", None).await.unwrap();

        let count = db.expire_stale(Utc::now()).await.unwrap();
        assert_eq!(count, 1);

        assert_eq!(db.get_approval(&overdue.approval_id).await.unwrap().unwrap().status, ApprovalStatus::Expired);
        assert_eq!(db.get_approval(&fresh.approval_id).await.unwrap().unwrap().status, ApprovalStatus::Pending);
        assert_eq!(db.get_approval(&decided.approval_id).await.unwrap().unwrap().status, ApprovalStatus::Approved);
    }

    #[tokio::test]
    async fn test_review_confidence_is_validated() {
        let db = SurrealDbClient::memory().await.unwrap();

        let result = db
            .store_review(NewReview {
                review_id: "r-1".into(),
                run_id: "run-1".into(),
                text: "Crashes constantly".into(),
                category: ReviewCategory::Bug,
                confidence: 1.4,
                source: None,
            })
            .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_approval_stats_counts_by_status() {
        let db = SurrealDbClient::memory().await.unwrap();

        let a = db.create_approval(new_approval(RiskLevel::Medium)).await.unwrap();
        let b = db.create_approval(new_approval(RiskLevel::Medium)).await.unwrap();
        let _c = db.create_approval(new_approval(RiskLevel::Medium)).await.unwrap();

        db.decide_approval(&a.approval_id, ApprovalStatus::Approved, "U1", None).await.unwrap();
        db.mark_executed(&a.approval_id, json!({})).await.unwrap();
        db.decide_approval(&b.approval_id, ApprovalStatus::Rejected, "U1", None).await.unwrap();

        let stats = db.approval_stats().await.unwrap();

        assert_eq!(stats.total, 3);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.executed, 1);
        assert_eq!(stats.rejected, 1);
        assert!((stats.approval_rate - 0.5).abs() < f64::EPSILON);
    }
}
