//! Executes approved actions against the tracker and chat services.

use serde_json::{Value, json};
use tracing::{info, instrument, warn};

use crate::{
    base::types::{Action, ApprovalStatus, Res},
    service::{
        chat::ChatClient,
        db::{DbClient, NewTicket},
        tracker::{IssueDraft, TrackerClient},
    },
};

/// Executes the action behind an approved approval.
///
/// This is trivially cloneable and can be passed around without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct ActionExecutor {
    db: DbClient,
    chat: ChatClient,
    tracker: TrackerClient,
}

impl ActionExecutor {
    pub fn new(db: DbClient, chat: ChatClient, tracker: TrackerClient) -> Self {
        Self { db, chat, tracker }
    }

    /// Execute a single approval and mark it executed with its outcome.
    ///
    /// Only `Approved` approvals execute; anything else is an error and the
    /// worker owns the retry/fail policy around it.
    #[instrument(skip(self))]
    pub async fn execute(&self, approval_id: &str) -> Res<Value> {
        let approval = self.db.get_approval(approval_id).await?.ok_or_else(|| anyhow::anyhow!("Approval `{approval_id}` not found."))?;

        if approval.status != ApprovalStatus::Approved {
            return Err(anyhow::anyhow!("Approval `{approval_id}` is not approved (status: {:?}).", approval.status));
        }

        info!("Executing approved action `{}` for `{}`.", approval.action.kind(), approval_id);

        let outcome = match &approval.action {
            Action::CreateIssue {
                project,
                summary,
                description,
                priority,
                tags,
            } => {
                let draft = IssueDraft {
                    project: project.clone(),
                    summary: summary.clone(),
                    description: description.clone(),
                    issue_type: "Bug".to_string(),
                    priority: priority.as_str().to_string(),
                    tags: tags.clone(),
                };

                let created = self.tracker.create_issue(&draft).await?;

                if let Some(review_id) = &approval.review_id {
                    self.db
                        .record_ticket(NewTicket {
                            review_id: review_id.clone(),
                            project: project.clone(),
                            issue_id: created.issue_id.clone(),
                            url: created.url.clone(),
                            title: summary.clone(),
                            duplicate_of: None,
                        })
                        .await?;
                }

                json!({
                    "action": "created_issue",
                    "issue_id": created.issue_id,
                    "url": created.url,
                    "project": project,
                })
            }
            Action::AddComment { issue_id, comment } => {
                let comment_id = self.tracker.add_comment(issue_id, comment).await?;

                json!({
                    "action": "commented_on_duplicate",
                    "issue_id": issue_id,
                    "comment_id": comment_id,
                })
            }
            Action::PostMessage { channel, message } => {
                let ts = self.chat.send_message(channel, message).await?;

                json!({
                    "action": "posted_report",
                    "channel": channel,
                    "ts": ts,
                })
            }
        };

        let updated = self.db.mark_executed(approval_id, outcome.clone()).await?;

        // Close the loop in the approval thread; a notification failure is not
        // an execution failure.
        if let Some(ts) = &updated.message_ts {
            let text = format!(":white_check_mark: Executed `{}` — {}", updated.action.kind(), render_outcome(&outcome));
            if let Err(err) = self.chat.send_threaded(&updated.channel, ts, &text).await {
                warn!("Failed to send execution notification: {err}");
            }
        }

        Ok(outcome)
    }
}

/// One-line rendering of an outcome document for chat.
fn render_outcome(outcome: &Value) -> String {
    match outcome.get("action").and_then(|a| a.as_str()) {
        Some("created_issue") => {
            let issue_id = outcome.get("issue_id").and_then(|v| v.as_str()).unwrap_or("?");
            match outcome.get("url").and_then(|v| v.as_str()) {
                Some(url) => format!("created <{url}|{issue_id}>"),
                None => format!("created `{issue_id}`"),
            }
        }
        Some("commented_on_duplicate") => {
            let issue_id = outcome.get("issue_id").and_then(|v| v.as_str()).unwrap_or("?");
            format!("commented on `{issue_id}`")
        }
        Some("posted_report") => {
            let channel = outcome.get("channel").and_then(|v| v.as_str()).unwrap_or("?");
            format!("posted report to `{channel}`")
        }
        _ => "done".to_string(),
    }
}

// Tests.

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_render_outcome_variants() {
        let created = json!({"action": "created_issue", "issue_id": "DEMO-9", "url": "https://yt.example/DEMO-9"});
        assert_eq!(render_outcome(&created), "created <https://yt.example/DEMO-9|DEMO-9>");

        let commented = json!({"action": "commented_on_duplicate", "issue_id": "DEMO-3"});
        assert_eq!(render_outcome(&commented), "commented on `DEMO-3`");

        let posted = json!({"action": "posted_report", "channel": "product"});
        assert_eq!(render_outcome(&posted), "posted report to `product`");

        assert_eq!(render_outcome(&json!({})), "done");
    }
}
