//! Review-processing pipelines.
//!
//! Incoming reviews are routed here after classification: bugs flow through a
//! duplicate-aware tracker pipeline, feature requests through competitor
//! research.  Both converge on [`gate_action`], which is the only way a
//! side-effecting action enters the approval workflow.

use serde_json::{Value, json};
use tracing::warn;

use crate::{
    base::{
        config::Config,
        types::{Action, Res, RiskLevel},
    },
    service::{
        chat::ChatClient,
        db::{ApprovalRecord, DbClient, NewApproval},
        llm::LlmClient,
    },
};

pub mod bug;
pub mod feature;
pub mod guardrail;

/// Gate an action behind human approval.
///
/// Runs the hard guardrails, asks the risk judge, creates the `Pending`
/// approval, and posts the interactive request to the risk-appropriate
/// channel.  If posting fails the approval stays pending; the worker sweep
/// and stats keep it visible.
pub async fn gate_action(action: Action, review_id: Option<String>, mut audit: Value, context: &str, config: &Config, db: &DbClient, llm: &LlmClient, chat: &ChatClient) -> Res<ApprovalRecord> {
    guardrail::hard_check(&action, config)?;

    let assessment = guardrail::assess(llm, &action, context).await;
    audit["risk_reasoning"] = json!(assessment.reasoning);

    // Every action stays human-gated; a judge that waives approval only
    // lowers the stakes.
    let risk = if assessment.requires_approval { assessment.risk } else { RiskLevel::Low };

    let channel = config.approval_channel_for(risk).to_string();

    let approval = db
        .create_approval(NewApproval {
            action,
            risk,
            channel: channel.clone(),
            reviewer_allowlist: config.reviewer_allowlist.clone(),
            review_id,
            audit: Some(audit),
            expires_at: chrono::Utc::now() + guardrail::expiry_for(risk, config),
        })
        .await?;

    match chat.post_approval_request(&approval).await {
        Ok(ts) => {
            db.set_approval_message(&approval.approval_id, &channel, &ts).await?;
        }
        Err(err) => {
            warn!("Failed to post approval request for `{}`; it stays pending: {err}", approval.approval_id);
        }
    }

    Ok(db.get_approval(&approval.approval_id).await?.unwrap_or(approval))
}
