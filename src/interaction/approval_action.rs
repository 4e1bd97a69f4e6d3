//! Handling of Approve / Reject decisions from chat.

use tracing::{Instrument, error, info, instrument, warn};

use crate::{
    base::types::{ApprovalStatus, Void},
    queue::{ApprovalQueue, QueueJob},
    service::{chat::ChatClient, db::DbClient},
};

/// Handles a human decision on an approval.
///
/// This spawns a new task to apply the decision asynchronously.  Decision
/// errors (already decided, unauthorized reviewer, unknown id) are reported
/// back into the approval thread rather than dropped.
#[allow(clippy::too_many_arguments)]
#[instrument(skip_all)]
pub fn handle_approval_decision(decision: ApprovalStatus, approval_id: String, decided_by: String, channel: String, message_ts: String, db: DbClient, chat: ChatClient, queue: ApprovalQueue) {
    tokio::spawn(async move {
        // Process the decision.
        let result = handle_approval_decision_internal(decision, &approval_id, &decided_by, &channel, &message_ts, &db, &chat, &queue).in_current_span().await;

        // Log any errors.
        if let Err(err) = &result {
            error!("Error while handling approval decision: {}", err);
        }
    });
}

#[allow(clippy::too_many_arguments)]
#[instrument(skip_all)]
async fn handle_approval_decision_internal(decision: ApprovalStatus, approval_id: &str, decided_by: &str, channel: &str, message_ts: &str, db: &DbClient, chat: &ChatClient, queue: &ApprovalQueue) -> Void {
    let reason = match decision {
        ApprovalStatus::Approved => "Approved via chat",
        _ => "Rejected via chat",
    };

    let approval = match db.decide_approval(approval_id, decision, decided_by, Some(reason)).await {
        Ok(approval) => approval,
        Err(err) => {
            // Surface the problem where the button was clicked.
            warn!("Decision on `{approval_id}` not applied: {err}");
            chat.send_threaded(channel, message_ts, &format!(":warning: Could not apply decision: {err}")).await?;
            return Ok(());
        }
    };

    let text = match decision {
        ApprovalStatus::Approved => format!(":large_green_circle: *Approved* by <@{decided_by}> — `{}` queued for execution.", approval.action.kind()),
        _ => format!(":red_circle: *Rejected* by <@{decided_by}> — `{}` will not run.", approval.action.kind()),
    };

    if let Err(err) = chat.update_approval_message(channel, message_ts, &text).await {
        warn!("Failed to update approval message for `{approval_id}`: {err}");
    }

    if decision == ApprovalStatus::Approved {
        queue.enqueue(QueueJob::for_approval(&approval))?;
        info!("Approval `{approval_id}` queued at {:?} priority.", approval.risk);
    }

    Ok(())
}
