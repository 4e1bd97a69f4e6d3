//! Slack integration for pm-bot.
//!
//! This module posts interactive approval requests, listens for the
//! Approve / Reject button clicks over socket mode, and routes decisions into
//! the approval pipeline.

use crate::{
    base::{
        config::Config,
        types::{ApprovalStatus, Res, Void},
    },
    interaction,
    queue::ApprovalQueue,
    service::db::{ApprovalRecord, DbClient},
};
use async_trait::async_trait;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use slack_morphism::prelude::*;
use tracing::{info, instrument, warn};

use std::{ops::Deref, sync::Arc};

use super::{ChatClient, GenericChatClient};

// Type aliases.

type FullClient = slack_morphism::SlackClient<SlackClientHyperConnector<HttpsConnector<HttpConnector>>>;

// Extra methods on `ChatClient` applied by the slack implementation.

impl ChatClient {
    /// Creates a new Slack chat client.
    pub async fn slack(config: &Config, db: DbClient, queue: ApprovalQueue) -> Res<Self> {
        let client = SlackChatClient::new(config, db, queue).await?;
        Ok(Self { inner: Arc::new(client) })
    }
}

impl From<SlackChatClient> for ChatClient {
    fn from(client: SlackChatClient) -> Self {
        Self { inner: Arc::new(client) }
    }
}

// Structs.

/// User state for the slack socket client.
struct SlackUserState {
    db: DbClient,
    chat: ChatClient,
    queue: ApprovalQueue,
}

/// Slack client implementation.
#[derive(Clone)]
struct SlackChatClient {
    pub app_token: SlackApiToken,
    pub bot_token: SlackApiToken,
    pub bot_user_id: String,
    pub client: Arc<FullClient>,
    pub db: DbClient,
    pub queue: ApprovalQueue,
}

impl Deref for SlackChatClient {
    type Target = FullClient;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

impl SlackChatClient {
    /// Create a new Slack chat client.
    #[instrument(name = "SlackChatClient::new", skip_all)]
    pub async fn new(config: &Config, db: DbClient, queue: ApprovalQueue) -> Res<Self> {
        // Initialize tokens.

        let app_token = SlackApiToken::new(SlackApiTokenValue(config.slack_app_token.clone()));
        let bot_token = SlackApiToken::new(SlackApiTokenValue(config.slack_bot_token.clone()));

        // Initialize the Slack client.

        let https_connector = HttpsConnector::<HttpConnector>::builder().with_native_roots()?.https_only().enable_all_versions().build();
        let connector = SlackClientHyperConnector::with_connector(https_connector);
        let client = Arc::new(slack_morphism::SlackClient::new(connector));

        // Get the bot's user ID.

        let session = client.open_session(&bot_token);
        let bot_user = session.auth_test().await?;
        let bot_user_id = bot_user.user_id.0;

        info!("Slack bot user ID: {}", bot_user_id);

        Ok(Self {
            app_token,
            bot_token,
            bot_user_id,
            client,
            db,
            queue,
        })
    }

    /// Render the interactive blocks for an approval request.
    fn approval_blocks(approval: &ApprovalRecord) -> Vec<SlackBlock> {
        let header = format!(
            ":shield: *Approval required* — `{}`\n{}\n*Risk:* {:?} · *Expires:* {}",
            approval.action.kind(),
            approval.action.summary(),
            approval.risk,
            approval.expires_at.format("%Y-%m-%d %H:%M UTC"),
        );

        let reasoning = approval
            .audit
            .as_ref()
            .and_then(|a| a.get("risk_reasoning"))
            .and_then(|r| r.as_str())
            .map(|r| format!("_{r}_"));

        let mut blocks: Vec<SlackBlock> = vec![SlackSectionBlock::new().with_text(SlackBlockMarkDownText::new(header).into()).into()];

        if let Some(reasoning) = reasoning {
            blocks.push(SlackSectionBlock::new().with_text(SlackBlockMarkDownText::new(reasoning).into()).into());
        }

        blocks.push(
            SlackActionsBlock::new(slack_blocks![
                some_into(
                    SlackBlockButtonElement::new(SlackActionId("approve".into()), pt!("Approve"))
                        .with_style(SlackBlockButtonStyle::Primary)
                        .with_value(approval.approval_id.clone())
                ),
                some_into(
                    SlackBlockButtonElement::new(SlackActionId("reject".into()), pt!("Reject"))
                        .with_style(SlackBlockButtonStyle::Danger)
                        .with_value(approval.approval_id.clone())
                )
            ])
            .into(),
        );

        blocks
    }
}

#[async_trait]
impl GenericChatClient for SlackChatClient {
    fn bot_user_id(&self) -> &str {
        &self.bot_user_id
    }

    async fn start(&self) -> Void {
        // Initialize the socket mode listener.

        let socket_mode_callbacks = SlackSocketModeListenerCallbacks::new()
            .with_command_events(handle_command_event)
            .with_interaction_events(handle_interaction_event)
            .with_push_events(handle_push_event);

        // Initialize the socket mode listener environment.

        let listener_environment = Arc::new(SlackClientEventsListenerEnvironment::new(self.client.clone()).with_user_state(SlackUserState {
            db: self.db.clone(),
            chat: ChatClient::from(self.clone()),
            queue: self.queue.clone(),
        }));

        let socket_mode_listener = Arc::new(SlackClientSocketModeListener::new(
            &SlackClientSocketModeConfig::new(),
            listener_environment.clone(),
            socket_mode_callbacks,
        ));

        // Register an app token to listen for events,
        socket_mode_listener.listen_for(&self.app_token).await?;

        // Start WS connections calling Slack API to get WS url for the token,
        // and wait for Ctrl-C to shutdown.
        socket_mode_listener.serve().await;

        Ok(())
    }

    #[instrument(skip(self, text))]
    async fn send_message(&self, channel: &str, text: &str) -> Res<String> {
        let message = SlackMessageContent::new().with_text(text.to_string());

        let request = SlackApiChatPostMessageRequest::new(SlackChannelId(channel.to_string()), message).with_link_names(true);

        let session = self.client.open_session(&self.bot_token);

        let response = session.chat_post_message(&request).await.map_err(|e| anyhow::anyhow!("Failed to send message: {}", e))?;

        Ok(response.ts.0)
    }

    #[instrument(skip(self, text))]
    async fn send_threaded(&self, channel: &str, thread_ts: &str, text: &str) -> Void {
        let message = SlackMessageContent::new().with_text(text.to_string());

        let request = SlackApiChatPostMessageRequest::new(SlackChannelId(channel.to_string()), message)
            .with_thread_ts(SlackTs(thread_ts.to_string()))
            .with_link_names(true);

        let session = self.client.open_session(&self.bot_token);

        let _ = session.chat_post_message(&request).await.map_err(|e| anyhow::anyhow!("Failed to send threaded message: {}", e))?;

        Ok(())
    }

    #[instrument(skip(self, approval))]
    async fn post_approval_request(&self, approval: &ApprovalRecord) -> Res<String> {
        let blocks = Self::approval_blocks(approval);

        let content = SlackMessageContent::new().with_text(format!("Approval required: {}", approval.action.summary())).with_blocks(blocks);

        let request = SlackApiChatPostMessageRequest::new(SlackChannelId(approval.channel.clone()), content);

        let session = self.client.open_session(&self.bot_token);

        let response = session.chat_post_message(&request).await.map_err(|e| anyhow::anyhow!("Failed to post approval request: {}", e))?;

        Ok(response.ts.0)
    }

    #[instrument(skip(self, text))]
    async fn update_approval_message(&self, channel: &str, ts: &str, text: &str) -> Void {
        let content = SlackMessageContent::new().with_text(text.to_string());

        let request = SlackApiChatUpdateRequest::new(SlackChannelId(channel.to_string()), content, SlackTs(ts.to_string()));

        let session = self.client.open_session(&self.bot_token);

        let _ = session.chat_update(&request).await.map_err(|e| anyhow::anyhow!("Failed to update approval message: {}", e))?;

        Ok(())
    }
}

// Socket mode listener callbacks for Slack.

/// Handles command events from Slack.
async fn handle_command_event(
    event: SlackCommandEvent,
    _client: Arc<SlackHyperClient>,
    _states: SlackClientEventsUserState,
) -> Result<SlackCommandEventResponse, Box<dyn std::error::Error + Send + Sync>> {
    warn!("[COMMAND] {:#?}", event);
    Ok(SlackCommandEventResponse::new(SlackMessageContent::new().with_text("No app commands are currently supported.".into())))
}

/// Handles interaction events from Slack.
///
/// Approve / Reject button clicks arrive here as block actions with the
/// approval id as the action value.
#[instrument(skip_all)]
async fn handle_interaction_event(event: SlackInteractionEvent, _client: Arc<SlackHyperClient>, states: SlackClientEventsUserState) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let SlackInteractionEvent::BlockActions(block_actions) = event else {
        warn!("Received unhandled interaction event.");
        return Ok(());
    };

    let states = states.read().await;
    let user_state = states.get_user_state::<SlackUserState>().ok_or(anyhow::anyhow!("Failed to get user state"))?;

    let user_id = block_actions.user.as_ref().map(|u| u.id.0.clone()).ok_or(anyhow::anyhow!("Interaction event has no user"))?;
    let channel_id = block_actions.channel.as_ref().map(|c| c.id.0.clone()).ok_or(anyhow::anyhow!("Interaction event has no channel"))?;
    let message_ts = block_actions.message.as_ref().map(|m| m.origin.ts.0.clone()).ok_or(anyhow::anyhow!("Interaction event has no message"))?;

    for action in block_actions.actions.iter().flatten() {
        let decision = match action.action_id.0.as_str() {
            "approve" => ApprovalStatus::Approved,
            "reject" => ApprovalStatus::Rejected,
            other => {
                warn!("Ignoring unknown action `{other}`.");
                continue;
            }
        };

        let Some(approval_id) = action.value.clone() else {
            warn!("Action `{}` is missing a value.", action.action_id.0);
            continue;
        };

        info!("Received {:?} decision for approval `{}` from `{}`.", decision, approval_id, user_id);

        interaction::approval_action::handle_approval_decision(
            decision,
            approval_id,
            user_id.clone(),
            channel_id.clone(),
            message_ts.clone(),
            user_state.db.clone(),
            user_state.chat.clone(),
            user_state.queue.clone(),
        );
    }

    Ok(())
}

/// Handles push events from Slack.
///
/// The bot does not react to channel chatter; decisions arrive as
/// interaction events.
async fn handle_push_event(_event_callback: SlackPushEventCallback, _client: Arc<SlackHyperClient>, _states: SlackClientEventsUserState) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    Ok(())
}

// Tests.

#[cfg(test)]
mod tests {
    // Block rendering is exercised indirectly through the integration tests'
    // mocked chat client; unit tests here would only restate slack-morphism.
}
