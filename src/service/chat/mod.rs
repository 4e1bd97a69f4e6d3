pub mod slack;

use std::{ops::Deref, sync::Arc};

use async_trait::async_trait;

use crate::base::types::{Res, Void};
use crate::service::db::ApprovalRecord;

// Traits.

/// Generic "chat" trait that clients must implement.
///
/// This trait defines the core functionality for interacting with chat platforms
/// like Slack: posting approval requests, updating them after a decision, and
/// sending notifications.  Implementing this trait allows different chat
/// services to be used with pm-bot.
#[async_trait]
pub trait GenericChatClient: Send + Sync + 'static {
    /// Get the bot user ID.
    fn bot_user_id(&self) -> &str;

    /// Start the chat client listener.
    ///
    /// This sets up event listeners for the chat platform and begins processing
    /// approval decisions (Approve / Reject button clicks).
    async fn start(&self) -> Void;

    /// Send a message to a channel.  Returns the message timestamp.
    async fn send_message(&self, channel: &str, text: &str) -> Res<String>;

    /// Send a message into an existing thread.
    async fn send_threaded(&self, channel: &str, thread_ts: &str, text: &str) -> Void;

    /// Post an interactive approval request with Approve / Reject buttons.
    ///
    /// Returns the message timestamp so the approval record can track where
    /// its request lives.
    async fn post_approval_request(&self, approval: &ApprovalRecord) -> Res<String>;

    /// Replace an approval request message after a decision or execution.
    async fn update_approval_message(&self, channel: &str, ts: &str, text: &str) -> Void;
}

// Structs.

/// Chat client for the application.
///
/// It is designed to be trivially cloneable, allowing it to be passed around
/// without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct ChatClient {
    inner: Arc<dyn GenericChatClient>,
}

impl Deref for ChatClient {
    type Target = dyn GenericChatClient;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

impl ChatClient {
    pub fn new(inner: Arc<dyn GenericChatClient>) -> Self {
        Self { inner }
    }
}
