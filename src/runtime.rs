//! Runtime services and shared state for pm-bot.

use tracing::{error, instrument};

use crate::base::{
    config::Config,
    types::{Res, Void},
};
use crate::queue::{ApprovalQueue, executor::ActionExecutor, worker::Worker};
use crate::service::{chat::ChatClient, db::DbClient, llm::LlmClient, tracker::TrackerClient};

/// Runtime service context that can be shared across the application.
///
/// This struct holds the database, LLM, chat, and tracker clients, the
/// approval queue, and the configuration.  The clients are all trivially
/// cloneable, so the runtime can be passed around freely; the worker is
/// consumed when the runtime starts.
pub struct Runtime {
    /// The configuration for the application.
    pub config: Config,
    /// The database client instance.
    pub db: DbClient,
    /// The LLM client instance.
    pub llm: LlmClient,
    /// The issue tracker client instance.
    pub tracker: TrackerClient,
    /// The chat client instance.
    pub chat: ChatClient,
    /// The approval queue sender.
    pub queue: ApprovalQueue,
    /// The queue worker, present until the runtime starts.
    worker: Option<Worker>,
}

impl Runtime {
    /// Create a new runtime instance.
    #[instrument(skip_all)]
    pub async fn new(config: Config) -> Res<Self> {
        // Initialize the database.
        let db = DbClient::surreal(&config).await?;

        // Initialize the LLM client.
        let llm = LlmClient::openai(&config);

        // Initialize the tracker client.
        let tracker = TrackerClient::youtrack(&config).await?;

        // Initialize the approval queue and its worker.
        let (queue, receivers) = ApprovalQueue::new();

        // Initialize the chat client; decisions flow from it into the queue.
        let chat = ChatClient::slack(&config, db.clone(), queue.clone()).await?;

        let executor = ActionExecutor::new(db.clone(), chat.clone(), tracker.clone());
        let worker = Worker::new(receivers, queue.clone(), executor, db.clone(), config.clone());

        Ok(Self {
            config,
            db,
            llm,
            tracker,
            chat,
            queue,
            worker: Some(worker),
        })
    }

    /// Start the queue worker and the chat listener.
    pub async fn start(&mut self) -> Void {
        if let Some(worker) = self.worker.take() {
            tokio::spawn(async move {
                if let Err(err) = worker.run().await {
                    error!("Queue worker exited with error: {err}");
                }
            });
        }

        self.chat.start().await
    }
}
