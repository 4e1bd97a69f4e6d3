//! Library root for `pm-bot`.
//!
//! Pm-bot is an OpenAI-powered product review triage service designed to:
//! - Classify incoming app reviews into bugs, feature requests, and noise
//! - Route bugs through duplicate-aware issue tracker triage
//! - Research feature requests against competitors
//! - Gate every side-effecting action behind a human approval in chat,
//!   executed asynchronously by a risk-prioritized, retry-capable worker
//!
//! The service integrates with Slack for approvals, SurrealDB for storage,
//! YouTrack (over MCP) for issue tracking, and OpenAI for the agents.  The
//! architecture is built around extensible traits that allow for different
//! implementations of each service.

pub mod base;
pub mod interaction;
pub mod pipeline;
pub mod queue;
pub mod runtime;
pub mod service;

use base::{config::Config, types::Void};
use rustls::crypto;
use tracing::info;

/// Public async entry for the binary crate.
///
/// Sets up necessary services and starts the pm-bot runtime:
/// - Initializes the crypto provider
/// - Creates the runtime context with database, LLM, tracker, and chat clients
/// - Spawns the approval queue worker and starts the chat listener
pub async fn start(config: Config) -> Void {
    info!("Starting pm-bot ...");

    // Start the crypto provider.
    crypto::ring::default_provider().install_default().map_err(|_| anyhow::anyhow!("Failed to install crypto provider."))?;

    // Initialize the runtime.
    let mut runtime = runtime::Runtime::new(config).await?;

    // Start the runtime.
    runtime.start().await?;

    Ok(())
}
