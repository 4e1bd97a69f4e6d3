//! Event handling and user interactions for pm-bot.
//!
//! This module provides functionality for handling the two entry points into
//! the system:
//! - Review batches arriving for classification and routing
//! - Approve / Reject decisions arriving from chat

pub mod approval_action;
pub mod review_intake;
