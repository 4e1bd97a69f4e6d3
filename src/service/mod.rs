//! Service integrations for external APIs and clients.
//!
//! This module contains implementations for various services used by pm-bot:
//! - Chat services (e.g., Slack)
//! - Database services (e.g., SurrealDB)
//! - LLM services (e.g., OpenAI)
//! - Issue tracker services (e.g., YouTrack via MCP)
//!
//! Each service module defines both generic traits and concrete implementations,
//! allowing for extensibility and easy testing.

pub mod chat;
pub mod db;
pub mod llm;
pub mod tracker;
