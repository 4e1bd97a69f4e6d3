pub mod youtrack;

use std::{ops::Deref, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::base::types::Res;

// Traits.

/// Generic issue tracker trait that clients must implement.
///
/// This trait defines the tracker operations the bug pipeline and the action
/// executor depend on.  Implementing this trait allows different trackers to
/// be used with pm-bot.
#[async_trait]
pub trait GenericTrackerClient: Send + Sync + 'static {
    /// Search for issues matching a tracker query, bounded by `limit`.
    async fn search_issues(&self, query: &str, limit: usize) -> Res<Vec<IssueHit>>;

    /// Create a new issue and return its coordinates.
    async fn create_issue(&self, draft: &IssueDraft) -> Res<CreatedIssue>;

    /// Add a comment to an existing issue.  Returns the comment ID.
    async fn add_comment(&self, issue_id: &str, text: &str) -> Res<String>;
}

// Structs.

/// Tracker client for the application.
///
/// This is trivially cloneable and can be passed around without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct TrackerClient {
    inner: Arc<dyn GenericTrackerClient>,
}

impl Deref for TrackerClient {
    type Target = dyn GenericTrackerClient;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

impl TrackerClient {
    pub fn new(inner: Arc<dyn GenericTrackerClient>) -> Self {
        Self { inner }
    }
}

/// An issue returned by a tracker search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueHit {
    pub issue_id: String,
    pub title: String,
    pub description: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// A new issue to create.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueDraft {
    pub project: String,
    pub summary: String,
    pub description: String,
    pub issue_type: String,
    pub priority: String,
    pub tags: Vec<String>,
}

/// Coordinates of a created issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedIssue {
    pub issue_id: String,
    pub url: Option<String>,
}
