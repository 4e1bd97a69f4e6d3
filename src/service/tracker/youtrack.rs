//! YouTrack implementation of the tracker client.
//!
//! YouTrack is reached through its MCP server: every operation is a tool call
//! over streamable HTTP, and each result arrives as a JSON document in the
//! tool's text content.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use hyper::{
    HeaderMap,
    header::{AUTHORIZATION, HeaderValue},
};
use rmcp::{
    RoleClient, ServiceExt,
    model::CallToolRequestParam,
    service::RunningService,
    transport::{StreamableHttpClientTransport, streamable_http_client::StreamableHttpClientTransportConfig},
};
use serde_json::{Value, json};
use tracing::{debug, instrument};

use crate::base::{config::Config, types::Res};

use super::{CreatedIssue, GenericTrackerClient, IssueDraft, IssueHit, TrackerClient};

// Extra methods on `TrackerClient` applied by the youtrack implementation.

impl TrackerClient {
    /// Creates a new YouTrack tracker client.
    pub async fn youtrack(config: &Config) -> Res<Self> {
        let client = YouTrackTrackerClient::new(config).await?;
        Ok(Self { inner: Arc::new(client) })
    }
}

// Specific implementations.

/// YouTrack tracker client backed by its MCP server.
#[derive(Clone)]
pub struct YouTrackTrackerClient {
    client: Arc<RunningService<RoleClient, ()>>,
}

impl YouTrackTrackerClient {
    /// Create a new YouTrack tracker client.
    #[instrument(name = "YouTrackTrackerClient::new", skip_all)]
    pub async fn new(config: &Config) -> Res<Self> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &config.tracker_mcp_token {
            headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {token}"))?);
        }

        let http = reqwest::Client::builder().default_headers(headers).build()?;
        let transport_config = StreamableHttpClientTransportConfig::with_uri(config.tracker_mcp_url.as_str());
        let transport = StreamableHttpClientTransport::with_client(http, transport_config);

        let client = Arc::new(().serve(transport).await?);

        Ok(Self { client })
    }

    /// Calls an MCP tool and parses its JSON text content.
    async fn call_tool(&self, name: &'static str, arguments: Value) -> Res<Value> {
        let request = CallToolRequestParam {
            name: name.into(),
            arguments: arguments.as_object().cloned(),
        };

        let result = self.client.call_tool(request).await?;

        let text = result.content.first().and_then(|c| c.as_text()).map(|t| t.text.clone()).unwrap_or_default();

        let parsed = if text.is_empty() { json!({}) } else { serde_json::from_str(&text)? };

        debug!("MCP tool `{name}` returned.");

        Ok(parsed)
    }
}

#[async_trait]
impl GenericTrackerClient for YouTrackTrackerClient {
    #[instrument(skip(self))]
    async fn search_issues(&self, query: &str, limit: usize) -> Res<Vec<IssueHit>> {
        let result = self
            .call_tool(
                "search_youtrack_issues",
                json!({
                    "query": query,
                    "max_results": limit,
                }),
            )
            .await?;

        Ok(parse_search_results(&result))
    }

    #[instrument(skip(self, draft))]
    async fn create_issue(&self, draft: &IssueDraft) -> Res<CreatedIssue> {
        let mut arguments = json!({
            "project": draft.project,
            "summary": draft.summary,
            "description": draft.description,
            "issue_type": draft.issue_type,
            "priority": draft.priority,
        });

        if !draft.tags.is_empty() {
            arguments["tags"] = json!(draft.tags);
        }

        let result = self.call_tool("create_youtrack_issue", arguments).await?;

        parse_created_issue(&result)
    }

    #[instrument(skip(self, text))]
    async fn add_comment(&self, issue_id: &str, text: &str) -> Res<String> {
        let result = self
            .call_tool(
                "add_issue_comment",
                json!({
                    "issue_id": issue_id,
                    "text": text,
                    "use_markdown": true,
                }),
            )
            .await?;

        result
            .get("id")
            .and_then(|id| id.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("Comment creation returned no id: {result}"))
    }
}

// Helpers.

/// Parse the `issues` array out of a search tool result.
///
/// Issue creation timestamps arrive as epoch milliseconds.
pub fn parse_search_results(result: &Value) -> Vec<IssueHit> {
    let Some(issues) = result.get("issues").and_then(|i| i.as_array()) else {
        return Vec::new();
    };

    issues
        .iter()
        .filter_map(|issue| {
            let issue_id = issue.get("id").and_then(|v| v.as_str())?.to_string();
            let title = issue.get("summary").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            let description = issue.get("description").and_then(|v| v.as_str()).unwrap_or_default().to_string();
            let created_at = issue.get("created").and_then(|v| v.as_i64()).and_then(DateTime::from_timestamp_millis);

            Some(IssueHit {
                issue_id,
                title,
                description,
                created_at,
            })
        })
        .collect()
}

/// Parse a created-issue tool result into its coordinates.
pub fn parse_created_issue(result: &Value) -> Res<CreatedIssue> {
    let issue_id = result
        .get("idReadable")
        .or_else(|| result.get("id"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Issue creation returned no id: {result}"))?;

    let url = result.get("url").and_then(|v| v.as_str()).map(str::to_string);

    Ok(CreatedIssue { issue_id, url })
}

// Tests.

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_search_results() {
        let result = json!({
            "total": 2,
            "issues": [
                { "id": "DEMO-1", "summary": "Login crash", "description": "App crashes on login", "created": 1700000000000i64 },
                { "id": "DEMO-2", "summary": "Slow sync", "description": null },
            ],
        });

        let hits = parse_search_results(&result);

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].issue_id, "DEMO-1");
        assert!(hits[0].created_at.is_some());
        assert_eq!(hits[1].description, "");
        assert!(hits[1].created_at.is_none());
    }

    #[test]
    fn test_parse_search_results_with_no_issues() {
        assert!(parse_search_results(&json!({})).is_empty());
        assert!(parse_search_results(&json!({"issues": []})).is_empty());
    }

    #[test]
    fn test_parse_created_issue_prefers_readable_id() {
        let result = json!({ "id": "2-42", "idReadable": "DEMO-42", "url": "https://yt.example/issue/DEMO-42" });

        let created = parse_created_issue(&result).unwrap();

        assert_eq!(created.issue_id, "DEMO-42");
        assert_eq!(created.url.as_deref(), Some("https://yt.example/issue/DEMO-42"));
    }

    #[test]
    fn test_parse_created_issue_without_id_is_an_error() {
        assert!(parse_created_issue(&json!({"summary": "nope"})).is_err());
    }
}
