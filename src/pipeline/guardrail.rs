//! Guardrails in front of the approval workflow.
//!
//! Hard checks reject malformed actions outright; the LLM risk judge grades
//! everything that passes.  A judge outage degrades to medium risk rather
//! than blocking the pipeline.

use chrono::Duration;
use tracing::warn;

use crate::{
    base::{
        config::Config,
        types::{Action, RiskAssessment, RiskLevel, Void},
    },
    service::llm::LlmClient,
};

/// Caps matching the tracker's summary field and chat message limits.
pub const MAX_SUMMARY_LEN: usize = 255;
pub const MAX_BODY_LEN: usize = 8000;

/// Validate an action's shape before it may enter the approval workflow.
///
/// A hard failure aborts the action; no approval record is created.
pub fn hard_check(action: &Action, config: &Config) -> Void {
    match action {
        Action::CreateIssue { project, summary, description, .. } => {
            if summary.trim().is_empty() {
                return Err(anyhow::anyhow!("Issue summary must not be empty."));
            }
            if summary.chars().count() > MAX_SUMMARY_LEN {
                return Err(anyhow::anyhow!("Issue summary exceeds {MAX_SUMMARY_LEN} characters."));
            }
            if description.chars().count() > MAX_BODY_LEN {
                return Err(anyhow::anyhow!("Issue description exceeds {MAX_BODY_LEN} characters."));
            }
            if !config.supported_projects.iter().any(|p| p == project) {
                return Err(anyhow::anyhow!("Project `{project}` is not in the supported project list."));
            }
        }
        Action::AddComment { issue_id, comment } => {
            if comment.trim().is_empty() {
                return Err(anyhow::anyhow!("Comment text must not be empty."));
            }
            if comment.chars().count() > MAX_BODY_LEN {
                return Err(anyhow::anyhow!("Comment exceeds {MAX_BODY_LEN} characters."));
            }
            if !looks_like_issue_id(issue_id) {
                return Err(anyhow::anyhow!("`{issue_id}` does not look like an issue id."));
            }
        }
        Action::PostMessage { channel, message } => {
            if channel.trim().is_empty() {
                return Err(anyhow::anyhow!("Channel must not be empty."));
            }
            if message.trim().is_empty() {
                return Err(anyhow::anyhow!("Message must not be empty."));
            }
            if message.chars().count() > MAX_BODY_LEN {
                return Err(anyhow::anyhow!("Message exceeds {MAX_BODY_LEN} characters."));
            }
        }
    }

    Ok(())
}

/// Ask the risk judge about an action, degrading to a conservative default
/// when the judge is unavailable.
pub async fn assess(llm: &LlmClient, action: &Action, context: &str) -> RiskAssessment {
    match llm.assess_risk(action, context).await {
        Ok(assessment) => assessment,
        Err(err) => {
            warn!("Risk judge unavailable, defaulting to medium risk: {err}");

            RiskAssessment {
                requires_approval: true,
                risk: RiskLevel::Medium,
                reasoning: "Risk judge unavailable; defaulted to medium risk.".to_string(),
            }
        }
    }
}

/// How long a pending approval of the given risk stays decidable.
pub fn expiry_for(risk: RiskLevel, config: &Config) -> Duration {
    let hours = match risk {
        RiskLevel::High => config.expiry_hours_high,
        RiskLevel::Medium => config.expiry_hours_medium,
        RiskLevel::Low => config.expiry_hours_low,
    };

    Duration::hours(hours)
}

/// Issue ids look like `DEMO-123`: an alphanumeric project prefix, a dash,
/// and a numeric suffix.
fn looks_like_issue_id(issue_id: &str) -> bool {
    let Some((prefix, number)) = issue_id.rsplit_once('-') else {
        return false;
    };

    !prefix.is_empty() && prefix.chars().all(|c| c.is_ascii_alphanumeric()) && !number.is_empty() && number.chars().all(|c| c.is_ascii_digit())
}

// Tests.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::base::{
        config::ConfigInner,
        types::IssuePriority,
    };

    use super::*;

    fn test_config() -> Config {
        Config {
            inner: Arc::new(ConfigInner {
                supported_projects: vec!["DEMO".into(), "PROD".into()],
                expiry_hours_high: 24,
                expiry_hours_medium: 48,
                expiry_hours_low: 72,
                ..Default::default()
            }),
        }
    }

    fn create_issue(project: &str, summary: &str) -> Action {
        Action::CreateIssue {
            project: project.into(),
            summary: summary.into(),
            description: "details".into(),
            priority: IssuePriority::Normal,
            tags: vec![],
        }
    }

    #[test]
    fn test_empty_summary_is_rejected() {
        assert!(hard_check(&create_issue("DEMO", "  "), &test_config()).is_err());
    }

    #[test]
    fn test_unknown_project_is_rejected() {
        assert!(hard_check(&create_issue("SECRET", "Crash"), &test_config()).is_err());
        assert!(hard_check(&create_issue("DEMO", "Crash"), &test_config()).is_ok());
    }

    #[test]
    fn test_oversized_summary_is_rejected() {
        let long = "x".repeat(MAX_SUMMARY_LEN + 1);
        assert!(hard_check(&create_issue("DEMO", &long), &test_config()).is_err());
    }

    #[test]
    fn test_comment_issue_id_shape() {
        let good = Action::AddComment {
            issue_id: "DEMO-42".into(),
            comment: "Same crash reported in a review.".into(),
        };
        let bad = Action::AddComment {
            issue_id: "not an id".into(),
            comment: "Same crash reported in a review.".into(),
        };

        assert!(hard_check(&good, &test_config()).is_ok());
        assert!(hard_check(&bad, &test_config()).is_err());
    }

    #[test]
    fn test_post_message_requires_content() {
        let empty = Action::PostMessage {
            channel: "product".into(),
            message: " ".into(),
        };

        assert!(hard_check(&empty, &test_config()).is_err());
    }

    #[test]
    fn test_expiry_scales_with_risk() {
        let config = test_config();

        assert_eq!(expiry_for(RiskLevel::High, &config), Duration::hours(24));
        assert_eq!(expiry_for(RiskLevel::Medium, &config), Duration::hours(48));
        assert_eq!(expiry_for(RiskLevel::Low, &config), Duration::hours(72));
    }

    #[test]
    fn test_issue_id_shapes() {
        assert!(looks_like_issue_id("DEMO-1"));
        assert!(looks_like_issue_id("A1-204"));
        assert!(!looks_like_issue_id("DEMO"));
        assert!(!looks_like_issue_id("-42"));
        assert!(!looks_like_issue_id("DEMO-"));
        assert!(!looks_like_issue_id("DEMO-42x"));
    }
}
