use serde::{Deserialize, Serialize};

pub type Err = anyhow::Error;
pub type Res<T> = Result<T, Err>;
pub type Void = Res<()>;

/// Category assigned to an incoming review by the classifier agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewCategory {
    Bug,
    Feature,
    Other,
}

/// Risk assigned to a gated action.  Also doubles as the queue priority:
/// higher risk drains first so a human-approved critical action is never
/// stuck behind a backlog of low-risk chatter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Lifecycle of an approval record.
///
/// Transitions are restricted to:
/// `Pending -> Approved | Rejected | Expired`, `Approved -> Executed | Failed`.
/// Everything else is terminal.  The store enforces this; see
/// [`ApprovalStatus::can_transition_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Executed,
    Failed,
    Expired,
}

impl ApprovalStatus {
    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: ApprovalStatus) -> bool {
        use ApprovalStatus::*;

        matches!(
            (self, next),
            (Pending, Approved) | (Pending, Rejected) | (Pending, Expired) | (Approved, Executed) | (Approved, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ApprovalStatus::Rejected | ApprovalStatus::Executed | ApprovalStatus::Failed | ApprovalStatus::Expired)
    }
}

/// Priority assigned to created tracker issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssuePriority {
    Critical,
    Major,
    Normal,
    Minor,
}

impl IssuePriority {
    /// Tracker-facing name of the priority.
    pub fn as_str(self) -> &'static str {
        match self {
            IssuePriority::Critical => "Critical",
            IssuePriority::Major => "Major",
            IssuePriority::Normal => "Normal",
            IssuePriority::Minor => "Minor",
        }
    }
}

/// A side-effecting action that must pass human approval before execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Action {
    CreateIssue {
        project: String,
        summary: String,
        description: String,
        priority: IssuePriority,
        tags: Vec<String>,
    },
    AddComment {
        issue_id: String,
        comment: String,
    },
    PostMessage {
        channel: String,
        message: String,
    },
}

impl Action {
    /// Short name of the action variant, for logs and chat rendering.
    pub fn kind(&self) -> &'static str {
        match self {
            Action::CreateIssue { .. } => "create_issue",
            Action::AddComment { .. } => "add_comment",
            Action::PostMessage { .. } => "post_message",
        }
    }

    /// One-line human summary of what would happen if this action executed.
    pub fn summary(&self) -> String {
        match self {
            Action::CreateIssue { project, summary, .. } => format!("Create issue in `{project}`: {summary}"),
            Action::AddComment { issue_id, .. } => format!("Comment on issue `{issue_id}`"),
            Action::PostMessage { channel, .. } => format!("Post report to `{channel}`"),
        }
    }
}

/// A raw review handed to the intake pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewInput {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub source: Option<String>,
}

/// One classified review in a classifier batch response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedReview {
    pub id: String,
    pub category: ReviewCategory,
    pub confidence: f64,
}

/// Classifier agent response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationBatch {
    pub reviews: Vec<ClassifiedReview>,
}

/// A candidate issue handed to the duplicate triage agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateIssue {
    pub issue_id: String,
    pub title: String,
    pub description: String,
}

/// Everything the duplicate triage agent needs to reach a verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateContext {
    pub report: String,
    pub project: String,
    pub candidates: Vec<CandidateIssue>,
}

/// Duplicate triage agent response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateVerdict {
    pub is_duplicate: bool,
    pub issue_id: Option<String>,
    pub confidence: f64,
    pub notes: String,
}

/// Risk judge response for a gated action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub requires_approval: bool,
    pub risk: RiskLevel,
    pub reasoning: String,
}

/// Research planner response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchPlan {
    pub queries: Vec<String>,
}

/// Confidence grade attached to a research finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResearchConfidence {
    Low,
    Medium,
    High,
}

/// One competitor claim extracted during feature research.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompetitorFinding {
    pub competitor: String,
    pub claim: String,
    pub evidence_url: String,
    pub confidence: ResearchConfidence,
}

/// Accumulated research notes handed to the report writer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchContext {
    pub feature: String,
    pub notes: Vec<String>,
}

/// Final report produced by the feature research pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureReport {
    pub summary: String,
    pub findings: Vec<CompetitorFinding>,
    pub spec: String,
}

// Tests.

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_transitions() {
        use ApprovalStatus::*;

        assert!(Pending.can_transition_to(Approved));
        assert!(Pending.can_transition_to(Rejected));
        assert!(Pending.can_transition_to(Expired));
        assert!(!Pending.can_transition_to(Executed));
        assert!(!Pending.can_transition_to(Failed));
    }

    #[test]
    fn test_approved_transitions() {
        use ApprovalStatus::*;

        assert!(Approved.can_transition_to(Executed));
        assert!(Approved.can_transition_to(Failed));
        assert!(!Approved.can_transition_to(Rejected));
        assert!(!Approved.can_transition_to(Pending));
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        use ApprovalStatus::*;

        for terminal in [Rejected, Executed, Failed, Expired] {
            assert!(terminal.is_terminal());
            for next in [Pending, Approved, Rejected, Executed, Failed, Expired] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_risk_ordering_matches_queue_priority() {
        assert!(RiskLevel::High > RiskLevel::Medium);
        assert!(RiskLevel::Medium > RiskLevel::Low);
    }

    #[test]
    fn test_action_roundtrip() {
        let action = Action::CreateIssue {
            project: "DEMO".into(),
            summary: "App crashes on login".into(),
            description: "Steps to reproduce...".into(),
            priority: IssuePriority::Major,
            tags: vec!["from-review".into()],
        };

        let json = serde_json::to_string(&action).unwrap();
        let back: Action = serde_json::from_str(&json).unwrap();

        assert_eq!(action, back);
        assert_eq!(back.kind(), "create_issue");
    }
}
