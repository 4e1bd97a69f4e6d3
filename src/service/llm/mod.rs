pub mod openai;

use crate::base::types::{Action, ClassificationBatch, DuplicateContext, DuplicateVerdict, FeatureReport, Res, ResearchContext, ResearchPlan, ReviewInput, RiskAssessment};
use async_trait::async_trait;
use std::sync::Arc;
use std::ops::Deref;

// Traits.

/// Generic LLM client trait that clients must implement.
///
/// This trait defines the agent operations pm-bot depends on.  Implementing
/// this trait allows different LLM providers to be used with the service.
#[async_trait]
pub trait GenericLlmClient: Send + Sync + 'static {
    /// Classify a batch of raw reviews into bug / feature / other.
    ///
    /// The response carries one entry per input id with a calibrated
    /// confidence; unknown ids are the caller's problem to filter.
    async fn classify_reviews(&self, reviews: &[ReviewInput]) -> Res<ClassificationBatch>;

    /// Decide whether a bug report duplicates one of the candidate issues.
    ///
    /// The candidates have already passed the lexical pre-filter, so this is
    /// the expensive, detailed comparison.
    async fn assess_duplicate(&self, context: &DuplicateContext) -> Res<DuplicateVerdict>;

    /// Judge the risk of a proposed side-effecting action.
    async fn assess_risk(&self, action: &Action, summary: &str) -> Res<RiskAssessment>;

    /// Plan web research queries for a requested feature.
    async fn plan_research(&self, feature: &str, competitors: &[String], max_queries: usize) -> Res<ResearchPlan>;

    /// Execute one research query with web search enabled, returning the
    /// researcher's sourced notes as text.
    async fn run_research_query(&self, query: &str) -> Res<String>;

    /// Compose the final feature report from accumulated research notes.
    async fn compose_feature_report(&self, context: &ResearchContext) -> Res<FeatureReport>;
}

// Structs.

/// LLM client for the application.
///
/// This is trivially cloneable and can be passed around without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct LlmClient {
    inner: Arc<dyn GenericLlmClient>,
}

impl Deref for LlmClient {
    type Target = dyn GenericLlmClient;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

impl LlmClient {
    pub fn new(inner: Arc<dyn GenericLlmClient>) -> Self {
        Self { inner }
    }
}
