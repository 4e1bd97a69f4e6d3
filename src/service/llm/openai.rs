//! OpenAI implementation of the LLM agent operations.
//!
//! Each operation is a single schema-constrained request against the
//! Responses API; the research query additionally enables the web search
//! tool.  All calls share one retry/timeout wrapper.

use std::time::Duration;
use std::sync::{Arc, OnceLock};

use crate::base::{
    config::Config,
    types::{Action, ClassificationBatch, DuplicateContext, DuplicateVerdict, FeatureReport, Res, ResearchContext, ResearchPlan, ReviewInput, RiskAssessment},
};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::responses::{
        Content, CreateResponseArgs, Input, InputItem, InputMessageArgs, OutputContent, Response, ResponseFormatJsonSchema, Role, TextConfig, TextResponseFormat, ToolDefinition,
        WebSearchPreviewArgs,
    },
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::time::timeout;
use tracing::{info, instrument, warn};

use super::{GenericLlmClient, LlmClient};

// Extra methods on `LlmClient` applied by the openai implementation.

impl LlmClient {
    pub fn openai(config: &Config) -> Self {
        let client = OpenAiLlmClient::new(config);
        Self { inner: Arc::new(client) }
    }
}

// Specific implementations.

/// OpenAI LLM client implementation.
#[derive(Clone)]
pub struct OpenAiLlmClient {
    client: Client<OpenAIConfig>,
    config: Config,
}

impl OpenAiLlmClient {
    /// Create a new OpenAI LLM client.
    #[instrument(name = "OpenAiLlmClient::new", skip_all)]
    pub fn new(config: &Config) -> Self {
        let cfg = OpenAIConfig::new().with_api_key(config.openai_api_key.clone());

        Self {
            client: Client::with_config(cfg),
            config: config.clone(),
        }
    }

    /// Build the classifier input from a review batch.
    fn build_classifier_input(&self, reviews: &[ReviewInput]) -> Res<Input> {
        let batch = serde_json::to_string_pretty(reviews)?;

        Ok(Input::Items(vec![
            InputItem::Message(
                InputMessageArgs::default()
                    .role(Role::User)
                    .content(format!("# Reviews\n\n```json\n{batch}\n```\n\n"))
                    .build()?,
            ),
        ]))
    }

    /// Build the duplicate triage input.
    fn build_triage_input(&self, context: &DuplicateContext) -> Res<Input> {
        let candidates = serde_json::to_string_pretty(&context.candidates)?;

        Ok(Input::Items(vec![
            InputItem::Message(
                InputMessageArgs::default()
                    .role(Role::Developer)
                    .content(format!("## Project: `{}`\n\n## Candidate Issues\n\n```json\n{candidates}\n```\n\n", context.project))
                    .build()?,
            ),
            InputItem::Message(
                InputMessageArgs::default()
                    .role(Role::User)
                    .content(format!("# Bug Report\n\n{}\n\n", context.report))
                    .build()?,
            ),
        ]))
    }

    /// Build the risk judge input.
    fn build_judge_input(&self, action: &Action, summary: &str) -> Res<Input> {
        let payload = serde_json::to_string_pretty(action)?;

        Ok(Input::Items(vec![
            InputItem::Message(
                InputMessageArgs::default()
                    .role(Role::Developer)
                    .content(format!("## Proposed Action\n\n```json\n{payload}\n```\n\n"))
                    .build()?,
            ),
            InputItem::Message(
                InputMessageArgs::default()
                    .role(Role::User)
                    .content(format!("# Context\n\n{summary}\n\n"))
                    .build()?,
            ),
        ]))
    }

    /// Build the research planner input.
    fn build_planner_input(&self, feature: &str, competitors: &[String], max_queries: usize) -> Res<Input> {
        Ok(Input::Items(vec![
            InputItem::Message(
                InputMessageArgs::default()
                    .role(Role::Developer)
                    .content(format!("## Competitors\n\n{}\n\n## Query Budget: {max_queries}\n\n", competitors.join(", ")))
                    .build()?,
            ),
            InputItem::Message(
                InputMessageArgs::default()
                    .role(Role::User)
                    .content(format!("# Requested Feature\n\n{feature}\n\n"))
                    .build()?,
            ),
        ]))
    }

    /// Build the report writer input.
    fn build_report_input(&self, context: &ResearchContext) -> Res<Input> {
        let notes = context.notes.iter().enumerate().map(|(i, n)| format!("## Note {}\n\n{n}\n", i + 1)).collect::<Vec<_>>().join("\n");

        Ok(Input::Items(vec![
            InputItem::Message(
                InputMessageArgs::default()
                    .role(Role::Developer)
                    .content(format!("# Research Notes\n\n{notes}\n\n"))
                    .build()?,
            ),
            InputItem::Message(
                InputMessageArgs::default()
                    .role(Role::User)
                    .content(format!("# Requested Feature\n\n{}\n\n", context.feature))
                    .build()?,
            ),
        ]))
    }

    /// Applies the sampling temperature for non-reasoning models.
    fn apply_temperature(&self, request: &mut CreateResponseArgs, model: &str) {
        if model.starts_with("gpt") {
            request.temperature(self.config.openai_temperature);
        }
    }

    /// Helper function to make OpenAI API calls with retry logic and timeout handling.
    async fn call_openai_api(&self, request_builder: CreateResponseArgs) -> Res<Response> {
        const MAX_RETRIES: u32 = 3;
        const TIMEOUT: u64 = 120; // OpenAI can be slow, especially with reasoning models
        const RETRY_DELAY_MS: u64 = 1000;

        let mut retries = 0;

        loop {
            let request = request_builder.build()?;
            let result = timeout(Duration::from_secs(TIMEOUT), self.client.responses().create(request)).await;

            match result {
                Ok(Ok(response)) => {
                    info!("OpenAI API call succeeded after {} attempts", retries + 1);
                    return Ok(response);
                }
                Ok(Err(err)) => {
                    if retries >= MAX_RETRIES {
                        return Err(anyhow::anyhow!("OpenAI API call failed after {MAX_RETRIES} retries: {err}"));
                    }
                    retries += 1;
                    warn!("OpenAI API call failed, retrying {retries}/{MAX_RETRIES}: {err}");

                    let delay = Duration::from_millis(RETRY_DELAY_MS * 2_u64.pow(retries - 1));
                    tokio::time::sleep(delay).await;
                }
                Err(_) => {
                    if retries >= MAX_RETRIES {
                        return Err(anyhow::anyhow!("OpenAI API call timed out after {MAX_RETRIES} attempts"));
                    }
                    retries += 1;
                    warn!("OpenAI API call timed out, retrying {retries}/{MAX_RETRIES}");

                    let delay = Duration::from_millis(RETRY_DELAY_MS * 2_u64.pow(retries - 1));
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Runs a schema-constrained request and parses the output into `T`.
    async fn structured_call<T: DeserializeOwned>(&self, model: &str, instructions: &str, input: Input, text_config: TextConfig) -> Res<T> {
        let mut request = CreateResponseArgs::default();
        request
            .instructions(instructions.to_string())
            .max_output_tokens(self.config.openai_max_tokens)
            .model(model)
            .text(text_config)
            .input(input);

        self.apply_temperature(&mut request, model);

        let response = self.call_openai_api(request).await?;
        let text = collect_output_text(&response)?;

        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl GenericLlmClient for OpenAiLlmClient {
    #[instrument(name = "OpenAiLlmClient::classify_reviews", skip_all)]
    async fn classify_reviews(&self, reviews: &[ReviewInput]) -> Res<ClassificationBatch> {
        let input = self.build_classifier_input(reviews)?;

        self.structured_call(&self.config.openai_classifier_model, &self.config.classifier_directive, input, classification_text_config().clone())
            .await
    }

    #[instrument(name = "OpenAiLlmClient::assess_duplicate", skip_all)]
    async fn assess_duplicate(&self, context: &DuplicateContext) -> Res<DuplicateVerdict> {
        let input = self.build_triage_input(context)?;

        self.structured_call(&self.config.openai_triage_model, &self.config.triage_directive, input, verdict_text_config().clone())
            .await
    }

    #[instrument(name = "OpenAiLlmClient::assess_risk", skip_all)]
    async fn assess_risk(&self, action: &Action, summary: &str) -> Res<RiskAssessment> {
        let input = self.build_judge_input(action, summary)?;

        self.structured_call(&self.config.openai_triage_model, &self.config.judge_directive, input, risk_text_config().clone())
            .await
    }

    #[instrument(name = "OpenAiLlmClient::plan_research", skip_all)]
    async fn plan_research(&self, feature: &str, competitors: &[String], max_queries: usize) -> Res<ResearchPlan> {
        let input = self.build_planner_input(feature, competitors, max_queries)?;

        let mut plan: ResearchPlan = self
            .structured_call(&self.config.openai_research_model, &self.config.planner_directive, input, plan_text_config().clone())
            .await?;

        // The budget is a hard cap regardless of what the planner returns.
        plan.queries.truncate(max_queries);

        Ok(plan)
    }

    #[instrument(name = "OpenAiLlmClient::run_research_query", skip_all)]
    async fn run_research_query(&self, query: &str) -> Res<String> {
        let input = Input::Items(vec![
            InputItem::Message(InputMessageArgs::default().role(Role::User).content(format!("# Research Query\n\n{query}\n\n")).build()?),
        ]);

        let search_tools = get_openai_search_tools().clone();
        let text_config = TextConfig { format: TextResponseFormat::Text };

        let mut request = CreateResponseArgs::default();
        request
            .instructions(self.config.researcher_directive.clone())
            .max_output_tokens(self.config.openai_max_tokens)
            .model(&self.config.openai_research_model)
            .tools(search_tools)
            .text(text_config)
            .input(input);

        self.apply_temperature(&mut request, &self.config.openai_research_model);

        let response = self.call_openai_api(request).await?;

        collect_output_text(&response)
    }

    #[instrument(name = "OpenAiLlmClient::compose_feature_report", skip_all)]
    async fn compose_feature_report(&self, context: &ResearchContext) -> Res<FeatureReport> {
        let input = self.build_report_input(context)?;

        self.structured_call(&self.config.openai_research_model, &self.config.report_directive, input, report_text_config().clone())
            .await
    }
}

/// Collect all output text from an OpenAI response into one string.
#[instrument(skip_all)]
pub fn collect_output_text(response: &Response) -> Res<String> {
    let mut parts = Vec::new();

    for output in &response.output {
        match output {
            OutputContent::Message(message) => {
                for content in &message.content {
                    match content {
                        Content::OutputText(text) => parts.push(text.text.clone()),
                        Content::Refusal(reason) => {
                            return Err(anyhow::anyhow!("Request refused: {reason:#?}"));
                        }
                    }
                }
            }
            OutputContent::WebSearchCall(web_search_call) => {
                info!("Web search tool called: {web_search_call:#?}");
            }
            _ => {
                warn!("Unknown output: {output:#?}");
            }
        }
    }

    if parts.is_empty() {
        return Err(anyhow::anyhow!("LLM response contained no output text."));
    }

    Ok(parts.join("\n\n"))
}

// Statics.

static OPENAI_SEARCH_TOOLS: OnceLock<Vec<ToolDefinition>> = OnceLock::new();
static CLASSIFICATION_TEXT_CONFIG: OnceLock<TextConfig> = OnceLock::new();
static VERDICT_TEXT_CONFIG: OnceLock<TextConfig> = OnceLock::new();
static RISK_TEXT_CONFIG: OnceLock<TextConfig> = OnceLock::new();
static PLAN_TEXT_CONFIG: OnceLock<TextConfig> = OnceLock::new();
static REPORT_TEXT_CONFIG: OnceLock<TextConfig> = OnceLock::new();

/// Get the OpenAI search tools.
fn get_openai_search_tools() -> &'static Vec<ToolDefinition> {
    OPENAI_SEARCH_TOOLS.get_or_init(|| vec![ToolDefinition::WebSearchPreview(WebSearchPreviewArgs::default().build().unwrap())])
}

fn json_schema_config(name: &str, description: &str, schema: serde_json::Value) -> TextConfig {
    TextConfig {
        format: TextResponseFormat::JsonSchema(ResponseFormatJsonSchema {
            name: name.to_string(),
            description: Some(description.to_string()),
            schema: Some(schema),
            strict: Some(true),
        }),
    }
}

fn classification_text_config() -> &'static TextConfig {
    CLASSIFICATION_TEXT_CONFIG.get_or_init(|| {
        json_schema_config(
            "ReviewClassificationBatch",
            "Classification for every review in the batch.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "reviews": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "id": { "type": "string" },
                                "category": { "type": "string", "enum": ["bug", "feature", "other"] },
                                "confidence": { "type": "number" }
                            },
                            "required": ["id", "category", "confidence"],
                            "additionalProperties": false
                        }
                    }
                },
                "required": ["reviews"],
                "additionalProperties": false
            }),
        )
    })
}

fn verdict_text_config() -> &'static TextConfig {
    VERDICT_TEXT_CONFIG.get_or_init(|| {
        json_schema_config(
            "DuplicateVerdict",
            "Whether the bug report duplicates a candidate issue.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "is_duplicate": { "type": "boolean" },
                    "issue_id": { "type": ["string", "null"] },
                    "confidence": { "type": "number" },
                    "notes": { "type": "string" }
                },
                "required": ["is_duplicate", "issue_id", "confidence", "notes"],
                "additionalProperties": false
            }),
        )
    })
}

fn risk_text_config() -> &'static TextConfig {
    RISK_TEXT_CONFIG.get_or_init(|| {
        json_schema_config(
            "RiskAssessment",
            "Risk judgment for a proposed system action.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "requires_approval": { "type": "boolean" },
                    "risk": { "type": "string", "enum": ["low", "medium", "high"] },
                    "reasoning": { "type": "string" }
                },
                "required": ["requires_approval", "risk", "reasoning"],
                "additionalProperties": false
            }),
        )
    })
}

fn plan_text_config() -> &'static TextConfig {
    PLAN_TEXT_CONFIG.get_or_init(|| {
        json_schema_config(
            "ResearchPlan",
            "Web search queries for feature research.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "queries": { "type": "array", "items": { "type": "string" } }
                },
                "required": ["queries"],
                "additionalProperties": false
            }),
        )
    })
}

fn report_text_config() -> &'static TextConfig {
    REPORT_TEXT_CONFIG.get_or_init(|| {
        json_schema_config(
            "FeatureReport",
            "Final feature research report.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "summary": { "type": "string" },
                    "findings": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "competitor": { "type": "string" },
                                "claim": { "type": "string" },
                                "evidence_url": { "type": "string" },
                                "confidence": { "type": "string", "enum": ["low", "medium", "high"] }
                            },
                            "required": ["competitor", "claim", "evidence_url", "confidence"],
                            "additionalProperties": false
                        }
                    },
                    "spec": { "type": "string" }
                },
                "required": ["summary", "findings", "spec"],
                "additionalProperties": false
            }),
        )
    })
}

// Tests.

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::config::ConfigInner;
    use crate::base::types::{CandidateIssue, IssuePriority};

    fn create_test_config() -> Config {
        Config {
            inner: Arc::new(ConfigInner {
                openai_api_key: "test_key".to_string(),
                openai_classifier_model: "gpt-4.1-nano".to_string(),
                openai_triage_model: "gpt-4.1".to_string(),
                openai_research_model: "gpt-4.1".to_string(),
                openai_temperature: 0.2,
                openai_max_tokens: 200u32,
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_text_configs_are_strict_json_schemas() {
        for config in [classification_text_config(), verdict_text_config(), risk_text_config(), plan_text_config(), report_text_config()] {
            match &config.format {
                TextResponseFormat::JsonSchema(schema) => {
                    assert_eq!(schema.strict, Some(true));
                    assert!(schema.schema.is_some());
                }
                other => panic!("Expected JSON schema format, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_build_triage_input_includes_candidates() {
        let client = OpenAiLlmClient::new(&create_test_config());

        let context = DuplicateContext {
            report: "Login button does nothing".to_string(),
            project: "DEMO".to_string(),
            candidates: vec![CandidateIssue {
                issue_id: "DEMO-7".to_string(),
                title: "Login unresponsive on Android".to_string(),
                description: "Tapping login has no effect".to_string(),
            }],
        };

        let input = client.build_triage_input(&context).unwrap();

        match input {
            Input::Items(items) => assert_eq!(items.len(), 2),
            other => panic!("Expected items input, got {other:?}"),
        }
    }

    #[test]
    fn test_build_judge_input_serializes_action() {
        let client = OpenAiLlmClient::new(&create_test_config());

        let action = Action::CreateIssue {
            project: "DEMO".to_string(),
            summary: "Crash on startup".to_string(),
            description: "".to_string(),
            priority: IssuePriority::Critical,
            tags: vec![],
        };

        let input = client.build_judge_input(&action, "From review r-9").unwrap();

        match input {
            Input::Items(items) => assert_eq!(items.len(), 2),
            other => panic!("Expected items input, got {other:?}"),
        }
    }

    #[test]
    fn test_verdict_parses_with_null_issue_id() {
        let verdict: DuplicateVerdict = serde_json::from_str(r#"{"is_duplicate": false, "issue_id": null, "confidence": 0.9, "notes": "No candidate matches."}"#).unwrap();

        assert!(!verdict.is_duplicate);
        assert!(verdict.issue_id.is_none());
    }
}
