//! Load configuration via `config` crate with env-override support.

use std::{ops::Deref, sync::Arc};

use serde::Deserialize;

use crate::base::prompts;

use super::types::Res;

/// Default OpenAI classifier model to use
fn default_openai_classifier_model() -> String {
    "gpt-4.1-nano".to_string()
}

/// Default OpenAI triage model (duplicate assessment and risk judging)
fn default_openai_triage_model() -> String {
    "gpt-4.1".to_string()
}

/// Default OpenAI research model to use
fn default_openai_research_model() -> String {
    "gpt-4.1".to_string()
}

/// Default sampling temperature for OpenAI models
fn default_openai_temperature() -> f32 {
    0.2
}

/// Default max output tokens for OpenAI model
fn default_openai_max_tokens() -> u32 {
    65536
}

/// Default system directive for the classifier agent.
fn default_classifier_directive() -> String {
    prompts::CLASSIFIER_DIRECTIVE.to_string()
}

/// Default system directive for the duplicate triage agent.
fn default_triage_directive() -> String {
    prompts::TRIAGE_DIRECTIVE.to_string()
}

/// Default system directive for the risk judge.
fn default_judge_directive() -> String {
    prompts::JUDGE_DIRECTIVE.to_string()
}

/// Default system directive for the research planner.
fn default_planner_directive() -> String {
    prompts::PLANNER_DIRECTIVE.to_string()
}

/// Default system directive for the web researcher.
fn default_researcher_directive() -> String {
    prompts::RESEARCHER_DIRECTIVE.to_string()
}

/// Default system directive for the report writer.
fn default_report_directive() -> String {
    prompts::REPORT_DIRECTIVE.to_string()
}

fn default_approvals_channel() -> String {
    "approvals".to_string()
}

fn default_high_risk_channel() -> String {
    "critical-approvals".to_string()
}

fn default_product_channel() -> String {
    "product".to_string()
}

fn default_db_namespace() -> String {
    "pm".to_string()
}

fn default_db_database() -> String {
    "bot".to_string()
}

fn default_tracker_mcp_url() -> String {
    "http://localhost:8002/mcp".to_string()
}

fn default_project() -> String {
    "DEMO".to_string()
}

fn default_supported_projects() -> Vec<String> {
    vec!["DEMO".to_string(), "PROD".to_string(), "TEST".to_string()]
}

fn default_confidence_threshold() -> f64 {
    0.8
}

fn default_max_search_queries() -> usize {
    10
}

fn default_max_duplicate_candidates() -> usize {
    10
}

fn default_pre_filter_threshold() -> f64 {
    0.3
}

fn default_duplicate_confidence_threshold() -> f64 {
    0.75
}

fn default_job_timeout_secs() -> u64 {
    120
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_sweep_interval_secs() -> u64 {
    300
}

fn default_expiry_hours_high() -> i64 {
    24
}

fn default_expiry_hours_medium() -> i64 {
    48
}

fn default_expiry_hours_low() -> i64 {
    72
}

/// Configuration for the pm-bot application.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub inner: Arc<ConfigInner>,
}

impl Deref for Config {
    type Target = ConfigInner;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ConfigInner {
    /// OpenAI API key (`OPENAI_API_KEY`).
    pub openai_api_key: String,
    /// OpenAI classifier model to use (`OPENAI_CLASSIFIER_MODEL`).
    #[serde(default = "default_openai_classifier_model")]
    pub openai_classifier_model: String,
    /// OpenAI triage model for duplicate assessment and risk judging (`OPENAI_TRIAGE_MODEL`).
    #[serde(default = "default_openai_triage_model")]
    pub openai_triage_model: String,
    /// OpenAI research model to use (`OPENAI_RESEARCH_MODEL`).
    #[serde(default = "default_openai_research_model")]
    pub openai_research_model: String,
    /// Sampling temperature for OpenAI models (`OPENAI_TEMPERATURE`).
    /// Value between 0 and 2.  Only applied to non-reasoning models.
    #[serde(default = "default_openai_temperature")]
    pub openai_temperature: f32,
    /// Max output tokens for OpenAI models (`OPENAI_MAX_TOKENS`).
    #[serde(default = "default_openai_max_tokens")]
    pub openai_max_tokens: u32,
    /// Optional custom classifier directive override (`CLASSIFIER_DIRECTIVE`).
    #[serde(default = "default_classifier_directive")]
    pub classifier_directive: String,
    /// Optional custom duplicate triage directive override (`TRIAGE_DIRECTIVE`).
    #[serde(default = "default_triage_directive")]
    pub triage_directive: String,
    /// Optional custom risk judge directive override (`JUDGE_DIRECTIVE`).
    #[serde(default = "default_judge_directive")]
    pub judge_directive: String,
    /// Optional custom research planner directive override (`PLANNER_DIRECTIVE`).
    #[serde(default = "default_planner_directive")]
    pub planner_directive: String,
    /// Optional custom web researcher directive override (`RESEARCHER_DIRECTIVE`).
    #[serde(default = "default_researcher_directive")]
    pub researcher_directive: String,
    /// Optional custom report writer directive override (`REPORT_DIRECTIVE`).
    #[serde(default = "default_report_directive")]
    pub report_directive: String,
    /// Slack app token (`SLACK_APP_TOKEN`).
    pub slack_app_token: String,
    /// Slack bot token (`SLACK_BOT_TOKEN`).
    pub slack_bot_token: String,
    /// Slack signing secret (`SLACK_SIGNING_SECRET`).
    pub slack_signing_secret: String,
    /// Channel for medium/low risk approval requests (`APPROVALS_CHANNEL`).
    #[serde(default = "default_approvals_channel")]
    pub approvals_channel: String,
    /// Channel for high risk approval requests (`HIGH_RISK_CHANNEL`).
    #[serde(default = "default_high_risk_channel")]
    pub high_risk_channel: String,
    /// Channel where approved feature reports are posted (`PRODUCT_CHANNEL`).
    #[serde(default = "default_product_channel")]
    pub product_channel: String,
    /// User IDs allowed to decide approvals; empty allows anyone (`REVIEWER_ALLOWLIST`).
    #[serde(default)]
    pub reviewer_allowlist: Vec<String>,
    /// Database endpoint URL, or `memory` for an embedded store (`DB_ENDPOINT`).
    pub db_endpoint: String,
    /// Database username (`DB_USERNAME`).
    #[serde(default)]
    pub db_username: String,
    /// Database password (`DB_PASSWORD`).
    #[serde(default)]
    pub db_password: String,
    /// Database namespace (`DB_NAMESPACE`).
    #[serde(default = "default_db_namespace")]
    pub db_namespace: String,
    /// Database name (`DB_DATABASE`).
    #[serde(default = "default_db_database")]
    pub db_database: String,
    /// Issue tracker MCP endpoint (`TRACKER_MCP_URL`).
    #[serde(default = "default_tracker_mcp_url")]
    pub tracker_mcp_url: String,
    /// Optional bearer token for the tracker MCP endpoint (`TRACKER_MCP_TOKEN`).
    #[serde(default)]
    pub tracker_mcp_token: Option<String>,
    /// Default tracker project for created issues (`DEFAULT_PROJECT`).
    #[serde(default = "default_project")]
    pub default_project: String,
    /// Projects the bot is allowed to touch (`SUPPORTED_PROJECTS`).
    #[serde(default = "default_supported_projects")]
    pub supported_projects: Vec<String>,
    /// Competitors considered during feature research (`COMPETITORS`).
    #[serde(default)]
    pub competitors: Vec<String>,
    /// Minimum classifier confidence for routing a review into a pipeline
    /// (`CONFIDENCE_THRESHOLD`).  Value between 0 and 1.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    /// Max web search queries per feature research session (`MAX_SEARCH_QUERIES`).
    #[serde(default = "default_max_search_queries")]
    pub max_search_queries: usize,
    /// Max duplicate candidates handed to the triage agent (`MAX_DUPLICATE_CANDIDATES`).
    #[serde(default = "default_max_duplicate_candidates")]
    pub max_duplicate_candidates: usize,
    /// Minimum combined pre-filter score for a duplicate candidate
    /// (`PRE_FILTER_THRESHOLD`).  Value between 0 and 1.
    #[serde(default = "default_pre_filter_threshold")]
    pub pre_filter_threshold: f64,
    /// Minimum triage confidence to treat a candidate as a duplicate
    /// (`DUPLICATE_CONFIDENCE_THRESHOLD`).  Value between 0 and 1.
    #[serde(default = "default_duplicate_confidence_threshold")]
    pub duplicate_confidence_threshold: f64,
    /// Per-job execution timeout in seconds (`JOB_TIMEOUT_SECS`).
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
    /// Max execution attempts per approved action (`MAX_RETRIES`).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay between retries in milliseconds, doubled per attempt
    /// (`RETRY_DELAY_MS`).
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Interval between worker sweeps in seconds (`SWEEP_INTERVAL_SECS`).
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Hours until a pending high-risk approval expires (`EXPIRY_HOURS_HIGH`).
    #[serde(default = "default_expiry_hours_high")]
    pub expiry_hours_high: i64,
    /// Hours until a pending medium-risk approval expires (`EXPIRY_HOURS_MEDIUM`).
    #[serde(default = "default_expiry_hours_medium")]
    pub expiry_hours_medium: i64,
    /// Hours until a pending low-risk approval expires (`EXPIRY_HOURS_LOW`).
    #[serde(default = "default_expiry_hours_low")]
    pub expiry_hours_low: i64,
}

impl Config {
    pub fn load(explicit_path: Option<&std::path::Path>) -> Res<Self> {
        let mut cfg = config::Config::builder().add_source(config::Environment::default().prefix("PM_BOT"));

        if let Some(p) = explicit_path {
            cfg = cfg.add_source(config::File::from(p.to_path_buf()));
        } else if std::path::Path::new(".hidden/config.toml").exists() {
            cfg = cfg.add_source(config::File::with_name(".hidden/config.toml"));
        }

        let result = Config {
            inner: Arc::new(cfg.build()?.try_deserialize()?),
        };

        if result.openai_temperature < 0.0 || result.openai_temperature > 2.0 {
            return Err(anyhow::anyhow!("OpenAI temperature must be between 0 and 2."));
        }

        if result.openai_max_tokens < 1 || result.openai_max_tokens > 128000 {
            return Err(anyhow::anyhow!("OpenAI max tokens must be between 1 and 128000."));
        }

        if result.confidence_threshold < 0.0 || result.confidence_threshold > 1.0 {
            return Err(anyhow::anyhow!("Confidence threshold must be between 0 and 1."));
        }

        if result.pre_filter_threshold < 0.0 || result.pre_filter_threshold > 1.0 {
            return Err(anyhow::anyhow!("Pre-filter threshold must be between 0 and 1."));
        }

        if result.duplicate_confidence_threshold < 0.0 || result.duplicate_confidence_threshold > 1.0 {
            return Err(anyhow::anyhow!("Duplicate confidence threshold must be between 0 and 1."));
        }

        if result.max_retries < 1 {
            return Err(anyhow::anyhow!("Max retries must be at least 1."));
        }

        if result.supported_projects.is_empty() {
            return Err(anyhow::anyhow!("At least one supported project is required."));
        }

        Ok(result)
    }

    /// Channel that approval requests for the given risk should land in.
    pub fn approval_channel_for(&self, risk: crate::base::types::RiskLevel) -> &str {
        match risk {
            crate::base::types::RiskLevel::High => &self.high_risk_channel,
            _ => &self.approvals_channel,
        }
    }
}

// Tests.

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::types::RiskLevel;

    #[test]
    fn test_defaults_are_sane() {
        let inner = ConfigInner {
            openai_classifier_model: default_openai_classifier_model(),
            confidence_threshold: default_confidence_threshold(),
            max_retries: default_max_retries(),
            supported_projects: default_supported_projects(),
            ..Default::default()
        };

        assert_eq!(inner.openai_classifier_model, "gpt-4.1-nano");
        assert!(inner.confidence_threshold > 0.0 && inner.confidence_threshold < 1.0);
        assert!(inner.max_retries >= 1);
        assert!(inner.supported_projects.contains(&"DEMO".to_string()));
    }

    #[test]
    fn test_high_risk_routes_to_dedicated_channel() {
        let config = Config {
            inner: Arc::new(ConfigInner {
                approvals_channel: default_approvals_channel(),
                high_risk_channel: default_high_risk_channel(),
                ..Default::default()
            }),
        };

        assert_eq!(config.approval_channel_for(RiskLevel::High), "critical-approvals");
        assert_eq!(config.approval_channel_for(RiskLevel::Medium), "approvals");
        assert_eq!(config.approval_channel_for(RiskLevel::Low), "approvals");
    }
}
