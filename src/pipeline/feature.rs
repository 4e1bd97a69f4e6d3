//! Feature request research.
//!
//! A feature review turns into a competitor research session: the planner
//! proposes a bounded set of web searches, the researcher runs them, and the
//! report writer condenses the notes into a chat-ready report.  Posting the
//! report is a gated action like any other.

use serde_json::json;
use tracing::{info, instrument, warn};

use crate::{
    base::{
        config::Config,
        types::{Action, FeatureReport, Res, ResearchContext},
    },
    pipeline::guardrail::MAX_BODY_LEN,
    service::{
        chat::ChatClient,
        db::{ApprovalRecord, DbClient, ReviewRecord},
        llm::LlmClient,
    },
};

use super::gate_action;

/// Process one feature review end to end, leaving a pending approval behind.
#[instrument(skip_all, fields(review_id = %review.review_id))]
pub async fn process_feature_review(review: &ReviewRecord, config: &Config, db: &DbClient, llm: &LlmClient, chat: &ChatClient) -> Res<ApprovalRecord> {
    let plan = llm.plan_research(&review.text, &config.competitors, config.max_search_queries).await?;

    info!("Research plan has {} queries.", plan.queries.len());

    // Run the searches concurrently; they are independent.
    let searches = plan.queries.iter().take(config.max_search_queries).map(|query| async move { (query.clone(), llm.run_research_query(query).await) });
    let results = futures::future::join_all(searches).await;

    let mut notes = Vec::new();
    let mut failed_queries = Vec::new();

    for (query, result) in results {
        match result {
            Ok(note) => notes.push(note),
            Err(err) => {
                // Thin evidence is survivable; the report writer grades
                // confidence accordingly.
                warn!("Research query `{query}` failed: {err}");
                failed_queries.push(query);
            }
        }
    }

    let report = llm
        .compose_feature_report(&ResearchContext {
            feature: review.text.clone(),
            notes,
        })
        .await?;

    let action = Action::PostMessage {
        channel: config.product_channel.clone(),
        message: render_report_message(&review.text, &report),
    };

    let audit = json!({
        "queries": plan.queries,
        "failed_queries": failed_queries,
        "findings": report.findings.len(),
    });

    gate_action(action, Some(review.review_id.clone()), audit, &review.text, config, db, llm, chat).await
}

/// Render the report as one chat message, clamped to the message limit.
pub fn render_report_message(feature: &str, report: &FeatureReport) -> String {
    let mut message = format!("*Feature research:* {}\n\n{}\n", feature.trim(), report.summary.trim());

    if !report.findings.is_empty() {
        message.push_str("\n*Findings:*\n");
        for finding in &report.findings {
            message.push_str(&format!("• *{}* — {} (<{}|source>, {:?} confidence)\n", finding.competitor, finding.claim, finding.evidence_url, finding.confidence));
        }
    }

    if !report.spec.trim().is_empty() {
        message.push_str(&format!("\n*Draft spec:*\n{}\n", report.spec.trim()));
    }

    clamp_chars(&message, MAX_BODY_LEN)
}

/// Truncate on a character boundary, marking the cut.
fn clamp_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }

    let mut clamped: String = text.chars().take(limit.saturating_sub(1)).collect();
    clamped.push('…');

    clamped
}

// Tests.

#[cfg(test)]
mod tests {
    use crate::base::types::{CompetitorFinding, ResearchConfidence};

    use super::*;

    fn report() -> FeatureReport {
        FeatureReport {
            summary: "Both competitors already ship offline mode.".into(),
            findings: vec![CompetitorFinding {
                competitor: "Acme Notes".into(),
                claim: "Offline editing since v4.2".into(),
                evidence_url: "https://acme.example/changelog".into(),
                confidence: ResearchConfidence::High,
            }],
            spec: "Support offline editing with sync on reconnect.".into(),
        }
    }

    #[test]
    fn test_render_report_message_includes_sections() {
        let message = render_report_message("Please add offline mode", &report());

        assert!(message.contains("*Feature research:* Please add offline mode"));
        assert!(message.contains("Both competitors already ship offline mode."));
        assert!(message.contains("Acme Notes"));
        assert!(message.contains("https://acme.example/changelog"));
        assert!(message.contains("*Draft spec:*"));
    }

    #[test]
    fn test_render_report_message_is_clamped() {
        let mut big = report();
        big.spec = "x".repeat(3 * MAX_BODY_LEN);

        let message = render_report_message("Please add offline mode", &big);

        assert!(message.chars().count() <= MAX_BODY_LEN);
        assert!(message.ends_with('…'));
    }

    #[test]
    fn test_clamp_chars_leaves_short_text_alone() {
        assert_eq!(clamp_chars("short", 100), "short");
    }
}
