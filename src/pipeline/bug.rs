//! Duplicate-aware bug processing.
//!
//! A bug review flows through staged narrowing before anything reaches a
//! human: tracker searches fan out from the review text, a lexical pre-filter
//! scores the candidates, and only the bounded shortlist goes to the LLM for
//! a detailed duplicate verdict.  The outcome is a gated action: comment on
//! the duplicate, or create a fresh issue.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::{
    base::{
        config::Config,
        types::{Action, CandidateIssue, DuplicateContext, DuplicateVerdict, IssuePriority, Res},
    },
    service::{
        chat::ChatClient,
        db::{ApprovalRecord, DbClient, ReviewRecord},
        llm::LlmClient,
        tracker::{IssueHit, TrackerClient},
    },
};

use super::gate_action;

/// Words too common to discriminate between bug reports.
const STOPWORDS: &[&str] = &[
    "about", "after", "again", "also", "always", "android", "app", "application", "because", "been", "before", "being", "cannot", "could", "does", "doesn", "dont", "even", "every",
    "from", "have", "having", "into", "iphone", "just", "keeps", "like", "make", "makes", "much", "never", "only", "other", "phone", "please", "really", "same", "should", "since",
    "some", "still", "than", "that", "them", "then", "there", "they", "this", "time", "tried", "trying", "update", "using", "very", "want", "what", "when", "where", "which",
    "while", "will", "with", "would", "your",
];

/// Half-life used by the recency score, in days.
const RECENCY_HALF_LIFE_DAYS: f64 = 90.0;

/// How many tracker hits one query may contribute.
const MAX_RESULTS_PER_QUERY: usize = 50;

/// Cap on the merged candidate pool before scoring.
const MAX_TOTAL_CANDIDATES: usize = 200;

/// A candidate with its pre-filter scores.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub hit: IssueHit,
    pub title_similarity: f64,
    pub keyword_overlap: f64,
    pub recency: f64,
    pub score: f64,
}

/// Process one bug review end to end, leaving a pending approval behind.
#[instrument(skip_all, fields(review_id = %review.review_id))]
pub async fn process_bug_review(review: &ReviewRecord, config: &Config, db: &DbClient, llm: &LlmClient, chat: &ChatClient, tracker: &TrackerClient) -> Res<ApprovalRecord> {
    let started = Utc::now();
    let project = &config.default_project;

    // Stage 1: fan out tracker searches built from the review text.

    let queries = build_search_queries(&review.text, project);
    let mut search_errors = Vec::new();
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();

    for query in &queries {
        match tracker.search_issues(query, MAX_RESULTS_PER_QUERY).await {
            Ok(hits) => {
                for hit in hits {
                    if candidates.len() >= MAX_TOTAL_CANDIDATES {
                        break;
                    }
                    if seen.insert(hit.issue_id.clone()) {
                        candidates.push(hit);
                    }
                }
            }
            Err(err) => {
                // A search failure narrows the candidate pool; it does not
                // abort the pipeline.
                warn!("Tracker search failed for `{query}`: {err}");
                search_errors.push(format!("{query}: {err}"));
            }
        }
    }

    info!("Collected {} duplicate candidates from {} queries.", candidates.len(), queries.len());

    // Stage 2: lexical pre-filter.

    let shortlist = prefilter_candidates(&review.text, candidates, Utc::now(), config.pre_filter_threshold, config.max_duplicate_candidates);

    // Stage 3: detailed LLM verdict, only if the shortlist is non-empty.

    let verdict = if shortlist.is_empty() {
        None
    } else {
        let context = DuplicateContext {
            report: review.text.clone(),
            project: project.clone(),
            candidates: shortlist
                .iter()
                .map(|c| CandidateIssue {
                    issue_id: c.hit.issue_id.clone(),
                    title: c.hit.title.clone(),
                    description: c.hit.description.clone(),
                })
                .collect(),
        };

        Some(llm.assess_duplicate(&context).await?)
    };

    // Stage 4: decide the gated action.

    let duplicate_id = confirmed_duplicate(verdict.as_ref(), &shortlist, config.duplicate_confidence_threshold);

    let action = match &duplicate_id {
        Some(issue_id) => Action::AddComment {
            issue_id: issue_id.clone(),
            comment: render_duplicate_comment(review),
        },
        None => Action::CreateIssue {
            project: project.clone(),
            summary: derive_summary(&review.text),
            description: render_bug_report(review),
            priority: infer_priority(&review.text),
            tags: vec!["from-review".to_string()],
        },
    };

    let audit = json!({
        "queries": queries,
        "search_errors": search_errors,
        "candidates": shortlist.iter().map(|c| json!({
            "issue_id": c.hit.issue_id,
            "title": c.hit.title,
            "title_similarity": c.title_similarity,
            "keyword_overlap": c.keyword_overlap,
            "recency": c.recency,
            "score": c.score,
        })).collect::<Vec<_>>(),
        "verdict": verdict,
        "duplicate_id": duplicate_id,
        "elapsed_ms": (Utc::now() - started).num_milliseconds(),
    });

    gate_action(action, Some(review.review_id.clone()), audit, &review.text, config, db, llm, chat).await
}

/// Build tracker queries from the review text: one keyword query, plus a
/// summary query when failure words are present.
pub fn build_search_queries(text: &str, project: &str) -> Vec<String> {
    let mut queries = Vec::new();

    let keywords = extract_keywords(text, 6);
    if !keywords.is_empty() {
        queries.push(format!("project: {project} ({})", keywords.join(" OR ")));
    }

    let failure_terms: Vec<&str> = ["crash", "error", "freeze", "hang", "fail"].into_iter().filter(|t| text.to_lowercase().contains(*t)).collect();
    if !failure_terms.is_empty() {
        queries.push(format!("project: {project} summary: {}", failure_terms.join(" ")));
    }

    if queries.is_empty() {
        queries.push(format!("project: {project} #Unresolved"));
    }

    queries
}

/// Lowercased content words of the text, most frequent first.
pub fn extract_keywords(text: &str, limit: usize) -> Vec<String> {
    let mut counts: Vec<(String, usize)> = Vec::new();

    for word in text.split(|c: char| !c.is_alphanumeric()) {
        let word = word.to_lowercase();

        if word.len() < 4 || STOPWORDS.contains(&word.as_str()) {
            continue;
        }

        match counts.iter_mut().find(|(w, _)| *w == word) {
            Some((_, count)) => *count += 1,
            None => counts.push((word, 1)),
        }
    }

    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts.into_iter().take(limit).map(|(w, _)| w).collect()
}

/// Score and shortlist candidates: combined lexical score above the
/// threshold, best first, bounded by `limit`.
pub fn prefilter_candidates(report: &str, candidates: Vec<IssueHit>, now: DateTime<Utc>, threshold: f64, limit: usize) -> Vec<ScoredCandidate> {
    let mut scored: Vec<ScoredCandidate> = candidates.into_iter().map(|hit| score_candidate(report, hit, now)).filter(|c| c.score >= threshold).collect();

    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(limit);

    scored
}

/// Score one candidate against the report.
///
/// Title similarity dominates; keyword overlap and recency refine it.
pub fn score_candidate(report: &str, hit: IssueHit, now: DateTime<Utc>) -> ScoredCandidate {
    let title_similarity = jaccard(&word_set(report), &word_set(&hit.title));

    let report_keywords = extract_keywords(report, 12);
    let candidate_words: HashSet<String> = word_set(&format!("{} {}", hit.title, hit.description));
    let keyword_overlap = if report_keywords.is_empty() {
        0.0
    } else {
        report_keywords.iter().filter(|k| candidate_words.contains(*k)).count() as f64 / report_keywords.len() as f64
    };

    let recency = match hit.created_at {
        Some(created) => {
            let age_days = (now - created).num_seconds().max(0) as f64 / 86_400.0;
            0.5_f64.powf(age_days / RECENCY_HALF_LIFE_DAYS)
        }
        // Unknown age neither helps nor hurts.
        None => 0.5,
    };

    let score = 0.5 * title_similarity + 0.3 * keyword_overlap + 0.2 * recency;

    ScoredCandidate {
        hit,
        title_similarity,
        keyword_overlap,
        recency,
        score,
    }
}

/// A verdict only counts when it is confident enough and points at an issue
/// that was actually on the shortlist.
fn confirmed_duplicate(verdict: Option<&DuplicateVerdict>, shortlist: &[ScoredCandidate], threshold: f64) -> Option<String> {
    let verdict = verdict?;

    if !verdict.is_duplicate || verdict.confidence < threshold {
        return None;
    }

    let issue_id = verdict.issue_id.as_ref()?;

    shortlist.iter().find(|c| &c.hit.issue_id == issue_id).map(|c| c.hit.issue_id.clone())
}

fn word_set(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric()).map(str::to_lowercase).filter(|w| w.len() >= 3).collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;

    intersection / union
}

/// First sentence of the review, clamped to the tracker summary limit.
pub fn derive_summary(text: &str) -> String {
    let first = text.split(['.', '!', '?', '\n']).map(str::trim).find(|s| !s.is_empty()).unwrap_or("User-reported bug");

    let mut summary: String = first.chars().take(120).collect();
    if first.chars().count() > 120 {
        summary.push('…');
    }

    summary
}

/// Severity keywords escalate the created issue's priority.
pub fn infer_priority(text: &str) -> IssuePriority {
    let lower = text.to_lowercase();

    if ["data loss", "security", "payment", "charged"].iter().any(|t| lower.contains(t)) {
        IssuePriority::Critical
    } else if ["crash", "freeze", "cannot login", "can't login", "unusable"].iter().any(|t| lower.contains(t)) {
        IssuePriority::Major
    } else {
        IssuePriority::Normal
    }
}

fn render_bug_report(review: &ReviewRecord) -> String {
    format!(
        "## User Review\n\n{}\n\n---\n\n- Review ID: `{}`\n- Source: {}\n- Classifier confidence: {:.2}\n- Processed: {}\n",
        review.text,
        review.review_id,
        review.source.as_deref().unwrap_or("unknown"),
        review.confidence,
        review.processed_at.format("%Y-%m-%d %H:%M UTC"),
    )
}

fn render_duplicate_comment(review: &ReviewRecord) -> String {
    format!(
        "Another user report of this issue, from review `{}` ({}):\n\n> {}\n",
        review.review_id,
        review.source.as_deref().unwrap_or("unknown source"),
        review.text.replace('\n', "\n> "),
    )
}

// Tests.

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn hit(issue_id: &str, title: &str, description: &str, age_days: i64) -> IssueHit {
        IssueHit {
            issue_id: issue_id.into(),
            title: title.into(),
            description: description.into(),
            created_at: Some(Utc::now() - Duration::days(age_days)),
        }
    }

    #[test]
    fn test_extract_keywords_filters_noise() {
        let keywords = extract_keywords("The app keeps crashing when I open the camera. Crashing every single time!", 6);

        assert!(keywords.contains(&"crashing".to_string()));
        assert!(keywords.contains(&"camera".to_string()));
        assert!(!keywords.contains(&"the".to_string()));
        assert!(!keywords.contains(&"keeps".to_string()));
        // "crashing" appears twice, so it sorts first.
        assert_eq!(keywords[0], "crashing");
    }

    #[test]
    fn test_build_search_queries_includes_failure_terms() {
        let queries = build_search_queries("App crashes with an error when uploading photos", "DEMO");

        assert_eq!(queries.len(), 2);
        assert!(queries[0].starts_with("project: DEMO ("));
        assert!(queries[1].contains("summary: crash error"));
    }

    #[test]
    fn test_build_search_queries_falls_back_to_unresolved() {
        let queries = build_search_queries("bad", "DEMO");

        assert_eq!(queries, vec!["project: DEMO #Unresolved".to_string()]);
    }

    #[test]
    fn test_similar_title_outscores_unrelated() {
        let report = "Camera crashes when recording video in low light";
        let now = Utc::now();

        let close = score_candidate(report, hit("DEMO-1", "Camera crashes while recording video", "", 10), now);
        let far = score_candidate(report, hit("DEMO-2", "Add dark mode to settings", "", 10), now);

        assert!(close.score > far.score);
        assert!(close.title_similarity > 0.3);
        assert!(far.title_similarity < 0.1);
    }

    #[test]
    fn test_recency_decays_with_age() {
        let report = "Camera crashes when recording video";
        let now = Utc::now();

        let fresh = score_candidate(report, hit("DEMO-1", "Camera crashes", "", 0), now);
        let stale = score_candidate(report, hit("DEMO-2", "Camera crashes", "", 360), now);

        assert!(fresh.recency > 0.9);
        assert!(stale.recency < 0.1);
        assert!(fresh.score > stale.score);
    }

    #[test]
    fn test_prefilter_applies_threshold_and_limit() {
        let report = "Camera crashes when recording video in low light";
        let now = Utc::now();

        let candidates = vec![
            hit("DEMO-1", "Camera crashes while recording video", "crash in camera module", 5),
            hit("DEMO-2", "Camera crash during video recording in low light", "", 15),
            hit("DEMO-3", "Translate app into French", "", 5),
        ];

        let shortlist = prefilter_candidates(report, candidates, now, 0.3, 1);

        assert_eq!(shortlist.len(), 1);
        assert_ne!(shortlist[0].hit.issue_id, "DEMO-3");
    }

    #[test]
    fn test_confirmed_duplicate_requires_shortlisted_issue() {
        let report = "Camera crashes when recording video";
        let now = Utc::now();
        let shortlist = prefilter_candidates(report, vec![hit("DEMO-1", "Camera crashes while recording video", "", 5)], now, 0.1, 10);

        let good = DuplicateVerdict {
            is_duplicate: true,
            issue_id: Some("DEMO-1".into()),
            confidence: 0.9,
            notes: String::new(),
        };
        let hallucinated = DuplicateVerdict {
            is_duplicate: true,
            issue_id: Some("DEMO-999".into()),
            confidence: 0.9,
            notes: String::new(),
        };
        let unsure = DuplicateVerdict {
            is_duplicate: true,
            issue_id: Some("DEMO-1".into()),
            confidence: 0.4,
            notes: String::new(),
        };

        assert_eq!(confirmed_duplicate(Some(&good), &shortlist, 0.75), Some("DEMO-1".to_string()));
        assert_eq!(confirmed_duplicate(Some(&hallucinated), &shortlist, 0.75), None);
        assert_eq!(confirmed_duplicate(Some(&unsure), &shortlist, 0.75), None);
        assert_eq!(confirmed_duplicate(None, &shortlist, 0.75), None);
    }

    #[test]
    fn test_derive_summary_takes_first_sentence() {
        assert_eq!(derive_summary("App crashes on startup. Happens every time."), "App crashes on startup");
        assert_eq!(derive_summary(""), "User-reported bug");

        let long = "a".repeat(300);
        assert!(derive_summary(&long).chars().count() <= 121);
    }

    #[test]
    fn test_infer_priority_escalates_on_severity() {
        assert_eq!(infer_priority("I was charged twice for my subscription"), IssuePriority::Critical);
        assert_eq!(infer_priority("The app crashes when I rotate my phone"), IssuePriority::Major);
        assert_eq!(infer_priority("The font is too small on tablets"), IssuePriority::Normal);
    }
}
