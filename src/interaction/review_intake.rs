//! Intake of review batches: classify, store, route.

use std::collections::HashMap;

use serde_json::json;
use tracing::{Instrument, error, info, instrument, warn};

use crate::{
    base::{
        config::Config,
        types::{ReviewCategory, ReviewInput, Void},
    },
    pipeline,
    service::{
        chat::ChatClient,
        db::{DbClient, NewReview},
        llm::LlmClient,
        tracker::TrackerClient,
    },
};

/// Handles an incoming review batch.
///
/// This spawns a new task to process the batch asynchronously; routing
/// failures for individual reviews are logged and do not abort the batch.
#[instrument(skip_all)]
pub fn handle_review_batch(batch: Vec<ReviewInput>, config: Config, db: DbClient, llm: LlmClient, chat: ChatClient, tracker: TrackerClient) {
    tokio::spawn(async move {
        // Process the batch.
        let result = handle_review_batch_internal(batch, &config, &db, &llm, &chat, &tracker).in_current_span().await;

        // Log any errors.
        if let Err(err) = &result {
            error!("Error while handling review batch: {}", err);
        }
    });
}

#[instrument(skip_all)]
async fn handle_review_batch_internal(batch: Vec<ReviewInput>, config: &Config, db: &DbClient, llm: &LlmClient, chat: &ChatClient, tracker: &TrackerClient) -> Void {
    let run = db.create_run(&format!("review batch ({} reviews)", batch.len())).await?;

    if batch.is_empty() {
        db.complete_run(&run.run_id, "completed", json!({ "total": 0 })).await?;
        return Ok(());
    }

    // Classify the whole batch in one call.

    let classification = match llm.classify_reviews(&batch).await {
        Ok(classification) => classification,
        Err(err) => {
            db.complete_run(&run.run_id, "failed", json!({ "error": err.to_string() })).await?;
            return Err(err);
        }
    };

    let inputs: HashMap<&str, &ReviewInput> = batch.iter().map(|r| (r.id.as_str(), r)).collect();

    let mut bugs = 0usize;
    let mut features = 0usize;
    let mut other = 0usize;
    let mut routed_bugs = 0usize;
    let mut routed_features = 0usize;

    for classified in &classification.reviews {
        // The classifier occasionally invents ids; drop them.
        let Some(input) = inputs.get(classified.id.as_str()) else {
            warn!("Classifier returned unknown review id `{}`; dropping.", classified.id);
            continue;
        };

        let record = match db
            .store_review(NewReview {
                review_id: input.id.clone(),
                run_id: run.run_id.clone(),
                text: input.text.clone(),
                category: classified.category,
                confidence: classified.confidence,
                source: input.source.clone(),
            })
            .await
        {
            Ok(record) => record,
            Err(err) => {
                warn!("Failed to store review `{}`: {err}", input.id);
                continue;
            }
        };

        match classified.category {
            ReviewCategory::Bug => bugs += 1,
            ReviewCategory::Feature => features += 1,
            ReviewCategory::Other => other += 1,
        }

        // Only confident classifications are routed into the pipelines; the
        // rest stay stored for a human to sift.
        if classified.confidence < config.confidence_threshold {
            continue;
        }

        match classified.category {
            ReviewCategory::Bug => match pipeline::bug::process_bug_review(&record, config, db, llm, chat, tracker).await {
                Ok(approval) => {
                    routed_bugs += 1;
                    info!("Review `{}` routed to bug pipeline; approval `{}` pending.", record.review_id, approval.approval_id);
                }
                Err(err) => warn!("Bug pipeline failed for review `{}`: {err}", record.review_id),
            },
            ReviewCategory::Feature => match pipeline::feature::process_feature_review(&record, config, db, llm, chat).await {
                Ok(approval) => {
                    routed_features += 1;
                    info!("Review `{}` routed to feature pipeline; approval `{}` pending.", record.review_id, approval.approval_id);
                }
                Err(err) => warn!("Feature pipeline failed for review `{}`: {err}", record.review_id),
            },
            ReviewCategory::Other => {}
        }
    }

    db.complete_run(
        &run.run_id,
        "completed",
        json!({
            "total": batch.len(),
            "bugs": bugs,
            "features": features,
            "other": other,
            "routed_bugs": routed_bugs,
            "routed_features": routed_features,
        }),
    )
    .await?;

    info!("Run `{}` completed: {bugs} bugs, {features} features, {other} other.", run.run_id);

    Ok(())
}
