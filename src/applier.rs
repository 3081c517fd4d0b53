//! Consumer side: analyze one photo and write the results onto the item.
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use tracing::{info, instrument};

use crate::config::LibraryFields;
use crate::dedup::{self, MarkerState};
use crate::model::{AnalysisResult, AnalysisWorkItem};
use crate::pipeline::Pipeline;

#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    Tagged(AnalysisResult),
    /// The marker was already set when the work item was delivered.
    AlreadyAnalyzed,
    /// The item or its file vanished after the notification.
    Missing,
}

#[instrument(skip_all, fields(item_id = work.item_id, collection = %work.collection_id))]
pub async fn apply(
    p: &Pipeline,
    work: &AnalysisWorkItem,
    now: DateTime<Utc>,
) -> Result<ApplyOutcome> {
    let source = p.source.as_ref();

    // Redelivered or duplicated requests end here once the marker is set.
    // An unknown marker does not stop us: the item was already accepted.
    if dedup::read_marker(source, &p.fields.analyzed, &work.collection_id, work.item_id).await
        == MarkerState::Analyzed
    {
        info!("photo already analyzed");
        return Ok(ApplyOutcome::AlreadyAnalyzed);
    }

    let image = match source
        .download_file(&work.collection_id, work.item_id)
        .await
    {
        Ok(bytes) => bytes,
        Err(err) if err.is_not_found() => {
            info!(%err, "photo no longer exists");
            return Ok(ApplyOutcome::Missing);
        }
        Err(err) => return Err(err).context("failed to download photo"),
    };

    let response = p
        .classifier
        .analyze(image)
        .await
        .context("photo analysis failed")?;
    let result = response.to_analysis();

    let update = build_update(&p.fields, &result, now);
    match source
        .update_item_fields(&work.collection_id, work.item_id, &update)
        .await
    {
        Ok(()) => {}
        Err(err) if err.is_not_found() => {
            info!(%err, "photo deleted before results could be written");
            return Ok(ApplyOutcome::Missing);
        }
        Err(err) => return Err(err).context("failed to write analysis results"),
    }

    info!(tags = %result.joined_tags(), inappropriate = result.is_inappropriate, "photo tagged");
    Ok(ApplyOutcome::Tagged(result))
}

/// Column values written back onto an analyzed item, including the marker.
pub fn build_update(
    fields: &LibraryFields,
    result: &AnalysisResult,
    now: DateTime<Utc>,
) -> Map<String, Value> {
    let mut update = Map::new();
    update.insert(fields.tags.clone(), Value::String(result.joined_tags()));
    update.insert(
        fields.last_analyzed.clone(),
        Value::String(now.to_rfc3339_opts(SecondsFormat::Secs, true)),
    );
    update.insert(fields.analyzed.clone(), Value::Bool(true));
    update.insert(
        fields.inappropriate.clone(),
        Value::Bool(result.is_inappropriate),
    );
    update.insert(
        fields.colors.clone(),
        Value::Array(
            result
                .dominant_colors
                .iter()
                .cloned()
                .map(Value::String)
                .collect(),
        ),
    );
    update
}
