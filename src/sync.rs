//! One poll of a collection's change log, triggered by a notification.
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use tracing::{debug, info, instrument};

use crate::cursor;
use crate::dedup;
use crate::dispatch;
use crate::fetcher;
use crate::model::{ChangeCursor, ChangeRecord, ChangeToken, Notification};
use crate::pipeline::Pipeline;

const MARKER_LOOKUP_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOutcome {
    pub collection_id: String,
    pub fetched: usize,
    /// Item ids put on the photo request queue, in change order.
    pub dispatched: Vec<i64>,
    pub already_processed: Vec<i64>,
    /// Deletes and other change types, plus repeats of an item within the poll.
    pub ignored: usize,
    pub cursor: ChangeToken,
}

/// Fetch the changes since the stored cursor, queue every added or updated
/// item that has not been analyzed, then store the new cursor. The cursor is
/// written only after every record has been handled, so a failure part-way
/// leaves it untouched and the next poll starts from the same place.
#[instrument(skip_all, fields(collection = %notification.resource, subscription = %notification.subscription_id))]
pub async fn process_notification(
    p: &Pipeline,
    notification: &Notification,
    now: DateTime<Utc>,
) -> Result<PollOutcome> {
    let collection_id = notification.resource.trim();
    if collection_id.is_empty() {
        bail!(
            "notification for subscription {} names no collection",
            notification.subscription_id
        );
    }

    let since = cursor::start_token(p.cursors.as_ref(), collection_id, now).await?;
    let records = fetcher::fetch_changes(p.source.as_ref(), collection_id, &since)
        .await
        .with_context(|| format!("failed to fetch changes for {}", collection_id))?;

    let mut seen = HashSet::new();
    let candidates: Vec<i64> = records
        .iter()
        .filter(|r| r.change_type.wants_analysis())
        .map(|r| r.item_id)
        .filter(|item_id| seen.insert(*item_id))
        .collect();
    let ignored = records.len() - candidates.len();

    let marker_field = p.fields.analyzed.as_str();
    let checks: Vec<(i64, bool)> = stream::iter(candidates)
        .map(|item_id| async move {
            let processed = dedup::is_already_processed(
                p.source.as_ref(),
                marker_field,
                collection_id,
                item_id,
            )
            .await;
            (item_id, processed)
        })
        .buffered(MARKER_LOOKUP_CONCURRENCY)
        .collect()
        .await;

    let mut dispatched = Vec::new();
    let mut already_processed = Vec::new();
    for (item_id, processed) in checks {
        if processed {
            debug!(item_id, "already analyzed; skipping");
            already_processed.push(item_id);
            continue;
        }
        dispatch::enqueue_analysis(&p.pool, collection_id, item_id)
            .await
            .with_context(|| format!("failed to queue item {}", item_id))?;
        dispatched.push(item_id);
    }

    let next = next_token(collection_id, &since, now, &records);
    p.cursors
        .put(&ChangeCursor {
            collection_id: collection_id.to_string(),
            token: next.clone(),
            subscription_id: Some(notification.subscription_id.clone()),
            updated_at: Utc::now(),
        })
        .await
        .context("failed to store change cursor")?;

    info!(
        fetched = records.len(),
        dispatched = dispatched.len(),
        skipped = already_processed.len(),
        ignored,
        cursor = %next,
        "poll complete"
    );

    Ok(PollOutcome {
        collection_id: collection_id.to_string(),
        fetched: records.len(),
        dispatched,
        already_processed,
        ignored,
        cursor: next,
    })
}

/// Position to resume from: never behind the previous cursor or any change
/// already seen, and never ahead of the moment this poll started.
fn next_token(
    collection_id: &str,
    since: &ChangeToken,
    started: DateTime<Utc>,
    records: &[ChangeRecord],
) -> ChangeToken {
    let latest = records
        .iter()
        .filter_map(|r| r.changed_at)
        .fold(since.timestamp().max(started), std::cmp::max);
    ChangeToken::at(collection_id, latest)
}
